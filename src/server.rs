//! HTTP surface: the canonical `/v1/messages` endpoint plus health, model
//! listing, and recent-log introspection.

use crate::config::ProxyConfig;
use crate::dispatch::{self, DispatchResult};
use crate::logging::SharedLogger;
use crate::registry::ProviderRegistry;
use crate::translate::anthropic_types::ErrorResponse;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::StreamExt;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub config: ProxyConfig,
    pub registry: ProviderRegistry,
    pub client: reqwest::Client,
    pub logger: SharedLogger,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/messages", post(handle_messages))
        .route("/v1/models", get(handle_models))
        .route("/health", get(handle_health))
        .route("/logs", get(handle_logs))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(response) = check_client_auth(&headers) {
        return response;
    }

    let result = dispatch::dispatch(
        &state.registry,
        &state.client,
        &state.logger,
        Duration::from_secs(state.config.idle_read_timeout_secs),
        body,
    )
    .await;

    match result {
        DispatchResult::Json { status, body } => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            (
                status,
                [("content-type", "application/json")],
                body,
            )
                .into_response()
        }
        DispatchResult::Stream(frames) => {
            let event_stream = frames.map(|result| -> std::result::Result<Event, Infallible> {
                match result {
                    Ok(frame) => Ok(Event::default().event(frame.event).data(frame.data)),
                    Err(_) => Ok(Event::default().event("error").data("{}")),
                }
            });

            Sse::new(event_stream)
                .keep_alive(axum::response::sse::KeepAlive::default())
                .into_response()
        }
    }
}

/// When `CCO_API_KEY` is set, clients must present it via `x-api-key` or a
/// bearer token. Unset means an open frontend.
fn check_client_auth(headers: &HeaderMap) -> std::result::Result<(), Response> {
    let Some(required) = ProxyConfig::client_api_key() else {
        return Ok(());
    };

    let presented = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
        });

    if presented == Some(required.as_str()) {
        return Ok(());
    }

    let err = ErrorResponse::authentication("Invalid or missing API key");
    Err((StatusCode::UNAUTHORIZED, Json(err)).into_response())
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn handle_models(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let models: Vec<serde_json::Value> = state
        .registry
        .entries()
        .iter()
        .flat_map(|entry| {
            entry
                .descriptor
                .model_prefixes
                .iter()
                .map(|prefix| {
                    serde_json::json!({
                        "id": prefix,
                        "object": "model",
                        "owned_by": entry.descriptor.name,
                    })
                })
                .collect::<Vec<_>>()
        })
        .collect();

    Json(serde_json::json!({ "data": models, "object": "list" }))
}

#[derive(Deserialize)]
struct LogsQuery {
    #[serde(default = "default_log_limit")]
    limit: usize,
}

fn default_log_limit() -> usize {
    100
}

async fn handle_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogsQuery>,
) -> Json<serde_json::Value> {
    let entries = state.logger.recent(query.limit.min(1000));
    Json(serde_json::json!({ "entries": entries }))
}

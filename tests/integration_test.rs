//! End-to-end tests: a real proxy instance talking to an in-process mock
//! upstream, exercising routing, translation, streaming, and error paths.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Path, RawQuery};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::json;

use cco::config::{ProviderConfig, ProviderKind, ProxyConfig};
use cco::{build_router, AppState, ProviderRegistry, SharedLogger};

const CLIENT_KEY: &str = "test-cco-key";

// ────────────────────────────────────────────────────────────────
// Mock upstream
// ────────────────────────────────────────────────────────────────

async fn mock_completions(body: Bytes) -> Response {
    let req: serde_json::Value = serde_json::from_slice(&body).unwrap();
    let model = req["model"].as_str().unwrap_or_default();

    if model == "gpt-reject" {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "error": {"message": "bad key", "type": "authentication_error"}
            })),
        )
            .into_response();
    }

    if req["stream"].as_bool().unwrap_or(false) {
        let sse_body = concat!(
            "data: {\"id\":\"x\",\"model\":\"gpt-4o\",\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"A\"},\"finish_reason\":null}]}\n\n",
            "data: {\"id\":\"x\",\"model\":\"gpt-4o\",\"choices\":[{\"index\":0,\"delta\":{\"content\":\"B\"},\"finish_reason\":null}]}\n\n",
            "data: {\"id\":\"x\",\"model\":\"gpt-4o\",\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}],\"usage\":{\"prompt_tokens\":2,\"completion_tokens\":2}}\n\n",
            "data: [DONE]\n\n",
        );

        return Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "text/event-stream")
            .body(Body::from(sse_body))
            .unwrap();
    }

    Json(json!({
        "id": "cmpl_1",
        "object": "chat.completion",
        "model": "gpt-4o",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": "hi"},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 3, "completion_tokens": 1}
    }))
    .into_response()
}

async fn mock_gemini(Path(rest): Path<String>, RawQuery(query): RawQuery) -> Response {
    assert!(rest.contains("generateContent"), "unexpected path: {rest}");
    let query = query.unwrap_or_default();
    if !query.contains("key=") {
        return (StatusCode::UNAUTHORIZED, "missing key").into_response();
    }

    Json(json!({
        "responseId": "gemini-response-123",
        "modelVersion": "gemini-2.0-flash",
        "candidates": [{
            "index": 0,
            "content": {
                "role": "model",
                "parts": [{
                    "functionCall": {
                        "name": "get_weather",
                        "args": {"location": "San Francisco", "unit": "celsius"}
                    }
                }]
            },
            "finishReason": "STOP"
        }],
        "usageMetadata": {"promptTokenCount": 9, "candidatesTokenCount": 12}
    }))
    .into_response()
}

async fn spawn_mock_upstream() -> String {
    let app = Router::new()
        .route("/chat/completions", post(mock_completions))
        .route("/models/*rest", post(mock_gemini));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}")
}

// ────────────────────────────────────────────────────────────────
// Proxy under test
// ────────────────────────────────────────────────────────────────

fn provider(name: &str, kind: ProviderKind, api_base: &str, prefixes: &[&str]) -> ProviderConfig {
    ProviderConfig {
        name: name.to_string(),
        kind: Some(kind),
        api_base: Some(api_base.to_string()),
        api_key: Some("upstream-test-key".to_string()),
        api_key_env: None,
        model_prefixes: prefixes.iter().map(|p| p.to_string()).collect(),
        supports_streaming: None,
    }
}

async fn spawn_proxy(upstream: &str, test_name: &str) -> String {
    let config = ProxyConfig {
        providers: vec![
            provider("mock-openai", ProviderKind::Openai, upstream, &["gpt-"]),
            provider("mock-gemini", ProviderKind::Gemini, upstream, &["gemini-"]),
        ],
        ..ProxyConfig::default()
    };

    let registry = ProviderRegistry::from_config(&config).unwrap();
    let log_path = std::env::temp_dir().join(format!(
        "cco-test-{}-{}.log",
        std::process::id(),
        test_name
    ));
    let logger = SharedLogger::new(log_path).unwrap();

    let state = Arc::new(AppState {
        config,
        registry,
        client: reqwest::Client::new(),
        logger,
    });

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{addr}")
}

async fn post_messages(
    proxy: &str,
    body: serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    let response = reqwest::Client::new()
        .post(format!("{proxy}/v1/messages"))
        .header("content-type", "application/json")
        .header("x-api-key", CLIENT_KEY)
        .json(&body)
        .send()
        .await
        .unwrap();

    let status = StatusCode::from_u16(response.status().as_u16()).unwrap();
    let body: serde_json::Value = response.json().await.unwrap();
    (status, body)
}

// ────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_non_streaming_roundtrip() {
    let upstream = spawn_mock_upstream().await;
    let proxy = spawn_proxy(&upstream, "non-streaming").await;

    let (status, body) = post_messages(
        &proxy,
        json!({
            "model": "gpt-4o",
            "max_tokens": 50,
            "messages": [{"role": "user", "content": "Say hi"}]
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "id": "cmpl_1",
            "type": "message",
            "role": "assistant",
            "model": "gpt-4o",
            "content": [{"type": "text", "text": "hi"}],
            "stop_reason": "end_turn",
            "stop_sequence": null,
            "usage": {"input_tokens": 3, "output_tokens": 1}
        })
    );
}

#[tokio::test]
async fn test_streaming_roundtrip() {
    let upstream = spawn_mock_upstream().await;
    let proxy = spawn_proxy(&upstream, "streaming").await;

    let response = reqwest::Client::new()
        .post(format!("{proxy}/v1/messages"))
        .header("content-type", "application/json")
        .header("x-api-key", CLIENT_KEY)
        .json(&json!({
            "model": "gpt-4o",
            "max_tokens": 50,
            "stream": true,
            "messages": [{"role": "user", "content": "Say hi"}]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 200);
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(content_type.contains("text/event-stream"), "{content_type}");

    let text = response.text().await.unwrap();

    // The canonical event sequence, in order
    let order = [
        "event: message_start",
        "event: content_block_start",
        "event: content_block_delta",
        "event: content_block_stop",
        "event: message_delta",
        "event: message_stop",
    ];
    let mut cursor = 0;
    for marker in order {
        let found = text[cursor..]
            .find(marker)
            .unwrap_or_else(|| panic!("missing {marker} after byte {cursor} in:\n{text}"));
        cursor += found;
    }

    assert!(text.contains("\"text\":\"A\""));
    assert!(text.contains("\"text\":\"B\""));
    assert!(text.contains("\"stop_reason\":\"end_turn\""));
    assert!(text.contains("\"output_tokens\":2"));
}

#[tokio::test]
async fn test_gemini_tool_call_roundtrip() {
    let upstream = spawn_mock_upstream().await;
    let proxy = spawn_proxy(&upstream, "gemini").await;

    let (status, body) = post_messages(
        &proxy,
        json!({
            "model": "gemini-2.0-flash",
            "max_tokens": 100,
            "messages": [{"role": "user", "content": "weather in SF?"}],
            "tools": [{
                "name": "get_weather",
                "description": "Get current weather",
                "input_schema": {"type": "object"}
            }]
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["type"], "message");
    assert_eq!(body["model"], "gemini-2.0-flash");
    assert_eq!(body["stop_reason"], "end_turn");

    let block = &body["content"][0];
    assert_eq!(block["type"], "tool_use");
    assert!(block["id"].as_str().unwrap().starts_with("toolu_"));
    assert_eq!(block["name"], "get_weather");
    assert_eq!(
        block["input"],
        json!({"location": "San Francisco", "unit": "celsius"})
    );

    assert_eq!(body["usage"]["input_tokens"], 9);
    assert_eq!(body["usage"]["output_tokens"], 12);
}

#[tokio::test]
async fn test_upstream_error_becomes_envelope() {
    let upstream = spawn_mock_upstream().await;
    let proxy = spawn_proxy(&upstream, "error").await;

    let (status, body) = post_messages(
        &proxy,
        json!({
            "model": "gpt-reject",
            "max_tokens": 10,
            "messages": [{"role": "user", "content": "hi"}]
        }),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        body,
        json!({
            "type": "error",
            "error": {"type": "authentication_error", "message": "bad key"}
        })
    );
}

#[tokio::test]
async fn test_unknown_model_is_not_found() {
    let upstream = spawn_mock_upstream().await;
    let proxy = spawn_proxy(&upstream, "unknown-model").await;

    let (status, body) = post_messages(
        &proxy,
        json!({
            "model": "mistral-large",
            "max_tokens": 10,
            "messages": [{"role": "user", "content": "hi"}]
        }),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["type"], "error");
    assert_eq!(body["error"]["type"], "not_found_error");
}

#[tokio::test]
async fn test_malformed_body_is_invalid_request() {
    let upstream = spawn_mock_upstream().await;
    let proxy = spawn_proxy(&upstream, "malformed").await;

    let response = reqwest::Client::new()
        .post(format!("{proxy}/v1/messages"))
        .header("content-type", "application/json")
        .header("x-api-key", CLIENT_KEY)
        .body("{not json")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 400);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["error"]["type"], "invalid_request_error");
}

#[tokio::test]
async fn test_health_and_models_endpoints() {
    let upstream = spawn_mock_upstream().await;
    let proxy = spawn_proxy(&upstream, "health").await;
    let client = reqwest::Client::new();

    let health = client
        .get(format!("{proxy}/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(health.status().as_u16(), 200);
    let health: serde_json::Value = health.json().await.unwrap();
    assert_eq!(health["status"], "ok");

    let models = client
        .get(format!("{proxy}/v1/models"))
        .send()
        .await
        .unwrap();
    let models: serde_json::Value = models.json().await.unwrap();
    let owners: Vec<&str> = models["data"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|m| m["owned_by"].as_str())
        .collect();
    assert!(owners.contains(&"mock-openai"));
    assert!(owners.contains(&"mock-gemini"));
}

#[tokio::test]
async fn test_client_auth_when_enabled() {
    let upstream = spawn_mock_upstream().await;
    let proxy = spawn_proxy(&upstream, "auth").await;

    std::env::set_var("CCO_API_KEY", CLIENT_KEY);

    let response = reqwest::Client::new()
        .post(format!("{proxy}/v1/messages"))
        .header("content-type", "application/json")
        .json(&json!({
            "model": "gpt-4o",
            "max_tokens": 10,
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 401);

    let (status, _) = post_messages(
        &proxy,
        json!({
            "model": "gpt-4o",
            "max_tokens": 10,
            "messages": [{"role": "user", "content": "hi"}]
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    std::env::remove_var("CCO_API_KEY");
}

// ────────────────────────────────────────────────────────────────
// Live tests (need real API keys)
// ────────────────────────────────────────────────────────────────

#[tokio::test]
#[ignore = "requires OPENROUTER_API_KEY"]
async fn test_live_openrouter_roundtrip() {
    let config = ProxyConfig {
        providers: vec![ProviderConfig {
            name: "openrouter".to_string(),
            kind: None,
            api_base: None,
            api_key: None,
            api_key_env: None,
            model_prefixes: vec!["deepseek/".to_string()],
            supports_streaming: None,
        }],
        ..ProxyConfig::default()
    };

    let registry = ProviderRegistry::from_config(&config).unwrap();
    let logger = SharedLogger::new(std::env::temp_dir().join("cco-live-test.log")).unwrap();
    let state = Arc::new(AppState {
        config,
        registry,
        client: reqwest::Client::new(),
        logger,
    });

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let (status, body) = post_messages(
        &format!("http://{addr}"),
        json!({
            "model": "deepseek/deepseek-chat",
            "max_tokens": 30,
            "messages": [{"role": "user", "content": "Say 'pong' and nothing else."}]
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["type"], "message");
    assert_eq!(body["role"], "assistant");
    println!("Live response: {body}");
}

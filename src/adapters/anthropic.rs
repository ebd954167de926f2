//! Pass-through adapter for Anthropic-compatible upstreams.
//!
//! Bodies already speak the canonical format; running them through the
//! pipeline anyway validates the JSON, normalizes the SSE framing, and keeps
//! the error envelope shape consistent with the translated providers.

use super::Adapter;
use crate::error::{ProxyError, Result};
use crate::translate::anthropic_types::{MessagesRequest, StreamEvent};
use crate::translate::streaming::StreamState;

const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicAdapter {
    name: String,
    api_base: String,
}

impl AnthropicAdapter {
    pub fn new(name: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            api_base: api_base.into(),
        }
    }
}

impl Adapter for AnthropicAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn endpoint(&self, _model: &str, _stream: bool, _api_key: &str) -> String {
        format!("{}/v1/messages", self.api_base.trim_end_matches('/'))
    }

    fn auth_headers(&self, api_key: &str) -> Vec<(&'static str, String)> {
        vec![
            ("x-api-key", api_key.to_string()),
            ("anthropic-version", ANTHROPIC_VERSION.to_string()),
        ]
    }

    fn transform_request(&self, body: &[u8]) -> Result<Vec<u8>> {
        // Parse and re-serialize so malformed bodies fail here, before any
        // upstream call, and unknown fields survive via the catch-all.
        let req: MessagesRequest = serde_json::from_slice(body)
            .map_err(|e| ProxyError::translation(format!("Malformed request body: {e}")))?;
        serde_json::to_vec(&req)
            .map_err(|e| ProxyError::translation(format!("Failed to serialize request: {e}")))
    }

    fn transform_response(&self, body: &[u8]) -> Result<Vec<u8>> {
        // Already canonical; require valid JSON so garbage upstream bodies
        // become proper error envelopes at the dispatch layer.
        let value: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| ProxyError::translation(format!("Unparseable provider response: {e}")))?;
        serde_json::to_vec(&value).map_err(|e| ProxyError::translation(e.to_string()))
    }

    fn transform_stream(&self, chunk: &[u8], state: &mut StreamState) -> Result<Vec<StreamEvent>> {
        let event: StreamEvent = serde_json::from_slice(chunk)
            .map_err(|e| ProxyError::translation(format!("Unparseable stream event: {e}")))?;

        // Track enough state for the pump to know whether the stream closed
        // cleanly; the events themselves pass through untouched.
        match &event {
            StreamEvent::MessageStart { message } => {
                state.message_start_sent = true;
                if state.message_id.is_empty() {
                    state.message_id = message.id.clone();
                }
                if state.model.is_empty() {
                    state.model = message.model.clone();
                }
            }
            StreamEvent::MessageStop => {
                state.finish_sent = true;
            }
            _ => {}
        }

        Ok(vec![event])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn adapter() -> AnthropicAdapter {
        AnthropicAdapter::new("anthropic", "https://api.anthropic.com")
    }

    #[test]
    fn test_endpoint_and_auth() {
        let a = adapter();
        assert_eq!(
            a.endpoint("claude-sonnet-4-20250514", false, "sk-ant"),
            "https://api.anthropic.com/v1/messages"
        );
        assert_eq!(
            a.auth_headers("sk-ant"),
            vec![
                ("x-api-key", "sk-ant".to_string()),
                ("anthropic-version", "2023-06-01".to_string()),
            ]
        );
    }

    #[test]
    fn test_response_passthrough_is_identity_on_canonical() {
        let body = serde_json::to_vec(&json!({
            "id": "msg_1",
            "type": "message",
            "role": "assistant",
            "model": "claude-sonnet-4-20250514",
            "content": [{"type": "text", "text": "hi"}],
            "stop_reason": "end_turn",
            "stop_sequence": null,
            "usage": {"input_tokens": 1, "output_tokens": 1}
        }))
        .unwrap();

        let a = adapter();
        let once = a.transform_response(&body).unwrap();
        let twice = a.transform_response(&once).unwrap();

        let v1: serde_json::Value = serde_json::from_slice(&once).unwrap();
        let v2: serde_json::Value = serde_json::from_slice(&twice).unwrap();
        let orig: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(v1, orig);
        assert_eq!(v1, v2);
    }

    #[test]
    fn test_stream_passthrough_tracks_lifecycle() {
        let a = adapter();
        let mut state = StreamState::new();

        let start = serde_json::to_vec(&json!({
            "type": "message_start",
            "message": {
                "id": "msg_1",
                "type": "message",
                "role": "assistant",
                "model": "claude-sonnet-4-20250514",
                "content": [],
                "stop_reason": null,
                "stop_sequence": null,
                "usage": {"input_tokens": 3, "output_tokens": 1}
            }
        }))
        .unwrap();

        let events = a.transform_stream(&start, &mut state).unwrap();
        assert_eq!(events[0].event_name(), "message_start");
        assert!(state.message_start_sent);
        assert_eq!(state.message_id, "msg_1");

        let stop = serde_json::to_vec(&json!({"type": "message_stop"})).unwrap();
        let events = a.transform_stream(&stop, &mut state).unwrap();
        assert_eq!(events[0].event_name(), "message_stop");
        assert!(state.finish_sent);
    }
}

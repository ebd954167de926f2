//! Adapter for the Google Gemini `generateContent` API.
//!
//! Gemini differs from the other upstreams in two ways that shape this
//! adapter: the model name lives in the URL path rather than the body, and
//! the API key travels as a `key` query parameter rather than a header.

use super::Adapter;
use crate::error::{ProxyError, Result};
use crate::translate::anthropic_types::{MessagesRequest, StreamEvent};
use crate::translate::gemini::{anthropic_to_gemini, gemini_error_to_anthropic, gemini_to_anthropic};
use crate::translate::gemini_types::{GeminiErrorResponse, GenerateContentResponse};
use crate::translate::streaming::{gemini_chunk_deltas, StreamState};

pub struct GeminiAdapter {
    name: String,
    api_base: String,
}

impl GeminiAdapter {
    pub fn new(name: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            api_base: api_base.into(),
        }
    }
}

impl Adapter for GeminiAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn endpoint(&self, model: &str, stream: bool, api_key: &str) -> String {
        let base = self.api_base.trim_end_matches('/');
        if stream {
            format!("{base}/models/{model}:streamGenerateContent?alt=sse&key={api_key}")
        } else {
            format!("{base}/models/{model}:generateContent?key={api_key}")
        }
    }

    fn auth_headers(&self, _api_key: &str) -> Vec<(&'static str, String)> {
        // Credential rides in the URL query
        Vec::new()
    }

    fn transform_request(&self, body: &[u8]) -> Result<Vec<u8>> {
        let req: MessagesRequest = serde_json::from_slice(body)
            .map_err(|e| ProxyError::translation(format!("Malformed request body: {e}")))?;

        serde_json::to_vec(&anthropic_to_gemini(&req))
            .map_err(|e| ProxyError::translation(format!("Failed to serialize request: {e}")))
    }

    fn transform_response(&self, body: &[u8]) -> Result<Vec<u8>> {
        let value: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| ProxyError::translation(format!("Unparseable provider response: {e}")))?;

        if value.get("error").is_some() {
            let err: GeminiErrorResponse = serde_json::from_value(value).map_err(|e| {
                ProxyError::translation(format!("Unparseable provider error: {e}"))
            })?;
            let envelope = gemini_error_to_anthropic(&err);
            return serde_json::to_vec(&envelope)
                .map_err(|e| ProxyError::translation(e.to_string()));
        }

        let resp: GenerateContentResponse = serde_json::from_value(value)
            .map_err(|e| ProxyError::translation(format!("Unparseable provider response: {e}")))?;
        serde_json::to_vec(&gemini_to_anthropic(&resp))
            .map_err(|e| ProxyError::translation(e.to_string()))
    }

    fn transform_stream(&self, chunk: &[u8], state: &mut StreamState) -> Result<Vec<StreamEvent>> {
        let value: serde_json::Value = serde_json::from_slice(chunk)
            .map_err(|e| ProxyError::translation(format!("Unparseable stream chunk: {e}")))?;

        // An error payload mid-stream terminates with an error event
        if value.get("error").is_some() {
            let err: GeminiErrorResponse = serde_json::from_value(value).map_err(|e| {
                ProxyError::translation(format!("Unparseable provider error: {e}"))
            })?;
            let envelope = gemini_error_to_anthropic(&err);
            return Ok(vec![StreamEvent::Error {
                error: envelope.error,
            }]);
        }

        let chunk: GenerateContentResponse = serde_json::from_value(value)
            .map_err(|e| ProxyError::translation(format!("Unparseable stream chunk: {e}")))?;

        Ok(state.process(gemini_chunk_deltas(&chunk)))
    }
}

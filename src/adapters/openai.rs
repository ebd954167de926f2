//! Adapter for OpenAI-compatible upstreams.
//!
//! Serves both `api.openai.com` and the compatible aggregators (OpenRouter
//! and friends); the provider name and base URL are the only things that
//! vary between them.

use super::Adapter;
use crate::error::{ProxyError, Result};
use crate::translate::anthropic_types::{MessagesRequest, StreamEvent};
use crate::translate::openai::{anthropic_to_openai, openai_error_to_anthropic, openai_to_anthropic};
use crate::translate::openai_types::{
    ChatCompletionChunk, ChatCompletionResponse, ChatErrorResponse,
};
use crate::translate::streaming::{openai_chunk_deltas, StreamState};

pub struct OpenAiAdapter {
    name: String,
    api_base: String,
}

impl OpenAiAdapter {
    pub fn new(name: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            api_base: api_base.into(),
        }
    }
}

impl Adapter for OpenAiAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn endpoint(&self, _model: &str, _stream: bool, _api_key: &str) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }

    fn auth_headers(&self, api_key: &str) -> Vec<(&'static str, String)> {
        vec![("Authorization", format!("Bearer {api_key}"))]
    }

    fn transform_request(&self, body: &[u8]) -> Result<Vec<u8>> {
        let req: MessagesRequest = serde_json::from_slice(body)
            .map_err(|e| ProxyError::translation(format!("Malformed request body: {e}")))?;

        let openai_req = anthropic_to_openai(&req);
        serde_json::to_vec(&openai_req)
            .map_err(|e| ProxyError::translation(format!("Failed to serialize request: {e}")))
    }

    fn transform_response(&self, body: &[u8]) -> Result<Vec<u8>> {
        let value: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| ProxyError::translation(format!("Unparseable provider response: {e}")))?;

        if value.get("error").is_some() {
            let err: ChatErrorResponse = serde_json::from_value(value).map_err(|e| {
                ProxyError::translation(format!("Unparseable provider error: {e}"))
            })?;
            let envelope = openai_error_to_anthropic(&err);
            return serde_json::to_vec(&envelope)
                .map_err(|e| ProxyError::translation(e.to_string()));
        }

        let resp: ChatCompletionResponse = serde_json::from_value(value)
            .map_err(|e| ProxyError::translation(format!("Unparseable provider response: {e}")))?;
        serde_json::to_vec(&openai_to_anthropic(&resp))
            .map_err(|e| ProxyError::translation(e.to_string()))
    }

    fn transform_stream(&self, chunk: &[u8], state: &mut StreamState) -> Result<Vec<StreamEvent>> {
        let chunk: ChatCompletionChunk = serde_json::from_slice(chunk)
            .map_err(|e| ProxyError::translation(format!("Unparseable stream chunk: {e}")))?;

        Ok(state.process(openai_chunk_deltas(&chunk)))
    }
}

//! Per-provider format adapters.
//!
//! An [`Adapter`] owns both directions of a provider's translation plus the
//! incremental streaming translator. Adapters are immutable after
//! construction and shared across request tasks; all per-connection state
//! lives in the [`StreamState`] owned by each request's pump.

use reqwest::header::HeaderMap;

use crate::error::Result;
use crate::translate::anthropic_types::StreamEvent;
use crate::translate::streaming::StreamState;

mod anthropic;
mod gemini;
mod openai;

pub use anthropic::AnthropicAdapter;
pub use gemini::GeminiAdapter;
pub use openai::OpenAiAdapter;

pub trait Adapter: Send + Sync {
    fn name(&self) -> &str;

    fn supports_streaming(&self) -> bool {
        true
    }

    /// Full upstream URL for a request. Gemini encodes the model in the path
    /// and carries its credential as a query parameter, so both are inputs.
    fn endpoint(&self, model: &str, stream: bool, api_key: &str) -> String;

    /// Headers that carry the credential (empty for providers that put it in
    /// the URL).
    fn auth_headers(&self, api_key: &str) -> Vec<(&'static str, String)>;

    /// Whether the upstream response is a stream, judged from its headers.
    fn is_streaming(&self, headers: &HeaderMap) -> bool {
        headers_indicate_streaming(headers)
    }

    /// Rewrite a canonical request body into the provider's format.
    fn transform_request(&self, body: &[u8]) -> Result<Vec<u8>>;

    /// Rewrite a provider response body (success or error shaped) into the
    /// canonical format.
    fn transform_response(&self, body: &[u8]) -> Result<Vec<u8>>;

    /// Translate one upstream stream chunk, mutating the connection state
    /// and returning zero or more canonical events.
    fn transform_stream(&self, chunk: &[u8], state: &mut StreamState) -> Result<Vec<StreamEvent>>;
}

/// `Content-Type` containing `text/event-stream` (or any `stream` marker),
/// or `Transfer-Encoding: chunked`.
pub fn headers_indicate_streaming(headers: &HeaderMap) -> bool {
    let content_type_streams = headers
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.contains("text/event-stream") || ct.contains("stream"))
        .unwrap_or(false);

    if content_type_streams {
        return true;
    }

    headers
        .get(reqwest::header::TRANSFER_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|te| te.contains("chunked"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderValue, CONTENT_TYPE, TRANSFER_ENCODING};

    #[test]
    fn test_headers_indicate_streaming() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
        assert!(headers_indicate_streaming(&headers));

        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/stream+json"),
        );
        assert!(headers_indicate_streaming(&headers));

        let mut headers = HeaderMap::new();
        headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        assert!(headers_indicate_streaming(&headers));

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        assert!(!headers_indicate_streaming(&headers));

        assert!(!headers_indicate_streaming(&HeaderMap::new()));
    }
}

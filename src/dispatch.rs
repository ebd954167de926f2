//! Dispatcher and streaming pump.
//!
//! The dispatcher routes a canonical request to a provider by model prefix,
//! injects credentials, rewrites the body through the provider's adapter,
//! and issues the upstream call. Streaming responses are handed to the pump,
//! which frames upstream chunks (SSE `data:` lines or raw JSON objects),
//! feeds them through the adapter's stream translator, and emits canonical
//! SSE frames. Upstream errors are never retried here; they surface to the
//! client as canonical error envelopes.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::Stream;
use futures::StreamExt;
use serde::Deserialize;

use crate::adapters::Adapter;
use crate::error::{error_type_for_status, ProxyError};
use crate::logging::SharedLogger;
use crate::registry::ProviderRegistry;
use crate::translate::anthropic_types::{ErrorResponse, StreamEvent};
use crate::translate::streaming::StreamState;

/// The routing view of an incoming request: just enough to pick a provider.
#[derive(Debug, Deserialize)]
pub struct RouteInfo {
    pub model: String,
    #[serde(default)]
    pub stream: bool,
}

/// A single SSE frame ready for emission to the client.
#[derive(Debug, Clone)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

/// Stream of SSE frames for a streaming response.
pub type SseStream =
    Pin<Box<dyn Stream<Item = std::result::Result<SseFrame, std::io::Error>> + Send>>;

/// Outcome of dispatching one request.
pub enum DispatchResult {
    /// Buffered canonical JSON body plus the HTTP status to surface.
    Json { status: u16, body: Vec<u8> },
    /// Canonical SSE stream.
    Stream(SseStream),
}

impl DispatchResult {
    fn envelope(status: u16, envelope: &ErrorResponse) -> Self {
        Self::Json {
            status,
            body: serde_json::to_vec(envelope).unwrap_or_default(),
        }
    }
}

/// Route, translate, and forward one canonical request.
///
/// Never fails outright: every error path produces a canonical error
/// envelope with an appropriate HTTP status.
pub async fn dispatch(
    registry: &ProviderRegistry,
    client: &reqwest::Client,
    logger: &SharedLogger,
    idle_read_timeout: Duration,
    body: Bytes,
) -> DispatchResult {
    let route: RouteInfo = match serde_json::from_slice(&body) {
        Ok(route) => route,
        Err(e) => {
            return DispatchResult::envelope(
                400,
                &ErrorResponse::invalid_request(format!("Invalid request body: {e}")),
            );
        }
    };

    let entry = match registry.lookup(&route.model) {
        Some(entry) => entry,
        None => {
            // no_provider surfaces as not_found_error on the wire
            let err = ProxyError::NoProvider {
                model: route.model.clone(),
            };
            logger.warn("dispatch", err.to_string());
            return DispatchResult::envelope(404, &ErrorResponse::not_found(err.to_string()));
        }
    };

    if route.stream && !(entry.descriptor.supports_streaming && entry.adapter.supports_streaming())
    {
        return DispatchResult::envelope(
            400,
            &ErrorResponse::invalid_request(format!(
                "Provider '{}' does not support streaming",
                entry.descriptor.name
            )),
        );
    }

    let api_key = match entry.descriptor.resolve_api_key() {
        Ok(key) => key,
        Err(e) => {
            return DispatchResult::envelope(401, &ErrorResponse::authentication(e.to_string()));
        }
    };

    let upstream_body = match entry.adapter.transform_request(&body) {
        Ok(bytes) => bytes,
        Err(e) => {
            logger.warn("dispatch", format!("Request translation failed: {e}"));
            return DispatchResult::envelope(400, &ErrorResponse::invalid_request(e.to_string()));
        }
    };

    let url = entry.adapter.endpoint(&route.model, route.stream, &api_key);
    logger.info(
        "dispatch",
        format!(
            "POST {} provider={} model={} stream={}",
            redact_query_key(&url),
            entry.descriptor.name,
            route.model,
            route.stream
        ),
    );

    let mut request = client
        .post(&url)
        .header("Content-Type", "application/json");
    for (name, value) in entry.adapter.auth_headers(&api_key) {
        request = request.header(name, value);
    }
    if route.stream {
        request = request.header("Accept", "text/event-stream");
    }

    let response = match request.body(upstream_body).send().await {
        Ok(response) => response,
        Err(e) => {
            logger.error("dispatch", format!("Upstream request failed: {e}"));
            return DispatchResult::envelope(
                502,
                &ErrorResponse::api_error(format!("Upstream request failed: {e}")),
            );
        }
    };

    let status = response.status().as_u16();

    if status >= 400 {
        let error_body = response.bytes().await.unwrap_or_default();
        logger.warn(
            "dispatch",
            format!(
                "Upstream error provider={} status={}",
                entry.descriptor.name, status
            ),
        );

        // Provider-shaped error bodies become canonical envelopes; anything
        // unrecognizable gets an envelope derived from the status alone.
        return match entry.adapter.transform_response(&error_body) {
            Ok(translated) => DispatchResult::Json {
                status,
                body: translated,
            },
            Err(_) => DispatchResult::envelope(
                status,
                &ErrorResponse::new(
                    error_type_for_status(status),
                    format!(
                        "Provider returned status {}: {}",
                        status,
                        truncate(&String::from_utf8_lossy(&error_body), 500)
                    ),
                ),
            ),
        };
    }

    if entry.adapter.is_streaming(response.headers()) {
        let stream = pump(
            response,
            Arc::clone(&entry.adapter),
            logger.clone(),
            idle_read_timeout,
        );
        return DispatchResult::Stream(Box::pin(stream));
    }

    let resp_body = match response.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            return DispatchResult::envelope(
                502,
                &ErrorResponse::api_error(format!("Failed to read upstream response: {e}")),
            );
        }
    };

    match entry.adapter.transform_response(&resp_body) {
        Ok(translated) => DispatchResult::Json {
            status,
            body: translated,
        },
        Err(e) => {
            logger.error("dispatch", format!("Response translation failed: {e}"));
            DispatchResult::envelope(
                502,
                &ErrorResponse::api_error(format!(
                    "Failed to translate upstream response: {e}"
                )),
            )
        }
    }
}

/// Drive one upstream streaming response to completion.
///
/// Reads upstream bytes, frames them into JSON chunks, runs each through the
/// adapter's stream translator, and emits the resulting canonical frames.
/// Terminates on upstream EOF, the `[DONE]` sentinel, read errors, idle
/// timeout, or a terminal in-stream error event. On clean termination any
/// unfinished stream is closed out with best-effort terminal events.
fn pump(
    response: reqwest::Response,
    adapter: Arc<dyn Adapter>,
    logger: SharedLogger,
    idle_read_timeout: Duration,
) -> impl Stream<Item = std::result::Result<SseFrame, std::io::Error>> + Send + 'static {
    async_stream::stream! {
        let mut state = StreamState::new();
        let mut framer = ChunkFramer::new();
        let byte_stream = response.bytes_stream();
        tokio::pin!(byte_stream);

        'read: loop {
            let chunk = match tokio::time::timeout(idle_read_timeout, byte_stream.next()).await {
                Err(_) => {
                    logger.warn("pump", "Idle timeout waiting for upstream data");
                    if !state.message_start_sent {
                        let envelope =
                            ErrorResponse::api_error("Timed out waiting for upstream data");
                        yield Ok(error_frame(envelope));
                        return;
                    }
                    break 'read;
                }
                Ok(None) => break 'read,
                Ok(Some(Err(e))) => {
                    logger.error("pump", format!("Upstream read error: {e}"));
                    yield Ok(error_frame(ErrorResponse::api_error(format!(
                        "Upstream read error: {e}"
                    ))));
                    return;
                }
                Ok(Some(Ok(bytes))) => bytes,
            };

            for framed in framer.push(&chunk) {
                let payload = match framed {
                    FramedChunk::Done => break 'read,
                    FramedChunk::Payload(payload) => payload,
                };

                match adapter.transform_stream(payload.as_bytes(), &mut state) {
                    Ok(events) => {
                        for event in events {
                            let fatal = matches!(event, StreamEvent::Error { .. });
                            yield Ok(frame_for(&event));
                            if fatal {
                                logger.warn("pump", "Terminal error event from upstream");
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        // A chunk that cannot be translated is skipped; the
                        // stream itself stays healthy.
                        logger.debug("pump", format!("Skipping untranslatable chunk: {e}"));
                    }
                }
            }
        }

        for event in state.finalize() {
            yield Ok(frame_for(&event));
        }

        logger.info("pump", "Stream completed");
    }
}

fn frame_for(event: &StreamEvent) -> SseFrame {
    SseFrame {
        event: event.event_name().to_string(),
        data: serde_json::to_string(event).unwrap_or_default(),
    }
}

fn error_frame(envelope: ErrorResponse) -> SseFrame {
    frame_for(&StreamEvent::Error {
        error: envelope.error,
    })
}

/// Mask credential-bearing query values before a URL reaches the logs.
fn redact_query_key(url: &str) -> String {
    match url.split_once("key=") {
        Some((head, tail)) => {
            let rest = tail.split_once('&').map(|(_, r)| format!("&{r}"));
            format!("{head}key=***{}", rest.unwrap_or_default())
        }
        None => url.to_string(),
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// ---------------------------------------------------------------------------
// Upstream chunk framing
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq)]
enum Framing {
    Unknown,
    Sse,
    Json,
}

#[derive(Debug, PartialEq)]
pub(crate) enum FramedChunk {
    /// One complete JSON payload.
    Payload(String),
    /// The OpenAI-style `[DONE]` sentinel.
    Done,
}

/// Incremental framer for upstream response bodies.
///
/// Handles both framings the upstreams use: SSE `data:` lines (OpenAI,
/// Anthropic, Gemini with `alt=sse`) and raw JSON — a streamed array of
/// objects or newline-delimited objects (Gemini without `alt=sse`). The
/// framing is chosen from the first non-whitespace byte: `[` or `{` means
/// raw JSON, anything else means SSE.
pub(crate) struct ChunkFramer {
    buffer: Vec<u8>,
    framing: Framing,
    // JSON scanning state, persisted across pushes
    scan_pos: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
    object_start: Option<usize>,
}

impl ChunkFramer {
    pub(crate) fn new() -> Self {
        Self {
            buffer: Vec::new(),
            framing: Framing::Unknown,
            scan_pos: 0,
            depth: 0,
            in_string: false,
            escaped: false,
            object_start: None,
        }
    }

    /// Feed upstream bytes, returning every chunk completed by them.
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<FramedChunk> {
        self.buffer.extend_from_slice(bytes);

        if self.framing == Framing::Unknown {
            match self.buffer.iter().find(|b| !b.is_ascii_whitespace()) {
                Some(b'[') | Some(b'{') => self.framing = Framing::Json,
                Some(_) => self.framing = Framing::Sse,
                None => return Vec::new(),
            }
        }

        match self.framing {
            Framing::Sse => self.drain_sse_lines(),
            Framing::Json => self.scan_json_objects(),
            Framing::Unknown => Vec::new(),
        }
    }

    fn drain_sse_lines(&mut self) -> Vec<FramedChunk> {
        let mut chunks = Vec::new();

        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();

            if line.is_empty() {
                continue;
            }

            // Only data lines carry payloads; event names, ids, retry hints,
            // and comments are framing noise.
            let data = if let Some(stripped) = line.strip_prefix("data: ") {
                stripped.trim()
            } else if let Some(stripped) = line.strip_prefix("data:") {
                stripped.trim()
            } else {
                continue;
            };

            if data == "[DONE]" {
                chunks.push(FramedChunk::Done);
                continue;
            }

            chunks.push(FramedChunk::Payload(data.to_string()));
        }

        chunks
    }

    /// Scan for complete top-level JSON objects, ignoring the array
    /// brackets, commas, and whitespace between them. Byte-wise scanning is
    /// UTF-8 safe: every structural character is ASCII and continuation
    /// bytes never collide with them.
    fn scan_json_objects(&mut self) -> Vec<FramedChunk> {
        let mut chunks = Vec::new();

        for i in self.scan_pos..self.buffer.len() {
            let byte = self.buffer[i];

            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if byte == b'\\' {
                    self.escaped = true;
                } else if byte == b'"' {
                    self.in_string = false;
                }
                continue;
            }

            match byte {
                b'"' if self.depth > 0 => self.in_string = true,
                b'{' => {
                    if self.depth == 0 {
                        self.object_start = Some(i);
                    }
                    self.depth += 1;
                }
                b'}' => {
                    if self.depth > 0 {
                        self.depth -= 1;
                        if self.depth == 0 {
                            if let Some(start) = self.object_start.take() {
                                chunks.push(FramedChunk::Payload(
                                    String::from_utf8_lossy(&self.buffer[start..=i]).into_owned(),
                                ));
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        // Drop consumed bytes, keeping any partial object
        let keep_from = self.object_start.unwrap_or(self.buffer.len());
        self.buffer.drain(..keep_from);
        if self.object_start.is_some() {
            self.object_start = Some(0);
        }
        self.scan_pos = self.buffer.len();

        chunks
    }
}

//! API translation between the Anthropic Messages format and the upstream
//! provider formats.
//!
//! The core of the proxy: converts requests, responses, and streaming events
//! between formats. All translation functions are pure (no I/O); streaming
//! translation threads its per-connection state through explicitly.

pub mod anthropic_types;
pub mod common;
pub mod gemini;
pub mod gemini_types;
pub mod openai;
pub mod openai_types;
pub mod streaming;

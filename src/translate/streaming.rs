//! State machine for translating upstream streaming chunks into Anthropic
//! SSE events.
//!
//! Each provider decodes its chunk into a normalized [`DeltaSet`]; the
//! provider-agnostic [`StreamState::process`] applies it, tracking which
//! content blocks are open and emitting the corresponding Anthropic stream
//! events (`message_start`, `content_block_delta`, ...). One `StreamState`
//! exists per upstream connection and is owned exclusively by that
//! connection's pump task.

use std::collections::BTreeMap;

use super::anthropic_types::{
    Delta, DeltaUsage, MessageDeltaBody, MessagesResponse, ResponseContentBlock, StreamEvent, Usage,
};
use super::common::{
    arguments_delta, map_gemini_finish_reason, map_openai_finish_reason, to_anthropic_tool_id,
};
use super::gemini_types::GenerateContentResponse;
use super::openai_types::ChatCompletionChunk;

/// Kind of content block being streamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Text,
    ToolUse,
    Thinking,
}

/// Tracks one content block across the life of a stream.
#[derive(Debug, Clone)]
pub struct ContentBlockState {
    pub kind: BlockKind,
    pub start_sent: bool,
    pub stop_sent: bool,
    /// Upstream tool-call ID, as received (converted on emission).
    pub tool_call_id: String,
    /// Upstream tool-call ordinal, used to match later fragments.
    pub tool_call_index: Option<usize>,
    pub tool_name: String,
    /// Accumulated JSON argument string for tool blocks.
    pub arguments: String,
}

impl ContentBlockState {
    fn new(kind: BlockKind) -> Self {
        Self {
            kind,
            start_sent: false,
            stop_sent: false,
            tool_call_id: String::new(),
            tool_call_index: None,
            tool_name: String::new(),
            arguments: String::new(),
        }
    }

    fn is_open(&self) -> bool {
        self.start_sent && !self.stop_sent
    }
}

/// A normalized view of one upstream chunk, provider differences erased.
#[derive(Debug, Default)]
pub struct DeltaSet {
    pub message_id: Option<String>,
    pub model: Option<String>,
    pub text: Option<String>,
    pub thinking: Option<String>,
    pub tool_calls: Vec<ToolCallDelta>,
    /// Canonical stop_reason, already mapped by the decoder.
    pub finish_reason: Option<String>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub cache_read_input_tokens: Option<u64>,
}

#[derive(Debug, Default)]
pub struct ToolCallDelta {
    pub index: Option<usize>,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

/// Per-connection streaming state.
#[derive(Debug, Default)]
pub struct StreamState {
    pub message_id: String,
    pub model: String,
    pub message_start_sent: bool,
    pub content_blocks: BTreeMap<usize, ContentBlockState>,
    pub current_block_index: usize,
    pub finish_sent: bool,
    input_tokens: u64,
    output_tokens: u64,
    cache_read_input_tokens: Option<u64>,
}

impl StreamState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one normalized chunk, returning the Anthropic events it
    /// produces. Chunks after the terminal one produce nothing.
    pub fn process(&mut self, deltas: DeltaSet) -> Vec<StreamEvent> {
        if self.finish_sent {
            return Vec::new();
        }

        let mut events = Vec::new();

        if self.message_id.is_empty() {
            if let Some(id) = deltas.message_id {
                self.message_id = id;
            }
        }
        if self.model.is_empty() {
            if let Some(model) = deltas.model {
                self.model = model;
            }
        }
        if let Some(tokens) = deltas.input_tokens {
            self.input_tokens = tokens;
        }
        if let Some(tokens) = deltas.output_tokens {
            // output token counts are monotonic non-decreasing
            self.output_tokens = self.output_tokens.max(tokens);
        }
        if let Some(tokens) = deltas.cache_read_input_tokens {
            self.cache_read_input_tokens = Some(tokens);
        }

        if !self.message_start_sent {
            if self.message_id.is_empty() {
                self.message_id = format!("msg_{}", uuid::Uuid::new_v4().simple());
            }
            events.push(self.message_start_event());
            self.message_start_sent = true;
        }

        // A chunk carrying both text and tool calls counts the tool calls
        // only; emitting both would duplicate content.
        let text = if deltas.tool_calls.is_empty() {
            deltas.text
        } else {
            None
        };

        if let Some(thinking) = deltas.thinking.filter(|s| !s.is_empty()) {
            let index = self.ensure_block(BlockKind::Thinking, &mut events);
            events.push(StreamEvent::ContentBlockDelta {
                index,
                delta: Delta::ThinkingDelta { thinking },
            });
        }

        if let Some(text) = text.filter(|s| !s.is_empty()) {
            let index = self.ensure_block(BlockKind::Text, &mut events);
            events.push(StreamEvent::ContentBlockDelta {
                index,
                delta: Delta::TextDelta { text },
            });
        }

        for tool_call in deltas.tool_calls {
            self.handle_tool_call(tool_call, &mut events);
        }

        if let Some(reason) = deltas.finish_reason {
            events.append(&mut self.finish_events(&reason));
        }

        events
    }

    /// Close out the stream at upstream EOF. A stream that already finished
    /// produces nothing; one that never started still produces a complete,
    /// well-formed event sequence.
    pub fn finalize(&mut self) -> Vec<StreamEvent> {
        if self.finish_sent {
            return Vec::new();
        }

        let mut events = Vec::new();

        if !self.message_start_sent {
            if self.message_id.is_empty() {
                self.message_id = format!("msg_{}", uuid::Uuid::new_v4().simple());
            }
            events.push(self.message_start_event());
            self.message_start_sent = true;
        }

        events.append(&mut self.finish_events("end_turn"));
        events
    }

    fn message_start_event(&self) -> StreamEvent {
        StreamEvent::MessageStart {
            message: MessagesResponse {
                id: self.message_id.clone(),
                response_type: "message".to_string(),
                role: "assistant".to_string(),
                content: Vec::new(),
                model: self.model.clone(),
                stop_reason: None,
                stop_sequence: None,
                usage: Usage {
                    input_tokens: self.input_tokens,
                    output_tokens: 1,
                    cache_read_input_tokens: self.cache_read_input_tokens,
                    ..Usage::default()
                },
                annotations: None,
            },
        }
    }

    /// Find the open block of the given kind, or allocate the next index and
    /// start a new one. Starting a text or thinking block closes whatever
    /// was open first.
    fn ensure_block(&mut self, kind: BlockKind, events: &mut Vec<StreamEvent>) -> usize {
        if let Some((&index, _)) = self
            .content_blocks
            .iter()
            .find(|(_, b)| b.kind == kind && b.is_open())
        {
            return index;
        }

        self.close_open_blocks(events);

        let index = self.current_block_index;
        self.current_block_index += 1;

        let mut block = ContentBlockState::new(kind);
        block.start_sent = true;

        let content_block = match kind {
            BlockKind::Text => ResponseContentBlock::Text {
                text: String::new(),
            },
            BlockKind::Thinking => ResponseContentBlock::Thinking {
                thinking: String::new(),
            },
            BlockKind::ToolUse => unreachable!("tool blocks start via handle_tool_call"),
        };

        events.push(StreamEvent::ContentBlockStart {
            index,
            content_block,
        });
        self.content_blocks.insert(index, block);
        index
    }

    fn close_open_blocks(&mut self, events: &mut Vec<StreamEvent>) {
        for (&index, block) in self.content_blocks.iter_mut() {
            if block.is_open() {
                events.push(StreamEvent::ContentBlockStop { index });
                block.stop_sent = true;
            }
        }
    }

    fn close_open_non_tool_blocks(&mut self, events: &mut Vec<StreamEvent>) {
        for (&index, block) in self.content_blocks.iter_mut() {
            if block.kind != BlockKind::ToolUse && block.is_open() {
                events.push(StreamEvent::ContentBlockStop { index });
                block.stop_sent = true;
            }
        }
    }

    fn handle_tool_call(&mut self, delta: ToolCallDelta, events: &mut Vec<StreamEvent>) {
        let index = match self.find_or_create_tool_block(&delta) {
            Some(index) => index,
            None => return,
        };

        if let Some(name) = delta.name.filter(|n| !n.is_empty()) {
            if let Some(block) = self.content_blocks.get_mut(&index) {
                block.tool_name = name;
            }
        }

        let start_ready = self
            .content_blocks
            .get(&index)
            .is_some_and(|b| !b.start_sent && !b.tool_call_id.is_empty() && !b.tool_name.is_empty());

        if start_ready {
            // Close a text or thinking block the tool call follows, but never
            // a sibling tool block: providers stream parallel tool calls
            // interleaved, and each block must stay open for its remaining
            // argument fragments until the terminal chunk.
            self.close_open_non_tool_blocks(events);
            if let Some(block) = self.content_blocks.get_mut(&index) {
                events.push(StreamEvent::ContentBlockStart {
                    index,
                    content_block: ResponseContentBlock::ToolUse {
                        id: to_anthropic_tool_id(&block.tool_call_id),
                        name: block.tool_name.clone(),
                        input: serde_json::Value::Object(serde_json::Map::new()),
                    },
                });
                block.start_sent = true;

                // Fragments that arrived before the name was known were only
                // accumulated; flush them now that the block is on the wire.
                if !block.arguments.is_empty() {
                    events.push(StreamEvent::ContentBlockDelta {
                        index,
                        delta: Delta::InputJsonDelta {
                            partial_json: block.arguments.clone(),
                        },
                    });
                }
            }
        }

        if let Some(new_args) = delta.arguments.as_deref() {
            if let Some(block) = self.content_blocks.get_mut(&index) {
                if let Some(fragment) = arguments_delta(new_args, &block.arguments) {
                    block.arguments.push_str(&fragment);
                    if block.is_open() {
                        events.push(StreamEvent::ContentBlockDelta {
                            index,
                            delta: Delta::InputJsonDelta {
                                partial_json: fragment,
                            },
                        });
                    }
                }
            }
        }
    }

    /// Locate the block for a tool-call fragment: by upstream ordinal first,
    /// then by ID. A fragment carrying an ID that matches nothing opens a new
    /// block; anything else is dropped.
    fn find_or_create_tool_block(&mut self, delta: &ToolCallDelta) -> Option<usize> {
        if let Some(tc_index) = delta.index {
            if let Some((&index, _)) = self.content_blocks.iter().find(|(_, b)| {
                b.kind == BlockKind::ToolUse && b.tool_call_index == Some(tc_index) && !b.stop_sent
            }) {
                return Some(index);
            }
        }

        if let Some(ref id) = delta.id {
            if let Some((&index, _)) = self
                .content_blocks
                .iter()
                .find(|(_, b)| b.kind == BlockKind::ToolUse && &b.tool_call_id == id && !b.stop_sent)
            {
                return Some(index);
            }
        }

        let id = delta.id.clone().filter(|id| !id.is_empty())?;

        let index = self.current_block_index;
        self.current_block_index += 1;

        let mut block = ContentBlockState::new(BlockKind::ToolUse);
        block.tool_call_id = id;
        block.tool_call_index = delta.index;
        block.tool_name = delta.name.clone().unwrap_or_default();
        self.content_blocks.insert(index, block);

        Some(index)
    }

    fn finish_events(&mut self, stop_reason: &str) -> Vec<StreamEvent> {
        if self.finish_sent {
            return Vec::new();
        }
        self.finish_sent = true;

        let mut events = Vec::new();
        self.close_open_blocks(&mut events);

        events.push(StreamEvent::MessageDelta {
            delta: MessageDeltaBody {
                stop_reason: Some(stop_reason.to_string()),
                stop_sequence: None,
            },
            usage: DeltaUsage {
                output_tokens: self.output_tokens,
            },
        });
        events.push(StreamEvent::MessageStop);

        events
    }
}

// ---------------------------------------------------------------------------
// Per-provider chunk decoders
// ---------------------------------------------------------------------------

/// Decode an OpenAI streaming chunk into a normalized delta set.
pub fn openai_chunk_deltas(chunk: &ChatCompletionChunk) -> DeltaSet {
    let mut deltas = DeltaSet {
        message_id: Some(chunk.id.clone()).filter(|s| !s.is_empty()),
        model: Some(chunk.model.clone()).filter(|s| !s.is_empty()),
        ..DeltaSet::default()
    };

    if let Some(ref usage) = chunk.usage {
        deltas.input_tokens = Some(usage.prompt_tokens);
        deltas.output_tokens = Some(usage.completion_tokens);
        deltas.cache_read_input_tokens =
            usage.prompt_tokens_details.as_ref().map(|d| d.cached_tokens);
    }

    if let Some(choice) = chunk.choices.first() {
        deltas.text = choice.delta.content.clone();
        deltas.thinking = choice.delta.reasoning_content.clone();

        if let Some(ref tool_calls) = choice.delta.tool_calls {
            for tc in tool_calls {
                deltas.tool_calls.push(ToolCallDelta {
                    index: tc.index.map(|i| i as usize),
                    id: tc.id.clone(),
                    name: tc.function.as_ref().and_then(|f| f.name.clone()),
                    arguments: tc.function.as_ref().and_then(|f| f.arguments.clone()),
                });
            }
        }

        if let Some(ref reason) = choice.finish_reason {
            deltas.finish_reason = Some(map_openai_finish_reason(reason).to_string());
        }
    }

    deltas
}

/// Decode a Gemini streaming chunk into a normalized delta set.
///
/// Gemini does not assign tool-call IDs and sends complete argument objects,
/// so each function-call part gets a freshly minted ID (used only when the
/// part opens a new block) and its arguments serialized whole. The tool-call
/// ordinal is the part's position within the candidate's `parts`.
pub fn gemini_chunk_deltas(chunk: &GenerateContentResponse) -> DeltaSet {
    let mut deltas = DeltaSet {
        message_id: chunk.response_id.clone(),
        model: chunk.model_version.clone(),
        ..DeltaSet::default()
    };

    if let Some(ref usage) = chunk.usage_metadata {
        deltas.input_tokens = Some(usage.prompt_token_count);
        deltas.output_tokens = Some(usage.candidates_token_count);
    }

    if let Some(candidate) = chunk.candidates.first() {
        if let Some(ref content) = candidate.content {
            let mut text = String::new();
            for (part_index, part) in content.parts.iter().enumerate() {
                if let Some(ref t) = part.text {
                    text.push_str(t);
                }
                if let Some(ref call) = part.function_call {
                    deltas.tool_calls.push(ToolCallDelta {
                        index: Some(part_index),
                        id: Some(super::common::fresh_tool_id()),
                        name: Some(call.name.clone()),
                        arguments: serde_json::to_string(&call.args).ok(),
                    });
                }
            }
            if !text.is_empty() {
                deltas.text = Some(text);
            }
        }

        if let Some(ref reason) = candidate.finish_reason {
            deltas.finish_reason = Some(map_gemini_finish_reason(reason).to_string());
        }
    }

    deltas
}

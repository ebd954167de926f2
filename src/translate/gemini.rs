//! Translate between the Anthropic Messages format and the Gemini
//! `generateContent` API, in both directions.
//!
//! Gemini takes the model name in the URL path, so the request body carries
//! no `model` field. Tool results become `functionResponse` parts whose name
//! is recovered from the matching `tool_use` block earlier in the
//! conversation. All functions here are pure (no I/O).

use std::collections::HashMap;

use serde_json::{json, Value};

use super::anthropic_types::{
    ContentBlock, ErrorResponse, MessagesRequest, MessagesResponse, ResponseContentBlock, Role,
    ToolResultContent, Usage,
};
use super::common::{fresh_tool_id, map_gemini_error_status, map_gemini_finish_reason};
use super::gemini_types::{
    Content, FunctionCall, FunctionDeclaration, FunctionResponse, GeminiErrorResponse, GeminiTool,
    GenerateContentRequest, GenerateContentResponse, GenerationConfig, Part,
};

/// Translate an Anthropic Messages request into a Gemini generateContent
/// request. The model name is intentionally absent from the result; the
/// adapter encodes it in the URL path.
pub fn anthropic_to_gemini(req: &MessagesRequest) -> GenerateContentRequest {
    // tool_use id -> tool name, so functionResponse parts can carry the name
    let mut tool_names: HashMap<String, String> = HashMap::new();
    for msg in &req.messages {
        for block in msg.content.blocks() {
            if let ContentBlock::ToolUse { id, name, .. } = block {
                tool_names.insert(id, name);
            }
        }
    }

    let system_instruction = req
        .system
        .as_ref()
        .map(|s| s.as_text())
        .filter(|t| !t.is_empty())
        .map(|text| Content {
            role: None,
            parts: vec![Part::text(text)],
        });

    let contents = req
        .messages
        .iter()
        .map(|msg| {
            let role = match msg.role {
                Role::User => "user",
                Role::Assistant => "model",
            };
            Content {
                role: Some(role.to_string()),
                parts: translate_blocks(&msg.content.blocks(), &tool_names),
            }
        })
        .collect();

    let tools = req.tools.as_ref().map(|tools| {
        vec![GeminiTool {
            function_declarations: tools
                .iter()
                .map(|t| FunctionDeclaration {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.input_schema.clone(),
                })
                .collect(),
        }]
    });

    let generation_config = GenerationConfig {
        max_output_tokens: Some(req.max_tokens),
        temperature: req.temperature,
        top_p: req.top_p,
        top_k: req.top_k,
        stop_sequences: req.stop_sequences.clone(),
    };

    GenerateContentRequest {
        contents,
        system_instruction,
        tools,
        generation_config: Some(generation_config),
    }
}

fn translate_blocks(blocks: &[ContentBlock], tool_names: &HashMap<String, String>) -> Vec<Part> {
    let mut parts = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text } => parts.push(Part::text(text.clone())),
            ContentBlock::ToolUse { name, input, .. } => parts.push(Part {
                function_call: Some(FunctionCall {
                    name: name.clone(),
                    args: input.clone(),
                }),
                ..Part::default()
            }),
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } => {
                let name = tool_names
                    .get(tool_use_id)
                    .cloned()
                    .unwrap_or_else(|| tool_use_id.clone());
                parts.push(Part {
                    function_response: Some(FunctionResponse {
                        name: name.clone(),
                        response: json!({
                            "name": name,
                            "content": tool_result_to_value(content.as_ref()),
                        }),
                    }),
                    ..Part::default()
                });
            }
            // Gemini has no equivalent parts for these
            ContentBlock::Image { .. } | ContentBlock::Thinking { .. } => {}
        }
    }

    parts
}

fn tool_result_to_value(content: Option<&ToolResultContent>) -> Value {
    match content {
        Some(ToolResultContent::Text(t)) => Value::String(t.clone()),
        Some(ToolResultContent::Blocks(blocks)) => Value::String(
            blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        None => Value::String(String::new()),
    }
}

/// Translate a Gemini generateContent response into an Anthropic Messages
/// response. Gemini assigns no tool-call IDs, so `tool_use` blocks get fresh
/// `toolu_` IDs.
pub fn gemini_to_anthropic(resp: &GenerateContentResponse) -> MessagesResponse {
    let candidate = resp.candidates.first();

    let mut content: Vec<ResponseContentBlock> = Vec::new();

    if let Some(parts) = candidate.and_then(|c| c.content.as_ref()).map(|c| &c.parts) {
        for part in parts {
            if let Some(ref text) = part.text {
                content.push(ResponseContentBlock::Text { text: text.clone() });
            }
            if let Some(ref call) = part.function_call {
                content.push(ResponseContentBlock::ToolUse {
                    id: fresh_tool_id(),
                    name: call.name.clone(),
                    input: call.args.clone(),
                });
            }
        }
    }

    if content.is_empty() {
        content.push(ResponseContentBlock::Text {
            text: String::new(),
        });
    }

    let stop_reason = candidate
        .and_then(|c| c.finish_reason.as_deref())
        .map(map_gemini_finish_reason)
        .unwrap_or("end_turn");

    let usage = resp
        .usage_metadata
        .as_ref()
        .map_or_else(Usage::default, |u| Usage {
            input_tokens: u.prompt_token_count,
            output_tokens: u.candidates_token_count,
            ..Usage::default()
        });

    MessagesResponse {
        id: resp
            .response_id
            .clone()
            .unwrap_or_else(|| format!("msg_{}", uuid::Uuid::new_v4().simple())),
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: resp.model_version.clone().unwrap_or_default(),
        stop_reason: Some(stop_reason.to_string()),
        stop_sequence: None,
        usage,
        annotations: None,
    }
}

/// Translate a Gemini error payload into the Anthropic error envelope.
pub fn gemini_error_to_anthropic(err: &GeminiErrorResponse) -> ErrorResponse {
    ErrorResponse::new(map_gemini_error_status(&err.error.status), &err.error.message)
}

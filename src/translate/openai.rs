//! Translate between the Anthropic Messages format and OpenAI Chat
//! Completions, in both directions.
//!
//! A single Anthropic message can expand into multiple OpenAI messages (a
//! user message with `tool_result` blocks becomes separate `tool`-role
//! messages). Tool-call IDs are rewritten between the `toolu_` and `call_`
//! conventions on the way through. All functions here are pure (no I/O).

use serde_json::Value;

use super::anthropic_types::{
    ContentBlock, ErrorResponse, Message, MessagesRequest, MessagesResponse, ResponseContentBlock,
    Role, ToolChoice, ToolChoiceAuto, ToolChoiceSpecific, ToolResultContent, Usage,
};
use super::common::{
    convert_openai_usage, map_openai_finish_reason, parse_tool_arguments,
    remove_anthropic_specific_fields, to_anthropic_tool_id, to_openai_call_id,
};
use super::openai_types::{
    ChatCompletionRequest, ChatCompletionResponse, ChatContent, ChatErrorResponse, ChatFunction,
    ChatMessage, ChatTool, ChatToolCall, ChatToolCallFunction, ChatToolChoice,
    ChatToolChoiceFunction, ChatToolChoiceSpecific, ContentPart, ImageUrlDetail, StreamOptions,
};

/// Translate an Anthropic Messages request into an OpenAI Chat Completions
/// request, then strip the Anthropic-only fields the upstream would reject.
pub fn anthropic_to_openai(req: &MessagesRequest) -> Value {
    let mut messages = Vec::new();

    if let Some(ref system) = req.system {
        let text = system.as_text();
        if !text.is_empty() {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: Some(ChatContent::Text(text)),
                tool_calls: None,
                tool_call_id: None,
                name: None,
            });
        }
    }

    for msg in &req.messages {
        messages.append(&mut translate_message(msg));
    }

    let tools = req.tools.as_ref().map(|tools| {
        tools
            .iter()
            .map(|t| ChatTool {
                tool_type: "function".to_string(),
                function: ChatFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.input_schema.clone(),
                },
            })
            .collect()
    });

    let tool_choice = req.tool_choice.as_ref().map(translate_tool_choice);

    let stream_options = req.stream.filter(|s| *s).map(|_| StreamOptions {
        include_usage: true,
    });

    let user = req.metadata.as_ref().and_then(|m| m.user_id.clone());
    let metadata = req
        .metadata
        .as_ref()
        .and_then(|m| serde_json::to_value(m).ok());

    let openai_req = ChatCompletionRequest {
        model: req.model.clone(),
        messages,
        max_tokens: Some(req.max_tokens),
        temperature: req.temperature,
        top_p: req.top_p,
        stream: req.stream,
        stream_options,
        tools,
        tool_choice,
        stop: req.stop_sequences.clone(),
        user,
        store: req.store,
        metadata,
    };

    let serialized = serde_json::to_value(&openai_req).unwrap_or(Value::Null);
    remove_anthropic_specific_fields(serialized)
}

/// A single Anthropic message can expand to multiple OpenAI messages.
fn translate_message(msg: &Message) -> Vec<ChatMessage> {
    let blocks = msg.content.blocks();

    match msg.role {
        Role::User => translate_user_message(&blocks),
        Role::Assistant => translate_assistant_message(&blocks),
    }
}

fn translate_user_message(blocks: &[ContentBlock]) -> Vec<ChatMessage> {
    let mut messages = Vec::new();
    let mut content_parts: Vec<ContentPart> = Vec::new();

    let flush_parts = |parts: &mut Vec<ContentPart>, out: &mut Vec<ChatMessage>| {
        if !parts.is_empty() {
            out.push(ChatMessage {
                role: "user".to_string(),
                content: Some(collapse_content_parts(parts)),
                tool_calls: None,
                tool_call_id: None,
                name: None,
            });
            parts.clear();
        }
    };

    for block in blocks {
        match block {
            ContentBlock::Text { text } => {
                content_parts.push(ContentPart::Text { text: text.clone() });
            }
            ContentBlock::Image { source } => {
                let data_uri = format!("data:{};base64,{}", source.media_type, source.data);
                content_parts.push(ContentPart::ImageUrl {
                    image_url: ImageUrlDetail {
                        url: data_uri,
                        detail: None,
                    },
                });
            }
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                flush_parts(&mut content_parts, &mut messages);

                messages.push(ChatMessage {
                    role: "tool".to_string(),
                    content: Some(ChatContent::Text(tool_result_to_string(
                        content.as_ref(),
                        *is_error,
                    ))),
                    tool_calls: None,
                    tool_call_id: Some(to_openai_call_id(tool_use_id)),
                    name: None,
                });
            }
            ContentBlock::Thinking { .. } | ContentBlock::ToolUse { .. } => {}
        }
    }

    flush_parts(&mut content_parts, &mut messages);

    // An entirely empty message still has to appear in the conversation
    if messages.is_empty() {
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: Some(ChatContent::Text(String::new())),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        });
    }

    messages
}

fn translate_assistant_message(blocks: &[ContentBlock]) -> Vec<ChatMessage> {
    let mut text_parts: Vec<String> = Vec::new();
    let mut tool_calls: Vec<ChatToolCall> = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text } => {
                text_parts.push(text.clone());
            }
            ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ChatToolCall {
                    id: to_openai_call_id(id),
                    call_type: "function".to_string(),
                    function: ChatToolCallFunction {
                        name: name.clone(),
                        arguments: serde_json::to_string(input).unwrap_or_default(),
                    },
                });
            }
            ContentBlock::Thinking { .. }
            | ContentBlock::Image { .. }
            | ContentBlock::ToolResult { .. } => {}
        }
    }

    let content = if text_parts.is_empty() {
        None
    } else {
        Some(ChatContent::Text(text_parts.join("")))
    };

    let tool_calls_opt = if tool_calls.is_empty() {
        None
    } else {
        Some(tool_calls)
    };

    vec![ChatMessage {
        role: "assistant".to_string(),
        content,
        tool_calls: tool_calls_opt,
        tool_call_id: None,
        name: None,
    }]
}

fn collapse_content_parts(parts: &[ContentPart]) -> ChatContent {
    if parts.len() == 1 {
        if let ContentPart::Text { text } = &parts[0] {
            return ChatContent::Text(text.clone());
        }
    }
    ChatContent::Parts(parts.to_vec())
}

fn tool_result_to_string(content: Option<&ToolResultContent>, is_error: Option<bool>) -> String {
    let prefix = if is_error == Some(true) { "ERROR: " } else { "" };

    match content {
        Some(ToolResultContent::Text(t)) => format!("{prefix}{t}"),
        Some(ToolResultContent::Blocks(blocks)) => {
            let text: String = blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            format!("{prefix}{text}")
        }
        None => prefix.to_string(),
    }
}

fn translate_tool_choice(tc: &ToolChoice) -> ChatToolChoice {
    match tc {
        ToolChoice::Auto(ToolChoiceAuto { choice_type }) => match choice_type.as_str() {
            "any" => ChatToolChoice::String("required".to_string()),
            "none" => ChatToolChoice::String("none".to_string()),
            _ => ChatToolChoice::String("auto".to_string()),
        },
        ToolChoice::Specific(ToolChoiceSpecific { name, .. }) => {
            ChatToolChoice::Specific(ChatToolChoiceSpecific {
                choice_type: "function".to_string(),
                function: ChatToolChoiceFunction { name: name.clone() },
            })
        }
    }
}

/// Translate an OpenAI Chat Completion response into an Anthropic Messages
/// response. The upstream's id and model are echoed through unchanged.
pub fn openai_to_anthropic(resp: &ChatCompletionResponse) -> MessagesResponse {
    let choice = resp.choices.first();

    let mut content: Vec<ResponseContentBlock> = Vec::new();
    let mut annotations = None;

    if let Some(c) = choice {
        if let Some(ref reasoning) = c.message.reasoning_content {
            if !reasoning.is_empty() {
                content.push(ResponseContentBlock::Thinking {
                    thinking: reasoning.clone(),
                });
            }
        }

        if let Some(ref text) = c.message.content {
            if !text.is_empty() {
                content.push(ResponseContentBlock::Text { text: text.clone() });
            }
        }

        if let Some(ref tool_calls) = c.message.tool_calls {
            for tc in tool_calls {
                content.push(ResponseContentBlock::ToolUse {
                    id: to_anthropic_tool_id(&tc.id),
                    name: tc.function.name.clone(),
                    input: parse_tool_arguments(&tc.function.arguments),
                });
            }
        }

        annotations = c.message.annotations.clone();
    }

    // Clients expect at least one content block
    if content.is_empty() {
        content.push(ResponseContentBlock::Text {
            text: String::new(),
        });
    }

    let stop_reason = choice
        .and_then(|c| c.finish_reason.as_deref())
        .map(map_openai_finish_reason)
        .unwrap_or("end_turn");

    let usage = resp
        .usage
        .as_ref()
        .map_or_else(Usage::default, convert_openai_usage);

    let role = choice
        .map(|c| c.message.role.clone())
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| "assistant".to_string());

    MessagesResponse {
        id: resp.id.clone(),
        response_type: "message".to_string(),
        role,
        content,
        model: resp.model.clone(),
        stop_reason: Some(stop_reason.to_string()),
        stop_sequence: None,
        usage,
        annotations,
    }
}

/// Translate an OpenAI error body into the Anthropic error envelope.
pub fn openai_error_to_anthropic(err: &ChatErrorResponse) -> ErrorResponse {
    let error_type = match err.error.error_type.as_str() {
        "invalid_request_error" => "invalid_request_error",
        "authentication_error" => "authentication_error",
        "permission_error" => "permission_error",
        "not_found_error" => "not_found_error",
        "rate_limit_error" | "rate_limit_exceeded" => "rate_limit_error",
        "overloaded_error" => "overloaded_error",
        _ => "api_error",
    };

    ErrorResponse::new(error_type, &err.error.message)
}

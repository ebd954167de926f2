//! Shared conversion helpers used by more than one provider translation.
//!
//! Tool-call IDs, finish-reason tables, usage accounting, and the recursive
//! removal of Anthropic-only request fields all live here so the OpenAI and
//! Gemini translations agree on the details.

use serde_json::Value;

use super::anthropic_types::{ServerToolUse, Usage};
use super::openai_types::ChatUsage;

/// Convert an upstream tool-call ID to the Anthropic `toolu_` convention.
///
/// `call_X` maps to `toolu_X`; IDs already in Anthropic form are kept;
/// anything else gets the `toolu_` prefix attached.
pub fn to_anthropic_tool_id(id: &str) -> String {
    if id.starts_with("toolu_") {
        return id.to_string();
    }
    if let Some(rest) = id.strip_prefix("call_") {
        return format!("toolu_{rest}");
    }
    format!("toolu_{id}")
}

/// Inverse of [`to_anthropic_tool_id`]: `toolu_X` maps to `call_X`.
pub fn to_openai_call_id(id: &str) -> String {
    if id.starts_with("call_") {
        return id.to_string();
    }
    if let Some(rest) = id.strip_prefix("toolu_") {
        return format!("call_{rest}");
    }
    format!("call_{id}")
}

/// Mint a fresh Anthropic-form tool ID, for upstreams (Gemini) that do not
/// assign tool-call IDs of their own.
pub fn fresh_tool_id() -> String {
    format!("toolu_{}", uuid::Uuid::new_v4().simple())
}

/// Map an OpenAI `finish_reason` to an Anthropic `stop_reason`.
pub fn map_openai_finish_reason(reason: &str) -> &'static str {
    match reason {
        "stop" | "null" => "end_turn",
        "length" => "max_tokens",
        "tool_calls" | "function_call" => "tool_use",
        "content_filter" => "stop_sequence",
        _ => "end_turn",
    }
}

/// Map a Gemini `finishReason` to an Anthropic `stop_reason`.
pub fn map_gemini_finish_reason(reason: &str) -> &'static str {
    match reason {
        "STOP" => "end_turn",
        "MAX_TOKENS" => "max_tokens",
        "SAFETY" | "RECITATION" | "LANGUAGE" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" => {
            "stop_sequence"
        }
        "MALFORMED_FUNCTION_CALL" => "tool_use",
        _ => "end_turn",
    }
}

/// Map a Gemini error `status` to an Anthropic error type.
pub fn map_gemini_error_status(status: &str) -> &'static str {
    match status {
        "INVALID_ARGUMENT" => "invalid_request_error",
        "UNAUTHENTICATED" => "authentication_error",
        "PERMISSION_DENIED" => "permission_error",
        "NOT_FOUND" => "not_found_error",
        "RESOURCE_EXHAUSTED" | "DEADLINE_EXCEEDED" => "rate_limit_error",
        "INTERNAL" => "api_error",
        "UNAVAILABLE" => "overloaded_error",
        _ => "api_error",
    }
}

/// Convert OpenAI usage accounting to the Anthropic shape, including cached
/// and cache-creation token counts and server-side web-search usage.
pub fn convert_openai_usage(usage: &ChatUsage) -> Usage {
    Usage {
        input_tokens: usage.prompt_tokens,
        output_tokens: usage.completion_tokens,
        cache_creation_input_tokens: usage.cache_creation_input_tokens,
        cache_read_input_tokens: usage
            .prompt_tokens_details
            .as_ref()
            .map(|d| d.cached_tokens),
        server_tool_use: usage.server_tool_use.as_ref().map(|s| ServerToolUse {
            web_search_requests: s.web_search_requests,
        }),
    }
}

/// Parse a tool-call arguments string. Empty or malformed JSON yields an
/// empty object rather than an error.
pub fn parse_tool_arguments(arguments: &str) -> Value {
    if arguments.trim().is_empty() {
        return Value::Object(serde_json::Map::new());
    }
    serde_json::from_str(arguments).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

/// Compute the incremental part of a streamed arguments string.
///
/// Providers usually send the full accumulated string each time; when the new
/// string extends the old as a prefix, only the suffix is new. Equal or empty
/// input yields nothing; a non-extension (provider restarted the string)
/// yields the entire new string.
pub fn arguments_delta(new_args: &str, old_args: &str) -> Option<String> {
    if new_args.is_empty() || new_args == old_args {
        return None;
    }
    if new_args.len() > old_args.len() && new_args.starts_with(old_args) {
        return Some(new_args[old_args.len()..].to_string());
    }
    Some(new_args.to_string())
}

/// Remove Anthropic-only fields from a serialized provider request.
///
/// `cache_control` is removed at any nesting depth; top-level `metadata` is
/// removed unless `store == true`; `tool_choice` is removed when no tools
/// remain. Idempotent.
pub fn remove_anthropic_specific_fields(request: Value) -> Value {
    let store_enabled = request
        .get("store")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let mut cleaned = remove_fields_recursively(request, &["cache_control"]);

    if let Value::Object(ref mut map) = cleaned {
        if !store_enabled {
            map.remove("metadata");
        }

        let has_tools = match map.get("tools") {
            Some(Value::Array(tools)) => !tools.is_empty(),
            _ => false,
        };
        if !has_tools {
            map.remove("tool_choice");
        }
    }

    cleaned
}

fn remove_fields_recursively(data: Value, fields: &[&str]) -> Value {
    match data {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(key, _)| !fields.contains(&key.as_str()))
                .map(|(key, value)| (key, remove_fields_recursively(value, fields)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| remove_fields_recursively(item, fields))
                .collect(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_id_roundtrip() {
        assert_eq!(to_anthropic_tool_id("call_XYZ"), "toolu_XYZ");
        assert_eq!(to_anthropic_tool_id("toolu_XYZ"), "toolu_XYZ");
        assert_eq!(to_anthropic_tool_id("abc"), "toolu_abc");

        assert_eq!(to_openai_call_id("toolu_XYZ"), "call_XYZ");
        assert_eq!(to_openai_call_id("call_XYZ"), "call_XYZ");
        assert_eq!(to_openai_call_id("abc"), "call_abc");

        // The mapping is a 1:1 textual convention and must round-trip.
        assert_eq!(to_openai_call_id(&to_anthropic_tool_id("call_1")), "call_1");
        assert_eq!(
            to_anthropic_tool_id(&to_openai_call_id("toolu_1")),
            "toolu_1"
        );
    }

    #[test]
    fn test_openai_finish_reason_table() {
        assert_eq!(map_openai_finish_reason("stop"), "end_turn");
        assert_eq!(map_openai_finish_reason("length"), "max_tokens");
        assert_eq!(map_openai_finish_reason("tool_calls"), "tool_use");
        assert_eq!(map_openai_finish_reason("function_call"), "tool_use");
        assert_eq!(map_openai_finish_reason("content_filter"), "stop_sequence");
        assert_eq!(map_openai_finish_reason("something_new"), "end_turn");
    }

    #[test]
    fn test_gemini_finish_reason_table() {
        assert_eq!(map_gemini_finish_reason("STOP"), "end_turn");
        assert_eq!(map_gemini_finish_reason("MAX_TOKENS"), "max_tokens");
        assert_eq!(map_gemini_finish_reason("SAFETY"), "stop_sequence");
        assert_eq!(map_gemini_finish_reason("RECITATION"), "stop_sequence");
        assert_eq!(map_gemini_finish_reason("SPII"), "stop_sequence");
        assert_eq!(
            map_gemini_finish_reason("MALFORMED_FUNCTION_CALL"),
            "tool_use"
        );
        assert_eq!(
            map_gemini_finish_reason("FINISH_REASON_UNSPECIFIED"),
            "end_turn"
        );
        assert_eq!(map_gemini_finish_reason("OTHER"), "end_turn");
        assert_eq!(map_gemini_finish_reason("unknown"), "end_turn");
    }

    #[test]
    fn test_gemini_error_status_table() {
        assert_eq!(
            map_gemini_error_status("INVALID_ARGUMENT"),
            "invalid_request_error"
        );
        assert_eq!(
            map_gemini_error_status("UNAUTHENTICATED"),
            "authentication_error"
        );
        assert_eq!(
            map_gemini_error_status("PERMISSION_DENIED"),
            "permission_error"
        );
        assert_eq!(map_gemini_error_status("NOT_FOUND"), "not_found_error");
        assert_eq!(
            map_gemini_error_status("RESOURCE_EXHAUSTED"),
            "rate_limit_error"
        );
        assert_eq!(
            map_gemini_error_status("DEADLINE_EXCEEDED"),
            "rate_limit_error"
        );
        assert_eq!(map_gemini_error_status("INTERNAL"), "api_error");
        assert_eq!(map_gemini_error_status("UNAVAILABLE"), "overloaded_error");
        assert_eq!(map_gemini_error_status("weird"), "api_error");
    }

    #[test]
    fn test_parse_tool_arguments_lenient() {
        assert_eq!(
            parse_tool_arguments("{\"city\":\"London\"}"),
            json!({"city": "London"})
        );
        assert_eq!(parse_tool_arguments(""), json!({}));
        assert_eq!(parse_tool_arguments("{not json"), json!({}));
    }

    #[test]
    fn test_arguments_delta() {
        assert_eq!(arguments_delta("", ""), None);
        assert_eq!(arguments_delta("{\"a\":1}", "{\"a\":1}"), None);
        assert_eq!(
            arguments_delta("{\"a\":1}", "{\"a\""),
            Some(":1}".to_string())
        );
        // Non-incremental restart: entire new string.
        assert_eq!(
            arguments_delta("{\"b\":2}", "{\"a\":1}"),
            Some("{\"b\":2}".to_string())
        );
    }

    #[test]
    fn test_remove_fields_nested_and_idempotent() {
        let request = json!({
            "model": "gpt-4o",
            "messages": [
                {
                    "role": "user",
                    "content": [
                        {"type": "text", "text": "hi", "cache_control": {"type": "ephemeral"}}
                    ]
                }
            ],
            "tools": [
                {"type": "function", "function": {"name": "f", "parameters": {
                    "nested": {"cache_control": {"type": "ephemeral"}, "keep": true}
                }}}
            ],
            "metadata": {"user_id": "u1"},
            "tool_choice": "auto"
        });

        let once = remove_anthropic_specific_fields(request);
        assert_eq!(
            once.pointer("/messages/0/content/0/cache_control"),
            None
        );
        assert_eq!(
            once.pointer("/tools/0/function/parameters/nested/cache_control"),
            None
        );
        assert_eq!(
            once.pointer("/tools/0/function/parameters/nested/keep"),
            Some(&json!(true))
        );
        // store is not set, so metadata goes
        assert_eq!(once.get("metadata"), None);
        // tools are present, so tool_choice stays
        assert_eq!(once.get("tool_choice"), Some(&json!("auto")));

        let twice = remove_anthropic_specific_fields(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_remove_fields_drops_tool_choice_without_tools() {
        let cleaned = remove_anthropic_specific_fields(json!({
            "model": "m",
            "tools": [],
            "tool_choice": "auto"
        }));
        assert_eq!(cleaned.get("tool_choice"), None);

        let cleaned = remove_anthropic_specific_fields(json!({
            "model": "m",
            "tool_choice": "auto"
        }));
        assert_eq!(cleaned.get("tool_choice"), None);
    }

    #[test]
    fn test_remove_fields_keeps_metadata_when_stored() {
        let cleaned = remove_anthropic_specific_fields(json!({
            "model": "m",
            "store": true,
            "metadata": {"user_id": "u1"}
        }));
        assert_eq!(cleaned.pointer("/metadata/user_id"), Some(&json!("u1")));
    }

    #[test]
    fn test_convert_openai_usage_cached_tokens() {
        let usage: ChatUsage = serde_json::from_value(json!({
            "prompt_tokens": 100,
            "completion_tokens": 20,
            "total_tokens": 120,
            "prompt_tokens_details": {"cached_tokens": 60},
            "cache_creation_input_tokens": 5,
            "server_tool_use": {"web_search_requests": 2}
        }))
        .unwrap();

        let converted = convert_openai_usage(&usage);
        assert_eq!(converted.input_tokens, 100);
        assert_eq!(converted.output_tokens, 20);
        assert_eq!(converted.cache_read_input_tokens, Some(60));
        assert_eq!(converted.cache_creation_input_tokens, Some(5));
        assert_eq!(
            converted.server_tool_use.map(|s| s.web_search_requests),
            Some(2)
        );
    }
}

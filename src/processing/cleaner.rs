//! Recovery of human-readable text from LLM response artifacts
//!
//! Local inference servers sometimes answer a plain chat turn with a tool-call
//! envelope, an OpenAI `function_call` object, or text with `\u00XX` escapes left
//! in. [`clean`] peels those layers off. Every step is best-effort: when a layer
//! does not parse, the text passes through unchanged.

use super::fields::{extract_field, find_key};
use crate::protocol::CONTENT_FIELDS;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;

const TOOL_CALLS_MARKER: &str = "[TOOL_CALLS]";

/// Surrogate pair first, then any single escape
static UNICODE_ESCAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\\u([dD][89abAB][0-9a-fA-F]{2})\\u([dD][c-fC-F][0-9a-fA-F]{2})|\\u([0-9a-fA-F]{4})",
    )
    .expect("unicode escape pattern is valid")
});

/// Strip known LLM wrapper formats and return the underlying text, trimmed.
///
/// # Examples
/// ```
/// use relaychat::processing::clean;
///
/// assert_eq!(clean(r#"[TOOL_CALLS]{"content":"hola"}"#), "hola");
/// assert_eq!(clean(r#"{"function_call":{"arguments":"{\"content\":\"hi\"}"}}"#), "hi");
/// assert_eq!(clean(r"caf\u00e9"), "café");
/// assert_eq!(clean("  plain text  "), "plain text");
/// ```
pub fn clean(text: &str) -> String {
    let mut current = text.trim().to_string();

    if let Some(unwrapped) = unwrap_tool_calls(&current) {
        current = unwrapped;
    }

    if let Some(inner) = unwrap_json_envelope(current.trim()) {
        current = inner;
    }

    if current.contains("\\u00") {
        if let Some(unescaped) = unescape_unicode(&current) {
            current = unescaped;
        }
    }

    current.trim().to_string()
}

/// `[TOOL_CALLS]` prefix: the remainder's content field, or the bare remainder.
fn unwrap_tool_calls(text: &str) -> Option<String> {
    let head = text.get(..TOOL_CALLS_MARKER.len())?;
    if !head.eq_ignore_ascii_case(TOOL_CALLS_MARKER) {
        return None;
    }

    let remainder = text[TOOL_CALLS_MARKER.len()..].trim();
    let content = serde_json::from_str::<Value>(remainder)
        .ok()
        .and_then(|document| content_from_document(&document));

    Some(content.unwrap_or_else(|| remainder.to_string()))
}

/// A single top-level object: its function-call arguments or its content field.
fn unwrap_json_envelope(text: &str) -> Option<String> {
    if !(text.starts_with('{') && text.ends_with('}')) {
        return None;
    }

    let document = serde_json::from_str::<Value>(text).ok()?;
    content_from_document(&document)
}

fn content_from_document(document: &Value) -> Option<String> {
    match document {
        Value::Object(object) => {
            let from_call = find_key(object, "function_call")
                .and_then(Value::as_object)
                .and_then(|call| find_key(call, "arguments"))
                .and_then(content_from_arguments);

            from_call
                .or_else(|| find_key(object, "arguments").and_then(content_from_arguments))
                .or_else(|| extract_field(document, CONTENT_FIELDS))
        }
        // Tool-call lists: the first entry that carries text
        Value::Array(entries) => entries.iter().find_map(content_from_document),
        _ => None,
    }
}

/// Arguments arrive either as an object or as a string holding JSON.
fn content_from_arguments(arguments: &Value) -> Option<String> {
    match arguments {
        Value::String(raw) => serde_json::from_str::<Value>(raw)
            .ok()
            .and_then(|nested| content_from_document(&nested)),
        Value::Object(_) => content_from_document(arguments),
        _ => None,
    }
}

/// Replace `\uXXXX` escapes with characters; `None` if any escape is not a valid scalar.
fn unescape_unicode(text: &str) -> Option<String> {
    let mut failed = false;

    let unescaped = UNICODE_ESCAPE.replace_all(text, |caps: &Captures| {
        let decoded = match (caps.get(1), caps.get(2)) {
            (Some(high), Some(low)) => {
                let high = u32::from_str_radix(high.as_str(), 16).ok();
                let low = u32::from_str_radix(low.as_str(), 16).ok();
                high.zip(low)
                    .map(|(high, low)| 0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00))
                    .and_then(char::from_u32)
            }
            _ => caps
                .get(3)
                .and_then(|code| u32::from_str_radix(code.as_str(), 16).ok())
                .and_then(char::from_u32),
        };

        match decoded {
            Some(ch) => ch.to_string(),
            None => {
                failed = true;
                caps[0].to_string()
            }
        }
    });

    if failed {
        None
    } else {
        Some(unescaped.into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_tool_calls_envelope() {
        assert_eq!(clean(r#"[TOOL_CALLS]{"content":"hola"}"#), "hola");
    }

    #[test]
    fn test_tool_calls_marker_is_case_insensitive() {
        assert_eq!(clean(r#"  [tool_calls] {"message":"hey"}"#), "hey");
    }

    #[test]
    fn test_tool_calls_list_with_arguments() {
        let text = r#"[TOOL_CALLS][{"name":"reply","arguments":{"content":"from the list"}}]"#;
        assert_eq!(clean(text), "from the list");
    }

    #[test]
    fn test_tool_calls_without_json_keeps_remainder() {
        assert_eq!(clean("[TOOL_CALLS] just words"), "just words");
    }

    #[test]
    fn test_tool_calls_json_without_content_keeps_remainder() {
        assert_eq!(clean(r#"[TOOL_CALLS]{"name":"noop"}"#), r#"{"name":"noop"}"#);
    }

    #[test]
    fn test_function_call_string_arguments() {
        let text = r#"{"function_call":{"arguments":"{\"content\":\"hi\"}"}}"#;
        assert_eq!(clean(text), "hi");
    }

    #[test]
    fn test_function_call_object_arguments() {
        let text = r#"{"function_call":{"name":"say","arguments":{"text":"object args"}}}"#;
        assert_eq!(clean(text), "object args");
    }

    #[test]
    fn test_function_call_without_content_falls_back_to_top_level() {
        let text = r#"{"function_call":{"arguments":"not json"},"content":"outer"}"#;
        assert_eq!(clean(text), "outer");
    }

    #[test]
    fn test_top_level_content_field() {
        assert_eq!(clean(r#"{"response":"  padded  "}"#), "padded");
    }

    #[test]
    fn test_object_without_content_is_unchanged() {
        assert_eq!(clean(r#"{"foo":"bar"}"#), r#"{"foo":"bar"}"#);
    }

    #[test]
    fn test_malformed_object_is_unchanged() {
        assert_eq!(clean("{not valid}"), "{not valid}");
        assert_eq!(clean("{"), "{");
    }

    #[test]
    fn test_unicode_escapes() {
        assert_eq!(clean(r"caf\u00e9 ol\u00e9"), "café olé");
        assert_eq!(clean(r"\u00bfqu\u00e9 tal? \ud83d\ude00"), "¿qué tal? 😀");
    }

    #[test]
    fn test_lone_surrogate_leaves_text_unchanged() {
        let text = r"caf\u00e9 \ud800";
        assert_eq!(clean(text), text);
    }

    #[test]
    fn test_escapes_outside_latin1_range_need_trigger() {
        // Only `\u00` triggers unescaping
        assert_eq!(clean(r"snow \u2603"), r"snow \u2603");
    }

    #[test]
    fn test_layers_compose() {
        let text = r#"[TOOL_CALLS]{"content":"{\"message\":\"ma\\u00f1ana\"}"}"#;
        assert_eq!(clean(text), "mañana");
    }

    #[test]
    fn test_empty_and_blank() {
        assert_eq!(clean(""), "");
        assert_eq!(clean("   \n\t"), "");
    }

    proptest! {
        #[test]
        fn clean_is_idempotent_on_plain_text(text in "[A-Za-z0-9 ,.!?¿¡áéíóúñ:;'-]{0,80}") {
            let once = clean(&text);
            prop_assert_eq!(clean(&once), once.clone());
            prop_assert_eq!(once, text.trim().to_string());
        }
    }
}

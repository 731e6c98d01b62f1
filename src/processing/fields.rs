//! Alias-tolerant field extraction from JSON documents
//!
//! Producers disagree on key names and casing (`sender`, `User`, `from`...), and
//! some send numbers or booleans where text is expected. Extraction walks an
//! ordered alias list and coerces whatever it finds into plain text.

use serde_json::{Map, Value};

/// Return the first candidate field present in `record`, as text.
///
/// Keys match case-insensitively and the candidate order decides precedence.
/// Strings come back verbatim; any other value comes back as its JSON text with
/// surrounding quotes stripped. Non-object records have no fields.
///
/// # Examples
/// ```
/// use relaychat::processing::extract_field;
/// use serde_json::json;
///
/// let record = json!({"User": "Bob", "sender": "Alice"});
/// assert_eq!(extract_field(&record, &["sender", "user"]), Some("Alice".to_string()));
/// assert_eq!(extract_field(&record, &["user", "sender"]), Some("Bob".to_string()));
/// assert_eq!(extract_field(&record, &["from"]), None);
/// ```
pub fn extract_field(record: &Value, candidates: &[&str]) -> Option<String> {
    let object = record.as_object()?;

    candidates
        .iter()
        .find_map(|candidate| find_key(object, candidate))
        .map(coerce_to_text)
}

/// Case-insensitive key lookup; an exact match wins over a case-folded one.
pub fn find_key<'a>(object: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    object.get(name).or_else(|| {
        object
            .iter()
            .find(|(key, _)| key.to_lowercase() == name.to_lowercase())
            .map(|(_, value)| value)
    })
}

fn coerce_to_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string().trim_matches('"').to_string(),
    }
}

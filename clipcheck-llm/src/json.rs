//! Relaxed JSON extraction from model output
//!
//! Models sometimes wrap JSON in markdown fences or add a sentence before it.

use serde_json::Value;

use crate::error::{ClientError, Result};

/// Parses JSON from model text, tolerating fences and surrounding prose
///
/// Tries, in order: the whole text, the body of a ```json fence, and the
/// substring between the first `{` and the last `}`.
pub fn parse_json_relaxed(text: &str) -> Result<Value> {
    let raw = text.trim();
    if raw.is_empty() {
        return Err(ClientError::EmptyOutput);
    }

    if let Ok(value) = serde_json::from_str(raw) {
        return Ok(value);
    }

    if let Some(fenced) = fenced_block(raw) {
        if let Ok(value) = serde_json::from_str(fenced) {
            return Ok(value);
        }
    }

    if let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) {
        if end > start {
            if let Ok(value) = serde_json::from_str(&raw[start..=end]) {
                return Ok(value);
            }
        }
    }

    Err(ClientError::ParseError(
        "Failed to parse JSON from model output".to_string(),
    ))
}

/// Returns the contents of the first ``` fence, dropping a `json` tag
fn fenced_block(raw: &str) -> Option<&str> {
    let open = raw.find("```")?;
    let after_open = &raw[open + 3..];
    let body_start = after_open.find('\n').map(|i| i + 1).unwrap_or(0);
    let tag = after_open[..body_start].trim();
    if !tag.is_empty() && !tag.eq_ignore_ascii_case("json") {
        return None;
    }
    let body = &after_open[body_start..];
    let close = body.find("```")?;
    Some(body[..close].trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_json() {
        let value = parse_json_relaxed(r#"{"a": 1}"#).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn test_fenced_json() {
        let text = "Here you go:\n```json\n{\"summary\": \"ok\"}\n```\nThanks";
        let value = parse_json_relaxed(text).unwrap();
        assert_eq!(value["summary"], "ok");
    }

    #[test]
    fn test_prose_around_object() {
        let text = "Result follows {\"claims\": [1, 2]} end";
        let value = parse_json_relaxed(text).unwrap();
        assert_eq!(value["claims"][1], 2);
    }

    #[test]
    fn test_empty_and_garbage() {
        assert!(matches!(parse_json_relaxed("  "), Err(ClientError::EmptyOutput)));
        assert!(matches!(
            parse_json_relaxed("no json here"),
            Err(ClientError::ParseError(_))
        ));
    }
}

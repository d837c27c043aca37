//! Structured-response recovery for noisy model output.
//!
//! Every call site that expects JSON from the generative provider goes
//! through [`parse_structured`] so the whole crate shares one recovery
//! policy instead of duplicating ad hoc extraction.

use serde::de::DeserializeOwned;
use thiserror::Error;

/// The provider returned non-JSON or structurally invalid JSON where
/// structured output was required. Always caught locally by the stage that
/// made the call, never propagated raw.
#[derive(Debug, Error)]
#[error("structured response parse failed: {message}")]
pub struct ParseFailure {
    pub message: String,
    /// First 500 chars of the raw response, for logs.
    pub preview: String,
}

impl ParseFailure {
    fn new(message: impl Into<String>, raw: &str) -> Self {
        Self {
            message: message.into(),
            preview: raw.chars().take(500).collect(),
        }
    }
}

/// Parse a typed value out of potentially noisy model output.
///
/// Tries the extracted object first, then the extracted array, so the same
/// entry point serves `{...}` and `[...]` response shapes.
pub fn parse_structured<T: DeserializeOwned>(raw: &str) -> Result<T, ParseFailure> {
    let object = extract_json(raw);
    match serde_json::from_str(object) {
        Ok(v) => Ok(v),
        Err(object_err) => {
            let array = extract_json_array(raw);
            serde_json::from_str(array)
                .map_err(|_| ParseFailure::new(object_err.to_string(), raw))
        }
    }
}

/// Extract a JSON object from potentially noisy LLM output.
///
/// Handles:
/// - Pure JSON responses
/// - JSON wrapped in markdown code fences
/// - JSON embedded in prose
pub fn extract_json(raw: &str) -> &str {
    extract_delimited(raw, '{', '}')
}

/// Extract a JSON array from potentially noisy LLM output.
pub fn extract_json_array(raw: &str) -> &str {
    extract_delimited(raw, '[', ']')
}

fn extract_delimited(raw: &str, open: char, close: char) -> &str {
    let trimmed = raw.trim();

    if trimmed.starts_with(open) {
        if let Some(end) = find_matching(trimmed, open, close) {
            return &trimmed[..end];
        }
    }

    if let Some(start) = trimmed.find(open) {
        let remainder = &trimmed[start..];
        if let Some(end) = find_matching(remainder, open, close) {
            return &remainder[..end];
        }
    }

    trimmed
}

/// Find the byte offset just past the matching close delimiter, respecting
/// JSON strings. Tracks "inside string" state so delimiters within `"..."`
/// are not counted.
fn find_matching(s: &str, open: char, close: char) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;

    for (i, c) in s.char_indices() {
        if escape {
            escape = false;
            continue;
        }
        if c == '\\' && in_string {
            escape = true;
            continue;
        }
        if c == '"' {
            in_string = !in_string;
            continue;
        }
        if in_string {
            continue;
        }
        if c == open {
            depth += 1;
        } else if c == close {
            depth -= 1;
            if depth == 0 {
                return Some(i + c.len_utf8());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_extract_json_pure() {
        let input = r#"{"topics": []}"#;
        assert_eq!(extract_json(input), input);
    }

    #[test]
    fn test_extract_json_with_prose() {
        let input = "Here are the topics:\n```json\n{\"topics\": [{\"topic\": \"AI policy\"}]}\n```";
        let result = extract_json(input);
        assert!(result.starts_with('{'));
        assert!(result.ends_with('}'));
    }

    #[test]
    fn test_extract_json_braces_in_strings() {
        let input = r#"{"rationale": "Use {braces} literally", "relevance": 7}"#;
        assert_eq!(extract_json(input), input);

        let wrapped = r#"Result: {"hook": "a {b} c", "wordCount": 2} done"#;
        assert_eq!(extract_json(wrapped), r#"{"hook": "a {b} c", "wordCount": 2}"#);
    }

    #[test]
    fn test_extract_json_escaped_quotes_in_strings() {
        let input = r#"{"topic": "The \"grid\" question"}"#;
        assert_eq!(extract_json(input), input);
    }

    #[test]
    fn test_extract_json_array_with_fences() {
        let input = "```json\n[\"expert analysis grid storage\", \"implications of grid storage\"]\n```";
        let result = extract_json_array(input);
        assert!(result.starts_with('['));
        assert!(result.ends_with(']'));
    }

    #[test]
    fn test_extract_json_array_nested_objects() {
        let input = r#"noise [{"topic": "a", "query": "b"}, {"topic": "c"}] trailing"#;
        assert_eq!(
            extract_json_array(input),
            r#"[{"topic": "a", "query": "b"}, {"topic": "c"}]"#
        );
    }

    #[derive(Deserialize, Debug)]
    struct Shape {
        topics: Vec<String>,
    }

    #[test]
    fn test_parse_structured_object() {
        let raw = "Sure!\n```json\n{\"topics\": [\"one\", \"two\"]}\n```";
        let parsed: Shape = parse_structured(raw).unwrap();
        assert_eq!(parsed.topics, vec!["one", "two"]);
    }

    #[test]
    fn test_parse_structured_array() {
        let raw = "Here you go: [\"one\", \"two\"]";
        let parsed: Vec<String> = parse_structured(raw).unwrap();
        assert_eq!(parsed, vec!["one", "two"]);
    }

    #[test]
    fn test_parse_structured_garbage_is_err() {
        let result: Result<Shape, _> = parse_structured("no json here at all");
        let err = result.unwrap_err();
        assert!(err.preview.contains("no json here"));
    }
}

//! JSON extraction from LLM responses
//!
//! Parsing is a tagged outcome, not exception flow: callers match on
//! `Parsed`, `Malformed`, or `Empty` and pick the layer default
//! themselves.

use regex::Regex;

lazy_static::lazy_static! {
    static ref FENCED_BLOCK: Regex =
        Regex::new(r"```(?:json)?\s*([\s\S]*?)\s*```").expect("valid fence regex");
    static ref OUTER_OBJECT: Regex =
        Regex::new(r"\{[\s\S]*\}").expect("valid object regex");
}

/// Result of trying to read a JSON object out of an LLM response
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Parsed(serde_json::Value),
    Malformed(String),
    Empty,
}

impl ParseOutcome {
    /// The parsed object, or the given default on malformed/empty output
    pub fn or_default(self, default: serde_json::Value) -> serde_json::Value {
        match self {
            ParseOutcome::Parsed(value) => value,
            ParseOutcome::Malformed(detail) => {
                tracing::warn!(detail, "LLM returned malformed JSON, using layer default");
                default
            }
            ParseOutcome::Empty => {
                tracing::warn!("LLM returned empty output, using layer default");
                default
            }
        }
    }

    pub fn is_parsed(&self) -> bool {
        matches!(self, ParseOutcome::Parsed(_))
    }
}

/// Extract a JSON object from an LLM response
///
/// Tries, in order: direct parse, the contents of a fenced code block,
/// then the outermost `{...}` span.
pub fn extract_json(content: &str) -> ParseOutcome {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return ParseOutcome::Empty;
    }

    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if value.is_object() {
            return ParseOutcome::Parsed(value);
        }
    }

    if let Some(captures) = FENCED_BLOCK.captures(trimmed) {
        if let Some(inner) = captures.get(1) {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(inner.as_str()) {
                if value.is_object() {
                    return ParseOutcome::Parsed(value);
                }
            }
        }
    }

    if let Some(matched) = OUTER_OBJECT.find(trimmed) {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(matched.as_str()) {
            if value.is_object() {
                return ParseOutcome::Parsed(value);
            }
        }
    }

    ParseOutcome::Malformed(truncate_for_log(trimmed, 120))
}

fn truncate_for_log(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &s[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_parse() {
        let outcome = extract_json(r#"{"a": 1}"#);
        assert_eq!(outcome, ParseOutcome::Parsed(serde_json::json!({"a": 1})));
    }

    #[test]
    fn test_fenced_block() {
        let content = "Here you go:\n```json\n{\"a\": 1}\n```\nanything else";
        let outcome = extract_json(content);
        assert_eq!(outcome, ParseOutcome::Parsed(serde_json::json!({"a": 1})));
    }

    #[test]
    fn test_fence_without_language_tag() {
        let content = "```\n{\"b\": 2}\n```";
        let outcome = extract_json(content);
        assert_eq!(outcome, ParseOutcome::Parsed(serde_json::json!({"b": 2})));
    }

    #[test]
    fn test_outer_braces_extraction() {
        let content = "The analysis is {\"score\": 7} as requested.";
        let outcome = extract_json(content);
        assert_eq!(outcome, ParseOutcome::Parsed(serde_json::json!({"score": 7})));
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(extract_json("   "), ParseOutcome::Empty);
    }

    #[test]
    fn test_malformed_input() {
        let outcome = extract_json("I could not produce JSON, sorry.");
        assert!(matches!(outcome, ParseOutcome::Malformed(_)));
    }

    #[test]
    fn test_or_default_substitutes() {
        let default = serde_json::json!({"fallback": true});
        let value = extract_json("garbage").or_default(default.clone());
        assert_eq!(value, default);

        let value = extract_json(r#"{"x": 1}"#).or_default(default);
        assert_eq!(value, serde_json::json!({"x": 1}));
    }

    #[test]
    fn test_non_object_json_is_malformed() {
        assert!(matches!(extract_json("[1, 2, 3]"), ParseOutcome::Malformed(_)));
    }
}

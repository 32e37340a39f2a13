//! Pulls a JSON document out of a free-form model reply.

use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;

use crate::error::{StudioError, StudioResult};

static TAGGED_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```json\s*\n?(.*?)\n?\s*```").expect("valid regex"));
static BARE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```\s*\n?(.*?)\n?\s*```").expect("valid regex"));

/// Narrows `raw` to the outermost `{...}` or `[...]` span.
///
/// Fenced blocks are unwrapped first (a ```` ```json ```` fence, then a bare
/// fence). If no bracket pair is found the trimmed input comes back as is;
/// this never fails, it only stops narrowing.
pub fn extract_json_candidate(raw: &str) -> &str {
    let mut text = raw.trim();
    if let Some(inner) = TAGGED_FENCE
        .captures(text)
        .or_else(|| BARE_FENCE.captures(text))
        .and_then(|c| c.get(1))
    {
        text = inner.as_str().trim();
    }

    let open = text.find(['{', '[']);
    let close = text.rfind(['}', ']']);
    match (open, close) {
        (Some(start), Some(end)) if end > start => &text[start..=end],
        _ => text,
    }
}

/// Sanitizes `raw` and deserializes the result.
pub fn parse_structured<T: DeserializeOwned>(raw: &str) -> StudioResult<T> {
    let candidate = extract_json_candidate(raw);
    serde_json::from_str(candidate).map_err(|e| {
        tracing::debug!(error = %e, candidate, "structured response did not parse");
        StudioError::malformed(format!("response was not valid JSON: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::{Value, json};

    #[test]
    fn fenced_block_inside_prose() {
        let raw = "Here is the result:\n```json\n{\"a\":1}\n```\nThanks";
        assert_eq!(extract_json_candidate(raw), "{\"a\":1}");
    }

    #[test]
    fn bare_fence() {
        let raw = "```\n[{\"scene\": 1}]\n```";
        assert_eq!(extract_json_candidate(raw), "[{\"scene\": 1}]");
    }

    #[test]
    fn no_brackets_returns_trimmed_input() {
        assert_eq!(extract_json_candidate("  just words \n"), "just words");
    }

    #[test]
    fn trailing_text_after_array() {
        assert_eq!(extract_json_candidate("[1,2,3] extra"), "[1,2,3]");
    }

    #[test]
    fn close_before_open_is_left_alone() {
        assert_eq!(extract_json_candidate("} oops {"), "} oops {");
    }

    #[test]
    fn parse_failure_is_malformed_response() {
        let err = parse_structured::<Value>("{not json}").unwrap_err();
        assert_eq!(err.kind, ErrorKind::MalformedResponse);

        let ok: Value = parse_structured("Sure! {\"hooks\": [\"a\", \"b\"]} hope that helps").unwrap();
        assert_eq!(ok, json!({"hooks": ["a", "b"]}));
    }
}

//! Turns a written script into speakable narration chunks.
//!
//! Scripts come back from the text model as Markdown with headings, stage
//! directions and links. Speech synthesis reads every character, so those
//! are stripped, and long scripts are split on paragraph boundaries to
//! stay under the per-request input limit.

use std::sync::LazyLock;

use regex::Regex;

/// Characters sent to the speech endpoint per request.
pub const NARRATION_CHUNK_CHARS: usize = 3000;

static IMAGE_INLINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"!\[([^\]]*)\]\([^\)]+\)").expect("valid regex"));
static LINK_INLINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\([^\)]+\)").expect("valid regex"));
static AUTOLINK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<https?://[^>]+>").expect("valid regex"));
static BARE_URL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"https?://\S+").expect("valid regex"));
static HTML_COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("valid regex"));
static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"</?[a-zA-Z][^>]*>").expect("valid regex"));
static STAGE_DIRECTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(?:[A-Z][A-Z \-]*|[Ss]cene[^\]]*|[Mm]usic[^\]]*|SFX[^\]]*)\]").expect("valid regex"));
static LINE_MARKUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(?:#{1,6}\s*|>+\s*|[-*+]\s+|\d+[\.)]\s+)").expect("valid regex"));
static EMPHASIS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\*\*|__|\*|_)(\S[^*_]*?)(\*\*|__|\*|_)").expect("valid regex"));
static BLANK_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

/// Strips Markdown, HTML, links and bracketed stage directions.
pub fn prepare_narration(input: &str) -> String {
    let text = IMAGE_INLINE.replace_all(input, "$1");
    let text = LINK_INLINE.replace_all(&text, "$1");
    let text = AUTOLINK.replace_all(&text, "");
    let text = BARE_URL.replace_all(&text, "");
    let text = HTML_COMMENT.replace_all(&text, "");
    let text = HTML_TAG.replace_all(&text, "");
    let text = STAGE_DIRECTION.replace_all(&text, "");

    let lines: Vec<String> = text
        .lines()
        .filter(|l| !l.trim_start().starts_with("```"))
        .map(|l| {
            let l = LINE_MARKUP.replace(l, "");
            EMPHASIS.replace_all(&l, "$2").replace('`', "")
        })
        .collect();

    BLANK_RUN
        .replace_all(&lines.join("\n"), "\n\n")
        .trim()
        .to_string()
}

/// Splits `input` into pieces of at most `max_chars` characters, preferring
/// the last line break in range, then the last sentence end. A limit of
/// zero is treated as one.
pub fn split_narration(input: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let chars: Vec<char> = input.chars().collect();
    if chars.len() <= max_chars {
        return vec![input.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;
    while start < chars.len() {
        let mut end = (start + max_chars).min(chars.len());
        if end < chars.len() {
            let window = &chars[start..end];
            let cut = window
                .iter()
                .rposition(|&c| c == '\n')
                .or_else(|| window.iter().rposition(|c| matches!(c, '.' | '!' | '?')));
            if let Some(pos) = cut {
                end = start + pos + 1;
            }
        }
        let piece: String = chars[start..end].iter().collect();
        if !piece.trim().is_empty() {
            chunks.push(piece);
        }
        start = end;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_limit_still_makes_progress() {
        assert_eq!(split_narration("abc", 0), vec!["a", "b", "c"]);
    }

    #[test]
    fn strips_markup_and_directions() {
        let script = "# Episode 1\n\n[INTRO MUSIC]\n**Host:** Welcome to the [show](https://x.y)!\n\n\n\n- First point\n<b>bold</b> and `code`";
        let out = prepare_narration(script);
        assert_eq!(out, "Episode 1\n\nHost: Welcome to the show!\n\nFirst point\nbold and code");
    }

    #[test]
    fn short_input_is_one_chunk() {
        assert_eq!(split_narration("hello", 10), vec!["hello".to_string()]);
    }

    #[test]
    fn long_input_splits_on_newlines_then_sentences() {
        let text = "aaaa bbbb.\ncccc dddd. eeee ffff";
        let chunks = split_narration(text, 12);
        assert_eq!(chunks[0], "aaaa bbbb.\n");
        assert!(chunks.iter().all(|c| c.chars().count() <= 12));
        assert_eq!(chunks.concat(), text);
    }
}

//! Chunk normalization applied before anything else sees a chunk

use std::sync::LazyLock;

use regex::Regex;

use crate::request::Provider;

static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]")
        .expect("ansi pattern is valid")
});

static CLI_NOISE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(?:loaded cached credentials|data collection is disabled|yolo mode is enabled|reading prompt from stdin|warning: no stdin data received|\[debug\]|\[startup\])",
    )
    .expect("noise pattern is valid")
});

/// Strip terminal escapes, carriage returns and known CLI chatter from a chunk.
///
/// Verbatim providers pass through untouched. Only complete lines are dropped
/// as noise; a trailing partial line is kept as-is.
pub fn normalize_chunk(chunk: &str, provider: &Provider) -> String {
    if provider.is_verbatim() {
        return chunk.to_string();
    }

    let stripped = ANSI_ESCAPE.replace_all(chunk, "");
    let stripped = stripped.replace("\r\n", "\n").replace('\r', "");

    let mut out = String::with_capacity(stripped.len());
    for line in stripped.split_inclusive('\n') {
        if line.ends_with('\n') && CLI_NOISE_LINE.is_match(line) {
            continue;
        }
        out.push_str(line);
    }
    out
}

/// Collapse every whitespace run into one space
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_ansi_and_carriage_returns() {
        let chunk = "\x1b[32mgreen\x1b[0m text\r\nnext\r";
        assert_eq!(normalize_chunk(chunk, &Provider::Claude), "green text\nnext");
    }

    #[test]
    fn test_drops_noise_lines() {
        let chunk = "Loaded cached credentials.\nHello there\n[DEBUG] spam\n";
        assert_eq!(normalize_chunk(chunk, &Provider::Gemini), "Hello there\n");
    }

    #[test]
    fn test_keeps_partial_last_line() {
        let chunk = "ok\n[DEBUG] not finished yet";
        assert_eq!(
            normalize_chunk(chunk, &Provider::Codex),
            "ok\n[DEBUG] not finished yet"
        );
    }

    #[test]
    fn test_verbatim_providers_untouched() {
        let chunk = "\x1b[1mbold\x1b[0m\r\nLoaded cached credentials.\n";
        assert_eq!(normalize_chunk(chunk, &Provider::Copilot), chunk);
        assert_eq!(normalize_chunk(chunk, &Provider::Antigravity), chunk);
    }

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_whitespace("  a \n\t b   c "), "a b c");
    }
}

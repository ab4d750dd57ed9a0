//! Output extraction pipeline
//!
//! Reduces everything a run captured into one [`RunResult`]. The cascade, first
//! non-empty wins:
//!
//! 1. raw mode: trimmed capture, else a readable reconstruction of JSON events
//! 2. conversational mode: a short natural-language extract, else the JSON
//!    reconstruction collapsed to one clipped line
//! 3. non-zero exit: `"{provider} exited with code {code}"`
//! 4. clean run: a localized acknowledgment
//!
//! The terminal mode can override 3 and 4; see [`extract`].

pub mod json_lines;
pub mod normalize;

use crate::request::{Language, RunResult, TerminalMode};

pub use json_lines::{assistant_text, is_json_lines, pretty_stream_json};
pub use normalize::{collapse_whitespace, normalize_chunk};

/// Character cap for conversational replies, before the ellipsis
pub const REPLY_CHAR_LIMIT: usize = 320;

/// Sentence cap for conversational replies
pub const REPLY_SENTENCE_LIMIT: usize = 3;

const ELLIPSIS: char = '…';

/// Input to [`extract`]
#[derive(Debug, Clone, Copy)]
pub struct ExtractionInput<'a> {
    pub accumulated: &'a str,
    pub exit_code: i32,
    pub raw_output: bool,
    pub mode: &'a TerminalMode,
    /// Provider name used in exit-code errors
    pub provider: &'a str,
    pub language: Language,
}

/// Build the run result. Pure: the same input always yields the same result.
pub fn extract(input: &ExtractionInput<'_>) -> RunResult {
    let text = if input.raw_output {
        raw_text(input.accumulated)
    } else {
        conversational_text(input.accumulated)
    };

    match input.mode {
        TerminalMode::NoToolsViolation => {
            if text.is_empty() {
                RunResult::ok(acknowledgment(input.language))
            } else {
                RunResult::ok(text)
            }
        }
        TerminalMode::GenericError(message) | TerminalMode::Timeout(message) => {
            RunResult::failed(text, message.clone())
        }
        TerminalMode::Success => {
            if !text.is_empty() {
                RunResult::ok(text)
            } else if input.exit_code != 0 {
                RunResult::failed(
                    "",
                    format!("{} exited with code {}", input.provider, input.exit_code),
                )
            } else {
                RunResult::ok(acknowledgment(input.language))
            }
        }
    }
}

/// Raw mode: trimmed capture, no truncation
pub fn raw_text(accumulated: &str) -> String {
    let trimmed = accumulated.trim();
    if !trimmed.is_empty() {
        return trimmed.to_string();
    }
    pretty_stream_json(accumulated)
}

/// Conversational mode: bounded natural-language extract
pub fn conversational_text(accumulated: &str) -> String {
    let structured = is_json_lines(accumulated);

    let body = if structured {
        assistant_text(accumulated)
    } else {
        assistant_text(accumulated).or_else(|| {
            let plain = accumulated.trim();
            (!plain.is_empty()).then(|| plain.to_string())
        })
    };

    if let Some(body) = body {
        let summary = summarize(&body);
        if !summary.is_empty() {
            return summary;
        }
    }

    if structured {
        return clip(&collapse_whitespace(&pretty_stream_json(accumulated)), REPLY_CHAR_LIMIT);
    }

    String::new()
}

/// Keep the first few sentences, on one line, clipped to the reply limit
pub fn summarize(text: &str) -> String {
    let collapsed = collapse_whitespace(text);
    let sentences = split_sentences(&collapsed);
    let kept = sentences
        .iter()
        .take(REPLY_SENTENCE_LIMIT)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" ");
    clip(&kept, REPLY_CHAR_LIMIT)
}

fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        let boundary = match c {
            '。' | '！' | '？' => true,
            '.' | '!' | '?' => chars.peek().map_or(true, |next| next.is_whitespace()),
            _ => false,
        };
        if boundary {
            let sentence = current.trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
            current.clear();
        }
    }

    let rest = current.trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }
    sentences
}

/// Clip to `limit` characters, marking the cut with an ellipsis
pub fn clip(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(limit).collect();
    cut.truncate(cut.trim_end().len());
    cut.push(ELLIPSIS);
    cut
}

/// Short reply used when a clean run produced nothing
pub fn acknowledgment(language: Language) -> &'static str {
    match language {
        Language::En => "Got it. I'll take care of it.",
        Language::Ja => "了解しました。対応します。",
        Language::Zh => "收到，我会处理。",
        Language::Ko => "알겠습니다. 처리하겠습니다.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input<'a>(accumulated: &'a str, mode: &'a TerminalMode) -> ExtractionInput<'a> {
        ExtractionInput {
            accumulated,
            exit_code: 0,
            raw_output: false,
            mode,
            provider: "claude",
            language: Language::En,
        }
    }

    #[test]
    fn test_raw_mode_returns_trimmed_capture() {
        let mode = TerminalMode::Success;
        let mut i = input("  hello\nworld\n\n", &mode);
        i.raw_output = true;
        assert_eq!(extract(&i), RunResult::ok("hello\nworld"));
    }

    #[test]
    fn test_raw_mode_does_not_truncate() {
        let long = "x".repeat(5_000);
        let mode = TerminalMode::Success;
        let mut i = input(&long, &mode);
        i.raw_output = true;
        assert_eq!(extract(&i).text.len(), 5_000);
    }

    #[test]
    fn test_conversational_clips_long_text() {
        let long = "a".repeat(500);
        let mode = TerminalMode::Success;
        let result = extract(&input(&long, &mode));

        assert!(result.text.chars().count() <= REPLY_CHAR_LIMIT + 1);
        assert!(result.text.ends_with(ELLIPSIS));
        assert!(result.error.is_none());
    }

    #[test]
    fn test_conversational_caps_sentences() {
        let text = "One. Two! Three? Four. Five.";
        let mode = TerminalMode::Success;
        assert_eq!(extract(&input(text, &mode)).text, "One. Two! Three?");
    }

    #[test]
    fn test_cjk_sentence_boundaries() {
        assert_eq!(summarize("一。二。三。四。"), "一。 二。 三。");
    }

    #[test]
    fn test_decimal_points_are_not_boundaries() {
        assert_eq!(
            summarize("Version 1.2 shipped. Then 3.4 did. Then more. And more."),
            "Version 1.2 shipped. Then 3.4 did. Then more."
        );
    }

    #[test]
    fn test_conversational_uses_assistant_text() {
        let raw = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"Sure thing."}]}}
{"type":"result","result":"Sure thing."}
"#;
        let mode = TerminalMode::Success;
        assert_eq!(extract(&input(raw, &mode)).text, "Sure thing.");
    }

    #[test]
    fn test_conversational_falls_back_to_pretty_json() {
        let raw = r#"{"type":"item.started","item":{"type":"command_execution","command":"ls -la"}}
{"type":"turn.completed"}
"#;
        let mode = TerminalMode::Success;
        assert_eq!(extract(&input(raw, &mode)).text, "$ ls -la");
    }

    #[test]
    fn test_nonzero_exit_without_output() {
        let mode = TerminalMode::Success;
        let mut i = input("", &mode);
        i.exit_code = 2;
        i.provider = "codex";
        assert_eq!(
            extract(&i),
            RunResult::failed("", "codex exited with code 2")
        );
    }

    #[test]
    fn test_nonzero_exit_with_output_keeps_text() {
        let mode = TerminalMode::Success;
        let mut i = input("partial answer", &mode);
        i.exit_code = 1;
        assert_eq!(extract(&i), RunResult::ok("partial answer"));
    }

    #[test]
    fn test_clean_empty_run_acknowledges_in_language() {
        let mode = TerminalMode::Success;
        let mut i = input("", &mode);
        i.language = Language::Ja;
        assert_eq!(extract(&i), RunResult::ok("了解しました。対応します。"));

        i.language = Language::Ko;
        assert_eq!(extract(&i).text, acknowledgment(Language::Ko));
    }

    #[test]
    fn test_no_tools_violation_never_errors() {
        let mode = TerminalMode::NoToolsViolation;
        let mut i = input("", &mode);
        i.exit_code = 137;
        let result = extract(&i);
        assert!(result.error.is_none());
        assert_eq!(result.text, acknowledgment(Language::En));

        let result = extract(&input("I will check the file.", &mode));
        assert_eq!(result, RunResult::ok("I will check the file."));
    }

    #[test]
    fn test_timeout_keeps_partial_text() {
        let mode = TerminalMode::Timeout("timeout after 50ms".into());
        let result = extract(&input("Halfway there", &mode));
        assert_eq!(result, RunResult::failed("Halfway there", "timeout after 50ms"));

        let result = extract(&input("", &mode));
        assert_eq!(result, RunResult::failed("", "timeout after 50ms"));
    }

    #[test]
    fn test_generic_error_attaches_message() {
        let mode = TerminalMode::GenericError("Failed to spawn agent process".into());
        let result = extract(&input("", &mode));
        assert_eq!(result.error.as_deref(), Some("Failed to spawn agent process"));
        assert_eq!(result.text, "");
    }

    #[test]
    fn test_extract_is_pure() {
        let mode = TerminalMode::Success;
        let raw = "Some output. With sentences. And more. Even more.";
        let i = input(raw, &mode);
        assert_eq!(extract(&i), extract(&i));
    }
}

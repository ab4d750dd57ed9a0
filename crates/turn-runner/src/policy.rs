//! No-tools policy monitor
//!
//! Scans each newly arrived chunk for the JSON field patterns agents emit when
//! they call a tool. Only the chunk is scanned, never the accumulated buffer,
//! so a marker split exactly across two chunks goes unnoticed.

use std::sync::LazyLock;

use regex::Regex;

static TOOL_SIGNAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)"type"\s*:\s*"(?:tool_use|tool_result|command_execution|function_call|mcp_tool_call)"|"tool_use_id"\s*:|"toolName"\s*:"#,
    )
    .expect("tool signal pattern is valid")
});

/// Returns `true` when `chunk` contains a tool-use marker
pub fn scan(chunk: &str) -> bool {
    TOOL_SIGNAL.is_match(chunk)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_tool_markers() {
        let hits = [
            r#"{"type":"tool_use","name":"Bash"}"#,
            r#"{"type":"tool_result","content":"ok"}"#,
            r#"{"type":"item.started","item":{"type":"command_execution","command":"ls"}}"#,
            r#"{"type":"function_call","name":"read"}"#,
            r#"{"type":"mcp_tool_call"}"#,
            r#"{"tool_use_id":"toolu_1"}"#,
            r#"{"toolName":"edit"}"#,
        ];
        for chunk in hits {
            assert!(scan(chunk), "expected violation for {}", chunk);
        }
    }

    #[test]
    fn test_case_and_whitespace_insensitive() {
        assert!(scan(r#"{"TYPE" : "Tool_Use"}"#));
        assert!(scan(r#"{"toolname": "x"}"#));
    }

    #[test]
    fn test_plain_text_is_clean() {
        assert!(!scan("I would use a tool here but I won't."));
        assert!(!scan(r#"{"type":"text","text":"tool_use is a field name"}"#));
        assert!(!scan(r#"{"type":"assistant","message":{}}"#));
    }

    #[test]
    fn test_marker_split_across_chunks_is_missed() {
        assert!(!scan(r#"{"type":"tool_"#));
        assert!(!scan(r#"use","name":"Bash"}"#));
    }
}

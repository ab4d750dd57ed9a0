//! Understanding of agent CLIs' newline-delimited JSON event streams
//!
//! Recognized shapes:
//! - Claude stream-json: `assistant` messages with `text`/`tool_use` blocks, `result`
//! - Codex exec: `item.completed` with `agent_message`, `command_execution`, ...
//! - Gemini stream-json: `message` with `role: assistant`
//! - OpenCode: `text` and `tool_use` parts

use serde_json::Value;

/// Parse every line that is a JSON object, skipping everything else
fn objects(raw: &str) -> impl Iterator<Item = Value> + '_ {
    raw.lines().filter_map(|line| {
        let line = line.trim();
        if !line.starts_with('{') {
            return None;
        }
        serde_json::from_str::<Value>(line)
            .ok()
            .filter(Value::is_object)
    })
}

/// True when every non-blank line is a JSON object
pub fn is_json_lines(raw: &str) -> bool {
    let mut seen = false;
    for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match serde_json::from_str::<Value>(line) {
            Ok(v) if v.is_object() => seen = true,
            _ => return false,
        }
    }
    seen
}

fn str_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    let mut current = value;
    for key in path {
        current = current.get(key)?;
    }
    current.as_str()
}

/// The agent's own reply text, if the stream carries any.
///
/// A Claude `result` event wins over the assistant messages that preceded it.
pub fn assistant_text(raw: &str) -> Option<String> {
    let mut pieces: Vec<String> = Vec::new();
    let mut gemini = String::new();
    let mut result: Option<String> = None;

    for event in objects(raw) {
        match event.get("type").and_then(Value::as_str) {
            Some("result") => {
                if let Some(text) = event.get("result").and_then(Value::as_str) {
                    result = Some(text.to_string());
                }
            }
            Some("assistant") => {
                if let Some(blocks) = event.pointer("/message/content").and_then(Value::as_array) {
                    for block in blocks {
                        if block.get("type").and_then(Value::as_str) == Some("text") {
                            if let Some(text) = block.get("text").and_then(Value::as_str) {
                                pieces.push(text.to_string());
                            }
                        }
                    }
                }
            }
            Some("item.completed") => {
                let item_type = str_at(&event, &["item", "type"]);
                if matches!(item_type, Some("agent_message") | Some("assistant_message")) {
                    if let Some(text) = str_at(&event, &["item", "text"]) {
                        pieces.push(text.to_string());
                    }
                }
            }
            Some("message") => {
                if event.get("role").and_then(Value::as_str) == Some("assistant") {
                    if let Some(text) = event.get("content").and_then(Value::as_str) {
                        gemini.push_str(text);
                    }
                }
            }
            Some("text") => {
                if let Some(text) = str_at(&event, &["part", "text"]) {
                    pieces.push(text.to_string());
                }
            }
            _ => {}
        }
    }

    if !gemini.is_empty() {
        pieces.push(gemini);
    }

    let text = match result {
        Some(result) if !result.trim().is_empty() => result,
        _ => pieces.join("\n"),
    };
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Human-readable reconstruction of a JSON event stream: reply text, tool
/// calls and errors, one line per event.
pub fn pretty_stream_json(raw: &str) -> String {
    let mut lines: Vec<String> = Vec::new();

    for event in objects(raw) {
        let kind = event.get("type").and_then(Value::as_str).unwrap_or_default();
        match kind {
            "assistant" => {
                let blocks = event
                    .pointer("/message/content")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                for block in blocks {
                    match block.get("type").and_then(Value::as_str) {
                        Some("text") => {
                            if let Some(text) = block.get("text").and_then(Value::as_str) {
                                lines.push(text.to_string());
                            }
                        }
                        Some("tool_use") => {
                            let name = block.get("name").and_then(Value::as_str).unwrap_or("tool");
                            lines.push(format!("[tool] {}", name));
                        }
                        _ => {}
                    }
                }
            }
            "result" => {
                if let Some(text) = event.get("result").and_then(Value::as_str) {
                    lines.push(text.to_string());
                }
            }
            "item.started" | "item.completed" => {
                let item = event.get("item").cloned().unwrap_or(Value::Null);
                match item.get("type").and_then(Value::as_str) {
                    Some("agent_message") | Some("assistant_message") | Some("reasoning")
                        if kind == "item.completed" =>
                    {
                        if let Some(text) = item.get("text").and_then(Value::as_str) {
                            lines.push(text.to_string());
                        }
                    }
                    Some("command_execution") if kind == "item.started" => {
                        let command = item.get("command").and_then(Value::as_str).unwrap_or("");
                        lines.push(format!("$ {}", command));
                    }
                    Some("mcp_tool_call") if kind == "item.started" => {
                        let server = item.get("server").and_then(Value::as_str).unwrap_or("mcp");
                        let tool = item.get("tool").and_then(Value::as_str).unwrap_or("tool");
                        lines.push(format!("[mcp] {}.{}", server, tool));
                    }
                    _ => {}
                }
            }
            "function_call" => {
                let name = event.get("name").and_then(Value::as_str).unwrap_or("function");
                lines.push(format!("[tool] {}", name));
            }
            "message" => {
                if event.get("role").and_then(Value::as_str) == Some("assistant") {
                    if let Some(text) = event.get("content").and_then(Value::as_str) {
                        lines.push(text.to_string());
                    }
                }
            }
            "text" => {
                if let Some(text) = str_at(&event, &["part", "text"]) {
                    lines.push(text.to_string());
                }
            }
            "tool_use" => {
                let name = str_at(&event, &["part", "tool"])
                    .or_else(|| event.get("tool_name").and_then(Value::as_str))
                    .or_else(|| event.get("name").and_then(Value::as_str))
                    .unwrap_or("tool");
                lines.push(format!("[tool] {}", name));
            }
            "error" => {
                let message = event
                    .get("message")
                    .and_then(Value::as_str)
                    .or_else(|| str_at(&event, &["error", "message"]))
                    .unwrap_or("unknown error");
                lines.push(format!("[error] {}", message));
            }
            _ => {}
        }
    }

    lines
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

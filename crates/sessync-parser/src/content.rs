//! Content extraction for structured message bodies.
//!
//! A message body is either a plain string or a list of typed blocks. Text
//! blocks become the searchable `content`; tool-use blocks become
//! [`ToolCall`]s plus a one-line placeholder; thinking and tool-result blocks
//! only contribute flags and lengths.

use serde_json::Value;
use sessync_core::models::ToolCall;

use crate::taxonomy::normalize_tool_category;

/// Separator placed between the text parts of one message.
pub const PART_SEPARATOR: &str = "\n\n";

/// Output of a tool, referenced back to the call that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub tool_use_id: String,
    pub content_length: usize,
}

/// Normalized view of one message body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extracted {
    pub content: String,
    pub has_thinking: bool,
    pub has_tool_use: bool,
    pub tool_calls: Vec<ToolCall>,
    pub tool_results: Vec<ToolResult>,
    /// Blocks with a type this extractor does not understand.
    pub unknown_blocks: usize,
}

/// Flatten a message body into text, tool calls and flags.
pub fn extract_content(body: &Value) -> Extracted {
    let mut out = Extracted::default();

    let blocks = match body {
        Value::String(text) => {
            out.content = text.clone();
            return out;
        }
        Value::Array(blocks) => blocks.as_slice(),
        Value::Object(_) => std::slice::from_ref(body),
        _ => return out,
    };

    let mut parts: Vec<String> = Vec::new();
    for block in blocks {
        match str_at(block, "type") {
            "text" => {
                let text = str_at(block, "text");
                if !text.is_empty() {
                    parts.push(text.to_string());
                }
            }
            "thinking" | "redacted_thinking" => out.has_thinking = true,
            "tool_use" | "server_tool_use" => {
                out.has_tool_use = true;
                let name = str_at(block, "name");
                let input = block.get("input").unwrap_or(&Value::Null);
                if !name.is_empty() {
                    out.tool_calls.push(tool_call(block, name, input));
                }
                parts.push(format_tool_use(name, input));
            }
            "tool_result" => {
                let id = str_at(block, "tool_use_id");
                if !id.is_empty() {
                    out.tool_results.push(ToolResult {
                        tool_use_id: id.to_string(),
                        content_length: tool_result_length(
                            block.get("content").unwrap_or(&Value::Null),
                        ),
                    });
                }
            }
            _ => out.unknown_blocks += 1,
        }
    }

    out.content = parts.join(PART_SEPARATOR);
    out
}

fn tool_call(block: &Value, name: &str, input: &Value) -> ToolCall {
    let id = str_at(block, "id");
    let skill_name = if name.eq_ignore_ascii_case("skill") {
        non_empty(str_at(input, "skill")).or_else(|| non_empty(str_at(input, "name")))
    } else {
        None
    };

    ToolCall {
        tool_name: name.to_string(),
        category: normalize_tool_category(name).to_string(),
        tool_use_id: non_empty(id),
        input_json: (!input.is_null()).then(|| input.to_string()),
        skill_name,
        result_content_length: None,
        subagent_session_id: None,
    }
}

/// Length of a tool result: the string itself, or the sum of its text blocks.
pub fn tool_result_length(content: &Value) -> usize {
    match content {
        Value::String(text) => text.len(),
        Value::Array(blocks) => blocks.iter().map(|b| str_at(b, "text").len()).sum(),
        _ => 0,
    }
}

/// One-line (occasionally multi-line) summary of a tool invocation.
pub fn format_tool_use(name: &str, input: &Value) -> String {
    match name {
        "Read" => format!(
            "[Read: {}]",
            first_of(input, &["file_path", "path"]).unwrap_or_default()
        ),
        "Glob" => format!(
            "[Glob: {} in {}]",
            str_at(input, "pattern"),
            non_empty(str_at(input, "path")).unwrap_or_else(|| ".".to_string())
        ),
        "Grep" => format!("[Grep: {}]", str_at(input, "pattern")),
        "Edit" => format!("[Edit: {}]", str_at(input, "file_path")),
        "Write" => format!("[Write: {}]", str_at(input, "file_path")),
        "Bash" => format_bash(input),
        "Task" => format!(
            "[Task: {} ({})]",
            str_at(input, "description"),
            str_at(input, "subagent_type")
        ),
        "Skill" | "skill" => format!(
            "[Skill: {}]",
            first_of(input, &["skill", "name"]).unwrap_or_default()
        ),
        "TodoWrite" => format_todos(input),
        "AskUserQuestion" => format_question(name, input),
        "EnterPlanMode" => "[Entering Plan Mode]".to_string(),
        "ExitPlanMode" => "[Exiting Plan Mode]".to_string(),
        "TaskCreate" => match non_empty(str_at(input, "subject")) {
            Some(subject) => format!("[TaskCreate: {subject}]"),
            None => "[TaskCreate]".to_string(),
        },
        "TaskUpdate" => {
            let id = scalar_at(input, "taskId");
            match non_empty(str_at(input, "status")) {
                Some(status) => format!("[TaskUpdate: #{id} {status}]"),
                None => format!("[TaskUpdate: #{id}]"),
            }
        }
        "TaskGet" => format!("[TaskGet: #{}]", scalar_at(input, "taskId")),
        "TaskList" => "[TaskList]".to_string(),
        "SendMessage" => {
            let kind = str_at(input, "type");
            match non_empty(str_at(input, "recipient")) {
                Some(recipient) => format!("[SendMessage: {kind} to {recipient}]"),
                None => format!("[SendMessage: {kind}]"),
            }
        }
        _ => format!("[Tool: {name}]"),
    }
}

fn format_bash(input: &Value) -> String {
    let command = first_of(input, &["command", "cmd"]).unwrap_or_default();
    match non_empty(str_at(input, "description")) {
        Some(desc) => format!("[Bash: {desc}]\n$ {command}"),
        None => format!("[Bash]\n$ {command}"),
    }
}

fn format_todos(input: &Value) -> String {
    let mut lines = vec!["[Todo List]".to_string()];
    for todo in array_at(input, "todos") {
        let icon = match str_at(todo, "status") {
            "completed" => "✓",
            "in_progress" => "→",
            _ => "○",
        };
        lines.push(format!("  {icon} {}", str_at(todo, "content")));
    }
    lines.join("\n")
}

fn format_question(name: &str, input: &Value) -> String {
    let mut lines = vec![format!("[Question: {name}]")];
    for question in array_at(input, "questions") {
        lines.push(format!("  {}", str_at(question, "question")));
        for option in array_at(question, "options") {
            lines.push(format!(
                "    - {}: {}",
                str_at(option, "label"),
                str_at(option, "description")
            ));
        }
    }
    lines.join("\n")
}

/// String field of a JSON object, or `""`.
pub(crate) fn str_at<'a>(value: &'a Value, key: &str) -> &'a str {
    value.get(key).and_then(Value::as_str).unwrap_or("")
}

pub(crate) fn array_at<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    value
        .get(key)
        .and_then(Value::as_array)
        .map_or(&[], Vec::as_slice)
}

/// String or number field rendered as text.
fn scalar_at(value: &Value, key: &str) -> String {
    match value.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn first_of(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| non_empty(str_at(value, key)))
}

pub(crate) fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| s.to_string())
}

#[cfg(test)]
#[path = "content_tests.rs"]
mod tests;

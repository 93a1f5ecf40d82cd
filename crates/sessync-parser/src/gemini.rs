//! Gemini CLI sessions: one JSON document per chat under
//! `<root>/tmp/<project-hash>/chats/session-*.json`.

use serde_json::Value;
use sessync_core::models::{AgentKind, MessageRole, ToolCall};

use crate::content::{PART_SEPARATOR, array_at, non_empty, str_at};
use crate::project::UNKNOWN_PROJECT;
use crate::taxonomy::normalize_tool_category;
use crate::time::{Bounds, parse_timestamp};
use crate::turns::{Turn, assemble};
use crate::{ParseError, ParseInput, ParseOutput, ParsedSession, Result, SessionMeta};

/// Parse a Gemini CLI chat file.
pub fn parse(input: &ParseInput<'_>) -> Result<ParseOutput> {
    let root: Value = serde_json::from_slice(input.bytes)
        .map_err(|e| ParseError::format(AgentKind::Gemini, format!("invalid JSON: {e}")))?;
    if !root.is_object() {
        return Err(ParseError::format(
            AgentKind::Gemini,
            "top-level value is not an object",
        ));
    }
    let Some(session_id) = non_empty(str_at(&root, "sessionId")) else {
        return Err(ParseError::format(AgentKind::Gemini, "missing sessionId"));
    };

    let mut bounds = Bounds::default();
    bounds.observe(root.get("startTime").and_then(parse_timestamp));
    bounds.observe(root.get("lastUpdated").and_then(parse_timestamp));

    let mut output = ParseOutput::default();
    let mut turns = Vec::new();

    for message in array_at(&root, "messages") {
        let role = match str_at(message, "type") {
            "user" => MessageRole::User,
            "gemini" | "model" => MessageRole::Assistant,
            _ => continue,
        };
        let timestamp = message.get("timestamp").and_then(parse_timestamp);
        bounds.observe(timestamp);

        let (content, unknown) = message_text(message);
        output.unknown_blocks += unknown;

        let mut parts = Vec::new();
        if !content.is_empty() {
            parts.push(content);
        }
        let calls = array_at(message, "toolCalls");
        let mut tool_calls = Vec::with_capacity(calls.len());
        for call in calls {
            parts.push(format_tool_call(call));
            if let Some(name) = non_empty(str_at(call, "name")) {
                tool_calls.push(tool_call(call, name));
            }
        }

        let mut turn = Turn::text(role, parts.join(PART_SEPARATOR), timestamp);
        turn.has_thinking = array_at(message, "thoughts")
            .iter()
            .any(|t| !str_at(t, "description").is_empty());
        turn.has_tool_use = !calls.is_empty();
        turn.tool_calls = tool_calls;
        turns.push(turn);
    }

    let id = format!("{}{session_id}", AgentKind::Gemini.id_prefix());
    let assembled = assemble(&id, turns);
    let meta = SessionMeta {
        agent: AgentKind::Gemini,
        id,
        project: input
            .project
            .map_or_else(|| UNKNOWN_PROJECT.to_string(), str::to_string),
        parent_session_id: None,
        relationship: None,
        bounds,
    };
    output
        .sessions
        .push(ParsedSession::build(input, meta, assembled));
    Ok(output)
}

/// Message text from a plain string or a list of parts.
fn message_text(message: &Value) -> (String, usize) {
    match message.get("content") {
        Some(Value::String(text)) => (text.clone(), 0),
        Some(Value::Array(parts)) => {
            let mut texts = Vec::new();
            let mut unknown = 0;
            for part in parts {
                match part.get("text").and_then(Value::as_str) {
                    Some(text) if !text.is_empty() => texts.push(text),
                    Some(_) => {}
                    None => unknown += 1,
                }
            }
            (texts.join(PART_SEPARATOR), unknown)
        }
        _ => (String::new(), 0),
    }
}

fn tool_call(call: &Value, name: String) -> ToolCall {
    let args = call.get("args").filter(|a| !a.is_null());
    ToolCall {
        category: normalize_tool_category(&name).to_string(),
        tool_use_id: non_empty(str_at(call, "id")),
        input_json: args.map(Value::to_string),
        result_content_length: call
            .get("resultDisplay")
            .and_then(Value::as_str)
            .map(|s| i64::try_from(s.len()).unwrap_or(i64::MAX)),
        tool_name: name,
        ..ToolCall::default()
    }
}

/// Placeholder text for a Gemini tool call.
pub fn format_tool_call(call: &Value) -> String {
    let name = str_at(call, "name");
    let args = call.get("args").unwrap_or(&Value::Null);

    match name {
        "read_file" => format!("[Read: {}]", str_at(args, "file_path")),
        "write_file" | "edit_file" => format!("[Write: {}]", str_at(args, "file_path")),
        "run_command" | "execute_command" | "run_shell_command" => {
            format!("[Bash]\n$ {}", str_at(args, "command"))
        }
        "list_directory" => format!("[List: {}]", str_at(args, "dir_path")),
        "search_files" | "grep" | "search_file_content" => {
            let query = non_empty(str_at(args, "query"))
                .unwrap_or_else(|| str_at(args, "pattern").to_string());
            format!("[Grep: {query}]")
        }
        _ => {
            let label = non_empty(str_at(call, "displayName")).unwrap_or_else(|| name.to_string());
            format!("[Tool: {label}]")
        }
    }
}

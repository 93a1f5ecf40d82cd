//! GitHub Copilot CLI sessions: an event log per session under
//! `<root>/session-state/`, either `<id>.jsonl` or `<id>/events.jsonl`.

use serde_json::{Map, Value};
use sessync_core::models::{AgentKind, MessageRole, ToolCall};

use crate::codex::tool_header;
use crate::content::{ToolResult, array_at, non_empty, str_at};
use crate::lines::read_json_lines;
use crate::project::{UNKNOWN_PROJECT, project_from_cwd};
use crate::taxonomy::normalize_tool_category;
use crate::time::{Bounds, parse_timestamp};
use crate::turns::{Turn, assemble};
use crate::{ParseError, ParseInput, ParseOutput, ParsedSession, Result, SessionMeta};

/// File name of the directory layout's event log.
pub const EVENTS_FILE: &str = "events.jsonl";

/// Parse a Copilot CLI event log. Logs without any message text yield no
/// session.
pub fn parse(input: &ParseInput<'_>) -> Result<ParseOutput> {
    let lines = read_json_lines(input.bytes);
    if lines.records.is_empty() && lines.malformed > 0 {
        return Err(ParseError::format(
            AgentKind::Copilot,
            "no valid JSON records",
        ));
    }

    let mut output = ParseOutput {
        malformed_records: lines.malformed,
        ..ParseOutput::default()
    };
    let mut bounds = Bounds::default();
    let mut session_id: Option<String> = None;
    let mut project: Option<String> = None;
    let mut turns: Vec<Turn> = Vec::new();

    for record in &lines.records {
        let timestamp = record.get("timestamp").and_then(parse_timestamp);
        bounds.observe(timestamp);
        let data = record.get("data").unwrap_or(&Value::Null);

        match str_field(record, "type") {
            "session.start" => {
                session_id = non_empty(str_at(data, "sessionId")).or(session_id);
                let context = data.get("context").unwrap_or(&Value::Null);
                let branch = non_empty(str_at(context, "branch"));
                if let Some(name) = non_empty(str_at(context, "cwd"))
                    .and_then(|cwd| project_from_cwd(&cwd, branch.as_deref()))
                {
                    project = Some(name);
                }
            }
            "user.message" => {
                let content = str_at(data, "content").trim();
                if !content.is_empty() {
                    turns.push(Turn::text(MessageRole::User, content.to_string(), timestamp));
                }
            }
            "assistant.message" => {
                if let Some(turn) = assistant_turn(data, timestamp) {
                    turns.push(turn);
                }
            }
            "tool.execution_complete" => {
                let Some(id) = non_empty(str_at(data, "toolCallId")) else {
                    continue;
                };
                let mut turn = Turn::text(MessageRole::User, String::new(), timestamp);
                turn.tool_results.push(ToolResult {
                    tool_use_id: id,
                    content_length: text_or_raw(data.get("result")).len(),
                });
                turns.push(turn);
            }
            "assistant.reasoning" => {
                if let Some(last) = turns
                    .iter_mut()
                    .rev()
                    .find(|t| t.role == MessageRole::Assistant)
                {
                    last.has_thinking = true;
                }
            }
            _ => {}
        }
    }

    if turns.iter().all(|t| t.content.is_empty()) {
        return Ok(output);
    }

    let raw_id = session_id.unwrap_or_else(|| id_from_path(input));
    let id = format!("{}{raw_id}", AgentKind::Copilot.id_prefix());
    let assembled = assemble(&id, turns);
    let meta = SessionMeta {
        agent: AgentKind::Copilot,
        id,
        project: project.unwrap_or_else(|| UNKNOWN_PROJECT.to_string()),
        parent_session_id: None,
        relationship: None,
        bounds,
    };
    output
        .sessions
        .push(ParsedSession::build(input, meta, assembled));
    Ok(output)
}

fn assistant_turn(data: &Value, timestamp: Option<chrono::DateTime<chrono::Utc>>) -> Option<Turn> {
    let content = str_at(data, "content").trim();
    let tool_calls: Vec<ToolCall> = array_at(data, "toolRequests")
        .iter()
        .filter_map(|request| {
            let name = non_empty(str_at(request, "name"))?;
            let args = text_or_raw(request.get("arguments"));
            Some(ToolCall {
                category: normalize_tool_category(&name).to_string(),
                tool_use_id: non_empty(str_at(request, "toolCallId")),
                input_json: (!args.is_empty()).then_some(args),
                tool_name: name,
                ..ToolCall::default()
            })
        })
        .collect();

    let content = if content.is_empty() {
        tool_calls
            .iter()
            .map(|call| tool_header(&call.category, &call.tool_name))
            .collect::<Vec<_>>()
            .join("\n")
    } else {
        content.to_string()
    };
    if content.is_empty() && tool_calls.is_empty() {
        return None;
    }

    let mut turn = Turn::text(MessageRole::Assistant, content, timestamp);
    turn.has_thinking = !str_at(data, "reasoningText").is_empty();
    turn.has_tool_use = !tool_calls.is_empty();
    turn.tool_calls = tool_calls;
    Some(turn)
}

/// A string value as-is, anything else as its JSON text.
fn text_or_raw(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// `<id>/events.jsonl` names the session by its directory, `<id>.jsonl` by
/// its stem.
fn id_from_path(input: &ParseInput<'_>) -> String {
    let is_events = input
        .path
        .file_name()
        .is_some_and(|name| name == EVENTS_FILE);
    if is_events && let Some(dir) = input.path.parent().and_then(|p| p.file_name()) {
        return dir.to_string_lossy().into_owned();
    }
    input.file_stem()
}

fn str_field<'a>(record: &'a Map<String, Value>, key: &str) -> &'a str {
    record.get(key).and_then(Value::as_str).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use serde_json::json;

    use super::*;

    fn events(records: &[Value]) -> Vec<u8> {
        records
            .iter()
            .map(|r| format!("{r}\n"))
            .collect::<String>()
            .into_bytes()
    }

    fn parse_at(path: &str, bytes: &[u8]) -> ParseOutput {
        parse(&ParseInput::new(bytes, Path::new(path), "laptop")).expect("parse")
    }

    #[test]
    fn event_log_becomes_a_session() {
        let bytes = events(&[
            json!({"type": "session.start", "timestamp": "2025-02-01T09:00:00Z",
                   "data": {"sessionId": "c0ffee", "context": {"cwd": "/home/al/code/my-cli", "branch": "main"}}}),
            json!({"type": "user.message", "timestamp": "2025-02-01T09:00:05Z",
                   "data": {"content": "  list the files  "}}),
            json!({"type": "assistant.message", "timestamp": "2025-02-01T09:00:06Z",
                   "data": {"content": "", "toolRequests": [
                       {"name": "bash", "toolCallId": "t1", "arguments": {"command": "ls"}}
                   ]}}),
            json!({"type": "assistant.reasoning", "timestamp": "2025-02-01T09:00:06Z", "data": {}}),
            json!({"type": "tool.execution_complete", "timestamp": "2025-02-01T09:00:07Z",
                   "data": {"toolCallId": "t1", "result": "a.rs\nb.rs"}}),
            json!({"type": "assistant.message", "timestamp": "2025-02-01T09:00:09Z",
                   "data": {"content": "Two files.", "reasoningText": "count them"}}),
        ]);

        let output = parse_at("/c/session-state/c0ffee.jsonl", &bytes);
        let parsed = &output.sessions[0];
        assert_eq!(parsed.session.id, "copilot:c0ffee");
        assert_eq!(parsed.session.agent, AgentKind::Copilot);
        assert_eq!(parsed.session.project, "my_cli");
        assert_eq!(parsed.session.first_message.as_deref(), Some("list the files"));
        assert_eq!(parsed.session.user_message_count, 1);

        let contents: Vec<&str> = parsed.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["list the files", "[Bash: bash]", "Two files."]);
        assert!(parsed.messages[1].has_thinking, "reasoning marks the prior reply");
        assert_eq!(parsed.messages[1].tool_calls[0].result_content_length, Some(9));
        assert_eq!(
            parsed.messages[1].tool_calls[0].input_json.as_deref(),
            Some(r#"{"command":"ls"}"#)
        );
        assert!(parsed.messages[2].has_thinking);
    }

    #[test]
    fn id_falls_back_to_directory_name() {
        let bytes = events(&[json!({"type": "user.message", "data": {"content": "hi"}})]);
        let output = parse_at("/c/session-state/abc-123/events.jsonl", &bytes);
        assert_eq!(output.sessions[0].session.id, "copilot:abc-123");
        assert_eq!(output.sessions[0].session.project, "unknown");

        let output = parse_at("/c/session-state/def-456.jsonl", &bytes);
        assert_eq!(output.sessions[0].session.id, "copilot:def-456");
    }

    #[test]
    fn log_without_messages_is_skipped() {
        let bytes = events(&[
            json!({"type": "session.start", "data": {"sessionId": "quiet"}}),
            json!({"type": "user.message", "data": {"content": "   "}}),
        ]);
        assert!(parse_at("/c/session-state/quiet.jsonl", &bytes).sessions.is_empty());
    }

    #[test]
    fn garbage_is_a_format_error() {
        let err = parse(&ParseInput::new(b"nope\n", Path::new("/c/x.jsonl"), "m"))
            .expect_err("garbage");
        assert!(matches!(err, ParseError::Format { agent: AgentKind::Copilot, .. }));
    }
}

//! pi agent sessions: `<root>/<encoded-cwd>/<id>.jsonl`, a `session` header
//! line followed by message, model-change and compaction entries.

use std::path::Path;

use serde_json::{Map, Value};
use sessync_core::models::{AgentKind, MessageRole, Relationship, ToolCall};

use crate::content::{ToolResult, array_at, non_empty, str_at};
use crate::lines::read_json_lines;
use crate::project::{UNKNOWN_PROJECT, project_from_cwd};
use crate::taxonomy::normalize_tool_category;
use crate::time::{Bounds, parse_timestamp};
use crate::turns::{Turn, assemble};
use crate::{ParseError, ParseInput, ParseOutput, ParsedSession, Result, SessionMeta};

/// Whether the first non-blank line of a file is a pi session header.
pub fn is_session_header(line: &[u8]) -> bool {
    serde_json::from_slice::<Value>(line.trim_ascii())
        .is_ok_and(|header| str_at(&header, "type") == "session")
}

/// Parse a pi session file.
pub fn parse(input: &ParseInput<'_>) -> Result<ParseOutput> {
    let first = input
        .bytes
        .split(|b| *b == b'\n')
        .map(<[u8]>::trim_ascii)
        .find(|line| !line.is_empty());
    let header: Value = first
        .and_then(|line| serde_json::from_slice(line).ok())
        .filter(|header: &Value| str_at(header, "type") == "session")
        .ok_or_else(|| ParseError::format(AgentKind::Pi, "missing session header"))?;

    let lines = read_json_lines(input.bytes);
    let mut output = ParseOutput {
        malformed_records: lines.malformed,
        ..ParseOutput::default()
    };

    let mut bounds = Bounds::default();
    bounds.observe(header.get("timestamp").and_then(parse_timestamp));

    let mut turns = Vec::new();
    for record in &lines.records {
        let timestamp = entry_timestamp(record);
        let turn = match str_field(record, "type") {
            "message" => message_turn(record, timestamp),
            "model_change" => Some(Turn::text(
                MessageRole::System,
                format!(
                    "Model changed to {}/{}",
                    str_field(record, "provider"),
                    str_field(record, "modelId")
                ),
                timestamp,
            )),
            "compaction" => Some(Turn::text(
                MessageRole::System,
                non_empty(str_field(record, "summary"))
                    .unwrap_or_else(|| "[session compacted]".to_string()),
                timestamp,
            )),
            _ => None,
        };
        if let Some(turn) = turn {
            bounds.observe(turn.timestamp);
            turns.push(turn);
        }
    }

    let raw_id = non_empty(str_at(&header, "id")).unwrap_or_else(|| input.file_stem());
    let id = format!("{}{raw_id}", AgentKind::Pi.id_prefix());
    let parent_session_id = non_empty(str_at(&header, "branchedFrom")).map(|from| {
        let stem = Path::new(&from)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("{}{stem}", AgentKind::Pi.id_prefix())
    });
    let project = input
        .project
        .map(str::to_string)
        .or_else(|| non_empty(str_at(&header, "cwd")).and_then(|cwd| project_from_cwd(&cwd, None)))
        .unwrap_or_else(|| UNKNOWN_PROJECT.to_string());

    let assembled = assemble(&id, turns);
    let meta = SessionMeta {
        agent: AgentKind::Pi,
        id,
        project,
        relationship: parent_session_id.as_ref().map(|_| Relationship::Fork),
        parent_session_id,
        bounds,
    };
    output
        .sessions
        .push(ParsedSession::build(input, meta, assembled));
    Ok(output)
}

fn message_turn(
    record: &Map<String, Value>,
    timestamp: Option<chrono::DateTime<chrono::Utc>>,
) -> Option<Turn> {
    let message = record.get("message")?;
    let content = message.get("content").unwrap_or(&Value::Null);

    match str_at(message, "role") {
        "user" => {
            let text = match content {
                Value::String(text) => text.clone(),
                _ => text_blocks(content),
            };
            Some(Turn::text(MessageRole::User, text, timestamp))
        }
        "assistant" => {
            let mut turn = Turn::text(MessageRole::Assistant, text_blocks(content), timestamp);
            for block in content.as_array().map_or(&[][..], Vec::as_slice) {
                match str_at(block, "type") {
                    "thinking" => turn.has_thinking = true,
                    "toolCall" => {
                        let name = str_at(block, "name");
                        turn.has_tool_use = true;
                        turn.tool_calls.push(ToolCall {
                            tool_name: name.to_string(),
                            category: normalize_tool_category(name).to_string(),
                            tool_use_id: non_empty(str_at(block, "id")),
                            input_json: block
                                .get("arguments")
                                .filter(|args| !args.is_null())
                                .map(Value::to_string),
                            ..ToolCall::default()
                        });
                    }
                    _ => {}
                }
            }
            Some(turn)
        }
        "toolResult" => {
            let mut turn = Turn::text(MessageRole::User, String::new(), timestamp);
            turn.tool_results.push(ToolResult {
                tool_use_id: str_at(message, "toolCallId").to_string(),
                content_length: array_at(message, "content")
                    .iter()
                    .map(|block| str_at(block, "text").len())
                    .sum(),
            });
            Some(turn)
        }
        _ => None,
    }
}

/// Text blocks of a content list, one per line.
fn text_blocks(content: &Value) -> String {
    content
        .as_array()
        .map_or(&[][..], Vec::as_slice)
        .iter()
        .filter(|block| str_at(block, "type") == "text")
        .map(|block| str_at(block, "text"))
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Entry `timestamp`, else the message's epoch-millisecond `timestamp`.
fn entry_timestamp(record: &Map<String, Value>) -> Option<chrono::DateTime<chrono::Utc>> {
    record.get("timestamp").and_then(parse_timestamp).or_else(|| {
        record
            .get("message")
            .and_then(|m| m.get("timestamp"))
            .and_then(Value::as_i64)
            .filter(|ms| *ms != 0)
            .and_then(chrono::DateTime::from_timestamp_millis)
    })
}

fn str_field<'a>(record: &'a Map<String, Value>, key: &str) -> &'a str {
    record.get(key).and_then(Value::as_str).unwrap_or("")
}

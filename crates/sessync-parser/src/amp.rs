//! Amp threads: one JSON document per thread at `<root>/T-*.json`.

use chrono::DateTime;
use serde_json::Value;
use sessync_core::models::{AgentKind, MessageRole};

use crate::content::{array_at, extract_content, non_empty, str_at};
use crate::project::normalize_name;
use crate::time::{Bounds, parse_timestamp};
use crate::turns::{Turn, assemble, preview};
use crate::{ParseError, ParseInput, ParseOutput, ParsedSession, Result, SessionMeta};

/// Project label for threads that carry no workspace tree.
const DEFAULT_PROJECT: &str = "amp";

/// Parse an Amp thread file. Threads without a single kept message yield no
/// session.
pub fn parse(input: &ParseInput<'_>) -> Result<ParseOutput> {
    let root: Value = serde_json::from_slice(input.bytes)
        .map_err(|e| ParseError::format(AgentKind::Amp, format!("invalid JSON: {e}")))?;
    let Some(thread_id) = non_empty(str_at(&root, "id")) else {
        return Err(ParseError::format(AgentKind::Amp, "missing id"));
    };

    let bounds = Bounds {
        start: root
            .get("created")
            .and_then(Value::as_i64)
            .filter(|ms| *ms > 0)
            .and_then(DateTime::from_timestamp_millis),
        end: root
            .get("meta")
            .map(|meta| array_at(meta, "traces"))
            .and_then(<[Value]>::last)
            .and_then(|trace| trace.get("endTime"))
            .and_then(parse_timestamp),
    };

    let project = root
        .pointer("/env/initial/trees/0/displayName")
        .and_then(Value::as_str)
        .and_then(non_empty)
        .map_or_else(|| DEFAULT_PROJECT.to_string(), |name| normalize_name(&name));

    let mut output = ParseOutput::default();
    let mut turns = Vec::new();
    for message in array_at(&root, "messages") {
        let role = match str_at(message, "role") {
            "user" => MessageRole::User,
            "assistant" => MessageRole::Assistant,
            _ => continue,
        };
        let extracted = extract_content(message.get("content").unwrap_or(&Value::Null));
        output.unknown_blocks += extracted.unknown_blocks;
        if extracted.content.trim().is_empty() && extracted.tool_results.is_empty() {
            continue;
        }
        turns.push(Turn::extracted(role, extracted, None));
    }
    if turns.is_empty() {
        return Ok(output);
    }

    let id = format!("{}{thread_id}", AgentKind::Amp.id_prefix());
    let mut assembled = assemble(&id, turns);
    if let Some(title) = non_empty(str_at(&root, "title")) {
        assembled.first_message = Some(preview(&title));
    }

    let meta = SessionMeta {
        agent: AgentKind::Amp,
        id,
        project,
        parent_session_id: None,
        relationship: None,
        bounds,
    };
    output
        .sessions
        .push(ParsedSession::build(input, meta, assembled));
    Ok(output)
}

/// Whether `name` looks like an Amp thread id (`T-` then id characters).
pub fn is_thread_id(name: &str) -> bool {
    let Some(rest) = name.strip_prefix("T-") else {
        return false;
    };
    rest.chars().next().is_some_and(char::is_alphanumeric)
        && rest
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use serde_json::json;

    use super::*;

    fn parse_doc(doc: &Value) -> Result<ParseOutput> {
        let bytes = doc.to_string().into_bytes();
        parse(&ParseInput::new(
            &bytes,
            Path::new("/amp/threads/T-abc123.json"),
            "laptop",
        ))
    }

    #[test]
    fn thread_becomes_one_session() {
        let doc = json!({
            "id": "T-abc123",
            "created": 1_735_725_600_000_i64,
            "title": "Fix the flaky test",
            "env": {"initial": {"trees": [{"displayName": "web-app"}]}},
            "meta": {"traces": [
                {"endTime": "2025-01-01T10:05:00Z"},
                {"endTime": "2025-01-01T10:09:00Z"}
            ]},
            "messages": [
                {"role": "user", "content": [{"type": "text", "text": "why does it flake?"}]},
                {"role": "assistant", "content": [
                    {"type": "thinking", "thinking": "hmm"},
                    {"type": "tool_use", "id": "tu1", "name": "Read", "input": {"path": "a.rs"}}
                ]},
                {"role": "user", "content": [{"type": "tool_result", "tool_use_id": "tu1", "content": "12345"}]},
                {"role": "info", "content": "ignored"}
            ]
        });

        let output = parse_doc(&doc).expect("parse");
        let parsed = &output.sessions[0];
        assert_eq!(parsed.session.id, "amp:T-abc123");
        assert_eq!(parsed.session.agent, AgentKind::Amp);
        assert_eq!(parsed.session.project, "web_app");
        assert_eq!(parsed.session.first_message.as_deref(), Some("Fix the flaky test"));
        assert_eq!(
            parsed.session.started_at.map(|t| t.timestamp()),
            Some(1_735_725_600)
        );
        assert_eq!(
            parsed.session.ended_at,
            parse_timestamp(&json!("2025-01-01T10:09:00Z"))
        );

        assert_eq!(parsed.messages.len(), 2);
        assert!(parsed.messages[1].has_thinking);
        assert_eq!(parsed.messages[1].tool_calls[0].result_content_length, Some(5));
    }

    #[test]
    fn empty_thread_is_skipped() {
        let doc = json!({"id": "T-empty", "messages": [{"role": "user", "content": "  "}]});
        assert!(parse_doc(&doc).expect("parse").sessions.is_empty());
    }

    #[test]
    fn missing_id_is_a_format_error() {
        let err = parse_doc(&json!({"messages": []})).expect_err("no id");
        assert!(matches!(err, ParseError::Format { agent: AgentKind::Amp, .. }));
    }

    #[test]
    fn project_defaults_when_no_tree() {
        let doc = json!({"id": "T-x1", "messages": [{"role": "user", "content": "hi"}]});
        let output = parse_doc(&doc).expect("parse");
        assert_eq!(output.sessions[0].session.project, "amp");
        assert_eq!(output.sessions[0].session.first_message.as_deref(), Some("hi"));
    }

    #[test]
    fn thread_id_shape() {
        assert!(is_thread_id("T-abc123"));
        assert!(is_thread_id("T-0195-ab_c"));
        assert!(!is_thread_id("T-"));
        assert!(!is_thread_id("T--x"));
        assert!(!is_thread_id("thread-1"));
        assert!(!is_thread_id("T-a/b"));
    }
}

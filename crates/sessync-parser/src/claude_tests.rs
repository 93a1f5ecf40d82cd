use std::path::Path;

use serde_json::{Value, json};
use sessync_core::models::{AgentKind, MessageRole, Relationship};

use super::{FORK_THRESHOLD, is_system_message, parse};
use crate::{ParseError, ParseInput, ParseOutput};

fn jsonl(records: &[Value]) -> Vec<u8> {
    records
        .iter()
        .map(Value::to_string)
        .collect::<Vec<_>>()
        .join("\n")
        .into_bytes()
}

fn parse_as(stem: &str, bytes: &[u8]) -> crate::Result<ParseOutput> {
    let path = format!("/logs/-home-alice-code-demo/{stem}.jsonl");
    let input = ParseInput {
        project: Some("demo"),
        ..ParseInput::new(bytes, Path::new(&path), "laptop")
    };
    parse(&input)
}

fn user(uuid: &str, parent: Option<&str>, text: &str) -> Value {
    json!({
        "type": "user",
        "uuid": uuid,
        "parentUuid": parent,
        "sessionId": "abc",
        "timestamp": "2025-01-01T10:00:00Z",
        "message": {"role": "user", "content": text}
    })
}

fn assistant(uuid: &str, parent: &str, text: &str) -> Value {
    json!({
        "type": "assistant",
        "uuid": uuid,
        "parentUuid": parent,
        "sessionId": "abc",
        "timestamp": "2025-01-01T10:00:05Z",
        "message": {"role": "assistant", "content": [{"type": "text", "text": text}]}
    })
}

fn contents(output: &ParseOutput, session: usize) -> Vec<&str> {
    output.sessions[session]
        .messages
        .iter()
        .map(|m| m.content.as_str())
        .collect()
}

#[test]
fn linear_conversation_pairs_tool_results() {
    let bytes = jsonl(&[
        json!({"type": "user", "sessionId": "abc", "timestamp": "2025-01-01T10:00:00Z",
               "message": {"role": "user", "content": "read the readme"}}),
        json!({"type": "assistant", "sessionId": "abc", "timestamp": "2025-01-01T10:00:02Z",
               "message": {"role": "assistant", "content": [
                   {"type": "thinking", "thinking": "hmm"},
                   {"type": "tool_use", "id": "toolu_1", "name": "Read",
                    "input": {"file_path": "README.md"}}
               ]}}),
        json!({"type": "user", "sessionId": "abc", "timestamp": "2025-01-01T10:00:03Z",
               "message": {"role": "user", "content": [
                   {"type": "tool_result", "tool_use_id": "toolu_1", "content": "# Demo"}
               ]}}),
        json!({"type": "assistant", "sessionId": "abc", "timestamp": "2025-01-01T10:00:09Z",
               "message": {"role": "assistant", "content": [{"type": "text", "text": "It is a demo."}]}}),
    ]);

    let output = parse_as("abc", &bytes).expect("parse");
    assert_eq!(output.sessions.len(), 1);
    assert!(!output.is_partial());

    let parsed = &output.sessions[0];
    assert_eq!(parsed.session.id, "abc");
    assert_eq!(parsed.session.agent, AgentKind::Claude);
    assert_eq!(parsed.session.machine, "laptop");
    assert_eq!(parsed.session.project, "demo");
    assert_eq!(parsed.session.message_count, 3);
    assert_eq!(parsed.session.user_message_count, 1);
    assert_eq!(parsed.session.first_message.as_deref(), Some("read the readme"));
    assert!(parsed.session.parent_session_id.is_none());

    let ordinals: Vec<i64> = parsed.messages.iter().map(|m| m.ordinal).collect();
    assert_eq!(ordinals, vec![0, 1, 2]);

    let call_msg = &parsed.messages[1];
    assert_eq!(call_msg.role, MessageRole::Assistant);
    assert!(call_msg.has_thinking);
    assert!(call_msg.has_tool_use);
    assert_eq!(call_msg.content, "[Read: README.md]");
    assert_eq!(call_msg.tool_calls[0].result_content_length, Some(6));

    let started = parsed.session.started_at.expect("started");
    let ended = parsed.session.ended_at.expect("ended");
    assert_eq!((ended - started).num_seconds(), 9);
}

#[test]
fn injected_user_text_is_skipped() {
    let bytes = jsonl(&[
        json!({"type": "user", "isMeta": true, "message": {"content": "caveat text"}}),
        json!({"type": "user", "isCompactSummary": true, "message": {"content": "summary"}}),
        json!({"type": "user", "message": {"content": "<command-name>/clear</command-name>"}}),
        json!({"type": "user", "message": {"content": "[Request interrupted by user]"}}),
        json!({"type": "user", "message": {"content": "real question"}}),
        json!({"type": "summary", "summary": "ignored"}),
    ]);

    let output = parse_as("abc", &bytes).expect("parse");
    assert_eq!(contents(&output, 0), vec!["real question"]);
    assert_eq!(output.sessions[0].session.user_message_count, 1);
}

#[test]
fn one_corrupt_line_is_skipped() {
    let mut bytes = jsonl(&[
        json!({"type": "user", "message": {"content": "one"}}),
        json!({"type": "assistant", "message": {"content": "two"}}),
    ]);
    bytes.extend_from_slice(b"\n{\"type\": \"user\", \"message\": {\"cont\n");
    bytes.extend_from_slice(&jsonl(&[
        json!({"type": "user", "message": {"content": "three"}}),
    ]));

    let output = parse_as("abc", &bytes).expect("parse");
    assert!(output.is_partial());
    assert_eq!(output.malformed_records, 1);
    assert_eq!(contents(&output, 0), vec!["one", "two", "three"]);
}

#[test]
fn no_valid_records_is_a_format_error() {
    let err = parse_as("abc", b"not json\n{broken").expect_err("should fail");
    assert!(matches!(
        err,
        ParseError::Format {
            agent: AgentKind::Claude,
            ..
        }
    ));
    assert!(parse_as("abc", b"").is_err());
}

#[test]
fn metadata_only_file_yields_empty_session() {
    let bytes = jsonl(&[json!({"type": "summary", "summary": "x", "leafUuid": "u"})]);
    let output = parse_as("abc", &bytes).expect("parse");
    assert_eq!(output.sessions.len(), 1);
    assert!(output.sessions[0].messages.is_empty());
    assert_eq!(output.sessions[0].session.message_count, 0);
}

#[test]
fn embedded_session_id_marks_continuation() {
    let bytes = jsonl(&[json!({"type": "user", "sessionId": "older",
                               "message": {"content": "carry on"}})]);
    let output = parse_as("newer", &bytes).expect("parse");
    let session = &output.sessions[0].session;
    assert_eq!(session.parent_session_id.as_deref(), Some("older"));
    assert_eq!(session.relationship, Some(Relationship::Continuation));
}

#[test]
fn agent_file_is_a_subagent_of_its_session() {
    let bytes = jsonl(&[json!({"type": "user", "sessionId": "main-1",
                               "message": {"content": "explore the repo"}})]);
    let output = parse_as("agent-7f3a", &bytes).expect("parse");
    let session = &output.sessions[0].session;
    assert_eq!(session.id, "agent-7f3a");
    assert_eq!(session.parent_session_id.as_deref(), Some("main-1"));
    assert_eq!(session.relationship, Some(Relationship::Subagent));
}

#[test]
fn short_retry_follows_latest_branch() {
    let bytes = jsonl(&[
        user("u1", None, "start"),
        assistant("a1", "u1", "ok"),
        user("u2", Some("a1"), "old attempt"),
        assistant("a2", "u2", "old answer"),
        user("u3", Some("a1"), "new attempt"),
        assistant("a3", "u3", "new answer"),
    ]);

    let output = parse_as("abc", &bytes).expect("parse");
    assert_eq!(output.sessions.len(), 1);
    assert_eq!(
        contents(&output, 0),
        vec!["start", "ok", "new attempt", "new answer"]
    );
}

#[test]
fn long_branch_splits_off_a_fork() {
    let mut records = vec![user("u1", None, "start"), assistant("a1", "u1", "ok")];
    let mut parent = "a1".to_string();
    for i in 0..=FORK_THRESHOLD {
        let u = format!("first-u{i}");
        let a = format!("first-a{i}");
        records.push(user(&u, Some(&parent), &format!("first {i}")));
        records.push(assistant(&a, &u, &format!("reply {i}")));
        parent = a;
    }
    records.push(user("second", Some("a1"), "other idea"));
    records.push(assistant("second-a", "second", "other reply"));

    let output = parse_as("abc", &jsonl(&records)).expect("parse");
    assert_eq!(output.sessions.len(), 2);

    let main = &output.sessions[0];
    assert_eq!(main.session.id, "abc");
    assert_eq!(main.messages.len(), 2 + 2 * (FORK_THRESHOLD + 1));
    assert_eq!(main.messages[2].content, "first 0");

    let fork = &output.sessions[1];
    assert_eq!(fork.session.id, "abc-second");
    assert_eq!(fork.session.parent_session_id.as_deref(), Some("abc"));
    assert_eq!(fork.session.relationship, Some(Relationship::Fork));
    assert_eq!(contents(&output, 1), vec!["other idea", "other reply"]);
    assert_eq!(fork.messages[0].ordinal, 0);
}

#[test]
fn dangling_parent_falls_back_to_file_order() {
    let bytes = jsonl(&[
        user("u1", None, "start"),
        assistant("a1", "missing", "ok"),
        user("u2", Some("a1"), "next"),
    ]);
    let output = parse_as("abc", &bytes).expect("parse");
    assert_eq!(output.sessions.len(), 1);
    assert_eq!(contents(&output, 0), vec!["start", "ok", "next"]);
}

#[test]
fn task_calls_link_to_subagent_sessions() {
    let bytes = jsonl(&[
        json!({"type": "user", "message": {"content": "spawn helpers"}}),
        json!({"type": "assistant", "message": {"content": [
            {"type": "tool_use", "id": "toolu_9", "name": "Task",
             "input": {"description": "Explore", "subagent_type": "general"}},
            {"type": "tool_use", "id": "toolu_10", "name": "Task",
             "input": {"description": "Check", "subagent_type": "general"}}
        ]}}),
        json!({"type": "queue-operation", "operation": "enqueue",
               "content": r#"{"tool_use_id":"toolu_9","task_id":"a1b2"}"#}),
        json!({"type": "queue-operation", "operation": "enqueue",
               "content": "<task-notification><task-id>c3d4</task-id><tool-use-id>toolu_10</tool-use-id></task-notification>"}),
    ]);

    let output = parse_as("abc", &bytes).expect("parse");
    let calls = &output.sessions[0].messages[1].tool_calls;
    assert_eq!(calls[0].subagent_session_id.as_deref(), Some("agent-a1b2"));
    assert_eq!(calls[1].subagent_session_id.as_deref(), Some("agent-c3d4"));
    assert_eq!(calls[0].category, "Task");
}

#[test]
fn cwd_overrides_directory_project() {
    let bytes = jsonl(&[json!({"type": "user", "cwd": "/home/alice/work/shop-feature-cart",
                               "gitBranch": "feature/cart",
                               "message": {"content": "hi"}})]);
    let output = parse_as("abc", &bytes).expect("parse");
    assert_eq!(output.sessions[0].session.project, "shop");
}

#[test]
fn snapshot_timestamps_extend_bounds() {
    let bytes = jsonl(&[
        json!({"type": "file-history-snapshot",
               "snapshot": {"timestamp": "2025-01-01T09:00:00Z"}}),
        json!({"type": "user", "timestamp": "2025-01-01T10:00:00Z",
               "message": {"content": "hi"}}),
    ]);
    let output = parse_as("abc", &bytes).expect("parse");
    let started = output.sessions[0].session.started_at.expect("started");
    assert_eq!(started.to_rfc3339(), "2025-01-01T09:00:00+00:00");
}

#[test]
fn system_prefix_detection() {
    assert!(is_system_message("  This session is being continued from a previous one"));
    assert!(is_system_message("<local-command-stdout>ok</local-command-stdout>"));
    assert!(!is_system_message("please continue"));
}

//! iFlow CLI sessions: Claude-shaped transcripts stored as
//! `<root>/<encoded-cwd>/session-<id>.jsonl`.

use sessync_core::models::AgentKind;

use crate::claude::{Dialect, parse_dialect};
use crate::{ParseInput, ParseOutput, Result};

/// File-name prefix of every iFlow session log.
pub const FILE_PREFIX: &str = "session-";

const IFLOW: Dialect = Dialect {
    agent: AgentKind::Iflow,
    stem_prefix: FILE_PREFIX,
};

/// Parse an iFlow session file.
pub fn parse(input: &ParseInput<'_>) -> Result<ParseOutput> {
    parse_dialect(input, &IFLOW)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use serde_json::{Value, json};
    use sessync_core::models::{MessageRole, Relationship};

    use super::*;
    use crate::ParseError;
    use crate::claude::FORK_THRESHOLD;

    fn jsonl(records: &[Value]) -> Vec<u8> {
        records
            .iter()
            .map(Value::to_string)
            .collect::<Vec<_>>()
            .join("\n")
            .into_bytes()
    }

    fn parse_as(stem: &str, bytes: &[u8]) -> Result<ParseOutput> {
        let path = format!("/iflow/projects/-home-al-code-kiln/{stem}.jsonl");
        let input = ParseInput {
            project: Some("kiln"),
            ..ParseInput::new(bytes, Path::new(&path), "laptop")
        };
        parse(&input)
    }

    fn entry(kind: &str, uuid: &str, parent: Option<&str>, text: &str) -> Value {
        json!({
            "type": kind,
            "uuid": uuid,
            "parentUuid": parent,
            "timestamp": "2025-03-03T12:00:00Z",
            "message": {"role": kind, "content": text}
        })
    }

    #[test]
    fn session_prefix_is_dropped_from_the_id() {
        let bytes = jsonl(&[
            json!({"type": "user", "timestamp": "2025-03-03T12:00:00Z", "isMeta": true,
                   "message": {"role": "user", "content": "<env>"}}),
            json!({"type": "user", "timestamp": "2025-03-03T12:00:01Z",
                   "message": {"role": "user", "content": "fire the kiln"}}),
            json!({"type": "assistant", "timestamp": "2025-03-03T12:00:02Z",
                   "message": {"role": "assistant", "content": [{"type": "text", "text": "Firing."}]}}),
        ]);

        let output = parse_as("session-k1", &bytes).expect("parse");
        let parsed = &output.sessions[0];
        assert_eq!(parsed.session.id, "iflow:k1");
        assert_eq!(parsed.session.agent, AgentKind::Iflow);
        assert_eq!(parsed.session.project, "kiln");
        assert_eq!(parsed.session.first_message.as_deref(), Some("fire the kiln"));
        assert_eq!(parsed.messages.len(), 2);
        assert_eq!(parsed.messages[1].role, MessageRole::Assistant);
        assert!(parsed.session.parent_session_id.is_none());
    }

    #[test]
    fn other_session_id_marks_continuation() {
        let bytes = jsonl(&[json!({"type": "user", "sessionId": "session-k0",
            "message": {"role": "user", "content": "carry on"}})]);
        let session = &parse_as("session-k2", &bytes).expect("parse").sessions[0].session;
        assert_eq!(session.parent_session_id.as_deref(), Some("iflow:k0"));
        assert_eq!(session.relationship, Some(Relationship::Continuation));

        let bytes = jsonl(&[json!({"type": "user", "sessionId": "k2",
            "message": {"role": "user", "content": "same one"}})]);
        let session = &parse_as("session-k2", &bytes).expect("parse").sessions[0].session;
        assert!(session.parent_session_id.is_none());
    }

    #[test]
    fn long_branch_forks_under_the_iflow_id() {
        let mut records = vec![
            entry("user", "u0", None, "start"),
            entry("assistant", "a0", Some("u0"), "ready"),
        ];
        let mut parent = "a0".to_string();
        for i in 0..=FORK_THRESHOLD {
            let (u, a) = (format!("u{}", i + 1), format!("a{}", i + 1));
            records.push(entry("user", &u, Some(&parent), &format!("step {i}")));
            records.push(entry("assistant", &a, Some(&u), "ok"));
            parent = a;
        }
        records.push(entry("user", "alt", Some("a0"), "another way"));

        let output = parse_as("session-k3", &jsonl(&records)).expect("parse");
        assert_eq!(output.sessions.len(), 2);
        let fork = &output.sessions[1].session;
        assert_eq!(fork.id, "iflow:k3-alt");
        assert_eq!(fork.parent_session_id.as_deref(), Some("iflow:k3"));
        assert_eq!(fork.relationship, Some(Relationship::Fork));
    }

    #[test]
    fn empty_file_is_an_iflow_format_error() {
        let err = parse_as("session-k4", b"").expect_err("empty");
        assert!(matches!(err, ParseError::Format { agent: AgentKind::Iflow, .. }));
    }
}

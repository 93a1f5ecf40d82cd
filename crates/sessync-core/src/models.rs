//! Domain models for normalized agent sessions.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The agents whose on-disk session logs are understood.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Claude,
    Codex,
    Gemini,
    Copilot,
    Pi,
    Amp,
    Iflow,
}

impl AgentKind {
    /// Every supported agent, in a stable order.
    pub const ALL: [AgentKind; 7] = [
        AgentKind::Claude,
        AgentKind::Codex,
        AgentKind::Gemini,
        AgentKind::Copilot,
        AgentKind::Pi,
        AgentKind::Amp,
        AgentKind::Iflow,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AgentKind::Claude => "claude",
            AgentKind::Codex => "codex",
            AgentKind::Gemini => "gemini",
            AgentKind::Copilot => "copilot",
            AgentKind::Pi => "pi",
            AgentKind::Amp => "amp",
            AgentKind::Iflow => "iflow",
        }
    }

    /// Prefix of the session ids minted for this agent. Claude ids are bare.
    pub fn id_prefix(self) -> &'static str {
        match self {
            AgentKind::Claude => "",
            AgentKind::Codex => "codex:",
            AgentKind::Gemini => "gemini:",
            AgentKind::Copilot => "copilot:",
            AgentKind::Pi => "pi:",
            AgentKind::Amp => "amp:",
            AgentKind::Iflow => "iflow:",
        }
    }

    /// Split a session id into its agent and the agent's own identifier.
    pub fn split_session_id(id: &str) -> (AgentKind, &str) {
        AgentKind::ALL
            .into_iter()
            .filter(|agent| !agent.id_prefix().is_empty())
            .find_map(|agent| id.strip_prefix(agent.id_prefix()).map(|raw| (agent, raw)))
            .unwrap_or((AgentKind::Claude, id))
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "claude" | "claude-code" => Ok(AgentKind::Claude),
            "codex" => Ok(AgentKind::Codex),
            "gemini" | "gemini-cli" => Ok(AgentKind::Gemini),
            "copilot" | "copilot-cli" => Ok(AgentKind::Copilot),
            "pi" => Ok(AgentKind::Pi),
            "amp" => Ok(AgentKind::Amp),
            "iflow" | "iflow-cli" => Ok(AgentKind::Iflow),
            other => Err(format!("unknown agent kind '{other}'")),
        }
    }
}

/// Message roles after normalization.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    /// Map a raw role label to a normalized role, if it is one we keep.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_lowercase().as_str() {
            "user" | "human" => Some(MessageRole::User),
            "assistant" | "gemini" | "model" | "agent" => Some(MessageRole::Assistant),
            "system" | "developer" => Some(MessageRole::System),
            _ => None,
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
        }
    }
}

/// How a session relates to its parent session, when it has one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Relationship {
    /// A later branch split off a conversation tree.
    Fork,
    /// A session spawned by a tool call in the parent.
    Subagent,
    /// A session resumed from an earlier one.
    Continuation,
}

impl Relationship {
    pub fn as_str(self) -> &'static str {
        match self {
            Relationship::Fork => "fork",
            Relationship::Subagent => "subagent",
            Relationship::Continuation => "continuation",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "fork" => Some(Relationship::Fork),
            "subagent" => Some(Relationship::Subagent),
            "continuation" => Some(Relationship::Continuation),
            _ => None,
        }
    }
}

/// Size and modification time of a session file, the change-detection key.
///
/// `mtime` is nanoseconds since the Unix epoch. Two files with equal
/// fingerprints are treated as identical without reading them, so a rewrite
/// that preserves both size and mtime goes unnoticed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct FileFingerprint {
    pub size: i64,
    pub mtime: i64,
}

/// One agent conversation, backed by one session file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: String,
    pub project: String,
    pub machine: String,
    pub agent: AgentKind,
    pub first_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub message_count: i64,
    pub user_message_count: i64,
    pub parent_session_id: Option<String>,
    pub relationship: Option<Relationship>,
    pub file_path: String,
    pub file_size: i64,
    pub file_mtime: i64,
    pub file_hash: Option<String>,
    /// Set by the store on first insert and preserved across resyncs.
    pub created_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn fingerprint(&self) -> FileFingerprint {
        FileFingerprint {
            size: self.file_size,
            mtime: self.file_mtime,
        }
    }
}

/// One ordered turn within a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub session_id: String,
    pub ordinal: i64,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub has_thinking: bool,
    pub has_tool_use: bool,
    pub content_length: i64,
    pub tool_calls: Vec<ToolCall>,
}

/// A tool invocation made by the assistant within a message.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCall {
    pub tool_name: String,
    pub category: String,
    pub tool_use_id: Option<String>,
    pub input_json: Option<String>,
    pub skill_name: Option<String>,
    pub result_content_length: Option<i64>,
    pub subagent_session_id: Option<String>,
}

/// Row counts for a quick overview of the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreCounts {
    pub sessions: i64,
    pub messages: i64,
    pub tool_calls: i64,
}

#[cfg(test)]
#[path = "models_tests.rs"]
mod tests;

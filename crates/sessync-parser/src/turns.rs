//! Turn assembly shared by the format parsers.
//!
//! Parsers emit [`Turn`]s in file order. [`assemble`] pairs tool results with
//! their calls, drops turns that only carried tool output, and numbers what
//! remains densely from zero.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sessync_core::models::{Message, MessageRole, ToolCall};

use crate::content::{Extracted, ToolResult};

/// Maximum byte length of a session's first-message preview.
pub const PREVIEW_LEN: usize = 300;

#[derive(Debug, Clone)]
pub(crate) struct Turn {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub has_thinking: bool,
    pub has_tool_use: bool,
    pub tool_calls: Vec<ToolCall>,
    pub tool_results: Vec<ToolResult>,
}

impl Turn {
    pub fn text(role: MessageRole, content: String, timestamp: Option<DateTime<Utc>>) -> Self {
        Self {
            role,
            content,
            timestamp,
            has_thinking: false,
            has_tool_use: false,
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
        }
    }

    pub fn extracted(role: MessageRole, ex: Extracted, timestamp: Option<DateTime<Utc>>) -> Self {
        Self {
            role,
            content: ex.content,
            timestamp,
            has_thinking: ex.has_thinking,
            has_tool_use: ex.has_tool_use,
            tool_calls: ex.tool_calls,
            tool_results: ex.tool_results,
        }
    }

    fn is_empty(&self) -> bool {
        self.content.trim().is_empty() && self.tool_calls.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Assembled {
    pub messages: Vec<Message>,
    pub user_message_count: i64,
    pub first_message: Option<String>,
}

pub(crate) fn assemble(session_id: &str, turns: Vec<Turn>) -> Assembled {
    let mut results: HashMap<String, usize> = HashMap::new();
    for turn in &turns {
        for result in &turn.tool_results {
            results.insert(result.tool_use_id.clone(), result.content_length);
        }
    }

    let mut out = Assembled::default();
    for mut turn in turns {
        for call in &mut turn.tool_calls {
            if let Some(len) = call.tool_use_id.as_ref().and_then(|id| results.get(id)) {
                call.result_content_length = Some(to_i64(*len));
            }
        }
        if turn.is_empty() {
            continue;
        }

        if turn.role == MessageRole::User {
            out.user_message_count += 1;
            if out.first_message.is_none() {
                out.first_message = Some(preview(&turn.content));
            }
        }

        out.messages.push(Message {
            session_id: session_id.to_string(),
            ordinal: to_i64(out.messages.len()),
            role: turn.role,
            content_length: to_i64(turn.content.len()),
            content: turn.content,
            timestamp: turn.timestamp,
            has_thinking: turn.has_thinking,
            has_tool_use: turn.has_tool_use || !turn.tool_calls.is_empty(),
            tool_calls: turn.tool_calls,
        });
    }
    out
}

/// Single-line preview of a message, cut at [`PREVIEW_LEN`] bytes.
pub fn preview(text: &str) -> String {
    truncate(&text.replace(['\r', '\n'], " "), PREVIEW_LEN)
}

/// Trim `text` and cut it to at most `max` bytes plus a `...` marker.
pub(crate) fn truncate(text: &str, max: usize) -> String {
    let text = text.trim();
    if text.len() <= max {
        return text.to_string();
    }
    let mut cut = max;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}...", &text[..cut])
}

fn to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

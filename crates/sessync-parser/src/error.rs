//! Error types for sessync-parser

use sessync_core::models::AgentKind;
use thiserror::Error;

/// Parse failure for a whole file.
///
/// Files that parse with some records skipped are not errors; they come back
/// as a [`ParseOutput`](crate::ParseOutput) with a non-zero
/// `malformed_records` count.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("not a {agent} session: {reason}")]
    Format { agent: AgentKind, reason: String },
}

impl ParseError {
    pub(crate) fn format(agent: AgentKind, reason: impl Into<String>) -> Self {
        ParseError::Format {
            agent,
            reason: reason.into(),
        }
    }
}

/// Result type alias using ParseError.
pub type Result<T> = std::result::Result<T, ParseError>;

//! sessync-parser: session-log format parsers
//!
//! Each supported agent writes its own on-disk session format. The parsers in
//! this crate turn the raw bytes of one file into canonical
//! [`Session`]/[`Message`] values. They never touch the filesystem; callers
//! read the file and pass everything in through [`ParseInput`].

pub mod amp;
pub mod claude;
pub mod codex;
pub mod content;
pub mod copilot;
mod error;
pub mod gemini;
pub mod iflow;
pub mod lines;
pub mod pi;
pub mod project;
pub mod taxonomy;
mod time;
mod turns;

use std::path::Path;

use sessync_core::models::{AgentKind, FileFingerprint, Message, Session};

pub use error::{ParseError, Result};
pub use turns::{PREVIEW_LEN, preview};

use crate::time::Bounds;
use crate::turns::Assembled;

/// Everything a parser needs to know about one file.
#[derive(Debug, Clone, Copy)]
pub struct ParseInput<'a> {
    pub bytes: &'a [u8],
    pub path: &'a Path,
    pub fingerprint: FileFingerprint,
    /// Project label derived from the file's location, if the layout has one.
    pub project: Option<&'a str>,
    pub machine: &'a str,
    pub include_codex_exec: bool,
}

impl<'a> ParseInput<'a> {
    pub fn new(bytes: &'a [u8], path: &'a Path, machine: &'a str) -> Self {
        Self {
            bytes,
            path,
            fingerprint: FileFingerprint {
                size: i64::try_from(bytes.len()).unwrap_or(i64::MAX),
                mtime: 0,
            },
            project: None,
            machine,
            include_codex_exec: false,
        }
    }

    /// File name without its extension.
    pub fn file_stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// One session and its messages, ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSession {
    pub session: Session,
    pub messages: Vec<Message>,
}

/// Result of parsing one file.
///
/// A file can yield several sessions (a forked conversation) or none (a
/// session type that is deliberately not kept).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseOutput {
    pub sessions: Vec<ParsedSession>,
    /// Records that were skipped because they could not be read.
    pub malformed_records: usize,
    /// Content blocks of a type the extractor does not understand.
    pub unknown_blocks: usize,
}

impl ParseOutput {
    /// Whether some records were dropped while still producing output.
    pub fn is_partial(&self) -> bool {
        self.malformed_records > 0
    }

    pub fn message_count(&self) -> usize {
        self.sessions.iter().map(|s| s.messages.len()).sum()
    }
}

/// Parse a file with the parser for `agent`.
pub fn parse(agent: AgentKind, input: &ParseInput<'_>) -> Result<ParseOutput> {
    match agent {
        AgentKind::Claude => claude::parse(input),
        AgentKind::Codex => codex::parse(input),
        AgentKind::Gemini => gemini::parse(input),
        AgentKind::Copilot => copilot::parse(input),
        AgentKind::Pi => pi::parse(input),
        AgentKind::Amp => amp::parse(input),
        AgentKind::Iflow => iflow::parse(input),
    }
}

pub(crate) struct SessionMeta {
    pub agent: AgentKind,
    pub id: String,
    pub project: String,
    pub parent_session_id: Option<String>,
    pub relationship: Option<sessync_core::models::Relationship>,
    pub bounds: Bounds,
}

impl ParsedSession {
    pub(crate) fn build(input: &ParseInput<'_>, meta: SessionMeta, assembled: Assembled) -> Self {
        let session = Session {
            id: meta.id,
            project: meta.project,
            machine: input.machine.to_string(),
            agent: meta.agent,
            first_message: assembled.first_message,
            started_at: meta.bounds.start,
            ended_at: meta.bounds.end,
            message_count: i64::try_from(assembled.messages.len()).unwrap_or(i64::MAX),
            user_message_count: assembled.user_message_count,
            parent_session_id: meta.parent_session_id,
            relationship: meta.relationship,
            file_path: input.path.to_string_lossy().into_owned(),
            file_size: input.fingerprint.size,
            file_mtime: input.fingerprint.mtime,
            file_hash: None,
            created_at: None,
        };
        Self {
            session,
            messages: assembled.messages,
        }
    }
}

//! Error types for sessync-sync

use std::path::PathBuf;

use serde::Serialize;
use sessync_parser::ParseError;
use thiserror::Error;

/// Why a single candidate file could not be synced.
///
/// These never escape a pass; they are counted and recorded in the pass
/// report while the remaining files continue.
#[derive(Debug, Error)]
pub enum FileError {
    #[error(transparent)]
    Format(#[from] ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store error: {0}")]
    Store(#[from] sessync_core::Error),
}

impl FileError {
    pub fn kind(&self) -> FailureKind {
        match self {
            FileError::Format(_) => FailureKind::Format,
            FileError::Io(_) => FailureKind::Io,
            FileError::Store(_) => FailureKind::Store,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Format,
    Io,
    Store,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Format => "format",
            FailureKind::Io => "io",
            FailureKind::Store => "store",
        }
    }
}

/// A file that failed during the most recent pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileFailure {
    pub path: PathBuf,
    pub kind: FailureKind,
    pub message: String,
}

/// Conditions that end a whole pass.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[source] sessync_core::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("No session file found for {0}")]
    SourceNotFound(String),

    #[error("Sync engine stopped")]
    EngineStopped,
}

/// Result type alias using SyncError.
pub type Result<T> = std::result::Result<T, SyncError>;

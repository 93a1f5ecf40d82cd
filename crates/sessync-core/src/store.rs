//! The persistence boundary the sync engine writes through.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{FileFingerprint, Message, Session};

/// Operations the sync engine needs from a session store.
///
/// `write_session` and `write_file_sessions` must be atomic: every session row
/// and its full message set are committed together or not at all.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert or replace a session's metadata, keeping its original `created_at`.
    async fn upsert_session(&self, session: &Session) -> Result<()>;

    /// Delete every message of the session and insert `messages` in their place.
    async fn replace_messages(&self, session_id: &str, messages: &[Message]) -> Result<()>;

    /// Upsert the session and replace its messages in one transaction.
    async fn write_session(&self, session: &Session, messages: &[Message]) -> Result<()>;

    /// Write every session parsed from one file in a single transaction.
    ///
    /// A forked file yields several sessions sharing one fingerprint; a
    /// partial commit would record the fingerprint and hide the rest.
    async fn write_file_sessions(&self, sessions: &[(Session, Vec<Message>)]) -> Result<()>;

    /// A stored session by id.
    async fn find_session(&self, id: &str) -> Result<Option<Session>>;

    /// Fingerprint recorded by the last successful write of this file, if any.
    async fn last_known_fingerprint(&self, file_path: &str) -> Result<Option<FileFingerprint>>;

    /// Cheap query that fails when the store cannot be used at all.
    async fn health_check(&self) -> Result<()>;

    /// Files that failed or produced nothing, keyed by path, with the mtime seen.
    async fn load_skipped_files(&self) -> Result<HashMap<String, i64>>;

    /// Replace the persisted skip cache.
    async fn replace_skipped_files(&self, entries: &HashMap<String, i64>) -> Result<()>;
}

//! sessync-sync: keeps the store in step with agent log directories
//!
//! Discovery finds candidate files per agent, fingerprints decide which of
//! them changed, and the engine parses and commits those in single-flight
//! passes. The service drives the engine from a timer and a debounced file
//! watcher, syncing just the changed files when it can.

pub mod coordinator;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod progress;
pub mod service;
pub mod watcher;

pub use discovery::{CandidateFile, candidate_for_path, discover, find_source_file};
pub use engine::{EngineOptions, EngineState, PassOutcome, PassReport, SyncEngine, SyncHandle};
pub use error::{FailureKind, FileError, FileFailure, Result, SyncError};
pub use progress::{Phase, Progress, SyncEvent, SyncStats};
pub use service::{ServiceOptions, run_service};
pub use watcher::Change;

//! Progress events and the subscriber list they are published to.

use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Idle,
    Discovering,
    Syncing,
    Done,
}

/// Running counts for the pass in flight.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub phase: Phase,
    pub current_project: Option<String>,
    pub projects_total: usize,
    pub projects_done: usize,
    pub sessions_total: usize,
    pub sessions_done: usize,
    pub messages_indexed: usize,
}

impl Progress {
    /// Fraction of candidate files processed, in `0.0..=1.0`.
    #[expect(clippy::cast_precision_loss, reason = "progress display only")]
    pub fn fraction(&self) -> f64 {
        if self.sessions_total == 0 {
            return 1.0;
        }
        self.sessions_done as f64 / self.sessions_total as f64
    }
}

/// Totals for one pass. Counts are per candidate file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub total_sessions: usize,
    /// Parsed and written.
    pub synced: usize,
    /// Unchanged since the last write, or nothing to keep.
    pub skipped: usize,
    pub failed: usize,
    /// Malformed records dropped from files that still synced.
    pub warnings: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SyncEvent {
    Progress(Progress),
    Done(SyncStats),
}

/// Fan-out of events to every live subscriber.
#[derive(Debug, Default)]
pub(crate) struct Subscribers {
    senders: Mutex<Vec<mpsc::UnboundedSender<SyncEvent>>>,
}

impl Subscribers {
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SyncEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Send to all subscribers, dropping the ones whose receiver is gone.
    pub fn publish(&self, event: &SyncEvent) {
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

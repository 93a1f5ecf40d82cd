//! Filesystem watching with per-path debounce.
//!
//! Raw notify events are forwarded from the watcher thread into a channel;
//! a task collects them and emits one trigger per path once that path has
//! been quiet for the debounce window. When events are lost, because a
//! channel filled up or the backend itself overflowed, the individual paths
//! are no longer trustworthy and a single [`Change::Rescan`] is emitted
//! instead.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use sessync_core::models::AgentKind;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const RAW_EVENT_CAPACITY: usize = 64;

/// A settled filesystem change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    Path(PathBuf),
    /// Events were dropped; only a walk of every root catches up.
    Rescan,
}

/// Pending paths and the instant each becomes due.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    pending: HashMap<PathBuf, Instant>,
    rescan: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
            rescan: None,
        }
    }

    /// Note a change at `now`, pushing back the path's deadline.
    pub fn record(&mut self, path: PathBuf, now: Instant) {
        self.pending.insert(path, now + self.window);
    }

    /// Note lost events at `now`, pushing back the rescan deadline.
    pub fn record_rescan(&mut self, now: Instant) {
        self.rescan = Some(now + self.window);
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().copied().chain(self.rescan).min()
    }

    /// Remove and return everything due at `now`.
    ///
    /// A due rescan subsumes every pending path and is returned alone;
    /// otherwise the due paths come back sorted.
    pub fn flush(&mut self, now: Instant) -> Vec<Change> {
        if self.rescan.is_some_and(|deadline| deadline <= now) {
            self.rescan = None;
            self.pending.clear();
            return vec![Change::Rescan];
        }

        let mut due: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(path, _)| path.clone())
            .collect();
        for path in &due {
            self.pending.remove(path);
        }
        due.sort();
        due.into_iter().map(Change::Path).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.rescan.is_none()
    }
}

/// Whether a changed path could be a session log.
pub fn is_session_file(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext == "jsonl" || ext == "json")
}

/// A running watcher. Dropping it stops the notify backend.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
    watched: usize,
}

impl FileWatcher {
    pub fn watched_roots(&self) -> usize {
        self.watched
    }

    /// Wait for the debounce task to exit after its token is cancelled.
    pub async fn join(self) {
        let FileWatcher { _watcher, task, .. } = self;
        if let Err(err) = task.await {
            warn!(error = %err, "watcher task ended abnormally");
        }
    }
}

/// Watch every existing root and send debounced changes to `trigger`.
///
/// Returns `None` when nothing could be watched; callers then rely on the
/// periodic timer alone.
pub fn spawn_watcher(
    roots: &[(AgentKind, PathBuf)],
    debounce: Duration,
    trigger: mpsc::Sender<Change>,
    cancel: CancellationToken,
) -> Option<FileWatcher> {
    let (raw_tx, raw_rx) = mpsc::channel(RAW_EVENT_CAPACITY);
    let overflow = Arc::new(AtomicBool::new(false));
    let mut watcher = match build_watcher(raw_tx, Arc::clone(&overflow)) {
        Ok(watcher) => watcher,
        Err(err) => {
            warn!(error = %err, "file watching unavailable; falling back to periodic sync");
            return None;
        }
    };

    let mut watched = 0;
    for (agent, root) in roots {
        if !root.is_dir() {
            debug!(agent = %agent, root = %root.display(), "not watching missing root");
            continue;
        }
        match watcher.watch(root, RecursiveMode::Recursive) {
            Ok(()) => {
                debug!(agent = %agent, root = %root.display(), "watching");
                watched += 1;
            }
            Err(err) => {
                warn!(agent = %agent, root = %root.display(), error = %err, "failed to watch root");
            }
        }
    }
    if watched == 0 {
        warn!("no agent roots could be watched; falling back to periodic sync");
        return None;
    }

    let task = tokio::spawn(debounce_loop(raw_rx, overflow, debounce, trigger, cancel));
    Some(FileWatcher {
        _watcher: watcher,
        task,
        watched,
    })
}

fn build_watcher(
    raw_tx: mpsc::Sender<Change>,
    overflow: Arc<AtomicBool>,
) -> notify::Result<RecommendedWatcher> {
    RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| match res {
            Ok(event) => {
                if event.need_rescan() {
                    forward(&raw_tx, &overflow, Change::Rescan);
                    return;
                }
                if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                    return;
                }
                for path in event.paths.into_iter().filter(|p| is_session_file(p)) {
                    forward(&raw_tx, &overflow, Change::Path(path));
                }
            }
            Err(err) => warn!(error = %err, "watch error"),
        },
        notify::Config::default(),
    )
}

/// Queue a raw change, raising `overflow` when the queue is full.
///
/// A full queue always has entries left to receive, so the debounce loop
/// sees the flag on its next receive.
fn forward(raw_tx: &mpsc::Sender<Change>, overflow: &AtomicBool, change: Change) {
    match raw_tx.try_send(change) {
        Ok(()) | Err(TrySendError::Closed(_)) => {}
        Err(TrySendError::Full(_)) => {
            if !overflow.swap(true, Ordering::AcqRel) {
                debug!("watch queue full; scheduling a rescan");
            }
        }
    }
}

async fn debounce_loop(
    mut raw: mpsc::Receiver<Change>,
    overflow: Arc<AtomicBool>,
    window: Duration,
    trigger: mpsc::Sender<Change>,
    cancel: CancellationToken,
) {
    let mut debouncer = Debouncer::new(window);
    loop {
        let deadline = debouncer.next_deadline();
        tokio::select! {
            () = cancel.cancelled() => break,
            change = raw.recv() => {
                let now = Instant::now();
                match change {
                    Some(Change::Path(path)) => debouncer.record(path, now),
                    Some(Change::Rescan) => debouncer.record_rescan(now),
                    None => break,
                }
                if overflow.swap(false, Ordering::AcqRel) {
                    debouncer.record_rescan(now);
                }
            }
            () = sleep_until(deadline) => {
                let now = Instant::now();
                for change in debouncer.flush(now) {
                    debug!(change = ?change, "change settled");
                    match trigger.try_send(change) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            warn!("sync trigger queue full; scheduling a rescan");
                            debouncer.record_rescan(now);
                            break;
                        }
                        Err(TrySendError::Closed(_)) => return,
                    }
                }
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flush_waits_for_the_window() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(500));
        debouncer.record(PathBuf::from("/a.jsonl"), start);

        assert!(debouncer.flush(start + Duration::from_millis(499)).is_empty());
        assert_eq!(
            debouncer.flush(start + Duration::from_millis(500)),
            vec![Change::Path(PathBuf::from("/a.jsonl"))]
        );
        assert!(debouncer.is_empty());
    }

    #[test]
    fn repeated_changes_reset_the_deadline() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(100));
        let path = PathBuf::from("/s.jsonl");

        debouncer.record(path.clone(), start);
        debouncer.record(path.clone(), start + Duration::from_millis(80));
        assert!(debouncer.flush(start + Duration::from_millis(120)).is_empty());
        assert_eq!(
            debouncer.next_deadline(),
            Some(start + Duration::from_millis(180))
        );
        assert_eq!(
            debouncer.flush(start + Duration::from_millis(180)),
            vec![Change::Path(path)]
        );
    }

    #[test]
    fn paths_debounce_independently() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(100));
        debouncer.record(PathBuf::from("/b.jsonl"), start);
        debouncer.record(PathBuf::from("/a.jsonl"), start);
        debouncer.record(PathBuf::from("/c.jsonl"), start + Duration::from_millis(50));

        assert_eq!(
            debouncer.flush(start + Duration::from_millis(100)),
            vec![
                Change::Path(PathBuf::from("/a.jsonl")),
                Change::Path(PathBuf::from("/b.jsonl"))
            ]
        );
        assert!(!debouncer.is_empty());
    }

    #[test]
    fn due_rescan_replaces_pending_paths() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(100));
        debouncer.record(PathBuf::from("/a.jsonl"), start);
        debouncer.record_rescan(start + Duration::from_millis(10));
        debouncer.record(PathBuf::from("/b.jsonl"), start + Duration::from_millis(50));

        assert_eq!(
            debouncer.next_deadline(),
            Some(start + Duration::from_millis(100))
        );
        assert_eq!(
            debouncer.flush(start + Duration::from_millis(110)),
            vec![Change::Rescan]
        );
        assert!(debouncer.is_empty(), "rescan covers every pending path");
    }

    #[test]
    fn full_queue_raises_the_overflow_flag() {
        let (tx, mut rx) = mpsc::channel(1);
        let overflow = AtomicBool::new(false);

        forward(&tx, &overflow, Change::Path(PathBuf::from("/a.jsonl")));
        assert!(!overflow.load(Ordering::Acquire));
        forward(&tx, &overflow, Change::Path(PathBuf::from("/b.jsonl")));
        assert!(overflow.load(Ordering::Acquire), "dropped path is remembered");

        assert_eq!(rx.try_recv().ok(), Some(Change::Path(PathBuf::from("/a.jsonl"))));
    }

    #[test]
    fn only_log_files_count() {
        assert!(is_session_file(Path::new("/x/rollout.jsonl")));
        assert!(is_session_file(Path::new("/x/chats/session-1.json")));
        assert!(!is_session_file(Path::new("/x/notes.txt")));
        assert!(!is_session_file(Path::new("/x/dir")));
    }

    #[tokio::test]
    async fn missing_roots_yield_no_watcher() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (tx, _rx) = mpsc::channel(4);
        let roots = vec![(AgentKind::Claude, dir.path().join("absent"))];
        assert!(spawn_watcher(&roots, Duration::from_millis(10), tx, CancellationToken::new()).is_none());
    }

    #[tokio::test]
    async fn debounced_change_reaches_trigger() {
        let (raw_tx, raw_rx) = mpsc::channel(8);
        let (trigger_tx, mut trigger_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(debounce_loop(
            raw_rx,
            Arc::new(AtomicBool::new(false)),
            Duration::from_millis(20),
            trigger_tx,
            cancel.clone(),
        ));

        for _ in 0..3 {
            raw_tx
                .send(Change::Path(PathBuf::from("/p/s.jsonl")))
                .await
                .expect("send");
        }
        let change = tokio::time::timeout(Duration::from_secs(5), trigger_rx.recv())
            .await
            .expect("trigger in time")
            .expect("open");
        assert_eq!(change, Change::Path(PathBuf::from("/p/s.jsonl")));
        assert!(trigger_rx.try_recv().is_err(), "burst collapses to one trigger");

        cancel.cancel();
        task.await.expect("task");
    }

    #[tokio::test]
    async fn overflowed_events_settle_into_one_rescan() {
        let (raw_tx, raw_rx) = mpsc::channel(8);
        let (trigger_tx, mut trigger_rx) = mpsc::channel(8);
        let overflow = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(debounce_loop(
            raw_rx,
            Arc::clone(&overflow),
            Duration::from_millis(20),
            trigger_tx,
            cancel.clone(),
        ));

        raw_tx
            .send(Change::Path(PathBuf::from("/p/kept.jsonl")))
            .await
            .expect("send");
        let change = tokio::time::timeout(Duration::from_secs(5), trigger_rx.recv())
            .await
            .expect("trigger in time")
            .expect("open");
        assert_eq!(change, Change::Rescan);
        assert!(trigger_rx.try_recv().is_err(), "queued path folds into the rescan");
        assert!(!overflow.load(Ordering::Acquire));

        cancel.cancel();
        task.await.expect("task");
    }
}

//! Long-running sync service: a periodic timer plus filesystem triggers.

use std::sync::Arc;
use std::time::Duration;

use sessync_core::SessionStore;
use sessync_core::config::SyncConfig;
use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::{SyncEngine, SyncHandle};
use crate::watcher::{Change, spawn_watcher};

const TRIGGER_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy)]
pub struct ServiceOptions {
    pub interval: Duration,
    pub debounce: Duration,
    pub watch: bool,
}

impl ServiceOptions {
    pub fn from_config(sync: &SyncConfig) -> Self {
        Self {
            interval: Duration::from_secs(sync.interval_secs.max(1)),
            debounce: Duration::from_millis(sync.debounce_ms),
            watch: sync.watch,
        }
    }
}

/// Run passes on a timer and on settled file changes until `shutdown`.
///
/// The first pass starts immediately. Timer ticks and rescans walk every
/// root; settled changes sync just the changed paths. On shutdown the pass in flight is
/// cancelled and awaited before returning.
pub async fn run_service<S: SessionStore + 'static>(
    engine: Arc<SyncEngine<S>>,
    options: ServiceOptions,
    shutdown: CancellationToken,
) {
    let (trigger_tx, mut trigger_rx) = mpsc::channel(TRIGGER_CAPACITY);
    let watcher = if options.watch {
        spawn_watcher(engine.roots(), options.debounce, trigger_tx, shutdown.child_token())
    } else {
        None
    };
    info!(
        interval_secs = options.interval.as_secs(),
        watched_roots = watcher.as_ref().map_or(0, |w| w.watched_roots()),
        "sync service started"
    );

    let mut tick = interval(options.interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last: Option<SyncHandle> = None;

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = tick.tick() => {
                debug!("periodic sync");
                last = Some(engine.request_sync());
            }
            Some(change) = trigger_rx.recv() => {
                let mut changes = vec![change];
                while let Ok(change) = trigger_rx.try_recv() {
                    changes.push(change);
                }
                last = Some(dispatch(&engine, changes));
            }
        }
    }

    info!("sync service shutting down");
    engine.shutdown();
    if let Some(handle) = last {
        // The outcome is already logged by the engine.
        let _ = handle.wait().await;
    }
    if let Some(watcher) = watcher {
        watcher.join().await;
    }
}

fn dispatch<S: SessionStore + 'static>(
    engine: &Arc<SyncEngine<S>>,
    changes: Vec<Change>,
) -> SyncHandle {
    let mut paths = Vec::with_capacity(changes.len());
    for change in changes {
        match change {
            Change::Path(path) => paths.push(path),
            Change::Rescan => {
                debug!("watcher lost events; syncing everything");
                return engine.request_sync();
            }
        }
    }
    debug!(changed = paths.len(), "files changed; syncing");
    engine.sync_paths(paths)
}

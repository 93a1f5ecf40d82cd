//! The sync engine.
//!
//! A pass gathers candidates, drops the ones whose fingerprint is unchanged,
//! parses the rest on a bounded pool of blocking workers and commits each
//! parsed file through the store in a single transaction. A full pass walks
//! every configured root; a targeted pass looks only at the paths the watcher
//! reported or at the file behind one session id. Passes never overlap: see
//! [`SingleFlight`]. Work requested while a pass runs is merged and served by
//! the one rerun queued behind it.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use sessync_core::models::AgentKind;
use sessync_core::{Config, SessionStore};
use sessync_parser::{ParseInput, ParseOutput, ParsedSession};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::coordinator::{Acquire, SingleFlight};
use crate::discovery::{CandidateFile, candidate_for_path, discover, find_source_file};
use crate::error::{FileError, FileFailure, Result, SyncError};
use crate::fingerprint::{content_hash, needs_reparse};
use crate::progress::{Phase, Progress, Subscribers, SyncEvent, SyncStats};

/// Knobs the engine reads from configuration.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub machine: String,
    pub workers: usize,
    pub include_codex_exec: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            machine: "local".to_string(),
            workers: 2,
            include_codex_exec: false,
        }
    }
}

impl EngineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            machine: config.machine.clone(),
            workers: config.sync.worker_count(),
            include_codex_exec: config.sync.include_codex_exec,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
}

/// How a pass ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum PassOutcome {
    Completed(SyncStats),
    /// Stopped early by [`SyncEngine::abort`] or shutdown. Not an error.
    Cancelled(SyncStats),
    Failed { stats: SyncStats, error: String },
}

impl PassOutcome {
    pub fn stats(&self) -> SyncStats {
        match self {
            PassOutcome::Completed(stats)
            | PassOutcome::Cancelled(stats)
            | PassOutcome::Failed { stats, .. } => *stats,
        }
    }
}

/// What the most recent pass did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PassReport {
    pub state: EngineState,
    pub stats: SyncStats,
    pub failures: Vec<FileFailure>,
    pub cancelled: bool,
    pub error: Option<String>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// What the next pass has to look at.
#[derive(Debug, Default)]
struct PendingWork {
    /// Walk every root.
    full: bool,
    /// Changed paths, classified against the roots when the pass starts.
    paths: BTreeSet<PathBuf>,
    /// Files reparsed whatever their fingerprint or skip entry says.
    forced: BTreeSet<PathBuf>,
}

impl PendingWork {
    fn full() -> Self {
        Self {
            full: true,
            ..Self::default()
        }
    }

    fn merge(&mut self, other: PendingWork) {
        self.full |= other.full;
        self.paths.extend(other.paths);
        self.forced.extend(other.forced);
    }
}

#[derive(Debug, Clone, Default)]
struct PassRecord {
    generation: u64,
    outcome: Option<PassOutcome>,
}

/// Handle to the pass that will satisfy a sync request.
#[derive(Debug)]
pub struct SyncHandle {
    generation: u64,
    coalesced: bool,
    passes: watch::Receiver<PassRecord>,
}

impl SyncHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the request joined a pass that was already running.
    pub fn coalesced(&self) -> bool {
        self.coalesced
    }

    /// Wait for the pass to finish.
    pub async fn wait(mut self) -> Result<PassOutcome> {
        let generation = self.generation;
        let record = self
            .passes
            .wait_for(|record| record.generation >= generation)
            .await
            .map_err(|_| SyncError::EngineStopped)?;
        record.outcome.clone().ok_or(SyncError::EngineStopped)
    }
}

pub struct SyncEngine<S> {
    store: Arc<S>,
    roots: Vec<(AgentKind, PathBuf)>,
    options: EngineOptions,
    flight: SingleFlight,
    subscribers: Subscribers,
    passes: watch::Sender<PassRecord>,
    shutdown: CancellationToken,
    current: Mutex<Option<CancellationToken>>,
    pending: Mutex<PendingWork>,
    report: Mutex<PassReport>,
}

impl<S: SessionStore + 'static> SyncEngine<S> {
    pub fn new(store: Arc<S>, roots: Vec<(AgentKind, PathBuf)>, options: EngineOptions) -> Self {
        let (passes, _) = watch::channel(PassRecord::default());
        Self {
            store,
            roots,
            options,
            flight: SingleFlight::new(),
            subscribers: Subscribers::default(),
            passes,
            shutdown: CancellationToken::new(),
            current: Mutex::new(None),
            pending: Mutex::new(PendingWork::default()),
            report: Mutex::new(PassReport::default()),
        }
    }

    pub fn from_config(store: Arc<S>, config: &Config) -> Self {
        Self::new(store, config.resolved_roots(), EngineOptions::from_config(config))
    }

    pub fn roots(&self) -> &[(AgentKind, PathBuf)] {
        &self.roots
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Receive every progress event and one `Done` per pass from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SyncEvent> {
        self.subscribers.subscribe()
    }

    /// Start a full pass, or join the rerun queued behind the one in flight.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn request_sync(self: &Arc<Self>) -> SyncHandle {
        self.submit(PendingWork::full())
    }

    /// Sync only `paths`. Paths outside every root, or that do not follow
    /// their agent's layout, are ignored.
    pub fn sync_paths(self: &Arc<Self>, paths: impl IntoIterator<Item = PathBuf>) -> SyncHandle {
        self.submit(PendingWork {
            paths: paths.into_iter().collect(),
            ..PendingWork::default()
        })
    }

    /// Reparse the file that holds session `id`, ignoring its fingerprint and
    /// any skip entry, and wait for the pass that does it.
    pub async fn sync_session(self: &Arc<Self>, id: &str) -> Result<PassOutcome> {
        let path = self.locate_session(id).await?;
        info!(session = id, path = %path.display(), "syncing single session");
        self.submit(PendingWork {
            forced: BTreeSet::from([path]),
            ..PendingWork::default()
        })
        .wait()
        .await
    }

    fn submit(self: &Arc<Self>, work: PendingWork) -> SyncHandle {
        lock(&self.pending).merge(work);
        let acquired = self.flight.try_acquire();
        let handle = SyncHandle {
            generation: acquired.generation(),
            coalesced: matches!(acquired, Acquire::Coalesced { .. }),
            passes: self.passes.subscribe(),
        };

        match acquired {
            Acquire::Started { generation } => {
                debug!(generation, "starting sync pass");
                let engine = Arc::clone(self);
                tokio::spawn(engine.drive());
            }
            Acquire::Coalesced { generation } => {
                debug!(generation, "sync already running; rerun queued");
            }
        }
        handle
    }

    /// Request a pass and wait for it.
    pub async fn sync_now(self: &Arc<Self>) -> Result<PassOutcome> {
        self.request_sync().wait().await
    }

    /// Cancel the pass in flight, if any. Later requests run normally.
    pub fn abort(&self) {
        if let Some(token) = lock(&self.current).as_ref() {
            info!("aborting sync pass");
            token.cancel();
        }
    }

    /// Cancel the pass in flight and every future one.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn is_running(&self) -> bool {
        self.flight.is_running()
    }

    pub fn state(&self) -> EngineState {
        lock(&self.report).state
    }

    pub fn last_report(&self) -> PassReport {
        lock(&self.report).clone()
    }

    /// The stored file for `id` when it is still a session file under a
    /// root, else a search of the agent's root.
    async fn locate_session(&self, id: &str) -> Result<PathBuf> {
        let known = match self.store.find_session(id).await {
            Ok(session) => session.map(|s| PathBuf::from(s.file_path)),
            Err(err) if err.is_fatal() => return Err(SyncError::StoreUnavailable(err)),
            Err(err) => {
                warn!(session = id, error = %err, "session lookup failed; searching agent roots");
                None
            }
        };

        let roots = self.roots.clone();
        let wanted = id.to_string();
        tokio::task::spawn_blocking(move || {
            known
                .filter(|path| candidate_for_path(&roots, path).is_some())
                .or_else(|| find_source_file(&roots, &wanted))
        })
        .await?
        .ok_or_else(|| SyncError::SourceNotFound(id.to_string()))
    }

    async fn drive(self: Arc<Self>) {
        loop {
            let generation = self.flight.current_generation();
            let outcome = self.run_pass(generation).await;
            self.passes.send_replace(PassRecord {
                generation,
                outcome: Some(outcome),
            });
            if !self.flight.release() {
                break;
            }
        }
    }

    async fn run_pass(&self, generation: u64) -> PassOutcome {
        let token = self.shutdown.child_token();
        *lock(&self.current) = Some(token.clone());
        lock(&self.report).state = EngineState::Running;

        let work = std::mem::take(&mut *lock(&self.pending));
        let started = Instant::now();
        let mut pass = PassContext::new(&self.subscribers);
        let result = self.execute(&token, work, &mut pass).await;

        let stats = pass.stats;
        let outcome = match result {
            Ok(()) if token.is_cancelled() => PassOutcome::Cancelled(stats),
            Ok(()) => PassOutcome::Completed(stats),
            Err(err) => PassOutcome::Failed {
                stats,
                error: err.to_string(),
            },
        };
        let failures = pass.finish();
        *lock(&self.current) = None;

        {
            let mut report = lock(&self.report);
            report.state = match outcome {
                PassOutcome::Failed { .. } => EngineState::Failed,
                _ => EngineState::Completed,
            };
            report.stats = stats;
            report.failures = failures;
            report.cancelled = matches!(outcome, PassOutcome::Cancelled(_));
            report.error = match &outcome {
                PassOutcome::Failed { error, .. } => Some(error.clone()),
                _ => None,
            };
            report.finished_at = Some(Utc::now());
        }

        let elapsed_ms = started.elapsed().as_millis();
        match &outcome {
            PassOutcome::Completed(_) => info!(
                generation,
                total = stats.total_sessions,
                synced = stats.synced,
                skipped = stats.skipped,
                failed = stats.failed,
                warnings = stats.warnings,
                elapsed_ms,
                "sync pass completed"
            ),
            PassOutcome::Cancelled(_) => info!(
                generation,
                synced = stats.synced,
                skipped = stats.skipped,
                failed = stats.failed,
                elapsed_ms,
                "sync pass cancelled"
            ),
            PassOutcome::Failed { error, .. } => {
                warn!(generation, error = %error, elapsed_ms, "sync pass failed");
            }
        }

        outcome
    }

    async fn execute(
        &self,
        token: &CancellationToken,
        work: PendingWork,
        pass: &mut PassContext<'_>,
    ) -> Result<()> {
        if token.is_cancelled() {
            return Ok(());
        }
        self.store
            .health_check()
            .await
            .map_err(SyncError::StoreUnavailable)?;

        pass.set_phase(Phase::Discovering);
        let full = work.full;
        let roots = self.roots.clone();
        let candidates = tokio::task::spawn_blocking(move || gather(&roots, &work)).await?;
        debug!(candidates = candidates.len(), full, "discovery finished");

        pass.plan(&candidates);
        pass.set_phase(Phase::Syncing);

        let mut skip_cache = self.load_skip_cache().await?;
        let seen: HashSet<String> = candidates.iter().map(|(c, _)| path_key(&c.path)).collect();

        let mut queue = Vec::new();
        for (candidate, forced) in candidates {
            if token.is_cancelled() {
                break;
            }
            if forced {
                queue.push((candidate, true));
                continue;
            }
            let key = path_key(&candidate.path);

            if skip_cache.get(&key) == Some(&candidate.fingerprint.mtime) {
                debug!(path = %key, "unchanged since last failure; skipping");
                pass.skipped(&candidate);
                continue;
            }

            let last = match self.store.last_known_fingerprint(&key).await {
                Ok(last) => last,
                Err(err) if err.is_fatal() => return Err(SyncError::StoreUnavailable(err)),
                Err(err) => {
                    warn!(path = %key, error = %err, "fingerprint lookup failed; reparsing");
                    None
                }
            };
            if needs_reparse(candidate.fingerprint, last) {
                queue.push((candidate, false));
            } else {
                debug!(path = %key, "unchanged; skipping");
                pass.skipped(&candidate);
            }
        }

        let machine: Arc<str> = Arc::from(self.options.machine.as_str());
        let include_codex_exec = self.options.include_codex_exec;
        let mut results = futures::stream::iter(queue)
            .map(|(candidate, forced)| {
                process_file(candidate, Arc::clone(&machine), include_codex_exec || forced)
            })
            .buffer_unordered(self.options.workers.max(1));

        loop {
            let next = tokio::select! {
                biased;
                () = token.cancelled() => break,
                next = results.next() => next,
            };
            let Some((candidate, result)) = next else {
                break;
            };
            self.commit(candidate, result, &mut skip_cache, pass).await?;
        }
        drop(results);

        if full && !token.is_cancelled() {
            skip_cache.retain(|path, _| seen.contains(path));
        }
        self.save_skip_cache(&skip_cache).await
    }

    async fn commit(
        &self,
        candidate: CandidateFile,
        result: std::result::Result<Parsed, FileError>,
        skip_cache: &mut HashMap<String, i64>,
        pass: &mut PassContext<'_>,
    ) -> Result<()> {
        let key = path_key(&candidate.path);
        let parsed = match result {
            Ok(parsed) => parsed,
            Err(err) => {
                if matches!(err, FileError::Format(_)) {
                    skip_cache.insert(key, candidate.fingerprint.mtime);
                }
                pass.failed(&candidate, &err);
                return Ok(());
            }
        };

        if parsed.output.sessions.is_empty() {
            debug!(path = %key, "file produced no sessions");
            skip_cache.insert(key, candidate.fingerprint.mtime);
            pass.skipped(&candidate);
            return Ok(());
        }
        if parsed.output.is_partial() {
            warn!(
                path = %key,
                malformed = parsed.output.malformed_records,
                "skipped malformed records"
            );
            pass.stats.warnings += parsed.output.malformed_records;
        }

        let sessions: Vec<_> = parsed
            .output
            .sessions
            .into_iter()
            .map(|ParsedSession { mut session, messages }| {
                session.file_hash = Some(parsed.hash.clone());
                (session, messages)
            })
            .collect();
        let messages = sessions.iter().map(|(_, rows)| rows.len()).sum();

        match self.store.write_file_sessions(&sessions).await {
            Ok(()) => {}
            Err(err) if err.is_fatal() => return Err(SyncError::StoreUnavailable(err)),
            Err(err) => {
                pass.failed(&candidate, &FileError::Store(err));
                return Ok(());
            }
        }

        skip_cache.remove(&key);
        pass.synced(&candidate, messages);
        Ok(())
    }

    async fn load_skip_cache(&self) -> Result<HashMap<String, i64>> {
        match self.store.load_skipped_files().await {
            Ok(cache) => Ok(cache),
            Err(err) if err.is_fatal() => Err(SyncError::StoreUnavailable(err)),
            Err(err) => {
                warn!(error = %err, "could not load skip cache; retrying all files");
                Ok(HashMap::new())
            }
        }
    }

    async fn save_skip_cache(&self, cache: &HashMap<String, i64>) -> Result<()> {
        match self.store.replace_skipped_files(cache).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_fatal() => Err(SyncError::StoreUnavailable(err)),
            Err(err) => {
                warn!(error = %err, "could not persist skip cache");
                Ok(())
            }
        }
    }
}

/// Candidates for a pass, each flagged when it is reparsed unconditionally.
fn gather(roots: &[(AgentKind, PathBuf)], work: &PendingWork) -> Vec<(CandidateFile, bool)> {
    let found: Vec<CandidateFile> = if work.full {
        roots
            .iter()
            .flat_map(|(agent, root)| discover(*agent, root))
            .collect()
    } else {
        work.paths
            .iter()
            .filter_map(|path| {
                let candidate = candidate_for_path(roots, path);
                if candidate.is_none() {
                    debug!(path = %path.display(), "changed path is not a session file");
                }
                candidate
            })
            .collect()
    };

    let mut candidates: Vec<(CandidateFile, bool)> = found
        .into_iter()
        .map(|c| {
            let forced = work.forced.contains(&c.path);
            (c, forced)
        })
        .collect();
    for path in &work.forced {
        if candidates.iter().any(|(c, _)| c.path == *path) {
            continue;
        }
        match candidate_for_path(roots, path) {
            Some(candidate) => candidates.push((candidate, true)),
            None => warn!(path = %path.display(), "session file disappeared before sync"),
        }
    }
    candidates
}

struct Parsed {
    output: ParseOutput,
    hash: String,
}

async fn process_file(
    candidate: CandidateFile,
    machine: Arc<str>,
    include_codex_exec: bool,
) -> (CandidateFile, std::result::Result<Parsed, FileError>) {
    let result = parse_file(&candidate, machine, include_codex_exec).await;
    (candidate, result)
}

async fn parse_file(
    candidate: &CandidateFile,
    machine: Arc<str>,
    include_codex_exec: bool,
) -> std::result::Result<Parsed, FileError> {
    let bytes = tokio::fs::read(&candidate.path).await?;
    let path = candidate.path.clone();
    let agent = candidate.agent;
    let fingerprint = candidate.fingerprint;
    let project = candidate.project.clone();

    tokio::task::spawn_blocking(move || -> std::result::Result<Parsed, FileError> {
        let input = ParseInput {
            bytes: &bytes,
            path: &path,
            fingerprint,
            project: project.as_deref(),
            machine: &machine,
            include_codex_exec,
        };
        let output = sessync_parser::parse(agent, &input)?;
        Ok(Parsed {
            output,
            hash: content_hash(&bytes),
        })
    })
    .await
    .map_err(|err| FileError::Io(std::io::Error::other(err)))?
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Counters and progress for one pass, published as they change.
struct PassContext<'a> {
    subscribers: &'a Subscribers,
    progress: Progress,
    stats: SyncStats,
    failures: Vec<FileFailure>,
    remaining: HashMap<String, usize>,
}

impl<'a> PassContext<'a> {
    fn new(subscribers: &'a Subscribers) -> Self {
        Self {
            subscribers,
            progress: Progress::default(),
            stats: SyncStats::default(),
            failures: Vec::new(),
            remaining: HashMap::new(),
        }
    }

    fn emit(&self) {
        self.subscribers
            .publish(&SyncEvent::Progress(self.progress.clone()));
    }

    fn set_phase(&mut self, phase: Phase) {
        self.progress.phase = phase;
        self.emit();
    }

    fn plan(&mut self, candidates: &[(CandidateFile, bool)]) {
        for (candidate, _) in candidates {
            *self.remaining.entry(project_key(candidate)).or_default() += 1;
        }
        self.stats.total_sessions = candidates.len();
        self.progress.sessions_total = candidates.len();
        self.progress.projects_total = self.remaining.len();
    }

    fn skipped(&mut self, candidate: &CandidateFile) {
        self.stats.skipped += 1;
        self.file_done(candidate);
    }

    fn synced(&mut self, candidate: &CandidateFile, messages: usize) {
        self.stats.synced += 1;
        self.progress.messages_indexed += messages;
        self.file_done(candidate);
    }

    fn failed(&mut self, candidate: &CandidateFile, err: &FileError) {
        warn!(path = %candidate.path.display(), error = %err, "failed to sync file");
        self.stats.failed += 1;
        self.failures.push(FileFailure {
            path: candidate.path.clone(),
            kind: err.kind(),
            message: err.to_string(),
        });
        self.file_done(candidate);
    }

    fn file_done(&mut self, candidate: &CandidateFile) {
        let project = project_key(candidate);
        if let Some(left) = self.remaining.get_mut(&project) {
            *left = left.saturating_sub(1);
            if *left == 0 {
                self.progress.projects_done += 1;
            }
        }
        self.progress.current_project = Some(project);
        self.progress.sessions_done += 1;
        self.emit();
    }

    /// Publish the closing events and hand back the failure list.
    fn finish(self) -> Vec<FileFailure> {
        let mut progress = self.progress;
        progress.phase = Phase::Done;
        self.subscribers.publish(&SyncEvent::Progress(progress));
        self.subscribers.publish(&SyncEvent::Done(self.stats));
        self.failures
    }
}

fn project_key(candidate: &CandidateFile) -> String {
    candidate
        .project
        .clone()
        .unwrap_or_else(|| candidate.agent.to_string())
}

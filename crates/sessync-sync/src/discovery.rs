//! Candidate discovery under each agent's root.
//!
//! Layouts:
//! - Claude: `<root>/<project-dir>/<session>.jsonl`, plus subagent logs at
//!   `<root>/<project-dir>/<session>/subagents/agent-*.jsonl`
//! - Codex: `<root>/YYYY/MM/DD/*.jsonl`
//! - Gemini: `<root>/tmp/<project-hash-or-name>/chats/session-*.json`
//! - Copilot: `<root>/session-state/<id>.jsonl` or
//!   `<root>/session-state/<id>/events.jsonl`
//! - pi: `<root>/<encoded-cwd>/<id>.jsonl` starting with a session header
//! - Amp: `<root>/T-*.json`
//! - iFlow: `<root>/<project-dir>/session-*.jsonl`
//!
//! The same rules classify a single changed path, so the watcher and a full
//! walk agree on what counts as a session file. Unreadable or vanished
//! directories are logged and skipped.

use std::cell::OnceCell;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use sessync_core::models::{AgentKind, FileFingerprint};
use sessync_parser::copilot::EVENTS_FILE;
use sessync_parser::iflow::FILE_PREFIX as IFLOW_PREFIX;
use sessync_parser::project::{UNKNOWN_PROJECT, normalize_name, project_from_claude_dir, project_from_cwd};
use sessync_parser::{amp, pi};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::fingerprint::{content_hash, fingerprint_of};

const COPILOT_STATE_DIR: &str = "session-state";

/// A file that may hold a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFile {
    pub path: PathBuf,
    pub agent: AgentKind,
    pub fingerprint: FileFingerprint,
    /// Project label implied by the file's location.
    pub project: Option<String>,
}

/// Find every session file under `root` for `agent`, sorted by path.
pub fn discover(agent: AgentKind, root: &Path) -> Vec<CandidateFile> {
    if !root.is_dir() {
        debug!(agent = %agent, root = %root.display(), "agent root missing; nothing to discover");
        return Vec::new();
    }

    let layout = Layout::new(agent, root);
    let mut files: Vec<CandidateFile> = layout
        .files()
        .filter_map(|(entry, project)| candidate(&entry, agent, project))
        .collect();
    files.sort_by(|a, b| a.path.cmp(&b.path));
    files
}

/// The agent root a changed path lives under, preferring the deepest match.
pub fn root_for_path<'a>(
    roots: &'a [(AgentKind, PathBuf)],
    path: &Path,
) -> Option<(AgentKind, &'a Path)> {
    roots
        .iter()
        .filter(|(_, root)| path.starts_with(root))
        .max_by_key(|(_, root)| root.components().count())
        .map(|(agent, root)| (*agent, root.as_path()))
}

/// Classify one path against the configured roots.
///
/// Returns `None` when the path is outside every root, does not follow its
/// agent's layout, or is no longer a regular file.
pub fn candidate_for_path(roots: &[(AgentKind, PathBuf)], path: &Path) -> Option<CandidateFile> {
    let (agent, root) = root_for_path(roots, path)?;
    let project = Layout::new(agent, root).classify(path)?;
    let meta = match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => meta,
        Ok(_) => return None,
        Err(err) => {
            debug!(path = %path.display(), error = %err, "changed path is gone");
            return None;
        }
    };
    Some(CandidateFile {
        path: path.to_path_buf(),
        agent,
        fingerprint: fingerprint_of(&meta),
        project,
    })
}

/// Locate the file that holds session `id`.
///
/// The agent comes from the id's prefix. Only roots configured for that agent
/// are searched.
pub fn find_source_file(roots: &[(AgentKind, PathBuf)], id: &str) -> Option<PathBuf> {
    let (agent, raw) = AgentKind::split_session_id(id);
    if raw.is_empty() || raw.contains(['/', '\\']) {
        return None;
    }
    roots
        .iter()
        .filter(|(kind, root)| *kind == agent && root.is_dir())
        .find_map(|(_, root)| find_in(agent, root, raw))
}

fn find_in(agent: AgentKind, root: &Path, raw: &str) -> Option<PathBuf> {
    let existing = |path: PathBuf| path.is_file().then_some(path);
    let layout = Layout::new(agent, root);

    match agent {
        AgentKind::Copilot => {
            let state = root.join(COPILOT_STATE_DIR);
            existing(state.join(raw).join(EVENTS_FILE))
                .or_else(|| existing(state.join(format!("{raw}.jsonl"))))
        }
        AgentKind::Amp => existing(root.join(format!("{raw}.json"))),
        AgentKind::Claude | AgentKind::Pi => layout
            .files()
            .map(|(entry, _)| entry.into_path())
            .find(|path| has_stem(path, raw)),
        AgentKind::Iflow => {
            let stem = format!("{IFLOW_PREFIX}{raw}");
            layout
                .files()
                .map(|(entry, _)| entry.into_path())
                .find(|path| has_stem(path, &stem))
        }
        AgentKind::Codex => {
            let suffix = format!("-{raw}");
            layout
                .files()
                .map(|(entry, _)| entry.into_path())
                .find(|path| {
                    path.file_stem()
                        .map(|s| s.to_string_lossy())
                        .is_some_and(|s| s == raw || s.ends_with(&suffix))
                })
        }
        AgentKind::Gemini => {
            let hint = raw.get(..8).unwrap_or(raw);
            layout
                .files()
                .map(|(entry, _)| entry.into_path())
                .filter(|path| path.to_string_lossy().contains(hint))
                .find(|path| {
                    read_json::<GeminiHead>(path).is_some_and(|head| head.session_id == raw)
                })
        }
    }
}

fn has_stem(path: &Path, stem: &str) -> bool {
    path.file_stem().is_some_and(|s| s == stem)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiHead {
    #[serde(default)]
    session_id: String,
}

/// One agent's on-disk layout under a root.
struct Layout<'a> {
    agent: AgentKind,
    root: &'a Path,
    gemini_projects: OnceCell<HashMap<String, String>>,
}

impl<'a> Layout<'a> {
    fn new(agent: AgentKind, root: &'a Path) -> Self {
        Self {
            agent,
            root,
            gemini_projects: OnceCell::new(),
        }
    }

    /// Every file that follows the layout, with its project hint.
    fn files(&self) -> impl Iterator<Item = (DirEntry, Option<String>)> + '_ {
        let (base, min_depth, max_depth) = match self.agent {
            AgentKind::Claude => (self.root.to_path_buf(), 2, 4),
            AgentKind::Codex => (self.root.to_path_buf(), 4, 4),
            AgentKind::Gemini => (self.root.join("tmp"), 3, 3),
            AgentKind::Copilot => (self.root.join(COPILOT_STATE_DIR), 1, 2),
            AgentKind::Pi | AgentKind::Iflow => (self.root.to_path_buf(), 2, 2),
            AgentKind::Amp => (self.root.to_path_buf(), 1, 1),
        };
        base.is_dir()
            .then(|| walk(&base, min_depth, max_depth))
            .into_iter()
            .flatten()
            .filter_map(|entry| self.classify(entry.path()).map(|project| (entry, project)))
    }

    /// `Some(project hint)` when `path` is one of this agent's session files.
    fn classify(&self, path: &Path) -> Option<Option<String>> {
        let parts = relative_parts(self.root, path)?;
        let parts: Vec<&str> = parts.iter().map(String::as_str).collect();

        match (self.agent, parts.as_slice()) {
            (AgentKind::Claude, [dir, file])
                if is_ext(file, "jsonl") && !file.starts_with("agent-") =>
            {
                Some(Some(project_from_claude_dir(dir)))
            }
            (AgentKind::Claude, [dir, _session, "subagents", file])
                if is_ext(file, "jsonl") && file.starts_with("agent-") =>
            {
                Some(Some(project_from_claude_dir(dir)))
            }
            (AgentKind::Codex, [year, month, day, file])
                if is_digits(year) && is_digits(month) && is_digits(day) && is_ext(file, "jsonl") =>
            {
                Some(None)
            }
            (AgentKind::Gemini, ["tmp", dir, "chats", file])
                if file.starts_with("session-") && is_ext(file, "json") =>
            {
                Some(Some(resolve_gemini_project(dir, self.gemini_projects())))
            }
            (AgentKind::Copilot, [COPILOT_STATE_DIR, _dir, EVENTS_FILE]) => Some(None),
            (AgentKind::Copilot, [COPILOT_STATE_DIR, file]) if is_ext(file, "jsonl") => {
                let stem = file.trim_end_matches(".jsonl");
                let dir_form = self.root.join(COPILOT_STATE_DIR).join(stem).join(EVENTS_FILE);
                (!dir_form.is_file()).then_some(None)
            }
            (AgentKind::Pi, [_dir, file]) if is_ext(file, "jsonl") => {
                first_line(path).is_some_and(|line| pi::is_session_header(&line)).then_some(None)
            }
            (AgentKind::Amp, [file])
                if is_ext(file, "json") && amp::is_thread_id(file.trim_end_matches(".json")) =>
            {
                Some(None)
            }
            (AgentKind::Iflow, [dir, file])
                if file.starts_with(IFLOW_PREFIX) && is_ext(file, "jsonl") =>
            {
                Some(Some(project_from_claude_dir(dir)))
            }
            _ => None,
        }
    }

    fn gemini_projects(&self) -> &HashMap<String, String> {
        self.gemini_projects
            .get_or_init(|| gemini_project_map(self.root))
    }
}

fn walk(root: &Path, min_depth: usize, max_depth: usize) -> impl Iterator<Item = DirEntry> + use<> {
    WalkDir::new(root)
        .min_depth(min_depth)
        .max_depth(max_depth)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(path = ?err.path(), error = %err, "skipping unreadable path during discovery");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
}

fn candidate(entry: &DirEntry, agent: AgentKind, project: Option<String>) -> Option<CandidateFile> {
    match entry.metadata() {
        Ok(meta) => Some(CandidateFile {
            path: entry.path().to_path_buf(),
            agent,
            fingerprint: fingerprint_of(&meta),
            project,
        }),
        Err(err) => {
            warn!(path = %entry.path().display(), error = %err, "file vanished during discovery");
            None
        }
    }
}

/// First non-blank line of a file.
fn first_line(path: &Path) -> Option<Vec<u8>> {
    let reader = BufReader::new(File::open(path).ok()?);
    reader
        .split(b'\n')
        .map_while(std::result::Result::ok)
        .find(|line| !line.trim_ascii().is_empty())
}

fn relative_parts(root: &Path, path: &Path) -> Option<Vec<String>> {
    let rel = path.strip_prefix(root).ok()?;
    Some(
        rel.components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect(),
    )
}

fn is_ext(name: &str, ext: &str) -> bool {
    Path::new(name).extension().is_some_and(|e| e == ext)
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

#[derive(Debug, Default, Deserialize)]
struct ProjectsFile {
    #[serde(default)]
    projects: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrustedFoldersFile {
    #[serde(default)]
    trusted_folders: Vec<String>,
}

/// Map from Gemini `tmp/` directory names to project labels.
///
/// Older Gemini CLI versions name the directory after the SHA-256 of the
/// project's absolute path; newer ones use the short project name. Both keys
/// are filled from `projects.json`, and `trustedFolders.json` adds hashes for
/// paths that `projects.json` has since dropped. Earlier entries win.
pub fn gemini_project_map(root: &Path) -> HashMap<String, String> {
    let mut map = HashMap::new();

    if let Some(file) = read_json::<ProjectsFile>(&root.join("projects.json")) {
        add_project_paths(&mut map, file.projects);
    }
    if let Some(file) = read_json::<TrustedFoldersFile>(&root.join("trustedFolders.json")) {
        let paths = file
            .trusted_folders
            .into_iter()
            .map(|p| (p, String::new()))
            .collect();
        add_project_paths(&mut map, paths);
    }

    map
}

fn add_project_paths(map: &mut HashMap<String, String>, paths: HashMap<String, String>) {
    let mut sorted: Vec<(String, String)> = paths.into_iter().collect();
    sorted.sort();

    for (abs, name) in sorted {
        let project =
            project_from_cwd(&abs, None).unwrap_or_else(|| UNKNOWN_PROJECT.to_string());
        map.entry(content_hash(abs.as_bytes()))
            .or_insert_with(|| project.clone());
        if !name.is_empty() {
            map.entry(name).or_insert(project);
        }
    }
}

fn resolve_gemini_project(dir: &str, projects: &HashMap<String, String>) -> String {
    if let Some(project) = projects.get(dir).filter(|p| !p.is_empty()) {
        return project.clone();
    }
    if is_sha256_hex(dir) {
        return UNKNOWN_PROJECT.to_string();
    }
    normalize_name(dir)
}

fn is_sha256_hex(s: &str) -> bool {
    s.len() == 64 && s.bytes().all(|b| b.is_ascii_hexdigit())
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Option<T> {
    let data = std::fs::read(path).ok()?;
    match serde_json::from_slice(&data) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "ignoring unreadable JSON file");
            None
        }
    }
}

#[cfg(test)]
#[path = "discovery_tests.rs"]
mod tests;

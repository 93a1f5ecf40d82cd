//! Claude Code sessions: one JSONL file per session under a project directory.
//!
//! Entries carry `uuid`/`parentUuid` links. When every entry is linked and the
//! links form a single tree, the tree is walked so that rewound retries follow
//! the latest branch while long-lived forks become sessions of their own.
//! Anything else is read in file order.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::{Map, Value};
use sessync_core::models::{AgentKind, MessageRole, Relationship};

use crate::content::extract_content;
use crate::lines::read_json_lines;
use crate::project::{UNKNOWN_PROJECT, project_from_cwd};
use crate::time::{Bounds, parse_timestamp};
use crate::turns::{Turn, assemble};
use crate::{ParseError, ParseInput, ParseOutput, ParsedSession, Result, SessionMeta};

/// A fork whose first branch has more user turns than this is kept as a
/// separate session; shorter ones are treated as retries.
pub const FORK_THRESHOLD: usize = 3;

const SYSTEM_PREFIXES: [&str; 7] = [
    "This session is being continued",
    "[Request interrupted",
    "<task-notification>",
    "<command-message>",
    "<command-name>",
    "<local-command-",
    "Stop hook feedback:",
];

static TASK_ID_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"<task-id>\s*([^<\s]+)\s*</task-id>").ok());
static TOOL_USE_ID_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"<tool-use-id>\s*([^<\s]+)\s*</tool-use-id>").ok());

struct Entry {
    uuid: Option<String>,
    parent_uuid: Option<String>,
    role: MessageRole,
    record: Map<String, Value>,
    timestamp: Option<DateTime<Utc>>,
}

/// Conventions of one Claude-shaped transcript family.
pub(crate) struct Dialect {
    pub agent: AgentKind,
    /// File-name prefix that is not part of the session id.
    pub stem_prefix: &'static str,
}

const CLAUDE: Dialect = Dialect {
    agent: AgentKind::Claude,
    stem_prefix: "",
};

struct Branch {
    indices: Vec<usize>,
    id: String,
    parent_session_id: Option<String>,
    relationship: Option<Relationship>,
}

/// Parse a Claude Code session file.
pub fn parse(input: &ParseInput<'_>) -> Result<ParseOutput> {
    parse_dialect(input, &CLAUDE)
}

/// Parse a Claude-shaped transcript, naming sessions after `dialect`.
pub(crate) fn parse_dialect(input: &ParseInput<'_>, dialect: &Dialect) -> Result<ParseOutput> {
    let lines = read_json_lines(input.bytes);
    if lines.records.is_empty() {
        return Err(ParseError::format(dialect.agent, "no valid JSON records"));
    }

    let stem = input.file_stem();
    let raw_id = stem.strip_prefix(dialect.stem_prefix).unwrap_or(&stem);
    let id_prefix = dialect.agent.id_prefix();
    let mut global = Bounds::default();
    let mut subagents: HashMap<String, String> = HashMap::new();
    let mut entries: Vec<Entry> = Vec::new();
    let mut embedded_session_id: Option<String> = None;
    let mut cwd: Option<String> = None;
    let mut git_branch: Option<String> = None;

    for record in lines.records {
        let timestamp = record_timestamp(&record);
        global.observe(timestamp);

        let role = match str_field(&record, "type") {
            "queue-operation" => {
                if str_field(&record, "operation") == "enqueue" {
                    record_subagent(&record, &mut subagents);
                }
                continue;
            }
            "user" => MessageRole::User,
            "assistant" => MessageRole::Assistant,
            _ => continue,
        };

        if embedded_session_id.is_none() {
            embedded_session_id = non_empty_field(&record, "sessionId");
        }
        if role == MessageRole::User {
            if cwd.is_none() {
                cwd = non_empty_field(&record, "cwd");
            }
            if git_branch.is_none() {
                git_branch = non_empty_field(&record, "gitBranch");
            }
        }

        entries.push(Entry {
            uuid: non_empty_field(&record, "uuid"),
            parent_uuid: non_empty_field(&record, "parentUuid"),
            role,
            record,
            timestamp,
        });
    }

    let project = cwd
        .as_deref()
        .and_then(|cwd| project_from_cwd(cwd, git_branch.as_deref()))
        .or_else(|| input.project.map(str::to_string))
        .unwrap_or_else(|| UNKNOWN_PROJECT.to_string());

    let parent_session_id = embedded_session_id
        .map(|sid| sid.strip_prefix(dialect.stem_prefix).unwrap_or(&sid).to_string())
        .filter(|sid| sid != raw_id)
        .map(|sid| format!("{id_prefix}{sid}"));
    let relationship = parent_session_id.as_ref().map(|_| {
        if raw_id.starts_with("agent-") {
            Relationship::Subagent
        } else {
            Relationship::Continuation
        }
    });

    let main = Branch {
        indices: (0..entries.len()).collect(),
        id: format!("{id_prefix}{raw_id}"),
        parent_session_id,
        relationship,
    };
    let branches = if !entries.is_empty() && entries.iter().all(|e| e.uuid.is_some()) {
        dag_branches(&entries, main)
    } else {
        vec![main]
    };

    let mut output = ParseOutput {
        malformed_records: lines.malformed,
        ..ParseOutput::default()
    };

    for (i, branch) in branches.into_iter().enumerate() {
        let (mut turns, mut bounds, unknown) = extract_turns(&entries, &branch.indices);
        output.unknown_blocks += unknown;
        if i == 0 {
            bounds = bounds.merge(global);
        }
        annotate_subagents(&mut turns, &subagents);

        let assembled = assemble(&branch.id, turns);
        let meta = SessionMeta {
            agent: dialect.agent,
            id: branch.id,
            project: project.clone(),
            parent_session_id: branch.parent_session_id,
            relationship: branch.relationship,
            bounds,
        };
        output
            .sessions
            .push(ParsedSession::build(input, meta, assembled));
    }

    Ok(output)
}

/// Split the entry tree into the main branch and any long-lived forks.
///
/// Falls back to `main` (file order) unless there is exactly one root and
/// every parent link resolves.
fn dag_branches(entries: &[Entry], main: Branch) -> Vec<Branch> {
    let mut children: HashMap<&str, Vec<usize>> = HashMap::new();
    let mut known: HashSet<&str> = HashSet::new();
    let mut roots = Vec::new();

    for (i, entry) in entries.iter().enumerate() {
        if let Some(uuid) = entry.uuid.as_deref() {
            known.insert(uuid);
        }
        match entry.parent_uuid.as_deref() {
            Some(parent) => children.entry(parent).or_default().push(i),
            None => roots.push(i),
        }
    }

    let dangling = entries
        .iter()
        .filter_map(|e| e.parent_uuid.as_deref())
        .any(|parent| !known.contains(parent));
    if roots.len() != 1 || dangling {
        return vec![main];
    }

    let mut walker = Walker {
        entries,
        children: &children,
        main_id: &main.id,
        forks: Vec::new(),
        visited: HashSet::new(),
    };
    let indices = walker.walk(roots[0], &main.id);
    let forks = walker.forks;

    let mut branches = vec![Branch { indices, ..main }];
    branches.extend(forks);
    branches
}

struct Walker<'a> {
    entries: &'a [Entry],
    children: &'a HashMap<&'a str, Vec<usize>>,
    main_id: &'a str,
    forks: Vec<Branch>,
    visited: HashSet<usize>,
}

impl Walker<'_> {
    fn kids(&self, idx: usize) -> &[usize] {
        self.entries[idx]
            .uuid
            .as_deref()
            .and_then(|uuid| self.children.get(uuid))
            .map_or(&[], Vec::as_slice)
    }

    fn walk(&mut self, start: usize, owner: &str) -> Vec<usize> {
        let mut path = Vec::new();
        let mut current = start;

        while self.visited.insert(current) {
            path.push(current);
            let kids = self.kids(current).to_vec();
            match kids.as_slice() {
                [] => break,
                [only] => current = *only,
                [first, .., last] => {
                    if self.user_turns_from(*first) <= FORK_THRESHOLD {
                        current = *last;
                    } else {
                        for &kid in &kids[1..] {
                            let fork_id = format!(
                                "{}-{}",
                                self.main_id,
                                self.entries[kid].uuid.as_deref().unwrap_or_default()
                            );
                            let indices = self.walk(kid, &fork_id);
                            self.forks.push(Branch {
                                indices,
                                id: fork_id,
                                parent_session_id: Some(owner.to_string()),
                                relationship: Some(Relationship::Fork),
                            });
                        }
                        current = *first;
                    }
                }
            }
        }

        path
    }

    /// User entries reachable from `start` following first children.
    fn user_turns_from(&self, start: usize) -> usize {
        let mut count = 0;
        let mut current = start;
        let mut seen = HashSet::new();
        while seen.insert(current) {
            if self.entries[current].role == MessageRole::User {
                count += 1;
            }
            match self.kids(current).first() {
                Some(next) => current = *next,
                None => break,
            }
        }
        count
    }
}

fn extract_turns(entries: &[Entry], indices: &[usize]) -> (Vec<Turn>, Bounds, usize) {
    let mut turns = Vec::new();
    let mut bounds = Bounds::default();
    let mut unknown = 0;

    for &idx in indices {
        let entry = &entries[idx];
        bounds.observe(entry.timestamp);

        if entry.role == MessageRole::User
            && (bool_field(&entry.record, "isMeta") || bool_field(&entry.record, "isCompactSummary"))
        {
            continue;
        }

        let body = entry
            .record
            .get("message")
            .and_then(|m| m.get("content"))
            .unwrap_or(&Value::Null);
        let extracted = extract_content(body);
        unknown += extracted.unknown_blocks;

        if extracted.content.trim().is_empty() && extracted.tool_results.is_empty() {
            continue;
        }
        if entry.role == MessageRole::User && is_system_message(&extracted.content) {
            continue;
        }

        turns.push(Turn::extracted(entry.role, extracted, entry.timestamp));
    }

    (turns, bounds, unknown)
}

fn annotate_subagents(turns: &mut [Turn], subagents: &HashMap<String, String>) {
    if subagents.is_empty() {
        return;
    }
    for call in turns.iter_mut().flat_map(|t| t.tool_calls.iter_mut()) {
        if call.tool_name != "Task" {
            continue;
        }
        if let Some(sid) = call.tool_use_id.as_ref().and_then(|id| subagents.get(id)) {
            call.subagent_session_id = Some(sid.clone());
        }
    }
}

/// Map a Task tool_use_id to its subagent session from a queue enqueue record.
fn record_subagent(record: &Map<String, Value>, subagents: &mut HashMap<String, String>) {
    let content = str_field(record, "content");
    if content.is_empty() {
        return;
    }

    let parsed = serde_json::from_str::<Value>(content).ok();
    let from_json = |key: &str| {
        parsed
            .as_ref()
            .and_then(|v| v.get(key))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let mut tool_use_id = from_json("tool_use_id");
    let mut task_id = from_json("task_id");
    if tool_use_id.is_none() || task_id.is_none() {
        task_id = task_id.or_else(|| capture(&TASK_ID_RE, content));
        tool_use_id = tool_use_id.or_else(|| capture(&TOOL_USE_ID_RE, content));
    }

    if let (Some(tool_use_id), Some(task_id)) = (tool_use_id, task_id) {
        subagents.insert(tool_use_id, format!("agent-{task_id}"));
    }
}

fn capture(re: &LazyLock<Option<Regex>>, haystack: &str) -> Option<String> {
    let re = re.as_ref()?;
    re.captures(haystack)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

fn record_timestamp(record: &Map<String, Value>) -> Option<DateTime<Utc>> {
    record
        .get("timestamp")
        .and_then(parse_timestamp)
        .or_else(|| {
            record
                .get("snapshot")
                .and_then(|s| s.get("timestamp"))
                .and_then(parse_timestamp)
        })
}

/// Whether a user turn is text injected by the agent rather than typed.
pub fn is_system_message(content: &str) -> bool {
    let trimmed = content.trim_start();
    SYSTEM_PREFIXES.iter().any(|p| trimmed.starts_with(p))
}

fn str_field<'a>(record: &'a Map<String, Value>, key: &str) -> &'a str {
    record.get(key).and_then(Value::as_str).unwrap_or("")
}

fn non_empty_field(record: &Map<String, Value>, key: &str) -> Option<String> {
    Some(str_field(record, key))
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn bool_field(record: &Map<String, Value>, key: &str) -> bool {
    record.get(key).and_then(Value::as_bool).unwrap_or(false)
}

#[cfg(test)]
#[path = "claude_tests.rs"]
mod tests;

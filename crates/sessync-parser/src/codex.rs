//! Codex CLI rollouts: `<root>/YYYY/MM/DD/rollout-*.jsonl`.
//!
//! Each line is `{timestamp, type, payload}`. `session_meta` carries the id
//! and working directory; `response_item` carries messages, reasoning markers
//! and function calls with their outputs.

use serde_json::Value;
use sessync_core::models::{AgentKind, MessageRole, ToolCall};
use tracing::debug;

use crate::content::{PART_SEPARATOR, ToolResult, non_empty, str_at, tool_result_length};
use crate::lines::read_json_lines;
use crate::project::{UNKNOWN_PROJECT, project_from_cwd};
use crate::taxonomy::{OTHER, normalize_tool_category};
use crate::time::{Bounds, parse_timestamp};
use crate::turns::{Turn, assemble, truncate};
use crate::{ParseError, ParseInput, ParseOutput, ParsedSession, Result, SessionMeta};

/// Originator of non-interactive `codex exec` runs.
pub const EXEC_ORIGINATOR: &str = "codex_exec";

const ARG_PREVIEW_LEN: usize = 220;
const PATCH_LIST_LIMIT: usize = 6;

const SYSTEM_PREFIXES: [&str; 3] = ["# AGENTS.md", "<environment_context>", "<INSTRUCTIONS>"];

const PATCH_PREFIXES: [&str; 4] = [
    "*** Add File: ",
    "*** Update File: ",
    "*** Delete File: ",
    "*** Move to: ",
];

/// Parse a Codex rollout file.
///
/// Returns no sessions for `codex exec` runs unless
/// [`ParseInput::include_codex_exec`] is set.
pub fn parse(input: &ParseInput<'_>) -> Result<ParseOutput> {
    let lines = read_json_lines(input.bytes);
    if lines.records.is_empty() {
        return Err(ParseError::format(AgentKind::Codex, "no valid JSON records"));
    }

    let mut output = ParseOutput {
        malformed_records: lines.malformed,
        ..ParseOutput::default()
    };
    let mut embedded_id: Option<String> = None;
    let mut project: Option<String> = None;
    let mut bounds = Bounds::default();
    let mut turns: Vec<Turn> = Vec::new();
    let mut pending_thinking = false;

    for record in lines.records.into_iter().map(Value::Object) {
        let timestamp = record.get("timestamp").and_then(parse_timestamp);
        bounds.observe(timestamp);
        let payload = record.get("payload").unwrap_or(&Value::Null);

        match str_at(&record, "type") {
            "session_meta" => {
                embedded_id = non_empty(str_at(payload, "id"));
                let cwd = str_at(payload, "cwd");
                if !cwd.is_empty() {
                    let branch = payload
                        .get("git")
                        .map(|git| str_at(git, "branch"))
                        .filter(|b| !b.is_empty());
                    project = Some(
                        project_from_cwd(cwd, branch)
                            .unwrap_or_else(|| UNKNOWN_PROJECT.to_string()),
                    );
                }
                if !input.include_codex_exec && str_at(payload, "originator") == EXEC_ORIGINATOR {
                    debug!(path = %input.path.display(), "skipping codex exec session");
                    return Ok(output);
                }
            }
            "response_item" => match str_at(payload, "type") {
                "function_call" | "custom_tool_call" => {
                    if let Some(mut turn) = function_call_turn(payload, timestamp) {
                        turn.has_thinking = std::mem::take(&mut pending_thinking);
                        turns.push(turn);
                    }
                }
                "function_call_output" | "custom_tool_call_output" => {
                    if let Some(id) = non_empty(str_at(payload, "call_id")) {
                        let mut turn = Turn::text(MessageRole::User, String::new(), timestamp);
                        turn.tool_results.push(ToolResult {
                            tool_use_id: id,
                            content_length: tool_result_length(
                                payload.get("output").unwrap_or(&Value::Null),
                            ),
                        });
                        turns.push(turn);
                    }
                }
                "reasoning" => pending_thinking = true,
                _ => {
                    let role = match str_at(payload, "role") {
                        "user" => MessageRole::User,
                        "assistant" => MessageRole::Assistant,
                        _ => continue,
                    };
                    let (content, unknown) = message_text(payload);
                    output.unknown_blocks += unknown;
                    if content.trim().is_empty() {
                        continue;
                    }
                    if role == MessageRole::User && is_system_message(&content) {
                        continue;
                    }
                    let mut turn = Turn::text(role, content, timestamp);
                    if role == MessageRole::Assistant {
                        turn.has_thinking = std::mem::take(&mut pending_thinking);
                    }
                    turns.push(turn);
                }
            },
            _ => {}
        }
    }

    let id = format!(
        "{}{}",
        AgentKind::Codex.id_prefix(),
        embedded_id.unwrap_or_else(|| input.file_stem())
    );
    let assembled = assemble(&id, turns);
    let meta = SessionMeta {
        agent: AgentKind::Codex,
        id,
        project: project.unwrap_or_else(|| UNKNOWN_PROJECT.to_string()),
        parent_session_id: None,
        relationship: None,
        bounds,
    };
    output
        .sessions
        .push(ParsedSession::build(input, meta, assembled));
    Ok(output)
}

/// Whether a user message is harness-injected context.
pub fn is_system_message(content: &str) -> bool {
    SYSTEM_PREFIXES.iter().any(|p| content.starts_with(p))
}

/// Text blocks of a message joined in order, plus the count of non-text blocks.
fn message_text(payload: &Value) -> (String, usize) {
    let blocks = match payload.get("content") {
        Some(Value::Array(blocks)) => blocks.as_slice(),
        Some(Value::String(text)) => return (text.clone(), 0),
        _ => return (String::new(), 0),
    };

    let mut parts = Vec::new();
    let mut unknown = 0;
    for block in blocks {
        match str_at(block, "type") {
            "input_text" | "output_text" | "text" => {
                let text = str_at(block, "text");
                if !text.is_empty() {
                    parts.push(text);
                }
            }
            _ => unknown += 1,
        }
    }
    (parts.join(PART_SEPARATOR), unknown)
}

fn function_call_turn(
    payload: &Value,
    timestamp: Option<chrono::DateTime<chrono::Utc>>,
) -> Option<Turn> {
    let name = str_at(payload, "name");
    if name.is_empty() {
        return None;
    }
    let args = Args::from_payload(payload);

    let mut turn = Turn::text(
        MessageRole::Assistant,
        format_function_call(name, payload, &args),
        timestamp,
    );
    turn.has_tool_use = true;
    turn.tool_calls.push(ToolCall {
        tool_name: name.to_string(),
        category: normalize_tool_category(name).to_string(),
        tool_use_id: non_empty(str_at(payload, "call_id")),
        input_json: args.json.as_ref().map(Value::to_string).or(args.raw.clone()),
        ..ToolCall::default()
    });
    Some(turn)
}

/// Function-call arguments: decoded JSON when possible, the raw text otherwise.
#[derive(Debug, Default)]
struct Args {
    json: Option<Value>,
    raw: Option<String>,
}

impl Args {
    fn from_payload(payload: &Value) -> Self {
        for key in ["arguments", "input"] {
            match payload.get(key) {
                None | Some(Value::Null) => {}
                Some(Value::String(s)) => {
                    let s = s.trim();
                    if s.is_empty() {
                        continue;
                    }
                    return match serde_json::from_str::<Value>(s) {
                        Ok(json) => Self {
                            json: Some(json),
                            raw: None,
                        },
                        Err(_) => Self {
                            json: None,
                            raw: Some(s.to_string()),
                        },
                    };
                }
                Some(Value::Object(map)) if map.is_empty() => {}
                Some(Value::Array(items)) if items.is_empty() => {}
                Some(other) => {
                    return Self {
                        json: Some(other.clone()),
                        raw: None,
                    };
                }
            }
        }
        Self::default()
    }

    /// Field rendered as text; non-string values keep their JSON form.
    fn string(&self, key: &str) -> String {
        match self.json.as_ref().and_then(|v| v.get(key)) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(Value::Array(items)) if items.iter().all(Value::is_string) => items
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(" "),
            Some(other) => other.to_string(),
        }
    }

    fn value(&self, keys: &[&str]) -> String {
        keys.iter()
            .map(|key| self.string(key).trim().to_string())
            .find(|v| !v.is_empty())
            .unwrap_or_default()
    }

    fn preview(&self) -> String {
        let flat = match (&self.raw, &self.json) {
            (Some(raw), _) => collapse_whitespace(raw),
            (None, Some(json)) => collapse_whitespace(&json.to_string()),
            (None, None) => return String::new(),
        };
        truncate(&flat, ARG_PREVIEW_LEN)
    }
}

/// Placeholder text for a Codex function call.
fn format_function_call(name: &str, payload: &Value, args: &Args) -> String {
    let summary = sanitize_label(str_at(payload, "summary"));

    match name {
        "exec_command" | "shell_command" | "shell" => return format_bash(&summary, args),
        "write_stdin" => return format_write_stdin(summary, args),
        "apply_patch" => return format_apply_patch(summary, args),
        _ => {}
    }

    let category = normalize_tool_category(name);
    let preview = args.preview();
    let (header, body) = if category == OTHER {
        let body = if summary.is_empty() { preview } else { summary };
        (tool_header("Tool", name), body)
    } else {
        let detail = if summary.is_empty() {
            category_detail(category, args)
        } else {
            summary
        };
        (tool_header(category, &detail), preview)
    };
    with_body(header, &body)
}

fn format_bash(summary: &str, args: &Args) -> String {
    let mut command = args.value(&["cmd", "command"]);
    if command.is_empty() {
        if let Some(raw) = &args.raw {
            command = raw.clone();
        } else if let Some(Value::String(s)) = &args.json {
            command = s.trim().to_string();
        }
    }

    let header = tool_header("Bash", summary);
    if command.is_empty() {
        with_body(header, &args.preview())
    } else {
        format!("{header}\n$ {command}")
    }
}

fn format_write_stdin(summary: String, args: &Args) -> String {
    let summary = if !summary.is_empty() {
        summary
    } else {
        match args.value(&["session_id"]) {
            sid if sid.is_empty() => "stdin".to_string(),
            sid => format!("stdin -> {sid}"),
        }
    };

    let header = tool_header("Bash", &summary);
    let chars = args.string("chars");
    if chars.is_empty() {
        with_body(header, &args.preview())
    } else {
        let quoted = chars.escape_default().to_string();
        format!("{header}\n{}", truncate(&quoted, ARG_PREVIEW_LEN))
    }
}

fn format_apply_patch(summary: String, args: &Args) -> String {
    let mut patch = args.string("patch");
    if patch.is_empty() {
        if let Some(raw) = args.raw.as_ref().filter(|r| r.contains("*** Begin Patch")) {
            patch = raw.clone();
        }
    }

    let files = patched_files(&patch);
    let summary = if summary.is_empty() {
        summarize_files(&files)
    } else {
        summary
    };
    let header = tool_header("Edit", &summary);

    if files.len() > 1 {
        let shown = files.len().min(PATCH_LIST_LIMIT);
        let mut body = files[..shown].join("\n");
        if files.len() > shown {
            body.push_str(&format!("\n+{} more files", files.len() - shown));
        }
        return format!("{header}\n{body}");
    }
    if files.is_empty() {
        return with_body(header, &args.preview());
    }
    header
}

/// Files touched by an `apply_patch` body, in first-seen order.
pub fn patched_files(patch: &str) -> Vec<String> {
    let mut files: Vec<String> = Vec::new();
    for line in patch.lines() {
        let Some(file) = PATCH_PREFIXES
            .iter()
            .find_map(|prefix| line.strip_prefix(prefix))
            .map(str::trim)
            .filter(|f| !f.is_empty())
        else {
            continue;
        };
        if !files.iter().any(|seen| seen == file) {
            files.push(file.to_string());
        }
    }
    files
}

fn summarize_files(files: &[String]) -> String {
    match files {
        [] => String::new(),
        [only] => only.clone(),
        [first, rest @ ..] => format!("{first} (+{} more)", rest.len()),
    }
}

fn category_detail(category: &str, args: &Args) -> String {
    match category {
        "Read" | "Write" | "Edit" => args.value(&["file_path", "path"]),
        "Grep" => args.value(&["pattern"]),
        "Glob" => joined(args.value(&["pattern"]), args.value(&["path"]), |p, d| {
            format!("{p} in {d}")
        }),
        "Task" => joined(
            args.value(&["description"]),
            args.value(&["subagent_type"]),
            |d, a| format!("{d} ({a})"),
        ),
        _ => String::new(),
    }
}

/// Combine two optional labels, falling back to whichever is present.
fn joined(a: String, b: String, both: impl Fn(&str, &str) -> String) -> String {
    match (a.is_empty(), b.is_empty()) {
        (false, false) => both(&a, &b),
        (false, true) => a,
        _ => b,
    }
}

pub(crate) fn tool_header(label: &str, detail: &str) -> String {
    let label = match sanitize_label(label) {
        l if l.is_empty() => "Tool".to_string(),
        l => l,
    };
    match sanitize_label(detail) {
        d if d.is_empty() => format!("[{label}]"),
        d => format!("[{label}: {d}]"),
    }
}

fn with_body(header: String, body: &str) -> String {
    if body.is_empty() {
        header
    } else {
        format!("{header}\n{body}")
    }
}

fn sanitize_label(s: &str) -> String {
    collapse_whitespace(&s.replace(']', ")"))
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
#[path = "codex_tests.rs"]
mod tests;

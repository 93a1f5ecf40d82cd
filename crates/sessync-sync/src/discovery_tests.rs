//! Unit tests for discovery layouts.

use std::fs;
use std::path::{Path, PathBuf};

use sessync_core::models::AgentKind;

use super::{
    candidate_for_path, content_hash, discover, find_source_file, gemini_project_map,
    root_for_path,
};

fn touch(path: &Path) {
    put(path, "{}\n");
}

fn put(path: &Path, contents: &str) {
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(path, contents).expect("write");
}

fn names(root: &Path, agent: AgentKind) -> Vec<String> {
    discover(agent, root)
        .iter()
        .map(|c| {
            c.path
                .strip_prefix(root)
                .expect("under root")
                .to_string_lossy()
                .replace('\\', "/")
        })
        .collect()
}

#[test]
fn claude_layout() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path();
    touch(&root.join("-Users-alice-code-shop/s1.jsonl"));
    touch(&root.join("-Users-alice-code-shop/agent-a1.jsonl"));
    touch(&root.join("-Users-alice-code-shop/notes.txt"));
    touch(&root.join("-Users-alice-code-shop/s1/subagents/agent-b2.jsonl"));
    touch(&root.join("-Users-alice-code-shop/s1/subagents/other.jsonl"));
    touch(&root.join("stray.jsonl"));

    assert_eq!(
        names(root, AgentKind::Claude),
        vec![
            "-Users-alice-code-shop/s1.jsonl",
            "-Users-alice-code-shop/s1/subagents/agent-b2.jsonl",
        ]
    );

    let found = discover(AgentKind::Claude, root);
    assert!(found.iter().all(|c| c.project.as_deref() == Some("shop")));
    assert!(found.iter().all(|c| c.agent == AgentKind::Claude));
    assert_eq!(found[0].fingerprint.size, 3);
}

#[test]
fn codex_layout() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path();
    touch(&root.join("2025/03/14/rollout-a.jsonl"));
    touch(&root.join("2025/03/15/rollout-b.jsonl"));
    touch(&root.join("2025/03/15/rollout-b.json"));
    touch(&root.join("archive/03/15/rollout-c.jsonl"));
    touch(&root.join("2025/03/rollout-d.jsonl"));

    assert_eq!(
        names(root, AgentKind::Codex),
        vec!["2025/03/14/rollout-a.jsonl", "2025/03/15/rollout-b.jsonl"]
    );
}

#[test]
fn gemini_layout_and_projects() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path();

    let known_hash = content_hash(b"/home/alice/code/web-app");
    let orphan_hash = content_hash(b"/gone");
    fs::write(
        root.join("projects.json"),
        r#"{"projects": {"/home/alice/code/web-app": "web-app"}}"#,
    )
    .expect("projects");
    fs::write(
        root.join("trustedFolders.json"),
        r#"{"trustedFolders": ["/srv/api"]}"#,
    )
    .expect("trusted");
    let trusted_hash = content_hash(b"/srv/api");

    touch(&root.join(format!("tmp/{known_hash}/chats/session-1.json")));
    touch(&root.join(format!("tmp/{orphan_hash}/chats/session-2.json")));
    touch(&root.join(format!("tmp/{trusted_hash}/chats/session-3.json")));
    touch(&root.join("tmp/my-tool/chats/session-4.json"));
    touch(&root.join("tmp/my-tool/chats/logs.json"));
    touch(&root.join("tmp/my-tool/session-5.json"));

    let found = discover(AgentKind::Gemini, root);
    assert_eq!(found.len(), 4);

    let project_of = |needle: &str| {
        found
            .iter()
            .find(|c| c.path.to_string_lossy().contains(needle))
            .and_then(|c| c.project.clone())
            .expect("candidate")
    };
    assert_eq!(project_of(&known_hash), "web_app");
    assert_eq!(project_of(&orphan_hash), "unknown");
    assert_eq!(project_of(&trusted_hash), "api");
    assert_eq!(project_of("my-tool"), "my_tool");
}

#[test]
fn gemini_map_keys_by_hash_and_name() {
    let dir = tempfile::tempdir().expect("tempdir");
    fs::write(
        dir.path().join("projects.json"),
        r#"{"projects": {"/w/alpha": "alpha"}}"#,
    )
    .expect("write");

    let map = gemini_project_map(dir.path());
    assert_eq!(map.get("alpha").map(String::as_str), Some("alpha"));
    assert_eq!(
        map.get(&content_hash(b"/w/alpha")).map(String::as_str),
        Some("alpha")
    );
}

#[test]
fn missing_root_is_empty() {
    let dir = tempfile::tempdir().expect("tempdir");
    assert!(discover(AgentKind::Claude, &dir.path().join("nope")).is_empty());
    assert!(discover(AgentKind::Gemini, dir.path()).is_empty());
}

#[test]
fn copilot_layout_prefers_directory_form() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path();
    touch(&root.join("session-state/aa.jsonl"));
    touch(&root.join("session-state/bb.jsonl"));
    touch(&root.join("session-state/bb/events.jsonl"));
    touch(&root.join("session-state/cc/notes.jsonl"));
    touch(&root.join("config.jsonl"));

    assert_eq!(
        names(root, AgentKind::Copilot),
        vec!["session-state/aa.jsonl", "session-state/bb/events.jsonl"]
    );
}

#[test]
fn pi_layout_requires_session_header() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path();
    put(
        &root.join("--home-al-bot--/p1.jsonl"),
        "\n{\"type\":\"session\",\"id\":\"p1\"}\n",
    );
    put(&root.join("--home-al-bot--/p2.jsonl"), "{\"type\":\"message\"}\n");
    put(&root.join("p3.jsonl"), "{\"type\":\"session\"}\n");

    assert_eq!(names(root, AgentKind::Pi), vec!["--home-al-bot--/p1.jsonl"]);
}

#[test]
fn amp_and_iflow_layouts() {
    let dir = tempfile::tempdir().expect("tempdir");
    let amp = dir.path().join("amp");
    touch(&amp.join("T-abc.json"));
    touch(&amp.join("settings.json"));
    touch(&amp.join("nested/T-def.json"));
    assert_eq!(names(&amp, AgentKind::Amp), vec!["T-abc.json"]);

    let iflow = dir.path().join("iflow");
    touch(&iflow.join("-home-al-code-kiln/session-k1.jsonl"));
    touch(&iflow.join("-home-al-code-kiln/history.jsonl"));
    let found = discover(AgentKind::Iflow, &iflow);
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].project.as_deref(), Some("kiln"));
}

#[test]
fn single_path_follows_the_same_rules() {
    let dir = tempfile::tempdir().expect("tempdir");
    let claude = dir.path().join("claude");
    let codex = dir.path().join("codex");
    let roots = vec![(AgentKind::Claude, claude.clone()), (AgentKind::Codex, codex.clone())];

    let session = claude.join("-Users-alice-code-shop/s1.jsonl");
    touch(&session);
    touch(&claude.join("-Users-alice-code-shop/notes.txt"));
    touch(&codex.join("2025/01/02/rollout-x.jsonl"));

    let found = candidate_for_path(&roots, &session).expect("session file");
    assert_eq!(found.agent, AgentKind::Claude);
    assert_eq!(found.project.as_deref(), Some("shop"));
    assert_eq!(found.fingerprint.size, 3);
    assert_eq!(
        Some(found),
        discover(AgentKind::Claude, &claude).into_iter().next()
    );

    let rollout = candidate_for_path(&roots, &codex.join("2025/01/02/rollout-x.jsonl"));
    assert_eq!(rollout.map(|c| c.agent), Some(AgentKind::Codex));

    assert!(candidate_for_path(&roots, &claude.join("-Users-alice-code-shop/notes.txt")).is_none());
    assert!(candidate_for_path(&roots, &claude.join("-Users-alice-code-shop/gone.jsonl")).is_none());
    assert!(candidate_for_path(&roots, Path::new("/elsewhere/s.jsonl")).is_none());
}

#[test]
fn session_ids_resolve_to_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    let base = dir.path();
    let roots = vec![
        (AgentKind::Claude, base.join("claude")),
        (AgentKind::Codex, base.join("codex")),
        (AgentKind::Gemini, base.join("gemini")),
        (AgentKind::Copilot, base.join("copilot")),
        (AgentKind::Amp, base.join("amp")),
        (AgentKind::Iflow, base.join("iflow")),
    ];

    let claude = base.join("claude/-w-shop/s1.jsonl");
    let subagent = base.join("claude/-w-shop/s1/subagents/agent-x9.jsonl");
    let rollout = base.join("codex/2025/01/02/rollout-2025-01-02T10-00-00-0195aa.jsonl");
    let gemini = base.join("gemini/tmp/shop/chats/session-2025-01-02T10-00-abcd1234.json");
    let copilot = base.join("copilot/session-state/cp7/events.jsonl");
    let amp = base.join("amp/T-77.json");
    let iflow = base.join("iflow/-w-kiln/session-k1.jsonl");
    for path in [&claude, &subagent, &rollout, &copilot, &amp, &iflow] {
        touch(path);
    }
    put(&gemini, r#"{"sessionId": "abcd1234-ffff"}"#);
    put(
        &base.join("gemini/tmp/shop/chats/session-2025-01-03T10-00-abcd1234.json"),
        r#"{"sessionId": "abcd1234-0000"}"#,
    );

    assert_eq!(find_source_file(&roots, "s1"), Some(claude));
    assert_eq!(find_source_file(&roots, "agent-x9"), Some(subagent));
    assert_eq!(find_source_file(&roots, "codex:0195aa"), Some(rollout));
    assert_eq!(find_source_file(&roots, "gemini:abcd1234-ffff"), Some(gemini));
    assert_eq!(find_source_file(&roots, "copilot:cp7"), Some(copilot));
    assert_eq!(find_source_file(&roots, "amp:T-77"), Some(amp));
    assert_eq!(find_source_file(&roots, "iflow:k1"), Some(iflow));

    assert_eq!(find_source_file(&roots, "missing"), None);
    assert_eq!(find_source_file(&roots, "pi:p1"), None, "no pi root configured");
    assert_eq!(find_source_file(&roots, "codex:../etc"), None);
}

#[test]
fn changed_path_maps_to_deepest_root() {
    let roots = vec![
        (AgentKind::Gemini, PathBuf::from("/h/.gemini")),
        (AgentKind::Claude, PathBuf::from("/h/.claude/projects")),
    ];
    let nested = vec![
        (AgentKind::Gemini, PathBuf::from("/h")),
        (AgentKind::Claude, PathBuf::from("/h/.claude/projects")),
    ];
    assert_eq!(
        root_for_path(&nested, Path::new("/h/.claude/projects/p/s.jsonl")),
        Some((AgentKind::Claude, Path::new("/h/.claude/projects")))
    );
    assert_eq!(root_for_path(&roots, Path::new("/elsewhere/x.json")), None);
}

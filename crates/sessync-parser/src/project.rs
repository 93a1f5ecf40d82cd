//! Project-name derivation from agent directory names and working directories.

/// Label used when no project can be determined.
pub const UNKNOWN_PROJECT: &str = "unknown";

const PROJECT_MARKERS: [&str; 6] = ["code", "projects", "repos", "src", "work", "dev"];
const SYSTEM_DIRS: [&str; 5] = ["users", "home", "var", "tmp", "private"];
const DEFAULT_BRANCHES: [&str; 5] = ["main", "master", "trunk", "develop", "dev"];

/// Project labels use underscores where paths use dashes.
pub fn normalize_name(name: &str) -> String {
    name.replace('-', "_")
}

/// Decode a Claude project directory name such as `-Users-alice-code-my-app`
/// into a project label (`my_app`).
pub fn project_from_claude_dir(dir_name: &str) -> String {
    if dir_name.is_empty() {
        return String::new();
    }
    if !dir_name.starts_with('-') {
        return normalize_name(dir_name);
    }

    let parts: Vec<&str> = dir_name.split('-').collect();

    for marker in PROJECT_MARKERS {
        for (i, part) in parts.iter().enumerate() {
            if part.eq_ignore_ascii_case(marker) && i + 1 < parts.len() {
                let rest = parts[i + 1..].join("-");
                if !rest.is_empty() {
                    return normalize_name(&rest);
                }
            }
        }
    }

    parts
        .iter()
        .rev()
        .find(|part| !part.is_empty() && !SYSTEM_DIRS.contains(&part.to_lowercase().as_str()))
        .map_or_else(|| normalize_name(dir_name), |part| normalize_name(part))
}

/// Project label from a working directory: its last path component, with a
/// worktree-style `-<branch>` suffix removed.
pub fn project_from_cwd(cwd: &str, git_branch: Option<&str>) -> Option<String> {
    let cleaned = cwd.trim().trim_end_matches(['/', '\\']);
    let base = cleaned.rsplit(['/', '\\']).next().unwrap_or("");
    if base.is_empty() || base == "." || base == ".." {
        return None;
    }

    let trimmed = match git_branch {
        Some(branch) => trim_branch_suffix(base, branch),
        None => base.to_string(),
    };
    if trimmed.is_empty() {
        return None;
    }
    Some(normalize_name(&trimmed))
}

fn trim_branch_suffix(name: &str, branch: &str) -> String {
    let branch = branch.trim();
    let branch = branch.strip_prefix("refs/heads/").unwrap_or(branch);
    let token = branch_token(branch);
    if token.is_empty() || DEFAULT_BRANCHES.contains(&token.as_str()) {
        return name.to_string();
    }

    let lower = name.to_lowercase();
    for sep in ['-', '_'] {
        let suffix = format!("{sep}{token}");
        if lower.ends_with(&suffix) {
            let base = name
                .get(..name.len().saturating_sub(suffix.len()))
                .unwrap_or("")
                .trim_end_matches(['-', '_']);
            if !base.is_empty() {
                return base.to_string();
            }
        }
    }
    name.to_string()
}

/// Lowercase alphanumerics, with every run of other characters collapsed to `-`.
fn branch_token(branch: &str) -> String {
    let mut out = String::with_capacity(branch.len());
    let mut last_dash = false;
    for ch in branch.chars() {
        if ch.is_alphanumeric() {
            out.extend(ch.to_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    out.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claude_dir_uses_marker() {
        assert_eq!(project_from_claude_dir("-Users-alice-code-my-app"), "my_app");
        assert_eq!(project_from_claude_dir("-home-bob-projects-api"), "api");
    }

    #[test]
    fn claude_dir_falls_back_to_last_non_system_component() {
        assert_eq!(project_from_claude_dir("-Users-alice-scratch"), "scratch");
        assert_eq!(project_from_claude_dir("-tmp"), "_tmp");
    }

    #[test]
    fn plain_dir_name_is_normalized() {
        assert_eq!(project_from_claude_dir("my-project"), "my_project");
        assert_eq!(project_from_claude_dir(""), "");
    }

    #[test]
    fn cwd_uses_basename() {
        assert_eq!(
            project_from_cwd("/home/alice/src/web-app/", None).as_deref(),
            Some("web_app")
        );
        assert_eq!(project_from_cwd("/", None), None);
        assert_eq!(project_from_cwd("", None), None);
    }

    #[test]
    fn cwd_trims_worktree_branch_suffix() {
        assert_eq!(
            project_from_cwd("/w/app-feature-login", Some("feature/login")).as_deref(),
            Some("app")
        );
        assert_eq!(
            project_from_cwd("/w/app_fix-42", Some("refs/heads/fix-42")).as_deref(),
            Some("app")
        );
    }

    #[test]
    fn default_branch_is_not_trimmed() {
        assert_eq!(
            project_from_cwd("/w/service-main", Some("main")).as_deref(),
            Some("service_main")
        );
    }
}

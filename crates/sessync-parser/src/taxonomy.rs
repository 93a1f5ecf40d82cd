//! Tool-name normalization across agents.

/// Category used when a tool name is not recognized.
pub const OTHER: &str = "Other";

/// Map an agent-specific tool name to one of `Read`, `Edit`, `Write`, `Bash`,
/// `Grep`, `Glob`, `Task` or `Other`.
pub fn normalize_tool_category(name: &str) -> &'static str {
    match name {
        "Read" | "read_file" | "LS" | "read" | "view" => "Read",
        "Edit" | "apply_patch" | "StrReplace" | "edit" | "str_replace_editor" => "Edit",
        "Write" | "NotebookEdit" | "write_file" | "edit_file" | "write" | "create" => "Write",
        "Bash" | "Shell" | "shell" | "shell_command" | "exec_command" | "write_stdin"
        | "run_command" | "execute_command" | "run_shell_command" | "bash" => "Bash",
        "Grep" | "grep" | "search_files" | "search_file_content" => "Grep",
        "Glob" | "glob" => "Glob",
        "Task" => "Task",
        _ => OTHER,
    }
}

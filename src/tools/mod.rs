//! Agent-facing tools: definitions, results, and the dispatcher.
//!
//! Tool semantics live in [`workspace`] (file operations) and the memory
//! store; [`dispatcher`] folds them behind the single `dispatch` entry point
//! the sessions call. Definitions (name, description, JSON Schema) are
//! assembled per session kind.

use serde_json::json;

use crate::providers::ToolDefinition;

pub mod dispatcher;
pub mod workspace;

// ---------------------------------------------------------------------------
// Errors and results
// ---------------------------------------------------------------------------

/// Errors surfaced by tool implementations.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// The input JSON was missing or malformed.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The referenced path does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation ran but failed.
    #[error("{0}")]
    ExecutionFailed(String),
}

/// Outcome of one tool execution, before being wrapped into a tool_result
/// content block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    /// Result text handed back to the model.
    pub content: String,
    /// Whether the tool reported an error.
    pub is_error: bool,
}

impl ToolOutcome {
    /// Successful outcome.
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    /// Failed outcome.
    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

fn tool(name: &str, description: &str, schema: serde_json::Value) -> ToolDefinition {
    ToolDefinition {
        name: name.to_owned(),
        description: description.to_owned(),
        input_schema: schema,
    }
}

fn string_prop(description: &str) -> serde_json::Value {
    json!({ "type": "string", "description": description })
}

fn read_file_def() -> ToolDefinition {
    tool(
        "read_file",
        "Read a file from the workspace. Returns a line-numbered slice; \
         without an end line the window is capped.",
        json!({
            "type": "object",
            "properties": {
                "filePath": string_prop("Path relative to the workspace root"),
                "startLine": { "type": "integer", "description": "1-based first line" },
                "endLine": { "type": "integer", "description": "1-based last line (inclusive)" },
            },
            "required": ["filePath"],
        }),
    )
}

fn grep_search_def() -> ToolDefinition {
    tool(
        "grep_search",
        "Search file contents. The query is a regex; an invalid regex is \
         treated as a literal substring. Returns up to 100 matches.",
        json!({
            "type": "object",
            "properties": {
                "query": string_prop("Regex or literal substring"),
                "includePattern": string_prop("Optional glob restricting searched files"),
            },
            "required": ["query"],
        }),
    )
}

fn file_search_def() -> ToolDefinition {
    tool(
        "file_search",
        "Find files whose workspace-relative path matches a glob pattern.",
        json!({
            "type": "object",
            "properties": {
                "glob": string_prop("Glob pattern, e.g. src/**/*.rs"),
            },
            "required": ["glob"],
        }),
    )
}

fn list_directory_def() -> ToolDefinition {
    tool(
        "list_directory",
        "List the entries of a directory. Directories are suffixed with '/'.",
        json!({
            "type": "object",
            "properties": {
                "path": string_prop("Directory path relative to the workspace root"),
            },
            "required": ["path"],
        }),
    )
}

fn edit_file_def() -> ToolDefinition {
    tool(
        "edit_file",
        "Replace oldString with newString in a file. oldString must match \
         the current content exactly once.",
        json!({
            "type": "object",
            "properties": {
                "filePath": string_prop("Path relative to the workspace root"),
                "oldString": string_prop("Exact text to replace (must be unique in the file)"),
                "newString": string_prop("Replacement text"),
            },
            "required": ["filePath", "oldString", "newString"],
        }),
    )
}

fn create_file_def() -> ToolDefinition {
    tool(
        "create_file",
        "Create a new file with the given content. Parent directories are \
         created; fails if the file already exists.",
        json!({
            "type": "object",
            "properties": {
                "filePath": string_prop("Path relative to the workspace root"),
                "content": string_prop("Full file content"),
            },
            "required": ["filePath", "content"],
        }),
    )
}

fn delete_file_def() -> ToolDefinition {
    tool(
        "delete_file",
        "Delete a file from the workspace.",
        json!({
            "type": "object",
            "properties": {
                "filePath": string_prop("Path relative to the workspace root"),
            },
            "required": ["filePath"],
        }),
    )
}

fn git_diff_def() -> ToolDefinition {
    tool(
        "git_diff",
        "Show the diff of the working tree against the main branch.",
        json!({ "type": "object", "properties": {} }),
    )
}

fn note_to_self_def() -> ToolDefinition {
    tool(
        "note_to_self",
        "Save a note to long-term memory for future cycles.",
        json!({
            "type": "object",
            "properties": {
                "content": string_prop("The note text"),
            },
            "required": ["content"],
        }),
    )
}

fn dismiss_note_def() -> ToolDefinition {
    tool(
        "dismiss_note",
        "Dismiss a note so it no longer appears in the memory context.",
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "integer", "description": "Note id" },
            },
            "required": ["id"],
        }),
    )
}

fn recall_memory_def() -> ToolDefinition {
    tool(
        "recall_memory",
        "Look up memories by search query or fetch one by id.",
        json!({
            "type": "object",
            "properties": {
                "query": string_prop("Substring/regex search over content and summaries"),
                "id": { "type": "integer", "description": "Exact record id" },
            },
        }),
    )
}

fn done_def() -> ToolDefinition {
    tool(
        "done",
        "Signal that the work is complete. Call this exactly once, when \
         nothing remains to do.",
        json!({
            "type": "object",
            "properties": {
                "summary": string_prop("One-paragraph summary of what was done"),
            },
            "required": ["summary"],
        }),
    )
}

fn submit_plan_def() -> ToolDefinition {
    tool(
        "submit_plan",
        "Submit the improvement plan for this cycle. Terminal: the session \
         ends once the plan is submitted.",
        json!({
            "type": "object",
            "properties": {
                "title": string_prop("Short slug naming the change"),
                "description": string_prop("Human-readable rationale, used as the PR description"),
                "implementation": string_prop("Detailed handoff brief for the builder"),
            },
            "required": ["title", "description", "implementation"],
        }),
    )
}

/// Tools offered to the planner session.
pub fn planner_tools() -> Vec<ToolDefinition> {
    vec![
        submit_plan_def(),
        note_to_self_def(),
        dismiss_note_def(),
        recall_memory_def(),
        read_file_def(),
        grep_search_def(),
        file_search_def(),
        list_directory_def(),
    ]
}

/// Tools offered to the builder and fixer sessions.
pub fn builder_tools() -> Vec<ToolDefinition> {
    vec![
        edit_file_def(),
        create_file_def(),
        delete_file_def(),
        read_file_def(),
        grep_search_def(),
        file_search_def(),
        list_directory_def(),
        git_diff_def(),
        done_def(),
    ]
}

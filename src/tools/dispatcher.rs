//! Uniform tool dispatch for agent sessions.
//!
//! One entry point covers file, search, memory, edit, and terminal tools.
//! Every call produces a tool_result content block carrying the caller's
//! tool_use_id; tool failures come back with `is_error` set rather than as
//! Rust errors, because the consumer is the model. Dispatch is strictly
//! sequential in emission order — write tools share the workspace, so later
//! calls must observe the effects of earlier ones.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::memory::MemoryStore;
use crate::providers::ContentBlock;
use crate::vcs::Vcs;

use super::workspace::Workspace;
use super::{ToolError, ToolOutcome};

/// Uniform handler for all agent-facing tools.
pub struct ToolDispatcher {
    workspace: Workspace,
    memory: Arc<MemoryStore>,
    vcs: Arc<dyn Vcs>,
    read_window: usize,
}

impl std::fmt::Debug for ToolDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDispatcher")
            .field("workspace", &self.workspace.root())
            .finish_non_exhaustive()
    }
}

impl ToolDispatcher {
    /// Create a dispatcher over the workspace, memory store, and VCS.
    pub fn new(
        workspace: Workspace,
        memory: Arc<MemoryStore>,
        vcs: Arc<dyn Vcs>,
        read_window: usize,
    ) -> Self {
        Self {
            workspace,
            memory,
            vcs,
            read_window,
        }
    }

    /// Execute one tool call and wrap the outcome as a tool_result block.
    pub async fn dispatch(&self, name: &str, input: &Value, tool_use_id: &str) -> ContentBlock {
        debug!(tool = name, tool_use_id, "dispatching tool");
        let outcome = self.execute(name, input).await;
        ContentBlock::ToolResult {
            tool_use_id: tool_use_id.to_owned(),
            content: outcome.content,
            is_error: outcome.is_error,
        }
    }

    async fn execute(&self, name: &str, input: &Value) -> ToolOutcome {
        match name {
            "read_file" => self.read_file(input),
            "grep_search" => self.grep_search(input),
            "file_search" => self.file_search(input),
            "list_directory" => self.list_directory(input),
            "edit_file" => self.edit_file(input),
            "create_file" => self.create_file(input),
            "delete_file" => self.delete_file(input),
            "git_diff" => self.git_diff().await,
            "note_to_self" => self.note_to_self(input).await,
            "dismiss_note" => self.dismiss_note(input).await,
            "recall_memory" => self.recall_memory(input).await,
            "done" => ToolOutcome::success("Marked done."),
            "submit_plan" => submit_plan_ack(input),
            other => ToolOutcome::error(format!("Unknown tool: {other}")),
        }
    }

    // -- file tools ---------------------------------------------------------

    fn read_file(&self, input: &Value) -> ToolOutcome {
        let Some(path) = str_field(input, "filePath") else {
            return missing("filePath");
        };
        let start = usize_field(input, "startLine");
        let end = usize_field(input, "endLine");
        into_outcome(self.workspace.read_slice(path, start, end, self.read_window))
    }

    fn grep_search(&self, input: &Value) -> ToolOutcome {
        let Some(query) = str_field(input, "query") else {
            return missing("query");
        };
        let include = str_field(input, "includePattern");
        into_outcome(self.workspace.grep(query, include))
    }

    fn file_search(&self, input: &Value) -> ToolOutcome {
        let Some(pattern) = str_field(input, "glob") else {
            return missing("glob");
        };
        into_outcome(self.workspace.glob_search(pattern))
    }

    fn list_directory(&self, input: &Value) -> ToolOutcome {
        let Some(path) = str_field(input, "path") else {
            return missing("path");
        };
        into_outcome(self.workspace.list_directory(path))
    }

    fn edit_file(&self, input: &Value) -> ToolOutcome {
        let (Some(path), Some(old), Some(new)) = (
            str_field(input, "filePath"),
            str_field(input, "oldString"),
            str_field(input, "newString"),
        ) else {
            return missing("filePath, oldString, newString");
        };
        match self.workspace.edit(path, old, new) {
            Ok(()) => ToolOutcome::success(format!("Edited {}.", self.workspace.normalize(path))),
            Err(e) => ToolOutcome::error(e.to_string()),
        }
    }

    fn create_file(&self, input: &Value) -> ToolOutcome {
        let (Some(path), Some(content)) =
            (str_field(input, "filePath"), str_field(input, "content"))
        else {
            return missing("filePath, content");
        };
        match self.workspace.create(path, content) {
            Ok(()) => ToolOutcome::success(format!("Created {}.", self.workspace.normalize(path))),
            Err(e) => ToolOutcome::error(e.to_string()),
        }
    }

    fn delete_file(&self, input: &Value) -> ToolOutcome {
        let Some(path) = str_field(input, "filePath") else {
            return missing("filePath");
        };
        match self.workspace.delete(path) {
            Ok(()) => ToolOutcome::success(format!("Deleted {}.", self.workspace.normalize(path))),
            Err(e) => ToolOutcome::error(e.to_string()),
        }
    }

    async fn git_diff(&self) -> ToolOutcome {
        match self.vcs.diff_against_main().await {
            Ok(diff) if diff.trim().is_empty() => {
                ToolOutcome::success("No changes against main.")
            }
            Ok(diff) => ToolOutcome::success(diff),
            Err(e) => ToolOutcome::error(e.to_string()),
        }
    }

    // -- memory tools -------------------------------------------------------

    async fn note_to_self(&self, input: &Value) -> ToolOutcome {
        let Some(content) = str_field(input, "content") else {
            return missing("content");
        };
        match self.memory.store_note(content).await {
            Ok(message) => ToolOutcome::success(message),
            Err(e) => ToolOutcome::error(format!("failed to save note: {e}")),
        }
    }

    async fn dismiss_note(&self, input: &Value) -> ToolOutcome {
        let Some(id) = i64_field(input, "id") else {
            return missing("id");
        };
        match self.memory.dismiss_note(id).await {
            Ok(message) => ToolOutcome::success(message),
            Err(e) => ToolOutcome::error(format!("failed to dismiss note: {e}")),
        }
    }

    async fn recall_memory(&self, input: &Value) -> ToolOutcome {
        if let Some(id) = i64_field(input, "id") {
            return match self.memory.recall_by_id(id).await {
                Ok(message) => ToolOutcome::success(message),
                Err(e) => ToolOutcome::error(format!("recall failed: {e}")),
            };
        }
        if let Some(query) = str_field(input, "query") {
            return match self.memory.recall(query).await {
                Ok(message) => ToolOutcome::success(message),
                Err(e) => ToolOutcome::error(format!("recall failed: {e}")),
            };
        }
        // Neither argument: a usage hint, deliberately not an error.
        ToolOutcome::success("Provide a query to search memories or an id to fetch one.")
    }
}

/// Validate submit_plan input; the session extracts the plan itself.
fn submit_plan_ack(input: &Value) -> ToolOutcome {
    let complete = ["title", "description", "implementation"]
        .iter()
        .all(|field| {
            input
                .get(field)
                .and_then(Value::as_str)
                .is_some_and(|s| !s.trim().is_empty())
        });
    if complete {
        ToolOutcome::success("Plan submitted.")
    } else {
        ToolOutcome::error("submit_plan requires title, description, and implementation.")
    }
}

fn str_field<'a>(input: &'a Value, field: &str) -> Option<&'a str> {
    input.get(field).and_then(Value::as_str)
}

fn usize_field(input: &Value, field: &str) -> Option<usize> {
    input
        .get(field)
        .and_then(Value::as_u64)
        .and_then(|v| usize::try_from(v).ok())
}

fn i64_field(input: &Value, field: &str) -> Option<i64> {
    input.get(field).and_then(Value::as_i64)
}

fn missing(fields: &str) -> ToolOutcome {
    ToolOutcome::error(format!("missing required field(s): {fields}"))
}

fn into_outcome(result: Result<String, ToolError>) -> ToolOutcome {
    match result {
        Ok(content) => ToolOutcome::success(content),
        Err(e) => ToolOutcome::error(e.to_string()),
    }
}

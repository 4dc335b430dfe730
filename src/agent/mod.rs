//! Agent sessions: the conversational loops that produce plans, edits, and
//! reflections.
//!
//! All sessions share one loop skeleton (see [`session`]): call the model,
//! dispatch its tool calls sequentially in emission order, fold the results
//! into a single user message, and repeat within a bounded turn budget.

use serde_json::Value;

use crate::providers::ProviderError;

pub mod reflector;
pub mod session;

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// An improvement plan produced by the planner.
///
/// Immutable after creation; consumed once by the builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    /// Short slug naming the change.
    pub title: String,
    /// Human-readable rationale (becomes the PR description).
    pub description: String,
    /// Detailed handoff brief for the builder.
    pub implementation: String,
}

impl Plan {
    /// Extract a plan from a submit_plan tool input, if complete.
    pub fn from_tool_input(input: &Value) -> Option<Self> {
        let field = |name: &str| {
            input
                .get(name)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToOwned::to_owned)
        };
        Some(Self {
            title: field("title")?,
            description: field("description")?,
            implementation: field("implementation")?,
        })
    }
}

/// One successful workspace edit, reconstructed from a tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOperation {
    /// An exact-match replacement applied by edit_file.
    Replace {
        /// Workspace-relative path.
        file_path: String,
        /// Text that was replaced.
        old_string: String,
        /// Replacement text.
        new_string: String,
    },
    /// A file created by create_file.
    Create {
        /// Workspace-relative path.
        file_path: String,
        /// Full file content.
        content: String,
    },
    /// A file removed by delete_file.
    Delete {
        /// Workspace-relative path.
        file_path: String,
    },
}

impl EditOperation {
    /// The path the operation touched.
    pub fn file_path(&self) -> &str {
        match self {
            Self::Replace { file_path, .. }
            | Self::Create { file_path, .. }
            | Self::Delete { file_path } => file_path,
        }
    }
}

/// Result of a builder or fixer session.
#[derive(Debug, Clone, Default)]
pub struct BuildResult {
    /// Successful edit operations, in application order.
    pub edits: Vec<EditOperation>,
    /// True when the turn budget ran out before the session called done.
    pub exhausted: bool,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors surfaced by sessions to the iteration controller.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The underlying LLM call failed terminally.
    #[error("llm call failed: {0}")]
    Llm(#[from] ProviderError),

    /// The assistant produced a turn with no tool calls and no prior edits.
    #[error("session did not call any tools")]
    NoToolCalls,

    /// The planner ran out of turns without submitting a plan.
    #[error("planner did not submit a plan within {turns} turns")]
    PlanNotSubmitted {
        /// The exhausted turn budget.
        turns: u32,
    },

    /// The builder/fixer ran out of turns without a single successful edit.
    #[error("session produced no edits within {turns} turns")]
    NoEdits {
        /// The exhausted turn budget.
        turns: u32,
    },

    /// The reflector returned no usable text.
    #[error("reflector produced an empty reflection")]
    EmptyReflection,
}

//! The shared session loop for planner, builder, and fixer.
//!
//! Each turn: prepare the conversation (compression, then working-context
//! stubbing), assemble the system prompt, call the model, dispatch every
//! tool call sequentially in emission order, and fold all results into one
//! user message. Terminal tools (done, submit_plan) end the session; the
//! final allowed turn carries a hard-limit notice to coax termination.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::context::compression::Compressor;
use crate::context::working::WorkingContext;
use crate::llm::prompts::{self, PromptContext};
use crate::llm::LlmClient;
use crate::memory::MemoryStore;
use crate::providers::{ContentBlock, Message, ToolDefinition};
use crate::tools::dispatcher::ToolDispatcher;
use crate::tools::workspace::Workspace;
use crate::tools::{builder_tools, planner_tools};
use crate::usage::Phase;
use crate::vcs::Vcs;

use super::{BuildResult, EditOperation, Plan, SessionError};

/// Commits shown in the planner's VCS log section.
const VCS_LOG_COUNT: usize = 10;

/// Runs the planner, builder, and fixer conversational loops.
pub struct AgentSessions {
    llm: Arc<LlmClient>,
    dispatcher: ToolDispatcher,
    compressor: Compressor,
    working: WorkingContext,
    workspace: Workspace,
    memory: Arc<MemoryStore>,
    vcs: Arc<dyn Vcs>,
    config: Arc<Config>,
}

impl std::fmt::Debug for AgentSessions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentSessions").finish_non_exhaustive()
    }
}

/// What a finished loop produced, before per-session interpretation.
#[derive(Debug, Default)]
struct LoopOutcome {
    plan: Option<Plan>,
    edits: Vec<EditOperation>,
    terminal: bool,
}

impl AgentSessions {
    /// Wire up the session runner.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        llm: Arc<LlmClient>,
        dispatcher: ToolDispatcher,
        compressor: Compressor,
        working: WorkingContext,
        workspace: Workspace,
        memory: Arc<MemoryStore>,
        vcs: Arc<dyn Vcs>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            llm,
            dispatcher,
            compressor,
            working,
            workspace,
            memory,
            vcs,
            config,
        }
    }

    // -- public sessions ----------------------------------------------------

    /// Run the planner session. Appends to `conversation` and returns the
    /// submitted plan.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::PlanNotSubmitted`] when the turn budget runs
    /// out, or the underlying LLM/dispatch errors.
    pub async fn run_planner(
        &self,
        conversation: &mut Vec<Message>,
    ) -> Result<Plan, SessionError> {
        conversation.push(Message::user(prompts::planner_user_prompt()));
        let turns = self.config.turns.max_planner;
        let outcome = self
            .run_loop(Phase::Planner, conversation, planner_tools(), turns)
            .await?;
        outcome
            .plan
            .ok_or(SessionError::PlanNotSubmitted { turns })
    }

    /// Run the builder session for a plan.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NoEdits`] when the budget runs out with zero
    /// successful edits, or the underlying LLM/dispatch errors.
    pub async fn run_builder(
        &self,
        plan: &Plan,
        conversation: &mut Vec<Message>,
    ) -> Result<BuildResult, SessionError> {
        conversation.push(Message::user(prompts::builder_user_prompt(plan)));
        let turns = self.config.turns.max_builder;
        let outcome = self
            .run_loop(Phase::Builder, conversation, builder_tools(), turns)
            .await?;
        finish_build(outcome, turns)
    }

    /// Run one fixer attempt on a preserved conversation.
    ///
    /// The caller appends failure prompts between attempts; this method only
    /// pushes the given prompt and drives the loop.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NoEdits`] when the budget runs out with zero
    /// successful edits, or the underlying LLM/dispatch errors.
    pub async fn run_fixer(
        &self,
        prompt: String,
        conversation: &mut Vec<Message>,
    ) -> Result<BuildResult, SessionError> {
        conversation.push(Message::user(prompt));
        let turns = self.config.turns.max_fixer;
        let outcome = self
            .run_loop(Phase::Fixer, conversation, builder_tools(), turns)
            .await?;
        finish_build(outcome, turns)
    }

    // -- loop skeleton ------------------------------------------------------

    async fn run_loop(
        &self,
        phase: Phase,
        conversation: &mut Vec<Message>,
        tools: Vec<ToolDefinition>,
        max_turns: u32,
    ) -> Result<LoopOutcome, SessionError> {
        let mut outcome = LoopOutcome::default();

        for turn in 1..=max_turns {
            // Conversation preparation: compression first (size-triggered),
            // then working-context stubbing + snippet.
            self.compressor.compress(conversation).await;
            let snippet = self.working.prepare(conversation);

            let system = prompts::system_blocks(phase, &self.prompt_context(phase, snippet).await);

            let response = self
                .llm
                .call(phase, system, conversation.clone(), tools.clone())
                .await?;

            conversation.push(Message::assistant_blocks(response.content.clone()));

            let calls: Vec<(String, String, Value)> = response
                .tool_uses()
                .into_iter()
                .map(|(id, name, input)| (id.to_owned(), name.to_owned(), input.clone()))
                .collect();

            if calls.is_empty() {
                if outcome.edits.is_empty() {
                    warn!(phase = phase.as_str(), turn, "assistant made no tool calls");
                    return Err(SessionError::NoToolCalls);
                }
                // Edits exist; a call-free turn ends the session.
                return Ok(outcome);
            }

            let mut results: Vec<ContentBlock> = Vec::with_capacity(calls.len());

            for (id, name, input) in &calls {
                let result = self.dispatcher.dispatch(name, input, id).await;
                let failed = matches!(&result, ContentBlock::ToolResult { is_error, .. } if *is_error);

                match name.as_str() {
                    "submit_plan" if !failed => {
                        outcome.plan = Plan::from_tool_input(input);
                        outcome.terminal = outcome.plan.is_some();
                    }
                    "done" => outcome.terminal = true,
                    "edit_file" | "create_file" | "delete_file" if !failed => {
                        if let Some(edit) = edit_operation(name, input) {
                            outcome.edits.push(edit);
                        }
                    }
                    _ => {}
                }

                results.push(result);
            }

            // Coax termination: the next turn is the last one allowed.
            if turn.saturating_add(1) == max_turns {
                if let Some(ContentBlock::ToolResult { content, .. }) = results.last_mut() {
                    content.push_str(&format!(
                        "\n(Turn {max_turns} of {max_turns} — hard limit. Call done when ready.)"
                    ));
                }
            }

            conversation.push(Message::user_blocks(results));

            if outcome.terminal {
                info!(phase = phase.as_str(), turn, "session terminal");
                return Ok(outcome);
            }
        }

        debug!(phase = phase.as_str(), max_turns, "turn budget exhausted");
        Ok(outcome)
    }

    // -- dynamic prompt sections --------------------------------------------

    async fn prompt_context(&self, phase: Phase, working: Option<String>) -> PromptContext {
        let mut ctx = PromptContext {
            working_context: working,
            file_tree: Some(self.workspace.file_tree()),
            ..PromptContext::default()
        };

        if phase == Phase::Planner {
            match self.vcs.recent_log(VCS_LOG_COUNT).await {
                Ok(log) if !log.trim().is_empty() => ctx.vcs_log = Some(log),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "vcs log unavailable for planner prompt"),
            }
            ctx.coverage = self.read_coverage();
        }

        if matches!(phase, Phase::Planner | Phase::Reflector) {
            match self.memory.memory_context().await {
                Ok(memory) => ctx.memory_context = memory,
                Err(e) => warn!(error = %e, "memory context unavailable"),
            }
        }

        ctx
    }

    /// Parse `coverage/coverage-summary.json` from the last main-branch test
    /// run, if present, and list the lowest-covered files.
    fn read_coverage(&self) -> Option<String> {
        let raw = self
            .workspace
            .read_to_string("coverage/coverage-summary.json")
            .ok()?;
        let parsed: Value = serde_json::from_str(&raw).ok()?;
        let object = parsed.as_object()?;

        let mut entries: Vec<(String, f64)> = object
            .iter()
            .filter(|(path, _)| path.as_str() != "total")
            .filter_map(|(path, value)| {
                let pct = value.pointer("/lines/pct").and_then(Value::as_f64)?;
                Some((path.clone(), pct))
            })
            .collect();

        entries.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        entries.truncate(self.config.coverage.max_low_coverage_files);

        if entries.is_empty() {
            return None;
        }

        Some(
            entries
                .iter()
                .map(|(path, pct)| format!("{path}: {pct:.1}% lines"))
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }
}

/// Interpret a finished builder/fixer loop. Zero edits is always an error,
/// whether the session gave up, called done prematurely, or ran out of
/// turns.
fn finish_build(outcome: LoopOutcome, turns: u32) -> Result<BuildResult, SessionError> {
    if outcome.edits.is_empty() {
        return Err(SessionError::NoEdits { turns });
    }
    Ok(BuildResult {
        exhausted: !outcome.terminal,
        edits: outcome.edits,
    })
}

/// Map a successful write-tool call to its edit operation.
fn edit_operation(name: &str, input: &Value) -> Option<EditOperation> {
    let text = |field: &str| {
        input
            .get(field)
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
    };
    match name {
        "edit_file" => Some(EditOperation::Replace {
            file_path: text("filePath")?,
            old_string: text("oldString")?,
            new_string: text("newString")?,
        }),
        "create_file" => Some(EditOperation::Create {
            file_path: text("filePath")?,
            content: text("content")?,
        }),
        "delete_file" => Some(EditOperation::Delete {
            file_path: text("filePath")?,
        }),
        _ => None,
    }
}

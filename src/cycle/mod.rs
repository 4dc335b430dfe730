//! The iteration controller: one plan-build-merge cycle as a finite state
//! machine.
//!
//! States run strictly sequentially: CLEANUP, PLAN, BUILD, PUSH, AWAIT_CI,
//! then MERGE or the FIX loop or ABANDON, and always REFLECT before END.
//! The persistent-store disconnect and the usage flush execute on every
//! exit path — success, abandonment, or error — via the scoped cleanup in
//! [`IterationController::run`].

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::agent::reflector;
use crate::agent::session::AgentSessions;
use crate::agent::{BuildResult, EditOperation, Plan, SessionError};
use crate::config::Config;
use crate::context::compression::summarize_messages;
use crate::host::{CheckStatus, CodeHost, HostError};
use crate::llm::LlmClient;
use crate::logging::{cycle_log, drain_cycle_log, render_cycle_log, CycleLogLevel};
use crate::memory::MemoryStore;
use crate::providers::Message;
use crate::store::{Store, StoreError};
use crate::usage::UsageTracker;
use crate::vcs::{Vcs, VcsError};

/// Branch prefix identifying agent-owned branches and pull requests.
pub const AGENT_BRANCH_PREFIX: &str = "seedgpt/";

/// Maximum slug length after the branch prefix.
const MAX_SLUG_CHARS: usize = 60;

/// Base branch that merges target.
const BASE_BRANCH: &str = "main";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Errors that abort a cycle.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    /// VCS operation failed.
    #[error("vcs error: {0}")]
    Vcs(#[from] VcsError),

    /// Code-host operation failed.
    #[error("host error: {0}")]
    Host(#[from] HostError),

    /// Persistent store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A session failed terminally (LLM errors and the like).
    #[error("session error: {0}")]
    Session(#[from] SessionError),
}

/// How a completed cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The change merged into the base branch.
    Merged {
        /// Pull request number.
        number: u64,
        /// Plan title.
        title: String,
    },
    /// The cycle was abandoned (no plan, no edits, or CI never passed).
    Abandoned {
        /// Human-readable abandonment reason.
        reason: String,
    },
}

impl CycleOutcome {
    /// One-line form used in reflections and logs.
    pub fn describe(&self) -> String {
        match self {
            Self::Merged { number, title } => format!("Merged PR #{number}: {title}"),
            Self::Abandoned { reason } => format!("Abandoned: {reason}"),
        }
    }
}

/// The controller's states, in diagram order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleState {
    Cleanup,
    Plan,
    Build,
    Push,
    AwaitCi,
    Fix,
    Abandon,
    Merge,
    Reflect,
    End,
}

/// Mutable context threaded through the states of one cycle.
#[derive(Debug, Default)]
struct CycleContext {
    plan: Option<Plan>,
    branch: Option<String>,
    pr_number: Option<u64>,
    head_sha: Option<String>,
    edits: Vec<EditOperation>,
    exhausted: bool,
    fix_attempts: u32,
    pushes: u32,
    ci_error: Option<String>,
    abandon_reason: Option<String>,
    outcome: Option<CycleOutcome>,
    planner_conversation: Vec<Message>,
    builder_conversation: Vec<Message>,
    fixer_conversation: Vec<Message>,
    usage_flushed: bool,
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Drives one improvement cycle end to end.
pub struct IterationController {
    sessions: AgentSessions,
    llm: Arc<LlmClient>,
    memory: Arc<MemoryStore>,
    usage: Arc<UsageTracker>,
    store: Store,
    vcs: Arc<dyn Vcs>,
    host: Arc<dyn CodeHost>,
    config: Arc<Config>,
}

impl std::fmt::Debug for IterationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IterationController").finish_non_exhaustive()
    }
}

impl IterationController {
    /// Wire up a controller.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        sessions: AgentSessions,
        llm: Arc<LlmClient>,
        memory: Arc<MemoryStore>,
        usage: Arc<UsageTracker>,
        store: Store,
        vcs: Arc<dyn Vcs>,
        host: Arc<dyn CodeHost>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            sessions,
            llm,
            memory,
            usage,
            store,
            vcs,
            host,
            config,
        }
    }

    /// Run one full cycle.
    ///
    /// Scoped cleanup: whatever happens inside the state machine, the usage
    /// summary is flushed and the persistent store disconnected before this
    /// method returns or re-raises.
    ///
    /// # Errors
    ///
    /// Returns [`CycleError`] on fatal failures; non-fatal outcomes (no
    /// plan, CI never green) come back as [`CycleOutcome::Abandoned`].
    pub async fn run(&self) -> Result<CycleOutcome, CycleError> {
        let mut ctx = CycleContext::default();
        let result = self.drive(&mut ctx).await;

        if !ctx.usage_flushed {
            let title = ctx
                .plan
                .as_ref()
                .map_or("(no plan)", |plan| plan.title.as_str());
            if let Err(e) = self
                .store
                .insert_usage_summary(title, &self.usage.summary())
                .await
            {
                warn!(error = %e, "failed to flush usage summary during cleanup");
            }
            let entries = drain_cycle_log();
            if let Err(e) = self.store.append_iteration_log(&entries).await {
                warn!(error = %e, "failed to persist iteration log during cleanup");
            }
        }
        self.store.disconnect().await;

        result
    }

    async fn drive(&self, ctx: &mut CycleContext) -> Result<CycleOutcome, CycleError> {
        let mut state = CycleState::Cleanup;
        loop {
            state = match state {
                CycleState::Cleanup => self.cleanup().await?,
                CycleState::Plan => self.plan(ctx).await?,
                CycleState::Build => self.build(ctx).await?,
                CycleState::Push => self.push(ctx).await?,
                CycleState::AwaitCi => self.await_ci(ctx).await?,
                CycleState::Fix => self.fix(ctx).await?,
                CycleState::Abandon => self.abandon(ctx).await?,
                CycleState::Merge => self.merge(ctx).await?,
                CycleState::Reflect => self.reflect(ctx).await?,
                CycleState::End => {
                    let outcome = ctx.outcome.clone().unwrap_or(CycleOutcome::Abandoned {
                        reason: "cycle ended without an outcome".to_owned(),
                    });
                    info!(outcome = %outcome.describe(), "cycle complete");
                    return Ok(outcome);
                }
            };
        }
    }

    // -- states -------------------------------------------------------------

    /// Close and delete every agent-owned PR and branch left over from
    /// previous cycles, and reset the local checkout to main. Human PRs are
    /// untouched.
    async fn cleanup(&self) -> Result<CycleState, CycleError> {
        self.vcs.checkout_main().await?;

        let pulls = self.host.list_open_pulls().await?;
        for pull in pulls
            .iter()
            .filter(|p| p.head_ref.starts_with(AGENT_BRANCH_PREFIX))
        {
            cycle_log(
                CycleLogLevel::Info,
                format!("Cleanup: closing leftover PR #{} ({})", pull.number, pull.head_ref),
                None,
            );
            self.host.close_pull(pull.number).await?;
            self.host.delete_branch(&pull.head_ref).await?;
        }
        Ok(CycleState::Plan)
    }

    async fn plan(&self, ctx: &mut CycleContext) -> Result<CycleState, CycleError> {
        match self
            .sessions
            .run_planner(&mut ctx.planner_conversation)
            .await
        {
            Ok(plan) => {
                cycle_log(
                    CycleLogLevel::Info,
                    format!("Planned change: {}", plan.title),
                    Some(json!({ "title": plan.title })),
                );
                if let Err(e) = self
                    .memory
                    .store_note(&format!("Planned change: {}", plan.title))
                    .await
                {
                    warn!(error = %e, "failed to persist plan note");
                }
                ctx.plan = Some(plan);
                Ok(CycleState::Build)
            }
            Err(SessionError::PlanNotSubmitted { turns }) => {
                cycle_log(
                    CycleLogLevel::Warn,
                    format!("Planner submitted no plan within {turns} turns"),
                    None,
                );
                ctx.abandon_reason = Some("planner submitted no plan".to_owned());
                Ok(CycleState::Abandon)
            }
            Err(SessionError::NoToolCalls) => {
                cycle_log(CycleLogLevel::Warn, "Planner made no tool calls", None);
                ctx.abandon_reason = Some("planner made no tool calls".to_owned());
                Ok(CycleState::Abandon)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn build(&self, ctx: &mut CycleContext) -> Result<CycleState, CycleError> {
        let Some(plan) = ctx.plan.clone() else {
            ctx.abandon_reason = Some("no plan to build".to_owned());
            return Ok(CycleState::Abandon);
        };

        let branch = branch_name(&plan.title);
        self.vcs.checkout_branch(&branch).await?;
        ctx.branch = Some(branch.clone());
        cycle_log(
            CycleLogLevel::Info,
            format!("Building on branch {branch}"),
            None,
        );

        match self
            .sessions
            .run_builder(&plan, &mut ctx.builder_conversation)
            .await
        {
            Ok(BuildResult { edits, exhausted }) => {
                cycle_log(
                    CycleLogLevel::Info,
                    format!("Builder produced {} edit(s)", edits.len()),
                    None,
                );
                ctx.edits = edits;
                ctx.exhausted = exhausted;
                Ok(CycleState::Push)
            }
            Err(SessionError::NoEdits { .. }) | Err(SessionError::NoToolCalls) => {
                cycle_log(CycleLogLevel::Warn, "Builder produced no edits", None);
                ctx.abandon_reason = Some("builder produced no edits".to_owned());
                Ok(CycleState::Abandon)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn push(&self, ctx: &mut CycleContext) -> Result<CycleState, CycleError> {
        let Some(plan) = ctx.plan.as_ref() else {
            ctx.abandon_reason = Some("push without a plan".to_owned());
            return Ok(CycleState::Abandon);
        };
        let Some(branch) = ctx.branch.clone() else {
            ctx.abandon_reason = Some("push without a branch".to_owned());
            return Ok(CycleState::Abandon);
        };

        let force = ctx.pushes > 0;
        let message = if force {
            format!("fix: {} (attempt {})", plan.title, ctx.fix_attempts)
        } else {
            plan.title.clone()
        };

        self.vcs.add_all().await?;
        self.vcs.commit(&message).await?;
        self.vcs.push(&branch, force).await?;
        ctx.pushes = ctx.pushes.saturating_add(1);
        ctx.head_sha = Some(self.vcs.head_sha().await?);

        if ctx.pr_number.is_none() {
            let pull = self
                .host
                .create_pull(&branch, BASE_BRANCH, &plan.title, &plan.description)
                .await?;
            cycle_log(
                CycleLogLevel::Info,
                format!("Opened PR #{}", pull.number),
                None,
            );
            ctx.pr_number = Some(pull.number);
        }

        Ok(CycleState::AwaitCi)
    }

    /// Poll CI until all checks complete or a deadline passes.
    async fn await_ci(&self, ctx: &mut CycleContext) -> Result<CycleState, CycleError> {
        let sha = ctx.head_sha.clone().unwrap_or_default();
        let ci = &self.config.ci;
        let poll = Duration::from_secs(ci.poll_interval_secs);
        let no_checks_deadline = Duration::from_secs(ci.no_checks_timeout_secs);
        let hard_deadline = Duration::from_secs(ci.timeout_secs);
        let started = Instant::now();

        let passed = loop {
            let checks = self.host.list_checks(&sha).await?;

            if checks.is_empty() {
                if started.elapsed() >= no_checks_deadline {
                    cycle_log(
                        CycleLogLevel::Info,
                        "No CI checks appeared; treating as passed",
                        None,
                    );
                    break true;
                }
            } else if checks.iter().all(|c| c.status == CheckStatus::Completed) {
                break checks.iter().all(crate::host::CheckRun::passed);
            }

            if started.elapsed() >= hard_deadline {
                cycle_log(CycleLogLevel::Warn, "CI deadline exceeded", None);
                break false;
            }
            tokio::time::sleep(poll).await;
        };

        if passed {
            cycle_log(CycleLogLevel::Info, "CI passed", None);
            return Ok(CycleState::Merge);
        }

        cycle_log(CycleLogLevel::Warn, "CI failed", None);
        let logs = self
            .host
            .failure_logs(&sha, self.config.errors.max_check_output_chars)
            .await
            .unwrap_or_else(|e| format!("(failed to fetch CI logs: {e})"));
        ctx.ci_error = Some(truncate_chars(&logs, self.config.errors.max_loop_error_chars));

        if ctx.exhausted {
            ctx.abandon_reason = Some("builder exhausted and CI still failing".to_owned());
            return Ok(CycleState::Abandon);
        }
        if ctx.fix_attempts >= self.config.turns.max_fixer {
            ctx.abandon_reason = Some(format!(
                "CI still failing after {} fix attempt(s)",
                ctx.fix_attempts
            ));
            return Ok(CycleState::Abandon);
        }
        Ok(CycleState::Fix)
    }

    async fn fix(&self, ctx: &mut CycleContext) -> Result<CycleState, CycleError> {
        let Some(plan) = ctx.plan.clone() else {
            ctx.abandon_reason = Some("fix without a plan".to_owned());
            return Ok(CycleState::Abandon);
        };

        ctx.fix_attempts = ctx.fix_attempts.saturating_add(1);
        cycle_log(
            CycleLogLevel::Info,
            format!("Fix attempt {}", ctx.fix_attempts),
            None,
        );

        let (created, modified) = partition_edits(&ctx.edits);
        let prompt = crate::llm::prompts::fixer_user_prompt(&crate::llm::prompts::FixPromptContext {
            plan: &plan,
            created_files: &created,
            modified_files: &modified,
            ci_error: ctx.ci_error.as_deref().unwrap_or("(no CI output captured)"),
            attempt: ctx.fix_attempts,
        });

        match self
            .sessions
            .run_fixer(prompt, &mut ctx.fixer_conversation)
            .await
        {
            Ok(BuildResult { edits, exhausted }) => {
                ctx.edits.extend(edits);
                ctx.exhausted = exhausted;
                Ok(CycleState::Push)
            }
            Err(SessionError::NoEdits { .. }) | Err(SessionError::NoToolCalls) => {
                cycle_log(CycleLogLevel::Warn, "Fixer produced no edits", None);
                ctx.abandon_reason = Some("fixer produced no edits".to_owned());
                Ok(CycleState::Abandon)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn abandon(&self, ctx: &mut CycleContext) -> Result<CycleState, CycleError> {
        let reason = ctx
            .abandon_reason
            .clone()
            .unwrap_or_else(|| "unspecified".to_owned());

        if let Some(number) = ctx.pr_number {
            self.host.close_pull(number).await?;
            if let Some(branch) = &ctx.branch {
                self.host.delete_branch(branch).await?;
            }
            let note = format!("Closed PR #{number} — {reason}");
            cycle_log(CycleLogLevel::Warn, note.clone(), None);
            if let Err(e) = self.memory.store_note(&note).await {
                warn!(error = %e, "failed to persist abandonment note");
            }
        } else {
            cycle_log(
                CycleLogLevel::Warn,
                format!("Cycle abandoned before any PR — {reason}"),
                None,
            );
        }

        ctx.outcome = Some(CycleOutcome::Abandoned { reason });
        Ok(CycleState::Reflect)
    }

    async fn merge(&self, ctx: &mut CycleContext) -> Result<CycleState, CycleError> {
        let Some(number) = ctx.pr_number else {
            ctx.abandon_reason = Some("merge without a PR".to_owned());
            return Ok(CycleState::Abandon);
        };

        self.host.merge_pull(number).await?;
        if let Some(branch) = &ctx.branch {
            self.host.delete_branch(branch).await?;
        }

        let title = ctx
            .plan
            .as_ref()
            .map(|p| p.title.clone())
            .unwrap_or_default();
        cycle_log(
            CycleLogLevel::Info,
            format!("Merged PR #{number}: {title}"),
            None,
        );
        ctx.outcome = Some(CycleOutcome::Merged { number, title });
        Ok(CycleState::Reflect)
    }

    /// Always runs before END, whatever the outcome.
    async fn reflect(&self, ctx: &mut CycleContext) -> Result<CycleState, CycleError> {
        let outcome = ctx
            .outcome
            .clone()
            .unwrap_or(CycleOutcome::Abandoned {
                reason: "unknown".to_owned(),
            });

        let mut transcript = String::new();
        transcript.push_str("# Planner session\n");
        transcript.push_str(&summarize_messages(&ctx.planner_conversation));
        if !ctx.builder_conversation.is_empty() {
            transcript.push_str("\n# Builder session\n");
            transcript.push_str(&summarize_messages(&ctx.builder_conversation));
        }
        if !ctx.fixer_conversation.is_empty() {
            transcript.push_str("\n# Fixer session\n");
            transcript.push_str(&summarize_messages(&ctx.fixer_conversation));
        }

        let memory_context = self.memory.memory_context().await.unwrap_or_default();

        match reflector::reflect(
            &self.llm,
            memory_context,
            &transcript,
            &outcome.describe(),
            &render_cycle_log(),
        )
        .await
        {
            Ok(reflection) => {
                if let Err(e) = self.memory.store_reflection(&reflection).await {
                    warn!(error = %e, "failed to persist reflection");
                }
            }
            Err(e) => error!(error = %e, "reflection failed"),
        }

        // Flush usage and the iteration log for this cycle.
        let title = ctx
            .plan
            .as_ref()
            .map_or("(no plan)", |plan| plan.title.as_str());
        self.store
            .insert_usage_summary(title, &self.usage.summary())
            .await?;
        self.store.append_iteration_log(&drain_cycle_log()).await?;
        ctx.usage_flushed = true;

        Ok(CycleState::End)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Derive the agent branch name from a plan title.
///
/// Lowercased, whitespace to dashes, restricted to `[a-z0-9-/]`, collapsed,
/// and capped at 60 characters after the prefix.
pub fn branch_name(title: &str) -> String {
    let mut slug = String::new();
    let mut last_dash = true;

    for ch in title.to_lowercase().chars() {
        let mapped = match ch {
            'a'..='z' | '0'..='9' | '/' => Some(ch),
            ' ' | '\t' | '-' | '_' => Some('-'),
            _ => None,
        };
        match mapped {
            Some('-') if last_dash => {}
            Some(ch) => {
                last_dash = ch == '-';
                slug.push(ch);
            }
            None => {}
        }
    }

    let slug: String = slug.trim_matches('-').chars().take(MAX_SLUG_CHARS).collect();
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        format!("{AGENT_BRANCH_PREFIX}change")
    } else {
        format!("{AGENT_BRANCH_PREFIX}{slug}")
    }
}

/// Split accumulated edits into created and modified path lists.
fn partition_edits(edits: &[EditOperation]) -> (Vec<String>, Vec<String>) {
    let mut created = Vec::new();
    let mut modified = Vec::new();
    for edit in edits {
        let path = edit.file_path().to_owned();
        let bucket = match edit {
            EditOperation::Create { .. } => &mut created,
            EditOperation::Replace { .. } | EditOperation::Delete { .. } => &mut modified,
        };
        if !bucket.contains(&path) {
            bucket.push(path);
        }
    }
    (created, modified)
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_owned();
    }
    text.chars().take(max_chars).collect()
}

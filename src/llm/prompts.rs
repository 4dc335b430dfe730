//! Phase system-prompt templates and assembly.
//!
//! Each phase has a static template; dynamic sections (working context,
//! file tree, VCS log, coverage, memory context) are appended as separate
//! system blocks so the static prefix stays byte-stable for provider-side
//! prompt caching. The cache-control marker itself is attached by the
//! client, on the last block.

use crate::agent::Plan;
use crate::providers::SystemBlock;
use crate::usage::Phase;

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

const PLANNER_TEMPLATE: &str = "\
You are the planner of an autonomous coding agent that improves its own
repository, one small pull request per cycle.

Study the repository and your memories, then pick ONE small, safe, concrete
improvement: a bug fix, a missing test, clearer error handling, a small
refactor. Prefer changes that keep CI green. Avoid sweeping rewrites.

Investigate with the read/search tools first. When you are confident, call
submit_plan exactly once with:
- title: a short slug naming the change
- description: the rationale, written for a human reviewing the PR
- implementation: a precise handoff brief for the builder, naming files,
  functions, and the intended edits

You may save notes for future cycles with note_to_self and dismiss stale
ones with dismiss_note.";

const BUILDER_TEMPLATE: &str = "\
You are the builder of an autonomous coding agent. A plan for one small
change has been approved; implement it with the edit tools.

Work in small verified steps: read before you edit, re-read after you edit.
edit_file requires oldString to match the current file content exactly once —
include enough surrounding context to make it unique. Keep the change scoped
to the plan. When the change is complete, call done with a summary.";

const FIXER_TEMPLATE: &str = "\
You are the fixer of an autonomous coding agent. The change on this branch
failed continuous integration; repair it.

Read the CI error carefully, find the root cause, and fix it with the edit
tools. Do not start unrelated work and do not expand the change's scope.
When the fix is in place, call done with a summary.";

const REFLECTOR_TEMPLATE: &str = "\
You are the reflector of an autonomous coding agent. You are shown the
transcript of one completed improvement cycle and its outcome.

Write a reflection of two to four paragraphs: what was attempted, what
worked, what went wrong, and what the next cycles should do differently.
Be concrete — name files, tools, and failure modes. The reflection is
stored in long-term memory and shown to future planners.";

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

/// Dynamic sections available when assembling a system prompt.
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    /// Working-context snippet from the context engine.
    pub working_context: Option<String>,
    /// Workspace file listing.
    pub file_tree: Option<String>,
    /// Recent VCS log (planner only).
    pub vcs_log: Option<String>,
    /// Last-main-branch coverage summary (planner only).
    pub coverage: Option<String>,
    /// Memory context (planner and reflector).
    pub memory_context: Option<String>,
}

/// Build the system blocks for a phase.
///
/// The phase template always comes first; dynamic sections follow in a
/// stable order. Sections irrelevant to the phase are skipped even when
/// present in the context.
pub fn system_blocks(phase: Phase, ctx: &PromptContext) -> Vec<SystemBlock> {
    let template = match phase {
        Phase::Planner => PLANNER_TEMPLATE,
        Phase::Builder => BUILDER_TEMPLATE,
        Phase::Fixer => FIXER_TEMPLATE,
        Phase::Reflector => REFLECTOR_TEMPLATE,
        // Memory and summarizer calls carry their own inline prompts.
        Phase::Memory | Phase::Summarizer => "",
    };

    let mut blocks = Vec::new();
    if !template.is_empty() {
        blocks.push(SystemBlock::new(template));
    }

    let uses_workspace = matches!(phase, Phase::Planner | Phase::Builder | Phase::Fixer);

    if uses_workspace {
        if let Some(tree) = &ctx.file_tree {
            blocks.push(SystemBlock::new(format!("## Repository files\n{tree}")));
        }
    }

    if phase == Phase::Planner {
        if let Some(log) = &ctx.vcs_log {
            blocks.push(SystemBlock::new(format!("## Recent commits\n{log}")));
        }
        if let Some(coverage) = &ctx.coverage {
            blocks.push(SystemBlock::new(format!(
                "## Lowest-covered files on main\n{coverage}"
            )));
        }
    }

    if matches!(phase, Phase::Planner | Phase::Reflector) {
        if let Some(memory) = &ctx.memory_context {
            blocks.push(SystemBlock::new(memory.clone()));
        }
    }

    if uses_workspace {
        if let Some(working) = &ctx.working_context {
            blocks.push(SystemBlock::new(working.clone()));
        }
    }

    blocks
}

// ---------------------------------------------------------------------------
// User prompts
// ---------------------------------------------------------------------------

/// Opening user prompt for the planner session.
pub fn planner_user_prompt() -> String {
    "Inspect the repository and submit a plan for one small improvement."
        .to_owned()
}

/// Opening user prompt for the builder session.
pub fn builder_user_prompt(plan: &Plan) -> String {
    format!(
        "Implement this plan.\n\n# {title}\n\n{description}\n\n## Implementation brief\n{implementation}",
        title = plan.title,
        description = plan.description,
        implementation = plan.implementation,
    )
}

/// Sections of the fixer failure prompt.
#[derive(Debug, Clone)]
pub struct FixPromptContext<'a> {
    /// The plan being repaired.
    pub plan: &'a Plan,
    /// Files created by earlier sessions this cycle.
    pub created_files: &'a [String],
    /// Files modified by earlier sessions this cycle.
    pub modified_files: &'a [String],
    /// CI error text, already truncated by the controller.
    pub ci_error: &'a str,
    /// 1-based fix attempt counter.
    pub attempt: u32,
}

/// User prompt for one fixer attempt.
pub fn fixer_user_prompt(ctx: &FixPromptContext<'_>) -> String {
    let mut prompt = format!(
        "CI failed for the change on this branch.\n\n# {title}\n\n{description}\n\n\
         ## Implementation brief\n{implementation}\n",
        title = ctx.plan.title,
        description = ctx.plan.description,
        implementation = ctx.plan.implementation,
    );

    if !ctx.created_files.is_empty() {
        prompt.push_str(&format!(
            "\n## Files created this cycle\n{}\n",
            ctx.created_files.join("\n")
        ));
    }
    if !ctx.modified_files.is_empty() {
        prompt.push_str(&format!(
            "\n## Files modified this cycle\n{}\n",
            ctx.modified_files.join("\n")
        ));
    }

    prompt.push_str(&format!("\n## CI error\n{}\n", ctx.ci_error));
    prompt.push_str(&format!("\nThis is fix attempt {}.", ctx.attempt));
    if ctx.attempt >= 2 {
        prompt.push_str(
            " This is NOT your first attempt — the previous fix did not work. \
             Try a fundamentally different approach.",
        );
    }
    prompt
}

/// User prompt for the reflector call.
pub fn reflector_user_prompt(transcript: &str, outcome: &str, cycle_log: &str) -> String {
    let mut prompt = format!(
        "## Cycle transcript\n{transcript}\n\n## Outcome\n{outcome}\n"
    );
    if !cycle_log.is_empty() {
        prompt.push_str(&format!("\n## Cycle log\n{cycle_log}\n"));
    }
    prompt.push_str("\nWrite your reflection on this cycle.");
    prompt
}

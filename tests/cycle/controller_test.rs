//! End-to-end controller tests with scripted provider, VCS, and host.

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use seedgpt::agent::session::AgentSessions;
use seedgpt::config::Config;
use seedgpt::context::compression::Compressor;
use seedgpt::context::working::WorkingContext;
use seedgpt::cycle::{branch_name, CycleOutcome, IterationController};
use seedgpt::host::PullRequest;
use seedgpt::memory::MemoryStore;
use seedgpt::store::Store;
use seedgpt::tools::dispatcher::ToolDispatcher;
use seedgpt::tools::workspace::Workspace;

use crate::support::{
    blocks_response, completed_check, make_llm, memory_store, text_response, tool_use,
    MockHost, MockProvider, MockVcs,
};

struct Fixture {
    controller: IterationController,
    provider: Arc<MockProvider>,
    vcs: Arc<MockVcs>,
    host: Arc<MockHost>,
    store: Store,
    _dir: TempDir,
}

async fn fixture() -> Fixture {
    fixture_with(|_| {}).await
}

async fn fixture_with(mutate: impl FnOnce(&mut Config)) -> Fixture {
    let dir = TempDir::new().expect("tempdir");
    std::fs::write(dir.path().join("main.rs"), "fn main() {}\n").expect("fixture");

    // Zero-delay CI polling keeps the tests fast.
    let mut config = Config::default();
    config.ci.poll_interval_secs = 0;
    config.ci.no_checks_timeout_secs = 0;
    config.ci.timeout_secs = 5;
    mutate(&mut config);
    let config = Arc::new(config);

    let provider = MockProvider::new();
    let (llm, usage) = make_llm(Arc::clone(&provider), Arc::clone(&config));

    let store = memory_store().await;
    let memory = Arc::new(MemoryStore::new(
        store.clone(),
        Arc::clone(&llm),
        config.memory.clone(),
    ));

    let workspace = Workspace::new(dir.path().to_path_buf());
    let vcs = MockVcs::new();
    let host = MockHost::new();

    let dispatcher = ToolDispatcher::new(
        workspace.clone(),
        Arc::clone(&memory),
        vcs.clone(),
        config.tools.default_read_window,
    );
    let compressor = Compressor::new(Arc::clone(&llm), config.summarization.clone());
    let working = WorkingContext::new(
        workspace.clone(),
        config.context.clone(),
        config.tools.default_read_window,
    );

    let sessions = AgentSessions::new(
        Arc::clone(&llm),
        dispatcher,
        compressor,
        working,
        workspace,
        Arc::clone(&memory),
        vcs.clone(),
        Arc::clone(&config),
    );

    let controller = IterationController::new(
        sessions,
        llm,
        memory,
        usage,
        store.clone(),
        vcs.clone(),
        host.clone(),
        config,
    );

    Fixture {
        controller,
        provider,
        vcs,
        host,
        store,
        _dir: dir,
    }
}

fn plan_response() -> seedgpt::providers::ModelResponse {
    blocks_response(vec![tool_use(
        "p1",
        "submit_plan",
        json!({
            "title": "Fix the off by one",
            "description": "The loop misses the last element.",
            "implementation": "Change the bound in main.rs.",
        }),
    )])
}

fn build_response() -> seedgpt::providers::ModelResponse {
    blocks_response(vec![
        tool_use(
            "e1",
            "edit_file",
            json!({ "filePath": "main.rs", "oldString": "fn main() {}", "newString": "fn main() { fixed(); }" }),
        ),
        tool_use("d1", "done", json!({ "summary": "bound fixed" })),
    ])
}

fn fix_response() -> seedgpt::providers::ModelResponse {
    blocks_response(vec![
        tool_use(
            "e2",
            "edit_file",
            json!({ "filePath": "main.rs", "oldString": "fixed();", "newString": "really_fixed();" }),
        ),
        tool_use("d2", "done", json!({ "summary": "second try" })),
    ])
}

// ---------------------------------------------------------------------------
// The retry path: fail CI once, fix, pass, merge
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ci_failure_drives_one_fix_then_merge() {
    let f = fixture().await;

    f.provider.push_response(plan_response());
    f.provider.push_response(text_response("plan note summary"));
    f.provider.push_response(build_response());
    f.provider.push_response(fix_response());
    f.provider
        .push_response(text_response("The cycle recovered from a CI failure and Merged PR #1."));
    f.provider.push_response(text_response("reflection summary"));

    f.host.script_checks(vec![
        vec![completed_check("test", "failure")],
        vec![completed_check("test", "success")],
    ]);

    let outcome = f.controller.run().await.expect("cycle should complete");
    assert!(
        matches!(outcome, CycleOutcome::Merged { number: 1, .. }),
        "got {outcome:?}"
    );

    // Exactly two commit+push rounds: the build and the fix.
    assert_eq!(f.vcs.commit_count(), 2);
    assert_eq!(f.vcs.push_count(), 2);
    {
        let pushes = f.vcs.pushes.lock().expect("pushes lock");
        assert!(!pushes[0].1, "first push is not forced");
        assert!(pushes[1].1, "fix push is forced");
    }

    // One merge, and the branch was cleaned up.
    assert_eq!(*f.host.merged.lock().expect("merged lock"), vec![1]);
    assert!(f
        .host
        .deleted_branches
        .lock()
        .expect("deleted lock")
        .contains(&"seedgpt/fix-the-off-by-one".to_owned()));

    // One reflection persisted, mentioning the merge.
    let reflections = f
        .store
        .recent_reflections(10)
        .await
        .expect("reflections query");
    assert_eq!(reflections.len(), 1);
    assert!(reflections[0].content.contains("Merged"));
}

#[tokio::test]
async fn green_ci_merges_without_fixing() {
    let f = fixture().await;

    f.provider.push_response(plan_response());
    f.provider.push_response(text_response("plan note summary"));
    f.provider.push_response(build_response());
    f.provider
        .push_response(text_response("Clean cycle, Merged PR #1."));
    f.provider.push_response(text_response("reflection summary"));

    f.host
        .script_checks(vec![vec![completed_check("test", "success")]]);

    let outcome = f.controller.run().await.expect("cycle should complete");
    assert!(matches!(outcome, CycleOutcome::Merged { number: 1, .. }));
    assert_eq!(f.vcs.push_count(), 1);
    assert!(f.host.closed.lock().expect("closed lock").is_empty());
}

// ---------------------------------------------------------------------------
// Abandonment paths
// ---------------------------------------------------------------------------

#[tokio::test]
async fn planner_failure_abandons_and_still_reflects() {
    let f = fixture().await;

    // Planner emits no tool calls at all; the cycle aborts before any PR.
    f.provider.push_response(text_response("I refuse to plan."));
    f.provider
        .push_response(text_response("No plan was produced this cycle."));
    f.provider.push_response(text_response("reflection summary"));

    let outcome = f.controller.run().await.expect("cycle should complete");
    assert!(matches!(outcome, CycleOutcome::Abandoned { .. }));

    assert_eq!(f.vcs.push_count(), 0);
    assert!(f.host.created.lock().expect("created lock").is_empty());

    let reflections = f
        .store
        .recent_reflections(10)
        .await
        .expect("reflections query");
    assert_eq!(reflections.len(), 1);
}

#[tokio::test]
async fn exhausted_builder_with_failing_ci_abandons_the_pr() {
    let f = fixture_with(|c| c.turns.max_builder = 3).await;

    f.provider.push_response(plan_response());
    f.provider.push_response(text_response("plan note summary"));
    // Builder edits but never calls done, exhausting its budget.
    f.provider.push_response(blocks_response(vec![tool_use(
        "e1",
        "edit_file",
        json!({ "filePath": "main.rs", "oldString": "fn main() {}", "newString": "fn main() { x(); }" }),
    )]));
    // Remaining builder turns keep reading until the budget runs out.
    for i in 0..2 {
        f.provider.push_response(blocks_response(vec![tool_use(
            &format!("r{i}"),
            "read_file",
            json!({ "filePath": "main.rs" }),
        )]));
    }

    // The abandonment note summary, reflection text, reflection summary.
    f.provider.push_response(text_response("closed pr note"));
    f.provider
        .push_response(text_response("CI never went green; the PR was closed."));
    f.provider.push_response(text_response("reflection summary"));

    f.host
        .script_checks(vec![vec![completed_check("test", "failure")]]);

    let outcome = f.controller.run().await.expect("cycle should complete");
    assert!(matches!(outcome, CycleOutcome::Abandoned { .. }), "got {outcome:?}");

    // The PR was opened once, closed, and its branch deleted; no merge.
    assert_eq!(f.host.created.lock().expect("created lock").len(), 1);
    assert_eq!(*f.host.closed.lock().expect("closed lock"), vec![1]);
    assert!(f.host.merged.lock().expect("merged lock").is_empty());
}

// ---------------------------------------------------------------------------
// Cleanup
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cleanup_only_touches_agent_branches() {
    let f = fixture().await;

    f.host.open_pulls.lock().expect("open lock").extend([
        PullRequest {
            number: 7,
            head_ref: "seedgpt/old-change".to_owned(),
            title: "old".to_owned(),
        },
        PullRequest {
            number: 8,
            head_ref: "feature/human-work".to_owned(),
            title: "human".to_owned(),
        },
    ]);

    // Fail fast after cleanup: planner refuses.
    f.provider.push_response(text_response("no plan"));
    f.provider.push_response(text_response("reflection text"));
    f.provider.push_response(text_response("reflection summary"));

    let _ = f.controller.run().await.expect("cycle should complete");

    assert_eq!(*f.host.closed.lock().expect("closed lock"), vec![7]);
    assert!(f
        .host
        .deleted_branches
        .lock()
        .expect("deleted lock")
        .contains(&"seedgpt/old-change".to_owned()));
}

// ---------------------------------------------------------------------------
// Branch naming
// ---------------------------------------------------------------------------

#[test]
fn branch_names_match_the_agent_prefix() {
    assert_eq!(branch_name("Fix the off by one"), "seedgpt/fix-the-off-by-one");
}

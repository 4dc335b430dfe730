//! Tests for the session loop skeleton and its planner/builder variants.

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use seedgpt::agent::session::AgentSessions;
use seedgpt::agent::{EditOperation, SessionError};
use seedgpt::config::Config;
use seedgpt::context::compression::Compressor;
use seedgpt::context::working::WorkingContext;
use seedgpt::providers::{ContentBlock, Message, Role};
use seedgpt::tools::dispatcher::ToolDispatcher;
use seedgpt::tools::workspace::Workspace;

use crate::support::{blocks_response, make_memory, text_response, tool_use, MockProvider, MockVcs};

struct Fixture {
    sessions: AgentSessions,
    provider: Arc<MockProvider>,
    _dir: TempDir,
}

async fn fixture(mutate: impl FnOnce(&mut Config)) -> Fixture {
    let dir = TempDir::new().expect("tempdir");
    std::fs::write(dir.path().join("main.rs"), "fn main() {}\n").expect("fixture");

    let mut config = Config::default();
    mutate(&mut config);
    let config = Arc::new(config);

    let provider = MockProvider::new();
    let (_store, memory) = make_memory(Arc::clone(&provider), Arc::clone(&config)).await;
    let (llm, _usage) = crate::support::make_llm(Arc::clone(&provider), Arc::clone(&config));

    let workspace = Workspace::new(dir.path().to_path_buf());
    let vcs = MockVcs::new();
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
        llm,
        dispatcher,
        compressor,
        working,
        workspace,
        memory,
        vcs,
        config,
    );

    Fixture {
        sessions,
        provider,
        _dir: dir,
    }
}

fn submit_plan_response() -> seedgpt::providers::ModelResponse {
    blocks_response(vec![tool_use(
        "p1",
        "submit_plan",
        json!({
            "title": "Tighten error handling",
            "description": "Error paths are silently ignored.",
            "implementation": "Wrap main.rs in a Result and log failures.",
        }),
    )])
}

// ---------------------------------------------------------------------------
// Planner
// ---------------------------------------------------------------------------

#[tokio::test]
async fn planner_explores_then_submits() {
    let f = fixture(|_| {}).await;
    f.provider.push_response(blocks_response(vec![tool_use(
        "r1",
        "read_file",
        json!({ "filePath": "main.rs" }),
    )]));
    f.provider.push_response(submit_plan_response());

    let mut conversation = Vec::new();
    let plan = f
        .sessions
        .run_planner(&mut conversation)
        .await
        .expect("plan should be submitted");

    assert_eq!(plan.title, "Tighten error handling");
    assert_eq!(f.provider.call_count(), 2);

    // Conversation shape: prompt, assistant, results, assistant, results.
    assert_eq!(conversation.len(), 5);
    assert_eq!(conversation[0].role, Role::User);
    assert_eq!(conversation[1].role, Role::Assistant);
    assert_eq!(conversation[2].role, Role::User);
}

#[tokio::test]
async fn planner_without_tool_calls_fails() {
    let f = fixture(|_| {}).await;
    f.provider
        .push_response(text_response("I have nothing to do."));

    let mut conversation = Vec::new();
    let err = f
        .sessions
        .run_planner(&mut conversation)
        .await
        .expect_err("should fail");
    assert!(matches!(err, SessionError::NoToolCalls));
}

#[tokio::test]
async fn planner_exhausting_turns_reports_no_plan() {
    let f = fixture(|c| c.turns.max_planner = 2).await;
    for i in 0..2 {
        f.provider.push_response(blocks_response(vec![tool_use(
            &format!("r{i}"),
            "read_file",
            json!({ "filePath": "main.rs" }),
        )]));
    }

    let mut conversation = Vec::new();
    let err = f
        .sessions
        .run_planner(&mut conversation)
        .await
        .expect_err("should exhaust");
    assert!(matches!(err, SessionError::PlanNotSubmitted { turns: 2 }));
}

#[tokio::test]
async fn final_turn_results_carry_the_hard_limit_notice() {
    let f = fixture(|c| c.turns.max_planner = 2).await;
    f.provider.push_response(blocks_response(vec![tool_use(
        "r1",
        "read_file",
        json!({ "filePath": "main.rs" }),
    )]));
    f.provider.push_response(blocks_response(vec![tool_use(
        "r2",
        "read_file",
        json!({ "filePath": "main.rs" }),
    )]));

    let mut conversation = Vec::new();
    let _ = f.sessions.run_planner(&mut conversation).await;

    // The first turn's tool result must carry the coax suffix.
    let Some(blocks) = conversation[2].content.blocks() else {
        panic!("first result message should have blocks");
    };
    let ContentBlock::ToolResult { content, .. } = &blocks[0] else {
        panic!("tool_result expected");
    };
    assert!(
        content.contains("(Turn 2 of 2 — hard limit. Call done when ready.)"),
        "got {content:?}"
    );
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

fn plan() -> seedgpt::agent::Plan {
    seedgpt::agent::Plan {
        title: "Tighten error handling".to_owned(),
        description: "desc".to_owned(),
        implementation: "impl".to_owned(),
    }
}

#[tokio::test]
async fn builder_collects_successful_edits() {
    let f = fixture(|_| {}).await;
    f.provider.push_response(blocks_response(vec![
        tool_use(
            "e1",
            "edit_file",
            json!({ "filePath": "main.rs", "oldString": "fn main() {}", "newString": "fn main() { run(); }" }),
        ),
        tool_use(
            "e2",
            "create_file",
            json!({ "filePath": "run.rs", "content": "pub fn run() {}" }),
        ),
        tool_use("d1", "done", json!({ "summary": "wired run()" })),
    ]));

    let mut conversation = Vec::new();
    let result = f
        .sessions
        .run_builder(&plan(), &mut conversation)
        .await
        .expect("builder should succeed");

    assert_eq!(result.edits.len(), 2);
    assert!(!result.exhausted);
    assert!(matches!(
        &result.edits[0],
        EditOperation::Replace { file_path, .. } if file_path == "main.rs"
    ));
    assert!(matches!(
        &result.edits[1],
        EditOperation::Create { file_path, .. } if file_path == "run.rs"
    ));
}

#[tokio::test]
async fn failed_edits_are_not_collected() {
    let f = fixture(|_| {}).await;
    f.provider.push_response(blocks_response(vec![
        // oldString does not exist, so the edit fails.
        tool_use(
            "e1",
            "edit_file",
            json!({ "filePath": "main.rs", "oldString": "ghost", "newString": "x" }),
        ),
        tool_use("d1", "done", json!({ "summary": "gave up" })),
    ]));

    let mut conversation = Vec::new();
    let err = f
        .sessions
        .run_builder(&plan(), &mut conversation)
        .await
        .expect_err("zero successful edits is an error");
    assert!(matches!(err, SessionError::NoEdits { .. }));
}

#[tokio::test]
async fn builder_exhaustion_with_edits_is_flagged() {
    let f = fixture(|c| c.turns.max_builder = 2).await;
    f.provider.push_response(blocks_response(vec![tool_use(
        "e1",
        "edit_file",
        json!({ "filePath": "main.rs", "oldString": "fn main() {}", "newString": "fn main() { a(); }" }),
    )]));
    // Second turn keeps working without calling done.
    f.provider.push_response(blocks_response(vec![tool_use(
        "r1",
        "read_file",
        json!({ "filePath": "main.rs" }),
    )]));

    let mut conversation = Vec::new();
    let result = f
        .sessions
        .run_builder(&plan(), &mut conversation)
        .await
        .expect("edits were produced");
    assert_eq!(result.edits.len(), 1);
    assert!(result.exhausted);
}

#[tokio::test]
async fn builder_without_tools_but_with_edits_returns_them() {
    let f = fixture(|_| {}).await;
    f.provider.push_response(blocks_response(vec![tool_use(
        "e1",
        "edit_file",
        json!({ "filePath": "main.rs", "oldString": "fn main() {}", "newString": "fn main() { b(); }" }),
    )]));
    // A text-only turn with accumulated edits ends the session cleanly.
    f.provider.push_response(text_response("all done I think"));

    let mut conversation = Vec::new();
    let result = f
        .sessions
        .run_builder(&plan(), &mut conversation)
        .await
        .expect("edits were produced");
    assert_eq!(result.edits.len(), 1);
}

// ---------------------------------------------------------------------------
// Fixer
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fixer_preserves_conversation_across_attempts() {
    let f = fixture(|c| c.turns.max_fixer = 3).await;

    f.provider.push_response(blocks_response(vec![
        tool_use(
            "e1",
            "edit_file",
            json!({ "filePath": "main.rs", "oldString": "fn main() {}", "newString": "fn main() { c(); }" }),
        ),
        tool_use("d1", "done", json!({ "summary": "first fix" })),
    ]));
    f.provider.push_response(blocks_response(vec![
        tool_use(
            "e2",
            "edit_file",
            json!({ "filePath": "main.rs", "oldString": "c();", "newString": "d();" }),
        ),
        tool_use("d2", "done", json!({ "summary": "second fix" })),
    ]));

    let mut conversation = Vec::new();
    let first = f
        .sessions
        .run_fixer("attempt 1: CI failed".to_owned(), &mut conversation)
        .await
        .expect("first attempt");
    let len_after_first = conversation.len();

    let second = f
        .sessions
        .run_fixer("attempt 2: CI failed again".to_owned(), &mut conversation)
        .await
        .expect("second attempt");

    assert_eq!(first.edits.len(), 1);
    assert_eq!(second.edits.len(), 1);
    // Same transcript keeps growing: prompt + assistant + results per attempt.
    assert!(conversation.len() > len_after_first);
    assert_eq!(conversation[0].content.text(), "attempt 1: CI failed");
}

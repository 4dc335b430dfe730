//! Tests for workspace tools and the dispatcher.

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use seedgpt::config::Config;
use seedgpt::providers::ContentBlock;
use seedgpt::tools::dispatcher::ToolDispatcher;
use seedgpt::tools::workspace::Workspace;

use crate::support::{make_memory, MockProvider, MockVcs};

async fn dispatcher(dir: &TempDir) -> ToolDispatcher {
    let provider = MockProvider::new();
    let (_store, memory) = make_memory(provider, Arc::new(Config::default())).await;
    ToolDispatcher::new(
        Workspace::new(dir.path().to_path_buf()),
        memory,
        MockVcs::new(),
        100,
    )
}

fn unpack(block: ContentBlock) -> (String, String, bool) {
    match block {
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => (tool_use_id, content, is_error),
        other => panic!("expected tool_result, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// read_file
// ---------------------------------------------------------------------------

#[tokio::test]
async fn read_file_returns_numbered_lines() {
    let dir = TempDir::new().expect("tempdir");
    std::fs::write(dir.path().join("a.txt"), "alpha\nbeta\ngamma").expect("fixture");

    let d = dispatcher(&dir).await;
    let (id, content, is_error) = unpack(
        d.dispatch("read_file", &json!({ "filePath": "a.txt" }), "t1")
            .await,
    );
    assert_eq!(id, "t1");
    assert!(!is_error);
    assert!(content.contains("1 | alpha"));
    assert!(content.contains("3 | gamma"));
}

#[tokio::test]
async fn read_file_caps_at_the_window() {
    let dir = TempDir::new().expect("tempdir");
    let body = (1..=250).map(|i| format!("l{i}")).collect::<Vec<_>>().join("\n");
    std::fs::write(dir.path().join("big.txt"), body).expect("fixture");

    let d = dispatcher(&dir).await;
    let (_, content, _) = unpack(
        d.dispatch("read_file", &json!({ "filePath": "big.txt", "startLine": 1 }), "t1")
            .await,
    );
    assert!(content.contains("100 | l100"));
    assert!(!content.contains("101 | l101"));
    assert!(content.contains("showing lines 1-100 of 250"));
}

#[tokio::test]
async fn read_file_missing_path_is_an_error() {
    let dir = TempDir::new().expect("tempdir");
    let d = dispatcher(&dir).await;
    let (_, content, is_error) = unpack(
        d.dispatch("read_file", &json!({ "filePath": "nope.txt" }), "t1")
            .await,
    );
    assert!(is_error);
    assert!(content.contains("not found"));
}

// ---------------------------------------------------------------------------
// edit_file / create_file / delete_file
// ---------------------------------------------------------------------------

#[tokio::test]
async fn edit_file_replaces_a_unique_match() {
    let dir = TempDir::new().expect("tempdir");
    std::fs::write(dir.path().join("a.txt"), "before body after").expect("fixture");

    let d = dispatcher(&dir).await;
    let (_, _, is_error) = unpack(
        d.dispatch(
            "edit_file",
            &json!({ "filePath": "a.txt", "oldString": "body", "newString": "heart" }),
            "t1",
        )
        .await,
    );
    assert!(!is_error);
    let updated = std::fs::read_to_string(dir.path().join("a.txt")).expect("read back");
    assert_eq!(updated, "before heart after");
}

#[tokio::test]
async fn edit_file_rejects_ambiguous_matches() {
    let dir = TempDir::new().expect("tempdir");
    std::fs::write(dir.path().join("a.txt"), "dup dup").expect("fixture");

    let d = dispatcher(&dir).await;
    let (_, content, is_error) = unpack(
        d.dispatch(
            "edit_file",
            &json!({ "filePath": "a.txt", "oldString": "dup", "newString": "one" }),
            "t1",
        )
        .await,
    );
    assert!(is_error);
    assert!(content.contains("2 times"));
}

#[tokio::test]
async fn edit_file_rejects_missing_old_string() {
    let dir = TempDir::new().expect("tempdir");
    std::fs::write(dir.path().join("a.txt"), "content").expect("fixture");

    let d = dispatcher(&dir).await;
    let (_, content, is_error) = unpack(
        d.dispatch(
            "edit_file",
            &json!({ "filePath": "a.txt", "oldString": "ghost", "newString": "x" }),
            "t1",
        )
        .await,
    );
    assert!(is_error);
    assert!(content.contains("not found"));
}

#[tokio::test]
async fn create_file_makes_parents_and_rejects_existing() {
    let dir = TempDir::new().expect("tempdir");
    let d = dispatcher(&dir).await;

    let (_, _, is_error) = unpack(
        d.dispatch(
            "create_file",
            &json!({ "filePath": "nested/deep/new.txt", "content": "hello" }),
            "t1",
        )
        .await,
    );
    assert!(!is_error);
    assert_eq!(
        std::fs::read_to_string(dir.path().join("nested/deep/new.txt")).expect("created"),
        "hello"
    );

    let (_, content, is_error) = unpack(
        d.dispatch(
            "create_file",
            &json!({ "filePath": "nested/deep/new.txt", "content": "again" }),
            "t2",
        )
        .await,
    );
    assert!(is_error);
    assert!(content.contains("already exists"));
}

#[tokio::test]
async fn delete_file_removes_and_errors_on_missing() {
    let dir = TempDir::new().expect("tempdir");
    std::fs::write(dir.path().join("bye.txt"), "x").expect("fixture");

    let d = dispatcher(&dir).await;
    let (_, _, is_error) = unpack(
        d.dispatch("delete_file", &json!({ "filePath": "bye.txt" }), "t1")
            .await,
    );
    assert!(!is_error);
    assert!(!dir.path().join("bye.txt").exists());

    let (_, _, is_error) = unpack(
        d.dispatch("delete_file", &json!({ "filePath": "bye.txt" }), "t2")
            .await,
    );
    assert!(is_error);
}

// ---------------------------------------------------------------------------
// Search and listing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn grep_search_finds_lines_and_falls_back_to_literal() {
    let dir = TempDir::new().expect("tempdir");
    std::fs::write(dir.path().join("code.rs"), "fn alpha() {}\nfn beta() {}").expect("fixture");

    let d = dispatcher(&dir).await;
    let (_, content, is_error) =
        unpack(d.dispatch("grep_search", &json!({ "query": "alpha" }), "t1").await);
    assert!(!is_error);
    assert!(content.contains("code.rs:1"));

    // "fn beta(" is an invalid regex; the literal fallback still matches.
    let (_, content, is_error) =
        unpack(d.dispatch("grep_search", &json!({ "query": "fn beta(" }), "t2").await);
    assert!(!is_error);
    assert!(content.contains("code.rs:2"), "got {content:?}");
}

#[tokio::test]
async fn grep_search_honors_include_pattern() {
    let dir = TempDir::new().expect("tempdir");
    std::fs::write(dir.path().join("a.rs"), "needle").expect("fixture");
    std::fs::write(dir.path().join("b.txt"), "needle").expect("fixture");

    let d = dispatcher(&dir).await;
    let (_, content, _) = unpack(
        d.dispatch(
            "grep_search",
            &json!({ "query": "needle", "includePattern": "*.rs" }),
            "t1",
        )
        .await,
    );
    assert!(content.contains("a.rs"));
    assert!(!content.contains("b.txt"));
}

#[tokio::test]
async fn file_search_globs_relative_paths() {
    let dir = TempDir::new().expect("tempdir");
    std::fs::create_dir_all(dir.path().join("src")).expect("mkdir");
    std::fs::write(dir.path().join("src/lib.rs"), "x").expect("fixture");
    std::fs::write(dir.path().join("readme.md"), "x").expect("fixture");

    let d = dispatcher(&dir).await;
    let (_, content, _) =
        unpack(d.dispatch("file_search", &json!({ "glob": "src/*.rs" }), "t1").await);
    assert!(content.contains("src/lib.rs"));
    assert!(!content.contains("readme.md"));
}

#[tokio::test]
async fn list_directory_suffixes_directories() {
    let dir = TempDir::new().expect("tempdir");
    std::fs::create_dir_all(dir.path().join("sub")).expect("mkdir");
    std::fs::write(dir.path().join("file.txt"), "x").expect("fixture");

    let d = dispatcher(&dir).await;
    let (_, content, _) =
        unpack(d.dispatch("list_directory", &json!({ "path": "." }), "t1").await);
    assert!(content.contains("sub/"));
    assert!(content.contains("file.txt"));
}

// ---------------------------------------------------------------------------
// Memory and terminal tools
// ---------------------------------------------------------------------------

#[tokio::test]
async fn recall_memory_without_arguments_is_not_an_error() {
    let dir = TempDir::new().expect("tempdir");
    let d = dispatcher(&dir).await;
    let (_, content, is_error) = unpack(d.dispatch("recall_memory", &json!({}), "t1").await);
    assert!(!is_error);
    assert!(content.contains("query"));
}

#[tokio::test]
async fn unknown_tools_are_errors() {
    let dir = TempDir::new().expect("tempdir");
    let d = dispatcher(&dir).await;
    let (_, content, is_error) = unpack(d.dispatch("launch_rockets", &json!({}), "t1").await);
    assert!(is_error);
    assert!(content.contains("Unknown tool"));
}

#[tokio::test]
async fn submit_plan_requires_all_fields() {
    let dir = TempDir::new().expect("tempdir");
    let d = dispatcher(&dir).await;

    let (_, _, is_error) = unpack(
        d.dispatch("submit_plan", &json!({ "title": "only title" }), "t1")
            .await,
    );
    assert!(is_error);

    let (_, content, is_error) = unpack(
        d.dispatch(
            "submit_plan",
            &json!({
                "title": "fix",
                "description": "why",
                "implementation": "how",
            }),
            "t2",
        )
        .await,
    );
    assert!(!is_error);
    assert!(content.contains("Plan submitted"));
}

//! Tests for the persistent store adapter.

use seedgpt::logging::{CycleLogEntry, CycleLogLevel};
use seedgpt::store::MemoryCategory;
use seedgpt::usage::UsageSummary;

use crate::support::memory_store;

#[tokio::test]
async fn insert_and_fetch_memory_roundtrips() {
    let store = memory_store().await;
    let id = store
        .insert_memory("full content", "short summary", MemoryCategory::Note)
        .await
        .expect("insert should work");

    let record = store
        .fetch_memory(id)
        .await
        .expect("fetch should work")
        .expect("record should exist");
    assert_eq!(record.content, "full content");
    assert_eq!(record.summary, "short summary");
    assert_eq!(record.category, MemoryCategory::Note);
    assert!(record.active);
}

#[tokio::test]
async fn fetch_missing_memory_returns_none() {
    let store = memory_store().await;
    let record = store.fetch_memory(999).await.expect("fetch should work");
    assert!(record.is_none());
}

#[tokio::test]
async fn deactivate_note_only_touches_notes() {
    let store = memory_store().await;
    let note = store
        .insert_memory("note", "note", MemoryCategory::Note)
        .await
        .expect("insert");
    let reflection = store
        .insert_memory("reflection", "reflection", MemoryCategory::Reflection)
        .await
        .expect("insert");

    assert!(store.deactivate_note(note).await.expect("deactivate"));
    assert!(!store.deactivate_note(reflection).await.expect("deactivate"));
    assert!(!store.deactivate_note(12345).await.expect("deactivate"));

    // Dismissal never deletes: the record is still retrievable.
    let record = store
        .fetch_memory(note)
        .await
        .expect("fetch")
        .expect("record survives dismissal");
    assert!(!record.active);
}

#[tokio::test]
async fn active_notes_excludes_dismissed_and_orders_newest_first() {
    let store = memory_store().await;
    let first = store
        .insert_memory("first", "first", MemoryCategory::Note)
        .await
        .expect("insert");
    let second = store
        .insert_memory("second", "second", MemoryCategory::Note)
        .await
        .expect("insert");
    store.deactivate_note(first).await.expect("deactivate");

    let notes = store.active_notes().await.expect("query");
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].id, second);
}

#[tokio::test]
async fn recent_reflections_limits_and_orders() {
    let store = memory_store().await;
    for i in 0..4 {
        store
            .insert_memory(&format!("r{i}"), &format!("r{i}"), MemoryCategory::Reflection)
            .await
            .expect("insert");
    }

    let reflections = store.recent_reflections(2).await.expect("query");
    assert_eq!(reflections.len(), 2);
    assert_eq!(reflections[0].content, "r3");
    assert_eq!(reflections[1].content, "r2");
}

#[tokio::test]
async fn usage_summary_and_iteration_log_persist() {
    let store = memory_store().await;

    let summary = UsageSummary {
        total_calls: 3,
        total_input_tokens: 100,
        total_output_tokens: 50,
        total_cost: 0.25,
        ..UsageSummary::default()
    };
    store
        .insert_usage_summary("fix-the-bug", &summary)
        .await
        .expect("usage insert should work");

    let entries = vec![CycleLogEntry {
        timestamp: chrono::Utc::now(),
        level: CycleLogLevel::Info,
        message: "Planned change: fix-the-bug".to_owned(),
        context: None,
    }];
    store
        .append_iteration_log(&entries)
        .await
        .expect("log insert should work");
}

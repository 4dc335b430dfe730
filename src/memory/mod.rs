//! Long-term memory: notes to self and post-cycle reflections.
//!
//! Notes are created by the planner through the `note_to_self` tool and can
//! be dismissed (deactivated, never deleted). Reflections are written by the
//! controller after every cycle and are immutable. Retrieval is
//! token-budgeted: the memory context rendered into planner/reflector
//! system prompts never exceeds its configured budget.
//!
//! Record summaries (at most 25 words) come from a secondary LLM call on
//! the `memory` phase; if that call fails the summary falls back to a
//! truncated prefix so the record is never lost.

use std::sync::Arc;

use regex::Regex;
use tracing::warn;

use crate::config::MemoryConfig;
use crate::llm::LlmClient;
use crate::providers::Message;
use crate::store::{MemoryCategory, MemoryRecord, Store, StoreError};
use crate::usage::Phase;

/// Maximum words kept in a record summary.
const SUMMARY_MAX_WORDS: usize = 25;

/// Maximum records returned by a recall query.
const RECALL_LIMIT: usize = 10;

const SUMMARY_SYSTEM_PROMPT: &str = "\
You compress notes for an autonomous coding agent's long-term memory.
Reply with a summary of the given text in at most 25 words. Reply with the
summary only — no preamble, no quotes.";

/// Gateway to the agent's persistent notes and reflections.
pub struct MemoryStore {
    store: Store,
    llm: Arc<LlmClient>,
    config: MemoryConfig,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").finish_non_exhaustive()
    }
}

impl MemoryStore {
    /// Create a memory store over the persistent store.
    pub fn new(store: Store, llm: Arc<LlmClient>, config: MemoryConfig) -> Self {
        Self { store, llm, config }
    }

    // -- writes -------------------------------------------------------------

    /// Save a note and return the tool-facing confirmation message.
    ///
    /// # Errors
    ///
    /// Returns an error only if the persistent store write fails.
    pub async fn store_note(&self, content: &str) -> Result<String, StoreError> {
        let summary = self.summarize(content).await;
        let id = self
            .store
            .insert_memory(content, &summary, MemoryCategory::Note)
            .await?;
        Ok(format!("Note saved ({id}): {summary}"))
    }

    /// Save a reflection and return the tool-facing confirmation message.
    ///
    /// # Errors
    ///
    /// Returns an error only if the persistent store write fails.
    pub async fn store_reflection(&self, content: &str) -> Result<String, StoreError> {
        let summary = self.summarize(content).await;
        let id = self
            .store
            .insert_memory(content, &summary, MemoryCategory::Reflection)
            .await?;
        Ok(format!("Reflection saved ({id}): {summary}"))
    }

    /// Dismiss a note. Domain failures (wrong category, unknown id) come
    /// back as human-readable text, not errors — the caller is an LLM tool.
    ///
    /// # Errors
    ///
    /// Returns an error only if the persistent store update fails.
    pub async fn dismiss_note(&self, id: i64) -> Result<String, StoreError> {
        if self.store.deactivate_note(id).await? {
            Ok(format!("Note {id} dismissed."))
        } else {
            Ok(format!(
                "No note with id {id} — it may not exist, or it may be a reflection \
                 (reflections cannot be dismissed)."
            ))
        }
    }

    // -- retrieval ----------------------------------------------------------

    /// Substring/regex search across content and summaries.
    ///
    /// # Errors
    ///
    /// Returns an error only if the persistent store read fails.
    pub async fn recall(&self, query: &str) -> Result<String, StoreError> {
        let regex = Regex::new(query).or_else(|_| Regex::new(&regex::escape(query)));
        let Ok(regex) = regex else {
            return Ok(format!("Unusable query: {query:?}"));
        };

        let records = self.store.all_memories().await?;
        let hits: Vec<String> = records
            .iter()
            .filter(|r| regex.is_match(&r.content) || regex.is_match(&r.summary))
            .take(RECALL_LIMIT)
            .map(format_record_line)
            .collect();

        if hits.is_empty() {
            Ok(format!("No memories match {query:?}"))
        } else {
            Ok(hits.join("\n"))
        }
    }

    /// Fetch one record in full by id.
    ///
    /// # Errors
    ///
    /// Returns an error only if the persistent store read fails.
    pub async fn recall_by_id(&self, id: i64) -> Result<String, StoreError> {
        match self.store.fetch_memory(id).await? {
            Some(record) => Ok(format!(
                "({}) [{}{}] {}\n{}",
                record.id,
                record.category.as_str(),
                if record.category == MemoryCategory::Note && !record.active {
                    ", dismissed"
                } else {
                    ""
                },
                record.created_at,
                record.content
            )),
            None => Ok(format!("No memory with id {id} found.")),
        }
    }

    /// Render the memory context for planner/reflector system prompts.
    ///
    /// Two sections: all active notes (newest first, full content), then the
    /// newest reflections in full followed by older ones as summaries. The
    /// whole section is truncated to the configured token budget using the
    /// chars-per-token estimation ratio.
    ///
    /// # Errors
    ///
    /// Returns an error only if the persistent store read fails.
    pub async fn memory_context(&self) -> Result<Option<String>, StoreError> {
        let notes = self.store.active_notes().await?;
        let reflection_limit = self
            .config
            .full_reflections
            .saturating_add(self.config.summarized_reflections);
        let reflections = self.store.recent_reflections(reflection_limit).await?;

        if notes.is_empty() && reflections.is_empty() {
            return Ok(None);
        }

        let mut sections = Vec::new();

        if !notes.is_empty() {
            let mut section = String::from("## Notes to self\n");
            for note in &notes {
                section.push_str(&format!("- ({}) {}\n", note.id, note.content));
            }
            sections.push(section);
        }

        if !reflections.is_empty() {
            let mut section = String::from("## Recent Reflections\n");
            for (idx, reflection) in reflections.iter().enumerate() {
                if idx < self.config.full_reflections {
                    section.push_str(&format!(
                        "### {} ({})\n{}\n",
                        reflection.created_at, reflection.id, reflection.content
                    ));
                } else {
                    section.push_str(&format!("- ({}) {}\n", reflection.id, reflection.summary));
                }
            }
            sections.push(section);
        }

        let combined = sections.join("\n");
        let budget_chars = self
            .config
            .token_budget
            .saturating_mul(self.config.estimation_ratio);

        Ok(Some(truncate_chars(&combined, budget_chars)))
    }

    // -- internals ----------------------------------------------------------

    /// Summarize content to at most 25 words via the memory-phase model,
    /// falling back to a truncated prefix on failure.
    async fn summarize(&self, content: &str) -> String {
        let prompt = format!("Summarize this note:\n\n{content}");
        let response = self
            .llm
            .call(
                Phase::Memory,
                vec![crate::providers::SystemBlock::new(SUMMARY_SYSTEM_PROMPT)],
                vec![Message::user(prompt)],
                vec![],
            )
            .await;

        let text = match response {
            Ok(response) => response
                .content
                .iter()
                .filter_map(|b| match b {
                    crate::providers::ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<String>(),
            Err(e) => {
                warn!(error = %e, "summary call failed, using content prefix");
                String::new()
            }
        };

        let source = if text.trim().is_empty() { content } else { &text };
        clamp_words(source.trim(), SUMMARY_MAX_WORDS)
    }
}

/// Keep at most `max_words` whitespace-separated words.
fn clamp_words(text: &str, max_words: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().take(max_words).collect();
    words.join(" ")
}

/// Truncate at a char boundary to the given budget.
fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_owned();
    }
    text.chars().take(max_chars).collect()
}

fn format_record_line(record: &MemoryRecord) -> String {
    format!(
        "({}) [{}] {}",
        record.id,
        record.category.as_str(),
        record.summary
    )
}

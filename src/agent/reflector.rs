//! The reflector: one non-tool LLM call over the cycle transcript.
//!
//! The transcript is the projected planner and builder conversations (see
//! [`crate::context::compression::summarize_messages`]) plus the cycle
//! outcome and the drained cycle log. The result is a short reflection
//! stored in long-term memory for future planners.

use crate::llm::prompts::{self, PromptContext};
use crate::llm::LlmClient;
use crate::providers::{ContentBlock, Message};
use crate::usage::Phase;

use super::SessionError;

/// Produce a reflection for a completed cycle.
///
/// # Errors
///
/// Returns [`SessionError::EmptyReflection`] when the model returns no
/// text, or the underlying LLM error.
pub async fn reflect(
    llm: &LlmClient,
    memory_context: Option<String>,
    transcript: &str,
    outcome: &str,
    cycle_log: &str,
) -> Result<String, SessionError> {
    let ctx = PromptContext {
        memory_context,
        ..PromptContext::default()
    };
    let system = prompts::system_blocks(Phase::Reflector, &ctx);
    let prompt = prompts::reflector_user_prompt(transcript, outcome, cycle_log);

    let response = llm
        .call(Phase::Reflector, system, vec![Message::user(prompt)], vec![])
        .await?;

    let reflection: String = response
        .content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n");

    let reflection = reflection.trim().to_owned();
    if reflection.is_empty() {
        return Err(SessionError::EmptyReflection);
    }
    Ok(reflection)
}

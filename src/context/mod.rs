//! Conversation context engines.
//!
//! Two subsystems keep LLM context within bounds before every
//! planner/builder/fixer call:
//!
//! - [`working`]: region-level file tracking with refresh-from-disk and
//!   budget-based eviction, producing the "Working Context" system-prompt
//!   snippet and stubbing stale conversation turns in place.
//! - [`compression`]: LLM-driven summarization of oversize tool results,
//!   triggered when the raw conversation exceeds a character threshold.
//!
//! Both passes are idempotent: running either twice over the same
//! conversation changes nothing the second time.

pub mod compression;
pub mod working;

/// Marker prefix for stubbed write-tool inputs.
pub(crate) const APPLIED_PREFIX: &str = "[applied";

/// Marker prefix for stubbed tool results.
pub(crate) const RESULT_PREFIX: &str = "[result";

/// Stub text for a write-tool input that has already been applied.
pub(crate) fn applied_marker(original: &str) -> String {
    format!("[applied — {} lines]", original.lines().count())
}

/// Stub text for an oversize tool result outside the protected tail.
pub(crate) fn result_marker(original: &str) -> String {
    format!("[result — {} lines]", original.lines().count())
}

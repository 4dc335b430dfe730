//! Per-call cost computation and cycle-level usage aggregation.
//!
//! Every successful LLM call is recorded here keyed by [`Phase`] and model.
//! Pricing is a static table of per-million-token rates; unknown models
//! default to the most expensive tier so estimates never underreport. The
//! aggregate is flushed to the persistent store at cycle end.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::providers::TokenUsage;

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

/// The calling phase of an LLM request.
///
/// Keys model selection, system-prompt assembly, and usage accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Plan-producing session.
    Planner,
    /// Edit-producing session.
    Builder,
    /// CI-failure repair session.
    Fixer,
    /// Post-cycle reflection call.
    Reflector,
    /// Note summarization calls.
    Memory,
    /// Conversation compression oracle calls.
    Summarizer,
}

impl Phase {
    /// Stable string form used in records and prompts.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Planner => "planner",
            Self::Builder => "builder",
            Self::Fixer => "fixer",
            Self::Reflector => "reflector",
            Self::Memory => "memory",
            Self::Summarizer => "summarizer",
        }
    }
}

// ---------------------------------------------------------------------------
// Pricing
// ---------------------------------------------------------------------------

/// Per-million-token rates for one model family, in USD.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPricing {
    /// Uncached input rate.
    pub input: f64,
    /// 5-minute cache write rate.
    pub cache_write_5m: f64,
    /// 1-hour cache write rate.
    pub cache_write_1h: f64,
    /// Cache read rate.
    pub cache_read: f64,
    /// Output rate.
    pub output: f64,
}

/// Pricing by model-id prefix. First match wins.
const PRICING: &[(&str, ModelPricing)] = &[
    (
        "claude-opus-4",
        ModelPricing {
            input: 15.0,
            cache_write_5m: 18.75,
            cache_write_1h: 30.0,
            cache_read: 1.5,
            output: 75.0,
        },
    ),
    (
        "claude-sonnet-4",
        ModelPricing {
            input: 3.0,
            cache_write_5m: 3.75,
            cache_write_1h: 6.0,
            cache_read: 0.3,
            output: 15.0,
        },
    ),
    (
        "claude-3-5-haiku",
        ModelPricing {
            input: 0.8,
            cache_write_5m: 1.0,
            cache_write_1h: 1.6,
            cache_read: 0.08,
            output: 4.0,
        },
    ),
];

/// The most expensive tier, used for unknown models so cost estimates are
/// an upper bound rather than an underreport.
const FALLBACK_PRICING: ModelPricing = ModelPricing {
    input: 15.0,
    cache_write_5m: 18.75,
    cache_write_1h: 30.0,
    cache_read: 1.5,
    output: 75.0,
};

/// Resolve the pricing for a model id by prefix match.
pub fn pricing_for(model: &str) -> ModelPricing {
    PRICING
        .iter()
        .find(|(prefix, _)| model.starts_with(prefix))
        .map(|(_, pricing)| *pricing)
        .unwrap_or(FALLBACK_PRICING)
}

#[allow(clippy::cast_precision_loss)]
fn tokens_f(tokens: u64) -> f64 {
    tokens as f64
}

/// Compute the cost of one call in USD.
///
/// The uncached input count is the reported input minus all cache writes and
/// reads (saturating; providers that exclude cache tokens from `input`
/// simply yield zero uncached input).
pub fn compute_cost(model: &str, usage: &TokenUsage) -> f64 {
    let pricing = pricing_for(model);

    let cache_create = usage
        .cache_write_5m_tokens
        .saturating_add(usage.cache_write_1h_tokens);
    let uncached = usage
        .input_tokens
        .saturating_sub(cache_create)
        .saturating_sub(usage.cache_read_tokens);

    (tokens_f(uncached) * pricing.input
        + tokens_f(usage.cache_write_5m_tokens) * pricing.cache_write_5m
        + tokens_f(usage.cache_write_1h_tokens) * pricing.cache_write_1h
        + tokens_f(usage.cache_read_tokens) * pricing.cache_read
        + tokens_f(usage.output_tokens) * pricing.output)
        / 1_000_000.0
}

// ---------------------------------------------------------------------------
// Entries and summary
// ---------------------------------------------------------------------------

/// One recorded LLM call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEntry {
    /// Calling phase.
    pub phase: Phase,
    /// Model that served the call.
    pub model: String,
    /// Whether the call went through the batch API.
    pub batched: bool,
    /// Reported token usage.
    pub usage: TokenUsage,
    /// Computed cost in USD.
    pub cost: f64,
}

/// Aggregate over one (phase, model, batched) group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageBreakdown {
    /// Calling phase (the "caller" of the persisted record).
    pub caller: Phase,
    /// Model id.
    pub model: String,
    /// Whether these were batch calls.
    pub batched: bool,
    /// Number of calls in this group.
    pub calls: u64,
    /// Summed input tokens.
    pub input_tokens: u64,
    /// Summed output tokens.
    pub output_tokens: u64,
    /// Summed 5-minute cache writes.
    pub cache_write_5m_tokens: u64,
    /// Summed 1-hour cache writes.
    pub cache_write_1h_tokens: u64,
    /// Summed cache reads.
    pub cache_read_tokens: u64,
    /// Summed cost in USD.
    pub cost: f64,
}

/// Cycle-level usage aggregate, persisted at cycle end.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageSummary {
    /// Total calls across all phases.
    pub total_calls: u64,
    /// Total input tokens.
    pub total_input_tokens: u64,
    /// Total output tokens.
    pub total_output_tokens: u64,
    /// Total 5-minute cache writes.
    pub total_cache_write_5m_tokens: u64,
    /// Total 1-hour cache writes.
    pub total_cache_write_1h_tokens: u64,
    /// Total cache reads.
    pub total_cache_read_tokens: u64,
    /// Total cost in USD.
    pub total_cost: f64,
    /// Per-(phase, model, batched) groups, in first-seen order.
    pub breakdown: Vec<UsageBreakdown>,
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Thread-safe usage recorder shared by the LLM client.
#[derive(Debug, Default)]
pub struct UsageTracker {
    entries: Mutex<Vec<UsageEntry>>,
}

impl UsageTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one successful call.
    pub fn record(&self, phase: Phase, model: &str, usage: TokenUsage, batched: bool) {
        let entry = UsageEntry {
            phase,
            model: model.to_owned(),
            batched,
            cost: compute_cost(model, &usage),
            usage,
        };
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }

    /// Number of recorded calls.
    pub fn call_count(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// Aggregate all recorded entries into a summary.
    pub fn summary(&self) -> UsageSummary {
        let entries = match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(_) => return UsageSummary::default(),
        };

        let mut summary = UsageSummary::default();

        for entry in &entries {
            summary.total_calls = summary.total_calls.saturating_add(1);
            summary.total_input_tokens = summary
                .total_input_tokens
                .saturating_add(entry.usage.input_tokens);
            summary.total_output_tokens = summary
                .total_output_tokens
                .saturating_add(entry.usage.output_tokens);
            summary.total_cache_write_5m_tokens = summary
                .total_cache_write_5m_tokens
                .saturating_add(entry.usage.cache_write_5m_tokens);
            summary.total_cache_write_1h_tokens = summary
                .total_cache_write_1h_tokens
                .saturating_add(entry.usage.cache_write_1h_tokens);
            summary.total_cache_read_tokens = summary
                .total_cache_read_tokens
                .saturating_add(entry.usage.cache_read_tokens);
            summary.total_cost += entry.cost;

            let group = summary.breakdown.iter_mut().find(|b| {
                b.caller == entry.phase && b.model == entry.model && b.batched == entry.batched
            });
            match group {
                Some(group) => {
                    group.calls = group.calls.saturating_add(1);
                    group.input_tokens = group.input_tokens.saturating_add(entry.usage.input_tokens);
                    group.output_tokens =
                        group.output_tokens.saturating_add(entry.usage.output_tokens);
                    group.cache_write_5m_tokens = group
                        .cache_write_5m_tokens
                        .saturating_add(entry.usage.cache_write_5m_tokens);
                    group.cache_write_1h_tokens = group
                        .cache_write_1h_tokens
                        .saturating_add(entry.usage.cache_write_1h_tokens);
                    group.cache_read_tokens = group
                        .cache_read_tokens
                        .saturating_add(entry.usage.cache_read_tokens);
                    group.cost += entry.cost;
                }
                None => summary.breakdown.push(UsageBreakdown {
                    caller: entry.phase,
                    model: entry.model.clone(),
                    batched: entry.batched,
                    calls: 1,
                    input_tokens: entry.usage.input_tokens,
                    output_tokens: entry.usage.output_tokens,
                    cache_write_5m_tokens: entry.usage.cache_write_5m_tokens,
                    cache_write_1h_tokens: entry.usage.cache_write_1h_tokens,
                    cache_read_tokens: entry.usage.cache_read_tokens,
                    cost: entry.cost,
                }),
            }
        }

        summary
    }
}

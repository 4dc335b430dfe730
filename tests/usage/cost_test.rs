//! Tests for cost computation and cycle aggregation.

use seedgpt::providers::TokenUsage;
use seedgpt::usage::{compute_cost, pricing_for, Phase, UsageTracker};

fn usage(input: u64, output: u64, w5m: u64, w1h: u64, read: u64) -> TokenUsage {
    TokenUsage {
        input_tokens: input,
        output_tokens: output,
        cache_write_5m_tokens: w5m,
        cache_write_1h_tokens: w1h,
        cache_read_tokens: read,
    }
}

// ---------------------------------------------------------------------------
// compute_cost
// ---------------------------------------------------------------------------

#[test]
fn cost_matches_hand_computation_for_sonnet() {
    // 1M uncached input at $3 + 1M output at $15.
    let cost = compute_cost("claude-sonnet-4-20250514", &usage(1_000_000, 1_000_000, 0, 0, 0));
    assert!((cost - 18.0).abs() < 1e-9, "got {cost}");
}

#[test]
fn cache_tokens_are_subtracted_from_uncached_input() {
    // All input tokens are cache reads: no uncached input cost at all.
    let cost = compute_cost("claude-sonnet-4-20250514", &usage(1_000_000, 0, 0, 0, 1_000_000));
    assert!((cost - 0.3).abs() < 1e-9, "got {cost}");
}

#[test]
fn cache_writes_use_their_own_rates() {
    let cost = compute_cost(
        "claude-sonnet-4-20250514",
        &usage(2_000_000, 0, 1_000_000, 1_000_000, 0),
    );
    // 0 uncached (2M - 2M writes), 1M at 3.75, 1M at 6.0.
    assert!((cost - 9.75).abs() < 1e-9, "got {cost}");
}

#[test]
fn uncached_subtraction_saturates() {
    // More cache tokens than input must not underflow.
    let cost = compute_cost("claude-sonnet-4-20250514", &usage(100, 0, 1_000_000, 0, 0));
    assert!(cost > 0.0);
}

#[test]
fn unknown_model_never_underreports() {
    // Property 7: the unknown-model cost is an upper bound over every
    // known model for any usage shape.
    let shapes = [
        usage(1_000_000, 50_000, 0, 0, 0),
        usage(500_000, 500_000, 100_000, 100_000, 200_000),
        usage(0, 1_000_000, 0, 0, 0),
        usage(42, 7, 5, 3, 11),
    ];
    let known = [
        "claude-opus-4-20250514",
        "claude-sonnet-4-20250514",
        "claude-3-5-haiku-20241022",
    ];

    for shape in &shapes {
        let unknown_cost = compute_cost("mystery-model-9000", shape);
        for model in &known {
            let known_cost = compute_cost(model, shape);
            assert!(
                unknown_cost >= known_cost,
                "unknown {unknown_cost} < {model} {known_cost}"
            );
        }
    }
}

#[test]
fn pricing_matches_by_prefix() {
    let sonnet = pricing_for("claude-sonnet-4-20250514");
    assert!((sonnet.input - 3.0).abs() < 1e-9);
    let haiku = pricing_for("claude-3-5-haiku-20241022");
    assert!((haiku.output - 4.0).abs() < 1e-9);
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

#[test]
fn summary_totals_accumulate() {
    let tracker = UsageTracker::new();
    tracker.record(
        Phase::Planner,
        "claude-sonnet-4-20250514",
        usage(1_000, 200, 0, 0, 0),
        false,
    );
    tracker.record(
        Phase::Builder,
        "claude-sonnet-4-20250514",
        usage(2_000, 300, 0, 0, 0),
        false,
    );

    let summary = tracker.summary();
    assert_eq!(summary.total_calls, 2);
    assert_eq!(summary.total_input_tokens, 3_000);
    assert_eq!(summary.total_output_tokens, 500);
    assert!(summary.total_cost > 0.0);
}

#[test]
fn summary_groups_by_phase_model_and_batch_flag() {
    let tracker = UsageTracker::new();
    let model = "claude-3-5-haiku-20241022";
    tracker.record(Phase::Summarizer, model, usage(100, 10, 0, 0, 0), true);
    tracker.record(Phase::Summarizer, model, usage(100, 10, 0, 0, 0), true);
    tracker.record(Phase::Summarizer, model, usage(100, 10, 0, 0, 0), false);
    tracker.record(Phase::Memory, model, usage(50, 5, 0, 0, 0), false);

    let summary = tracker.summary();
    assert_eq!(summary.breakdown.len(), 3);

    let batched = summary
        .breakdown
        .iter()
        .find(|b| b.caller == Phase::Summarizer && b.batched)
        .expect("batched group");
    assert_eq!(batched.calls, 2);

    let sync = summary
        .breakdown
        .iter()
        .find(|b| b.caller == Phase::Summarizer && !b.batched)
        .expect("sync group");
    assert_eq!(sync.calls, 1);
}

#[test]
fn empty_tracker_summarizes_to_zero() {
    let summary = UsageTracker::new().summary();
    assert_eq!(summary.total_calls, 0);
    assert!(summary.breakdown.is_empty());
    assert!((summary.total_cost).abs() < f64::EPSILON);
}

//! Compression engine: LLM-driven summarization of oversize tool results.
//!
//! Triggered before a planner/builder/fixer turn when the conversation
//! exceeds the character threshold. Write-tool inputs outside the protected
//! assistant tail are stubbed unconditionally; oversize tool results outside
//! the protected user tail become summarization candidates, each asked about
//! in one member of a single provider batch. The model answers `keep` or
//! `summarize_lines` with a range string; responses are matched back to
//! candidates strictly by `tool_use_id` — never by array position — so
//! reordered, missing, or malformed responses degrade to "keep".
//!
//! A full batch failure logs and leaves every candidate unchanged.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::SummarizationConfig;
use crate::llm::LlmClient;
use crate::providers::{
    ContentBlock, Message, Role, SystemBlock, ToolDefinition,
};
use crate::usage::Phase;

use super::working::stub_write_input;

/// Tool results from these tools are never summarized.
const NEVER_SUMMARIZE: &[&str] = &[
    "note_to_self",
    "dismiss_note",
    "recall_memory",
    "done",
    "submit_plan",
];

const SUMMARIZER_SYSTEM_PROMPT: &str = "\
You prune stale tool results from an autonomous coding agent's conversation.
You are shown the conversation and one specific tool result. Decide which of
its lines are still worth keeping for the work in progress. Call keep if the
whole result still matters; otherwise call summarize_lines with the ranges
worth keeping (for example \"1-3,5,8-10\"). Prefer aggressive pruning — the
agent can always re-read files from disk.";

// ---------------------------------------------------------------------------
// Candidates
// ---------------------------------------------------------------------------

/// A summarization candidate pointing at one oversize tool_result block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Message index in the conversation.
    pub msg_idx: usize,
    /// Block index within the message.
    pub block_idx: usize,
    /// The result's tool_use id.
    pub tool_use_id: String,
    /// Name of the tool that produced the result.
    pub tool_name: String,
    /// Character count of the result content.
    pub char_len: usize,
    /// Short hint derived from the originating call's input.
    pub input_hint: String,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The conversation compression engine.
pub struct Compressor {
    llm: Arc<LlmClient>,
    config: SummarizationConfig,
}

impl std::fmt::Debug for Compressor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compressor").finish_non_exhaustive()
    }
}

impl Compressor {
    /// Create a compressor using the given client for oracle calls.
    pub fn new(llm: Arc<LlmClient>, config: SummarizationConfig) -> Self {
        Self { llm, config }
    }

    /// Compress the conversation in place if it exceeds the threshold.
    ///
    /// Structure is preserved: message count, per-message block count, and
    /// every tool_use_id survive; only content text changes. Any batch
    /// failure leaves the candidates untouched.
    pub async fn compress(&self, conversation: &mut [Message]) {
        let total_chars: usize = conversation.iter().map(|m| m.content.char_len()).sum();
        if total_chars <= self.config.char_threshold {
            return;
        }
        debug!(total_chars, "conversation over threshold, compressing");

        self.stub_applied_inputs(conversation);

        let candidates = self.select_candidates(conversation);
        if candidates.is_empty() {
            return;
        }

        let requests = self.build_requests(conversation, &candidates);
        let responses = match self.llm.call_batch(Phase::Summarizer, requests).await {
            Ok(responses) => responses,
            Err(e) => {
                warn!(error = %e, "summarization batch failed, leaving results unchanged");
                return;
            }
        };

        self.apply_responses(conversation, &candidates, &responses);
    }

    // -- step 1: unconditional input stubbing -------------------------------

    /// Stub edit_file/create_file inputs outside the protected assistant
    /// tail. Idempotent via the `[applied` prefix check.
    fn stub_applied_inputs(&self, conversation: &mut [Message]) {
        let assistant_total = conversation
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .count();

        let mut assistant_seen = 0usize;
        for message in conversation.iter_mut() {
            if message.role != Role::Assistant {
                continue;
            }
            assistant_seen = assistant_seen.saturating_add(1);
            let from_end = assistant_total.saturating_sub(assistant_seen).saturating_add(1);
            if from_end <= self.config.protected_turns {
                continue;
            }
            let Some(blocks) = message.content.blocks_mut() else {
                continue;
            };
            for block in blocks {
                if let ContentBlock::ToolUse { name, input, .. } = block {
                    stub_write_input(name, input);
                }
            }
        }
    }

    // -- step 2: candidate selection ----------------------------------------

    /// Oversize tool results outside the protected user tail whose
    /// originating tool is summarizable.
    fn select_candidates(&self, conversation: &[Message]) -> Vec<Candidate> {
        let tool_info = index_tool_uses(conversation);
        let user_total = conversation.iter().filter(|m| m.role == Role::User).count();

        let mut candidates = Vec::new();
        let mut user_seen = 0usize;

        for (msg_idx, message) in conversation.iter().enumerate() {
            if message.role != Role::User {
                continue;
            }
            user_seen = user_seen.saturating_add(1);
            let from_end = user_total.saturating_sub(user_seen).saturating_add(1);
            if from_end <= self.config.protected_turns {
                continue;
            }
            let Some(blocks) = message.content.blocks() else {
                continue;
            };
            for (block_idx, block) in blocks.iter().enumerate() {
                let ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    ..
                } = block
                else {
                    continue;
                };
                let char_len = content.chars().count();
                if char_len < self.config.min_result_chars {
                    continue;
                }
                let Some((tool_name, input_hint)) = tool_info.get(tool_use_id) else {
                    continue;
                };
                if NEVER_SUMMARIZE.contains(&tool_name.as_str()) {
                    continue;
                }
                candidates.push(Candidate {
                    msg_idx,
                    block_idx,
                    tool_use_id: tool_use_id.clone(),
                    tool_name: tool_name.clone(),
                    char_len,
                    input_hint: input_hint.clone(),
                });
            }
        }

        candidates
    }

    // -- step 3: batch construction ------------------------------------------

    fn build_requests(
        &self,
        conversation: &[Message],
        candidates: &[Candidate],
    ) -> Vec<(Vec<SystemBlock>, Vec<Message>, Vec<ToolDefinition>)> {
        candidates
            .iter()
            .map(|candidate| {
                let content = result_content(conversation, candidate).unwrap_or_default();
                let numbered = number_lines(content);
                let instruction = format!(
                    "Decide what to keep of tool result {id} from {tool}{hint} \
                     ({len} chars). Call keep to leave it intact, or \
                     summarize_lines with tool_use_id {id:?} and the line \
                     ranges worth keeping.\n\n{numbered}",
                    id = candidate.tool_use_id,
                    tool = candidate.tool_name,
                    hint = candidate.input_hint,
                    len = candidate.char_len,
                );

                let mut messages = conversation.to_vec();
                messages.push(Message::user(instruction));

                (
                    vec![SystemBlock::new(SUMMARIZER_SYSTEM_PROMPT)],
                    messages,
                    summarizer_tools(),
                )
            })
            .collect()
    }

    // -- step 4: response application ----------------------------------------

    /// Apply batch responses, matched to candidates by tool_use_id only.
    fn apply_responses(
        &self,
        conversation: &mut [Message],
        candidates: &[Candidate],
        responses: &[crate::providers::ModelResponse],
    ) {
        let by_id: HashMap<&str, &Candidate> = candidates
            .iter()
            .map(|c| (c.tool_use_id.as_str(), c))
            .collect();

        for response in responses {
            for (_, name, input) in response.tool_uses() {
                if name != "summarize_lines" {
                    continue;
                }
                let Some(target_id) = input.get("tool_use_id").and_then(Value::as_str) else {
                    continue;
                };
                let Some(candidate) = by_id.get(target_id) else {
                    debug!(tool_use_id = target_id, "summarize_lines names unknown result");
                    continue;
                };
                let Some(keep_lines) = input.get("keep_lines").and_then(Value::as_str) else {
                    continue;
                };
                let ranges = parse_ranges(keep_lines);
                if ranges.is_empty() {
                    continue;
                }
                if let Some(content) = result_content_mut(conversation, candidate) {
                    let rebuilt = rebuild_content(content.as_str(), &ranges, &self.config.gap_marker);
                    *content = rebuilt;
                }
            }
        }
    }
}

/// Map tool_use id -> (tool name, input hint) across the conversation.
fn index_tool_uses(conversation: &[Message]) -> HashMap<String, (String, String)> {
    let mut info = HashMap::new();
    for message in conversation {
        if message.role != Role::Assistant {
            continue;
        }
        let Some(blocks) = message.content.blocks() else {
            continue;
        };
        for block in blocks {
            if let ContentBlock::ToolUse { id, name, input } = block {
                info.insert(id.clone(), (name.clone(), input_hint(name, input)));
            }
        }
    }
    info
}

/// Short human hint: the file for reads, the truncated query for searches.
fn input_hint(name: &str, input: &Value) -> String {
    match name {
        "read_file" => input
            .get("filePath")
            .and_then(Value::as_str)
            .map(|p| format!(": {p}"))
            .unwrap_or_default(),
        "grep_search" | "file_search" => {
            let query = input
                .get("query")
                .or_else(|| input.get("glob"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            let truncated: String = query.chars().take(60).collect();
            format!(": \"{truncated}\"")
        }
        _ => String::new(),
    }
}

fn result_content<'a>(conversation: &'a [Message], candidate: &Candidate) -> Option<&'a str> {
    let blocks = conversation.get(candidate.msg_idx)?.content.blocks()?;
    match blocks.get(candidate.block_idx)? {
        ContentBlock::ToolResult { content, .. } => Some(content.as_str()),
        _ => None,
    }
}

fn result_content_mut<'a>(
    conversation: &'a mut [Message],
    candidate: &Candidate,
) -> Option<&'a mut String> {
    let blocks = conversation
        .get_mut(candidate.msg_idx)?
        .content
        .blocks_mut()?;
    match blocks.get_mut(candidate.block_idx)? {
        ContentBlock::ToolResult { content, .. } => Some(content),
        _ => None,
    }
}

/// Prefix each line with its 1-based number, `N|text`.
fn number_lines(content: &str) -> String {
    content
        .lines()
        .enumerate()
        .map(|(idx, line)| format!("{}|{line}", idx.saturating_add(1)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn summarizer_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "keep".to_owned(),
            description: "Keep the tool result unchanged.".to_owned(),
            input_schema: json!({ "type": "object", "properties": {} }),
        },
        ToolDefinition {
            name: "summarize_lines".to_owned(),
            description: "Keep only the named line ranges of the tool result.".to_owned(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "tool_use_id": { "type": "string", "description": "Id of the tool result" },
                    "keep_lines": {
                        "type": "string",
                        "description": "Comma-separated ranges, e.g. \"1-3,5,8-10\"",
                    },
                },
                "required": ["tool_use_id", "keep_lines"],
            }),
        },
    ]
}

// ---------------------------------------------------------------------------
// Range algebra
// ---------------------------------------------------------------------------

/// Parse a `"1-3,5,8-10"` range string.
///
/// Malformed and reversed parts are silently dropped. The result is sorted
/// by start and adjacency-merged: two ranges combine when the second starts
/// at or before one past the first's end.
pub fn parse_ranges(input: &str) -> Vec<(usize, usize)> {
    let mut ranges: Vec<(usize, usize)> = Vec::new();

    for part in input.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let parsed = match part.split_once('-') {
            Some((a, b)) => match (a.trim().parse::<usize>(), b.trim().parse::<usize>()) {
                (Ok(start), Ok(end)) if start <= end && start > 0 => Some((start, end)),
                _ => None,
            },
            None => part.parse::<usize>().ok().filter(|n| *n > 0).map(|n| (n, n)),
        };
        if let Some(range) = parsed {
            ranges.push(range);
        }
    }

    ranges.sort_by_key(|r| r.0);

    let mut merged: Vec<(usize, usize)> = Vec::with_capacity(ranges.len());
    for (start, end) in ranges {
        match merged.last_mut() {
            Some((_, last_end)) if start <= last_end.saturating_add(1) => {
                *last_end = (*last_end).max(end);
            }
            _ => merged.push((start, end)),
        }
    }
    merged
}

/// Rebuild content keeping only the given (merged, sorted) line ranges.
///
/// A gap marker is inserted before the first range unless it starts at line
/// 1, between ranges (post-merge they are never adjacent), and after the
/// last range unless it ends at the last line.
pub fn rebuild_content(content: &str, ranges: &[(usize, usize)], gap_marker: &str) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let total = lines.len();

    let mut out: Vec<String> = Vec::new();
    let mut last_kept: Option<usize> = None;

    for &(start, end) in ranges {
        let start = start.max(1);
        let end = end.min(total);
        if start > end || start > total {
            continue;
        }

        match last_kept {
            None if start > 1 => out.push(gap_marker.to_owned()),
            Some(prev) if start > prev.saturating_add(1) => out.push(gap_marker.to_owned()),
            _ => {}
        }

        for line_no in start..=end {
            if let Some(line) = lines.get(line_no.saturating_sub(1)) {
                out.push((*line).to_owned());
            }
        }
        last_kept = Some(end);
    }

    match last_kept {
        Some(prev) if prev < total => out.push(gap_marker.to_owned()),
        None if total > 0 => out.push(gap_marker.to_owned()),
        _ => {}
    }

    out.join("\n")
}

// ---------------------------------------------------------------------------
// Transcript projection
// ---------------------------------------------------------------------------

/// Render a conversation as a compact transcript for the reflector.
///
/// Text survives verbatim; tool calls and results collapse to
/// `[tool: name]`, `[result]`, and `[result ERROR]` lines; thinking is
/// dropped.
pub fn summarize_messages(messages: &[Message]) -> String {
    let mut out = String::new();

    for message in messages {
        let label = match message.role {
            Role::User => "USER",
            Role::Assistant => "ASSISTANT",
        };
        out.push_str(label);
        out.push_str(":\n");

        match &message.content {
            crate::providers::MessageContent::Text(text) => {
                out.push_str(text);
                out.push('\n');
            }
            crate::providers::MessageContent::Blocks(blocks) => {
                for block in blocks {
                    match block {
                        ContentBlock::Text { text } => {
                            out.push_str(text);
                            out.push('\n');
                        }
                        ContentBlock::Thinking { .. } => {}
                        ContentBlock::ToolUse { name, .. } => {
                            out.push_str(&format!("[tool: {name}]\n"));
                        }
                        ContentBlock::ToolResult { is_error, .. } => {
                            if *is_error {
                                out.push_str("[result ERROR]\n");
                            } else {
                                out.push_str("[result]\n");
                            }
                        }
                    }
                }
            }
        }
        out.push('\n');
    }

    out
}

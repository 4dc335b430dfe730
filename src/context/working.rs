//! Working context engine: region-level tracking of the files the agent
//! has recently touched.
//!
//! Called once before each planner/builder/fixer LLM call. The engine
//! re-scans the conversation, maintains per-file line regions with an
//! interval algebra, stubs stale turns in place, refreshes tracked content
//! from disk, evicts regions beyond the line budget (newest effective turn
//! first), and renders the surviving regions as a markdown snippet for the
//! system prompt. The snippet is never injected into the conversation.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use crate::config::ContextConfig;
use crate::providers::{ContentBlock, Message, MessageContent, Role};
use crate::tools::workspace::Workspace;

use super::{applied_marker, result_marker, APPLIED_PREFIX, RESULT_PREFIX};

/// Sentinel for a region extending to the end of the file.
const END_OF_FILE: usize = usize::MAX;

// ---------------------------------------------------------------------------
// Tracked state
// ---------------------------------------------------------------------------

/// One tracked line region, 1-based inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedRegion {
    /// First line of the region.
    pub start: usize,
    /// Last line of the region ([`END_OF_FILE`] for "to the end").
    pub end: usize,
    /// Turn at which the region was last established or re-read.
    pub last_use_turn: u32,
}

/// Tracking state for one file.
#[derive(Debug, Clone, Default)]
pub struct TrackedFile {
    /// Sorted, pairwise non-overlapping regions.
    pub regions: Vec<TrackedRegion>,
    /// Content as of the last refresh from disk.
    pub last_content: Option<String>,
    /// Line count of `last_content`.
    pub total_lines: usize,
    /// Turn of the most recent edit/create observed.
    pub last_edit_turn: u32,
    /// Whether the file is deleted (or unreadable).
    pub deleted: bool,
}

// ---------------------------------------------------------------------------
// Interval algebra
// ---------------------------------------------------------------------------

/// Merge a new region into an existing ordered region list.
///
/// The new region replaces any overlap with older regions; non-overlapping
/// fragments of older regions survive with their original turn stamp.
/// Adjacent or touching regions with the same turn are coalesced. The
/// result is sorted by start and pairwise non-overlapping.
pub fn add_region(
    existing: &[TrackedRegion],
    new_start: usize,
    new_end: usize,
    turn: u32,
) -> Vec<TrackedRegion> {
    let new_start = new_start.max(1);
    let new_end = new_end.max(new_start);

    let mut out = Vec::with_capacity(existing.len().saturating_add(1));

    for region in existing {
        if region.end < new_start || region.start > new_end {
            out.push(*region);
            continue;
        }
        // Overlap: keep the non-covered fragments at their old turn.
        if region.start < new_start {
            out.push(TrackedRegion {
                start: region.start,
                end: new_start.saturating_sub(1),
                last_use_turn: region.last_use_turn,
            });
        }
        if region.end > new_end {
            out.push(TrackedRegion {
                start: new_end.saturating_add(1),
                end: region.end,
                last_use_turn: region.last_use_turn,
            });
        }
    }

    out.push(TrackedRegion {
        start: new_start,
        end: new_end,
        last_use_turn: turn,
    });
    out.sort_by_key(|r| r.start);

    // Coalesce touching neighbours with the same turn stamp.
    let mut merged: Vec<TrackedRegion> = Vec::with_capacity(out.len());
    for region in out {
        match merged.last_mut() {
            Some(last)
                if last.last_use_turn == region.last_use_turn
                    && last.end.saturating_add(1) >= region.start =>
            {
                last.end = last.end.max(region.end);
            }
            _ => merged.push(region),
        }
    }
    merged
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The per-cycle working context engine.
#[derive(Debug)]
pub struct WorkingContext {
    workspace: Workspace,
    config: ContextConfig,
    read_window: usize,
}

impl WorkingContext {
    /// Create an engine over the given workspace.
    pub fn new(workspace: Workspace, config: ContextConfig, read_window: usize) -> Self {
        Self {
            workspace,
            config,
            read_window,
        }
    }

    /// Prepare a conversation for the next LLM call.
    ///
    /// Stubs stale turns in place (idempotent) and returns the working
    /// context snippet for the system prompt, or `None` when no tracked
    /// lines survive eviction.
    pub fn prepare(&self, conversation: &mut [Message]) -> Option<String> {
        let mut files = self.scan(conversation);
        self.strip_old_turns(conversation);
        self.refresh_from_disk(&mut files);
        evict(&mut files, self.config.max_active_lines);
        build_snippet(&files)
    }

    // -- step 1: scan -------------------------------------------------------

    /// Scan the conversation, numbering assistant messages as turns, and
    /// build the tracked-file map.
    fn scan(&self, conversation: &[Message]) -> BTreeMap<String, TrackedFile> {
        let mut files: BTreeMap<String, TrackedFile> = BTreeMap::new();
        let mut turn: u32 = 0;

        for message in conversation {
            if message.role != Role::Assistant {
                continue;
            }
            turn = turn.saturating_add(1);

            let Some(blocks) = message.content.blocks() else {
                continue;
            };
            for block in blocks {
                let ContentBlock::ToolUse { name, input, .. } = block else {
                    continue;
                };
                let Some(raw_path) = input.get("filePath").and_then(Value::as_str) else {
                    continue;
                };
                let path = self.workspace.normalize(raw_path);
                let file = files.entry(path).or_default();

                match name.as_str() {
                    "read_file" => {
                        let start = input
                            .get("startLine")
                            .and_then(Value::as_u64)
                            .and_then(|v| usize::try_from(v).ok())
                            .unwrap_or(1);
                        let end = input
                            .get("endLine")
                            .and_then(Value::as_u64)
                            .and_then(|v| usize::try_from(v).ok())
                            .unwrap_or_else(|| {
                                start
                                    .saturating_add(self.read_window)
                                    .saturating_sub(1)
                            });
                        let padded_start = start.saturating_sub(self.config.context_padding).max(1);
                        let padded_end = end.saturating_add(self.config.context_padding);
                        file.regions = add_region(&file.regions, padded_start, padded_end, turn);
                        file.deleted = false;
                    }
                    "edit_file" => {
                        file.last_edit_turn = turn;
                        file.deleted = false;
                    }
                    "create_file" => {
                        file.last_edit_turn = turn;
                        file.deleted = false;
                        file.regions = add_region(&file.regions, 1, END_OF_FILE, turn);
                    }
                    "delete_file" => {
                        file.deleted = true;
                        file.last_content = None;
                    }
                    _ => {}
                }
            }
        }

        files
    }

    // -- step 3: strip old turns -------------------------------------------

    /// Stub messages outside the protected tail of their role. Idempotent.
    fn strip_old_turns(&self, conversation: &mut [Message]) {
        let assistant_total = conversation
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .count();
        let user_total = conversation.iter().filter(|m| m.role == Role::User).count();

        let mut assistant_seen = 0usize;
        let mut user_seen = 0usize;

        for message in conversation.iter_mut() {
            match message.role {
                Role::Assistant => {
                    assistant_seen = assistant_seen.saturating_add(1);
                    let from_end = assistant_total.saturating_sub(assistant_seen).saturating_add(1);
                    if from_end > self.config.protected_turns {
                        strip_assistant_message(message);
                    }
                }
                Role::User => {
                    user_seen = user_seen.saturating_add(1);
                    let from_end = user_total.saturating_sub(user_seen).saturating_add(1);
                    if from_end > self.config.protected_turns {
                        self.strip_user_message(message);
                    }
                }
            }
        }
    }

    fn strip_user_message(&self, message: &mut Message) {
        let Some(blocks) = message.content.blocks_mut() else {
            return;
        };
        for block in blocks {
            if let ContentBlock::ToolResult { content, .. } = block {
                if content.chars().count() >= self.config.min_result_chars
                    && !content.starts_with(RESULT_PREFIX)
                    && !content.starts_with(APPLIED_PREFIX)
                {
                    *content = result_marker(content);
                }
            }
        }
    }

    // -- step 4: refresh ----------------------------------------------------

    /// Re-read every non-deleted tracked file from disk and clamp regions.
    fn refresh_from_disk(&self, files: &mut BTreeMap<String, TrackedFile>) {
        for (path, file) in files.iter_mut() {
            if file.deleted {
                continue;
            }
            match self.workspace.read_to_string(path) {
                Ok(content) => {
                    file.total_lines = content.lines().count();
                    file.last_content = Some(content);
                    let total = file.total_lines;
                    file.regions.retain(|r| r.start <= total);
                    for region in &mut file.regions {
                        region.end = region.end.min(total);
                    }
                }
                Err(_) => {
                    debug!(%path, "tracked file unreadable, marking deleted");
                    file.deleted = true;
                    file.last_content = None;
                }
            }
        }
    }
}

/// Strip thinking blocks and stub write-tool inputs in one assistant
/// message outside the protected tail.
fn strip_assistant_message(message: &mut Message) {
    let Some(blocks) = message.content.blocks_mut() else {
        return;
    };

    blocks.retain(|b| !matches!(b, ContentBlock::Thinking { .. }));

    for block in blocks.iter_mut() {
        if let ContentBlock::ToolUse { name, input, .. } = block {
            stub_write_input(name, input);
        }
    }

    if blocks.is_empty() {
        message.content = MessageContent::Text("[reasoning stripped]".to_owned());
    }
}

/// Replace the bulky fields of applied write tools with a marker.
/// Idempotent: already-stubbed fields are left alone.
pub(crate) fn stub_write_input(name: &str, input: &mut Value) {
    let fields: &[&str] = match name {
        "edit_file" => &["oldString", "newString"],
        "create_file" => &["content"],
        _ => return,
    };
    for field in fields {
        let Some(value) = input.get_mut(field) else {
            continue;
        };
        let Some(text) = value.as_str() else {
            continue;
        };
        if text.starts_with(APPLIED_PREFIX) {
            continue;
        }
        *value = Value::String(applied_marker(text));
    }
}

// ---------------------------------------------------------------------------
// Step 5: eviction
// ---------------------------------------------------------------------------

/// Line count of a region after clamping to the file's bounds.
fn region_line_count(region: &TrackedRegion, total_lines: usize) -> usize {
    let end = region.end.min(total_lines);
    let start = region.start.max(1);
    end.saturating_sub(start).saturating_add(1)
}

/// Drop regions beyond the global line budget.
///
/// Regions are ranked by effective turn (most recent first, stable within
/// ties) and kept greedily until the running line total would exceed the
/// budget; the first region that would overflow it stops the keep phase.
/// Deleted files never keep regions.
fn evict(files: &mut BTreeMap<String, TrackedFile>, max_active_lines: usize) {
    // (path, region index, effective turn, line count) in deterministic order.
    let mut ranked: Vec<(String, usize, u32, usize)> = Vec::new();
    for (path, file) in files.iter() {
        if file.deleted {
            continue;
        }
        for (idx, region) in file.regions.iter().enumerate() {
            let effective = region.last_use_turn.max(file.last_edit_turn);
            ranked.push((
                path.clone(),
                idx,
                effective,
                region_line_count(region, file.total_lines),
            ));
        }
    }
    ranked.sort_by(|a, b| b.2.cmp(&a.2));

    let mut kept: std::collections::HashSet<(String, usize)> = std::collections::HashSet::new();
    let mut total = 0usize;
    for (path, idx, _, lines) in ranked {
        if total.saturating_add(lines) > max_active_lines {
            break;
        }
        total = total.saturating_add(lines);
        kept.insert((path, idx));
    }

    for (path, file) in files.iter_mut() {
        if file.deleted {
            file.regions.clear();
            continue;
        }
        let mut idx = 0usize;
        file.regions.retain(|_| {
            let keep = kept.contains(&(path.clone(), idx));
            idx = idx.saturating_add(1);
            keep
        });
    }
}

// ---------------------------------------------------------------------------
// Step 6: snippet
// ---------------------------------------------------------------------------

/// Render the surviving regions as the system-prompt snippet.
fn build_snippet(files: &BTreeMap<String, TrackedFile>) -> Option<String> {
    let mut body = String::new();
    let mut file_count = 0usize;
    let mut line_count = 0usize;

    for (path, file) in files {
        if file.deleted || file.regions.is_empty() {
            continue;
        }
        let Some(content) = &file.last_content else {
            continue;
        };
        let lines: Vec<&str> = content.lines().collect();
        let total = file.total_lines;

        let mut section = format!("--- {path} ({total} lines) ---\n");
        let mut section_lines = 0usize;
        let mut prev_end: Option<usize> = None;

        for region in &file.regions {
            let start = region.start.max(1);
            let end = region.end.min(total);
            if start > end {
                continue;
            }

            match prev_end {
                None if start > 1 => {
                    section.push_str(&format!("[... {} lines above ...]\n", start.saturating_sub(1)));
                }
                Some(prev) if start > prev.saturating_add(1) => {
                    section.push_str(&format!(
                        "[... {} lines omitted ...]\n",
                        start.saturating_sub(prev).saturating_sub(1)
                    ));
                }
                _ => {}
            }

            for line_no in start..=end {
                if let Some(text) = lines.get(line_no.saturating_sub(1)) {
                    section.push_str(&format!("{line_no} | {text}\n"));
                    section_lines = section_lines.saturating_add(1);
                }
            }
            prev_end = Some(end);
        }

        if let Some(prev) = prev_end {
            if prev < total {
                section.push_str(&format!(
                    "[... {} lines below ...]\n",
                    total.saturating_sub(prev)
                ));
            }
        }

        if section_lines > 0 {
            body.push_str(&section);
            body.push('\n');
            file_count = file_count.saturating_add(1);
            line_count = line_count.saturating_add(section_lines);
        }
    }

    if line_count == 0 {
        return None;
    }

    Some(format!(
        "## Working Context ({file_count} files, {line_count} lines — auto-refreshed from disk)\n\n{body}"
    ))
}

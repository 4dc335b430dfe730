//! LLM provider abstraction layer.
//!
//! Defines the conversation data model shared by every component (messages,
//! content blocks, tool definitions, usage counters) and the
//! [`ModelProvider`] trait the iteration pipeline is written against.
//!
//! One provider is implemented: [`anthropic::AnthropicProvider`] — the
//! Anthropic `/v1/messages` API plus its message-batches trio.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub mod anthropic;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// Conversation participant role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Human-side message (prompts and tool results).
    User,
    /// Assistant (LLM) message.
    Assistant,
}

/// A message in a conversation with an LLM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// The role of the message author.
    pub role: Role,
    /// Message content — plain text or structured blocks.
    pub content: MessageContent,
}

impl Message {
    /// Build a plain-text user message.
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    /// Build a user message from structured blocks.
    pub fn user_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Blocks(blocks),
        }
    }

    /// Build an assistant message from structured blocks.
    pub fn assistant_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Blocks(blocks),
        }
    }
}

/// The content of a message — text or structured parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text content.
    Text(String),
    /// Structured content blocks (text, thinking, tool calls, tool results).
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// Extract plain text, joining all text blocks.
    pub fn text(&self) -> String {
        match self {
            Self::Text(t) => t.clone(),
            Self::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }

    /// Total character count of all textual content, including tool inputs.
    pub fn char_len(&self) -> usize {
        match self {
            Self::Text(t) => t.chars().count(),
            Self::Blocks(blocks) => blocks.iter().map(ContentBlock::char_len).sum(),
        }
    }

    /// Borrow the structured blocks, if any.
    pub fn blocks(&self) -> Option<&[ContentBlock]> {
        match self {
            Self::Text(_) => None,
            Self::Blocks(blocks) => Some(blocks),
        }
    }

    /// Mutably borrow the structured blocks, if any.
    pub fn blocks_mut(&mut self) -> Option<&mut Vec<ContentBlock>> {
        match self {
            Self::Text(_) => None,
            Self::Blocks(blocks) => Some(blocks),
        }
    }
}

/// A single structured content block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Plain text.
    Text {
        /// The text content.
        text: String,
    },
    /// Extended-thinking block emitted by the model.
    Thinking {
        /// The reasoning text.
        thinking: String,
    },
    /// Tool use request from the assistant.
    ToolUse {
        /// Unique call identifier, the only binding between call and result.
        id: String,
        /// Tool name.
        name: String,
        /// Tool input as JSON.
        input: serde_json::Value,
    },
    /// Result of a tool call.
    ToolResult {
        /// Matching call identifier.
        tool_use_id: String,
        /// Result content.
        content: String,
        /// Whether the tool reported an error.
        #[serde(default)]
        is_error: bool,
    },
}

impl ContentBlock {
    /// Character count of the block's textual payload.
    pub fn char_len(&self) -> usize {
        match self {
            Self::Text { text } => text.chars().count(),
            Self::Thinking { thinking } => thinking.chars().count(),
            Self::ToolUse { input, .. } => input.to_string().chars().count(),
            Self::ToolResult { content, .. } => content.chars().count(),
        }
    }
}

/// One block of the system prompt.
///
/// The last block of a request carries a cache-control marker so
/// provider-side prompt caching is engaged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemBlock {
    /// Block text.
    pub text: String,
    /// Whether this block carries the cache-control marker.
    #[serde(default)]
    pub cache_control: bool,
}

impl SystemBlock {
    /// Build a plain system block without cache control.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            cache_control: false,
        }
    }
}

/// JSON Schema definition for a tool the LLM can call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name (must match dispatcher registration).
    pub name: String,
    /// Description shown to the LLM.
    pub description: String,
    /// JSON Schema object for the tool's parameters.
    pub input_schema: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Request / Response
// ---------------------------------------------------------------------------

/// A single completion request.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    /// Model identifier.
    pub model: String,
    /// Maximum tokens in the response.
    pub max_tokens: u32,
    /// System prompt blocks (cache control applied to the last one).
    pub system: Vec<SystemBlock>,
    /// Conversation history including the latest user message.
    pub messages: Vec<Message>,
    /// Tools available to the LLM for this call.
    pub tools: Vec<ToolDefinition>,
    /// Extended-thinking token budget, if enabled for this call.
    pub thinking_budget: Option<u32>,
}

/// One member of a batch submission.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    /// Opaque request id assigned at submit time; results are matched on it.
    pub custom_id: String,
    /// The underlying completion request.
    pub request: ModelRequest,
}

/// Token usage reported for one completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens in the prompt/input.
    pub input_tokens: u64,
    /// Tokens generated in the response.
    pub output_tokens: u64,
    /// Tokens written to the 5-minute prompt cache.
    pub cache_write_5m_tokens: u64,
    /// Tokens written to the 1-hour prompt cache.
    pub cache_write_1h_tokens: u64,
    /// Tokens read from the prompt cache.
    pub cache_read_tokens: u64,
}

/// Provider-neutral completion response.
#[derive(Debug, Clone)]
pub struct ModelResponse {
    /// Response content blocks (text, thinking, and/or tool calls).
    pub content: Vec<ContentBlock>,
    /// Token usage for cost accounting.
    pub usage: TokenUsage,
}

impl ModelResponse {
    /// All tool_use blocks, in emission order.
    pub fn tool_uses(&self) -> Vec<(&str, &str, &serde_json::Value)> {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::ToolUse { id, name, input } => {
                    Some((id.as_str(), name.as_str(), input))
                }
                _ => None,
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by model providers.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// HTTP transport failure.
    #[error("provider request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// Response did not match expected schema.
    #[error("provider response parse error: {0}")]
    Parse(String),
    /// Upstream provider responded with an error status.
    #[error("provider returned non-success status {status}: {body}")]
    HttpStatus {
        /// HTTP status code.
        status: u16,
        /// Sanitized response body.
        body: String,
    },
    /// A batch member came back `errored`; the whole batch fails.
    #[error("batch request {custom_id} errored: {message}")]
    BatchErrored {
        /// The failed member's request id.
        custom_id: String,
        /// Provider error description.
        message: String,
    },
    /// The batch reached a terminal state without a result for a member.
    #[error("batch result missing for request {custom_id}")]
    BatchResultMissing {
        /// The member with no result.
        custom_id: String,
    },
}

impl ProviderError {
    /// Whether this error is a rate-limit/overload response worth retrying.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::HttpStatus { status, .. } if *status == 429 || *status == 529)
    }
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

/// Check HTTP response status and return body text or a structured error.
///
/// # Errors
///
/// Returns `ProviderError::Request` on transport failure,
/// `ProviderError::HttpStatus` on non-2xx.
pub async fn check_http_response(response: reqwest::Response) -> Result<String, ProviderError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(ProviderError::HttpStatus {
            status: status.as_u16(),
            body: sanitize_http_error_body(&body),
        });
    }
    Ok(body)
}

/// Collapse whitespace, redact credential-shaped substrings, and truncate.
pub fn sanitize_http_error_body(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut sanitized = collapsed;
    for pattern in [
        r"sk-ant-[A-Za-z0-9_\-]{10,}",
        r"sk-[A-Za-z0-9]{32,}",
        r"ghp_[A-Za-z0-9]{20,}",
        r"github_pat_[A-Za-z0-9_]{20,}",
    ] {
        if let Ok(regex) = Regex::new(pattern) {
            sanitized = regex.replace_all(&sanitized, "[REDACTED]").into_owned();
        }
    }

    const MAX_ERROR_BODY_CHARS: usize = 256;
    if sanitized.chars().count() > MAX_ERROR_BODY_CHARS {
        let shortened = sanitized
            .chars()
            .take(MAX_ERROR_BODY_CHARS)
            .collect::<String>();
        return format!("{shortened}...[truncated]");
    }

    sanitized
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Core LLM provider interface.
///
/// Implementations must be `Send + Sync`; the iteration controller shares
/// one provider across sessions via `Arc`.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Request a single completion.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] on API, network, or parse failure.
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ProviderError>;

    /// Submit N independent requests as one batch.
    ///
    /// Results are returned in submission order, matched internally by the
    /// opaque `custom_id` of each [`BatchRequest`].
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] if submission or polling fails, or if any
    /// member of the batch comes back `errored`.
    async fn complete_batch(
        &self,
        requests: Vec<BatchRequest>,
    ) -> Result<Vec<ModelResponse>, ProviderError>;
}

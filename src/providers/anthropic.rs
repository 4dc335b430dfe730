//! Anthropic provider: `/v1/messages` plus the message-batches trio.
//!
//! Batches are submitted with one opaque `custom_id` per member, polled with
//! exponential backoff until the batch reaches a terminal state, and the
//! JSONL results stream is reassembled into submission order.

use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::BatchConfig;

use super::{
    check_http_response, BatchRequest, ContentBlock, Message, MessageContent, ModelProvider,
    ModelRequest, ModelResponse, ProviderError, Role, SystemBlock, TokenUsage,
};

const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic messages API provider.
#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    api_key: String,
    base_url: String,
    batch: BatchConfig,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider instance.
    pub fn new(api_key: String, batch: BatchConfig) -> Self {
        Self {
            api_key,
            base_url: ANTHROPIC_API_BASE.to_owned(),
            batch,
            client: reqwest::Client::new(),
        }
    }

    /// Override the API base URL (used by tests against a local stub).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn post(&self, path: &str, body: &Value) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}{path}", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(body)
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{path}", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
    }
}

#[async_trait::async_trait]
impl ModelProvider for AnthropicProvider {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ProviderError> {
        let body = request_params(&request)?;

        let response = self.post("/messages", &body).send().await?;
        let payload = check_http_response(response).await?;

        let parsed: Value =
            serde_json::from_str(&payload).map_err(|e| ProviderError::Parse(e.to_string()))?;

        parse_message(&parsed)
    }

    async fn complete_batch(
        &self,
        requests: Vec<BatchRequest>,
    ) -> Result<Vec<ModelResponse>, ProviderError> {
        let order: Vec<String> = requests.iter().map(|r| r.custom_id.clone()).collect();

        let members: Vec<Value> = requests
            .iter()
            .map(|r| {
                Ok(json!({
                    "custom_id": r.custom_id,
                    "params": request_params(&r.request)?,
                }))
            })
            .collect::<Result<_, ProviderError>>()?;

        let body = json!({ "requests": members });
        let response = self.post("/messages/batches", &body).send().await?;
        let payload = check_http_response(response).await?;
        let created: Value =
            serde_json::from_str(&payload).map_err(|e| ProviderError::Parse(e.to_string()))?;

        let batch_id = created
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::Parse("batch create response missing id".to_owned()))?
            .to_owned();

        debug!(batch_id = %batch_id, members = order.len(), "batch submitted");

        self.await_batch(&batch_id).await?;
        let results = self.stream_results(&batch_id).await?;

        // Reassemble into submission order; any gap or errored member fails
        // the whole batch.
        let mut out = Vec::with_capacity(order.len());
        let mut by_id: std::collections::HashMap<String, ModelResponse> = results;
        for custom_id in order {
            match by_id.remove(&custom_id) {
                Some(response) => out.push(response),
                None => return Err(ProviderError::BatchResultMissing { custom_id }),
            }
        }
        Ok(out)
    }
}

impl AnthropicProvider {
    /// Poll batch status until `processing_status` is terminal.
    async fn await_batch(&self, batch_id: &str) -> Result<(), ProviderError> {
        let mut delay = self.batch.poll_interval_ms;

        loop {
            tokio::time::sleep(Duration::from_millis(delay)).await;

            let response = self
                .get(&format!("/messages/batches/{batch_id}"))
                .send()
                .await?;
            let payload = check_http_response(response).await?;
            let parsed: Value =
                serde_json::from_str(&payload).map_err(|e| ProviderError::Parse(e.to_string()))?;

            let status = parsed
                .get("processing_status")
                .and_then(Value::as_str)
                .unwrap_or_default();

            debug!(batch_id = %batch_id, status, "batch poll");

            if status == "ended" {
                return Ok(());
            }

            delay = scale_delay(delay, self.batch.poll_backoff).min(self.batch.max_poll_interval_ms);
        }
    }

    /// Fetch the JSONL results stream and parse each member.
    async fn stream_results(
        &self,
        batch_id: &str,
    ) -> Result<std::collections::HashMap<String, ModelResponse>, ProviderError> {
        let response = self
            .get(&format!("/messages/batches/{batch_id}/results"))
            .send()
            .await?;
        let payload = check_http_response(response).await?;

        let mut results = std::collections::HashMap::new();

        for line in payload.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let item: Value = match serde_json::from_str(trimmed) {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "skipping malformed batch result line");
                    continue;
                }
            };

            let Some(custom_id) = item.get("custom_id").and_then(Value::as_str) else {
                continue;
            };

            let result_type = item
                .pointer("/result/type")
                .and_then(Value::as_str)
                .unwrap_or_default();

            match result_type {
                "succeeded" => {
                    let message = item.pointer("/result/message").ok_or_else(|| {
                        ProviderError::Parse("succeeded result missing message".to_owned())
                    })?;
                    results.insert(custom_id.to_owned(), parse_message(message)?);
                }
                other => {
                    let message = item
                        .pointer("/result/error")
                        .map(Value::to_string)
                        .unwrap_or_else(|| format!("result type {other:?}"));
                    return Err(ProviderError::BatchErrored {
                        custom_id: custom_id.to_owned(),
                        message,
                    });
                }
            }
        }

        Ok(results)
    }
}

/// Multiply a millisecond delay by the configured backoff factor.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
fn scale_delay(delay_ms: u64, factor: f64) -> u64 {
    (delay_ms as f64 * factor.max(1.0)) as u64
}

// ---------------------------------------------------------------------------
// Request serialization
// ---------------------------------------------------------------------------

/// Build the `params` object for a messages request.
fn request_params(request: &ModelRequest) -> Result<Value, ProviderError> {
    let messages: Vec<Value> = request
        .messages
        .iter()
        .map(serialize_message)
        .collect::<Result<_, _>>()?;

    let mut body = json!({
        "model": request.model,
        "max_tokens": request.max_tokens,
        "messages": messages,
    });

    if let Some(budget) = request.thinking_budget {
        body["thinking"] = json!({ "type": "enabled", "budget_tokens": budget });
    }

    if !request.system.is_empty() {
        let system: Vec<Value> = request.system.iter().map(serialize_system_block).collect();
        body["system"] = Value::Array(system);
    }

    if !request.tools.is_empty() {
        let tools: Vec<Value> = request
            .tools
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "input_schema": tool.input_schema,
                })
            })
            .collect();
        body["tools"] = Value::Array(tools);
    }

    Ok(body)
}

fn serialize_system_block(block: &SystemBlock) -> Value {
    let mut out = json!({ "type": "text", "text": block.text });
    if block.cache_control {
        out["cache_control"] = json!({ "type": "ephemeral" });
    }
    out
}

fn serialize_message(message: &Message) -> Result<Value, ProviderError> {
    let role = match message.role {
        Role::User => "user",
        Role::Assistant => "assistant",
    };
    let content = match &message.content {
        MessageContent::Text(text) => Value::String(text.clone()),
        MessageContent::Blocks(blocks) => {
            serde_json::to_value(blocks).map_err(|e| ProviderError::Parse(e.to_string()))?
        }
    };
    Ok(json!({ "role": role, "content": content }))
}

// ---------------------------------------------------------------------------
// Response parsing
// ---------------------------------------------------------------------------

/// Parse a messages API response body into the provider-neutral shape.
fn parse_message(value: &Value) -> Result<ModelResponse, ProviderError> {
    let Some(items) = value.get("content").and_then(Value::as_array) else {
        return Err(ProviderError::Parse("missing content array".to_owned()));
    };

    let mut content = Vec::with_capacity(items.len());
    for item in items {
        let item_type = item.get("type").and_then(Value::as_str).unwrap_or_default();
        match item_type {
            "text" => content.push(ContentBlock::Text {
                text: item
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
            }),
            "thinking" => content.push(ContentBlock::Thinking {
                thinking: item
                    .get("thinking")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
            }),
            "tool_use" => {
                let id = item
                    .get("id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ProviderError::Parse("tool_use missing id".to_owned()))?
                    .to_owned();
                let name = item
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ProviderError::Parse("tool_use missing name".to_owned()))?
                    .to_owned();
                let input = item.get("input").cloned().unwrap_or(Value::Null);
                content.push(ContentBlock::ToolUse { id, name, input });
            }
            other => {
                debug!(block_type = other, "ignoring unknown response block type");
            }
        }
    }

    Ok(ModelResponse {
        content,
        usage: parse_usage(value),
    })
}

fn parse_usage(value: &Value) -> TokenUsage {
    let get = |pointer: &str| value.pointer(pointer).and_then(Value::as_u64).unwrap_or(0);

    // `cache_creation` splits writes by TTL; older responses only carry the
    // flat `cache_creation_input_tokens` counter, treated as 5-minute writes.
    let mut write_5m = get("/usage/cache_creation/ephemeral_5m_input_tokens");
    let write_1h = get("/usage/cache_creation/ephemeral_1h_input_tokens");
    if write_5m == 0 && write_1h == 0 {
        write_5m = get("/usage/cache_creation_input_tokens");
    }

    TokenUsage {
        input_tokens: get("/usage/input_tokens"),
        output_tokens: get("/usage/output_tokens"),
        cache_write_5m_tokens: write_5m,
        cache_write_1h_tokens: write_1h,
        cache_read_tokens: get("/usage/cache_read_input_tokens"),
    }
}

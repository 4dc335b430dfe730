//! LLM client: phase-keyed model routing, retries, and usage recording.
//!
//! The client owns no conversation state. Callers assemble system blocks
//! (see [`prompts`]) and pass complete conversations; the client resolves
//! the model for the phase, attaches the cache-control marker to the last
//! system block, retries rate-limited calls with bounded exponential
//! backoff, and records usage into the cycle tracker on every success.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::Config;
use crate::providers::{
    BatchRequest, Message, ModelProvider, ModelRequest, ModelResponse, ProviderError, SystemBlock,
    ToolDefinition,
};
use crate::usage::{Phase, UsageTracker};

pub mod prompts;

/// Shared LLM client for all sessions and auxiliary calls.
pub struct LlmClient {
    provider: Arc<dyn ModelProvider>,
    config: Arc<Config>,
    usage: Arc<UsageTracker>,
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient").finish_non_exhaustive()
    }
}

impl LlmClient {
    /// Create a client over the given provider.
    pub fn new(provider: Arc<dyn ModelProvider>, config: Arc<Config>, usage: Arc<UsageTracker>) -> Self {
        Self {
            provider,
            config,
            usage,
        }
    }

    /// The model id serving the given phase.
    pub fn model_for(&self, phase: Phase) -> &str {
        let models = &self.config.models;
        match phase {
            Phase::Planner => &models.planner,
            Phase::Builder => &models.builder,
            Phase::Fixer => &models.fixer,
            Phase::Reflector => &models.reflector,
            Phase::Memory => &models.memory,
            Phase::Summarizer => &models.summarizer,
        }
    }

    fn max_tokens_for(&self, phase: Phase) -> u32 {
        match phase {
            Phase::Planner | Phase::Builder | Phase::Fixer | Phase::Reflector => {
                self.config.models.max_tokens
            }
            Phase::Memory | Phase::Summarizer => self.config.models.aux_max_tokens,
        }
    }

    fn thinking_for(&self, phase: Phase) -> Option<u32> {
        let budget = self.config.context.thinking_budget;
        match phase {
            Phase::Planner | Phase::Builder | Phase::Fixer if budget > 0 => Some(budget),
            _ => None,
        }
    }

    fn build_request(
        &self,
        phase: Phase,
        mut system: Vec<SystemBlock>,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
    ) -> ModelRequest {
        // Cache-control goes on the last system block so the provider caches
        // the whole prefix.
        if let Some(last) = system.last_mut() {
            last.cache_control = true;
        }
        ModelRequest {
            model: self.model_for(phase).to_owned(),
            max_tokens: self.max_tokens_for(phase),
            system,
            messages,
            tools,
            thinking_budget: self.thinking_for(phase),
        }
    }

    /// Single-request path with rate-limit retries.
    ///
    /// # Errors
    ///
    /// Returns the last [`ProviderError`] once retries are exhausted, or the
    /// first non-rate-limit error immediately.
    pub async fn call(
        &self,
        phase: Phase,
        system: Vec<SystemBlock>,
        messages: Vec<Message>,
        tools: Vec<ToolDefinition>,
    ) -> Result<ModelResponse, ProviderError> {
        let request = self.build_request(phase, system, messages, tools);
        let model = request.model.clone();

        let api = &self.config.api;
        let mut delay_ms = api.initial_retry_delay_ms;
        let mut attempt: u32 = 0;

        loop {
            match self.provider.complete(request.clone()).await {
                Ok(response) => {
                    self.usage.record(phase, &model, response.usage, false);
                    debug!(
                        phase = phase.as_str(),
                        model = %model,
                        input = response.usage.input_tokens,
                        output = response.usage.output_tokens,
                        "llm call complete"
                    );
                    return Ok(response);
                }
                Err(e) if e.is_rate_limited() && attempt < api.max_retries => {
                    attempt = attempt.saturating_add(1);
                    warn!(
                        phase = phase.as_str(),
                        attempt,
                        delay_ms,
                        "rate limited, backing off"
                    );
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    delay_ms = delay_ms.saturating_mul(2).min(api.max_retry_delay_ms);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Batched path: N independent requests as one provider batch.
    ///
    /// Results come back in submission order. Usage is recorded per result
    /// with the batch flag set.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] if submission, polling, or any single
    /// member fails.
    pub async fn call_batch(
        &self,
        phase: Phase,
        requests: Vec<(Vec<SystemBlock>, Vec<Message>, Vec<ToolDefinition>)>,
    ) -> Result<Vec<ModelResponse>, ProviderError> {
        let model = self.model_for(phase).to_owned();
        let batch: Vec<BatchRequest> = requests
            .into_iter()
            .enumerate()
            .map(|(idx, (system, messages, tools))| BatchRequest {
                custom_id: format!("req-{idx}"),
                request: self.build_request(phase, system, messages, tools),
            })
            .collect();

        let count = batch.len();
        debug!(phase = phase.as_str(), count, "submitting batch");

        let responses = self.provider.complete_batch(batch).await?;
        for response in &responses {
            self.usage.record(phase, &model, response.usage, true);
        }
        Ok(responses)
    }
}

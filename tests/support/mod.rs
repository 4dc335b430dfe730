//! Shared fixtures: scripted provider, VCS, and host doubles.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use seedgpt::config::Config;
use seedgpt::host::{CheckRun, CodeHost, HostError, PullRequest};
use seedgpt::llm::LlmClient;
use seedgpt::memory::MemoryStore;
use seedgpt::providers::{
    BatchRequest, ContentBlock, ModelProvider, ModelRequest, ModelResponse, ProviderError,
    TokenUsage,
};
use seedgpt::store::Store;
use seedgpt::usage::UsageTracker;
use seedgpt::vcs::{Vcs, VcsError};

// ---------------------------------------------------------------------------
// Scripted model provider
// ---------------------------------------------------------------------------

/// Provider double that replays scripted responses in order.
#[derive(Default)]
pub struct MockProvider {
    responses: Mutex<VecDeque<ModelResponse>>,
    batches: Mutex<VecDeque<Result<Vec<ModelResponse>, String>>>,
    pub requests: Mutex<Vec<ModelRequest>>,
    pub batch_requests: Mutex<Vec<Vec<BatchRequest>>>,
}

impl MockProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_response(&self, response: ModelResponse) {
        self.responses
            .lock()
            .expect("responses lock")
            .push_back(response);
    }

    pub fn push_batch(&self, batch: Result<Vec<ModelResponse>, String>) {
        self.batches.lock().expect("batches lock").push_back(batch);
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().expect("requests lock").len()
    }

    pub fn batch_call_count(&self) -> usize {
        self.batch_requests.lock().expect("batch requests lock").len()
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ProviderError> {
        self.requests.lock().expect("requests lock").push(request);
        self.responses
            .lock()
            .expect("responses lock")
            .pop_front()
            .ok_or_else(|| ProviderError::Parse("mock: no scripted response left".to_owned()))
    }

    async fn complete_batch(
        &self,
        requests: Vec<BatchRequest>,
    ) -> Result<Vec<ModelResponse>, ProviderError> {
        self.batch_requests
            .lock()
            .expect("batch requests lock")
            .push(requests);
        match self.batches.lock().expect("batches lock").pop_front() {
            Some(Ok(responses)) => Ok(responses),
            Some(Err(message)) => Err(ProviderError::Parse(message)),
            None => Err(ProviderError::Parse(
                "mock: no scripted batch left".to_owned(),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Response builders
// ---------------------------------------------------------------------------

pub fn text_response(text: &str) -> ModelResponse {
    ModelResponse {
        content: vec![ContentBlock::Text {
            text: text.to_owned(),
        }],
        usage: TokenUsage::default(),
    }
}

pub fn blocks_response(content: Vec<ContentBlock>) -> ModelResponse {
    ModelResponse {
        content,
        usage: TokenUsage::default(),
    }
}

pub fn tool_use(id: &str, name: &str, input: serde_json::Value) -> ContentBlock {
    ContentBlock::ToolUse {
        id: id.to_owned(),
        name: name.to_owned(),
        input,
    }
}

pub fn tool_result(id: &str, content: &str) -> ContentBlock {
    ContentBlock::ToolResult {
        tool_use_id: id.to_owned(),
        content: content.to_owned(),
        is_error: false,
    }
}

// ---------------------------------------------------------------------------
// Store / memory fixtures
// ---------------------------------------------------------------------------

pub async fn memory_store() -> Store {
    let opts = SqliteConnectOptions::new()
        .filename(Path::new(":memory:"))
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(opts)
        .await
        .expect("pool should connect");
    Store::new(pool).await.expect("schema should apply")
}

pub fn make_llm(
    provider: Arc<MockProvider>,
    config: Arc<Config>,
) -> (Arc<LlmClient>, Arc<UsageTracker>) {
    let usage = Arc::new(UsageTracker::new());
    let llm = Arc::new(LlmClient::new(provider, config, Arc::clone(&usage)));
    (llm, usage)
}

pub async fn make_memory(
    provider: Arc<MockProvider>,
    config: Arc<Config>,
) -> (Store, Arc<MemoryStore>) {
    let store = memory_store().await;
    let (llm, _) = make_llm(provider, Arc::clone(&config));
    let memory = Arc::new(MemoryStore::new(
        store.clone(),
        llm,
        config.memory.clone(),
    ));
    (store, memory)
}

// ---------------------------------------------------------------------------
// Scripted VCS
// ---------------------------------------------------------------------------

/// VCS double recording commits and pushes.
#[derive(Debug, Default)]
pub struct MockVcs {
    pub commits: Mutex<Vec<String>>,
    pub pushes: Mutex<Vec<(String, bool)>>,
    pub branches: Mutex<Vec<String>>,
}

impl MockVcs {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_count(&self) -> usize {
        self.pushes.lock().expect("pushes lock").len()
    }

    pub fn commit_count(&self) -> usize {
        self.commits.lock().expect("commits lock").len()
    }
}

#[async_trait]
impl Vcs for MockVcs {
    async fn clone_repo(&self, _url: &str, _dest: &Path) -> Result<(), VcsError> {
        Ok(())
    }

    async fn checkout_branch(&self, name: &str) -> Result<(), VcsError> {
        self.branches
            .lock()
            .expect("branches lock")
            .push(name.to_owned());
        Ok(())
    }

    async fn checkout_main(&self) -> Result<(), VcsError> {
        Ok(())
    }

    async fn add_all(&self) -> Result<(), VcsError> {
        Ok(())
    }

    async fn commit(&self, message: &str) -> Result<(), VcsError> {
        self.commits
            .lock()
            .expect("commits lock")
            .push(message.to_owned());
        Ok(())
    }

    async fn push(&self, branch: &str, force: bool) -> Result<(), VcsError> {
        self.pushes
            .lock()
            .expect("pushes lock")
            .push((branch.to_owned(), force));
        Ok(())
    }

    async fn head_sha(&self) -> Result<String, VcsError> {
        Ok("headsha".to_owned())
    }

    async fn recent_log(&self, _count: usize) -> Result<String, VcsError> {
        Ok("abc1234 previous change".to_owned())
    }

    async fn diff_against_main(&self) -> Result<String, VcsError> {
        Ok(String::new())
    }
}

// ---------------------------------------------------------------------------
// Scripted code host
// ---------------------------------------------------------------------------

/// Host double with a scripted sequence of check states.
#[derive(Default)]
pub struct MockHost {
    pub open_pulls: Mutex<Vec<PullRequest>>,
    pub checks_script: Mutex<VecDeque<Vec<CheckRun>>>,
    pub created: Mutex<Vec<PullRequest>>,
    pub merged: Mutex<Vec<u64>>,
    pub closed: Mutex<Vec<u64>>,
    pub deleted_branches: Mutex<Vec<String>>,
    next_number: Mutex<u64>,
}

impl MockHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_number: Mutex::new(1),
            ..Self::default()
        })
    }

    pub fn script_checks(&self, states: Vec<Vec<CheckRun>>) {
        let mut script = self.checks_script.lock().expect("checks lock");
        script.extend(states);
    }
}

#[async_trait]
impl CodeHost for MockHost {
    async fn create_pull(
        &self,
        head: &str,
        _base: &str,
        title: &str,
        _body: &str,
    ) -> Result<PullRequest, HostError> {
        let mut next = self.next_number.lock().expect("number lock");
        let pull = PullRequest {
            number: *next,
            head_ref: head.to_owned(),
            title: title.to_owned(),
        };
        *next = next.saturating_add(1);
        self.created.lock().expect("created lock").push(pull.clone());
        Ok(pull)
    }

    async fn merge_pull(&self, number: u64) -> Result<(), HostError> {
        self.merged.lock().expect("merged lock").push(number);
        Ok(())
    }

    async fn close_pull(&self, number: u64) -> Result<(), HostError> {
        self.closed.lock().expect("closed lock").push(number);
        Ok(())
    }

    async fn list_open_pulls(&self) -> Result<Vec<PullRequest>, HostError> {
        Ok(self.open_pulls.lock().expect("open lock").clone())
    }

    async fn delete_branch(&self, branch: &str) -> Result<(), HostError> {
        self.deleted_branches
            .lock()
            .expect("deleted lock")
            .push(branch.to_owned());
        Ok(())
    }

    async fn list_checks(&self, _sha: &str) -> Result<Vec<CheckRun>, HostError> {
        let mut script = self.checks_script.lock().expect("checks lock");
        if script.len() > 1 {
            Ok(script.pop_front().unwrap_or_default())
        } else {
            // Keep replaying the final state so pollers settle.
            Ok(script.front().cloned().unwrap_or_default())
        }
    }

    async fn failure_logs(&self, _sha: &str, _max_chars: usize) -> Result<String, HostError> {
        Ok("=== test ===\nassertion failed: expected 2, got 3".to_owned())
    }
}

// ---------------------------------------------------------------------------
// Check builders
// ---------------------------------------------------------------------------

pub fn completed_check(name: &str, conclusion: &str) -> CheckRun {
    CheckRun {
        name: name.to_owned(),
        status: seedgpt::host::CheckStatus::Completed,
        conclusion: Some(conclusion.to_owned()),
    }
}

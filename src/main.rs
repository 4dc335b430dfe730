#![allow(missing_docs)]

//! SeedGPT binary: one `run` subcommand driving one improvement cycle.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use seedgpt::agent::session::AgentSessions;
use seedgpt::config::{Config, Environment};
use seedgpt::context::compression::Compressor;
use seedgpt::context::working::WorkingContext;
use seedgpt::cycle::IterationController;
use seedgpt::host::{CodeHost, GitHubHost};
use seedgpt::llm::LlmClient;
use seedgpt::memory::MemoryStore;
use seedgpt::providers::anthropic::AnthropicProvider;
use seedgpt::store::Store;
use seedgpt::tools::dispatcher::ToolDispatcher;
use seedgpt::tools::workspace::Workspace;
use seedgpt::usage::UsageTracker;
use seedgpt::vcs::{GitCli, Vcs};

/// Database file used by the persistent store.
const STORE_PATH: &str = "seedgpt.db";

/// Directory for production log files.
const LOGS_DIR: &str = "logs";

#[derive(Debug, Parser)]
#[command(name = "seedgpt", about = "Self-modifying autonomous coding agent")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one improvement cycle: plan, build, push, await CI, merge or
    /// abandon, reflect.
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Run => run().await,
    }
}

async fn run() -> Result<()> {
    let env = Environment::from_env()?;

    // Production mode adds the rotating JSON file layer; either way the
    // guard must outlive the cycle.
    let _logging_guard = if env.env_name == "production" {
        Some(seedgpt::logging::init_production(Path::new(LOGS_DIR))?)
    } else {
        seedgpt::logging::init_cli();
        None
    };

    let config = Arc::new(Config::load()?);
    info!(workspace = %env.workspace_path.display(), "seedgpt starting");

    ensure_workspace(&env).await?;

    let usage = Arc::new(UsageTracker::new());
    let provider = Arc::new(AnthropicProvider::new(
        env.anthropic_api_key.clone(),
        config.batch.clone(),
    ));
    let llm = Arc::new(LlmClient::new(provider, Arc::clone(&config), Arc::clone(&usage)));

    let store = Store::connect(Path::new(STORE_PATH))
        .await
        .context("failed to connect persistent store")?;
    let memory = Arc::new(MemoryStore::new(
        store.clone(),
        Arc::clone(&llm),
        config.memory.clone(),
    ));

    let workspace = Workspace::new(env.workspace_path.clone());
    let vcs: Arc<dyn Vcs> = Arc::new(GitCli::new(env.workspace_path.clone()));
    let host: Arc<dyn CodeHost> = Arc::new(GitHubHost::new(
        env.github_token.clone(),
        env.github_owner.clone(),
        env.github_repo.clone(),
    ));

    let dispatcher = ToolDispatcher::new(
        workspace.clone(),
        Arc::clone(&memory),
        Arc::clone(&vcs),
        config.tools.default_read_window,
    );
    let compressor = Compressor::new(Arc::clone(&llm), config.summarization.clone());
    let working = WorkingContext::new(
        workspace.clone(),
        config.context.clone(),
        config.tools.default_read_window,
    );

    let sessions = AgentSessions::new(
        Arc::clone(&llm),
        dispatcher,
        compressor,
        working,
        workspace,
        Arc::clone(&memory),
        Arc::clone(&vcs),
        Arc::clone(&config),
    );

    let controller = IterationController::new(
        sessions,
        llm,
        memory,
        usage,
        store,
        vcs,
        host,
        config,
    );

    let outcome = controller
        .run()
        .await
        .context("iteration cycle failed")?;
    info!(outcome = %outcome.describe(), "seedgpt finished");
    Ok(())
}

/// Clone the repository if the workspace is not a checkout yet.
async fn ensure_workspace(env: &Environment) -> Result<()> {
    if env.workspace_path.join(".git").is_dir() {
        return Ok(());
    }

    let parent = env
        .workspace_path
        .parent()
        .context("workspace path has no parent directory")?;
    std::fs::create_dir_all(parent).context("failed to create workspace parent")?;

    let url = format!(
        "https://x-access-token:{}@github.com/{}/{}.git",
        env.github_token, env.github_owner, env.github_repo
    );
    info!(dest = %env.workspace_path.display(), "cloning repository into workspace");

    let cloner = GitCli::new(parent.to_path_buf());
    cloner
        .clone_repo(&url, &env.workspace_path)
        .await
        .context("failed to clone repository")?;
    Ok(())
}

//! Static configuration and environment wiring.
//!
//! All tunables live in [`Config`], loaded from an optional `seedgpt.toml`
//! in the working directory; every field has a default so a missing file is
//! not an error. Secrets and repository coordinates come exclusively from
//! the environment ([`Environment::from_env`]) — no other environment
//! variables influence behavior.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Complete static configuration with defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Session turn budgets.
    pub turns: TurnsConfig,
    /// Conversation compression engine settings.
    pub summarization: SummarizationConfig,
    /// Working context engine settings.
    pub context: ContextConfig,
    /// Tool dispatcher settings.
    pub tools: ToolsConfig,
    /// LLM API retry settings.
    pub api: ApiConfig,
    /// Batch polling settings.
    pub batch: BatchConfig,
    /// CI polling settings.
    pub ci: CiConfig,
    /// Memory retrieval settings.
    pub memory: MemoryConfig,
    /// Coverage report settings.
    pub coverage: CoverageConfig,
    /// Error truncation limits.
    pub errors: ErrorsConfig,
    /// Per-phase model selection.
    pub models: ModelsConfig,
}

impl Config {
    /// Load configuration from `seedgpt.toml` if present, else defaults.
    ///
    /// # Errors
    ///
    /// Returns an error only if the file exists but cannot be parsed.
    pub fn load() -> Result<Self> {
        match std::fs::read_to_string("seedgpt.toml") {
            Ok(contents) => {
                tracing::info!("loading config from seedgpt.toml");
                Self::from_toml(&contents)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!("failed to read config file: {e}")),
        }
    }

    /// Parse a TOML string into config.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML does not match the schema.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(toml_str).context("failed to parse config TOML")?;
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Turn budgets for each session kind.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TurnsConfig {
    /// Maximum planner turns per cycle.
    pub max_planner: u32,
    /// Maximum builder turns per cycle.
    pub max_builder: u32,
    /// Maximum fixer attempts per cycle.
    pub max_fixer: u32,
}

impl Default for TurnsConfig {
    fn default() -> Self {
        Self {
            max_planner: 25,
            max_builder: 40,
            max_fixer: 3,
        }
    }
}

/// Compression engine settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SummarizationConfig {
    /// Conversation character count that triggers compression.
    pub char_threshold: usize,
    /// Minimum tool_result length to become a summarization candidate.
    pub min_result_chars: usize,
    /// Trailing user/assistant messages exempt from compression.
    pub protected_turns: usize,
    /// Literal string inserted where lines were dropped.
    pub gap_marker: String,
}

impl Default for SummarizationConfig {
    fn default() -> Self {
        Self {
            char_threshold: 120_000,
            min_result_chars: 1_000,
            protected_turns: 2,
            gap_marker: "[...]".to_owned(),
        }
    }
}

/// Working context engine settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Trailing messages (per role) exempt from stripping.
    pub protected_turns: usize,
    /// Minimum tool_result length eligible for result stubbing.
    pub min_result_chars: usize,
    /// Total line budget across all tracked regions.
    pub max_active_lines: usize,
    /// Extra lines tracked above and below each read range.
    pub context_padding: usize,
    /// Extended-thinking token budget for planner/builder/fixer calls.
    pub thinking_budget: u32,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            protected_turns: 1,
            min_result_chars: 1_000,
            max_active_lines: 300,
            context_padding: 3,
            thinking_budget: 4_096,
        }
    }
}

/// Tool dispatcher settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Lines returned by read_file when no end line is given.
    pub default_read_window: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            default_read_window: 100,
        }
    }
}

/// LLM API retry settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Maximum retries on rate-limit responses.
    pub max_retries: u32,
    /// Initial retry delay in milliseconds.
    pub initial_retry_delay_ms: u64,
    /// Maximum retry delay in milliseconds.
    pub max_retry_delay_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_retry_delay_ms: 1_000,
            max_retry_delay_ms: 30_000,
        }
    }
}

/// Batch polling settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Initial poll interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Poll interval ceiling in milliseconds.
    pub max_poll_interval_ms: u64,
    /// Multiplier applied to the interval after each poll.
    pub poll_backoff: f64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            max_poll_interval_ms: 60_000,
            poll_backoff: 1.5,
        }
    }
}

/// CI polling settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CiConfig {
    /// Fixed poll interval in seconds.
    pub poll_interval_secs: u64,
    /// Hard deadline for all checks to complete, in seconds.
    pub timeout_secs: u64,
    /// How long to wait for any check to appear before treating the commit
    /// as unchecked (passed), in seconds.
    pub no_checks_timeout_secs: u64,
}

impl Default for CiConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            timeout_secs: 1_800,
            no_checks_timeout_secs: 180,
        }
    }
}

/// Memory retrieval settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Token budget for the memory context section.
    pub token_budget: usize,
    /// Newest reflections rendered in full.
    pub full_reflections: usize,
    /// Additional reflections rendered as summaries.
    pub summarized_reflections: usize,
    /// Characters-per-token ratio used for budget estimation.
    pub estimation_ratio: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            token_budget: 2_000,
            full_reflections: 5,
            summarized_reflections: 20,
            estimation_ratio: 4,
        }
    }
}

/// Coverage report settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CoverageConfig {
    /// Number of lowest-covered files listed for the planner.
    pub max_low_coverage_files: usize,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            max_low_coverage_files: 10,
        }
    }
}

/// Error truncation limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ErrorsConfig {
    /// Maximum characters of CI error text handed to the fixer.
    pub max_loop_error_chars: usize,
    /// Maximum characters of a single check's log output.
    pub max_check_output_chars: usize,
}

impl Default for ErrorsConfig {
    fn default() -> Self {
        Self {
            max_loop_error_chars: 20_000,
            max_check_output_chars: 10_000,
        }
    }
}

/// Per-phase model selection and token limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    /// Planner model id.
    pub planner: String,
    /// Builder model id.
    pub builder: String,
    /// Fixer model id.
    pub fixer: String,
    /// Reflector model id.
    pub reflector: String,
    /// Memory summarizer model id.
    pub memory: String,
    /// Conversation summarizer model id.
    pub summarizer: String,
    /// Response token ceiling for planner/builder/fixer calls.
    pub max_tokens: u32,
    /// Response token ceiling for auxiliary calls (memory, summarizer).
    pub aux_max_tokens: u32,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            planner: "claude-sonnet-4-20250514".to_owned(),
            builder: "claude-sonnet-4-20250514".to_owned(),
            fixer: "claude-sonnet-4-20250514".to_owned(),
            reflector: "claude-sonnet-4-20250514".to_owned(),
            memory: "claude-3-5-haiku-20241022".to_owned(),
            summarizer: "claude-3-5-haiku-20241022".to_owned(),
            max_tokens: 8_192,
            aux_max_tokens: 1_024,
        }
    }
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

/// Process environment: secrets and repository coordinates.
#[derive(Debug, Clone)]
pub struct Environment {
    /// Anthropic API key.
    pub anthropic_api_key: String,
    /// GitHub token with repo scope.
    pub github_token: String,
    /// Repository owner (user or organisation).
    pub github_owner: String,
    /// Repository name.
    pub github_repo: String,
    /// Local workspace checkout path.
    pub workspace_path: PathBuf,
    /// Deployment environment name (`production` enables file logging).
    pub env_name: String,
}

impl Environment {
    /// Read all required variables from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first missing required variable.
    pub fn from_env() -> Result<Self> {
        let require = |key: &str| {
            std::env::var(key).map_err(|_| anyhow::anyhow!("missing required env var {key}"))
        };

        Ok(Self {
            anthropic_api_key: require("ANTHROPIC_API_KEY")?,
            github_token: require("GITHUB_TOKEN")?,
            github_owner: require("GITHUB_OWNER")?,
            github_repo: require("GITHUB_REPO")?,
            workspace_path: PathBuf::from(require("WORKSPACE_PATH")?),
            env_name: std::env::var("SEEDGPT_ENV").unwrap_or_else(|_| "development".to_owned()),
        })
    }
}

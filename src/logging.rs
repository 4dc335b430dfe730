//! Structured logging setup and the process-wide cycle log buffer.
//!
//! Logging uses `tracing-subscriber` with two modes:
//! - **Production** ([`init_production`]): JSON file layer (daily rotation)
//!   plus a console layer
//! - **CLI** ([`init_cli`]): console-only
//!
//! The cycle log buffer is module-level state with the lifecycle
//! `init at process start; drained at cycle end`. Controller-level events
//! are mirrored into it so the Reflector can embed "what happened this
//! cycle" into its transcript without the buffer being threaded through
//! every component signature.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Subscriber setup
// ---------------------------------------------------------------------------

/// Holds the non-blocking writer guard for file logging.
///
/// The [`WorkerGuard`] must be kept alive for the duration of the process.
/// Dropping it flushes pending log entries and closes the file.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

/// Initialise production logging.
///
/// Writes JSON logs to `{logs_dir}/seedgpt.log.YYYY-MM-DD` with daily
/// rotation and emits human-readable output to stderr. The level is
/// controlled by the `LOG_LEVEL` environment variable (default: `info`).
///
/// # Errors
///
/// Returns an error if the logs directory cannot be created.
pub fn init_production(logs_dir: &Path) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(logs_dir).map_err(|e| {
        anyhow::anyhow!(
            "failed to create logs directory {}: {e}",
            logs_dir.display()
        )
    })?;

    let file_appender = tracing_appender::rolling::daily(logs_dir, "seedgpt.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking);

    let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(json_layer)
        .with(console_layer)
        .init();

    Ok(LoggingGuard { _guard: guard })
}

/// Initialise console-only logging. Level from `LOG_LEVEL` (default `info`).
pub fn init_cli() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .init();
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new("info"))
}

// ---------------------------------------------------------------------------
// Cycle log buffer
// ---------------------------------------------------------------------------

/// Severity of a buffered cycle log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleLogLevel {
    /// Informational progress event.
    Info,
    /// Recoverable problem.
    Warn,
    /// Failure that changed the cycle outcome.
    Error,
}

impl CycleLogLevel {
    /// Label used in transcripts and persisted records.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// One buffered entry of the current cycle's narrative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleLogEntry {
    /// When the event happened.
    pub timestamp: DateTime<Utc>,
    /// Entry severity.
    pub level: CycleLogLevel,
    /// Human-readable message.
    pub message: String,
    /// Optional structured context.
    pub context: Option<serde_json::Value>,
}

static CYCLE_LOG: Mutex<Vec<CycleLogEntry>> = Mutex::new(Vec::new());

/// Append an entry to the cycle log buffer and mirror it to `tracing`.
pub fn cycle_log(level: CycleLogLevel, message: impl Into<String>, context: Option<serde_json::Value>) {
    let message = message.into();
    match level {
        CycleLogLevel::Info => tracing::info!(%message, "cycle event"),
        CycleLogLevel::Warn => tracing::warn!(%message, "cycle event"),
        CycleLogLevel::Error => tracing::error!(%message, "cycle event"),
    }

    if let Ok(mut buffer) = CYCLE_LOG.lock() {
        buffer.push(CycleLogEntry {
            timestamp: Utc::now(),
            level,
            message,
            context,
        });
    }
}

/// Drain and return the buffered entries, resetting the buffer.
pub fn drain_cycle_log() -> Vec<CycleLogEntry> {
    CYCLE_LOG
        .lock()
        .map(|mut buffer| std::mem::take(&mut *buffer))
        .unwrap_or_default()
}

/// Render the buffered entries as transcript lines without draining.
pub fn render_cycle_log() -> String {
    CYCLE_LOG
        .lock()
        .map(|buffer| {
            buffer
                .iter()
                .map(|entry| {
                    format!(
                        "[{}] {}: {}",
                        entry.timestamp.format("%H:%M:%S"),
                        entry.level.as_str(),
                        entry.message
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}

//! Version control operations, expressed as a trait plus a `git` CLI
//! adapter.
//!
//! The iteration controller only ever talks to [`Vcs`]; tests substitute a
//! scripted implementation. The CLI adapter shells out to `git` in the
//! workspace directory and maps non-zero exits to typed errors.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

/// Transient push failures are retried this many times.
const PUSH_RETRIES: u32 = 2;

/// Delay between push retries.
const PUSH_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Errors from VCS operations.
#[derive(Debug, thiserror::Error)]
pub enum VcsError {
    /// The git binary could not be spawned.
    #[error("failed to run git: {0}")]
    Spawn(#[from] std::io::Error),

    /// git exited non-zero.
    #[error("git {command} failed: {stderr}")]
    Command {
        /// The subcommand that failed.
        command: String,
        /// Captured stderr, trimmed.
        stderr: String,
    },
}

/// Version control interface used by the iteration controller.
#[async_trait]
pub trait Vcs: Send + Sync {
    /// Clone a repository into the destination directory.
    async fn clone_repo(&self, url: &str, dest: &Path) -> Result<(), VcsError>;

    /// Create and switch to a local branch.
    async fn checkout_branch(&self, name: &str) -> Result<(), VcsError>;

    /// Switch back to the main branch, discarding the working tree state.
    async fn checkout_main(&self) -> Result<(), VcsError>;

    /// Stage all changes.
    async fn add_all(&self) -> Result<(), VcsError>;

    /// Commit staged changes.
    async fn commit(&self, message: &str) -> Result<(), VcsError>;

    /// Push a branch to the origin remote; `force` overwrites the remote ref.
    async fn push(&self, branch: &str, force: bool) -> Result<(), VcsError>;

    /// The current HEAD commit sha.
    async fn head_sha(&self) -> Result<String, VcsError>;

    /// One-line log of the most recent commits on the current branch.
    async fn recent_log(&self, count: usize) -> Result<String, VcsError>;

    /// Stat + patch diff of the working tree against main.
    async fn diff_against_main(&self) -> Result<String, VcsError>;
}

/// `git` CLI adapter operating in a fixed working directory.
#[derive(Debug, Clone)]
pub struct GitCli {
    workdir: PathBuf,
}

impl GitCli {
    /// Create an adapter rooted at the given checkout.
    pub fn new(workdir: PathBuf) -> Self {
        Self { workdir }
    }

    async fn git(&self, args: &[&str]) -> Result<String, VcsError> {
        debug!(?args, "git");
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .await?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(VcsError::Command {
                command: args.first().copied().unwrap_or_default().to_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            })
        }
    }
}

#[async_trait]
impl Vcs for GitCli {
    async fn clone_repo(&self, url: &str, dest: &Path) -> Result<(), VcsError> {
        let dest = dest.to_string_lossy().into_owned();
        self.git(&["clone", url, &dest]).await.map(|_| ())
    }

    async fn checkout_branch(&self, name: &str) -> Result<(), VcsError> {
        self.git(&["checkout", "-b", name]).await.map(|_| ())
    }

    async fn checkout_main(&self) -> Result<(), VcsError> {
        self.git(&["checkout", "-f", "main"]).await?;
        self.git(&["clean", "-fd"]).await.map(|_| ())
    }

    async fn add_all(&self) -> Result<(), VcsError> {
        self.git(&["add", "."]).await.map(|_| ())
    }

    async fn commit(&self, message: &str) -> Result<(), VcsError> {
        self.git(&["commit", "-m", message]).await.map(|_| ())
    }

    async fn push(&self, branch: &str, force: bool) -> Result<(), VcsError> {
        let mut attempt: u32 = 0;
        loop {
            let result = if force {
                self.git(&["push", "--force", "origin", branch]).await
            } else {
                self.git(&["push", "-u", "origin", branch]).await
            };

            match result {
                Ok(_) => return Ok(()),
                Err(e) if attempt < PUSH_RETRIES => {
                    attempt = attempt.saturating_add(1);
                    warn!(error = %e, attempt, "push failed, retrying");
                    tokio::time::sleep(PUSH_RETRY_DELAY).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn head_sha(&self) -> Result<String, VcsError> {
        self.git(&["rev-parse", "HEAD"])
            .await
            .map(|out| out.trim().to_owned())
    }

    async fn recent_log(&self, count: usize) -> Result<String, VcsError> {
        let count_arg = format!("-{count}");
        self.git(&["log", "--oneline", &count_arg]).await
    }

    async fn diff_against_main(&self) -> Result<String, VcsError> {
        self.git(&["diff", "--stat", "-p", "main"]).await
    }
}

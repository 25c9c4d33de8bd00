//! Shallow cloning of GitHub repositories.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use repograde_core::{ClonedRepo, GradeError, RepoRef};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::DEFAULT_CLONE_TIMEOUT;

/// Something that can put a repository on disk.
#[async_trait]
pub trait RepoCloner: Send + Sync {
    /// Clone `repo` into `work_dir/<owner>-<repo>`.
    async fn clone_repo(&self, repo: &RepoRef, work_dir: &Path) -> Result<ClonedRepo, GradeError>;
}

/// Parse `url` and clone it. Invalid URLs fail before anything runs.
pub async fn clone_url(
    cloner: &dyn RepoCloner,
    url: &str,
    work_dir: &Path,
) -> Result<ClonedRepo, GradeError> {
    let repo = RepoRef::parse(url)?;
    cloner.clone_repo(&repo, work_dir).await
}

/// Clones with the `git` CLI, depth 1.
#[derive(Debug, Clone)]
pub struct GitCloner {
    program: String,
    timeout: Duration,
}

impl Default for GitCloner {
    fn default() -> Self {
        Self::new()
    }
}

impl GitCloner {
    pub fn new() -> Self {
        Self {
            program: "git".to_string(),
            timeout: DEFAULT_CLONE_TIMEOUT,
        }
    }

    /// Use a different git binary.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn build_command(&self, clone_url: &str, target: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("clone")
            .arg("--depth")
            .arg("1")
            .arg(clone_url)
            .arg(target)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl RepoCloner for GitCloner {
    async fn clone_repo(&self, repo: &RepoRef, work_dir: &Path) -> Result<ClonedRepo, GradeError> {
        let clone_error = |message: String| GradeError::Clone {
            url: repo.url.clone(),
            message,
        };

        tokio::fs::create_dir_all(work_dir)
            .await
            .map_err(|e| clone_error(format!("Failed to create work directory: {}", e)))?;

        let target = work_dir.join(repo.dir_name());
        if tokio::fs::metadata(&target).await.is_ok() {
            warn!(path = %target.display(), "Removing stale clone directory");
            tokio::fs::remove_dir_all(&target)
                .await
                .map_err(|e| clone_error(format!("Failed to clear {}: {}", target.display(), e)))?;
        }

        let clone_url = repo.clone_url();
        info!(repo = %repo.key(), url = %clone_url, "Cloning repository");

        let output = match tokio::time::timeout(
            self.timeout,
            self.build_command(&clone_url, &target).output(),
        )
        .await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(clone_error(format!("Failed to run {}: {}", self.program, e))),
            Err(_) => {
                warn!(repo = %repo.key(), timeout_secs = self.timeout.as_secs(), "Clone timed out");
                // A partial checkout is useless.
                let _ = tokio::fs::remove_dir_all(&target).await;
                return Err(clone_error(format!(
                    "Clone timed out after {} seconds",
                    self.timeout.as_secs()
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("git clone exited with {}", output.status)
            } else {
                stderr
            };
            debug!(repo = %repo.key(), error = %message, "Clone failed");
            return Err(clone_error(message));
        }

        info!(repo = %repo.key(), path = %target.display(), "Clone complete");
        Ok(ClonedRepo::new(repo.clone(), target))
    }
}

//! Version-control commit after a dataset changes
//!
//! Commits are a side effect: a failing hook is logged and reported but never
//! changes parcel state.

use crate::error::{EngineError, Result};
use crate::runner::{CommandRunner, ExternalCommand, Invocation};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Prefix on every commit message
pub const COMMIT_PREFIX: &str = "[parcel]";

const GIT_TIMEOUT: Duration = Duration::from_secs(120);

#[async_trait]
pub trait CommitHook: Send + Sync {
    /// Record changes to `paths` (relative to `dataset`)
    ///
    /// Returns whether a commit was made.
    async fn commit(&self, dataset: &Path, message: &str, paths: &[&str]) -> Result<bool>;
}

/// Hook for datasets without `git = true`
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCommit;

#[async_trait]
impl CommitHook for NoCommit {
    async fn commit(&self, _dataset: &Path, _message: &str, _paths: &[&str]) -> Result<bool> {
        Ok(false)
    }
}

/// Commits through the `git` executable
#[derive(Debug, Clone, Default)]
pub struct GitCommitHook {
    runner: CommandRunner,
    env: Vec<(String, String)>,
}

impl GitCommitHook {
    pub fn new(runner: CommandRunner) -> Self {
        Self {
            runner,
            env: Vec::new(),
        }
    }

    /// Extra environment for every git call, e.g. author identity
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    async fn git<I, S>(&self, dataset: &Path, args: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut argv = vec!["git".to_string()];
        argv.extend(args.into_iter().map(Into::into));
        let mut invocation = Invocation::new()
            .working_dir(dataset)
            .timeout(GIT_TIMEOUT);
        invocation.env.extend(self.env.iter().cloned());
        self.runner
            .run(&ExternalCommand::Argv(argv), &invocation)
            .await
            .map(|_| ())
    }

    /// `git init` unless the directory already has a repository
    pub async fn init_repository(&self, dataset: &Path) -> Result<bool> {
        if dataset.join(".git").exists() {
            return Ok(false);
        }
        self.git(dataset, ["init", "--quiet"]).await?;
        info!(dataset = %dataset.display(), "Initialized git repository");
        Ok(true)
    }
}

#[async_trait]
impl CommitHook for GitCommitHook {
    async fn commit(&self, dataset: &Path, message: &str, paths: &[&str]) -> Result<bool> {
        // git rejects pathspecs that match nothing, e.g. a ledger not yet written
        let paths: Vec<&str> = paths
            .iter()
            .copied()
            .filter(|p| dataset.join(p).exists())
            .collect();
        if paths.is_empty() {
            return Ok(false);
        }

        let mut add = vec!["add", "-A", "--"];
        add.extend_from_slice(&paths);
        self.git(dataset, add).await?;

        let mut diff = vec!["diff", "--cached", "--quiet", "--"];
        diff.extend_from_slice(&paths);
        match self.git(dataset, diff).await {
            Ok(()) => {
                debug!(dataset = %dataset.display(), "Nothing to commit");
                return Ok(false);
            },
            // Exit status 1 means staged changes exist.
            Err(EngineError::Command {
                exit_code: Some(1), ..
            }) => {},
            Err(e) => return Err(e),
        }

        let full_message = format!("{} {}", COMMIT_PREFIX, message);
        self.git(dataset, ["commit", "--quiet", "-m", full_message.as_str()])
            .await?;

        info!(dataset = %dataset.display(), message = %full_message, "Committed dataset changes");
        Ok(true)
    }
}

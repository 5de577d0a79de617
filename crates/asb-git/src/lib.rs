// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! asb-git
//!
//! Git collaborator used by the hub to sync the working tree. Side-effects
//! only: the dispatcher never calls into this crate, the scheduler pulls at
//! tick start and workers commit/push after archiving outcomes.
//!
//! A hub directory without a `.git` is legal (tests, fresh checkouts);
//! every operation then reports [`SyncOutcome::Skipped`].

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Push conflicts are retried (rebase then push) at most this many times.
const MAX_PUSH_RETRIES: u32 = 3;

/// What a sync operation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The git command ran and succeeded.
    Done,
    /// The hub directory is not a git repository; nothing to do.
    Skipped,
}

impl SyncOutcome {
    /// Returns `true` unless the operation was skipped.
    #[must_use]
    pub fn ran(self) -> bool {
        matches!(self, Self::Done)
    }
}

/// Git operations over one hub working tree.
///
/// Operations are serialized internally; concurrent workers share one
/// collaborator and never race on the index.
#[derive(Debug, Clone)]
pub struct GitSync {
    root: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl GitSync {
    /// Create a collaborator over the given working tree.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    fn is_repo(&self) -> bool {
        self.root.join(".git").exists()
    }

    /// Pull inbound mutations.
    pub async fn pull(&self) -> Result<SyncOutcome> {
        let _guard = self.lock.lock().await;
        if !self.is_repo() {
            debug!(root = %self.root.display(), "not a git repository, skipping pull");
            return Ok(SyncOutcome::Skipped);
        }
        if !self.has_remote().await {
            debug!("no remote configured, skipping pull");
            return Ok(SyncOutcome::Skipped);
        }
        run_git(&self.root, &["pull", "-q", "--ff-only"]).await?;
        Ok(SyncOutcome::Done)
    }

    /// Stage everything and commit with the given message.
    ///
    /// A clean tree is not an error; the commit is simply skipped.
    pub async fn commit(&self, message: &str) -> Result<SyncOutcome> {
        let _guard = self.lock.lock().await;
        if !self.is_repo() {
            debug!(root = %self.root.display(), "not a git repository, skipping commit");
            return Ok(SyncOutcome::Skipped);
        }
        run_git(&self.root, &["add", "-A"]).await?;

        let status = run_git(&self.root, &["status", "--porcelain=v1"]).await?;
        if status.trim().is_empty() {
            debug!("working tree clean, nothing to commit");
            return Ok(SyncOutcome::Done);
        }

        run_git(&self.root, &["commit", "-qm", message]).await?;
        Ok(SyncOutcome::Done)
    }

    /// Push outbound mutations, rebasing and retrying on conflict.
    pub async fn push(&self) -> Result<SyncOutcome> {
        let _guard = self.lock.lock().await;
        if !self.is_repo() {
            debug!(root = %self.root.display(), "not a git repository, skipping push");
            return Ok(SyncOutcome::Skipped);
        }
        if !self.has_remote().await {
            debug!("no remote configured, skipping push");
            return Ok(SyncOutcome::Skipped);
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match run_git(&self.root, &["push", "-q"]).await {
                Ok(_) => return Ok(SyncOutcome::Done),
                Err(e) if attempt <= MAX_PUSH_RETRIES => {
                    warn!(attempt, error = %e, "push rejected, rebasing and retrying");
                    run_git(&self.root, &["pull", "-q", "--rebase"])
                        .await
                        .context("rebase before push retry")?;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn has_remote(&self) -> bool {
        run_git(&self.root, &["remote"])
            .await
            .map(|out| !out.trim().is_empty())
            .unwrap_or(false)
    }
}

async fn run_git(root: &Path, args: &[&str]) -> Result<String> {
    let out = Command::new("git")
        .args(args)
        .current_dir(root)
        .output()
        .await
        .with_context(|| format!("run git {args:?}"))?;

    if !out.status.success() {
        anyhow::bail!(
            "git {:?} failed (code={:?}): {}",
            args,
            out.status.code(),
            String::from_utf8_lossy(&out.stderr).trim()
        );
    }

    Ok(String::from_utf8_lossy(&out.stdout).to_string())
}

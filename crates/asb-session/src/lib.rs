// SPDX-License-Identifier: MIT OR Apache-2.0
//! asb-session
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Per-request execution artifacts: session logs and crash checkpoints.
//!
//! A session log (`comms/sessions/{id}.log`) is created lazily on the
//! first output chunk and has exactly one writer, the worker executing
//! that request. A checkpoint (`comms/checkpoints/{service}--{id}.json`)
//! captures the error and attempt number of a failed attempt; it is loaded
//! as extra prompt context on the retry and cleared on success.

use asb_core::RequestId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Writer for per-request session logs.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    /// Create a store rooted at a hub directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = root.into();
        Self {
            dir: root.join("comms").join("sessions"),
        }
    }

    /// Path of the log for one request.
    #[must_use]
    pub fn log_path(&self, id: &RequestId) -> PathBuf {
        self.dir.join(format!("{id}.log"))
    }

    /// Append one line to a request's session log, creating it lazily.
    ///
    /// Best-effort: failures are logged at warn level and swallowed, the
    /// session log is an observability artifact, not state.
    pub async fn append(&self, id: &RequestId, line: &str) {
        if let Err(e) = self.try_append(id, line).await {
            warn!(request_id = %id, error = %e, "failed to append session log");
        }
    }

    async fn try_append(&self, id: &RequestId, line: &str) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(self.log_path(id))
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        Ok(())
    }

    /// Read a request's full session log, if one exists.
    pub async fn read(&self, id: &RequestId) -> Option<String> {
        tokio::fs::read_to_string(self.log_path(id)).await.ok()
    }
}

/// Context artifact written after a failed attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    /// The request the attempt belonged to.
    pub request_id: RequestId,
    /// Service that executed the attempt.
    pub service: String,
    /// The attempt number that failed.
    pub attempt: u32,
    /// Error summary from the failed attempt.
    pub error: String,
    /// When the checkpoint was written.
    pub created: DateTime<Utc>,
}

impl Checkpoint {
    /// Render the checkpoint as retry prompt context.
    #[must_use]
    pub fn as_prompt_context(&self) -> String {
        format!(
            "A previous attempt (#{}) of this request failed with:\n{}\nPick up from where it left off.",
            self.attempt, self.error
        )
    }
}

/// Store for crash checkpoints, keyed by (service, request).
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Create a store rooted at a hub directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = root.into();
        Self {
            dir: root.join("comms").join("checkpoints"),
        }
    }

    fn path(&self, service: &str, id: &RequestId) -> PathBuf {
        self.dir.join(format!("{service}--{id}.json"))
    }

    /// Persist a checkpoint, replacing any previous one for the key.
    pub async fn save(&self, checkpoint: &Checkpoint) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let json = serde_json::to_vec_pretty(checkpoint)
            .map_err(|e| std::io::Error::other(format!("serialize checkpoint: {e}")))?;
        tokio::fs::write(
            self.path(&checkpoint.service, &checkpoint.request_id),
            json,
        )
        .await
    }

    /// Load the checkpoint for a key, if any.
    pub async fn load(&self, service: &str, id: &RequestId) -> Option<Checkpoint> {
        let bytes = tokio::fs::read(self.path(service, id)).await.ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Remove the checkpoint for a key. Missing files are fine.
    pub async fn clear(&self, service: &str, id: &RequestId) {
        let path = self.path(service, id);
        if let Err(e) = tokio::fs::remove_file(&path).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %path.display(), error = %e, "failed to clear checkpoint");
        }
    }
}

/// Both per-request artifact stores, as the worker consumes them.
#[derive(Debug, Clone)]
pub struct ArtifactStores {
    /// Session log writer.
    pub sessions: SessionStore,
    /// Checkpoint store.
    pub checkpoints: CheckpointStore,
}

impl ArtifactStores {
    /// Create both stores over the same hub directory.
    pub fn new(root: &Path) -> Self {
        Self {
            sessions: SessionStore::new(root),
            checkpoints: CheckpointStore::new(root),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn session_log_is_created_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let id = RequestId::from("req-1");

        assert!(!store.log_path(&id).exists());
        store.append(&id, "first line").await;
        store.append(&id, "second line").await;

        let text = store.read(&id).await.unwrap();
        assert_eq!(text, "first line\nsecond line\n");
    }

    #[tokio::test]
    async fn checkpoint_round_trips_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        let id = RequestId::from("req-1");

        let checkpoint = Checkpoint {
            request_id: id.clone(),
            service: "billing".into(),
            attempt: 1,
            error: "agent exited with code 2".into(),
            created: Utc::now(),
        };
        store.save(&checkpoint).await.unwrap();

        let back = store.load("billing", &id).await.unwrap();
        assert_eq!(back, checkpoint);

        store.clear("billing", &id).await;
        assert!(store.load("billing", &id).await.is_none());
    }

    #[tokio::test]
    async fn clear_on_missing_checkpoint_is_quiet() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path());
        store.clear("billing", &RequestId::from("req-none")).await;
    }

    #[test]
    fn prompt_context_mentions_attempt_and_error() {
        let checkpoint = Checkpoint {
            request_id: RequestId::from("req-1"),
            service: "billing".into(),
            attempt: 2,
            error: "timeout".into(),
            created: Utc::now(),
        };
        let ctx = checkpoint.as_prompt_context();
        assert!(ctx.contains("#2"));
        assert!(ctx.contains("timeout"));
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! asb-history
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Append-only audit history for Agent Switchboard.
//!
//! Each status transition becomes one JSON line in
//! `{hub}/comms/history/{YYYY-MM-DD}-{actor}.jsonl`. Partitioning per
//! (date, actor) keeps concurrent actors on distinct files; appends for the
//! same file are serialized inside the writer. The full line is built
//! first and written in one call so readers never see a torn record.
//!
//! Appending is best-effort by contract: failures are logged at warn level
//! and never surfaced to business logic.

use asb_core::TransitionRecord;
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

/// Appends transition records to per-(date, actor) JSONL files.
#[derive(Debug)]
pub struct HistoryWriter {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl HistoryWriter {
    /// Create a writer rooted at a hub directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root: PathBuf = root.into();
        Self {
            dir: root.join("comms").join("history"),
            lock: Mutex::new(()),
        }
    }

    /// The directory history files are written to.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append one record. Best-effort: errors are logged, never returned.
    pub async fn append(&self, record: &TransitionRecord) {
        if let Err(e) = self.try_append(record).await {
            warn!(
                request_id = %record.request_id,
                actor = %record.actor,
                error = %e,
                "failed to append history record"
            );
        }
    }

    async fn try_append(&self, record: &TransitionRecord) -> std::io::Result<()> {
        let path = self.partition(record.ts.date_naive(), &record.actor);

        let mut line = serde_json::to_string(record)
            .map_err(|e| std::io::Error::other(format!("serialize history record: {e}")))?;
        line.push('\n');

        // Serialize appends so same-partition records land in issue order.
        let _guard = self.lock.lock().await;
        tokio::fs::create_dir_all(&self.dir).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Read back every record for one (date, actor) partition.
    ///
    /// Missing files yield an empty list; unparseable lines are skipped.
    pub async fn read_day(&self, date: NaiveDate, actor: &str) -> Vec<TransitionRecord> {
        let path = self.partition(date, actor);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(_) => return Vec::new(),
        };
        text.lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    fn partition(&self, date: NaiveDate, actor: &str) -> PathBuf {
        self.dir
            .join(format!("{}-{}.jsonl", date.format("%Y-%m-%d"), actor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asb_core::{RequestId, RequestStatus};

    fn record(actor: &str, detail: &str) -> TransitionRecord {
        TransitionRecord::new(
            RequestId::from("req-1"),
            RequestStatus::Pending,
            RequestStatus::InProgress,
            actor,
        )
        .with_detail(detail)
    }

    #[tokio::test]
    async fn appends_one_json_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let writer = HistoryWriter::new(dir.path());

        let rec = record("billing", "first");
        writer.append(&rec).await;
        writer.append(&record("billing", "second")).await;

        let day = rec.ts.date_naive();
        let back = writer.read_day(day, "billing").await;
        assert_eq!(back.len(), 2);
        assert_eq!(back[0].detail.as_deref(), Some("first"));
        assert_eq!(back[1].detail.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn partitions_by_actor() {
        let dir = tempfile::tempdir().unwrap();
        let writer = HistoryWriter::new(dir.path());

        let rec = record("billing", "a");
        writer.append(&rec).await;
        writer.append(&record("shipping", "b")).await;

        let day = rec.ts.date_naive();
        assert_eq!(writer.read_day(day, "billing").await.len(), 1);
        assert_eq!(writer.read_day(day, "shipping").await.len(), 1);

        let billing = writer
            .dir()
            .join(format!("{}-billing.jsonl", day.format("%Y-%m-%d")));
        assert!(billing.exists());
    }

    #[tokio::test]
    async fn missing_partition_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let writer = HistoryWriter::new(dir.path());
        let day = chrono::Utc::now().date_naive();
        assert!(writer.read_day(day, "nobody").await.is_empty());
    }

    #[tokio::test]
    async fn concurrent_appends_do_not_tear_lines() {
        let dir = tempfile::tempdir().unwrap();
        let writer = std::sync::Arc::new(HistoryWriter::new(dir.path()));

        let mut handles = Vec::new();
        for i in 0..16 {
            let writer = writer.clone();
            handles.push(tokio::spawn(async move {
                writer.append(&record("billing", &format!("n{i}"))).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let day = chrono::Utc::now().date_naive();
        let back = writer.read_day(day, "billing").await;
        assert_eq!(back.len(), 16);
    }
}

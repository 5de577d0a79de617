// SPDX-License-Identifier: MIT OR Apache-2.0
//! asb-store
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! File-backed request store for Agent Switchboard.
//!
//! The store owns every mutation of request files. Status rewrites go
//! through a write-temp-then-rename cycle so a concurrent reader never
//! observes a half-written header, and archive moves only accept requests
//! that already carry a terminal status.

/// Structured-header parsing shared with `.md` registry entries.
pub mod header;
/// Request file codec.
pub mod parse;

use asb_core::{Priority, Request, RequestId, RequestKind, RequestStatus};
use chrono::Utc;
use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

pub use parse::{parse_request, render_request};

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying filesystem failure.
    #[error("store i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A request file could not be parsed.
    #[error("failed to parse {path}: {reason}")]
    Parse {
        /// Path of the offending file.
        path: PathBuf,
        /// Human-readable parse failure.
        reason: String,
    },

    /// A status rewrite would violate the request state machine.
    #[error("illegal status transition for {id}: {from} -> {to}")]
    InvalidTransition {
        /// The request being rewritten.
        id: RequestId,
        /// Status on disk.
        from: RequestStatus,
        /// Requested status.
        to: RequestStatus,
    },

    /// An archive move was attempted on a non-terminal request.
    #[error("refusing to archive {id} with non-terminal status {status}")]
    NotTerminal {
        /// The request being archived.
        id: RequestId,
        /// Its current (non-terminal) status.
        status: RequestStatus,
    },
}

/// Whether a request's dependencies are satisfied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyStatus {
    /// `true` when every dependency is archived as completed.
    pub ready: bool,
    /// The dependencies that are not yet satisfied.
    pub pending: Vec<RequestId>,
}

/// File-backed request store rooted at a hub directory.
#[derive(Debug, Clone)]
pub struct RequestStore {
    root: PathBuf,
}

impl RequestStore {
    /// Create a store over the given hub directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The hub directory this store is rooted at.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the per-service inboxes.
    #[must_use]
    pub fn inbox_root(&self) -> PathBuf {
        self.root.join("comms").join("inbox")
    }

    /// Inbox directory for one service.
    #[must_use]
    pub fn inbox_dir(&self, service: &str) -> PathBuf {
        self.inbox_root().join(service)
    }

    /// Terminal home of completed, failed, and rejected requests.
    #[must_use]
    pub fn archive_dir(&self) -> PathBuf {
        self.root.join("comms").join("archive")
    }

    // -- scanning -----------------------------------------------------------

    /// Enumerate every inbox and return the dispatch candidates, sorted.
    ///
    /// Candidates are the non-terminal requests a tick may act on: pending,
    /// approved, and in-progress. Files that fail to parse are logged and
    /// skipped; files that vanish mid-scan are skipped. Duplicate ids
    /// across mirrored trees keep the first sighting.
    ///
    /// Ordering is total and stable: priority (critical first), then
    /// `created` ascending, then id ascending.
    #[must_use]
    pub fn scan_candidates(&self) -> Vec<Request> {
        let mut requests: Vec<Request> = self
            .scan_all()
            .into_iter()
            .filter(|r| {
                matches!(
                    r.status,
                    RequestStatus::Pending | RequestStatus::Approved | RequestStatus::InProgress
                )
            })
            .collect();

        requests.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| a.created.cmp(&b.created))
                .then_with(|| a.id.cmp(&b.id))
        });
        requests
    }

    /// Enumerate every request file in every inbox, regardless of status.
    ///
    /// Used by startup recovery and duplicate detection. Same skip and
    /// dedupe rules as [`scan_candidates`](Self::scan_candidates).
    #[must_use]
    pub fn scan_all(&self) -> Vec<Request> {
        let mut seen: HashSet<RequestId> = HashSet::new();
        let mut requests = Vec::new();

        for entry in WalkDir::new(self.inbox_root())
            .min_depth(2)
            .max_depth(2)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
        {
            let path = entry.path();
            if !is_request_file(path) {
                continue;
            }
            let service = entry
                .path()
                .parent()
                .and_then(Path::file_name)
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            match self.read_and_parse(path, &service) {
                Ok(req) => {
                    if seen.insert(req.id.clone()) {
                        requests.push(req);
                    } else {
                        debug!(id = %req.id, path = %path.display(), "duplicate id, keeping first sighting");
                    }
                }
                Err(StoreError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                    debug!(path = %path.display(), "file vanished during scan");
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unparseable request");
                }
            }
        }
        requests
    }

    /// Parse one request file.
    ///
    /// The service routing key is the inbox directory name when the file
    /// lives in an inbox, otherwise the `to` header field.
    pub fn load(&self, path: &Path) -> Result<Request, StoreError> {
        let service = path
            .parent()
            .filter(|p| {
                p.parent()
                    .and_then(Path::file_name)
                    .is_some_and(|n| n == "inbox")
            })
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned());

        let mut req = self.read_and_parse(path, service.as_deref().unwrap_or(""))?;
        if req.service.is_empty() {
            req.service = req.to.clone();
        }
        Ok(req)
    }

    fn read_and_parse(&self, path: &Path, service: &str) -> Result<Request, StoreError> {
        let text = std::fs::read_to_string(path)?;
        parse_request(&text, path, service)
    }

    // -- mutation -----------------------------------------------------------

    /// Rewrite the request header with a new status and bump `updated`.
    ///
    /// The rewrite is atomic: the file is rendered to a temporary sibling
    /// and renamed over the original. Transitions outside the request
    /// state machine are rejected.
    pub fn set_status(
        &self,
        req: &Request,
        status: RequestStatus,
    ) -> Result<Request, StoreError> {
        if !req.status.can_transition(status) {
            return Err(StoreError::InvalidTransition {
                id: req.id.clone(),
                from: req.status,
                to: status,
            });
        }
        let mut updated = req.clone();
        updated.status = status;
        updated.updated = Utc::now();
        self.write_atomic(&updated)?;
        Ok(updated)
    }

    /// Advance the attempt counter; returns the rewritten request and the
    /// post-increment value.
    pub fn increment_attempts(&self, req: &Request) -> Result<(Request, u32), StoreError> {
        let mut updated = req.clone();
        updated.attempts += 1;
        updated.updated = Utc::now();
        self.write_atomic(&updated)?;
        let n = updated.attempts;
        Ok((updated, n))
    }

    /// Start an execution attempt: advance the attempt counter and move
    /// the request to in-progress in one atomic rewrite.
    ///
    /// The single write means a failure leaves both fields untouched on
    /// disk; a claim that cannot be persisted never burns an attempt.
    pub fn begin_attempt(&self, req: &Request) -> Result<(Request, u32), StoreError> {
        if !req.status.can_transition(RequestStatus::InProgress) {
            return Err(StoreError::InvalidTransition {
                id: req.id.clone(),
                from: req.status,
                to: RequestStatus::InProgress,
            });
        }
        let mut updated = req.clone();
        updated.status = RequestStatus::InProgress;
        updated.attempts += 1;
        updated.updated = Utc::now();
        self.write_atomic(&updated)?;
        let n = updated.attempts;
        Ok((updated, n))
    }

    /// Move a terminal request from its inbox into the archive.
    pub fn archive(&self, req: &Request) -> Result<Request, StoreError> {
        if !req.status.is_terminal() {
            return Err(StoreError::NotTerminal {
                id: req.id.clone(),
                status: req.status,
            });
        }
        let archive = self.archive_dir();
        std::fs::create_dir_all(&archive)?;
        let file_name = req
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| format!("req-{}.md", req.id).into());
        let dest = archive.join(file_name);
        std::fs::rename(&req.path, &dest)?;

        let mut moved = req.clone();
        moved.path = dest;
        Ok(moved)
    }

    // -- dependencies -------------------------------------------------------

    /// Check whether every dependency of `req` is archived as completed.
    ///
    /// A dependency is satisfied only by an archive entry with status
    /// `completed`; absence, or any other status, leaves it pending.
    #[must_use]
    pub fn dependency_status(&self, req: &Request) -> DependencyStatus {
        if req.depends_on.is_empty() {
            return DependencyStatus {
                ready: true,
                pending: Vec::new(),
            };
        }
        let archived = self.archived_statuses();
        let pending: Vec<RequestId> = req
            .depends_on
            .iter()
            .filter(|dep| archived.get(dep) != Some(&RequestStatus::Completed))
            .cloned()
            .collect();
        DependencyStatus {
            ready: pending.is_empty(),
            pending,
        }
    }

    /// Map of archived request ids to their terminal status.
    #[must_use]
    pub fn archived_statuses(&self) -> BTreeMap<RequestId, RequestStatus> {
        let mut statuses = BTreeMap::new();
        for entry in WalkDir::new(self.archive_dir())
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
        {
            let path = entry.path();
            if !is_request_file(path) {
                continue;
            }
            match self.read_and_parse(path, "") {
                Ok(req) => {
                    statuses.entry(req.id).or_insert(req.status);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unparseable archive entry");
                }
            }
        }
        statuses
    }

    // -- escalation ---------------------------------------------------------

    /// Synthesize a high-priority escalation request in the orchestrator
    /// inbox, referencing a request that exhausted its attempts.
    pub fn write_escalation(&self, origin: &Request, error: &str) -> Result<Request, StoreError> {
        let now = Utc::now();
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let id = RequestId::new(format!("req-esc-{}", &suffix[..8]));
        let inbox = self.inbox_dir("orchestrator");
        std::fs::create_dir_all(&inbox)?;
        let path = inbox.join(format!("{id}.md"));

        let body = format!(
            "\n## Body\n\nRequest {} to service {} failed after {} attempts.\n\nLast error:\n\n```\n{}\n```\n",
            origin.id, origin.service, origin.attempts, error
        );

        let escalation = Request {
            id: id.clone(),
            title: Some(format!("Request: escalation for {}", origin.id)),
            from: "hub".to_string(),
            to: "orchestrator".to_string(),
            scope: origin.scope.clone(),
            service: "orchestrator".to_string(),
            kind: RequestKind::Other,
            priority: Priority::High,
            status: RequestStatus::Pending,
            created: now,
            updated: now,
            attempts: 0,
            depends_on: Vec::new(),
            directive: origin.directive.clone(),
            related_contract: origin.related_contract.clone(),
            command: None,
            command_args: None,
            originated_from: Some(origin.id.clone()),
            extra: Vec::new(),
            body,
            path,
        };
        self.write_atomic(&escalation)?;
        Ok(escalation)
    }

    // -- plumbing -----------------------------------------------------------

    /// Render `req` and atomically replace the file at `req.path`.
    fn write_atomic(&self, req: &Request) -> Result<(), StoreError> {
        let parent = req
            .path
            .parent()
            .ok_or_else(|| StoreError::Parse {
                path: req.path.clone(),
                reason: "request path has no parent directory".into(),
            })?;
        std::fs::create_dir_all(parent)?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(render_request(req).as_bytes())?;
        tmp.persist(&req.path).map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }
}

fn is_request_file(path: &Path) -> bool {
    path.is_file()
        && path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("req-") && n.ends_with(".md"))
}

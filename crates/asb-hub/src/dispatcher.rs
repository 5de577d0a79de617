// SPDX-License-Identifier: MIT OR Apache-2.0
//! Admission control: constraint checks, exclusion sets, and routing.
//!
//! Admission runs sequentially over the pre-sorted candidate sequence;
//! admitted requests are fanned out into parallel worker tasks. The two
//! exclusion sets guarantee at most one in-flight request per service and
//! per canonical working directory.

use asb_core::{Maintainer, Request, RequestStatus};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::hub::HubShared;
use crate::worker;

/// Where an admitted request executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// Local agent process in a working directory.
    Local {
        /// Canonicalized working directory.
        workdir: PathBuf,
    },
    /// Remote A2A agent.
    Remote {
        /// The remote endpoint URL.
        endpoint: String,
    },
}

#[derive(Default)]
struct ExclusionInner {
    services: HashSet<String>,
    directories: HashSet<PathBuf>,
}

/// The dispatcher's two exclusion sets, mutated under a single lock.
///
/// A claim inserts the service name and working directory together or not
/// at all, so two differently-named services sharing a tree can never run
/// concurrently.
#[derive(Default)]
pub struct ExclusionSets {
    inner: Mutex<ExclusionInner>,
}

impl ExclusionSets {
    /// Atomically claim a (service, directory) pair.
    ///
    /// Returns `false`, claiming nothing, if either member is taken.
    pub fn try_claim(&self, service: &str, dir: &Path) -> bool {
        let mut inner = self.inner.lock().expect("exclusion lock poisoned");
        if inner.services.contains(service) || inner.directories.contains(dir) {
            return false;
        }
        inner.services.insert(service.to_string());
        inner.directories.insert(dir.to_path_buf());
        true
    }

    /// Release a previously claimed pair.
    pub fn release(&self, service: &str, dir: &Path) {
        let mut inner = self.inner.lock().expect("exclusion lock poisoned");
        inner.services.remove(service);
        inner.directories.remove(dir);
    }

    /// Returns `true` if the service is currently claimed.
    #[must_use]
    pub fn holds_service(&self, service: &str) -> bool {
        self.inner
            .lock()
            .expect("exclusion lock poisoned")
            .services
            .contains(service)
    }

    /// Number of claimed (service, directory) pairs.
    #[must_use]
    pub fn active(&self) -> usize {
        self.inner
            .lock()
            .expect("exclusion lock poisoned")
            .services
            .len()
    }
}

/// Admit eligible candidates and fan them out to workers.
///
/// Candidates must already be sorted (the request store's scan order).
/// Admission applies, in order: the dependency gate, the maintainer gate,
/// service exclusion, and directory exclusion. Admitted requests are
/// routed to the remote client when the service policy carries an A2A
/// endpoint, otherwise to the local executor.
///
/// With `dry_run`, admission is simulated end-to-end and every claim is
/// released before returning; nothing executes.
///
/// Returns the number of requests admitted.
pub fn dispatch(shared: &Arc<HubShared>, candidates: Vec<Request>, dry_run: bool) -> usize {
    let mut admitted: Vec<(String, PathBuf)> = Vec::new();
    let mut processed = 0;

    for req in candidates {
        // Only pending/approved requests may start an attempt; in-progress
        // candidates belong to a worker that is already running.
        if !req.is_dispatchable() {
            debug!(id = %req.id, status = %req.status, "not dispatchable, deferring");
            continue;
        }

        let deps = shared.store.dependency_status(&req);
        if !deps.ready {
            debug!(id = %req.id, pending = ?deps.pending, "dependencies unmet, deferring");
            continue;
        }

        let Some(policy) = shared.registry_snapshot().policy_for(&req.service).cloned() else {
            debug!(id = %req.id, service = %req.service, "unknown service, deferring");
            continue;
        };

        match policy.maintainer {
            Maintainer::Human => {
                debug!(id = %req.id, service = %req.service, "human-maintained, deferring");
                continue;
            }
            Maintainer::External => {
                debug!(id = %req.id, service = %req.service, "externally owned, skipping");
                continue;
            }
            Maintainer::Hybrid if req.status != RequestStatus::Approved => {
                debug!(id = %req.id, "hybrid service without approval, deferring");
                continue;
            }
            Maintainer::Hybrid | Maintainer::Ai => {}
        }

        let workdir = canonical_workdir(
            &shared.config.hub_dir,
            policy.directory.as_deref(),
            &req.service,
        );

        if !shared.exclusions.try_claim(&req.service, &workdir) {
            debug!(id = %req.id, service = %req.service, "exclusion held, deferring");
            continue;
        }

        if dry_run {
            admitted.push((req.service.clone(), workdir));
            processed += 1;
            continue;
        }

        let Ok(permit) = shared.worker_permits.clone().try_acquire_owned() else {
            debug!(id = %req.id, "worker cap reached, releasing claim");
            shared.exclusions.release(&req.service, &workdir);
            continue;
        };

        let backend = match policy.a2a_url {
            Some(endpoint) => Backend::Remote { endpoint },
            None => Backend::Local {
                workdir: workdir.clone(),
            },
        };

        processed += 1;
        let task_shared = Arc::clone(shared);
        let service = req.service.clone();
        let handle = tokio::spawn(async move {
            // Exclusion release on every terminal path, worker cap with it.
            let _permit = permit;
            let _release = scopeguard::guard((), {
                let shared = Arc::clone(&task_shared);
                let service = service.clone();
                let workdir = workdir.clone();
                move |_| shared.exclusions.release(&service, &workdir)
            });

            worker::run_request(Arc::clone(&task_shared), req, backend).await;
        });
        shared.track_worker(handle);
    }

    if dry_run {
        for (service, dir) in admitted {
            shared.exclusions.release(&service, &dir);
        }
    }

    processed
}

/// Resolve the canonical working directory for a service.
///
/// Registry-relative paths are anchored at the hub directory; services
/// without a configured directory default to `{hub}/services/{name}`.
/// Canonicalization falls back to the logical path when the directory
/// does not exist yet.
pub fn canonical_workdir(hub_dir: &Path, policy_dir: Option<&Path>, service: &str) -> PathBuf {
    let dir = match policy_dir {
        Some(d) if d.is_absolute() => d.to_path_buf(),
        Some(d) => hub_dir.join(d),
        None => hub_dir.join("services").join(service),
    };
    dir.canonicalize().unwrap_or_else(|e| {
        debug!(dir = %dir.display(), error = %e, "canonicalize failed, using logical path");
        dir
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claims_are_atomic_over_both_sets() {
        let sets = ExclusionSets::default();
        assert!(sets.try_claim("billing", Path::new("/srv/billing")));

        // Same service, different directory.
        assert!(!sets.try_claim("billing", Path::new("/srv/other")));
        // Different service, same directory.
        assert!(!sets.try_claim("invoicing", Path::new("/srv/billing")));

        // The failed claims must not have left partial state behind.
        assert!(sets.try_claim("invoicing", Path::new("/srv/other")));
    }

    #[test]
    fn release_frees_both_sets() {
        let sets = ExclusionSets::default();
        assert!(sets.try_claim("billing", Path::new("/srv/billing")));
        sets.release("billing", Path::new("/srv/billing"));
        assert!(sets.try_claim("billing", Path::new("/srv/billing")));
        assert_eq!(sets.active(), 1);
    }

    #[test]
    fn workdir_defaults_under_services() {
        let dir = canonical_workdir(Path::new("/hub"), None, "billing");
        assert_eq!(dir, PathBuf::from("/hub/services/billing"));
    }

    #[test]
    fn workdir_respects_absolute_policy_paths() {
        let dir = canonical_workdir(Path::new("/hub"), Some(Path::new("/elsewhere/tree")), "x");
        assert_eq!(dir, PathBuf::from("/elsewhere/tree"));
    }

    #[test]
    fn workdir_anchors_relative_policy_paths() {
        let dir = canonical_workdir(Path::new("/hub"), Some(Path::new("teams/billing")), "x");
        assert_eq!(dir, PathBuf::from("/hub/teams/billing"));
    }
}

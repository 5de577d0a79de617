// SPDX-License-Identifier: MIT OR Apache-2.0
//! Startup reconciliation.
//!
//! A request that was in flight when the hub stopped is still
//! `in-progress` on disk. Before the first tick, every such file is
//! reverted to `pending` so the normal admission path re-picks it. This
//! is the only place outside a worker that rewrites a request status.

use asb_core::{RequestStatus, TransitionRecord};
use tracing::warn;

use crate::hub::HubShared;

/// Revert every orphaned in-progress request to pending.
///
/// Returns the number of requests recovered. Failures to rewrite an
/// individual file are logged and skipped; the file will be retried on
/// the next startup.
pub async fn recover(shared: &HubShared) -> usize {
    let mut recovered = 0;

    for req in shared.store.scan_all() {
        if req.status != RequestStatus::InProgress {
            continue;
        }
        match shared.store.set_status(&req, RequestStatus::Pending) {
            Ok(reverted) => {
                shared
                    .history
                    .append(
                        &TransitionRecord::new(
                            reverted.id.clone(),
                            RequestStatus::InProgress,
                            RequestStatus::Pending,
                            "hub",
                        )
                        .with_detail("recovered after hub restart"),
                    )
                    .await;
                recovered += 1;
            }
            Err(e) => {
                warn!(id = %req.id, error = %e, "failed to recover in-progress request");
            }
        }
    }

    recovered
}

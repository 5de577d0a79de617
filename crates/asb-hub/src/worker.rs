// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-request execution: claim, run, finalize.
//!
//! A worker owns exactly one request from claim to terminal state. Every
//! execution failure is converted into a state transition; errors never
//! escape a worker task. Persistence failures leave the request in its
//! prior state for the next tick.

use asb_core::{
    A2aState, HubEventKind, InvokeOutcome, OutputChunk, Request, RequestStatus, TransitionRecord,
};
use asb_exec::{ExecError, InvokeRequest};
use asb_remote::{A2aEvent, RemoteError};
use asb_session::Checkpoint;
use chrono::Utc;
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

use crate::dispatcher::Backend;
use crate::hub::HubShared;

/// Drive one admitted request to a terminal state.
pub async fn run_request(shared: Arc<HubShared>, req: Request, backend: Backend) {
    let Some(claimed) = claim(&shared, req).await else {
        return;
    };

    if claimed.req.kind == asb_core::RequestKind::Command {
        run_builtin_command(&shared, claimed).await;
        return;
    }

    match backend {
        Backend::Local { workdir } => run_local(&shared, claimed, workdir).await,
        Backend::Remote { endpoint } => run_remote(&shared, claimed, endpoint).await,
    }
}

/// A request that has started an execution attempt.
struct ClaimedRequest {
    req: Request,
    from_status: RequestStatus,
    attempts: u32,
    started: Instant,
}

/// Advance the attempt counter and move the request to in-progress in one
/// atomic rewrite, recording the transition in history.
///
/// Returns `None` on persistence failure: neither the attempt counter nor
/// the status changed on disk, and the next tick re-picks the request.
async fn claim(shared: &Arc<HubShared>, req: Request) -> Option<ClaimedRequest> {
    let from_status = req.status;

    let (req, attempts) = match shared.store.begin_attempt(&req) {
        Ok(pair) => pair,
        Err(e) => {
            warn!(id = %req.id, error = %e, "failed to start attempt, request left untouched");
            return None;
        }
    };

    shared
        .history
        .append(&TransitionRecord::new(
            req.id.clone(),
            from_status,
            RequestStatus::InProgress,
            req.service.clone(),
        ))
        .await;

    Some(ClaimedRequest {
        req,
        from_status,
        attempts,
        started: Instant::now(),
    })
}

// ---------------------------------------------------------------------------
// Local execution
// ---------------------------------------------------------------------------

async fn run_local(shared: &Arc<HubShared>, claimed: ClaimedRequest, workdir: PathBuf) {
    let req = &claimed.req;
    shared.emit(HubEventKind::RequestClaimed {
        request_id: req.id.clone(),
        service: req.service.clone(),
    });
    shared.emit(HubEventKind::SessionStart {
        request_id: req.id.clone(),
        service: req.service.clone(),
    });

    if let Err(e) = std::fs::create_dir_all(&workdir) {
        warn!(dir = %workdir.display(), error = %e, "cannot create working directory");
    }

    let mut prompt = req.body.trim().to_string();
    if let Some(checkpoint) = shared
        .artifacts
        .checkpoints
        .load(&req.service, &req.id)
        .await
    {
        prompt = format!("{prompt}\n\n{}", checkpoint.as_prompt_context());
    }

    // One logger task owns the session log for this request.
    let (log_tx, mut log_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    let sessions = shared.artifacts.sessions.clone();
    let log_id = req.id.clone();
    let logger = tokio::spawn(async move {
        while let Some(line) = log_rx.recv().await {
            sessions.append(&log_id, &line).await;
        }
    });

    let invoke = InvokeRequest {
        prompt,
        cwd: workdir,
        timeout: shared.request_timeout(),
        model: shared.config.dispatcher.model.clone(),
        budget_cap: shared.config.dispatcher.max_budget_usd,
    };

    let bus_shared = Arc::clone(shared);
    let chunk_id = req.id.clone();
    let result = shared
        .executor
        .invoke(invoke, move |chunk| {
            let _ = log_tx.send(chunk.to_log_line());
            bus_shared.emit(HubEventKind::SessionOutput {
                request_id: chunk_id.clone(),
                chunk,
            });
        })
        .await;
    let _ = logger.await;

    match result {
        Ok(outcome) if outcome.success => finalize_success(shared, claimed, outcome).await,
        Ok(outcome) => {
            let error = outcome
                .error
                .clone()
                .unwrap_or_else(|| "agent invocation failed".to_string());
            finalize_local_failure(shared, claimed, error, true).await;
        }
        Err(e @ (ExecError::Timeout { .. } | ExecError::Io(_))) => {
            finalize_local_failure(shared, claimed, e.to_string(), true).await;
        }
        Err(e) => {
            // Spawn-level failures are not the agent's fault; retrying
            // without operator intervention would fail identically.
            error!(id = %claimed.req.id, error = %e, "agent invocation could not start");
            finalize_local_failure(shared, claimed, e.to_string(), false).await;
        }
    }
}

/// Success path: completed status, archive, checkpoint cleared, working
/// tree committed, terminal events emitted.
async fn finalize_success(shared: &Arc<HubShared>, claimed: ClaimedRequest, outcome: InvokeOutcome) {
    let req = &claimed.req;

    let archived = match shared
        .store
        .set_status(req, RequestStatus::Completed)
        .and_then(|done| shared.store.archive(&done))
    {
        Ok(archived) => archived,
        Err(e) => {
            warn!(id = %req.id, error = %e, "failed to persist completion, leaving request");
            return;
        }
    };

    shared
        .artifacts
        .checkpoints
        .clear(&req.service, &req.id)
        .await;

    commit_and_push(shared, &format!("hub: complete {}", req.id)).await;

    shared
        .history
        .append(
            &TransitionRecord::new(
                req.id.clone(),
                RequestStatus::InProgress,
                RequestStatus::Completed,
                req.service.clone(),
            )
            .with_outcome(&outcome),
        )
        .await;

    shared.emit(HubEventKind::SessionComplete {
        request_id: req.id.clone(),
    });
    shared.emit(HubEventKind::RequestCompleted {
        request_id: archived.id.clone(),
        service: req.service.clone(),
        duration_ms: claimed.started.elapsed().as_millis() as u64,
    });
}

/// Failure path for local execution: checkpoint, then either revert to
/// pending (the next tick re-picks) or fail terminally and escalate.
async fn finalize_local_failure(
    shared: &Arc<HubShared>,
    claimed: ClaimedRequest,
    error: String,
    retry_eligible: bool,
) {
    let req = &claimed.req;

    let checkpoint = Checkpoint {
        request_id: req.id.clone(),
        service: req.service.clone(),
        attempt: claimed.attempts,
        error: error.clone(),
        created: Utc::now(),
    };
    if let Err(e) = shared.artifacts.checkpoints.save(&checkpoint).await {
        warn!(id = %req.id, error = %e, "failed to write checkpoint");
    }

    let will_retry = retry_eligible && claimed.attempts < shared.max_attempts();

    if will_retry {
        match shared.store.set_status(req, RequestStatus::Pending) {
            Ok(_) => {
                shared
                    .history
                    .append(
                        &TransitionRecord::new(
                            req.id.clone(),
                            RequestStatus::InProgress,
                            RequestStatus::Pending,
                            req.service.clone(),
                        )
                        .with_detail(error.clone()),
                    )
                    .await;
            }
            Err(e) => {
                warn!(id = %req.id, error = %e, "failed to revert to pending, leaving request");
            }
        }
    } else {
        match shared
            .store
            .set_status(req, RequestStatus::Failed)
            .and_then(|failed| shared.store.archive(&failed))
        {
            Ok(archived) => {
                if let Err(e) = shared.store.write_escalation(&archived, &error) {
                    warn!(id = %req.id, error = %e, "failed to write escalation request");
                }
                commit_and_push(shared, &format!("hub: fail {}", req.id)).await;
                shared
                    .history
                    .append(
                        &TransitionRecord::new(
                            req.id.clone(),
                            RequestStatus::InProgress,
                            RequestStatus::Failed,
                            req.service.clone(),
                        )
                        .with_detail(error.clone()),
                    )
                    .await;
            }
            Err(e) => {
                warn!(id = %req.id, error = %e, "failed to persist failure, leaving request");
            }
        }
    }

    shared.emit(HubEventKind::SessionError {
        request_id: req.id.clone(),
        error: error.clone(),
    });
    shared.emit(HubEventKind::RequestFailed {
        request_id: req.id.clone(),
        service: req.service.clone(),
        error,
        will_retry,
    });
}

async fn commit_and_push(shared: &Arc<HubShared>, message: &str) {
    match shared.git.commit(message).await {
        Ok(_) => {}
        Err(e) => warn!(error = %e, "git commit failed"),
    }
    match shared.git.push().await {
        Ok(outcome) if outcome.ran() => shared.emit(HubEventKind::SyncPush { ok: true }),
        Ok(_) => {}
        Err(e) => {
            warn!(error = %e, "git push failed");
            shared.emit(HubEventKind::SyncPush { ok: false });
        }
    }
}

// ---------------------------------------------------------------------------
// Remote execution
// ---------------------------------------------------------------------------

async fn run_remote(shared: &Arc<HubShared>, claimed: ClaimedRequest, endpoint: String) {
    let mut claimed_emitted = false;

    let mut stream = match shared.remote.send(&endpoint, &claimed.req).await {
        Ok(stream) => stream,
        Err(e) => {
            shared.remote.invalidate(&endpoint);
            ensure_claimed(shared, &claimed, &mut claimed_emitted);
            fail_remote(shared, &claimed, e.to_string()).await;
            return;
        }
    };

    let mut task_id: Option<String> = None;

    while let Some(event) = stream.next().await {
        match event {
            Ok(A2aEvent::TaskCreated {
                task_id: id,
                context_id,
            }) => {
                debug!(id = %claimed.req.id, task = %id, context = %context_id, "remote task created");
                task_id = Some(id);
            }
            Ok(A2aEvent::StatusUpdate { state, message }) => {
                // A remote may report `submitted` (or a stall state) before
                // `working`; the claim must still precede every status
                // observation for this request.
                ensure_claimed(shared, &claimed, &mut claimed_emitted);
                shared.emit(HubEventKind::A2aStatusUpdate {
                    request_id: claimed.req.id.clone(),
                    state,
                    message: message.clone(),
                });
                match state {
                    A2aState::Completed => {
                        complete_remote(shared, &claimed, &endpoint, task_id.as_deref(), &mut claimed_emitted)
                            .await;
                        return;
                    }
                    A2aState::Failed | A2aState::Canceled | A2aState::Rejected => {
                        shared.remote.invalidate(&endpoint);
                        let error = message
                            .unwrap_or_else(|| format!("remote task terminated as {state}"));
                        fail_remote(shared, &claimed, error).await;
                        return;
                    }
                    _ => {}
                }
            }
            Ok(A2aEvent::ArtifactUpdate { name, data }) => {
                ensure_claimed(shared, &claimed, &mut claimed_emitted);
                shared.emit(HubEventKind::A2aArtifactUpdate {
                    request_id: claimed.req.id.clone(),
                    name,
                    data,
                });
            }
            Err(e @ RemoteError::IdleTimeout { .. }) => {
                shared.remote.invalidate(&endpoint);
                ensure_claimed(shared, &claimed, &mut claimed_emitted);
                fail_remote(shared, &claimed, e.to_string()).await;
                return;
            }
            Err(e) => {
                shared.remote.invalidate(&endpoint);
                ensure_claimed(shared, &claimed, &mut claimed_emitted);
                fail_remote(shared, &claimed, e.to_string()).await;
                return;
            }
        }
    }

    // Stream ended without a terminal status.
    shared.remote.invalidate(&endpoint);
    ensure_claimed(shared, &claimed, &mut claimed_emitted);
    fail_remote(
        shared,
        &claimed,
        "remote stream ended before a terminal state".to_string(),
    )
    .await;
}

/// Lifecycle events for one request always begin with `request:claimed`.
fn ensure_claimed(shared: &Arc<HubShared>, claimed: &ClaimedRequest, emitted: &mut bool) {
    if !*emitted {
        *emitted = true;
        shared.emit(HubEventKind::RequestClaimed {
            request_id: claimed.req.id.clone(),
            service: claimed.req.service.clone(),
        });
    }
}

async fn complete_remote(
    shared: &Arc<HubShared>,
    claimed: &ClaimedRequest,
    endpoint: &str,
    task_id: Option<&str>,
    claimed_emitted: &mut bool,
) {
    ensure_claimed(shared, claimed, claimed_emitted);
    let req = &claimed.req;

    // The terminal snapshot carries the artifacts accumulated over the
    // task's lifetime (contract updates among them).
    if let Some(task_id) = task_id {
        match shared.remote.get_task(endpoint, task_id).await {
            Ok(snapshot) => {
                for artifact in snapshot.artifacts {
                    shared.emit(HubEventKind::A2aArtifactUpdate {
                        request_id: req.id.clone(),
                        name: artifact.name,
                        data: artifact.data,
                    });
                }
            }
            Err(e) => warn!(id = %req.id, error = %e, "failed to fetch terminal task snapshot"),
        }
    }

    let outcome = InvokeOutcome {
        success: true,
        duration_ms: claimed.started.elapsed().as_millis() as u64,
        cost_usd: None,
        num_turns: None,
        token_usage: None,
        model: None,
        error: None,
    };
    finalize_success(
        shared,
        ClaimedRequest {
            req: req.clone(),
            from_status: claimed.from_status,
            attempts: claimed.attempts,
            started: claimed.started,
        },
        outcome,
    )
    .await;
}

/// Remote failures are terminal: the request is archived as failed and
/// never retried by the hub.
async fn fail_remote(shared: &Arc<HubShared>, claimed: &ClaimedRequest, error: String) {
    let req = &claimed.req;

    match shared
        .store
        .set_status(req, RequestStatus::Failed)
        .and_then(|failed| shared.store.archive(&failed))
    {
        Ok(_) => {
            shared
                .history
                .append(
                    &TransitionRecord::new(
                        req.id.clone(),
                        RequestStatus::InProgress,
                        RequestStatus::Failed,
                        req.service.clone(),
                    )
                    .with_detail(error.clone()),
                )
                .await;
        }
        Err(e) => {
            warn!(id = %req.id, error = %e, "failed to persist remote failure, leaving request");
        }
    }

    shared.emit(HubEventKind::RequestFailed {
        request_id: req.id.clone(),
        service: req.service.clone(),
        error,
        will_retry: false,
    });
}

// ---------------------------------------------------------------------------
// Command shortcut
// ---------------------------------------------------------------------------

/// Run an allowlisted hub command without invoking an agent, then
/// finalize exactly like a successful (or failed) execution.
async fn run_builtin_command(shared: &Arc<HubShared>, claimed: ClaimedRequest) {
    let req = &claimed.req;
    shared.emit(HubEventKind::RequestClaimed {
        request_id: req.id.clone(),
        service: req.service.clone(),
    });
    shared.emit(HubEventKind::SessionStart {
        request_id: req.id.clone(),
        service: req.service.clone(),
    });

    let command = req.command.clone().unwrap_or_default();
    let output = match command.as_str() {
        "status" => format!(
            "inbox candidates: {}, in-flight: {}",
            shared.store.scan_candidates().len(),
            shared.exclusions.active(),
        ),
        "scan" | "check-inbox" => {
            let ids: Vec<String> = shared
                .store
                .scan_candidates()
                .iter()
                .map(|r| r.id.to_string())
                .collect();
            if ids.is_empty() {
                "inbox empty".to_string()
            } else {
                ids.join("\n")
            }
        }
        "validate" => match shared.store.load(&req.path) {
            Ok(_) => format!("{} parses cleanly", req.id),
            Err(e) => {
                let error = format!("{} failed validation: {e}", req.id);
                finalize_local_failure(shared, claimed, error, false).await;
                return;
            }
        },
        other => {
            let error = format!("command '{other}' is not allowlisted");
            finalize_local_failure(shared, claimed, error, false).await;
            return;
        }
    };

    let chunk = OutputChunk::Status {
        message: output.clone(),
    };
    shared.artifacts.sessions.append(&req.id, &chunk.to_log_line()).await;
    shared.emit(HubEventKind::SessionOutput {
        request_id: req.id.clone(),
        chunk,
    });

    let outcome = InvokeOutcome {
        success: true,
        duration_ms: claimed.started.elapsed().as_millis() as u64,
        cost_usd: None,
        num_turns: None,
        token_usage: None,
        model: None,
        error: None,
    };
    finalize_success(shared, claimed, outcome).await;
}

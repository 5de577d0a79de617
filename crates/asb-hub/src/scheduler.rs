// SPDX-License-Identifier: MIT OR Apache-2.0
//! The periodic tick loop.
//!
//! One tick: hot-reload the registry, pull inbound mutations, scan the
//! inboxes, dispatch, stamp the tick, emit `scheduler:tick`. Ticks are
//! guarded by a reentrance flag: a tick that fires while the previous one
//! is still running is skipped, never queued.

use asb_core::HubEventKind;
use asb_registry::Registry;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::dispatcher;
use crate::hub::HubShared;

/// Rolling counters for the current dispatch session.
struct SessionWindow {
    started: Instant,
    processed: u64,
}

/// Periodic tick driver with a reentrance gate.
pub struct Scheduler {
    shared: Arc<HubShared>,
    ticking: AtomicBool,
    last_tick: Mutex<Option<DateTime<Utc>>>,
    session: Mutex<SessionWindow>,
}

impl Scheduler {
    /// Create a scheduler over shared hub state.
    pub fn new(shared: Arc<HubShared>) -> Arc<Self> {
        Arc::new(Self {
            shared,
            ticking: AtomicBool::new(false),
            last_tick: Mutex::new(None),
            session: Mutex::new(SessionWindow {
                started: Instant::now(),
                processed: 0,
            }),
        })
    }

    /// When the last completed tick finished, if any.
    #[must_use]
    pub fn last_tick(&self) -> Option<DateTime<Utc>> {
        *self.last_tick.lock().expect("last tick lock poisoned")
    }

    /// Run one tick. Returns the number of requests admitted, or 0 when
    /// the tick was skipped because a previous tick is still running.
    pub async fn tick(&self) -> usize {
        if self
            .ticking
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("previous tick still running, skipping");
            return 0;
        }
        let _gate = scopeguard::guard((), |_| self.ticking.store(false, Ordering::SeqCst));

        // 1. Hot-reload the registry and surface service churn.
        let fresh = Registry::load(&self.shared.config.hub_dir);
        let fresh_names: BTreeSet<String> = fresh.service_names().into_iter().collect();
        let old = self.shared.replace_registry(fresh);
        let old_names: BTreeSet<String> = old.service_names().into_iter().collect();
        for added in fresh_names.difference(&old_names) {
            self.shared.emit(HubEventKind::ServiceAdded {
                service: added.clone(),
            });
        }
        for removed in old_names.difference(&fresh_names) {
            self.shared.emit(HubEventKind::ServiceRemoved {
                service: removed.clone(),
            });
        }

        // 2. Pull inbound mutations, best-effort.
        match self.shared.git.pull().await {
            Ok(outcome) => {
                if outcome.ran() {
                    self.shared.emit(HubEventKind::SyncPull { ok: true });
                }
            }
            Err(e) => {
                warn!(error = %e, "git pull failed");
                self.shared.emit(HubEventKind::SyncPull { ok: false });
            }
        }

        let running = self.shared.prune_workers();
        debug!(running, "worker handles pruned");

        // 3–4. Scan candidates and dispatch.
        let candidates = self.shared.store.scan_candidates();
        let processed = dispatcher::dispatch(&self.shared, candidates, false);

        // 5. Stamp the tick.
        *self.last_tick.lock().expect("last tick lock poisoned") = Some(Utc::now());
        self.roll_session(processed as u64);

        // 6. Announce it.
        self.shared.emit(HubEventKind::SchedulerTick { processed });
        processed
    }

    /// Advance the dispatch-session counters, rolling the session over
    /// when it exceeds its configured size or age.
    fn roll_session(&self, processed: u64) {
        let max_requests = u64::from(self.shared.config.dispatcher.session_max_requests);
        let max_age =
            Duration::from_secs(self.shared.config.dispatcher.session_max_age_hours * 3600);

        let mut session = self.session.lock().expect("session lock poisoned");
        session.processed += processed;
        if session.processed >= max_requests || session.started.elapsed() >= max_age {
            info!(
                processed = session.processed,
                age_secs = session.started.elapsed().as_secs(),
                "dispatch session rollover"
            );
            session.processed = 0;
            session.started = Instant::now();
        }
    }

    /// Tick on the configured interval until shutdown is signalled.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_secs(self.shared.config.dispatcher.poll_interval.max(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("scheduler loop stopping");
                        return;
                    }
                }
            }
        }
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! The hub object: shared state and the construct → start → stop lifecycle.

use asb_bus::{BridgeHandle, EventBus};
use asb_config::{ConfigError, HubConfig, validate_config};
use asb_core::{HubEvent, HubEventKind, WireMessage};
use asb_exec::{ExecError, LocalExecutor};
use asb_git::GitSync;
use asb_history::HistoryWriter;
use asb_registry::Registry;
use asb_remote::RemoteClient;
use asb_session::ArtifactStores;
use asb_store::RequestStore;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::scheduler::Scheduler;
use crate::{dispatcher, recovery};

/// Fatal construction/startup failures. Everything after startup is
/// surfaced through events and history, never through errors.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// Configuration failed to validate.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The agent command is unusable.
    #[error(transparent)]
    Agent(#[from] ExecError),

    /// The hub directory is missing or unreadable.
    #[error("hub directory {path} is not usable: {reason}")]
    HubDir {
        /// The configured hub directory.
        path: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Everything the dispatcher, scheduler, and workers share.
pub struct HubShared {
    /// Validated runtime configuration.
    pub config: HubConfig,
    /// The request store (sole owner of request file mutations).
    pub store: RequestStore,
    /// Current registry snapshot; replaced wholesale at each tick.
    registry: RwLock<Arc<Registry>>,
    /// In-process event bus.
    pub bus: EventBus,
    /// Transition history appender.
    pub history: HistoryWriter,
    /// Session logs and checkpoints.
    pub artifacts: ArtifactStores,
    /// Git collaborator for the working tree.
    pub git: GitSync,
    /// Local agent executor.
    pub executor: LocalExecutor,
    /// Remote A2A client.
    pub remote: RemoteClient,
    /// The dispatcher's exclusion sets.
    pub exclusions: dispatcher::ExclusionSets,
    /// Worker cap.
    pub worker_permits: Arc<Semaphore>,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl HubShared {
    /// Emit a hub event stamped with the current time.
    pub fn emit(&self, kind: HubEventKind) {
        self.bus.emit(HubEvent::now(kind));
    }

    /// The current registry snapshot.
    #[must_use]
    pub fn registry_snapshot(&self) -> Arc<Registry> {
        Arc::clone(&self.registry.read().expect("registry lock poisoned"))
    }

    /// Replace the registry snapshot (tick-start hot reload).
    pub fn replace_registry(&self, registry: Registry) -> Arc<Registry> {
        let mut slot = self.registry.write().expect("registry lock poisoned");
        let old = Arc::clone(&slot);
        *slot = Arc::new(registry);
        old
    }

    /// Hard per-request timeout (local) and idle window (remote).
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.config.dispatcher.request_timeout)
    }

    /// Attempts allowed per request before escalation.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.config.dispatcher.max_attempts
    }

    /// Track a spawned worker task.
    pub fn track_worker(&self, handle: JoinHandle<()>) {
        self.worker_handles
            .lock()
            .expect("worker handle lock poisoned")
            .push(handle);
    }

    /// Drop finished worker handles; returns how many are still running.
    pub fn prune_workers(&self) -> usize {
        let mut handles = self
            .worker_handles
            .lock()
            .expect("worker handle lock poisoned");
        handles.retain(|h| !h.is_finished());
        handles.len()
    }

    fn abort_workers(&self) {
        let handles = std::mem::take(
            &mut *self
                .worker_handles
                .lock()
                .expect("worker handle lock poisoned"),
        );
        for handle in handles {
            handle.abort();
        }
    }
}

/// The coordination hub.
///
/// Construct with [`Hub::new`], begin ticking with [`Hub::start`], and
/// shut down with [`Hub::stop`]. Stopping is graceful: the scheduler
/// timer stops, workers are cancelled, and in-flight requests stay
/// `in-progress` on disk for the next startup's recovery pass.
pub struct Hub {
    shared: Arc<HubShared>,
    scheduler: Arc<Scheduler>,
    shutdown: watch::Sender<bool>,
    loop_handle: Option<JoinHandle<()>>,
}

impl Hub {
    /// Build a hub over a validated configuration.
    pub fn new(config: HubConfig) -> Result<Self, HubError> {
        for warning in validate_config(&config)? {
            warn!(%warning, "config warning");
        }

        if !config.hub_dir.is_dir() {
            return Err(HubError::HubDir {
                path: config.hub_dir.display().to_string(),
                reason: "not a directory".into(),
            });
        }

        let executor = LocalExecutor::new(&config.agent_cmd)?;
        let root = config.hub_dir.clone();
        let timeout = Duration::from_secs(config.dispatcher.request_timeout);
        let workers = config.dispatcher.workers;

        let shared = Arc::new(HubShared {
            store: RequestStore::new(&root),
            registry: RwLock::new(Arc::new(Registry::load(&root))),
            bus: EventBus::new(),
            history: HistoryWriter::new(&root),
            artifacts: ArtifactStores::new(&root),
            git: GitSync::new(&root),
            executor,
            remote: RemoteClient::new(timeout),
            exclusions: dispatcher::ExclusionSets::default(),
            worker_permits: Arc::new(Semaphore::new(workers)),
            worker_handles: Mutex::new(Vec::new()),
            config,
        });

        let scheduler = Scheduler::new(Arc::clone(&shared));
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            shared,
            scheduler,
            shutdown,
            loop_handle: None,
        })
    }

    /// Shared hub state (stores, bus, exclusions).
    #[must_use]
    pub fn shared(&self) -> &Arc<HubShared> {
        &self.shared
    }

    /// The in-process event bus.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.shared.bus
    }

    /// Bridge every hub event into an external JSON sink.
    #[must_use]
    pub fn bridge(&self, sink: mpsc::UnboundedSender<WireMessage>) -> BridgeHandle {
        self.shared.bus.bridge(sink)
    }

    /// Run startup recovery, then begin the periodic tick loop.
    pub async fn start(&mut self) {
        let recovered = recovery::recover(&self.shared).await;
        if recovered > 0 {
            info!(recovered, "reverted orphaned in-progress requests");
        }

        let scheduler = Arc::clone(&self.scheduler);
        let shutdown = self.shutdown.subscribe();
        self.loop_handle = Some(tokio::spawn(scheduler.run(shutdown)));
        info!(
            poll_interval = self.shared.config.dispatcher.poll_interval,
            workers = self.shared.config.dispatcher.workers,
            "hub started"
        );
    }

    /// Run one scheduler tick on demand.
    pub async fn tick_now(&self) -> usize {
        self.scheduler.tick().await
    }

    /// Wait until no worker task is running.
    pub async fn drain(&self) {
        loop {
            if self.shared.prune_workers() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Graceful shutdown: stop the timer, cancel workers, leave in-flight
    /// request files for the next startup's recovery.
    pub async fn stop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.loop_handle.take() {
            let _ = handle.await;
        }
        self.shared.abort_workers();
        info!("hub stopped");
    }
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync engine coordinator.
//!
//! The [`SyncEngine`] is the composition root. It builds every component
//! from a [`SyncConfig`] and the embedder's [`Adapters`], wires them
//! together and exposes the entry points business code uses:
//! - typed mutations ([`SyncEngine::save`], [`SyncEngine::delete`]) that go
//!   through the permission gate and the change tracker
//! - [`SyncEngine::reconcile`] and [`SyncEngine::process_queue`]
//! - session, presence and the health view
//!
//! # Lifecycle
//!
//! ```text
//! Created → Running → ShuttingDown → Stopped
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use pos_sync::{Adapters, SyncConfig, SyncEngine, EngineState};
//! use pos_sync::storage::{InMemoryLocalStore, InMemoryRemoteStore};
//! use pos_sync::clock::SystemClock;
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let clock = Arc::new(SystemClock);
//! let adapters = Adapters::new(
//!     Arc::new(InMemoryLocalStore::new()),
//!     Arc::new(InMemoryRemoteStore::new(clock.clone())),
//! );
//! let engine = SyncEngine::open(SyncConfig::default(), adapters).await.expect("open failed");
//! assert_eq!(engine.state(), EngineState::Created);
//!
//! engine.start().expect("start failed");
//! // ... business logic ...
//! engine.shutdown().await;
//! # }
//! ```

mod api;
mod lifecycle;
mod types;

pub use types::{EngineState, HealthReport};

use std::sync::Arc;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::config::SyncConfig;
use crate::connectivity::Connectivity;
use crate::error::SyncError;
use crate::notify::{Notifier, TracingNotifier};
use crate::orchestrator::{SyncContext, SyncOrchestrator};
use crate::resilience::circuit_breaker::DegradationController;
use crate::resilience::journal::QueueJournal;
use crate::resilience::offline_queue::OfflineQueue;
use crate::resolver::ConflictResolver;
use crate::storage::traits::{LocalStore, RemoteStore};
use crate::team::permissions::Session;
use crate::team::presence::PresenceService;
use crate::tracker::ChangeTracker;

/// External collaborators the engine is built on.
#[derive(Clone)]
pub struct Adapters {
    pub local: Arc<dyn LocalStore>,
    pub remote: Arc<dyn RemoteStore>,
    pub clock: Arc<dyn Clock>,
    pub notifier: Arc<dyn Notifier>,
}

impl Adapters {
    /// Stores only; wall clock and log-only notifications.
    pub fn new(local: Arc<dyn LocalStore>, remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            local,
            remote,
            clock: Arc::new(SystemClock),
            notifier: Arc::new(TracingNotifier),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }
}

/// Main sync engine coordinator.
///
/// `Send + Sync`; share it behind an `Arc` if several tasks need it.
pub struct SyncEngine {
    pub(super) config: SyncConfig,

    /// Engine state (broadcast to watchers)
    pub(super) state: watch::Sender<EngineState>,
    pub(super) state_rx: watch::Receiver<EngineState>,

    pub(super) ctx: SyncContext,
    pub(super) orchestrator: Arc<SyncOrchestrator>,
    pub(super) presence: Arc<PresenceService>,

    /// Flipped to true to stop background tasks
    pub(super) shutdown_tx: watch::Sender<bool>,
    pub(super) tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncEngine {
    /// Build the engine. Opens the queue journal if one is configured and
    /// reloads any operations a previous run left queued.
    ///
    /// The engine starts in `Created` state; call [`start()`](Self::start)
    /// to launch the background timers.
    pub async fn open(config: SyncConfig, adapters: Adapters) -> Result<Self, SyncError> {
        let Adapters {
            local,
            remote,
            clock,
            notifier,
        } = adapters;

        let connectivity = Arc::new(Connectivity::new(true));
        let session = Arc::new(Session::new());
        let tracker = Arc::new(ChangeTracker::new(
            Arc::clone(&local),
            Arc::clone(&clock),
            config.device_id.clone(),
        ));
        let breaker = Arc::new(DegradationController::new(
            config.degradation_config(),
            Arc::clone(&clock),
            Arc::clone(&notifier),
        ));

        let mut queue = OfflineQueue::new(
            config.retry_config(),
            config.offline_queue_capacity,
            Arc::clone(&clock),
            Arc::clone(&notifier),
            Arc::clone(&connectivity),
        );
        if let Some(path) = &config.queue_journal_path {
            queue = queue.with_journal(QueueJournal::open(path).await?).await?;
        }
        let queue = Arc::new(queue);

        let ctx = SyncContext {
            local,
            remote: Arc::clone(&remote),
            tracker,
            breaker: Arc::clone(&breaker),
            queue,
            connectivity,
            session: Arc::clone(&session),
            notifier,
            clock: Arc::clone(&clock),
        };

        let orchestrator = Arc::new(SyncOrchestrator::new(
            ctx.clone(),
            ConflictResolver::new(config.tie_break),
        ));
        orchestrator.register_queue_handlers();

        let presence = Arc::new(PresenceService::new(
            remote,
            breaker,
            session,
            clock,
            config.device_id.clone(),
        ));

        let (state_tx, state_rx) = watch::channel(EngineState::Created);
        let (shutdown_tx, _) = watch::channel(false);

        info!(device_id = %config.device_id, "Sync engine created");
        Ok(Self {
            config,
            state: state_tx,
            state_rx,
            ctx,
            orchestrator,
            presence,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Get current engine state.
    #[must_use]
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == EngineState::Running
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.config.device_id
    }

    #[must_use]
    pub fn connectivity(&self) -> &Arc<Connectivity> {
        &self.ctx.connectivity
    }

    #[must_use]
    pub fn degradation(&self) -> &Arc<DegradationController> {
        &self.ctx.breaker
    }

    #[must_use]
    pub fn queue(&self) -> &Arc<OfflineQueue> {
        &self.ctx.queue
    }

    #[must_use]
    pub fn tracker(&self) -> &Arc<ChangeTracker> {
        &self.ctx.tracker
    }

    #[must_use]
    pub fn session(&self) -> &Arc<Session> {
        &self.ctx.session
    }
}

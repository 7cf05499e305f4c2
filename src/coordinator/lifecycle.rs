// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Engine lifecycle: background timers, start and shutdown.
//!
//! Background tasks, all stopped by one watch-based shutdown signal:
//!
//! | task | period | work |
//! |---|---|---|
//! | reconcile | `sync_interval_secs` | reconcile every kind while online |
//! | queue safety net | `queue_safety_net_secs` | replay the offline queue |
//! | degradation sweep | `degradation_sweep_secs` | restore operations whose timeout elapsed |
//! | presence | `presence_interval_secs` | heartbeat for the signed-in member |
//! | connectivity | on change | offline → online: sweep, replay queue, reconcile |
//!
//! A tick that is already running is never cancelled; shutdown waits for it.
//!
//! Timer periods run on tokio time, not on the injected [`Clock`]. The clock
//! stamps records and paces queue backoff; tests drive these timers with a
//! paused runtime instead.
//!
//! [`Clock`]: crate::clock::Clock

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::connectivity::Connectivity;
use crate::error::SyncError;
use crate::orchestrator::SyncOrchestrator;
use crate::resilience::circuit_breaker::DegradationController;
use crate::resilience::offline_queue::OfflineQueue;
use crate::sync_record::EntityKind;

use super::{EngineState, SyncEngine};

impl SyncEngine {
    /// Launch the background timers and move to `Running`.
    #[tracing::instrument(skip(self), fields(device_id = %self.config.device_id))]
    pub fn start(&self) -> Result<(), SyncError> {
        let state = self.state();
        if state != EngineState::Created {
            return Err(SyncError::Validation(format!("cannot start engine in state {state}")));
        }

        let shutdown = self.shutdown_tx.subscribe();
        let mut tasks = Vec::with_capacity(5);

        let orchestrator = Arc::clone(&self.orchestrator);
        let connectivity = Arc::clone(&self.ctx.connectivity);
        tasks.push(spawn_periodic(
            "reconcile",
            self.config.sync_interval(),
            shutdown.clone(),
            move || {
                let orchestrator = Arc::clone(&orchestrator);
                let connectivity = Arc::clone(&connectivity);
                async move { periodic_reconcile(&orchestrator, &connectivity).await }
            },
        ));

        let queue = Arc::clone(&self.ctx.queue);
        tasks.push(spawn_periodic(
            "queue_safety_net",
            self.config.queue_safety_net(),
            shutdown.clone(),
            move || {
                let queue = Arc::clone(&queue);
                async move {
                    if !queue.is_empty() {
                        queue.process_queue().await;
                    }
                }
            },
        ));

        let breaker = Arc::clone(&self.ctx.breaker);
        tasks.push(spawn_periodic(
            "degradation_sweep",
            self.config.degradation_sweep(),
            shutdown.clone(),
            move || {
                let breaker = Arc::clone(&breaker);
                async move {
                    breaker.restore_expired();
                }
            },
        ));

        let presence = Arc::clone(&self.presence);
        tasks.push(spawn_periodic(
            "presence",
            self.config.presence_interval(),
            shutdown.clone(),
            move || {
                let presence = Arc::clone(&presence);
                async move {
                    presence.heartbeat().await;
                }
            },
        ));

        tasks.push(spawn_connectivity_watcher(
            Arc::clone(&self.ctx.connectivity),
            Arc::clone(&self.ctx.breaker),
            Arc::clone(&self.ctx.queue),
            Arc::clone(&self.orchestrator),
            shutdown,
        ));

        self.tasks.lock().extend(tasks);

        self.state.send_replace(EngineState::Running);
        info!("Sync engine running");
        Ok(())
    }

    /// Stop the background timers, publish an offline presence and move to
    /// `Stopped`. In-flight work finishes first.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        let shutdown_start = std::time::Instant::now();
        info!("Initiating sync engine shutdown...");
        self.state.send_replace(EngineState::ShuttingDown);
        self.shutdown_tx.send_replace(true);

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }

        if self.ctx.session.current().is_some() {
            self.presence
                .set_status(crate::team::presence::PresenceStatus::Offline)
                .await;
        }

        self.state.send_replace(EngineState::Stopped);
        info!(elapsed_ms = shutdown_start.elapsed().as_millis() as u64, "Sync engine shutdown complete");
    }
}

async fn periodic_reconcile(orchestrator: &SyncOrchestrator, connectivity: &Connectivity) {
    if !connectivity.is_online() {
        debug!("Offline, skipping periodic reconcile");
        return;
    }
    match orchestrator.reconcile(&EntityKind::ALL, false).await {
        Ok(_) => {}
        Err(SyncError::AlreadySyncing) => debug!("Periodic reconcile skipped, pass in flight"),
        Err(e) => warn!(error = %e, "Periodic reconcile failed"),
    }
}

/// Run `tick` every `period` of tokio time until shutdown. The first tick
/// fires at once.
fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = interval.tick() => tick().await,
            }
        }
        debug!(task = name, "Background task stopped");
    })
}

fn spawn_connectivity_watcher(
    connectivity: Arc<Connectivity>,
    breaker: Arc<DegradationController>,
    queue: Arc<OfflineQueue>,
    orchestrator: Arc<SyncOrchestrator>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut rx = connectivity.subscribe();
        let mut was_online = *rx.borrow_and_update();

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let online = *rx.borrow_and_update();
                    if online && !was_online {
                        info!("Connectivity restored, replaying offline queue");
                        breaker.restore_expired();
                        queue.process_queue().await;
                        periodic_reconcile(&orchestrator, &connectivity).await;
                    }
                    was_online = online;
                }
            }
        }
        debug!(task = "connectivity", "Background task stopped");
    })
}

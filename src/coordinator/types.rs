// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the sync engine coordinator.

use serde::Serialize;

use crate::orchestrator::SyncReport;
use crate::resilience::circuit_breaker::ServiceHealth;
use crate::resilience::offline_queue::QueueStats;

/// Engine lifecycle state.
///
/// Use [`super::SyncEngine::state()`] to check the current state or
/// [`super::SyncEngine::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineState {
    /// Built, background tasks not started
    Created,
    /// Background timers running
    Running,
    /// Stopping background tasks
    ShuttingDown,
    /// All background tasks finished
    Stopped,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Running => write!(f, "Running"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Operator-facing health view.
///
/// Permanently dropped queue operations show up here (`queue.recent_drops`)
/// so data loss is never silent.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub state: EngineState,
    pub device_id: String,
    pub online: bool,
    pub signed_in_member: Option<String>,
    pub syncing: bool,
    pub queue: QueueStats,
    pub degraded: Vec<ServiceHealth>,
    pub last_reconcile: Option<SyncReport>,
}

impl HealthReport {
    /// Online, nothing degraded, nothing lost.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.online && self.degraded.is_empty() && self.queue.dropped_total == 0
    }
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the sync engine.
//!
//! # Example
//!
//! ```
//! use pos_sync::SyncConfig;
//!
//! // Minimal config (uses defaults)
//! let config = SyncConfig::default();
//! assert_eq!(config.sync_interval_secs, 300);
//! assert_eq!(config.max_retries, 3);
//!
//! // Till in the back office, faster sync, persistent queue
//! let config = SyncConfig {
//!     device_id: "till-2".into(),
//!     sync_interval_secs: 60,
//!     queue_journal_path: Some("/var/lib/pos/queue.db".into()),
//!     ..Default::default()
//! };
//! assert_eq!(config.retry_config().delay_for(2).as_secs(), 4);
//! ```

use serde::Deserialize;
use std::time::Duration;

use crate::resilience::circuit_breaker::DegradationConfig;
use crate::resilience::retry::RetryConfig;
use crate::resolver::TieBreak;

/// Configuration for the sync engine.
///
/// Fixed for the lifetime of an engine instance.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Identifies this device in sync metadata (default: random UUID)
    #[serde(default = "default_device_id")]
    pub device_id: String,

    /// Periodic reconcile interval (default: 300s)
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,

    /// Attempts per queued operation before it is dropped (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff delay, doubled per retry (default: 2000ms)
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Degradation thresholds
    #[serde(default = "default_circuit_error_threshold")]
    pub circuit_error_threshold: u32,
    #[serde(default = "default_circuit_window_secs")]
    pub circuit_window_secs: u64,
    #[serde(default = "default_degradation_timeout_secs")]
    pub degradation_timeout_secs: u64,

    /// How often expired degradations are swept (default: 5s)
    #[serde(default = "default_degradation_sweep_secs")]
    pub degradation_sweep_secs: u64,

    /// Offline queue bound; the oldest entry is dropped past it (default: 1000)
    #[serde(default = "default_offline_queue_capacity")]
    pub offline_queue_capacity: usize,

    /// Queue replay safety-net timer (default: 60s)
    #[serde(default = "default_queue_safety_net_secs")]
    pub queue_safety_net_secs: u64,

    /// Presence heartbeat interval (default: 30s)
    #[serde(default = "default_presence_interval_secs")]
    pub presence_interval_secs: u64,

    /// SQLite file that keeps the offline queue across restarts
    #[serde(default)]
    pub queue_journal_path: Option<String>,

    /// Rule for equal `updated_at` values
    #[serde(default)]
    pub tie_break: TieBreak,
}

fn default_device_id() -> String { uuid::Uuid::new_v4().to_string() }
fn default_sync_interval_secs() -> u64 { 300 }
fn default_max_retries() -> u32 { 3 }
fn default_retry_base_delay_ms() -> u64 { 2000 }
fn default_circuit_error_threshold() -> u32 { 5 }
fn default_circuit_window_secs() -> u64 { 60 }
fn default_degradation_timeout_secs() -> u64 { 300 }
fn default_degradation_sweep_secs() -> u64 { 5 }
fn default_offline_queue_capacity() -> usize { 1000 }
fn default_queue_safety_net_secs() -> u64 { 60 }
fn default_presence_interval_secs() -> u64 { 30 }

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            device_id: default_device_id(),
            sync_interval_secs: default_sync_interval_secs(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            circuit_error_threshold: default_circuit_error_threshold(),
            circuit_window_secs: default_circuit_window_secs(),
            degradation_timeout_secs: default_degradation_timeout_secs(),
            degradation_sweep_secs: default_degradation_sweep_secs(),
            offline_queue_capacity: default_offline_queue_capacity(),
            queue_safety_net_secs: default_queue_safety_net_secs(),
            presence_interval_secs: default_presence_interval_secs(),
            queue_journal_path: None,
            tie_break: TieBreak::default(),
        }
    }
}

impl SyncConfig {
    #[must_use]
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    #[must_use]
    pub fn queue_safety_net(&self) -> Duration {
        Duration::from_secs(self.queue_safety_net_secs)
    }

    #[must_use]
    pub fn presence_interval(&self) -> Duration {
        Duration::from_secs(self.presence_interval_secs)
    }

    #[must_use]
    pub fn degradation_sweep(&self) -> Duration {
        Duration::from_secs(self.degradation_sweep_secs)
    }

    /// Backoff schedule for offline queue replay.
    #[must_use]
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::offline_queue(Duration::from_millis(self.retry_base_delay_ms), self.max_retries)
    }

    #[must_use]
    pub fn degradation_config(&self) -> DegradationConfig {
        DegradationConfig {
            error_threshold: self.circuit_error_threshold,
            window: Duration::from_secs(self.circuit_window_secs),
            degradation_timeout: Duration::from_secs(self.degradation_timeout_secs),
        }
    }
}

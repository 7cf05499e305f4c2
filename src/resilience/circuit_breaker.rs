// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-operation circuit breaker with fallback execution.
//!
//! Every remote-dependent operation runs through
//! [`DegradationController::execute_with_fallback`]. Failures that say
//! something about remote health are counted in a rolling window; once the
//! count reaches the threshold the operation is marked degraded and every
//! call goes straight to the fallback until the degradation timeout passes.
//!
//! States per operation:
//! - Healthy: no entry, or an entry below threshold
//! - Degraded: primary skipped, fallback only
//!
//! Recovery clears the entry entirely. It happens lazily on the next call
//! after the deadline, or eagerly via [`DegradationController::restore_expired`]
//! which the engine runs on a timer.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::SyncError;
use crate::notify::{Notification, Notifier};

#[derive(Debug, Clone)]
pub struct DegradationConfig {
    /// Failures within `window` that trip the circuit
    pub error_threshold: u32,
    pub window: Duration,
    /// How long an operation stays degraded
    pub degradation_timeout: Duration,
}

impl Default for DegradationConfig {
    fn default() -> Self {
        Self {
            error_threshold: 5,
            window: Duration::from_secs(60),
            degradation_timeout: Duration::from_secs(300),
        }
    }
}

impl DegradationConfig {
    /// Trips quickly, for tests
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            error_threshold: 2,
            window: Duration::from_secs(10),
            degradation_timeout: Duration::from_secs(30),
        }
    }
}

/// Health snapshot of one guarded operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHealth {
    pub operation: String,
    /// Failures inside the current window
    pub error_count: u32,
    pub last_error_at: Option<i64>,
    pub degraded: bool,
    pub degraded_until: Option<i64>,
}

struct HealthEntry {
    health: ServiceHealth,
    /// Failure timestamps inside the window, oldest first
    recent: VecDeque<i64>,
}

impl HealthEntry {
    fn new(operation: &str) -> Self {
        Self {
            health: ServiceHealth {
                operation: operation.to_string(),
                error_count: 0,
                last_error_at: None,
                degraded: false,
                degraded_until: None,
            },
            recent: VecDeque::new(),
        }
    }

    fn expired(&self, now: i64) -> bool {
        self.health.degraded && self.health.degraded_until.is_some_and(|until| now >= until)
    }
}

pub struct DegradationController {
    config: DegradationConfig,
    entries: DashMap<String, HealthEntry>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,

    // Metrics
    primary_calls: AtomicU64,
    primary_failures: AtomicU64,
    fallback_calls: AtomicU64,
}

impl DegradationController {
    pub fn new(config: DegradationConfig, clock: Arc<dyn Clock>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            config,
            entries: DashMap::new(),
            clock,
            notifier,
            primary_calls: AtomicU64::new(0),
            primary_failures: AtomicU64::new(0),
            fallback_calls: AtomicU64::new(0),
        }
    }

    /// Run `primary`, or `fallback` if the operation is degraded or the
    /// primary fails with a remote-health error.
    ///
    /// Errors that are not remote-health signals (authorization, validation,
    /// local storage) are returned as-is without touching the counters or
    /// running the fallback.
    pub async fn execute_with_fallback<T, P, PFut, F, FFut>(
        &self,
        operation: &str,
        primary: P,
        fallback: F,
    ) -> Result<T, SyncError>
    where
        P: FnOnce() -> PFut,
        PFut: Future<Output = Result<T, SyncError>>,
        F: FnOnce() -> FFut,
        FFut: Future<Output = Result<T, SyncError>>,
    {
        if self.is_degraded(operation) {
            self.fallback_calls.fetch_add(1, Ordering::Relaxed);
            debug!(operation, "Operation degraded, using fallback");
            crate::metrics::record_guarded_call(operation, "fallback");
            return fallback().await;
        }

        self.primary_calls.fetch_add(1, Ordering::Relaxed);
        match primary().await {
            Ok(value) => {
                crate::metrics::record_guarded_call(operation, "primary_ok");
                Ok(value)
            }
            Err(err) if err.is_remote_health_signal() => {
                self.primary_failures.fetch_add(1, Ordering::Relaxed);
                self.fallback_calls.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_guarded_call(operation, "primary_failed");
                self.record_failure(operation, &err);
                fallback().await
            }
            Err(err) => Err(err),
        }
    }

    /// Whether `operation` is degraded right now. Restores it first if its
    /// deadline has passed.
    pub fn is_degraded(&self, operation: &str) -> bool {
        let now = self.clock.now_millis();
        let expired = match self.entries.get(operation) {
            None => return false,
            Some(entry) if !entry.health.degraded => return false,
            Some(entry) => entry.expired(now),
        };
        if expired {
            self.restore(operation);
            false
        } else {
            true
        }
    }

    fn record_failure(&self, operation: &str, err: &SyncError) {
        let now = self.clock.now_millis();
        let window = self.config.window.as_millis() as i64;

        let tripped_until = {
            let mut entry = self
                .entries
                .entry(operation.to_string())
                .or_insert_with(|| HealthEntry::new(operation));

            while entry.recent.front().is_some_and(|&t| now - t > window) {
                entry.recent.pop_front();
            }
            entry.recent.push_back(now);
            entry.health.error_count = entry.recent.len() as u32;
            entry.health.last_error_at = Some(now);

            debug!(
                operation,
                error = %err,
                error_count = entry.health.error_count,
                "Guarded operation failed"
            );

            if !entry.health.degraded && entry.health.error_count >= self.config.error_threshold {
                let until = now + self.config.degradation_timeout.as_millis() as i64;
                entry.health.degraded = true;
                entry.health.degraded_until = Some(until);
                Some(until)
            } else {
                None
            }
        };

        if let Some(until) = tripped_until {
            warn!(
                operation,
                threshold = self.config.error_threshold,
                until,
                "Error threshold reached, operation degraded"
            );
            crate::metrics::set_degraded(operation, true);
            self.notifier.notify(Notification::Degraded {
                operation: operation.to_string(),
                until,
            });
        }
    }

    fn restore(&self, operation: &str) {
        if self.entries.remove(operation).is_some() {
            info!(operation, "Degradation timeout elapsed, operation restored");
            crate::metrics::set_degraded(operation, false);
            self.notifier.notify(Notification::Restored {
                operation: operation.to_string(),
            });
        }
    }

    /// Restore every operation whose deadline has passed. Returns their names.
    pub fn restore_expired(&self) -> Vec<String> {
        let now = self.clock.now_millis();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.value().expired(now))
            .map(|e| e.key().clone())
            .collect();
        for op in &expired {
            self.restore(op);
        }
        expired
    }

    #[must_use]
    pub fn health(&self, operation: &str) -> Option<ServiceHealth> {
        self.entries.get(operation).map(|e| e.health.clone())
    }

    #[must_use]
    pub fn degraded_operations(&self) -> Vec<ServiceHealth> {
        let mut out: Vec<ServiceHealth> = self
            .entries
            .iter()
            .filter(|e| e.value().health.degraded)
            .map(|e| e.value().health.clone())
            .collect();
        out.sort_by(|a, b| a.operation.cmp(&b.operation));
        out
    }

    #[must_use]
    pub fn primary_calls(&self) -> u64 {
        self.primary_calls.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn primary_failures(&self) -> u64 {
        self.primary_failures.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn fallback_calls(&self) -> u64 {
        self.fallback_calls.load(Ordering::Relaxed)
    }
}

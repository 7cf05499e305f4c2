// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Offline queue and retry engine.
//!
//! Operations that could not reach the remote store while the device was
//! offline are parked here and replayed later by name through registered
//! [`OperationHandler`]s.
//!
//! # Replay rules
//!
//! - [`OfflineQueue::process_queue`] runs on every offline → online edge and
//!   on a safety-net timer. Only one run is active at a time.
//! - Success removes the operation.
//! - A retryable failure bumps `retry_count` and schedules the next attempt
//!   `base * 2^(retry_count - 1)` later. A failure that would push
//!   `retry_count` past the configured maximum drops the operation for good,
//!   so it gets at most `max_retries + 1` attempts.
//! - A non-retryable failure (authorization, validation) drops it at once.
//! - The queue is bounded; enqueueing past capacity drops the oldest entry.
//!
//! Every drop is logged at `error`, counted, kept in a short history for the
//! health view and sent to the [`Notifier`].
//!
//! ```text
//! enqueue ──► [op₁ op₂ op₃ …] ──► handler(op) ──► Ok ──► removed
//!                   ▲                   │
//!                   │                   ├─ retryable ──► retry_count += 1, back off
//!                   └───────────────────┘                  (dropped once exhausted)
//!                                       └─ rejected ───► dropped
//! ```

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::journal::QueueJournal;
use super::retry::RetryConfig;
use crate::clock::Clock;
use crate::connectivity::Connectivity;
use crate::error::SyncError;
use crate::notify::{DropReason, Notification, Notifier};
use crate::storage::traits::StorageError;

/// How many dropped operations the health view remembers.
pub const RECENT_DROPS_LIMIT: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedOperation {
    pub id: Uuid,
    pub operation_name: String,
    pub payload: Value,
    pub enqueued_at: i64,
    pub retry_count: u32,
    /// Not attempted before this instant (epoch millis)
    pub next_attempt_at: i64,
}

impl QueuedOperation {
    pub fn new(operation_name: impl Into<String>, payload: Value, now: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            operation_name: operation_name.into(),
            payload,
            enqueued_at: now,
            retry_count: 0,
            next_attempt_at: now,
        }
    }
}

/// A permanently dropped operation, kept for the health view.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DroppedOperation {
    pub operation_name: String,
    pub payload: Value,
    pub reason: DropReason,
    pub retry_count: u32,
    pub dropped_at: i64,
}

/// Replays one named operation.
#[async_trait]
pub trait OperationHandler: Send + Sync {
    async fn execute(&self, payload: &Value) -> Result<(), SyncError>;
}

/// Result of one [`OfflineQueue::process_queue`] run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueRunReport {
    pub succeeded: usize,
    /// Failed attempts that were scheduled for another try
    pub retried: usize,
    pub dropped: usize,
    pub remaining: usize,
    /// Another run was already in progress; nothing was done
    pub already_running: bool,
}

/// Point-in-time view for health reporting.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub depth: usize,
    pub capacity: usize,
    pub dropped_total: u64,
    pub recent_drops: Vec<DroppedOperation>,
    pub processing: bool,
}

pub struct OfflineQueue {
    ops: Mutex<VecDeque<QueuedOperation>>,
    handlers: DashMap<String, Arc<dyn OperationHandler>>,
    journal: Option<QueueJournal>,
    retry: RetryConfig,
    capacity: usize,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    connectivity: Arc<Connectivity>,
    processing: AtomicBool,
    recent_drops: Mutex<VecDeque<DroppedOperation>>,
    dropped_total: AtomicU64,
}

/// Clears the processing flag however the run ends.
struct ProcessGuard<'a>(&'a AtomicBool);

impl Drop for ProcessGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl OfflineQueue {
    pub fn new(
        retry: RetryConfig,
        capacity: usize,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        connectivity: Arc<Connectivity>,
    ) -> Self {
        Self {
            ops: Mutex::new(VecDeque::new()),
            handlers: DashMap::new(),
            journal: None,
            retry,
            capacity: capacity.max(1),
            clock,
            notifier,
            connectivity,
            processing: AtomicBool::new(false),
            recent_drops: Mutex::new(VecDeque::new()),
            dropped_total: AtomicU64::new(0),
        }
    }

    /// Persist the queue through `journal`, first loading whatever a previous
    /// run left behind. Restored operations past capacity are dropped oldest
    /// first, the same as an overflowing enqueue.
    pub async fn with_journal(mut self, journal: QueueJournal) -> Result<Self, StorageError> {
        let restored = journal.load_all().await?;
        if !restored.is_empty() {
            warn!(
                pending = restored.len(),
                path = journal.path(),
                "Offline queue has operations from previous run, will replay"
            );
        }
        self.journal = Some(journal);

        let overflow = {
            let mut ops = self.ops.lock();
            ops.extend(restored);
            let excess = ops.len().saturating_sub(self.capacity);
            let overflow: Vec<QueuedOperation> = ops.drain(..excess).collect();
            crate::metrics::set_queue_depth(ops.len());
            overflow
        };
        for oldest in overflow {
            self.record_drop(oldest, DropReason::QueueOverflow).await;
        }
        Ok(self)
    }

    pub fn register_handler(&self, operation_name: impl Into<String>, handler: Arc<dyn OperationHandler>) {
        self.handlers.insert(operation_name.into(), handler);
    }

    /// Park an operation for later replay. An identical operation already in
    /// the queue is reused rather than duplicated. Returns the queued id.
    pub async fn enqueue(&self, operation_name: &str, payload: Value) -> Uuid {
        let now = self.clock.now_millis();
        let (op, overflow) = {
            let mut ops = self.ops.lock();
            if let Some(existing) = ops
                .iter()
                .find(|o| o.operation_name == operation_name && o.payload == payload)
            {
                debug!(operation = operation_name, id = %existing.id, "Operation already queued");
                return existing.id;
            }

            let mut overflow = Vec::new();
            while ops.len() >= self.capacity {
                match ops.pop_front() {
                    Some(oldest) => overflow.push(oldest),
                    None => break,
                }
            }
            let op = QueuedOperation::new(operation_name, payload, now);
            ops.push_back(op.clone());
            crate::metrics::set_queue_depth(ops.len());
            (op, overflow)
        };

        info!(operation = operation_name, id = %op.id, "Operation queued for replay");
        crate::metrics::record_queue_event("enqueued");

        for oldest in overflow {
            self.record_drop(oldest, DropReason::QueueOverflow).await;
        }
        self.journal_upsert(&op).await;
        op.id
    }

    /// Replay queued operations until the queue is empty or the device goes
    /// offline. Waits (on the injected clock) for operations whose backoff
    /// has not elapsed yet.
    pub async fn process_queue(&self) -> QueueRunReport {
        if self.processing.swap(true, Ordering::AcqRel) {
            debug!("Queue replay already running");
            return QueueRunReport {
                already_running: true,
                remaining: self.len(),
                ..Default::default()
            };
        }
        let _guard = ProcessGuard(&self.processing);
        let mut report = QueueRunReport::default();

        loop {
            if !self.connectivity.is_online() {
                debug!("Offline, pausing queue replay");
                break;
            }

            let now = self.clock.now_millis();
            let next = {
                let ops = self.ops.lock();
                match ops.iter().find(|o| o.next_attempt_at <= now) {
                    Some(due) => Next::Due(due.clone()),
                    None => match ops.iter().map(|o| o.next_attempt_at).min() {
                        Some(earliest) => Next::Wait(earliest - now),
                        None => Next::Empty,
                    },
                }
            };

            match next {
                Next::Empty => break,
                Next::Wait(millis) => {
                    self.clock.sleep(Duration::from_millis(millis.max(0) as u64)).await;
                }
                Next::Due(op) => self.attempt(op, &mut report).await,
            }
        }

        report.remaining = self.len();
        if report.succeeded + report.retried + report.dropped > 0 {
            info!(
                succeeded = report.succeeded,
                retried = report.retried,
                dropped = report.dropped,
                remaining = report.remaining,
                "Queue replay finished"
            );
        }
        report
    }

    async fn attempt(&self, op: QueuedOperation, report: &mut QueueRunReport) {
        let handler = self.handlers.get(&op.operation_name).map(|h| Arc::clone(h.value()));
        let Some(handler) = handler else {
            warn!(operation = %op.operation_name, "No handler registered for queued operation");
            if let Some(op) = self.take(&op.id) {
                self.record_drop(op, DropReason::NoHandler).await;
                report.dropped += 1;
            }
            return;
        };

        match handler.execute(&op.payload).await {
            Ok(()) => {
                if self.take(&op.id).is_some() {
                    self.journal_remove(&op.id).await;
                }
                debug!(operation = %op.operation_name, id = %op.id, "Queued operation replayed");
                crate::metrics::record_queue_event("replayed");
                report.succeeded += 1;
            }
            Err(e) if e.is_retryable() => {
                let retry_count = op.retry_count + 1;
                if self.retry.exhausted(retry_count) {
                    // retry_count on the dropped op stays at the retries actually made
                    if let Some(op) = self.take(&op.id) {
                        self.record_drop(op, DropReason::RetriesExhausted).await;
                        report.dropped += 1;
                    }
                    return;
                }

                let delay = self.retry.delay_for(retry_count);
                let next_attempt_at = self.clock.now_millis() + delay.as_millis() as i64;
                let updated = {
                    let mut ops = self.ops.lock();
                    ops.iter_mut().find(|o| o.id == op.id).map(|o| {
                        o.retry_count = retry_count;
                        o.next_attempt_at = next_attempt_at;
                        o.clone()
                    })
                };
                warn!(
                    operation = %op.operation_name,
                    retry_count,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Queued operation failed, backing off"
                );
                crate::metrics::record_queue_event("retried");
                report.retried += 1;
                if let Some(updated) = updated {
                    self.journal_upsert(&updated).await;
                }
            }
            Err(e) => {
                warn!(operation = %op.operation_name, error = %e, "Queued operation rejected");
                if let Some(op) = self.take(&op.id) {
                    self.record_drop(op, DropReason::Rejected).await;
                    report.dropped += 1;
                }
            }
        }
    }

    fn take(&self, id: &Uuid) -> Option<QueuedOperation> {
        let mut ops = self.ops.lock();
        let pos = ops.iter().position(|o| o.id == *id)?;
        let op = ops.remove(pos);
        crate::metrics::set_queue_depth(ops.len());
        op
    }

    async fn record_drop(&self, op: QueuedOperation, reason: DropReason) {
        error!(
            operation = %op.operation_name,
            id = %op.id,
            retry_count = op.retry_count,
            reason = reason.as_str(),
            payload = %op.payload,
            "Queued operation permanently dropped"
        );
        crate::metrics::record_queue_drop(&op.operation_name, reason.as_str());
        self.dropped_total.fetch_add(1, Ordering::Relaxed);

        {
            let mut recent = self.recent_drops.lock();
            if recent.len() >= RECENT_DROPS_LIMIT {
                recent.pop_front();
            }
            recent.push_back(DroppedOperation {
                operation_name: op.operation_name.clone(),
                payload: op.payload.clone(),
                reason,
                retry_count: op.retry_count,
                dropped_at: self.clock.now_millis(),
            });
        }

        self.notifier.notify(Notification::OperationDropped {
            operation: op.operation_name.clone(),
            reason,
            retry_count: op.retry_count,
        });
        self.journal_remove(&op.id).await;
    }

    async fn journal_upsert(&self, op: &QueuedOperation) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.upsert(op).await {
                warn!(id = %op.id, error = %e, "Failed to journal queued operation");
                crate::metrics::record_error("offline_queue", "journal_upsert", "backend");
            }
        }
    }

    async fn journal_remove(&self, id: &Uuid) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.remove(id).await {
                warn!(id = %id, error = %e, "Failed to remove queued operation from journal");
                crate::metrics::record_error("offline_queue", "journal_remove", "backend");
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.lock().is_empty()
    }

    /// Snapshot of the queued operations, oldest first.
    #[must_use]
    pub fn pending(&self) -> Vec<QueuedOperation> {
        self.ops.lock().iter().cloned().collect()
    }

    #[must_use]
    pub fn dropped_total(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn recent_drops(&self) -> Vec<DroppedOperation> {
        self.recent_drops.lock().iter().cloned().collect()
    }

    #[must_use]
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            depth: self.len(),
            capacity: self.capacity,
            dropped_total: self.dropped_total(),
            recent_drops: self.recent_drops(),
            processing: self.processing.load(Ordering::Acquire),
        }
    }
}

enum Next {
    Due(QueuedOperation),
    Wait(i64),
    Empty,
}

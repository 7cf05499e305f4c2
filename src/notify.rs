// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Operator-facing notifications.
//!
//! The engine emits a [`Notification`] whenever something a person should
//! know about happens: a remote-dependent feature degrades or recovers, a
//! queued operation is dropped for good, or a pending change needs someone
//! with the right permission. Delivery (toast, badge, push) is the
//! embedder's job.

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::sync_record::EntityKind;

/// Why a queued operation was removed without succeeding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    RetriesExhausted,
    QueueOverflow,
    /// Replay failed with a non-retryable error
    Rejected,
    NoHandler,
}

impl DropReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RetriesExhausted => "retries_exhausted",
            Self::QueueOverflow => "queue_overflow",
            Self::Rejected => "rejected",
            Self::NoHandler => "no_handler",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    Degraded { operation: String, until: i64 },
    Restored { operation: String },
    OperationDropped {
        operation: String,
        reason: DropReason,
        retry_count: u32,
    },
    NeedsAttention {
        kind: EntityKind,
        pending: usize,
        reason: String,
    },
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Writes notifications to the log and nowhere else.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notification: Notification) {
        match &notification {
            Notification::Degraded { operation, until } => {
                warn!(operation = %operation, until, "Operation degraded")
            }
            Notification::Restored { operation } => {
                info!(operation = %operation, "Operation restored")
            }
            Notification::OperationDropped { operation, reason, retry_count } => error!(
                operation = %operation,
                reason = reason.as_str(),
                retry_count,
                "Queued operation permanently dropped"
            ),
            Notification::NeedsAttention { kind, pending, reason } => {
                warn!(kind = %kind, pending, reason = %reason, "Pending changes need attention")
            }
        }
    }
}

/// Fans notifications out to any number of subscribers.
pub struct BroadcastNotifier {
    tx: broadcast::Sender<Notification>,
}

impl BroadcastNotifier {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

impl Notifier for BroadcastNotifier {
    fn notify(&self, notification: Notification) {
        // No subscribers is fine
        let _ = self.tx.send(notification);
    }
}

/// Keeps every notification in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    seen: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn notifications(&self) -> Vec<Notification> {
        self.seen.lock().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.seen.lock().push(notification);
    }
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error taxonomy for the sync engine.
//!
//! Remote failures are absorbed by the degradation controller and the
//! offline queue, so most of these never reach business code. The
//! exceptions are [`SyncError::Authorization`] and [`SyncError::Validation`],
//! which are local rejections surfaced to the caller.

use thiserror::Error;

use crate::storage::traits::{RemoteError, StorageError};

#[derive(Error, Debug)]
pub enum SyncError {
    /// Network-level failure talking to the remote store. Retryable.
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    /// Caller lacks the permission, or the remote rejected our credentials.
    /// Not retryable until re-authentication.
    #[error("not authorized: {0}")]
    Authorization(String),

    /// The change is malformed or illegal for its entity kind. Never queued.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Local persistence failed. Fatal to the current operation, but not a
    /// remote-health signal.
    #[error("local storage error: {0}")]
    LocalStorage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A reconcile pass is already in flight on this device.
    #[error("already syncing")]
    AlreadySyncing,

    /// The fallback path for a degraded operation declined to produce a value.
    #[error("operation '{0}' is degraded")]
    Degraded(String),
}

impl SyncError {
    /// Whether backoff or the offline queue can help.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientNetwork(_))
    }

    /// Whether this failure says something about remote health and should
    /// count toward tripping a circuit.
    #[must_use]
    pub fn is_remote_health_signal(&self) -> bool {
        matches!(self, Self::TransientNetwork(_))
    }

    /// Short label for metrics.
    #[must_use]
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::TransientNetwork(_) => "transient_network",
            Self::Authorization(_) => "authorization",
            Self::Validation(_) => "validation",
            Self::LocalStorage(_) => "local_storage",
            Self::Serialization(_) => "serialization",
            Self::AlreadySyncing => "already_syncing",
            Self::Degraded(_) => "degraded",
        }
    }
}

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Unavailable(msg) => Self::TransientNetwork(msg),
            RemoteError::Timeout => Self::TransientNetwork("remote call timed out".into()),
            RemoteError::Unauthorized(msg) => Self::Authorization(msg),
            RemoteError::Rejected(msg) => Self::Validation(msg),
        }
    }
}

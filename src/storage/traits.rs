// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Adapter traits for the local and remote stores.
//!
//! The engine never talks to a concrete database or wire protocol. Embedders
//! supply a [`LocalStore`] (durable, per-device) and a [`RemoteStore`]
//! (shared, reached over an unreliable network, scoped to the signed-in
//! business).

use async_trait::async_trait;
use thiserror::Error;

use crate::sync_record::{EntityKind, SyncCheckpoint, SyncRecord};
use crate::team::presence::PresenceRecord;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("record not found: {kind}/{id}")]
    NotFound { kind: EntityKind, id: String },
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("corrupt record '{id}': {reason}")]
    Corruption { id: String, reason: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("remote unavailable: {0}")]
    Unavailable(String),
    #[error("remote call timed out")]
    Timeout,
    #[error("remote rejected credentials: {0}")]
    Unauthorized(String),
    #[error("remote rejected record: {0}")]
    Rejected(String),
}

/// Filter passed to [`LocalStore::query`].
pub type RecordPredicate<'a> = &'a (dyn Fn(&SyncRecord) -> bool + Send + Sync);

/// Durable keyed storage, one namespace per entity kind.
///
/// Assumed safe for use from one process but not transactional across keys.
#[async_trait]
pub trait LocalStore: Send + Sync {
    async fn get(&self, kind: EntityKind, id: &str) -> Result<Option<SyncRecord>, StorageError>;

    /// Insert or overwrite by `(record.kind, record.id)`.
    async fn put(&self, record: &SyncRecord) -> Result<(), StorageError>;

    /// Soft delete: set the tombstone, keep the record and its metadata.
    async fn delete(&self, kind: EntityKind, id: &str) -> Result<(), StorageError> {
        let mut record = self
            .get(kind, id)
            .await?
            .ok_or_else(|| StorageError::NotFound { kind, id: id.to_string() })?;
        record.meta.is_deleted = true;
        self.put(&record).await
    }

    async fn query(
        &self,
        kind: EntityKind,
        predicate: RecordPredicate<'_>,
    ) -> Result<Vec<SyncRecord>, StorageError>;

    /// Stored checkpoint for `kind`, or the initial one if none was saved.
    async fn load_checkpoint(&self, kind: EntityKind) -> Result<SyncCheckpoint, StorageError>;

    async fn save_checkpoint(&self, checkpoint: &SyncCheckpoint) -> Result<(), StorageError>;
}

/// Shared remote collections, one per entity kind.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Store `record` under `id`, overwriting any existing copy.
    ///
    /// Returns the `updated_at` the remote assigned to the stored copy. This
    /// stamp is what later shows up in [`RemoteStore::query_changed_since`].
    async fn put(&self, kind: EntityKind, id: &str, record: &SyncRecord) -> Result<i64, RemoteError>;

    /// Records with `updated_at > since`, or every record when `since` is `None`.
    async fn query_changed_since(
        &self,
        kind: EntityKind,
        since: Option<i64>,
    ) -> Result<Vec<SyncRecord>, RemoteError>;

    /// Best-effort presence write. Latest write wins, no merge.
    async fn put_presence(&self, presence: &PresenceRecord) -> Result<(), RemoteError>;
}

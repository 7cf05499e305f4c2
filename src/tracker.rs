// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Change tracking.
//!
//! The [`ChangeTracker`] is the only component that writes sync metadata to
//! the local store. Every local write it makes is serialized behind one
//! async lock, so a read-modify-write of one record (stamping, the
//! compare-and-set in [`ChangeTracker::mark_synced`], merging a remote copy)
//! cannot interleave with another. It never touches the network.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::clock::Clock;
use crate::error::SyncError;
use crate::resolver::{ConflictResolver, Resolution};
use crate::storage::traits::{LocalStore, StorageError};
use crate::sync_record::{EntityKind, SyncMetadata, SyncRecord};

pub struct ChangeTracker {
    local: Arc<dyn LocalStore>,
    clock: Arc<dyn Clock>,
    device_id: String,
    /// Last stamp handed out; keeps local `updated_at` monotonic
    last_stamp: AtomicI64,
    write_lock: Mutex<()>,
}

impl ChangeTracker {
    pub fn new(local: Arc<dyn LocalStore>, clock: Arc<dyn Clock>, device_id: impl Into<String>) -> Self {
        Self {
            local,
            clock,
            device_id: device_id.into(),
            last_stamp: AtomicI64::new(i64::MIN),
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Next stamp: wall clock, but strictly after both the previous stamp on
    /// this device and `floor`.
    fn next_stamp(&self, floor: i64) -> i64 {
        let now = self.clock.now_millis();
        let mut prev = self.last_stamp.load(Ordering::Acquire);
        loop {
            let stamp = now.max(prev.saturating_add(1)).max(floor.saturating_add(1));
            match self
                .last_stamp
                .compare_exchange(prev, stamp, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return stamp,
                Err(actual) => prev = actual,
            }
        }
    }

    fn stamp(&self, meta: &mut SyncMetadata, floor: i64) {
        meta.updated_at = self.next_stamp(floor);
        meta.device_id = self.device_id.clone();
        meta.is_synced = false;
    }

    /// Commit a local change to `record` and flag it dirty in the same write.
    ///
    /// Refreshes `updated_at` and `device_id`. Existing records keep their
    /// original `created_at`; immutable kinds can only be inserted once.
    pub async fn mark_dirty(&self, record: &mut SyncRecord) -> Result<(), SyncError> {
        let _w = self.write_lock.lock().await;
        let existing = self.local.get(record.kind, &record.meta.id).await?;

        let floor = match &existing {
            Some(prev) if record.kind.is_immutable() => {
                return Err(SyncError::Validation(format!(
                    "{} '{}' is immutable and already exists",
                    record.kind, prev.meta.id
                )));
            }
            Some(prev) => {
                record.meta.created_at = prev.meta.created_at;
                prev.meta.updated_at
            }
            None => i64::MIN,
        };

        self.stamp(&mut record.meta, floor);
        if existing.is_none() {
            record.meta.created_at = record.meta.updated_at;
        }
        self.local.put(record).await?;

        debug!(
            kind = %record.kind,
            id = %record.meta.id,
            updated_at = record.meta.updated_at,
            "Record marked dirty"
        );
        Ok(())
    }

    /// Tombstone a record and flag it dirty so the deletion propagates.
    pub async fn soft_delete(&self, kind: EntityKind, id: &str) -> Result<SyncRecord, SyncError> {
        if kind.is_immutable() {
            return Err(SyncError::Validation(format!("{kind} records cannot be deleted")));
        }
        let _w = self.write_lock.lock().await;

        self.local.delete(kind, id).await?;
        let mut record = self
            .local
            .get(kind, id)
            .await?
            .ok_or_else(|| StorageError::NotFound { kind, id: id.to_string() })?;
        let floor = record.meta.updated_at;
        self.stamp(&mut record.meta, floor);
        self.local.put(&record).await?;

        debug!(kind = %kind, id, "Record tombstoned");
        Ok(record)
    }

    /// Flag a record synced, but only if it has not changed since
    /// `uploaded_version` (its `updated_at` when the upload began).
    ///
    /// Returns false when the record moved on or vanished; it stays dirty
    /// and the next upload phase sends the newer version.
    pub async fn mark_synced(
        &self,
        kind: EntityKind,
        id: &str,
        uploaded_version: i64,
    ) -> Result<bool, SyncError> {
        let _w = self.write_lock.lock().await;
        let Some(mut record) = self.local.get(kind, id).await? else {
            return Ok(false);
        };

        if record.meta.updated_at != uploaded_version {
            debug!(
                kind = %kind,
                id,
                uploaded_version,
                current = record.meta.updated_at,
                "Record changed during upload, leaving dirty"
            );
            return Ok(false);
        }
        if !record.meta.is_synced {
            record.meta.is_synced = true;
            self.local.put(&record).await?;
        }
        Ok(true)
    }

    /// Keep a local edit that landed while its previous version was being
    /// uploaded ahead of that upload's echo.
    ///
    /// The remote stamps the stored copy with `remote_updated_at`, which can
    /// be later than the edit's own `updated_at`. Left alone, the next
    /// download would see the echo as newer and overwrite the edit. If the
    /// record is still dirty and not after `remote_updated_at`, it is
    /// re-stamped past it. Returns whether the record was re-stamped.
    pub async fn supersede_echo(
        &self,
        kind: EntityKind,
        id: &str,
        remote_updated_at: i64,
    ) -> Result<bool, SyncError> {
        let _w = self.write_lock.lock().await;
        let Some(mut record) = self.local.get(kind, id).await? else {
            return Ok(false);
        };
        if record.meta.is_synced || record.meta.updated_at > remote_updated_at {
            return Ok(false);
        }

        let before = record.meta.updated_at;
        self.stamp(&mut record.meta, remote_updated_at);
        self.local.put(&record).await?;
        debug!(
            kind = %kind,
            id,
            before,
            updated_at = record.meta.updated_at,
            remote_updated_at,
            "Re-stamped edit past its upload echo"
        );
        Ok(true)
    }

    /// All records of `kind` that are ahead of the remote copy.
    pub async fn dirty_records(&self, kind: EntityKind) -> Result<Vec<SyncRecord>, SyncError> {
        Ok(self
            .local
            .query(kind, &|r: &SyncRecord| !r.meta.is_synced)
            .await?)
    }

    /// Resolve `remote` against the current local copy and apply the result,
    /// all under the write lock.
    pub async fn merge_remote(
        &self,
        mut remote: SyncRecord,
        resolver: &ConflictResolver,
    ) -> Result<Resolution, SyncError> {
        let _w = self.write_lock.lock().await;
        let local = self.local.get(remote.kind, &remote.meta.id).await?;
        let resolution = resolver.resolve(remote.kind, local.as_ref(), &remote);

        if resolution.applies_remote() {
            remote.meta.is_synced = true;
            self.local.put(&remote).await?;
        }
        Ok(resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::memory::InMemoryLocalStore;
    use serde_json::json;
    use std::time::Duration;

    fn tracker() -> (ChangeTracker, Arc<InMemoryLocalStore>, Arc<ManualClock>) {
        let local = Arc::new(InMemoryLocalStore::new());
        let clock = Arc::new(ManualClock::new(1_000));
        (ChangeTracker::new(local.clone(), clock.clone(), "dev-a"), local, clock)
    }

    fn item(id: &str, price: i64) -> SyncRecord {
        SyncRecord::new(EntityKind::CatalogItem, id, json!({"price": price}), "someone-else", 0)
    }

    #[tokio::test]
    async fn test_mark_dirty_stamps_and_persists() {
        let (t, local, _) = tracker();
        let mut rec = item("p1", 100);
        rec.meta.is_synced = true;

        t.mark_dirty(&mut rec).await.unwrap();

        let stored = local.get(EntityKind::CatalogItem, "p1").await.unwrap().unwrap();
        assert!(!stored.meta.is_synced);
        assert_eq!(stored.meta.device_id, "dev-a");
        assert_eq!(stored.meta.updated_at, 1_000);
        assert_eq!(stored.meta.created_at, 1_000);
    }

    #[tokio::test]
    async fn test_stamps_are_monotonic_even_if_clock_stalls() {
        let (t, _, _) = tracker();
        let mut rec = item("p1", 1);
        t.mark_dirty(&mut rec).await.unwrap();
        let first = rec.meta.updated_at;

        rec.fields = json!({"price": 2});
        t.mark_dirty(&mut rec).await.unwrap();

        assert!(rec.meta.updated_at > first);
        assert_eq!(rec.meta.created_at, first);
    }

    #[tokio::test]
    async fn test_immutable_insert_only() {
        let (t, _, _) = tracker();
        let mut sale = SyncRecord::new(EntityKind::SaleTransaction, "t-1", json!({}), "dev-a", 0);
        t.mark_dirty(&mut sale).await.unwrap();

        let mut again = sale.clone();
        assert!(matches!(t.mark_dirty(&mut again).await, Err(SyncError::Validation(_))));
        assert!(matches!(
            t.soft_delete(EntityKind::SaleTransaction, "t-1").await,
            Err(SyncError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_mark_synced_compare_and_set() {
        let (t, local, clock) = tracker();
        let mut rec = item("p1", 1);
        t.mark_dirty(&mut rec).await.unwrap();
        let uploaded_version = rec.meta.updated_at;

        // Edit lands while the upload is in flight
        clock.advance(Duration::from_millis(5));
        rec.fields = json!({"price": 2});
        t.mark_dirty(&mut rec).await.unwrap();

        assert!(!t.mark_synced(EntityKind::CatalogItem, "p1", uploaded_version).await.unwrap());
        let stored = local.get(EntityKind::CatalogItem, "p1").await.unwrap().unwrap();
        assert!(!stored.meta.is_synced);

        assert!(t.mark_synced(EntityKind::CatalogItem, "p1", rec.meta.updated_at).await.unwrap());
        assert!(t.dirty_records(EntityKind::CatalogItem).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_supersede_echo_restamps_edit_behind_remote_stamp() {
        let (t, local, clock) = tracker();
        let resolver = ConflictResolver::default();
        let mut rec = item("p1", 100);
        t.mark_dirty(&mut rec).await.unwrap();
        let uploaded_version = rec.meta.updated_at;

        // Edit lands mid-upload, then the remote stamps the old copy later
        clock.advance(Duration::from_millis(1));
        rec.fields = json!({"price": 999});
        t.mark_dirty(&mut rec).await.unwrap();
        let remote_updated_at = rec.meta.updated_at + 3;

        assert!(!t.mark_synced(EntityKind::CatalogItem, "p1", uploaded_version).await.unwrap());
        assert!(t.supersede_echo(EntityKind::CatalogItem, "p1", remote_updated_at).await.unwrap());

        let stored = local.get(EntityKind::CatalogItem, "p1").await.unwrap().unwrap();
        assert!(stored.meta.updated_at > remote_updated_at);
        assert!(!stored.meta.is_synced);

        // The echo of the old copy no longer wins
        let mut echo = item("p1", 100);
        echo.meta.updated_at = remote_updated_at;
        echo.meta.is_synced = true;
        assert_eq!(t.merge_remote(echo, &resolver).await.unwrap(), Resolution::KeepLocal);
        let stored = local.get(EntityKind::CatalogItem, "p1").await.unwrap().unwrap();
        assert_eq!(stored.fields["price"], 999);
    }

    #[tokio::test]
    async fn test_supersede_echo_leaves_newer_or_synced_records() {
        let (t, _, _) = tracker();
        let mut rec = item("p1", 1);
        t.mark_dirty(&mut rec).await.unwrap();

        // Already after the remote stamp
        assert!(!t
            .supersede_echo(EntityKind::CatalogItem, "p1", rec.meta.updated_at - 1)
            .await
            .unwrap());

        t.mark_synced(EntityKind::CatalogItem, "p1", rec.meta.updated_at).await.unwrap();
        assert!(!t
            .supersede_echo(EntityKind::CatalogItem, "p1", rec.meta.updated_at + 10)
            .await
            .unwrap());
        assert!(!t.supersede_echo(EntityKind::Party, "missing", 0).await.unwrap());
    }

    #[tokio::test]
    async fn test_mark_synced_missing_record() {
        let (t, _, _) = tracker();
        assert!(!t.mark_synced(EntityKind::Party, "nope", 0).await.unwrap());
    }

    #[tokio::test]
    async fn test_soft_delete_marks_tombstone_dirty() {
        let (t, local, clock) = tracker();
        let mut rec = item("p1", 1);
        t.mark_dirty(&mut rec).await.unwrap();
        t.mark_synced(EntityKind::CatalogItem, "p1", rec.meta.updated_at).await.unwrap();

        clock.advance(Duration::from_secs(1));
        let deleted = t.soft_delete(EntityKind::CatalogItem, "p1").await.unwrap();

        assert!(deleted.meta.is_deleted);
        assert!(!deleted.meta.is_synced);
        assert_eq!(deleted.meta.updated_at, 2_000);
        assert_eq!(local.get(EntityKind::CatalogItem, "p1").await.unwrap().unwrap(), deleted);
    }

    #[tokio::test]
    async fn test_merge_remote_applies_resolution() {
        let (t, local, _) = tracker();
        let resolver = ConflictResolver::default();
        let mut rec = item("p1", 1);
        t.mark_dirty(&mut rec).await.unwrap();

        let mut older = item("p1", 50);
        older.meta.updated_at = 500;
        assert_eq!(t.merge_remote(older, &resolver).await.unwrap(), Resolution::KeepLocal);

        let mut newer = item("p1", 99);
        newer.meta.updated_at = 5_000;
        assert_eq!(
            t.merge_remote(newer, &resolver).await.unwrap(),
            Resolution::ReplaceWithRemote
        );
        let stored = local.get(EntityKind::CatalogItem, "p1").await.unwrap().unwrap();
        assert_eq!(stored.fields["price"], 99);
        assert!(stored.meta.is_synced);
    }
}

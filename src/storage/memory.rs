// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory adapters.
//!
//! Used by tests and by embedders that want a scratch engine. The remote
//! variant stamps every accepted write with its own clock, the way a real
//! document store assigns server timestamps.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::traits::{LocalStore, RecordPredicate, RemoteError, RemoteStore, StorageError};
use crate::clock::Clock;
use crate::sync_record::{EntityKind, SyncCheckpoint, SyncRecord};
use crate::team::presence::PresenceRecord;

type RecordKey = (EntityKind, String);

pub struct InMemoryLocalStore {
    data: DashMap<RecordKey, SyncRecord>,
    checkpoints: DashMap<EntityKind, SyncCheckpoint>,
}

impl InMemoryLocalStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
            checkpoints: DashMap::new(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Default for InMemoryLocalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LocalStore for InMemoryLocalStore {
    async fn get(&self, kind: EntityKind, id: &str) -> Result<Option<SyncRecord>, StorageError> {
        Ok(self.data.get(&(kind, id.to_string())).map(|r| r.value().clone()))
    }

    async fn put(&self, record: &SyncRecord) -> Result<(), StorageError> {
        self.data
            .insert((record.kind, record.meta.id.clone()), record.clone());
        Ok(())
    }

    async fn query(
        &self,
        kind: EntityKind,
        predicate: RecordPredicate<'_>,
    ) -> Result<Vec<SyncRecord>, StorageError> {
        let mut out: Vec<SyncRecord> = self
            .data
            .iter()
            .filter(|e| e.key().0 == kind && predicate(e.value()))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by(|a, b| a.meta.id.cmp(&b.meta.id));
        Ok(out)
    }

    async fn load_checkpoint(&self, kind: EntityKind) -> Result<SyncCheckpoint, StorageError> {
        Ok(self
            .checkpoints
            .get(&kind)
            .map(|c| *c.value())
            .unwrap_or_else(|| SyncCheckpoint::initial(kind)))
    }

    async fn save_checkpoint(&self, checkpoint: &SyncCheckpoint) -> Result<(), StorageError> {
        self.checkpoints.insert(checkpoint.kind, *checkpoint);
        Ok(())
    }
}

/// A shared remote store. Clone the `Arc` to give several devices the same
/// backing collections.
pub struct InMemoryRemoteStore {
    data: DashMap<RecordKey, SyncRecord>,
    presence: DashMap<String, PresenceRecord>,
    clock: Arc<dyn Clock>,
    last_stamp: Mutex<i64>,
    puts: AtomicU64,
}

impl InMemoryRemoteStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            data: DashMap::new(),
            presence: DashMap::new(),
            clock,
            last_stamp: Mutex::new(i64::MIN),
            puts: AtomicU64::new(0),
        }
    }

    /// Strictly increasing stamp, never behind the clock.
    fn next_stamp(&self) -> i64 {
        let mut last = self.last_stamp.lock();
        let stamp = self.clock.now_millis().max(last.saturating_add(1));
        *last = stamp;
        stamp
    }

    /// Direct read, bypassing the trait (test assertions).
    #[must_use]
    pub fn record(&self, kind: EntityKind, id: &str) -> Option<SyncRecord> {
        self.data.get(&(kind, id.to_string())).map(|r| r.value().clone())
    }

    #[must_use]
    pub fn presence_of(&self, member_id: &str) -> Option<PresenceRecord> {
        self.presence.get(member_id).map(|p| p.value().clone())
    }

    /// Number of record writes accepted so far.
    #[must_use]
    pub fn put_count(&self) -> u64 {
        self.puts.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn put(&self, kind: EntityKind, id: &str, record: &SyncRecord) -> Result<i64, RemoteError> {
        if record.kind != kind || record.meta.id != id {
            return Err(RemoteError::Rejected(format!(
                "record {}/{} stored under {}/{}",
                record.kind, record.meta.id, kind, id
            )));
        }
        let stamp = self.next_stamp();
        let mut stored = record.clone();
        stored.meta.updated_at = stamp;
        stored.meta.is_synced = true;
        self.data.insert((kind, id.to_string()), stored);
        self.puts.fetch_add(1, Ordering::Relaxed);
        Ok(stamp)
    }

    async fn query_changed_since(
        &self,
        kind: EntityKind,
        since: Option<i64>,
    ) -> Result<Vec<SyncRecord>, RemoteError> {
        let mut out: Vec<SyncRecord> = self
            .data
            .iter()
            .filter(|e| e.key().0 == kind)
            .filter(|e| since.map_or(true, |s| e.value().meta.updated_at > s))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by_key(|r| r.meta.updated_at);
        Ok(out)
    }

    async fn put_presence(&self, presence: &PresenceRecord) -> Result<(), RemoteError> {
        self.presence
            .insert(presence.member_id.clone(), presence.clone());
        Ok(())
    }
}

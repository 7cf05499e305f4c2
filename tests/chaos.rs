// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Chaos Testing for POS Sync
//!
//! Failure scenarios driven by a **FailingRemoteStore** wrapper: precise
//! error injection at specific call counts, a reachability switch for
//! outages, and optional latency to force overlapping work.
//!
//! # Running Chaos Tests
//! ```bash
//! cargo test --test chaos -- --nocapture
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use pos_sync::clock::ManualClock;
use pos_sync::entities::CatalogItem;
use pos_sync::notify::{DropReason, RecordingNotifier};
use pos_sync::storage::{InMemoryLocalStore, InMemoryRemoteStore, LocalStore};
use pos_sync::team::PresenceRecord;
use pos_sync::{
    Adapters, EngineState, EntityKind, Notification, RemoteError, RemoteStore, SyncConfig,
    SyncEngine, SyncError, SyncRecord,
};

// =============================================================================
// Failing Remote Wrapper - Precise Error Injection
// =============================================================================

/// Wraps the shared in-memory remote and injects failures.
pub struct FailingRemoteStore {
    inner: Arc<InMemoryRemoteStore>,
    call_count: AtomicU64,
    /// Fail on these call numbers (1-indexed, counts every trait call)
    fail_on_calls: Vec<u64>,
    /// While false every call fails as unavailable
    reachable: AtomicBool,
    /// While true only downloads fail
    queries_fail: AtomicBool,
    /// Added to every record write
    latency: Duration,
}

impl FailingRemoteStore {
    pub fn new(inner: Arc<InMemoryRemoteStore>, fail_on_calls: Vec<u64>) -> Self {
        Self {
            inner,
            call_count: AtomicU64::new(0),
            fail_on_calls,
            reachable: AtomicBool::new(true),
            queries_fail: AtomicBool::new(false),
            latency: Duration::ZERO,
        }
    }

    pub fn unreachable(inner: Arc<InMemoryRemoteStore>) -> Self {
        let store = Self::new(inner, vec![]);
        store.set_reachable(false);
        store
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn set_queries_fail(&self, fail: bool) {
        self.queries_fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u64 {
        self.call_count.load(Ordering::SeqCst)
    }

    fn maybe_fail(&self) -> Result<(), RemoteError> {
        let count = self.call_count.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("injected outage".into()));
        }
        if self.fail_on_calls.contains(&count) {
            return Err(RemoteError::Timeout);
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for FailingRemoteStore {
    async fn put(&self, kind: EntityKind, id: &str, record: &SyncRecord) -> Result<i64, RemoteError> {
        self.maybe_fail()?;
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.inner.put(kind, id, record).await
    }

    async fn query_changed_since(
        &self,
        kind: EntityKind,
        since: Option<i64>,
    ) -> Result<Vec<SyncRecord>, RemoteError> {
        self.maybe_fail()?;
        if self.queries_fail.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("injected download failure".into()));
        }
        self.inner.query_changed_since(kind, since).await
    }

    async fn put_presence(&self, presence: &PresenceRecord) -> Result<(), RemoteError> {
        self.maybe_fail()?;
        self.inner.put_presence(presence).await
    }
}

// =============================================================================
// Helpers
// =============================================================================

struct Rig {
    engine: SyncEngine,
    local: Arc<InMemoryLocalStore>,
    shared: Arc<InMemoryRemoteStore>,
    remote: Arc<FailingRemoteStore>,
    clock: Arc<ManualClock>,
    notifier: Arc<RecordingNotifier>,
}

async fn rig_with(config: SyncConfig, build: impl FnOnce(Arc<InMemoryRemoteStore>) -> FailingRemoteStore) -> Rig {
    let clock = Arc::new(ManualClock::new(1_000));
    let shared = Arc::new(InMemoryRemoteStore::new(clock.clone()));
    let remote = Arc::new(build(shared.clone()));
    let local = Arc::new(InMemoryLocalStore::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let adapters = Adapters::new(local.clone(), remote.clone())
        .with_clock(clock.clone())
        .with_notifier(notifier.clone());
    let engine = SyncEngine::open(config, adapters).await.expect("open failed");
    Rig {
        engine,
        local,
        shared,
        remote,
        clock,
        notifier,
    }
}

fn config() -> SyncConfig {
    SyncConfig {
        device_id: "till-chaos".into(),
        circuit_error_threshold: 2,
        circuit_window_secs: 60,
        degradation_timeout_secs: 300,
        max_retries: 3,
        retry_base_delay_ms: 100,
        ..Default::default()
    }
}

async fn is_synced(local: &InMemoryLocalStore, id: &str) -> bool {
    local
        .get(EntityKind::CatalogItem, id)
        .await
        .unwrap()
        .is_some_and(|r| r.meta.is_synced)
}

// =============================================================================
// Outages and the offline queue
// =============================================================================

#[tokio::test]
async fn chaos_offline_upload_is_queued_and_replayed() {
    let rig = rig_with(config(), FailingRemoteStore::unreachable).await;
    rig.engine.set_online(false);

    rig.engine.save(&CatalogItem::new("p1", "Espresso", 250)).await.unwrap();
    let report = rig.engine.reconcile(&[EntityKind::CatalogItem], false).await.unwrap();
    let kind = report.kind(EntityKind::CatalogItem).unwrap();
    assert_eq!(kind.queued, 1);
    assert!(!report.is_clean());
    assert_eq!(rig.engine.queue().len(), 1);
    assert!(rig.shared.is_empty());

    // Back online with the remote reachable again
    rig.remote.set_reachable(true);
    rig.engine.set_online(true);
    let run = rig.engine.process_queue().await;

    assert_eq!(run.succeeded, 1);
    assert_eq!(run.remaining, 0);
    assert!(rig.shared.record(EntityKind::CatalogItem, "p1").is_some());
    assert!(is_synced(&rig.local, "p1").await);
}

#[tokio::test]
async fn chaos_replay_sends_latest_local_copy() {
    let rig = rig_with(config(), FailingRemoteStore::unreachable).await;
    rig.engine.set_online(false);

    rig.engine.save(&CatalogItem::new("p1", "Espresso", 250)).await.unwrap();
    rig.engine.reconcile(&[EntityKind::CatalogItem], false).await.unwrap();

    // Edited again after it was queued
    rig.clock.advance(Duration::from_secs(1));
    rig.engine.save(&CatalogItem::new("p1", "Espresso", 275)).await.unwrap();

    rig.remote.set_reachable(true);
    rig.engine.set_online(true);
    rig.engine.process_queue().await;

    let stored = rig.shared.record(EntityKind::CatalogItem, "p1").unwrap();
    assert_eq!(stored.fields["priceCents"], 275);
}

#[tokio::test]
async fn chaos_exhausted_retries_are_reported_not_silent() {
    let rig = rig_with(config(), FailingRemoteStore::unreachable).await;
    rig.engine.set_online(false);

    rig.engine.save(&CatalogItem::new("p1", "Espresso", 250)).await.unwrap();
    rig.engine.reconcile(&[EntityKind::CatalogItem], false).await.unwrap();

    // Online but the remote never recovers
    rig.engine.set_online(true);
    let run = rig.engine.process_queue().await;
    assert_eq!(run.dropped, 1);
    assert_eq!(run.succeeded, 0);
    assert!(rig.engine.queue().is_empty());

    let health = rig.engine.health();
    assert_eq!(health.queue.dropped_total, 1);
    assert_eq!(health.queue.recent_drops.len(), 1);
    assert_eq!(health.queue.recent_drops[0].reason, DropReason::RetriesExhausted);
    assert_eq!(health.queue.recent_drops[0].retry_count, 3);
    assert!(!health.is_healthy());

    assert!(rig.notifier.notifications().iter().any(|n| matches!(
        n,
        Notification::OperationDropped {
            reason: DropReason::RetriesExhausted,
            ..
        }
    )));

    // The local change itself is not lost: it is still dirty
    assert!(!is_synced(&rig.local, "p1").await);
}

#[tokio::test]
async fn chaos_journaled_queue_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let journal = dir.path().join("queue.db");
    let local = Arc::new(InMemoryLocalStore::new());
    let clock = Arc::new(ManualClock::new(1_000));
    let shared = Arc::new(InMemoryRemoteStore::new(clock.clone()));
    let config = SyncConfig {
        queue_journal_path: Some(journal.to_string_lossy().into_owned()),
        ..config()
    };

    {
        let remote = Arc::new(FailingRemoteStore::unreachable(shared.clone()));
        let adapters = Adapters::new(local.clone(), remote).with_clock(clock.clone());
        let engine = SyncEngine::open(config.clone(), adapters).await.unwrap();
        engine.set_online(false);
        engine.save(&CatalogItem::new("p1", "Espresso", 250)).await.unwrap();
        engine.reconcile(&[EntityKind::CatalogItem], false).await.unwrap();
        assert_eq!(engine.queue().len(), 1);
    }

    let adapters = Adapters::new(local.clone(), shared.clone()).with_clock(clock.clone());
    let engine = SyncEngine::open(config, adapters).await.unwrap();
    assert_eq!(engine.queue().len(), 1);

    let run = engine.process_queue().await;
    assert_eq!(run.succeeded, 1);
    assert!(shared.record(EntityKind::CatalogItem, "p1").is_some());
}

// =============================================================================
// Download failures and checkpoints
// =============================================================================

#[tokio::test]
async fn chaos_failed_download_keeps_checkpoint() {
    let rig = rig_with(config(), |shared| FailingRemoteStore::new(shared, vec![])).await;

    // Another device already published a record
    let mut seed = SyncRecord::new(EntityKind::CatalogItem, "p1", serde_json::json!({
        "id": "p1", "name": "Espresso", "priceCents": 250
    }), "dev-other", 1_000);
    seed.meta.is_synced = true;
    rig.shared.put(EntityKind::CatalogItem, "p1", &seed).await.unwrap();

    rig.remote.set_queries_fail(true);
    let report = rig.engine.reconcile(&[EntityKind::CatalogItem], false).await.unwrap();
    let kind = report.kind(EntityKind::CatalogItem).unwrap();
    assert_eq!(kind.errors.len(), 1);
    assert!(kind.errors[0].starts_with("download"));
    assert_eq!(kind.checkpoint, None);
    assert_eq!(
        rig.local.load_checkpoint(EntityKind::CatalogItem).await.unwrap().last_remote_at,
        None
    );
    assert!(rig.engine.load::<CatalogItem>("p1").await.unwrap().is_none());

    rig.remote.set_queries_fail(false);
    let report = rig.engine.reconcile(&[EntityKind::CatalogItem], false).await.unwrap();
    assert!(report.is_clean());
    assert!(rig.engine.load::<CatalogItem>("p1").await.unwrap().is_some());
    assert!(rig
        .local
        .load_checkpoint(EntityKind::CatalogItem)
        .await
        .unwrap()
        .last_remote_at
        .is_some());
}

#[tokio::test]
async fn chaos_single_timeout_defers_then_recovers() {
    // Call 1 is the upload put, call 2 the download query
    let rig = rig_with(config(), |shared| FailingRemoteStore::new(shared, vec![1])).await;

    rig.engine.save(&CatalogItem::new("p1", "Espresso", 250)).await.unwrap();
    let report = rig.engine.reconcile(&[EntityKind::CatalogItem], false).await.unwrap();
    let kind = report.kind(EntityKind::CatalogItem).unwrap();
    assert_eq!(kind.deferred, 1);
    // Online, so nothing is queued; the next pass retries
    assert_eq!(kind.queued, 0);
    assert!(rig.engine.queue().is_empty());

    let report = rig.engine.reconcile(&[EntityKind::CatalogItem], false).await.unwrap();
    assert_eq!(report.kind(EntityKind::CatalogItem).unwrap().uploaded, 1);
    assert!(is_synced(&rig.local, "p1").await);
}

// =============================================================================
// Degradation
// =============================================================================

#[tokio::test]
async fn chaos_repeated_failures_degrade_then_restore() {
    let rig = rig_with(config(), FailingRemoteStore::unreachable).await;
    let upload = EntityKind::CatalogItem.upload_operation();

    rig.engine.save(&CatalogItem::new("p1", "Espresso", 250)).await.unwrap();
    rig.engine.reconcile(&[EntityKind::CatalogItem], false).await.unwrap();
    assert!(!rig.engine.degradation().is_degraded(&upload));
    rig.engine.reconcile(&[EntityKind::CatalogItem], false).await.unwrap();
    assert!(rig.engine.degradation().is_degraded(&upload));
    assert!(rig
        .notifier
        .notifications()
        .iter()
        .any(|n| matches!(n, Notification::Degraded { operation, .. } if *operation == upload)));

    // Remote is back, but the degraded path is not retried until the timeout
    rig.remote.set_reachable(true);
    let calls = rig.remote.calls();
    let report = rig.engine.reconcile(&[EntityKind::CatalogItem], false).await.unwrap();
    assert_eq!(report.kind(EntityKind::CatalogItem).unwrap().deferred, 1);
    assert_eq!(rig.remote.calls(), calls, "degraded operations must not hit the remote");
    assert!(!rig.engine.health().degraded.is_empty());

    rig.clock.advance(Duration::from_secs(301));
    let restored = rig.engine.degradation().restore_expired();
    assert_eq!(restored.len(), 2);
    assert!(rig.engine.health().degraded.is_empty());

    let report = rig.engine.reconcile(&[EntityKind::CatalogItem], false).await.unwrap();
    assert_eq!(report.kind(EntityKind::CatalogItem).unwrap().uploaded, 1);
    assert!(rig
        .notifier
        .notifications()
        .iter()
        .any(|n| matches!(n, Notification::Restored { operation } if *operation == upload)));
}

#[tokio::test]
async fn chaos_authorization_failures_do_not_degrade() {
    struct RejectingRemote;

    #[async_trait]
    impl RemoteStore for RejectingRemote {
        async fn put(&self, _: EntityKind, _: &str, _: &SyncRecord) -> Result<i64, RemoteError> {
            Err(RemoteError::Unauthorized("token expired".into()))
        }
        async fn query_changed_since(&self, _: EntityKind, _: Option<i64>) -> Result<Vec<SyncRecord>, RemoteError> {
            Ok(Vec::new())
        }
        async fn put_presence(&self, _: &PresenceRecord) -> Result<(), RemoteError> {
            Ok(())
        }
    }

    let local = Arc::new(InMemoryLocalStore::new());
    let adapters = Adapters::new(local.clone(), Arc::new(RejectingRemote))
        .with_clock(Arc::new(ManualClock::new(1_000)));
    let engine = SyncEngine::open(config(), adapters).await.unwrap();

    engine.save(&CatalogItem::new("p1", "Espresso", 250)).await.unwrap();
    for _ in 0..3 {
        let report = engine.reconcile(&[EntityKind::CatalogItem], false).await.unwrap();
        assert_eq!(report.kind(EntityKind::CatalogItem).unwrap().rejected, 1);
    }
    assert!(!engine
        .degradation()
        .is_degraded(&EntityKind::CatalogItem.upload_operation()));
    assert!(engine.queue().is_empty());
    assert!(!is_synced(&local, "p1").await);
}

// =============================================================================
// Lifecycle under failure
// =============================================================================

#[tokio::test(start_paused = true)]
async fn chaos_reconnect_replays_queue_in_background() {
    let rig = rig_with(config(), FailingRemoteStore::unreachable).await;
    rig.engine.set_online(false);
    rig.engine.start().unwrap();

    rig.engine.save(&CatalogItem::new("p1", "Espresso", 250)).await.unwrap();
    rig.engine.reconcile(&[EntityKind::CatalogItem], false).await.unwrap();
    assert_eq!(rig.engine.queue().len(), 1);

    rig.remote.set_reachable(true);
    rig.engine.set_online(true);
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(rig.engine.queue().is_empty());
    assert!(rig.shared.record(EntityKind::CatalogItem, "p1").is_some());
    assert!(is_synced(&rig.local, "p1").await);

    rig.engine.shutdown().await;
    assert_eq!(rig.engine.state(), EngineState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn chaos_overlapping_reconcile_is_rejected() {
    let rig = rig_with(config(), |shared| {
        FailingRemoteStore::new(shared, vec![]).with_latency(Duration::from_millis(50))
    })
    .await;
    rig.engine.save(&CatalogItem::new("p1", "Espresso", 250)).await.unwrap();

    let (first, second) = tokio::join!(
        rig.engine.reconcile(&[EntityKind::CatalogItem], false),
        rig.engine.reconcile(&[EntityKind::CatalogItem], false),
    );
    assert!(first.is_ok());
    assert!(matches!(second, Err(SyncError::AlreadySyncing)));
    assert_eq!(rig.shared.put_count(), 1);
}

#[tokio::test]
async fn chaos_double_start() {
    let rig = rig_with(config(), |shared| FailingRemoteStore::new(shared, vec![])).await;
    rig.engine.start().unwrap();
    assert!(rig.engine.start().is_err());
    rig.engine.shutdown().await;
    assert!(rig.engine.start().is_err());
}

#[tokio::test]
async fn chaos_shutdown_without_start() {
    let rig = rig_with(config(), |shared| FailingRemoteStore::new(shared, vec![])).await;
    rig.engine.shutdown().await;
    assert_eq!(rig.engine.state(), EngineState::Stopped);
}

#[tokio::test]
async fn chaos_operations_after_shutdown() {
    let rig = rig_with(config(), |shared| FailingRemoteStore::new(shared, vec![])).await;
    rig.engine.start().unwrap();
    rig.engine.shutdown().await;

    // Local writes and explicit passes keep working without the timers
    rig.engine.save(&CatalogItem::new("p1", "Espresso", 250)).await.unwrap();
    let report = rig.engine.reconcile(&[EntityKind::CatalogItem], false).await.unwrap();
    assert_eq!(report.kind(EntityKind::CatalogItem).unwrap().uploaded, 1);
}

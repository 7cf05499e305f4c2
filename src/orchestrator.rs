// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync orchestrator.
//!
//! Drives one reconcile pass: for every requested entity kind, an upload
//! phase followed by a download phase. Kinds run concurrently; a pass as a
//! whole is exclusive per device.
//!
//! # Upload phase
//!
//! Every dirty record is `put` to the remote store through the degradation
//! controller. A stored record is marked synced with a compare-and-set on
//! the `updated_at` captured before the put, so an edit that lands while the
//! upload is in flight keeps the record dirty. That edit is also re-stamped
//! past the remote's stamp for the upload, so the pass's own download does
//! not mistake the echo for a newer change. A record the remote could not
//! take stays dirty; if the device is offline it is also handed to the
//! offline queue.
//!
//! Privileged kinds (settings, team) are only uploaded when the signed-in
//! member holds the matching permission. Otherwise the records are left
//! dirty and a [`Notification::NeedsAttention`] is emitted.
//!
//! # Download phase
//!
//! Pull remote records changed since the kind's checkpoint (or everything on
//! a full resync), merge each through the [`ConflictResolver`] and only then
//! advance the checkpoint to the newest remote stamp seen. Any failure
//! leaves the checkpoint where it was.

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::connectivity::Connectivity;
use crate::error::SyncError;
use crate::metrics::{self, LatencyTimer};
use crate::notify::{Notification, Notifier};
use crate::resilience::circuit_breaker::DegradationController;
use crate::resilience::offline_queue::{OfflineQueue, OperationHandler};
use crate::resolver::{ConflictResolver, Resolution};
use crate::storage::traits::{LocalStore, RemoteStore};
use crate::sync_record::{EntityKind, SyncRecord};
use crate::team::permissions::Session;
use crate::tracker::ChangeTracker;

/// Everything the orchestrator and its replay handlers share.
#[derive(Clone)]
pub struct SyncContext {
    pub local: Arc<dyn LocalStore>,
    pub remote: Arc<dyn RemoteStore>,
    pub tracker: Arc<ChangeTracker>,
    pub breaker: Arc<DegradationController>,
    pub queue: Arc<OfflineQueue>,
    pub connectivity: Arc<Connectivity>,
    pub session: Arc<Session>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
}

/// Per-kind outcome of one reconcile pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KindReport {
    pub kind: EntityKind,
    pub uploaded: usize,
    /// Stored remotely but edited again mid-upload, so still dirty
    pub uploaded_stale: usize,
    pub deferred: usize,
    pub queued: usize,
    pub rejected: usize,
    /// Privileged records left dirty for lack of permission
    pub awaiting_permission: usize,
    pub downloaded: usize,
    pub inserted: usize,
    pub replaced: usize,
    pub kept_local: usize,
    pub kept_immutable: usize,
    pub checkpoint: Option<i64>,
    pub errors: Vec<String>,
}

impl KindReport {
    fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            uploaded: 0,
            uploaded_stale: 0,
            deferred: 0,
            queued: 0,
            rejected: 0,
            awaiting_permission: 0,
            downloaded: 0,
            inserted: 0,
            replaced: 0,
            kept_local: 0,
            kept_immutable: 0,
            checkpoint: None,
            errors: Vec::new(),
        }
    }

    fn count_resolution(&mut self, resolution: Resolution) {
        match resolution {
            Resolution::InsertRemote => self.inserted += 1,
            Resolution::ReplaceWithRemote => self.replaced += 1,
            Resolution::KeepLocal => self.kept_local += 1,
            Resolution::KeepImmutable => self.kept_immutable += 1,
        }
    }

    /// Everything dirty went out and nothing failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
            && self.deferred == 0
            && self.rejected == 0
            && self.awaiting_permission == 0
            && self.uploaded_stale == 0
    }
}

/// Outcome of one reconcile pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub started_at: i64,
    pub finished_at: i64,
    pub full_resync: bool,
    pub kinds: Vec<KindReport>,
}

impl SyncReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.kinds.iter().all(KindReport::is_clean)
    }

    #[must_use]
    pub fn kind(&self, kind: EntityKind) -> Option<&KindReport> {
        self.kinds.iter().find(|k| k.kind == kind)
    }
}

/// Result of pushing one record to the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// The remote took it. `marked_synced` is false when the local copy
    /// changed while the put was in flight.
    Stored { remote_updated_at: i64, marked_synced: bool },
    /// Remote unreachable or degraded; the record stays dirty.
    Deferred,
}

/// Single-record upload shared by the upload phase and queue replay.
pub struct RecordUploader {
    remote: Arc<dyn RemoteStore>,
    tracker: Arc<ChangeTracker>,
    breaker: Arc<DegradationController>,
}

impl RecordUploader {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        tracker: Arc<ChangeTracker>,
        breaker: Arc<DegradationController>,
    ) -> Self {
        Self { remote, tracker, breaker }
    }

    pub async fn upload(&self, mut record: SyncRecord) -> Result<UploadOutcome, SyncError> {
        let kind = record.kind;
        let captured = record.meta.updated_at;
        record.meta.device_id = self.tracker.device_id().to_string();
        let operation = kind.upload_operation();

        let stored = self
            .breaker
            .execute_with_fallback(
                &operation,
                || async {
                    self.remote
                        .put(kind, record.id(), &record)
                        .await
                        .map(Some)
                        .map_err(SyncError::from)
                },
                || async { Ok(None) },
            )
            .await?;

        let Some(remote_updated_at) = stored else {
            return Ok(UploadOutcome::Deferred);
        };
        let marked_synced = self.tracker.mark_synced(kind, record.id(), captured).await?;
        if !marked_synced {
            self.tracker
                .supersede_echo(kind, record.id(), remote_updated_at)
                .await?;
        }
        Ok(UploadOutcome::Stored {
            remote_updated_at,
            marked_synced,
        })
    }
}

pub struct SyncOrchestrator {
    ctx: SyncContext,
    uploader: Arc<RecordUploader>,
    resolver: ConflictResolver,
    syncing: AtomicBool,
    last_report: RwLock<Option<SyncReport>>,
}

/// Clears the syncing flag however the pass ends.
struct SyncGuard<'a>(&'a AtomicBool);

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SyncOrchestrator {
    pub fn new(ctx: SyncContext, resolver: ConflictResolver) -> Self {
        let uploader = Arc::new(RecordUploader::new(
            Arc::clone(&ctx.remote),
            Arc::clone(&ctx.tracker),
            Arc::clone(&ctx.breaker),
        ));
        Self {
            ctx,
            uploader,
            resolver,
            syncing: AtomicBool::new(false),
            last_report: RwLock::new(None),
        }
    }

    /// Register an `upload:<kind>` replay handler on the offline queue for
    /// every entity kind.
    pub fn register_queue_handlers(&self) {
        for kind in EntityKind::ALL {
            self.ctx.queue.register_handler(
                kind.upload_operation(),
                Arc::new(UploadReplayHandler {
                    kind,
                    local: Arc::clone(&self.ctx.local),
                    session: Arc::clone(&self.ctx.session),
                    uploader: Arc::clone(&self.uploader),
                }),
            );
        }
    }

    #[must_use]
    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn last_report(&self) -> Option<SyncReport> {
        self.last_report.read().clone()
    }

    /// Run one reconcile pass over `kinds`.
    ///
    /// Returns [`SyncError::AlreadySyncing`] if a pass is in flight. Per-kind
    /// failures do not fail the pass; they are recorded in the report.
    #[tracing::instrument(skip(self, kinds), fields(kinds = kinds.len()))]
    pub async fn reconcile(&self, kinds: &[EntityKind], full_resync: bool) -> Result<SyncReport, SyncError> {
        if self.syncing.swap(true, Ordering::AcqRel) {
            warn!("Reconcile requested while another pass is in flight");
            metrics::record_reconcile_overlap();
            return Err(SyncError::AlreadySyncing);
        }
        let _guard = SyncGuard(&self.syncing);

        let start = Instant::now();
        let started_at = self.ctx.clock.now_millis();

        let mut unique: Vec<EntityKind> = Vec::with_capacity(kinds.len());
        for kind in kinds {
            if !unique.contains(kind) {
                unique.push(*kind);
            }
        }

        let kinds = join_all(unique.iter().map(|&kind| self.reconcile_kind(kind, full_resync))).await;
        let report = SyncReport {
            started_at,
            finished_at: self.ctx.clock.now_millis(),
            full_resync,
            kinds,
        };

        let clean = report.is_clean();
        metrics::record_reconcile(start.elapsed(), clean);
        info!(
            kinds = report.kinds.len(),
            uploaded = report.kinds.iter().map(|k| k.uploaded).sum::<usize>(),
            downloaded = report.kinds.iter().map(|k| k.downloaded).sum::<usize>(),
            clean,
            "Reconcile pass complete"
        );

        *self.last_report.write() = Some(report.clone());
        Ok(report)
    }

    #[tracing::instrument(skip(self, kind), fields(kind = %kind))]
    async fn reconcile_kind(&self, kind: EntityKind, full_resync: bool) -> KindReport {
        let mut report = KindReport::new(kind);

        if let Err(e) = self.upload_phase(kind, &mut report).await {
            error!(kind = %kind, error = %e, "Upload phase failed");
            metrics::record_error("orchestrator", "upload", e.kind_label());
            report.errors.push(format!("upload: {e}"));
        }

        if let Err(e) = self.download_phase(kind, full_resync, &mut report).await {
            warn!(kind = %kind, error = %e, "Download phase failed, checkpoint not advanced");
            metrics::record_error("orchestrator", "download", e.kind_label());
            report.errors.push(format!("download: {e}"));
        }

        report
    }

    async fn upload_phase(&self, kind: EntityKind, report: &mut KindReport) -> Result<(), SyncError> {
        let _timer = LatencyTimer::new("upload", kind.as_str());
        let dirty = self.ctx.tracker.dirty_records(kind).await?;
        if dirty.is_empty() {
            return Ok(());
        }

        if let Err(e) = self.ctx.session.authorize_upload(kind) {
            warn!(kind = %kind, pending = dirty.len(), error = %e, "Privileged changes held back");
            report.awaiting_permission = dirty.len();
            self.ctx.notifier.notify(Notification::NeedsAttention {
                kind,
                pending: dirty.len(),
                reason: e.to_string(),
            });
            return Ok(());
        }

        debug!(kind = %kind, dirty = dirty.len(), "Uploading dirty records");
        for record in dirty {
            let id = record.meta.id.clone();
            match self.uploader.upload(record).await {
                Ok(UploadOutcome::Stored {
                    remote_updated_at,
                    marked_synced: true,
                }) => {
                    debug!(kind = %kind, id = %id, remote_updated_at, "Record uploaded");
                    metrics::record_upload(kind.as_str(), "uploaded");
                    report.uploaded += 1;
                }
                Ok(UploadOutcome::Stored { marked_synced: false, .. }) => {
                    debug!(kind = %kind, id = %id, "Record changed during upload, stays dirty");
                    metrics::record_upload(kind.as_str(), "stale");
                    report.uploaded_stale += 1;
                }
                Ok(UploadOutcome::Deferred) => {
                    report.deferred += 1;
                    if self.ctx.connectivity.is_online() {
                        metrics::record_upload(kind.as_str(), "deferred");
                    } else {
                        self.ctx
                            .queue
                            .enqueue(&kind.upload_operation(), json!({ "kind": kind, "id": id }))
                            .await;
                        metrics::record_upload(kind.as_str(), "queued");
                        report.queued += 1;
                    }
                }
                Err(e @ (SyncError::Authorization(_) | SyncError::Validation(_))) => {
                    warn!(kind = %kind, id = %id, error = %e, "Remote refused record");
                    metrics::record_upload(kind.as_str(), "rejected");
                    report.rejected += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn download_phase(
        &self,
        kind: EntityKind,
        full_resync: bool,
        report: &mut KindReport,
    ) -> Result<(), SyncError> {
        let _timer = LatencyTimer::new("download", kind.as_str());
        let mut checkpoint = self.ctx.local.load_checkpoint(kind).await?;
        report.checkpoint = checkpoint.last_remote_at;
        let since = if full_resync { None } else { checkpoint.last_remote_at };
        let operation = kind.download_operation();

        let records = self
            .ctx
            .breaker
            .execute_with_fallback(
                &operation,
                || async {
                    self.ctx
                        .remote
                        .query_changed_since(kind, since)
                        .await
                        .map_err(SyncError::from)
                },
                || async { Err(SyncError::Degraded(operation.clone())) },
            )
            .await?;

        metrics::record_download(kind.as_str(), records.len());
        let mut newest: Option<i64> = None;
        for record in records {
            if record.kind != kind {
                warn!(expected = %kind, got = %record.kind, id = %record.meta.id, "Ignoring record of wrong kind");
                continue;
            }
            newest = newest.max(Some(record.meta.updated_at));
            let id = record.meta.id.clone();
            let resolution = self.ctx.tracker.merge_remote(record, &self.resolver).await?;
            debug!(kind = %kind, id = %id, resolution = resolution.as_str(), "Remote record merged");
            metrics::record_conflict(kind.as_str(), resolution.as_str());
            report.count_resolution(resolution);
            report.downloaded += 1;
        }

        if let Some(newest) = newest {
            if checkpoint.advance(newest) {
                self.ctx.local.save_checkpoint(&checkpoint).await?;
                metrics::set_checkpoint(kind.as_str(), newest);
                debug!(kind = %kind, checkpoint = newest, "Checkpoint advanced");
            }
        }
        report.checkpoint = checkpoint.last_remote_at;
        Ok(())
    }
}

/// Replays a queued `upload:<kind>` operation by re-reading the latest local
/// copy, so the queue never holds stale record bodies.
struct UploadReplayHandler {
    kind: EntityKind,
    local: Arc<dyn LocalStore>,
    session: Arc<Session>,
    uploader: Arc<RecordUploader>,
}

#[async_trait]
impl OperationHandler for UploadReplayHandler {
    async fn execute(&self, payload: &Value) -> Result<(), SyncError> {
        let id = payload
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| SyncError::Validation(format!("queued {} upload has no id", self.kind)))?;

        let Some(record) = self.local.get(self.kind, id).await? else {
            debug!(kind = %self.kind, id, "Queued record no longer exists");
            return Ok(());
        };
        if record.meta.is_synced {
            debug!(kind = %self.kind, id, "Queued record already synced");
            return Ok(());
        }
        self.session.authorize_upload(self.kind)?;

        match self.uploader.upload(record).await? {
            UploadOutcome::Stored { .. } => {
                metrics::record_upload(self.kind.as_str(), "uploaded");
                Ok(())
            }
            UploadOutcome::Deferred => Err(SyncError::TransientNetwork(format!(
                "{} still unreachable",
                self.kind.upload_operation()
            ))),
        }
    }
}

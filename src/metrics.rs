// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the sync engine.
//!
//! Uses the `metrics` crate for backend-agnostic collection. The embedding
//! app chooses the exporter.
//!
//! # Metric Naming Convention
//! - `pos_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `kind`: entity kind (`catalog_item`, `sale_transaction`, ...)
//! - `operation`: guarded operation name (`upload:party`, `presence`, ...)
//! - `outcome` / `reason`: what happened

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

// ═══════════════════════════════════════════════════════════════════════════
// SYNC CYCLES
// ═══════════════════════════════════════════════════════════════════════════

/// Record one record's upload outcome (`uploaded`, `deferred`, `queued`, `rejected`, `stale`)
pub fn record_upload(kind: &str, outcome: &str) {
    counter!(
        "pos_sync_uploads_total",
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Record how many remote records a download phase pulled
pub fn record_download(kind: &str, count: usize) {
    counter!(
        "pos_sync_downloaded_records_total",
        "kind" => kind.to_string()
    )
    .increment(count as u64);
}

/// Record a conflict resolution outcome
pub fn record_conflict(kind: &str, resolution: &str) {
    counter!(
        "pos_sync_conflict_resolutions_total",
        "kind" => kind.to_string(),
        "resolution" => resolution.to_string()
    )
    .increment(1);
}

/// Record a checkpoint advance
pub fn set_checkpoint(kind: &str, remote_millis: i64) {
    gauge!(
        "pos_sync_checkpoint_millis",
        "kind" => kind.to_string()
    )
    .set(remote_millis as f64);
}

/// Record a full reconcile pass duration
pub fn record_reconcile(duration: Duration, clean: bool) {
    histogram!("pos_sync_reconcile_seconds").record(duration.as_secs_f64());
    counter!(
        "pos_sync_reconcile_total",
        "outcome" => if clean { "clean" } else { "partial" }
    )
    .increment(1);
}

/// Record a reconcile call rejected because another pass was in flight
pub fn record_reconcile_overlap() {
    counter!("pos_sync_reconcile_overlap_total").increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// OFFLINE QUEUE
// ═══════════════════════════════════════════════════════════════════════════

/// Set offline queue depth
pub fn set_queue_depth(depth: usize) {
    gauge!("pos_sync_offline_queue_depth").set(depth as f64);
}

/// Record a queue event (`enqueued`, `coalesced`, `replayed`, `retry_scheduled`)
pub fn record_queue_event(event: &str) {
    counter!(
        "pos_sync_offline_queue_events_total",
        "event" => event.to_string()
    )
    .increment(1);
}

/// Record a permanently dropped queued operation
pub fn record_queue_drop(operation: &str, reason: &str) {
    counter!(
        "pos_sync_offline_queue_dropped_total",
        "operation" => operation.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// DEGRADATION - Circuit breaker metrics
// ═══════════════════════════════════════════════════════════════════════════

/// Record a guarded call outcome (`primary_ok`, `primary_failed`, `fallback`)
pub fn record_guarded_call(operation: &str, outcome: &str) {
    counter!(
        "pos_sync_guarded_calls_total",
        "operation" => operation.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Set degraded flag for an operation (1 = degraded, 0 = healthy)
pub fn set_degraded(operation: &str, degraded: bool) {
    gauge!(
        "pos_sync_operation_degraded",
        "operation" => operation.to_string()
    )
    .set(if degraded { 1.0 } else { 0.0 });
}

// ═══════════════════════════════════════════════════════════════════════════
// ERRORS / MISC
// ═══════════════════════════════════════════════════════════════════════════

/// Record an error with category for alerting
pub fn record_error(component: &str, operation: &str, error_type: &str) {
    counter!(
        "pos_sync_errors_total",
        "component" => component.to_string(),
        "operation" => operation.to_string(),
        "error_type" => error_type.to_string()
    )
    .increment(1);
}

/// Record a presence heartbeat outcome (`written`, `skipped`)
pub fn record_presence(outcome: &str) {
    counter!(
        "pos_sync_presence_heartbeats_total",
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Set connectivity (1 = online)
pub fn set_online(online: bool) {
    gauge!("pos_sync_online").set(if online { 1.0 } else { 0.0 });
}

/// Record phase latency
pub fn record_latency(phase: &str, kind: &str, duration: Duration) {
    histogram!(
        "pos_sync_phase_seconds",
        "phase" => phase.to_string(),
        "kind" => kind.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Records phase latency when dropped.
pub struct LatencyTimer {
    phase: &'static str,
    kind: &'static str,
    start: Instant,
}

impl LatencyTimer {
    pub fn new(phase: &'static str, kind: &'static str) -> Self {
        Self {
            phase,
            kind,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(self.phase, self.kind, self.start.elapsed());
    }
}

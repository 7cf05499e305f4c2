// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Property-based tests (fuzzing) for conflict resolution and record decoding.
//!
//! Uses proptest to generate random records and malformed inputs and verify
//! the resolver is deterministic and decoding never panics.
//!
//! Run with: `cargo test --test proptest_fuzz`

use proptest::prelude::*;
use serde_json::{json, Value};

use pos_sync::{ConflictResolver, EntityKind, Resolution, SyncCheckpoint, SyncRecord, TieBreak};

// =============================================================================
// Strategies for generating test data
// =============================================================================

fn kind_strategy() -> impl Strategy<Value = EntityKind> {
    prop::sample::select(EntityKind::ALL.to_vec())
}

fn mutable_kind_strategy() -> impl Strategy<Value = EntityKind> {
    kind_strategy().prop_filter("mutable kinds only", |k| !k.is_immutable())
}

fn device_strategy() -> impl Strategy<Value = String> {
    "dev-[a-e]"
}

/// A record with a small timestamp range so ties are common
fn record_strategy(id: &'static str) -> impl Strategy<Value = SyncRecord> {
    (0i64..20, device_strategy(), any::<bool>(), any::<i32>()).prop_map(move |(at, device, deleted, n)| {
        let mut record = SyncRecord::new(EntityKind::CatalogItem, id, json!({ "n": n }), device, at);
        record.meta.is_deleted = deleted;
        record
    })
}

fn tie_break_strategy() -> impl Strategy<Value = TieBreak> {
    prop_oneof![Just(TieBreak::HigherDeviceId), Just(TieBreak::PreferLocal)]
}

/// Generate arbitrary JSON values (including invalid structures)
fn arbitrary_json_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| Value::Number(n.into())),
        ".*".prop_map(Value::String),
    ];

    leaf.prop_recursive(4, 64, 10, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..10).prop_map(Value::Array),
            prop::collection::hash_map(".*", inner, 0..10)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

// =============================================================================
// Resolver properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Same inputs, same answer
    #[test]
    fn resolve_is_deterministic(
        kind in kind_strategy(),
        tie in tie_break_strategy(),
        local in record_strategy("x"),
        remote in record_strategy("x"),
    ) {
        let resolver = ConflictResolver::new(tie);
        let first = resolver.resolve(kind, Some(&local), &remote);
        for _ in 0..3 {
            prop_assert_eq!(resolver.resolve(kind, Some(&local), &remote), first);
        }
    }

    /// Two devices holding each other's copy converge on the same winner.
    #[test]
    fn higher_device_id_converges(
        kind in mutable_kind_strategy(),
        a in record_strategy("x"),
        b in record_strategy("x"),
    ) {
        prop_assume!(a.meta.device_id != b.meta.device_id);
        let resolver = ConflictResolver::new(TieBreak::HigherDeviceId);

        let on_a = resolver.resolve(kind, Some(&a), &b);
        let on_b = resolver.resolve(kind, Some(&b), &a);

        // Exactly one side adopts the other's copy
        prop_assert_ne!(on_a.applies_remote(), on_b.applies_remote());

        let winner_on_a = if on_a.applies_remote() { &b } else { &a };
        let winner_on_b = if on_b.applies_remote() { &a } else { &b };
        prop_assert_eq!(winner_on_a, winner_on_b);
    }

    /// The newer record wins regardless of tie-break or tombstone.
    #[test]
    fn strictly_newer_remote_wins(
        kind in mutable_kind_strategy(),
        tie in tie_break_strategy(),
        local in record_strategy("x"),
        mut remote in record_strategy("x"),
        gap in 1i64..1_000,
    ) {
        remote.meta.updated_at = local.meta.updated_at + gap;
        let resolver = ConflictResolver::new(tie);
        prop_assert_eq!(resolver.resolve(kind, Some(&local), &remote), Resolution::ReplaceWithRemote);
        prop_assert_eq!(resolver.resolve(kind, Some(&remote), &local), Resolution::KeepLocal);
    }

    /// An existing completed sale is never replaced.
    #[test]
    fn immutable_is_never_overwritten(
        tie in tie_break_strategy(),
        local in record_strategy("t"),
        remote in record_strategy("t"),
    ) {
        let resolver = ConflictResolver::new(tie);
        let resolution = resolver.resolve(EntityKind::SaleTransaction, Some(&local), &remote);
        prop_assert_eq!(resolution, Resolution::KeepImmutable);
        prop_assert!(!resolution.applies_remote());
    }

    #[test]
    fn missing_local_always_inserts(
        kind in kind_strategy(),
        tie in tie_break_strategy(),
        remote in record_strategy("x"),
    ) {
        let resolver = ConflictResolver::new(tie);
        prop_assert_eq!(resolver.resolve::<SyncRecord>(kind, None, &remote), Resolution::InsertRemote);
    }

    /// Checkpoints only move forward.
    #[test]
    fn checkpoint_is_monotonic(observed in prop::collection::vec(any::<i64>(), 0..50)) {
        let mut checkpoint = SyncCheckpoint::initial(EntityKind::Order);
        let mut high: Option<i64> = None;
        for stamp in observed {
            let before = checkpoint.last_remote_at;
            let moved = checkpoint.advance(stamp);
            high = high.max(Some(stamp));
            prop_assert_eq!(checkpoint.last_remote_at, high);
            prop_assert_eq!(moved, before != checkpoint.last_remote_at);
        }
    }
}

// =============================================================================
// Decoding never panics
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    #[test]
    fn record_from_arbitrary_json_never_panics(value in arbitrary_json_strategy()) {
        let _ = serde_json::from_value::<SyncRecord>(value);
    }

    #[test]
    fn record_from_arbitrary_bytes_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = serde_json::from_slice::<SyncRecord>(&bytes);
    }

    /// Well-formed envelopes with garbage business fields still decode;
    /// the fields are opaque at this layer.
    #[test]
    fn record_with_arbitrary_fields_decodes(
        kind in kind_strategy(),
        fields in arbitrary_json_strategy(),
        at in any::<i64>(),
    ) {
        let envelope = json!({
            "kind": kind,
            "id": "r-1",
            "createdAt": at,
            "updatedAt": at,
            "deviceId": "dev-a",
            "isSynced": false,
            "fields": fields,
        });
        let record: SyncRecord = serde_json::from_value(envelope).unwrap();
        prop_assert_eq!(record.kind, kind);
        prop_assert_eq!(record.meta.updated_at, at);
        prop_assert!(!record.meta.is_deleted);
        prop_assert_eq!(record.fields, fields);
    }
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # POS Sync
//!
//! Local-first synchronization and resilience engine for point-of-sale
//! devices that must keep selling while offline and reconcile later.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Business logic                         │
//! │  • save() / delete() typed entities                         │
//! │  • Permission gate on privileged kinds (settings, team)     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Change Tracker                          │
//! │  • Only writer of sync metadata (dirty flag, stamps)        │
//! │  • Compare-and-set mark_synced                              │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                     (reconcile, per kind)
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Sync Orchestrator                        │
//! │  • Upload dirty records → remote store                      │
//! │  • Download changes since checkpoint → Conflict Resolver    │
//! │  • All-or-nothing checkpoint advance                        │
//! └─────────────────────────────────────────────────────────────┘
//!           │                                    │
//!           ▼                                    ▼
//! ┌──────────────────────────┐      ┌──────────────────────────┐
//! │  Degradation Controller  │      │      Offline Queue       │
//! │  • Per-operation health  │      │  • Bounded, journaled    │
//! │  • Fallback while        │      │  • Exponential backoff   │
//! │    degraded, self-heals  │      │  • Replay on reconnect   │
//! └──────────────────────────┘      └──────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pos_sync::{Adapters, SyncConfig, SyncEngine};
//! use pos_sync::entities::CatalogItem;
//! use pos_sync::storage::{InMemoryLocalStore, InMemoryRemoteStore};
//! use pos_sync::clock::SystemClock;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let adapters = Adapters::new(
//!         Arc::new(InMemoryLocalStore::new()),
//!         Arc::new(InMemoryRemoteStore::new(Arc::new(SystemClock))),
//!     );
//!     let engine = SyncEngine::open(SyncConfig::default(), adapters)
//!         .await
//!         .expect("Failed to open");
//!     engine.start().expect("Failed to start");
//!
//!     // Works the same online or offline
//!     engine.save(&CatalogItem::new("sku-001", "Espresso", 250)).await.unwrap();
//!
//!     // Periodic timers do this too
//!     let report = engine.reconcile_all().await.unwrap();
//!     println!("clean: {}", report.is_clean());
//!
//!     engine.shutdown().await;
//! }
//! ```
//!
//! ## Configuration
//!
//! See [`SyncConfig`] for all configuration options.
//!
//! ## Modules
//!
//! - [`coordinator`]: The [`SyncEngine`] composition root and background timers
//! - [`orchestrator`]: Upload/download reconcile passes
//! - [`tracker`]: Change tracking and dirty flags
//! - [`resolver`]: Last-write-wins conflict resolution
//! - [`resilience`]: Degradation controller, retry policy, offline queue
//! - [`storage`]: Local/remote adapter traits and in-memory adapters
//! - [`team`]: Roles, permissions, presence
//! - [`entities`]: Typed point-of-sale entities

pub mod clock;
pub mod config;
pub mod connectivity;
pub mod coordinator;
pub mod entities;
pub mod error;
pub mod metrics;
pub mod notify;
pub mod orchestrator;
pub mod resilience;
pub mod resolver;
pub mod storage;
pub mod sync_record;
pub mod team;
pub mod tracker;

pub use config::SyncConfig;
pub use coordinator::{Adapters, EngineState, HealthReport, SyncEngine};
pub use error::SyncError;
pub use notify::{Notification, Notifier};
pub use orchestrator::{KindReport, SyncReport};
pub use resilience::circuit_breaker::{DegradationConfig, DegradationController, ServiceHealth};
pub use resilience::offline_queue::{OfflineQueue, OperationHandler, QueuedOperation};
pub use resilience::retry::RetryConfig;
pub use resolver::{ConflictResolver, Resolution, TieBreak};
pub use storage::traits::{LocalStore, RemoteError, RemoteStore, StorageError};
pub use sync_record::{EntityKind, SyncCheckpoint, SyncMetadata, SyncRecord, Syncable};
pub use metrics::LatencyTimer;

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync record data structures.
//!
//! A [`SyncRecord`] is the unit the engine moves between the local and remote
//! stores: [`SyncMetadata`] plus the entity's business fields as JSON. Typed
//! domain entities (see [`crate::entities`]) convert to and from it.
//!
//! # Example
//!
//! ```
//! use pos_sync::{EntityKind, SyncRecord};
//! use serde_json::json;
//!
//! let rec = SyncRecord::new(
//!     EntityKind::CatalogItem,
//!     "sku-001",
//!     json!({"name": "Espresso", "priceCents": 250}),
//!     "till-1",
//!     1_700_000_000_000,
//! );
//!
//! assert!(!rec.meta.is_synced);
//! assert_eq!(rec.meta.created_at, rec.meta.updated_at);
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

use crate::team::permissions::Permission;

/// The entity types the engine knows how to sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    CatalogItem,
    /// Completed sale. Immutable once created.
    SaleTransaction,
    Party,
    Order,
    Configuration,
    TeamMember,
}

impl EntityKind {
    pub const ALL: [EntityKind; 6] = [
        Self::CatalogItem,
        Self::SaleTransaction,
        Self::Party,
        Self::Order,
        Self::Configuration,
        Self::TeamMember,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CatalogItem => "catalog_item",
            Self::SaleTransaction => "sale_transaction",
            Self::Party => "party",
            Self::Order => "order",
            Self::Configuration => "configuration",
            Self::TeamMember => "team_member",
        }
    }

    /// Immutable kinds are insert-if-absent only.
    #[must_use]
    pub fn is_immutable(&self) -> bool {
        matches!(self, Self::SaleTransaction)
    }

    /// Permission a signed-in member needs to change this kind.
    #[must_use]
    pub fn required_permission(&self) -> Permission {
        match self {
            Self::CatalogItem => Permission::ManageCatalog,
            Self::SaleTransaction => Permission::ProcessSales,
            Self::Party => Permission::ManageCustomers,
            Self::Order => Permission::ManageOrders,
            Self::Configuration => Permission::ManageSettings,
            Self::TeamMember => Permission::ManageTeam,
        }
    }

    /// Privileged kinds need a signed-in member holding the permission, both
    /// to change them and to upload pending changes.
    #[must_use]
    pub fn is_privileged(&self) -> bool {
        matches!(self, Self::Configuration | Self::TeamMember)
    }

    /// Guarded-operation name for the upload path of this kind.
    #[must_use]
    pub fn upload_operation(&self) -> String {
        format!("upload:{}", self.as_str())
    }

    /// Guarded-operation name for the download path of this kind.
    #[must_use]
    pub fn download_operation(&self) -> String {
        format!("download:{}", self.as_str())
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown entity kind '{s}'"))
    }
}

/// Per-record sync bookkeeping, embedded in every syncable entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMetadata {
    pub id: String,
    /// Epoch millis
    pub created_at: i64,
    /// Epoch millis, monotonic per device for local writes; remote-stamped
    /// once the record has been accepted by the remote store.
    pub updated_at: i64,
    /// Device that produced this version
    pub device_id: String,
    /// False means the local copy is ahead of the remote one.
    pub is_synced: bool,
    /// Soft-delete tombstone
    #[serde(default)]
    pub is_deleted: bool,
}

/// A record as stored locally and remotely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRecord {
    pub kind: EntityKind,
    #[serde(flatten)]
    pub meta: SyncMetadata,
    /// Business fields
    pub fields: Value,
}

impl SyncRecord {
    /// Create a fresh, dirty record.
    pub fn new(
        kind: EntityKind,
        id: impl Into<String>,
        fields: Value,
        device_id: impl Into<String>,
        now_millis: i64,
    ) -> Self {
        Self {
            kind,
            meta: SyncMetadata {
                id: id.into(),
                created_at: now_millis,
                updated_at: now_millis,
                device_id: device_id.into(),
                is_synced: false,
                is_deleted: false,
            },
            fields,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.meta.id
    }

    /// Same business content (fields and tombstone), ignoring sync bookkeeping.
    #[must_use]
    pub fn same_content(&self, other: &SyncRecord) -> bool {
        self.fields == other.fields && self.meta.is_deleted == other.meta.is_deleted
    }
}

/// What the conflict resolver needs to know about a record.
pub trait Syncable {
    fn id(&self) -> &str;
    fn updated_at(&self) -> i64;
    fn is_deleted(&self) -> bool;
    fn device_id(&self) -> &str;
}

impl Syncable for SyncRecord {
    fn id(&self) -> &str {
        &self.meta.id
    }

    fn updated_at(&self) -> i64 {
        self.meta.updated_at
    }

    fn is_deleted(&self) -> bool {
        self.meta.is_deleted
    }

    fn device_id(&self) -> &str {
        &self.meta.device_id
    }
}

/// Newest remote change already merged locally, per entity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCheckpoint {
    pub kind: EntityKind,
    /// Remote `updated_at` of the newest merged record; `None` before the
    /// first successful download.
    pub last_remote_at: Option<i64>,
}

impl SyncCheckpoint {
    #[must_use]
    pub fn initial(kind: EntityKind) -> Self {
        Self { kind, last_remote_at: None }
    }

    /// Move forward to `observed` if it is newer. Never moves backwards.
    /// Returns whether the checkpoint changed.
    pub fn advance(&mut self, observed: i64) -> bool {
        match self.last_remote_at {
            Some(current) if current >= observed => false,
            _ => {
                self.last_remote_at = Some(observed);
                true
            }
        }
    }
}

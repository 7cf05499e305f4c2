// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Conflict resolution between a local and a remote copy of one record.
//!
//! Whole-record last-write-wins on `updated_at`. There is no field-level
//! merge: when two devices edit different fields of the same record, the
//! later write replaces the earlier one entirely.
//!
//! # Algorithm
//!
//! Mutable kinds:
//! 1. No local copy → insert remote
//! 2. `remote.updated_at > local.updated_at` → replace local with remote
//! 3. `local.updated_at > remote.updated_at` → keep local (it re-uploads later)
//! 4. Equal timestamps → [`TieBreak`]
//!
//! Immutable kinds: insert if absent, otherwise never touch the local copy.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::sync_record::{EntityKind, Syncable};

/// What to do with an incoming remote record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// No local copy; store the remote one as synced
    InsertRemote,
    /// Remote is newer; overwrite local and mark synced
    ReplaceWithRemote,
    /// Local is newer or wins the tie; leave it alone
    KeepLocal,
    /// Immutable kind already present locally; remote ignored
    KeepImmutable,
}

impl Resolution {
    /// Whether the remote copy gets written locally.
    #[must_use]
    pub fn applies_remote(&self) -> bool {
        matches!(self, Self::InsertRemote | Self::ReplaceWithRemote)
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InsertRemote => "insert_remote",
            Self::ReplaceWithRemote => "replace_with_remote",
            Self::KeepLocal => "keep_local",
            Self::KeepImmutable => "keep_immutable",
        }
    }
}

/// Deterministic rule for equal `updated_at` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Lexically greater `device_id` wins; same device keeps local
    #[default]
    HigherDeviceId,
    /// Local copy always wins a tie
    PreferLocal,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver {
    tie_break: TieBreak,
}

impl ConflictResolver {
    #[must_use]
    pub fn new(tie_break: TieBreak) -> Self {
        Self { tie_break }
    }

    #[must_use]
    pub fn resolve<R: Syncable>(&self, kind: EntityKind, local: Option<&R>, remote: &R) -> Resolution {
        let Some(local) = local else {
            return Resolution::InsertRemote;
        };
        if kind.is_immutable() {
            return Resolution::KeepImmutable;
        }

        match remote.updated_at().cmp(&local.updated_at()) {
            Ordering::Greater => Resolution::ReplaceWithRemote,
            Ordering::Less => Resolution::KeepLocal,
            Ordering::Equal => match self.tie_break {
                TieBreak::HigherDeviceId if remote.device_id() > local.device_id() => {
                    Resolution::ReplaceWithRemote
                }
                _ => Resolution::KeepLocal,
            },
        }
    }
}

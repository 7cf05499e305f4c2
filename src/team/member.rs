// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Team members.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::permissions::{Permission, Role};
use super::presence::PresenceStatus;
use crate::entities::Entity;
use crate::error::SyncError;
use crate::sync_record::EntityKind;

/// A person who can sign in to a business's devices.
///
/// Never hard deleted; [`TeamMember::active`] is cleared instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamMember {
    pub id: String,
    pub business_id: String,
    pub display_name: String,
    pub role: Role,
    /// Replaces the role's defaults when set
    #[serde(default)]
    pub permissions: Option<BTreeSet<Permission>>,
    pub presence_status: PresenceStatus,
    pub last_seen_at: i64,
    pub active: bool,
}

impl TeamMember {
    pub fn new(
        id: impl Into<String>,
        business_id: impl Into<String>,
        display_name: impl Into<String>,
        role: Role,
        now_millis: i64,
    ) -> Self {
        Self {
            id: id.into(),
            business_id: business_id.into(),
            display_name: display_name.into(),
            role,
            permissions: None,
            presence_status: PresenceStatus::Offline,
            last_seen_at: now_millis,
            active: true,
        }
    }

    #[must_use]
    pub fn effective_permissions(&self) -> BTreeSet<Permission> {
        self.permissions
            .clone()
            .unwrap_or_else(|| self.role.default_permissions())
    }
}

impl Entity for TeamMember {
    const KIND: EntityKind = EntityKind::TeamMember;

    fn entity_id(&self) -> &str {
        &self.id
    }

    fn validate(&self) -> Result<(), SyncError> {
        if self.business_id.is_empty() {
            return Err(SyncError::Validation("team member needs a business".into()));
        }
        Ok(())
    }
}

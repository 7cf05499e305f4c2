// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Roles, permissions and the permission gate.
//!
//! The gate decides whether a change may be made and queued for sync on
//! this device. Every kind maps to one [`Permission`]; a signed-in member
//! must hold it. With nobody signed in, only privileged kinds (settings,
//! team) are refused. A rejection is local: it never turns into a remote
//! write or a sync conflict.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::member::TeamMember;
use crate::error::SyncError;
use crate::sync_record::EntityKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ManageTeam,
    ManageSettings,
    ProcessSales,
    ManageCustomers,
    ManageOrders,
    ManageCatalog,
    ManageInventory,
    ManageSuppliers,
    ViewReports,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Full access
    Owner,
    /// Sales and customers
    Cashier,
    /// Inventory and suppliers
    StockKeeper,
    /// Read-only
    Viewer,
}

impl Role {
    #[must_use]
    pub fn default_permissions(&self) -> BTreeSet<Permission> {
        use Permission::*;
        let perms: &[Permission] = match self {
            Self::Owner => &[
                ManageTeam,
                ManageSettings,
                ProcessSales,
                ManageCustomers,
                ManageOrders,
                ManageCatalog,
                ManageInventory,
                ManageSuppliers,
                ViewReports,
            ],
            Self::Cashier => &[ProcessSales, ManageCustomers, ManageOrders, ViewReports],
            Self::StockKeeper => &[ManageCatalog, ManageInventory, ManageSuppliers, ViewReports],
            Self::Viewer => &[ViewReports],
        };
        perms.iter().copied().collect()
    }
}

/// Stateless permission checks.
#[derive(Debug, Default, Clone, Copy)]
pub struct PermissionGate;

impl PermissionGate {
    /// Active members only; explicit overrides replace the role defaults.
    #[must_use]
    pub fn has_permission(member: &TeamMember, permission: Permission) -> bool {
        member.active && member.effective_permissions().contains(&permission)
    }

    /// Check whether `member` may change records of `kind`.
    pub fn authorize_change(member: Option<&TeamMember>, kind: EntityKind) -> Result<(), SyncError> {
        let required = kind.required_permission();
        match member {
            Some(m) if Self::has_permission(m, required) => Ok(()),
            Some(m) => Err(SyncError::Authorization(format!(
                "member '{}' lacks {:?} for {}",
                m.id, required, kind
            ))),
            None if kind.is_privileged() => Err(SyncError::Authorization(format!(
                "no signed-in member may change {kind}"
            ))),
            None => Ok(()),
        }
    }

    /// Check whether pending changes of `kind` may be uploaded under
    /// `member`. Only privileged kinds are gated here: a sale rung up by a
    /// cashier still uploads after a stock keeper signs in.
    pub fn authorize_upload(member: Option<&TeamMember>, kind: EntityKind) -> Result<(), SyncError> {
        if kind.is_privileged() {
            Self::authorize_change(member, kind)
        } else {
            Ok(())
        }
    }
}

/// The member acting on this device.
#[derive(Debug, Default)]
pub struct Session {
    member: RwLock<Option<TeamMember>>,
}

impl Session {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sign_in(&self, member: TeamMember) {
        *self.member.write() = Some(member);
    }

    pub fn sign_out(&self) -> Option<TeamMember> {
        self.member.write().take()
    }

    #[must_use]
    pub fn current(&self) -> Option<TeamMember> {
        self.member.read().clone()
    }

    /// Update the signed-in member in place, if any.
    pub fn update<F: FnOnce(&mut TeamMember)>(&self, f: F) {
        if let Some(m) = self.member.write().as_mut() {
            f(m);
        }
    }

    #[must_use]
    pub fn can(&self, permission: Permission) -> bool {
        self.member
            .read()
            .as_ref()
            .is_some_and(|m| PermissionGate::has_permission(m, permission))
    }

    pub fn authorize_change(&self, kind: EntityKind) -> Result<(), SyncError> {
        PermissionGate::authorize_change(self.member.read().as_ref(), kind)
    }

    pub fn authorize_upload(&self, kind: EntityKind) -> Result<(), SyncError> {
        PermissionGate::authorize_upload(self.member.read().as_ref(), kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(role: Role) -> TeamMember {
        TeamMember::new("m-1", "biz-1", "Sam", role, 0)
    }

    #[test]
    fn test_role_defaults() {
        assert!(Role::Owner.default_permissions().contains(&Permission::ManageTeam));
        assert!(Role::Cashier.default_permissions().contains(&Permission::ProcessSales));
        assert!(!Role::Cashier.default_permissions().contains(&Permission::ManageInventory));
        assert!(Role::StockKeeper.default_permissions().contains(&Permission::ManageSuppliers));
        assert_eq!(
            Role::Viewer.default_permissions().into_iter().collect::<Vec<_>>(),
            vec![Permission::ViewReports]
        );
    }

    #[test]
    fn test_override_replaces_role_defaults() {
        let mut m = member(Role::Viewer);
        assert!(!PermissionGate::has_permission(&m, Permission::ManageSettings));

        m.permissions = Some([Permission::ManageSettings].into_iter().collect());
        assert!(PermissionGate::has_permission(&m, Permission::ManageSettings));
        assert!(!PermissionGate::has_permission(&m, Permission::ViewReports));
    }

    #[test]
    fn test_inactive_member_has_no_permissions() {
        let mut m = member(Role::Owner);
        m.active = false;
        assert!(!PermissionGate::has_permission(&m, Permission::ViewReports));
    }

    #[test]
    fn test_authorize_change_checks_each_kind() {
        let cashier = member(Role::Cashier);
        assert!(PermissionGate::authorize_change(Some(&cashier), EntityKind::SaleTransaction).is_ok());
        assert!(PermissionGate::authorize_change(Some(&cashier), EntityKind::Order).is_ok());
        assert!(matches!(
            PermissionGate::authorize_change(Some(&cashier), EntityKind::CatalogItem),
            Err(SyncError::Authorization(_))
        ));
        assert!(matches!(
            PermissionGate::authorize_change(Some(&cashier), EntityKind::Configuration),
            Err(SyncError::Authorization(_))
        ));

        let viewer = member(Role::Viewer);
        for kind in EntityKind::ALL {
            assert!(
                matches!(
                    PermissionGate::authorize_change(Some(&viewer), kind),
                    Err(SyncError::Authorization(_))
                ),
                "viewer changed {kind}"
            );
        }
    }

    #[test]
    fn test_no_member_only_refused_privileged_kinds() {
        assert!(PermissionGate::authorize_change(None, EntityKind::Order).is_ok());
        assert!(PermissionGate::authorize_change(None, EntityKind::SaleTransaction).is_ok());
        assert!(matches!(
            PermissionGate::authorize_change(None, EntityKind::TeamMember),
            Err(SyncError::Authorization(_))
        ));
    }

    #[test]
    fn test_authorize_upload_gates_privileged_kinds_only() {
        let stock_keeper = member(Role::StockKeeper);
        assert!(PermissionGate::authorize_upload(Some(&stock_keeper), EntityKind::SaleTransaction).is_ok());
        assert!(PermissionGate::authorize_upload(None, EntityKind::Party).is_ok());
        assert!(matches!(
            PermissionGate::authorize_upload(Some(&stock_keeper), EntityKind::Configuration),
            Err(SyncError::Authorization(_))
        ));
    }

    #[test]
    fn test_session_tracks_current_member() {
        let session = Session::new();
        assert!(!session.can(Permission::ViewReports));

        session.sign_in(member(Role::Owner));
        assert!(session.can(Permission::ManageTeam));
        assert!(session.authorize_change(EntityKind::TeamMember).is_ok());

        assert_eq!(session.sign_out().map(|m| m.id), Some("m-1".to_string()));
        assert!(session.current().is_none());
    }
}

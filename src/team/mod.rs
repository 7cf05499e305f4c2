// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Team members, permissions and presence.

pub mod member;
pub mod permissions;
pub mod presence;

pub use member::TeamMember;
pub use permissions::{Permission, PermissionGate, Role, Session};
pub use presence::{PresenceRecord, PresenceService, PresenceStatus};

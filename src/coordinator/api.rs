// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Business-facing API.
//!
//! - session: `sign_in()`, `sign_out()`, `set_presence()`
//! - typed mutations: `save()`, `load()`, `list()`, `delete()`, `deactivate_member()`
//! - sync: `reconcile()`, `reconcile_all()`, `full_resync()`, `process_queue()`
//! - observability: `health()`

use tracing::{debug, info};

use crate::entities::{Entity, Tracked};
use crate::error::SyncError;
use crate::orchestrator::SyncReport;
use crate::resilience::offline_queue::QueueRunReport;
use crate::storage::traits::StorageError;
use crate::sync_record::{EntityKind, SyncRecord};
use crate::team::member::TeamMember;
use crate::team::presence::PresenceStatus;

use super::{HealthReport, SyncEngine};

impl SyncEngine {
    // ═══════════════════════════════════════════════════════════════════════════
    // API: Session & presence
    // ═══════════════════════════════════════════════════════════════════════════

    /// Sign a team member in on this device.
    ///
    /// On first login the member record is created (and queued for sync).
    /// Afterwards the stored record is authoritative: role and permission
    /// overrides come from it, not from `member`. Deactivated members are
    /// refused.
    pub async fn sign_in(&self, member: TeamMember) -> Result<TeamMember, SyncError> {
        let now = self.ctx.clock.now_millis();
        let existing = self.ctx.local.get(EntityKind::TeamMember, &member.id).await?;

        let mut signed_in = match existing {
            Some(record) => {
                let stored = Tracked::<TeamMember>::from_record(record)?.entity;
                if !stored.active {
                    return Err(SyncError::Authorization(format!(
                        "team member '{}' is deactivated",
                        stored.id
                    )));
                }
                stored
            }
            None => {
                let mut fresh = member;
                fresh.active = true;
                fresh.validate()?;
                let mut record = SyncRecord::new(
                    EntityKind::TeamMember,
                    fresh.id.clone(),
                    serde_json::to_value(&fresh)?,
                    self.device_id(),
                    now,
                );
                self.ctx.tracker.mark_dirty(&mut record).await?;
                info!(member = %fresh.id, business = %fresh.business_id, "First login, team member created");
                fresh
            }
        };

        signed_in.presence_status = PresenceStatus::Online;
        signed_in.last_seen_at = now;
        self.ctx.session.sign_in(signed_in.clone());
        info!(member = %signed_in.id, role = ?signed_in.role, "Signed in");

        self.presence.heartbeat().await;
        Ok(signed_in)
    }

    /// Publish an offline presence and clear the session.
    pub async fn sign_out(&self) -> Option<TeamMember> {
        if self.ctx.session.current().is_some() {
            self.presence.set_status(PresenceStatus::Offline).await;
        }
        let member = self.ctx.session.sign_out();
        if let Some(m) = &member {
            info!(member = %m.id, "Signed out");
        }
        member
    }

    /// Change the signed-in member's presence. Returns whether the write
    /// reached the remote store.
    pub async fn set_presence(&self, status: PresenceStatus) -> bool {
        self.presence.set_status(status).await
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // API: Typed mutations
    // ═══════════════════════════════════════════════════════════════════════════

    /// Validate, authorize and commit a local change. The record is dirty
    /// when this returns.
    pub async fn save<E: Entity>(&self, entity: &E) -> Result<Tracked<E>, SyncError> {
        entity.validate()?;
        self.ctx.session.authorize_change(E::KIND)?;

        let mut record = SyncRecord::new(
            E::KIND,
            entity.entity_id(),
            serde_json::to_value(entity)?,
            self.device_id(),
            self.ctx.clock.now_millis(),
        );
        self.ctx.tracker.mark_dirty(&mut record).await?;
        debug!(kind = %E::KIND, id = %entity.entity_id(), "Entity saved");

        Tracked::from_record(record)
    }

    /// Load a live (not tombstoned) entity.
    pub async fn load<E: Entity>(&self, id: &str) -> Result<Option<Tracked<E>>, SyncError> {
        match self.ctx.local.get(E::KIND, id).await? {
            Some(record) if !record.meta.is_deleted => Tracked::from_record(record).map(Some),
            _ => Ok(None),
        }
    }

    /// Every live entity of one kind.
    pub async fn list<E: Entity>(&self) -> Result<Vec<Tracked<E>>, SyncError> {
        self.ctx
            .local
            .query(E::KIND, &|r: &SyncRecord| !r.meta.is_deleted)
            .await?
            .into_iter()
            .map(Tracked::from_record)
            .collect()
    }

    /// Soft-delete a record so the deletion propagates.
    ///
    /// Completed sales cannot be deleted and team members are deactivated
    /// instead (see [`deactivate_member`](Self::deactivate_member)).
    pub async fn delete(&self, kind: EntityKind, id: &str) -> Result<(), SyncError> {
        if kind == EntityKind::TeamMember {
            return Err(SyncError::Validation(
                "team members are deactivated, not deleted".into(),
            ));
        }
        self.ctx.session.authorize_change(kind)?;
        self.ctx.tracker.soft_delete(kind, id).await?;
        Ok(())
    }

    /// Deactivate a team member. Requires `ManageTeam`. A deactivated member
    /// who is signed in here is signed out.
    pub async fn deactivate_member(&self, member_id: &str) -> Result<Tracked<TeamMember>, SyncError> {
        let mut member = self
            .load::<TeamMember>(member_id)
            .await?
            .ok_or_else(|| StorageError::NotFound {
                kind: EntityKind::TeamMember,
                id: member_id.to_string(),
            })?
            .entity;
        member.active = false;
        member.presence_status = PresenceStatus::Offline;
        let saved = self.save(&member).await?;

        if self
            .ctx
            .session
            .current()
            .is_some_and(|m| m.id == member_id)
        {
            self.ctx.session.sign_out();
        }
        info!(member = %member_id, "Team member deactivated");
        Ok(saved)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // API: Sync
    // ═══════════════════════════════════════════════════════════════════════════

    /// Upload then download the given kinds. Fails only with
    /// [`SyncError::AlreadySyncing`].
    pub async fn reconcile(&self, kinds: &[EntityKind], full_resync: bool) -> Result<SyncReport, SyncError> {
        self.orchestrator.reconcile(kinds, full_resync).await
    }

    pub async fn reconcile_all(&self) -> Result<SyncReport, SyncError> {
        self.orchestrator.reconcile(&EntityKind::ALL, false).await
    }

    /// Re-download everything regardless of checkpoints.
    pub async fn full_resync(&self) -> Result<SyncReport, SyncError> {
        self.orchestrator.reconcile(&EntityKind::ALL, true).await
    }

    /// Replay the offline queue now.
    pub async fn process_queue(&self) -> QueueRunReport {
        self.ctx.queue.process_queue().await
    }

    /// Publish a reachability change. Returns true on a transition. While
    /// the engine is running, an offline → online edge replays the queue.
    pub fn set_online(&self, online: bool) -> bool {
        self.ctx.connectivity.set_online(online)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // API: Observability
    // ═══════════════════════════════════════════════════════════════════════════

    #[must_use]
    pub fn health(&self) -> HealthReport {
        HealthReport {
            state: self.state(),
            device_id: self.config.device_id.clone(),
            online: self.ctx.connectivity.is_online(),
            signed_in_member: self.ctx.session.current().map(|m| m.id),
            syncing: self.orchestrator.is_syncing(),
            queue: self.ctx.queue.stats(),
            degraded: self.ctx.breaker.degraded_operations(),
            last_reconcile: self.orchestrator.last_report(),
        }
    }
}

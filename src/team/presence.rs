// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Presence heartbeat.
//!
//! Presence is a plain latest-write-wins remote write. It never goes through
//! the change tracker or conflict resolution, and a missed heartbeat is
//! simply skipped.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use super::permissions::Session;
use crate::clock::Clock;
use crate::error::SyncError;
use crate::resilience::circuit_breaker::DegradationController;
use crate::storage::traits::RemoteStore;

pub const PRESENCE_OPERATION: &str = "presence";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Online,
    Away,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub member_id: String,
    pub business_id: String,
    pub device_id: String,
    pub status: PresenceStatus,
    pub last_seen_at: i64,
}

pub struct PresenceService {
    remote: Arc<dyn RemoteStore>,
    breaker: Arc<DegradationController>,
    session: Arc<Session>,
    clock: Arc<dyn Clock>,
    device_id: String,
}

impl PresenceService {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        breaker: Arc<DegradationController>,
        session: Arc<Session>,
        clock: Arc<dyn Clock>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            remote,
            breaker,
            session,
            clock,
            device_id: device_id.into(),
        }
    }

    /// Change the signed-in member's status and publish it right away.
    pub async fn set_status(&self, status: PresenceStatus) -> bool {
        self.session.update(|m| m.presence_status = status);
        self.heartbeat().await
    }

    /// Publish the signed-in member's presence. Returns whether the write
    /// reached the remote store; failures are absorbed.
    pub async fn heartbeat(&self) -> bool {
        let now = self.clock.now_millis();
        self.session.update(|m| m.last_seen_at = now);
        let Some(member) = self.session.current() else {
            return false;
        };

        let record = PresenceRecord {
            member_id: member.id.clone(),
            business_id: member.business_id.clone(),
            device_id: self.device_id.clone(),
            status: member.presence_status,
            last_seen_at: now,
        };

        let result = self
            .breaker
            .execute_with_fallback(
                PRESENCE_OPERATION,
                || async {
                    self.remote
                        .put_presence(&record)
                        .await
                        .map(|()| true)
                        .map_err(SyncError::from)
                },
                || async { Ok(false) },
            )
            .await;

        match result {
            Ok(true) => {
                debug!(member = %record.member_id, status = ?record.status, "Presence published");
                crate::metrics::record_presence("written");
                true
            }
            Ok(false) => {
                crate::metrics::record_presence("skipped");
                false
            }
            Err(e) => {
                debug!(error = %e, "Presence write rejected");
                crate::metrics::record_presence("skipped");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::notify::TracingNotifier;
    use crate::resilience::circuit_breaker::DegradationConfig;
    use crate::storage::memory::InMemoryRemoteStore;
    use crate::team::member::TeamMember;
    use crate::team::permissions::Role;

    fn service() -> (PresenceService, Arc<InMemoryRemoteStore>, Arc<Session>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(5_000));
        let remote = Arc::new(InMemoryRemoteStore::new(clock.clone()));
        let breaker = Arc::new(DegradationController::new(
            DegradationConfig::default(),
            clock.clone(),
            Arc::new(TracingNotifier),
        ));
        let session = Arc::new(Session::new());
        let svc = PresenceService::new(remote.clone(), breaker, session.clone(), clock.clone(), "till-1");
        (svc, remote, session, clock)
    }

    #[tokio::test]
    async fn test_heartbeat_without_session_is_skipped() {
        let (svc, remote, _, _) = service();
        assert!(!svc.heartbeat().await);
        assert!(remote.presence_of("m-1").is_none());
    }

    #[tokio::test]
    async fn test_heartbeat_latest_write_wins() {
        let (svc, remote, session, clock) = service();
        session.sign_in(TeamMember::new("m-1", "biz", "Sam", Role::Cashier, 0));

        assert!(svc.set_status(PresenceStatus::Online).await);
        clock.advance(std::time::Duration::from_secs(30));
        assert!(svc.set_status(PresenceStatus::Away).await);

        let p = remote.presence_of("m-1").unwrap();
        assert_eq!(p.status, PresenceStatus::Away);
        assert_eq!(p.last_seen_at, 35_000);
        assert_eq!(p.device_id, "till-1");
        assert_eq!(session.current().unwrap().last_seen_at, 35_000);
    }
}

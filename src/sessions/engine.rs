//! Session lifecycle and counselor assignment.
//!
//! The engine owns the only load-balancing decision point in the system.
//! Both races named in the concurrency model are closed at the store:
//! the one-open-session-per-requester invariant lives in a partial unique
//! index, and the assignment write is a conditional UPDATE that only
//! succeeds while the session is still waiting.

use std::sync::Arc;

use tracing::info;

use crate::errors::ApiError;
use crate::identity::{Principal, Role};
use crate::notifications::{Notifier, ANY_COUNSELOR};
use crate::sessions::model::{SessionStatus, DEFAULT_WELLNESS};
use crate::storage::{SessionRow, Storage};

pub struct SessionEngine {
    storage: Arc<Storage>,
    notifier: Arc<Notifier>,
}

impl SessionEngine {
    pub fn new(storage: Arc<Storage>, notifier: Arc<Notifier>) -> Self {
        Self { storage, notifier }
    }

    /// Open a new waiting session for a requester.
    ///
    /// Captures the requester's current wellness level as the session's
    /// initial snapshot and announces the pending session to any counselor.
    pub async fn create(&self, principal: &Principal) -> Result<SessionRow, ApiError> {
        if principal.role != Role::Requester {
            return Err(ApiError::Authorization(
                "Only requesters can open support sessions".to_string(),
            ));
        }

        self.storage.ensure_requester(&principal.id).await?;
        let wellness = self
            .storage
            .get_requester(&principal.id)
            .await?
            .map(|r| r.wellness_level)
            .unwrap_or(DEFAULT_WELLNESS);

        let session = self
            .storage
            .create_session(&principal.id, wellness)
            .await
            .map_err(|e| {
                ApiError::conflict_on_unique(e, "You already have an open support session")
            })?;

        info!(session_id = %session.id, requester = %principal.id, "session created");

        // Primary write committed above; the announcement is best-effort.
        self.notifier
            .notify(
                &principal.id,
                Role::Requester,
                ANY_COUNSELOR,
                Role::Counselor,
                "session_pending",
                "New pending session",
                "A requester is waiting for a support session",
            )
            .await;

        Ok(session)
    }

    /// Assign the least-loaded available counselor to a waiting session.
    ///
    /// Safe under concurrent invocation for different sessions: the load
    /// count is re-derived per call and the write is conditional on the
    /// session still being in `waiting`. Losing that race is an
    /// `InvalidState` result, never a double assignment.
    pub async fn auto_assign(&self, session_id: &str) -> Result<SessionRow, ApiError> {
        let session = self
            .storage
            .get_session(session_id)
            .await?
            .filter(|s| s.status == SessionStatus::Waiting.as_str())
            .ok_or_else(|| {
                ApiError::NotFound("No waiting session with that id".to_string())
            })?;

        let pick = self
            .storage
            .least_loaded_counselor()
            .await?
            .ok_or_else(|| {
                ApiError::NoCapacity("No counselor is currently available".to_string())
            })?;

        let claimed = self
            .storage
            .claim_session_for_assignment(&session.id, &pick.id)
            .await?;
        if !claimed {
            return Err(ApiError::InvalidState(
                "Session is no longer waiting for assignment".to_string(),
            ));
        }

        let updated = self.require_session(&session.id).await?;
        info!(
            session_id = %updated.id,
            counselor = %pick.id,
            active_at_decision = pick.active_count,
            "session assigned"
        );

        self.notifier
            .notify(
                &session.requester_id,
                Role::Requester,
                Some(&pick.id),
                Role::Counselor,
                "session_assigned",
                "New session",
                "You have been assigned a new support session",
            )
            .await;
        self.notifier
            .notify(
                &pick.id,
                Role::Counselor,
                Some(&session.requester_id),
                Role::Requester,
                "session_activated",
                "Session assigned",
                "A counselor has joined your session",
            )
            .await;

        Ok(updated)
    }

    /// Explicit activation: a counselor self-claims a waiting session, or
    /// confirms one already assigned to them. Admins may activate only a
    /// session that already carries a counselor — an active session without
    /// one would break the assignment invariant.
    pub async fn activate(
        &self,
        session_id: &str,
        principal: &Principal,
    ) -> Result<SessionRow, ApiError> {
        let session = self
            .storage
            .get_session(session_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Session not found".to_string()))?;

        match session.counselor_id.as_deref() {
            Some(assigned) => {
                if !(principal.role == Role::Admin
                    || (principal.role == Role::Counselor && assigned == principal.id))
                {
                    return Err(ApiError::Authorization(
                        "Only the assigned counselor or an admin can activate this session"
                            .to_string(),
                    ));
                }
                match SessionStatus::parse(&session.status) {
                    Some(SessionStatus::Waiting) => {
                        if !self.storage.activate_session(&session.id).await? {
                            return Err(ApiError::InvalidState(
                                "Session is no longer waiting".to_string(),
                            ));
                        }
                    }
                    _ => {
                        return Err(ApiError::InvalidState(
                            "Session is not waiting for activation".to_string(),
                        ))
                    }
                }
            }
            None => {
                // Unassigned: only a counselor can self-claim (the claim is
                // what produces the session's counselor).
                if principal.role != Role::Counselor {
                    return Err(ApiError::InvalidState(
                        "Session has no assigned counselor to activate it".to_string(),
                    ));
                }
                let claimed = self
                    .storage
                    .claim_session_for_assignment(&session.id, &principal.id)
                    .await?;
                if !claimed {
                    return Err(ApiError::InvalidState(
                        "Session is no longer waiting".to_string(),
                    ));
                }
            }
        }

        let updated = self.require_session(&session.id).await?;
        info!(session_id = %updated.id, actor = %principal.id, "session activated");

        self.notifier
            .notify(
                &principal.id,
                principal.role,
                Some(&session.requester_id),
                Role::Requester,
                "session_activated",
                "Session activated",
                "A counselor has joined your session",
            )
            .await;

        Ok(updated)
    }

    /// Terminal transition: `active → ended`. Assigned counselor or admin only.
    pub async fn end(
        &self,
        session_id: &str,
        principal: &Principal,
    ) -> Result<SessionRow, ApiError> {
        let session = self
            .storage
            .get_session(session_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Session not found".to_string()))?;

        self.authorize_manage(&session, principal)?;

        if !self.storage.end_session(&session.id).await? {
            return Err(ApiError::InvalidState("Session is not active".to_string()));
        }

        let updated = self.require_session(&session.id).await?;
        info!(session_id = %updated.id, actor = %principal.id, "session ended");
        Ok(updated)
    }

    /// Role-scoped read: admins see every session, counselors and
    /// requesters only their own.
    pub async fn list(&self, principal: &Principal) -> Result<Vec<SessionRow>, ApiError> {
        let rows = match principal.role {
            Role::Admin => self.storage.list_sessions_all().await?,
            Role::Counselor => {
                self.storage
                    .list_sessions_for_counselor(&principal.id)
                    .await?
            }
            Role::Requester => {
                self.storage
                    .list_sessions_for_requester(&principal.id)
                    .await?
            }
        };
        Ok(rows)
    }

    /// Hard delete, guarded by the same ownership rule as `end` plus the
    /// requester's ownership of their own sessions.
    pub async fn delete(
        &self,
        session_id: &str,
        principal: &Principal,
    ) -> Result<SessionRow, ApiError> {
        let session = self
            .storage
            .get_session(session_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Session not found".to_string()))?;

        let allowed = match principal.role {
            Role::Admin => true,
            Role::Counselor => session.counselor_id.as_deref() == Some(principal.id.as_str()),
            Role::Requester => session.requester_id == principal.id,
        };
        if !allowed {
            return Err(ApiError::Authorization(
                "You are not authorized to delete this session".to_string(),
            ));
        }

        self.storage.delete_session(&session.id).await?;
        info!(session_id = %session.id, actor = %principal.id, "session deleted");
        Ok(session)
    }

    /// Register a counselor on the roster or toggle their availability.
    /// Admins may set anyone; a counselor only themselves.
    pub async fn set_counselor_availability(
        &self,
        counselor_id: &str,
        available: bool,
        principal: &Principal,
    ) -> Result<crate::storage::CounselorRow, ApiError> {
        let allowed = principal.role == Role::Admin
            || (principal.role == Role::Counselor && principal.id == counselor_id);
        if !allowed {
            return Err(ApiError::Authorization(
                "You are not authorized to change this counselor's availability".to_string(),
            ));
        }
        let row = self.storage.upsert_counselor(counselor_id, available).await?;
        info!(counselor = %counselor_id, available, "counselor availability updated");
        Ok(row)
    }

    fn authorize_manage(
        &self,
        session: &SessionRow,
        principal: &Principal,
    ) -> Result<(), ApiError> {
        let allowed = principal.role == Role::Admin
            || (principal.role == Role::Counselor
                && session.counselor_id.as_deref() == Some(principal.id.as_str()));
        if allowed {
            Ok(())
        } else {
            Err(ApiError::Authorization(
                "Only the assigned counselor or an admin can manage this session".to_string(),
            ))
        }
    }

    async fn require_session(&self, id: &str) -> Result<SessionRow, ApiError> {
        self.storage
            .get_session(id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Session not found".to_string()))
    }
}

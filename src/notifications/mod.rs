//! Notification fan-out: persisted records delivered to the addressed party.
//!
//! `notify` is pure append with no business rules. Every call site runs after
//! its primary write has committed, so a failed notification can only ever
//! cost the notification itself — the session/message write stands.

pub mod handlers;

use std::sync::Arc;

use tracing::warn;

use crate::errors::ApiError;
use crate::identity::{Principal, Role};
use crate::storage::{NotificationRow, Storage};

/// Broadcast address: any counselor may pick this up.
pub const ANY_COUNSELOR: Option<&str> = None;

pub struct Notifier {
    storage: Arc<Storage>,
}

impl Notifier {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Append a notification record. Best-effort: a store failure is logged
    /// with the triggering context and swallowed, never unwinding the caller.
    #[allow(clippy::too_many_arguments)]
    pub async fn notify(
        &self,
        sender_id: &str,
        sender_role: Role,
        recipient_id: Option<&str>,
        recipient_role: Role,
        kind: &str,
        title: &str,
        body: &str,
    ) {
        let result = self
            .storage
            .create_notification(
                sender_id,
                sender_role.as_str(),
                recipient_id,
                recipient_role.as_str(),
                kind,
                title,
                body,
            )
            .await;
        if let Err(e) = result {
            warn!(kind = kind, sender = sender_id, err = %e, "notification write failed");
        }
    }

    /// Role-scoped read: admin sees all; a counselor sees records addressed
    /// to them or to the counselor broadcast address; a requester sees
    /// records where they are sender or recipient.
    pub async fn list(&self, principal: &Principal) -> Result<Vec<NotificationRow>, ApiError> {
        let rows = match principal.role {
            Role::Admin => self.storage.list_notifications_all().await?,
            Role::Counselor => {
                self.storage
                    .list_notifications_for_counselor(&principal.id)
                    .await?
            }
            Role::Requester => {
                self.storage
                    .list_notifications_for_requester(&principal.id)
                    .await?
            }
        };
        Ok(rows)
    }

    /// Staff may delete any record; a requester only records they sent.
    pub async fn delete(
        &self,
        notification_id: &str,
        principal: &Principal,
    ) -> Result<NotificationRow, ApiError> {
        let record = self
            .storage
            .get_notification(notification_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Notification not found".to_string()))?;

        let allowed = principal.role.is_staff() || record.sender_id == principal.id;
        if !allowed {
            return Err(ApiError::Authorization(
                "You are not authorized to delete this notification".to_string(),
            ));
        }

        self.storage.delete_notification(notification_id).await?;
        Ok(record)
    }
}

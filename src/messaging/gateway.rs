//! Per-session communication channel, gated by session state and
//! participant identity.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::json;
use tracing::{debug, info, warn};

use crate::errors::ApiError;
use crate::identity::{Principal, Role};
use crate::messaging::rooms::RoomRegistry;
use crate::notifications::Notifier;
use crate::sessions::model::SessionStatus;
use crate::storage::{MessageRow, SessionRow, Storage};

pub struct MessagingGateway {
    storage: Arc<Storage>,
    notifier: Arc<Notifier>,
    rooms: Arc<RoomRegistry>,
    /// Per-session send serialization. Held across the message INSERT and the
    /// synchronous room enqueue so delivery order matches persisted order;
    /// released before the notification write.
    send_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl MessagingGateway {
    pub fn new(storage: Arc<Storage>, notifier: Arc<Notifier>, rooms: Arc<RoomRegistry>) -> Self {
        Self {
            storage,
            notifier,
            rooms,
            send_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn rooms(&self) -> &Arc<RoomRegistry> {
        &self.rooms
    }

    /// Persist a message into an active session, fan a notification out to
    /// the other participant, and push the message to the session's room.
    /// Push and notification are best-effort; the persisted message is the
    /// primary effect.
    pub async fn send(
        &self,
        session_id: &str,
        principal: &Principal,
        content: &str,
    ) -> Result<MessageRow, ApiError> {
        if content.trim().is_empty() {
            return Err(ApiError::Validation("Message content required".to_string()));
        }

        let session = self.gate(session_id, principal).await?;

        let lock = self.session_lock(session_id);
        let message = {
            let _guard = lock.lock().await;
            let message = self
                .storage
                .create_message(session_id, principal.role.as_str(), content)
                .await?;

            let event = json!({ "type": "receive_message", "message": message }).to_string();
            let delivered = self.rooms.broadcast(session_id, &event);
            debug!(session_id, seq = message.seq, delivered, "message fanned out");
            message
        };

        let (recipient_id, recipient_role) = match principal.role {
            Role::Requester => (session.counselor_id.clone(), Role::Counselor),
            _ => (Some(session.requester_id.clone()), Role::Requester),
        };
        if let Some(recipient_id) = recipient_id {
            self.notifier
                .notify(
                    &principal.id,
                    principal.role,
                    Some(&recipient_id),
                    recipient_role,
                    "message_received",
                    "New message",
                    "You have received a new message",
                )
                .await;
        }

        info!(session_id, message_id = %message.id, sender = %principal.id, "message sent");
        Ok(message)
    }

    /// Messages in persisted creation order. Same gate as `send`.
    pub async fn fetch(
        &self,
        session_id: &str,
        principal: &Principal,
    ) -> Result<Vec<MessageRow>, ApiError> {
        self.gate(session_id, principal).await?;
        Ok(self.storage.list_messages(session_id).await?)
    }

    /// A participant may delete only a message they authored, only within
    /// their own session membership.
    pub async fn delete(
        &self,
        message_id: &str,
        principal: &Principal,
    ) -> Result<MessageRow, ApiError> {
        let message = self
            .storage
            .get_message(message_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Message not found".to_string()))?;
        let session = self
            .storage
            .get_session(&message.session_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Session not found".to_string()))?;

        let allowed = match principal.role {
            Role::Requester => {
                message.sender_role == Role::Requester.as_str()
                    && session.requester_id == principal.id
            }
            Role::Counselor => {
                message.sender_role == Role::Counselor.as_str()
                    && session.counselor_id.as_deref() == Some(principal.id.as_str())
            }
            Role::Admin => false,
        };
        if !allowed {
            return Err(ApiError::Authorization("Access denied".to_string()));
        }

        self.storage.delete_message(message_id).await?;
        info!(message_id, session_id = %message.session_id, "message deleted");
        Ok(message)
    }

    /// Shared state/authorization gate: the session must exist, be active,
    /// and the actor must be its requester or assigned counselor. Admins
    /// observe through the role-scoped REST reads, not this channel.
    async fn gate(
        &self,
        session_id: &str,
        principal: &Principal,
    ) -> Result<SessionRow, ApiError> {
        let session = self
            .storage
            .get_session(session_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Session not found".to_string()))?;

        if SessionStatus::parse(&session.status) != Some(SessionStatus::Active) {
            return Err(ApiError::InvalidState("Session is not active".to_string()));
        }

        let is_participant = match principal.role {
            Role::Requester => session.requester_id == principal.id,
            Role::Counselor => session.counselor_id.as_deref() == Some(principal.id.as_str()),
            Role::Admin => false,
        };
        if !is_participant {
            return Err(ApiError::Authorization("Access denied".to_string()));
        }

        Ok(session)
    }

    fn session_lock(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.send_locks.lock().unwrap_or_else(|e| {
            warn!("send lock map poisoned — recovering");
            e.into_inner()
        });
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::SessionEngine;

    async fn fixture() -> (MessagingGateway, SessionEngine, Arc<Storage>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(Storage::new(dir.path()).await.unwrap());
        let notifier = Arc::new(Notifier::new(storage.clone()));
        let rooms = Arc::new(RoomRegistry::new());
        let gateway = MessagingGateway::new(storage.clone(), notifier.clone(), rooms);
        let engine = SessionEngine::new(storage.clone(), notifier);
        (gateway, engine, storage, dir)
    }

    fn requester(id: &str) -> Principal {
        Principal::new(id, Role::Requester)
    }

    async fn active_session(
        engine: &SessionEngine,
        storage: &Storage,
        requester_id: &str,
    ) -> SessionRow {
        storage.upsert_counselor("c1", true).await.unwrap();
        let session = engine.create(&requester(requester_id)).await.unwrap();
        engine.auto_assign(&session.id).await.unwrap();
        storage.get_session(&session.id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn send_rejects_empty_content() {
        let (g, e, s, _dir) = fixture().await;
        let session = active_session(&e, &s, "r1").await;
        let err = g.send(&session.id, &requester("r1"), "   ").await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn send_requires_an_active_session() {
        let (g, e, _s, _dir) = fixture().await;
        let session = e.create(&requester("r1")).await.unwrap();

        // waiting
        let err = g.send(&session.id, &requester("r1"), "hi").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidState(_)));

        // absent
        let err = g.send("missing", &requester("r1"), "hi").await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn send_is_participant_only_and_admins_are_rest_observers() {
        let (g, e, s, _dir) = fixture().await;
        let session = active_session(&e, &s, "r1").await;

        let err = g.send(&session.id, &requester("r2"), "hi").await.unwrap_err();
        assert!(matches!(err, ApiError::Authorization(_)));
        let err = g
            .send(&session.id, &Principal::new("c9", Role::Counselor), "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Authorization(_)));
        let err = g
            .send(&session.id, &Principal::new("a1", Role::Admin), "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Authorization(_)));
    }

    #[tokio::test]
    async fn fetch_returns_messages_in_creation_order() {
        let (g, e, s, _dir) = fixture().await;
        let session = active_session(&e, &s, "r1").await;

        g.send(&session.id, &requester("r1"), "first").await.unwrap();
        g.send(&session.id, &Principal::new("c1", Role::Counselor), "second")
            .await
            .unwrap();
        g.send(&session.id, &requester("r1"), "third").await.unwrap();

        let messages = g.fetch(&session.id, &requester("r1")).await.unwrap();
        let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second", "third"]);
        assert!(messages.windows(2).all(|w| w[0].seq < w[1].seq));
    }

    #[tokio::test]
    async fn send_pushes_to_joined_room_members() {
        let (g, e, s, _dir) = fixture().await;
        let session = active_session(&e, &s, "r1").await;
        let (_conn, mut rx) = g.rooms().join(&session.id);

        g.send(&session.id, &requester("r1"), "hello").await.unwrap();
        let event: serde_json::Value =
            serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(event["type"], "receive_message");
        assert_eq!(event["message"]["content"], "hello");
        assert_eq!(event["message"]["sender_role"], "requester");
    }

    #[tokio::test]
    async fn send_notifies_the_other_participant() {
        let (g, e, s, _dir) = fixture().await;
        let session = active_session(&e, &s, "r1").await;
        let before = s.list_notifications_all().await.unwrap().len();

        g.send(&session.id, &requester("r1"), "hello").await.unwrap();

        let all = s.list_notifications_all().await.unwrap();
        assert_eq!(all.len(), before + 1);
        assert_eq!(all[0].kind, "message_received");
        assert_eq!(all[0].recipient_id.as_deref(), Some("c1"));
    }

    #[tokio::test]
    async fn delete_is_author_only_within_own_session() {
        let (g, e, s, _dir) = fixture().await;
        let session = active_session(&e, &s, "r1").await;
        let msg = g.send(&session.id, &requester("r1"), "mine").await.unwrap();

        // Counselor cannot delete the requester's message.
        let err = g
            .delete(&msg.id, &Principal::new("c1", Role::Counselor))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Authorization(_)));
        // Neither can an admin — deletion is an author right.
        let err = g
            .delete(&msg.id, &Principal::new("a1", Role::Admin))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Authorization(_)));

        g.delete(&msg.id, &requester("r1")).await.unwrap();
        let err = g.delete(&msg.id, &requester("r1")).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn ended_session_rejects_send_and_fetch() {
        let (g, e, s, _dir) = fixture().await;
        let session = active_session(&e, &s, "r1").await;
        e.end(&session.id, &Principal::new("a1", Role::Admin))
            .await
            .unwrap();

        let err = g.send(&session.id, &requester("r1"), "late").await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidState(_)));
        let err = g.fetch(&session.id, &requester("r1")).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidState(_)));
    }
}

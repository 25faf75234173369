//! Realtime transport: one WebSocket listener, one room per session.
//!
//! Clients connect, send a `join` frame naming the session and their actor
//! identity, and from then on receive `receive_message` events pushed by the
//! gateway. Room membership is validated against session participancy before
//! the first push — the transport itself carries no credentials, so an actor
//! that is not the session's requester or assigned counselor is rejected at
//! join time. Admins observe via the REST surface, not the live channel.

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::identity::Role;
use crate::sessions::model::SessionStatus;
use crate::AppContext;

/// How long a client gets to send its `join` frame before the socket closes.
const JOIN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

#[derive(Deserialize)]
struct ClientFrame {
    #[serde(rename = "type")]
    kind: String,
    session_id: Option<String>,
    actor_id: Option<String>,
    role: Option<String>,
}

pub async fn run(ctx: Arc<AppContext>) -> Result<()> {
    let addr = format!("{}:{}", ctx.config.bind_address, ctx.config.realtime_port);
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "realtime listener ready");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(c) => c,
            Err(e) => {
                warn!(err = %e, "accept error");
                continue;
            }
        };
        debug!(peer = %peer, "new realtime connection");
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, ctx).await {
                debug!(peer = %peer, err = %e, "realtime connection closed with error");
            }
        });
    }
}

async fn handle_connection(stream: tokio::net::TcpStream, ctx: Arc<AppContext>) -> Result<()> {
    let ws = accept_async(stream).await?;
    let (mut sink, mut stream) = ws.split();

    // ── Join handshake ───────────────────────────────────────────────────────
    // The first frame must be a join naming the session and the actor. The
    // actor is checked against the session's participants before the
    // connection sees a single event.
    let first = tokio::time::timeout(JOIN_TIMEOUT, stream.next()).await;
    let text = match first {
        Ok(Some(Ok(Message::Text(t)))) => t,
        // Timeout, closed, or a non-text frame — drop silently.
        _ => return Ok(()),
    };

    let frame: ClientFrame = match serde_json::from_str(&text) {
        Ok(f) => f,
        Err(_) => {
            let _ = sink
                .send(Message::Text(reject("Malformed join frame")))
                .await;
            return Ok(());
        }
    };

    if frame.kind != "join" {
        let _ = sink
            .send(Message::Text(reject("Expected a join frame first")))
            .await;
        return Ok(());
    }

    let (session_id, actor_id, role) = match (frame.session_id, frame.actor_id, frame.role) {
        (Some(s), Some(a), Some(r)) => (s, a, r),
        _ => {
            let _ = sink
                .send(Message::Text(reject("join requires session_id, actor_id and role")))
                .await;
            return Ok(());
        }
    };

    match validate_membership(&ctx, &session_id, &actor_id, &role).await {
        Ok(()) => {}
        Err(reason) => {
            let _ = sink.send(Message::Text(reject(&reason))).await;
            return Ok(());
        }
    }

    let (conn_id, mut events) = ctx.rooms.join(&session_id);
    debug!(session_id = %session_id, actor = %actor_id, conn_id, "joined room");
    let _ = sink
        .send(Message::Text(
            json!({ "type": "joined", "session_id": session_id }).to_string(),
        ))
        .await;

    loop {
        tokio::select! {
            // Incoming frame from the client
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let leave = serde_json::from_str::<ClientFrame>(&text)
                            .map(|f| f.kind == "leave")
                            .unwrap_or(false);
                        if leave {
                            break;
                        }
                        // Messages are sent over the REST surface; anything
                        // else on the live channel is ignored.
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sink.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(err = %e, "ws error");
                        break;
                    }
                    _ => {}
                }
            }
            // Outgoing room event
            event = events.recv() => {
                match event {
                    Some(text) => {
                        if let Err(e) = sink.send(Message::Text(text)).await {
                            warn!(err = %e, "push failed");
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    ctx.rooms.leave(conn_id);
    debug!(session_id = %session_id, conn_id, "left room");
    Ok(())
}

/// The actor must be the session's requester or its assigned counselor, and
/// the session must still be live (waiting participants may pre-join; ended
/// sessions push nothing and accept nobody).
async fn validate_membership(
    ctx: &AppContext,
    session_id: &str,
    actor_id: &str,
    role: &str,
) -> Result<(), String> {
    let Some(role) = Role::parse(role) else {
        return Err("Unknown role".to_string());
    };

    let session = ctx
        .storage
        .get_session(session_id)
        .await
        .map_err(|_| "Session lookup failed".to_string())?
        .ok_or_else(|| "Session not found".to_string())?;

    if SessionStatus::parse(&session.status) == Some(SessionStatus::Ended) {
        return Err("Session has ended".to_string());
    }

    let is_participant = match role {
        Role::Requester => session.requester_id == actor_id,
        Role::Counselor => session.counselor_id.as_deref() == Some(actor_id),
        // Admins are read-only observers via REST, never room members.
        Role::Admin => false,
    };
    if !is_participant {
        return Err("Not a participant of this session".to_string());
    }
    Ok(())
}

fn reject(reason: &str) -> String {
    json!({ "type": "error", "error": reason }).to_string()
}

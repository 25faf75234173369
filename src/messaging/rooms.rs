//! Room membership service owned by the messaging gateway.
//!
//! One room per session, keyed by session id. Membership is mutated by
//! connect/disconnect events from independent client connections and read by
//! every Send. The registry lock is a plain mutex held only for map access;
//! pushes are non-blocking unbounded-channel enqueues, so no lock is ever
//! held across a suspension point. Lifetime is scoped to process uptime.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;

pub type ConnId = u64;

#[derive(Default)]
struct Inner {
    /// session id → (connection id → outbound event queue)
    rooms: HashMap<String, HashMap<ConnId, mpsc::UnboundedSender<String>>>,
    /// connection id → session id, for O(1) leave on disconnect
    memberships: HashMap<ConnId, String>,
}

pub struct RoomRegistry {
    inner: Mutex<Inner>,
    next_conn: AtomicU64,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            next_conn: AtomicU64::new(1),
        }
    }

    /// Add a connection to a session's room. Returns the connection id and
    /// the receiver its socket task drains.
    pub fn join(&self, session_id: &str) -> (ConnId, mpsc::UnboundedReceiver<String>) {
        let conn_id = self.next_conn.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().expect("room registry poisoned");
        inner
            .rooms
            .entry(session_id.to_string())
            .or_default()
            .insert(conn_id, tx);
        inner.memberships.insert(conn_id, session_id.to_string());
        (conn_id, rx)
    }

    /// Remove a connection from whatever room it joined. Idempotent.
    pub fn leave(&self, conn_id: ConnId) {
        let mut inner = self.inner.lock().expect("room registry poisoned");
        if let Some(session_id) = inner.memberships.remove(&conn_id) {
            if let Some(room) = inner.rooms.get_mut(&session_id) {
                room.remove(&conn_id);
                if room.is_empty() {
                    inner.rooms.remove(&session_id);
                }
            }
        }
    }

    /// Push an event to every connection in the session's room.
    ///
    /// Dead connections (receiver dropped without a clean leave) are pruned
    /// on the way through. Returns the number of live deliveries.
    pub fn broadcast(&self, session_id: &str, event: &str) -> usize {
        let mut inner = self.inner.lock().expect("room registry poisoned");
        let Some(room) = inner.rooms.get_mut(session_id) else {
            return 0;
        };

        let mut dead: Vec<ConnId> = Vec::new();
        let mut delivered = 0;
        for (conn_id, tx) in room.iter() {
            if tx.send(event.to_string()).is_ok() {
                delivered += 1;
            } else {
                dead.push(*conn_id);
            }
        }
        for conn_id in &dead {
            room.remove(conn_id);
        }
        for conn_id in &dead {
            inner.memberships.remove(conn_id);
        }
        delivered
    }

    pub fn member_count(&self, session_id: &str) -> usize {
        let inner = self.inner.lock().expect("room registry poisoned");
        inner.rooms.get(session_id).map_or(0, HashMap::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn join_broadcast_leave() {
        let rooms = RoomRegistry::new();
        let (id_a, mut rx_a) = rooms.join("s1");
        let (_id_b, mut rx_b) = rooms.join("s1");
        let (_id_c, mut rx_c) = rooms.join("s2");

        assert_eq!(rooms.member_count("s1"), 2);
        assert_eq!(rooms.broadcast("s1", "hello"), 2);
        assert_eq!(rx_a.recv().await.unwrap(), "hello");
        assert_eq!(rx_b.recv().await.unwrap(), "hello");
        assert!(rx_c.try_recv().is_err());

        rooms.leave(id_a);
        assert_eq!(rooms.member_count("s1"), 1);
        assert_eq!(rooms.broadcast("s1", "again"), 1);
    }

    #[tokio::test]
    async fn broadcast_prunes_dropped_receivers() {
        let rooms = RoomRegistry::new();
        let (_id, rx) = rooms.join("s1");
        drop(rx);
        assert_eq!(rooms.broadcast("s1", "x"), 0);
        assert_eq!(rooms.member_count("s1"), 0);
    }

    #[tokio::test]
    async fn broadcast_to_empty_room_is_a_noop() {
        let rooms = RoomRegistry::new();
        assert_eq!(rooms.broadcast("nobody-home", "x"), 0);
    }

    #[tokio::test]
    async fn concurrent_join_leave_broadcast_keeps_membership_consistent() {
        use std::sync::Arc;
        let rooms = Arc::new(RoomRegistry::new());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let rooms = rooms.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    let (id, _rx) = rooms.join("s1");
                    rooms.broadcast("s1", "tick");
                    rooms.leave(id);
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(rooms.member_count("s1"), 0);
    }
}

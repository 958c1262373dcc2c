//! Seat-session registry
//!
//! Sessions are grouped by function in a DashMap, which shards its locks so
//! one busy screening never serializes the others. Each session owns a
//! bounded outbound buffer; a consumer that falls behind is dropped from the
//! registry (its channel closes, which closes the socket) instead of ever
//! blocking a broadcast.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

use super::messages::WsMessage;
use crate::core_types::{FunctionId, UserId};

/// Bounded outbound channel to one session.
pub type SessionSender = mpsc::Sender<WsMessage>;

/// Unique session identifier.
pub type SessionId = u64;

struct Session {
    id: SessionId,
    user: UserId,
    tx: SessionSender,
}

/// Thread-safe registry of realtime sessions, keyed by function.
pub struct SessionManager {
    groups: DashMap<FunctionId, Vec<Session>>,
    next_session_id: AtomicU64,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            groups: DashMap::new(),
            next_session_id: AtomicU64::new(1),
        }
    }

    /// Register a session in its function group.
    pub fn register(&self, function: FunctionId, user: UserId, tx: SessionSender) -> SessionId {
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        self.groups
            .entry(function)
            .or_default()
            .push(Session { id, user, tx });

        tracing::info!(
            function = %function,
            user = %user,
            session = id,
            "Seat session joined"
        );
        id
    }

    /// Remove a session. Cleans up empty function groups.
    pub fn unregister(&self, function: FunctionId, session: SessionId) {
        if let Some(mut group) = self.groups.get_mut(&function) {
            group.retain(|s| s.id != session);
            let empty = group.is_empty();
            drop(group);
            if empty {
                self.groups.remove(&function);
            }
            tracing::info!(function = %function, session, "Seat session left");
        }
    }

    /// Direct message to one session. Returns false if the session is gone
    /// or its buffer is full.
    pub fn send_to(&self, function: FunctionId, session: SessionId, message: WsMessage) -> bool {
        let Some(group) = self.groups.get(&function) else {
            return false;
        };
        group
            .iter()
            .find(|s| s.id == session)
            .map(|s| s.tx.try_send(message).is_ok())
            .unwrap_or(false)
    }

    /// Broadcast to every session in the function group, skipping sessions
    /// of `exclude_user`. Sessions whose buffer is full are dropped from the
    /// registry; their channel closes and the socket follows.
    pub fn broadcast(
        &self,
        function: FunctionId,
        message: &WsMessage,
        exclude_user: Option<UserId>,
    ) {
        let Some(mut group) = self.groups.get_mut(&function) else {
            return;
        };

        let mut dropped: Vec<SessionId> = Vec::new();
        for session in group.iter() {
            if exclude_user == Some(session.user) {
                continue;
            }
            match session.tx.try_send(message.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        function = %function,
                        session = session.id,
                        "Slow consumer, dropping session"
                    );
                    dropped.push(session.id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    dropped.push(session.id);
                }
            }
        }
        if !dropped.is_empty() {
            group.retain(|s| !dropped.contains(&s.id));
        }
    }

    /// (function groups, total sessions)
    pub fn stats(&self) -> (usize, usize) {
        let groups = self.groups.len();
        let sessions = self.groups.iter().map(|entry| entry.value().len()).sum();
        (groups, sessions)
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn held_msg(function: FunctionId, user: UserId) -> WsMessage {
        WsMessage::SeatHeld {
            function,
            user,
            seats: vec![],
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_register_broadcast_unregister() {
        let manager = SessionManager::new();
        let function = Uuid::new_v4();
        let (u1, u2) = (Uuid::new_v4(), Uuid::new_v4());

        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, mut rx2) = mpsc::channel(4);
        let s1 = manager.register(function, u1, tx1);
        let _s2 = manager.register(function, u2, tx2);
        assert_eq!(manager.stats(), (1, 2));

        // u1's action is broadcast to u2 only
        manager.broadcast(function, &held_msg(function, u1), Some(u1));
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_ok());

        manager.unregister(function, s1);
        assert_eq!(manager.stats(), (1, 1));
    }

    #[tokio::test]
    async fn test_slow_consumer_is_dropped() {
        let manager = SessionManager::new();
        let function = Uuid::new_v4();
        let user = Uuid::new_v4();

        let (tx, _rx) = mpsc::channel(1);
        manager.register(function, user, tx);

        // First message fills the buffer, the second gets the session dropped
        manager.broadcast(function, &held_msg(function, Uuid::new_v4()), None);
        assert_eq!(manager.stats(), (1, 1));
        manager.broadcast(function, &held_msg(function, Uuid::new_v4()), None);
        assert_eq!(manager.stats().1, 0);
    }

    #[tokio::test]
    async fn test_send_to_specific_session() {
        let manager = SessionManager::new();
        let function = Uuid::new_v4();
        let user = Uuid::new_v4();
        let (tx, mut rx) = mpsc::channel(4);
        let session = manager.register(function, user, tx);

        assert!(manager.send_to(
            function,
            session,
            WsMessage::Error {
                code: "TEST".into(),
                message: "test".into(),
                timestamp: Utc::now(),
            }
        ));
        assert!(rx.try_recv().is_ok());
        assert!(!manager.send_to(function, session + 1, held_msg(function, user)));
    }
}

//! Connected-client sessions and the registry tracking them.
//!
//! A [`ClientSession`] is created when a transport reports a new connection
//! (or when a stateless client joins a room) and destroyed on disconnect.
//! The registry is owned exclusively by the relay hub task; nothing here is
//! shared or locked.

use std::collections::HashMap;

use tokio::sync::mpsc;

use crate::protocol::{ClientId, MemberInfo, Role, RoomId, ServerMessage};

// ── Client handle ───────────────────────────────────────────────────

/// How outbound messages reach a client.
#[derive(Debug, Clone)]
pub enum ClientHandle {
    /// Persistent transports: messages go down this channel to the
    /// connection's writer task, which owns the socket.
    Channel(mpsc::UnboundedSender<ServerMessage>),
    /// Stateless fallback: there is no live connection. Deliveries land in
    /// the room's polling relay buffer instead.
    Polling,
}

// ── Session ─────────────────────────────────────────────────────────

/// State tracked for one connected (or polling) client.
#[derive(Debug)]
pub struct ClientSession {
    pub id: ClientId,
    /// Display name, set on the first `join-room`.
    pub user_name: Option<String>,
    /// Declared role, set on the first `join-room`. Trusted as-is.
    pub role: Option<Role>,
    /// Room the client currently belongs to, if any.
    pub room: Option<RoomId>,
    handle: ClientHandle,
}

impl ClientSession {
    pub fn new(id: ClientId, handle: ClientHandle) -> Self {
        Self {
            id,
            user_name: None,
            role: None,
            room: None,
            handle,
        }
    }

    /// Whether this session belongs to the stateless fallback transport.
    pub fn is_polling(&self) -> bool {
        matches!(self.handle, ClientHandle::Polling)
    }

    /// Queue a message to a persistent client.
    ///
    /// Returns `false` when the client cannot be reached this way — either
    /// the writer task is gone (connection already closed) or the session
    /// is a polling one. Callers log and move on; a dead recipient never
    /// aborts a broadcast.
    pub fn try_send(&self, message: ServerMessage) -> bool {
        match &self.handle {
            ClientHandle::Channel(tx) => tx.send(message).is_ok(),
            ClientHandle::Polling => false,
        }
    }

    /// Member record for presence snapshots. `None` until the client has
    /// joined a room and declared a name and role.
    pub fn member_info(&self) -> Option<MemberInfo> {
        Some(MemberInfo {
            id: self.id,
            user_name: self.user_name.clone()?,
            role: self.role?,
        })
    }
}

// ── Registry ────────────────────────────────────────────────────────

/// All currently known sessions, keyed by client id.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<ClientId, ClientSession>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly connected session. Returns the previous session if
    /// the id was already present (a polling client re-joining with the id
    /// it was allocated earlier).
    pub fn insert(&mut self, session: ClientSession) -> Option<ClientSession> {
        self.sessions.insert(session.id, session)
    }

    pub fn get(&self, id: ClientId) -> Option<&ClientSession> {
        self.sessions.get(&id)
    }

    pub fn get_mut(&mut self, id: ClientId) -> Option<&mut ClientSession> {
        self.sessions.get_mut(&id)
    }

    /// Destroy a session. Idempotent.
    pub fn remove(&mut self, id: ClientId) -> Option<ClientSession> {
        self.sessions.remove(&id)
    }

    pub fn contains(&self, id: ClientId) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn member_info_requires_name_and_role() {
        let id = Uuid::new_v4();
        let mut session = ClientSession::new(id, ClientHandle::Polling);
        assert!(session.member_info().is_none());

        session.user_name = Some("Alice".into());
        assert!(session.member_info().is_none());

        session.role = Some(Role::Candidate);
        let info = session.member_info().unwrap();
        assert_eq!(info.id, id);
        assert_eq!(info.user_name, "Alice");
        assert_eq!(info.role, Role::Candidate);
    }

    #[test]
    fn try_send_reaches_channel_sessions_only() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let live = ClientSession::new(Uuid::new_v4(), ClientHandle::Channel(tx));
        let polling = ClientSession::new(Uuid::new_v4(), ClientHandle::Polling);

        assert!(live.try_send(ServerMessage::UserLeft {
            user_id: Uuid::new_v4(),
        }));
        assert!(rx.try_recv().is_ok());

        assert!(!polling.try_send(ServerMessage::UserLeft {
            user_id: Uuid::new_v4(),
        }));
    }

    #[test]
    fn try_send_fails_after_receiver_drops() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let session = ClientSession::new(Uuid::new_v4(), ClientHandle::Channel(tx));
        assert!(!session.try_send(ServerMessage::UserLeft {
            user_id: Uuid::new_v4(),
        }));
    }

    #[test]
    fn remove_is_idempotent() {
        let mut registry = SessionRegistry::new();
        let id = Uuid::new_v4();
        registry.insert(ClientSession::new(id, ClientHandle::Polling));

        assert!(registry.remove(id).is_some());
        assert!(registry.remove(id).is_none());
        assert!(registry.is_empty());
    }
}

//! Message routing: one inbound message in, zero or more outbound sends out.
//!
//! The router owns no state of its own. It dispatches against
//! [`RelayState`], which the hub task passes in by reference — there is no
//! module-level room map anywhere in this crate. Because exactly one task
//! ever holds `&mut RelayState`, every mutation of a room's membership and
//! of a session's room pointer is serialized by construction.

use chrono::{SecondsFormat, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::polling::PollingBuffers;
use crate::presence;
use crate::protocol::{ClientId, ClientMessage, MemberInfo, Role, RoomId, ServerMessage};
use crate::rooms::RoomDirectory;
use crate::session::SessionRegistry;

/// The mutable relay state: sessions, rooms, and polling buffers.
///
/// Constructed by the server, owned exclusively by the hub task.
#[derive(Debug)]
pub struct RelayState {
    pub sessions: SessionRegistry,
    pub rooms: RoomDirectory,
    pub polling: PollingBuffers,
}

impl RelayState {
    pub fn new(event_log_capacity: usize) -> Self {
        Self {
            sessions: SessionRegistry::new(),
            rooms: RoomDirectory::new(),
            polling: PollingBuffers::new(event_log_capacity),
        }
    }

    /// Snapshot of member records for a room, in join order. Members that
    /// have not completed a join (no name/role yet) are omitted.
    pub fn member_infos(&self, room_id: &str) -> Vec<MemberInfo> {
        self.rooms
            .members(room_id)
            .iter()
            .filter_map(|id| self.sessions.get(*id)?.member_info())
            .collect()
    }
}

/// Dispatch one inbound message from `sender`.
///
/// Unknown message types never reach this function — they fail envelope
/// parsing at the transport layer and are logged and dropped there.
pub fn dispatch(state: &mut RelayState, sender: ClientId, message: ClientMessage) {
    match message {
        ClientMessage::JoinRoom {
            room_id,
            user_name,
            role,
            user_id,
        } => {
            if user_id.is_some_and(|claimed| claimed != sender) {
                // Persistent connections already have an identity; the
                // declared one is informational only.
                debug!(client = %sender, ?user_id, "ignoring mismatched userId in join-room");
            }
            join_room(state, sender, &room_id, user_name, role);
        }
        ClientMessage::LeaveRoom { .. } => {
            leave(state, sender);
        }
        ClientMessage::SignalingMessage {
            message,
            target_user_id,
            ..
        } => relay_signaling(state, sender, message, target_user_id),
        ClientMessage::ChatMessage {
            message, user_name, ..
        } => relay_chat(state, sender, message, user_name),
    }
}

/// Insert `sender` into `room_id`, notify the rest of the room, and send
/// the sender a snapshot.
///
/// The snapshot is taken after insertion, so it includes the sender
/// itself. Joining a room while a member of another one leaves the old
/// room first; re-joining the current room refreshes name/role and
/// re-sends the snapshot without another `user-joined` round.
pub fn join_room(
    state: &mut RelayState,
    sender: ClientId,
    room_id: &str,
    user_name: String,
    role: Role,
) {
    let Some(session) = state.sessions.get_mut(sender) else {
        warn!(client = %sender, room = room_id, "join-room from unknown session");
        return;
    };

    let rejoining = session.room.as_deref() == Some(room_id);
    if !rejoining && session.room.is_some() {
        leave(state, sender);
    }

    // Re-borrow: `leave` above needed the whole state.
    let Some(session) = state.sessions.get_mut(sender) else {
        return;
    };
    session.user_name = Some(user_name);
    session.role = Some(role);
    session.room = Some(room_id.to_owned());

    let newly_added = state.rooms.add_member(room_id, sender);
    let members = state.rooms.members(room_id).to_vec();

    if newly_added {
        if let Some(joining) = state.sessions.get(sender).and_then(|s| s.member_info()) {
            presence::notify_joined(
                &state.sessions,
                &mut state.polling,
                room_id,
                &members,
                &joining,
            );
        }
        debug!(client = %sender, room = room_id, members = members.len(), "client joined room");
    }

    let snapshot = state.member_infos(room_id);
    presence::send_snapshot(&state.sessions, sender, snapshot);
}

/// Remove `sender` from its current room and notify the remaining
/// members. No-op when the sender has no current room — calling this
/// twice in a row is explicitly fine.
pub fn leave(state: &mut RelayState, sender: ClientId) {
    let Some(room_id) = state
        .sessions
        .get_mut(sender)
        .and_then(|session| session.room.take())
    else {
        return;
    };

    state.rooms.remove_member(&room_id, sender);
    debug!(client = %sender, room = %room_id, "client left room");

    if state.rooms.get(&room_id).is_none() {
        // Last one out: the room is gone, and so is its event log.
        state.polling.remove_room(&room_id);
        return;
    }

    let members = state.rooms.members(&room_id).to_vec();
    presence::notify_left(&state.sessions, &mut state.polling, &room_id, &members, sender);
}

/// `leave` followed by destroying the session. Idempotent — transports may
/// observe several close/error signals for one connection, but only the
/// first call does any work.
pub fn disconnect(state: &mut RelayState, client: ClientId) {
    leave(state, client);
    if state.sessions.remove(client).is_some() {
        debug!(client = %client, "session destroyed");
    }
}

/// Relay an opaque signaling payload.
///
/// With a target: unicast if the target is currently a member of the
/// sender's room; otherwise drop and log — deliberately no broadcast
/// fallback, and the sender is not informed. Without a target: broadcast
/// to every other room member.
fn relay_signaling(
    state: &mut RelayState,
    sender: ClientId,
    payload: serde_json::Value,
    target: Option<ClientId>,
) {
    let Some(room_id) = current_room(state, sender, "signaling-message") else {
        return;
    };

    let outbound = ServerMessage::SignalingMessage {
        message: payload,
        from_user_id: sender,
        target_user_id: target,
    };

    match target {
        Some(target_id) => {
            if state.rooms.contains(&room_id, target_id) {
                presence::unicast(&state.sessions, &mut state.polling, &room_id, target_id, outbound);
            } else {
                warn!(
                    client = %sender,
                    target = %target_id,
                    room = %room_id,
                    "dropping signaling message: target is not a room member"
                );
            }
        }
        None => {
            let members = state.rooms.members(&room_id).to_vec();
            presence::broadcast_room(
                &state.sessions,
                &mut state.polling,
                &room_id,
                &members,
                Some(sender),
                &outbound,
            );
        }
    }
}

/// Stamp a chat line with a generated id and timestamp and broadcast it to
/// the entire room, sender included, so every participant renders an
/// identical transcript.
fn relay_chat(state: &mut RelayState, sender: ClientId, message: String, user_name: String) {
    let Some(room_id) = current_room(state, sender, "chat-message") else {
        return;
    };

    let outbound = ServerMessage::ChatMessage {
        id: Uuid::new_v4(),
        user_name,
        message,
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        user_id: sender,
    };

    let members = state.rooms.members(&room_id).to_vec();
    presence::broadcast_room(
        &state.sessions,
        &mut state.polling,
        &room_id,
        &members,
        None,
        &outbound,
    );
}

fn current_room(state: &RelayState, sender: ClientId, kind: &str) -> Option<RoomId> {
    let room = state
        .sessions
        .get(sender)
        .and_then(|session| session.room.clone());
    if room.is_none() {
        warn!(client = %sender, kind, "dropping message from client outside any room");
    }
    room
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
    use crate::session::{ClientHandle, ClientSession};
    use tokio::sync::mpsc;

    struct TestClient {
        id: ClientId,
        rx: mpsc::UnboundedReceiver<ServerMessage>,
    }

    impl TestClient {
        fn recv(&mut self) -> ServerMessage {
            self.rx.try_recv().expect("expected a queued message")
        }

        fn drain(&mut self) {
            while self.rx.try_recv().is_ok() {}
        }

        fn is_empty(&mut self) -> bool {
            self.rx.try_recv().is_err()
        }
    }

    fn connect(state: &mut RelayState) -> TestClient {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        state
            .sessions
            .insert(ClientSession::new(id, ClientHandle::Channel(tx)));
        TestClient { id, rx }
    }

    fn join(state: &mut RelayState, client: &TestClient, room: &str, name: &str, role: Role) {
        dispatch(
            state,
            client.id,
            ClientMessage::JoinRoom {
                room_id: room.into(),
                user_name: name.into(),
                role,
                user_id: None,
            },
        );
    }

    #[test]
    fn solo_join_gets_snapshot_and_no_stray_user_joined() {
        // First member of a fresh room.
        let mut state = RelayState::new(50);
        let mut x = connect(&mut state);

        join(&mut state, &x, "R1", "Alice", Role::Candidate);

        match x.recv() {
            ServerMessage::RoomUsers(users) => {
                assert_eq!(users.len(), 1, "snapshot includes the joiner itself");
                assert_eq!(users[0].user_name, "Alice");
                assert_eq!(users[0].role, Role::Candidate);
            }
            other => panic!("expected room-users, got {other:?}"),
        }
        assert!(x.is_empty(), "no user-joined may reach the joiner");
    }

    #[test]
    fn second_join_notifies_existing_members() {
        let mut state = RelayState::new(50);
        let mut x = connect(&mut state);
        let mut y = connect(&mut state);

        join(&mut state, &x, "R1", "Alice", Role::Candidate);
        x.drain();
        join(&mut state, &y, "R1", "Bob", Role::Interviewer);

        match x.recv() {
            ServerMessage::UserJoined { user_id, user_name, role } => {
                assert_eq!(user_id, y.id);
                assert_eq!(user_name, "Bob");
                assert_eq!(role, Role::Interviewer);
            }
            other => panic!("expected user-joined, got {other:?}"),
        }
        match y.recv() {
            ServerMessage::RoomUsers(users) => {
                assert_eq!(users.len(), 2);
            }
            other => panic!("expected room-users, got {other:?}"),
        }
    }

    #[test]
    fn targeted_signaling_reaches_only_the_target() {
        let mut state = RelayState::new(50);
        let mut x = connect(&mut state);
        let mut y = connect(&mut state);
        let mut z = connect(&mut state);
        join(&mut state, &x, "R1", "Alice", Role::Candidate);
        join(&mut state, &y, "R1", "Bob", Role::Interviewer);
        join(&mut state, &z, "R1", "Eve", Role::Admin);
        x.drain();
        y.drain();
        z.drain();

        dispatch(
            &mut state,
            x.id,
            ClientMessage::SignalingMessage {
                room_id: Some("R1".into()),
                message: serde_json::json!({ "type": "offer" }),
                target_user_id: Some(y.id),
                from_user_id: None,
            },
        );

        match y.recv() {
            ServerMessage::SignalingMessage {
                message,
                from_user_id,
                target_user_id,
            } => {
                assert_eq!(message, serde_json::json!({ "type": "offer" }));
                assert_eq!(from_user_id, x.id);
                assert_eq!(target_user_id, Some(y.id));
            }
            other => panic!("expected signaling-message, got {other:?}"),
        }
        assert!(x.is_empty());
        assert!(z.is_empty());
    }

    #[test]
    fn untargeted_signaling_broadcasts_to_everyone_else() {
        let mut state = RelayState::new(50);
        let mut x = connect(&mut state);
        let mut y = connect(&mut state);
        let mut z = connect(&mut state);
        join(&mut state, &x, "R1", "Alice", Role::Candidate);
        join(&mut state, &y, "R1", "Bob", Role::Interviewer);
        join(&mut state, &z, "R1", "Eve", Role::Admin);
        x.drain();
        y.drain();
        z.drain();

        dispatch(
            &mut state,
            x.id,
            ClientMessage::SignalingMessage {
                room_id: None,
                message: serde_json::json!({ "candidate": "..." }),
                target_user_id: None,
                from_user_id: None,
            },
        );

        assert!(matches!(y.recv(), ServerMessage::SignalingMessage { .. }));
        assert!(matches!(z.recv(), ServerMessage::SignalingMessage { .. }));
        assert!(x.is_empty(), "broadcast must exclude the sender");
    }

    #[test]
    fn unknown_unicast_target_is_dropped_without_fallback() {
        let mut state = RelayState::new(50);
        let mut x = connect(&mut state);
        let mut y = connect(&mut state);
        join(&mut state, &x, "R1", "Alice", Role::Candidate);
        join(&mut state, &y, "R1", "Bob", Role::Interviewer);
        x.drain();
        y.drain();

        dispatch(
            &mut state,
            x.id,
            ClientMessage::SignalingMessage {
                room_id: None,
                message: serde_json::json!({ "type": "offer" }),
                target_user_id: Some(Uuid::new_v4()),
                from_user_id: None,
            },
        );

        assert!(x.is_empty(), "sender is not informed");
        assert!(y.is_empty(), "no broadcast fallback");
    }

    #[test]
    fn chat_reaches_the_whole_room_including_the_sender() {
        let mut state = RelayState::new(50);
        let mut x = connect(&mut state);
        let mut y = connect(&mut state);
        join(&mut state, &x, "R1", "Alice", Role::Candidate);
        join(&mut state, &y, "R1", "Bob", Role::Interviewer);
        x.drain();
        y.drain();

        dispatch(
            &mut state,
            x.id,
            ClientMessage::ChatMessage {
                room_id: Some("R1".into()),
                message: "hi".into(),
                user_name: "Alice".into(),
                user_id: None,
            },
        );

        let to_x = x.recv();
        let to_y = y.recv();
        assert_eq!(to_x, to_y, "both participants get an identical transcript line");
        match to_x {
            ServerMessage::ChatMessage {
                message,
                user_id,
                user_name,
                timestamp,
                ..
            } => {
                assert_eq!(message, "hi");
                assert_eq!(user_id, x.id);
                assert_eq!(user_name, "Alice");
                assert!(!timestamp.is_empty());
            }
            other => panic!("expected chat-message, got {other:?}"),
        }
    }

    #[test]
    fn leave_is_idempotent() {
        let mut state = RelayState::new(50);
        let x = connect(&mut state);
        let mut y = connect(&mut state);
        join(&mut state, &x, "R1", "Alice", Role::Candidate);
        join(&mut state, &y, "R1", "Bob", Role::Interviewer);
        y.drain();

        leave(&mut state, x.id);
        assert!(matches!(y.recv(), ServerMessage::UserLeft { user_id } if user_id == x.id));

        leave(&mut state, x.id);
        assert!(y.is_empty(), "second leave must be a silent no-op");
        assert_eq!(state.rooms.members("R1"), &[y.id]);
    }

    #[test]
    fn abrupt_disconnect_of_sole_member_deletes_the_room() {
        let mut state = RelayState::new(50);
        let x = connect(&mut state);
        join(&mut state, &x, "R1", "Alice", Role::Candidate);
        assert_eq!(state.rooms.room_count(), 1);

        disconnect(&mut state, x.id);
        assert!(state.rooms.is_empty());
        assert!(state.sessions.is_empty());

        // A later join behaves as a fresh room creation.
        let mut y = connect(&mut state);
        join(&mut state, &y, "R1", "Bob", Role::Interviewer);
        match y.recv() {
            ServerMessage::RoomUsers(users) => assert_eq!(users.len(), 1),
            other => panic!("expected room-users, got {other:?}"),
        }
    }

    #[test]
    fn disconnect_is_idempotent() {
        let mut state = RelayState::new(50);
        let x = connect(&mut state);
        join(&mut state, &x, "R1", "Alice", Role::Candidate);

        disconnect(&mut state, x.id);
        disconnect(&mut state, x.id);
        assert!(state.sessions.is_empty());
    }

    #[test]
    fn membership_always_tracks_the_latest_join_leave_history() {
        let mut state = RelayState::new(50);
        let a = connect(&mut state);
        let b = connect(&mut state);
        let c = connect(&mut state);

        join(&mut state, &a, "R1", "A", Role::Candidate);
        join(&mut state, &b, "R1", "B", Role::Interviewer);
        join(&mut state, &c, "R1", "C", Role::Admin);
        assert_eq!(state.rooms.members("R1").len(), 3);

        leave(&mut state, b.id);
        assert_eq!(state.rooms.members("R1"), &[a.id, c.id]);

        disconnect(&mut state, a.id);
        assert_eq!(state.rooms.members("R1"), &[c.id]);

        // Rejoin after leave counts again.
        join(&mut state, &b, "R1", "B", Role::Interviewer);
        assert_eq!(state.rooms.members("R1"), &[c.id, b.id]);
    }

    #[test]
    fn rejoining_the_same_room_does_not_duplicate_membership() {
        let mut state = RelayState::new(50);
        let mut x = connect(&mut state);
        let mut y = connect(&mut state);
        join(&mut state, &x, "R1", "Alice", Role::Candidate);
        join(&mut state, &y, "R1", "Bob", Role::Interviewer);
        x.drain();
        y.drain();

        join(&mut state, &x, "R1", "Alicia", Role::Candidate);

        assert_eq!(state.rooms.members("R1").len(), 2);
        assert!(y.is_empty(), "no duplicate user-joined on re-join");
        match x.recv() {
            ServerMessage::RoomUsers(users) => {
                let me = users.iter().find(|u| u.id == x.id).unwrap();
                assert_eq!(me.user_name, "Alicia", "re-join refreshes the name");
            }
            other => panic!("expected room-users, got {other:?}"),
        }
    }

    #[test]
    fn switching_rooms_leaves_the_old_room_first() {
        let mut state = RelayState::new(50);
        let mut x = connect(&mut state);
        let mut y = connect(&mut state);
        join(&mut state, &x, "R1", "Alice", Role::Candidate);
        join(&mut state, &y, "R1", "Bob", Role::Interviewer);
        x.drain();
        y.drain();

        join(&mut state, &x, "R2", "Alice", Role::Candidate);

        assert!(matches!(y.recv(), ServerMessage::UserLeft { user_id } if user_id == x.id));
        assert_eq!(state.rooms.members("R1"), &[y.id]);
        assert_eq!(state.rooms.members("R2"), &[x.id]);
    }

    #[test]
    fn messages_from_clients_outside_rooms_are_dropped() {
        let mut state = RelayState::new(50);
        let mut x = connect(&mut state);

        dispatch(
            &mut state,
            x.id,
            ClientMessage::ChatMessage {
                room_id: None,
                message: "hello?".into(),
                user_name: "Alice".into(),
                user_id: None,
            },
        );
        assert!(x.is_empty());
    }

    #[test]
    fn room_deletion_drops_the_polling_log() {
        let mut state = RelayState::new(50);
        let x = connect(&mut state);
        join(&mut state, &x, "R1", "Alice", Role::Candidate);
        dispatch(
            &mut state,
            x.id,
            ClientMessage::ChatMessage {
                room_id: None,
                message: "hi".into(),
                user_name: "Alice".into(),
                user_id: None,
            },
        );
        assert!(!state.polling.since("R1", 0).is_empty());

        disconnect(&mut state, x.id);
        assert_eq!(state.polling.room_count(), 0);
    }
}

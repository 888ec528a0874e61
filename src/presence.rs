//! Presence fan-out: join/leave notifications, room snapshots, and the
//! generic broadcast/unicast primitives the router builds on.
//!
//! Deliveries are channel pushes into each connection's writer task — the
//! hub never blocks on socket I/O here. A recipient whose connection has
//! already closed is logged and skipped; one dead recipient never aborts
//! delivery to the rest of the room.
//!
//! Every room-scoped broadcast is also appended once to the room's polling
//! relay buffer so stateless clients observe the same traffic. The buffer
//! is room-scoped, so a polling client reading it will also see events it
//! caused (its own join, its own chat lines) and filters by `userId` the
//! same way persistent clients filter `chat-message` echoes.

use tracing::{debug, warn};

use crate::polling::PollingBuffers;
use crate::protocol::{ClientId, MemberInfo, ServerMessage};
use crate::session::SessionRegistry;

/// Deliver `message` to one persistent client.
///
/// Returns `false` when the client is unknown, stateless, or its writer
/// task is gone. Failures are logged per-recipient and never propagate.
fn deliver(sessions: &SessionRegistry, to: ClientId, message: ServerMessage) -> bool {
    let Some(session) = sessions.get(to) else {
        debug!(client = %to, "dropping delivery to unknown client");
        return false;
    };
    if session.is_polling() {
        return false;
    }
    let sent = session.try_send(message);
    if !sent {
        warn!(client = %to, "dropping delivery to closed connection");
    }
    sent
}

/// Fan `message` out to every member of a room except `exclude`, then
/// append one copy to the room's polling buffer.
pub fn broadcast_room(
    sessions: &SessionRegistry,
    polling: &mut PollingBuffers,
    room_id: &str,
    members: &[ClientId],
    exclude: Option<ClientId>,
    message: &ServerMessage,
) {
    for member in members {
        if Some(*member) == exclude {
            continue;
        }
        deliver(sessions, *member, message.clone());
    }
    polling.append(room_id, message.clone());
}

/// Deliver `message` to exactly one room member. A stateless target is
/// reached through the room's polling buffer instead of a channel.
pub fn unicast(
    sessions: &SessionRegistry,
    polling: &mut PollingBuffers,
    room_id: &str,
    to: ClientId,
    message: ServerMessage,
) {
    let target_is_polling = sessions.get(to).is_some_and(|s| s.is_polling());
    if target_is_polling {
        polling.append(room_id, message);
    } else {
        deliver(sessions, to, message);
    }
}

/// Emit `user-joined` to every current member other than the joiner.
pub fn notify_joined(
    sessions: &SessionRegistry,
    polling: &mut PollingBuffers,
    room_id: &str,
    members: &[ClientId],
    joining: &MemberInfo,
) {
    let message = ServerMessage::UserJoined {
        user_id: joining.id,
        user_name: joining.user_name.clone(),
        role: joining.role,
    };
    broadcast_room(sessions, polling, room_id, members, Some(joining.id), &message);
}

/// Emit `user-left` to every remaining member.
pub fn notify_left(
    sessions: &SessionRegistry,
    polling: &mut PollingBuffers,
    room_id: &str,
    members: &[ClientId],
    leaving: ClientId,
) {
    let message = ServerMessage::UserLeft { user_id: leaving };
    broadcast_room(sessions, polling, room_id, members, Some(leaving), &message);
}

/// Send the full current member list to exactly one recipient.
///
/// Stateless clients fetch the same snapshot via the member-list endpoint,
/// so a polling recipient here is simply skipped.
pub fn send_snapshot(sessions: &SessionRegistry, to: ClientId, members: Vec<MemberInfo>) {
    deliver(sessions, to, ServerMessage::RoomUsers(members));
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
    use crate::protocol::Role;
    use crate::session::{ClientHandle, ClientSession};
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn channel_session(
        sessions: &mut SessionRegistry,
    ) -> (ClientId, mpsc::UnboundedReceiver<ServerMessage>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        sessions.insert(ClientSession::new(id, ClientHandle::Channel(tx)));
        (id, rx)
    }

    #[test]
    fn broadcast_skips_excluded_member_and_still_hits_buffer() {
        let mut sessions = SessionRegistry::new();
        let mut polling = PollingBuffers::new(10);
        let (a, mut a_rx) = channel_session(&mut sessions);
        let (b, mut b_rx) = channel_session(&mut sessions);

        let message = ServerMessage::UserLeft { user_id: a };
        broadcast_room(&sessions, &mut polling, "r", &[a, b], Some(a), &message);

        assert!(a_rx.try_recv().is_err());
        assert_eq!(b_rx.try_recv().unwrap(), message);
        assert_eq!(polling.since("r", 0).len(), 1);
    }

    #[test]
    fn dead_recipient_does_not_abort_the_rest_of_the_broadcast() {
        let mut sessions = SessionRegistry::new();
        let mut polling = PollingBuffers::new(10);

        let dead = Uuid::new_v4();
        let (dead_tx, dead_rx) = mpsc::unbounded_channel();
        drop(dead_rx);
        sessions.insert(ClientSession::new(dead, ClientHandle::Channel(dead_tx)));
        let (live, mut live_rx) = channel_session(&mut sessions);

        let message = ServerMessage::UserLeft { user_id: Uuid::new_v4() };
        broadcast_room(&sessions, &mut polling, "r", &[dead, live], None, &message);

        assert_eq!(live_rx.try_recv().unwrap(), message);
    }

    #[test]
    fn unicast_to_polling_member_lands_in_the_buffer() {
        let mut sessions = SessionRegistry::new();
        let mut polling = PollingBuffers::new(10);

        let poller = Uuid::new_v4();
        sessions.insert(ClientSession::new(poller, ClientHandle::Polling));

        let message = ServerMessage::UserLeft { user_id: Uuid::new_v4() };
        unicast(&sessions, &mut polling, "r", poller, message.clone());

        let events = polling.since("r", 0);
        assert_eq!(events.len(), 1);
        assert_eq!(events.first().unwrap().event, message);
    }

    #[test]
    fn unicast_to_channel_member_skips_the_buffer() {
        let mut sessions = SessionRegistry::new();
        let mut polling = PollingBuffers::new(10);
        let (live, mut live_rx) = channel_session(&mut sessions);

        let message = ServerMessage::UserLeft { user_id: Uuid::new_v4() };
        unicast(&sessions, &mut polling, "r", live, message.clone());

        assert_eq!(live_rx.try_recv().unwrap(), message);
        assert!(polling.since("r", 0).is_empty());
    }

    #[test]
    fn notify_joined_reaches_everyone_but_the_joiner() {
        let mut sessions = SessionRegistry::new();
        let mut polling = PollingBuffers::new(10);
        let (a, mut a_rx) = channel_session(&mut sessions);
        let (b, mut b_rx) = channel_session(&mut sessions);

        let joining = MemberInfo {
            id: b,
            user_name: "Bob".into(),
            role: Role::Interviewer,
        };
        notify_joined(&sessions, &mut polling, "r", &[a, b], &joining);

        match a_rx.try_recv().unwrap() {
            ServerMessage::UserJoined {
                user_id,
                user_name,
                role,
            } => {
                assert_eq!(user_id, b);
                assert_eq!(user_name, "Bob");
                assert_eq!(role, Role::Interviewer);
            }
            other => panic!("expected user-joined, got {other:?}"),
        }
        assert!(b_rx.try_recv().is_err(), "joiner must not see its own join");
    }

    #[test]
    fn snapshot_goes_to_exactly_one_recipient() {
        let mut sessions = SessionRegistry::new();
        let (a, mut a_rx) = channel_session(&mut sessions);
        let (_b, mut b_rx) = channel_session(&mut sessions);

        send_snapshot(&sessions, a, vec![]);

        assert!(matches!(
            a_rx.try_recv().unwrap(),
            ServerMessage::RoomUsers(_)
        ));
        assert!(b_rx.try_recv().is_err());
    }
}

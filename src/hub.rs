//! The relay hub: a single task that exclusively owns all mutable relay
//! state and serializes every mutation by processing commands in order.
//!
//! Transport backends never touch sessions or rooms directly — they send
//! [`HubCommand`]s over an mpsc channel and the hub invokes the router
//! against its [`RelayState`]. This replaces per-event callbacks mutating
//! a shared map with one worker reading from a queue: no locks in handler
//! code, and no way for concurrent join/leave/disconnect on one room to
//! interleave into a corrupted state.
//!
//! Stateless-transport reads (member lists, buffered events) round-trip
//! through the same queue with a oneshot reply, so they observe the same
//! serialized view of the world.

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::polling::PollingEvent;
use crate::protocol::{ClientId, ClientMessage, MemberInfo, PollingAck, RoomId, ServerMessage};
use crate::router::{self, RelayState};
use crate::session::{ClientHandle, ClientSession};

// ── Commands ────────────────────────────────────────────────────────

/// Normalized events the transport backends feed into the hub.
#[derive(Debug)]
pub enum HubCommand {
    /// A persistent transport accepted a connection. `sender` is the
    /// channel into the connection's writer task.
    Connect {
        client_id: ClientId,
        sender: mpsc::UnboundedSender<ServerMessage>,
    },
    /// A parsed inbound message from a persistent connection.
    Message {
        client_id: ClientId,
        message: ClientMessage,
    },
    /// A persistent connection went away. Transports guarantee exactly one
    /// of these per connection; the hub tolerates duplicates anyway.
    Disconnect { client_id: ClientId },
    /// One stateless-transport submission. `allocated` is the fresh id the
    /// listener generated, used when the message is a join that does not
    /// carry its own `userId`.
    PollingSubmit {
        allocated: ClientId,
        message: ClientMessage,
        reply: oneshot::Sender<PollingAck>,
    },
    /// Member-list read for the stateless transport.
    PollingMembers {
        room_id: RoomId,
        reply: oneshot::Sender<Vec<MemberInfo>>,
    },
    /// Buffered-event read for the stateless transport.
    PollingEvents {
        room_id: RoomId,
        since: u64,
        reply: oneshot::Sender<Vec<PollingEvent>>,
    },
}

// ── Hub ─────────────────────────────────────────────────────────────

/// The state-owning worker. Construct with [`RelayHub::new`], then drive
/// with [`RelayHub::run`] on a spawned task.
#[derive(Debug)]
pub struct RelayHub {
    commands: mpsc::UnboundedReceiver<HubCommand>,
    state: RelayState,
}

impl RelayHub {
    /// Create a hub and the sender half of its command channel.
    pub fn new(event_log_capacity: usize) -> (mpsc::UnboundedSender<HubCommand>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            tx,
            Self {
                commands: rx,
                state: RelayState::new(event_log_capacity),
            },
        )
    }

    /// Process commands until every sender (listeners and connections) has
    /// been dropped.
    pub async fn run(mut self) {
        debug!("relay hub started");
        while let Some(command) = self.commands.recv().await {
            self.handle(command);
        }
        debug!("relay hub stopped");
    }

    fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::Connect { client_id, sender } => {
                let session = ClientSession::new(client_id, ClientHandle::Channel(sender));
                if !session.try_send(ServerMessage::Connected { client_id }) {
                    warn!(client = %client_id, "connection closed before greeting");
                }
                if self.state.sessions.insert(session).is_some() {
                    warn!(client = %client_id, "replacing existing session with same id");
                }
                debug!(client = %client_id, "transport connected");
            }
            HubCommand::Message { client_id, message } => {
                router::dispatch(&mut self.state, client_id, message);
            }
            HubCommand::Disconnect { client_id } => {
                debug!(client = %client_id, "transport disconnected");
                router::disconnect(&mut self.state, client_id);
            }
            HubCommand::PollingSubmit {
                allocated,
                message,
                reply,
            } => {
                let ack = self.polling_submit(allocated, message);
                let _ = reply.send(ack);
            }
            HubCommand::PollingMembers { room_id, reply } => {
                let _ = reply.send(self.state.member_infos(&room_id));
            }
            HubCommand::PollingEvents {
                room_id,
                since,
                reply,
            } => {
                let _ = reply.send(self.state.polling.since(&room_id, since));
            }
        }
    }

    /// Route one stateless submission. Joins lazily create a polling
    /// session (reusing a caller-supplied `userId` so a client can rejoin
    /// under the id it was allocated before); every other message type
    /// must name a sender the hub already knows.
    fn polling_submit(&mut self, allocated: ClientId, message: ClientMessage) -> PollingAck {
        let (sender, is_join) = match &message {
            ClientMessage::JoinRoom { user_id, .. } => (Some(user_id.unwrap_or(allocated)), true),
            ClientMessage::LeaveRoom { user_id, .. } => (*user_id, false),
            ClientMessage::SignalingMessage { from_user_id, .. } => (*from_user_id, false),
            ClientMessage::ChatMessage { user_id, .. } => (*user_id, false),
        };

        let Some(sender) = sender else {
            warn!("dropping stateless submission without a sender id");
            return PollingAck {
                ok: false,
                client_id: None,
            };
        };

        if is_join {
            if !self.state.sessions.contains(sender) {
                self.state
                    .sessions
                    .insert(ClientSession::new(sender, ClientHandle::Polling));
            }
        } else if !self.state.sessions.contains(sender) {
            warn!(client = %sender, "dropping stateless submission from unknown client");
            return PollingAck {
                ok: false,
                client_id: None,
            };
        }

        router::dispatch(&mut self.state, sender, message);
        PollingAck {
            ok: true,
            client_id: is_join.then_some(sender),
        }
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
    use crate::protocol::Role;
    use std::time::Duration;
    use uuid::Uuid;

    async fn recv(rx: &mut mpsc::UnboundedReceiver<ServerMessage>) -> ServerMessage {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for a message")
            .expect("channel closed")
    }

    fn join_msg(room: &str, name: &str, user_id: Option<ClientId>) -> ClientMessage {
        ClientMessage::JoinRoom {
            room_id: room.into(),
            user_name: name.into(),
            role: Role::Candidate,
            user_id,
        }
    }

    #[tokio::test]
    async fn connect_emits_the_greeting_first() {
        let (hub_tx, hub) = RelayHub::new(50);
        tokio::spawn(hub.run());

        let client_id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub_tx.send(HubCommand::Connect { client_id, sender: tx }).unwrap();

        assert_eq!(
            recv(&mut rx).await,
            ServerMessage::Connected { client_id }
        );
    }

    #[tokio::test]
    async fn join_flows_through_to_a_snapshot() {
        let (hub_tx, hub) = RelayHub::new(50);
        tokio::spawn(hub.run());

        let client_id = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub_tx.send(HubCommand::Connect { client_id, sender: tx }).unwrap();
        hub_tx
            .send(HubCommand::Message {
                client_id,
                message: join_msg("R1", "Alice", None),
            })
            .unwrap();

        let _ = recv(&mut rx).await; // connected
        assert!(matches!(recv(&mut rx).await, ServerMessage::RoomUsers(users) if users.len() == 1));
    }

    #[tokio::test]
    async fn polling_join_allocates_and_acks_a_client_id() {
        let (hub_tx, hub) = RelayHub::new(50);
        tokio::spawn(hub.run());

        let allocated = Uuid::new_v4();
        let (reply_tx, reply_rx) = oneshot::channel();
        hub_tx
            .send(HubCommand::PollingSubmit {
                allocated,
                message: join_msg("R1", "Poller", None),
                reply: reply_tx,
            })
            .unwrap();

        let ack = reply_rx.await.unwrap();
        assert!(ack.ok);
        assert_eq!(ack.client_id, Some(allocated));

        let (reply_tx, reply_rx) = oneshot::channel();
        hub_tx
            .send(HubCommand::PollingMembers {
                room_id: "R1".into(),
                reply: reply_tx,
            })
            .unwrap();
        let members = reply_rx.await.unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].user_name, "Poller");
    }

    #[tokio::test]
    async fn polling_submission_from_unknown_sender_is_refused() {
        let (hub_tx, hub) = RelayHub::new(50);
        tokio::spawn(hub.run());

        let (reply_tx, reply_rx) = oneshot::channel();
        hub_tx
            .send(HubCommand::PollingSubmit {
                allocated: Uuid::new_v4(),
                message: ClientMessage::ChatMessage {
                    room_id: Some("R1".into()),
                    message: "hi".into(),
                    user_name: "Ghost".into(),
                    user_id: Some(Uuid::new_v4()),
                },
                reply: reply_tx,
            })
            .unwrap();

        let ack = reply_rx.await.unwrap();
        assert!(!ack.ok);
    }

    #[tokio::test]
    async fn polling_events_are_cursored() {
        let (hub_tx, hub) = RelayHub::new(50);
        tokio::spawn(hub.run());

        // A websocket participant joins, then chats; a polling participant
        // joined the same room and reads both through the buffer.
        let (reply_tx, reply_rx) = oneshot::channel();
        hub_tx
            .send(HubCommand::PollingSubmit {
                allocated: Uuid::new_v4(),
                message: join_msg("R1", "Poller", None),
                reply: reply_tx,
            })
            .unwrap();
        let poller = reply_rx.await.unwrap().client_id.unwrap();

        let ws_client = Uuid::new_v4();
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub_tx.send(HubCommand::Connect { client_id: ws_client, sender: tx }).unwrap();
        hub_tx
            .send(HubCommand::Message {
                client_id: ws_client,
                message: join_msg("R1", "Alice", None),
            })
            .unwrap();
        let _ = recv(&mut rx).await; // connected
        let _ = recv(&mut rx).await; // room-users

        let (reply_tx, reply_rx) = oneshot::channel();
        hub_tx
            .send(HubCommand::PollingEvents {
                room_id: "R1".into(),
                since: 0,
                reply: reply_tx,
            })
            .unwrap();
        let events = reply_rx.await.unwrap();
        assert!(
            events
                .iter()
                .any(|e| matches!(&e.event, ServerMessage::UserJoined { user_id, .. } if *user_id == ws_client)),
            "polling log must contain Alice's join"
        );

        // Reading from the latest cursor returns nothing new.
        let last = events.last().unwrap().timestamp;
        let (reply_tx, reply_rx) = oneshot::channel();
        hub_tx
            .send(HubCommand::PollingEvents {
                room_id: "R1".into(),
                since: last,
                reply: reply_tx,
            })
            .unwrap();
        assert!(reply_rx.await.unwrap().is_empty());

        // The polling participant is still a member.
        let (reply_tx, reply_rx) = oneshot::channel();
        hub_tx
            .send(HubCommand::PollingMembers {
                room_id: "R1".into(),
                reply: reply_tx,
            })
            .unwrap();
        assert!(reply_rx.await.unwrap().iter().any(|m| m.id == poller));
    }

    #[tokio::test]
    async fn polling_rejoin_reuses_the_supplied_id() {
        let (hub_tx, hub) = RelayHub::new(50);
        tokio::spawn(hub.run());

        let mine = Uuid::new_v4();
        let (reply_tx, reply_rx) = oneshot::channel();
        hub_tx
            .send(HubCommand::PollingSubmit {
                allocated: Uuid::new_v4(),
                message: join_msg("R1", "Poller", Some(mine)),
                reply: reply_tx,
            })
            .unwrap();

        let ack = reply_rx.await.unwrap();
        assert_eq!(ack.client_id, Some(mine));
    }

    #[tokio::test]
    async fn polling_leave_cleans_up_membership() {
        let (hub_tx, hub) = RelayHub::new(50);
        tokio::spawn(hub.run());

        let (reply_tx, reply_rx) = oneshot::channel();
        hub_tx
            .send(HubCommand::PollingSubmit {
                allocated: Uuid::new_v4(),
                message: join_msg("R1", "Poller", None),
                reply: reply_tx,
            })
            .unwrap();
        let id = reply_rx.await.unwrap().client_id.unwrap();

        let (reply_tx, reply_rx) = oneshot::channel();
        hub_tx
            .send(HubCommand::PollingSubmit {
                allocated: Uuid::new_v4(),
                message: ClientMessage::LeaveRoom {
                    room_id: Some("R1".into()),
                    user_id: Some(id),
                },
                reply: reply_tx,
            })
            .unwrap();
        assert!(reply_rx.await.unwrap().ok);

        let (reply_tx, reply_rx) = oneshot::channel();
        hub_tx
            .send(HubCommand::PollingMembers {
                room_id: "R1".into(),
                reply: reply_tx,
            })
            .unwrap();
        assert!(reply_rx.await.unwrap().is_empty());
    }
}

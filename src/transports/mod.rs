//! Transport listener backends.
//!
//! All inbound connectivity is normalized here into one stream of
//! [`HubCommand`]s: `Connect`, `Message`, `Disconnect` (plus the
//! stateless polling commands). The hub neither knows nor cares which
//! backend a client arrived through.
//!
//! Two pieces make a backend:
//!
//! - [`Listener`] — an accept loop bound to a socket address, one per
//!   backend, spawned by the server. Pluggable strategy: the server holds
//!   `Box<dyn Listener>`s and treats them uniformly.
//! - [`Connection`] — a bidirectional text-message channel for one
//!   accepted client. Every connection, regardless of backend, is driven
//!   by the shared [`drive_connection`] loop below.
//!
//! | Module      | Backend                                              |
//! |-------------|------------------------------------------------------|
//! | `websocket` | `tokio-tungstenite` (feature `transport-websocket`)  |
//! | `raw`       | hand-rolled framing over TCP + polling fallback      |

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::SignalServerError;
use crate::hub::HubCommand;
use crate::protocol::{ClientId, ClientMessage, ServerMessage};

pub mod raw;
#[cfg(feature = "transport-websocket")]
pub mod websocket;

pub use raw::RawListener;
#[cfg(feature = "transport-websocket")]
pub use websocket::WebSocketListener;

// ── Listener ────────────────────────────────────────────────────────

/// An accept loop for one transport backend.
///
/// Implementations bind in their constructor (so the server can report the
/// resolved address, which matters for `:0` test binds) and run forever;
/// the server aborts the spawned task on shutdown.
#[async_trait]
pub trait Listener: Send + 'static {
    /// The resolved local address this backend accepts on.
    fn local_addr(&self) -> SocketAddr;

    /// Accept connections until aborted, spawning one task per connection.
    async fn run(self: Box<Self>);
}

// ── Connection ──────────────────────────────────────────────────────

/// A bidirectional text message channel for one accepted client.
///
/// The protocol is JSON text, so implementations handle message framing
/// internally (tungstenite frames, or the hand-rolled codec in
/// [`crate::frame`]).
///
/// # Cancel Safety
///
/// [`recv`](Connection::recv) **MUST** be cancel-safe — it runs inside
/// `tokio::select!` in [`drive_connection`]. Implementations buffer
/// partial input in `self`, never in a local.
#[async_trait]
pub trait Connection: Send + 'static {
    /// Send one complete JSON text message to the client.
    async fn send(&mut self, message: String) -> Result<(), SignalServerError>;

    /// Receive the next complete JSON text message.
    ///
    /// Returns:
    /// - `Some(Ok(text))` — a message arrived
    /// - `Some(Err(e))` — an unrecoverable transport error
    /// - `None` — the client closed the connection
    async fn recv(&mut self) -> Option<Result<String, SignalServerError>>;

    /// Close the connection gracefully. Best-effort.
    async fn close(&mut self);
}

// ── Shared connection loop ──────────────────────────────────────────

/// Drive one accepted connection until it closes.
///
/// The caller has already registered the client with the hub via
/// [`HubCommand::Connect`]; this loop shuttles outbound messages from
/// `outbound` onto the socket and inbound text through the envelope parser
/// into the hub. A parse failure is logged and the message dropped — the
/// connection stays open. Exactly one [`HubCommand::Disconnect`] is sent
/// when the loop exits, however many close/error signals the socket
/// produced on the way down.
///
/// `idle_timeout` is the deployment-time heartbeat policy: when set, a
/// connection with no inbound traffic for the duration is closed through
/// the standard disconnect path.
pub(crate) async fn drive_connection(
    mut conn: impl Connection,
    client_id: ClientId,
    hub: mpsc::UnboundedSender<HubCommand>,
    mut outbound: mpsc::UnboundedReceiver<ServerMessage>,
    idle_timeout: Option<Duration>,
) {
    let mut deadline = idle_timeout.map(|t| tokio::time::Instant::now() + t);

    loop {
        let idle = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            // Outbound: hub → client.
            message = outbound.recv() => {
                match message {
                    Some(message) => {
                        match serde_json::to_string(&message) {
                            Ok(json) => {
                                if let Err(e) = conn.send(json).await {
                                    debug!(client = %client_id, "send failed, closing: {e}");
                                    break;
                                }
                            }
                            Err(e) => {
                                // A non-serializable ServerMessage is a bug,
                                // not a reason to drop the client.
                                warn!(client = %client_id, "failed to serialize outbound message: {e}");
                            }
                        }
                    }
                    // Hub dropped our sender: server shutting down.
                    None => break,
                }
            }

            // Inbound: client → hub.
            incoming = conn.recv() => {
                match incoming {
                    Some(Ok(text)) => {
                        deadline = idle_timeout.map(|t| tokio::time::Instant::now() + t);
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(message) => {
                                if hub.send(HubCommand::Message { client_id, message }).is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!(client = %client_id, "dropping malformed message: {e} — raw: {text}");
                            }
                        }
                    }
                    Some(Err(e)) => {
                        debug!(client = %client_id, "receive failed, closing: {e}");
                        break;
                    }
                    None => {
                        debug!(client = %client_id, "client closed connection");
                        break;
                    }
                }
            }

            () = idle => {
                debug!(client = %client_id, "idle timeout elapsed, closing");
                break;
            }
        }
    }

    conn.close().await;
    let _ = hub.send(HubCommand::Disconnect { client_id });
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
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex as StdMutex};

    /// Scripted connection: replays `incoming`, records sent messages.
    struct MockConnection {
        incoming: VecDeque<Option<Result<String, SignalServerError>>>,
        sent: Arc<StdMutex<Vec<String>>>,
        closed: Arc<AtomicUsize>,
    }

    impl MockConnection {
        fn new(
            incoming: Vec<Option<Result<String, SignalServerError>>>,
        ) -> (Self, Arc<StdMutex<Vec<String>>>, Arc<AtomicUsize>) {
            let sent = Arc::new(StdMutex::new(Vec::new()));
            let closed = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    incoming: VecDeque::from(incoming),
                    sent: Arc::clone(&sent),
                    closed: Arc::clone(&closed),
                },
                sent,
                closed,
            )
        }
    }

    #[async_trait]
    impl Connection for MockConnection {
        async fn send(&mut self, message: String) -> Result<(), SignalServerError> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn recv(&mut self) -> Option<Result<String, SignalServerError>> {
            match self.incoming.pop_front() {
                Some(item) => item,
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn hub_channel() -> (
        mpsc::UnboundedSender<HubCommand>,
        mpsc::UnboundedReceiver<HubCommand>,
    ) {
        mpsc::unbounded_channel()
    }

    #[tokio::test]
    async fn inbound_text_becomes_a_hub_message() {
        let (conn, _sent, _closed) = MockConnection::new(vec![
            Some(Ok(r#"{"type":"leave-room","data":{}}"#.into())),
            None,
        ]);
        let (hub_tx, mut hub_rx) = hub_channel();
        let (_out_tx, out_rx) = mpsc::unbounded_channel();
        let client_id = uuid::Uuid::new_v4();

        drive_connection(conn, client_id, hub_tx, out_rx, None).await;

        assert!(matches!(
            hub_rx.recv().await.unwrap(),
            HubCommand::Message { client_id: id, message: ClientMessage::LeaveRoom { .. } } if id == client_id
        ));
        assert!(matches!(
            hub_rx.recv().await.unwrap(),
            HubCommand::Disconnect { client_id: id } if id == client_id
        ));
    }

    #[tokio::test]
    async fn malformed_message_is_dropped_and_connection_survives() {
        let (conn, _sent, _closed) = MockConnection::new(vec![
            Some(Ok("this is not json".into())),
            Some(Ok(r#"{"type":"mystery-op","data":{}}"#.into())),
            Some(Ok(r#"{"type":"leave-room","data":{}}"#.into())),
            None,
        ]);
        let (hub_tx, mut hub_rx) = hub_channel();
        let (_out_tx, out_rx) = mpsc::unbounded_channel();

        drive_connection(conn, uuid::Uuid::new_v4(), hub_tx, out_rx, None).await;

        // Garbage and the unknown type were skipped; the valid message and
        // the final disconnect are all the hub sees.
        assert!(matches!(hub_rx.recv().await.unwrap(), HubCommand::Message { .. }));
        assert!(matches!(hub_rx.recv().await.unwrap(), HubCommand::Disconnect { .. }));
        assert!(hub_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn exactly_one_disconnect_even_after_transport_error() {
        let (conn, _sent, closed) = MockConnection::new(vec![Some(Err(
            SignalServerError::TransportReceive("reset by peer".into()),
        ))]);
        let (hub_tx, mut hub_rx) = hub_channel();
        let (_out_tx, out_rx) = mpsc::unbounded_channel();

        drive_connection(conn, uuid::Uuid::new_v4(), hub_tx, out_rx, None).await;

        let mut disconnects = 0;
        while let Some(cmd) = hub_rx.recv().await {
            if matches!(cmd, HubCommand::Disconnect { .. }) {
                disconnects += 1;
            }
        }
        assert_eq!(disconnects, 1);
        assert_eq!(closed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn outbound_messages_are_serialized_onto_the_socket() {
        let (conn, sent, _closed) = MockConnection::new(vec![]);
        let (hub_tx, _hub_rx) = hub_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let client_id = uuid::Uuid::new_v4();

        out_tx
            .send(ServerMessage::Connected { client_id })
            .unwrap();
        drop(out_tx); // loop exits once the queue drains

        drive_connection(conn, client_id, hub_tx, out_rx, None).await;

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("\"connected\""));
        assert!(sent[0].contains("clientId"));
    }

    #[tokio::test]
    async fn idle_timeout_closes_the_connection() {
        let (conn, _sent, closed) = MockConnection::new(vec![]);
        let (hub_tx, mut hub_rx) = hub_channel();
        let (_out_tx, out_rx) = mpsc::unbounded_channel();

        let task = drive_connection(
            conn,
            uuid::Uuid::new_v4(),
            hub_tx,
            out_rx,
            Some(Duration::from_millis(50)),
        );
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("idle timeout should have fired well within two seconds");

        assert!(matches!(hub_rx.recv().await.unwrap(), HubCommand::Disconnect { .. }));
        assert_eq!(closed.load(Ordering::Relaxed), 1);
    }
}

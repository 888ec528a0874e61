//! WebSocket listener backend using `tokio-tungstenite`.
//!
//! This is the "use the socket library" backend: tungstenite performs the
//! upgrade handshake and framing, and this module only adapts accepted
//! streams to the [`Connection`] trait and hands them to the shared
//! connection loop.
//!
//! Only available when the `transport-websocket` feature is enabled (it is
//! enabled by default).

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::SignalServerError;
use crate::hub::HubCommand;
use crate::transports::{drive_connection, Connection, Listener};

/// Accept loop for tungstenite-backed WebSocket clients.
pub struct WebSocketListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    hub: mpsc::UnboundedSender<HubCommand>,
    idle_timeout: Option<Duration>,
}

impl WebSocketListener {
    /// Bind to `addr`. Pass port `0` to let the OS pick one; the resolved
    /// address is available via [`Listener::local_addr`].
    ///
    /// # Errors
    ///
    /// Returns [`SignalServerError::Io`] if the socket cannot be bound.
    pub async fn bind(
        addr: SocketAddr,
        hub: mpsc::UnboundedSender<HubCommand>,
        idle_timeout: Option<Duration>,
    ) -> Result<Self, SignalServerError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        debug!(%local_addr, "websocket listener bound");
        Ok(Self {
            listener,
            local_addr,
            hub,
            idle_timeout,
        })
    }
}

#[async_trait]
impl Listener for WebSocketListener {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn run(self: Box<Self>) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let hub = self.hub.clone();
                    let idle_timeout = self.idle_timeout;
                    tokio::spawn(async move {
                        handle_socket(stream, peer, hub, idle_timeout).await;
                    });
                }
                Err(e) => {
                    // Transient accept errors (EMFILE and friends) must not
                    // kill the listener.
                    warn!("websocket accept error: {e}");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

async fn handle_socket(
    stream: TcpStream,
    peer: SocketAddr,
    hub: mpsc::UnboundedSender<HubCommand>,
    idle_timeout: Option<Duration>,
) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(%peer, "websocket handshake failed: {e}");
            return;
        }
    };

    let client_id = Uuid::new_v4();
    debug!(client = %client_id, %peer, "websocket connection accepted");

    let (out_tx, out_rx) = mpsc::unbounded_channel();
    if hub
        .send(HubCommand::Connect {
            client_id,
            sender: out_tx,
        })
        .is_err()
    {
        // Hub already gone — server is shutting down.
        return;
    }

    let conn = WsConnection {
        stream: ws,
        closed: false,
    };
    drive_connection(conn, client_id, hub, out_rx, idle_timeout).await;
}

/// [`Connection`] adapter over an accepted tungstenite stream.
struct WsConnection {
    stream: WebSocketStream<TcpStream>,
    closed: bool,
}

#[async_trait]
impl Connection for WsConnection {
    async fn send(&mut self, message: String) -> Result<(), SignalServerError> {
        if self.closed {
            return Err(SignalServerError::TransportClosed);
        }
        self.stream
            .send(Message::Text(message.into()))
            .await
            .map_err(|e| SignalServerError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, SignalServerError>> {
        loop {
            let msg = match self.stream.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => {
                    return Some(Err(SignalServerError::TransportReceive(e.to_string())));
                }
                None => return None,
            };

            match msg {
                Message::Text(text) => return Some(Ok(text.to_string())),
                Message::Close(frame) => {
                    debug!(?frame, "received WebSocket close frame");
                    return None;
                }
                Message::Ping(_) | Message::Pong(_) => {
                    // tungstenite auto-queues pong replies; nothing to do.
                }
                Message::Binary(_) => {
                    warn!("skipping unexpected binary WebSocket frame");
                }
                Message::Frame(_) => {
                    // Never produced by the read half; kept for
                    // exhaustiveness.
                }
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.stream.close(None).await;
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
    use crate::protocol::ServerMessage;
    use std::time::Duration;

    async fn recv_cmd(rx: &mut mpsc::UnboundedReceiver<HubCommand>) -> HubCommand {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for a hub command")
            .expect("hub channel closed")
    }

    #[tokio::test]
    async fn bind_resolves_ephemeral_port() {
        let (hub_tx, _hub_rx) = mpsc::unbounded_channel();
        let listener = WebSocketListener::bind("127.0.0.1:0".parse().unwrap(), hub_tx, None)
            .await
            .unwrap();
        assert_ne!(listener.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn accepted_client_is_registered_and_reachable() {
        let (hub_tx, mut hub_rx) = mpsc::unbounded_channel();
        let listener = WebSocketListener::bind("127.0.0.1:0".parse().unwrap(), hub_tx, None)
            .await
            .unwrap();
        let addr = listener.local_addr();
        tokio::spawn(Box::new(listener).run());

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .unwrap();

        let (client_id, sender) = match recv_cmd(&mut hub_rx).await {
            HubCommand::Connect { client_id, sender } => (client_id, sender),
            other => panic!("expected Connect, got {other:?}"),
        };

        // Outbound path: what the hub pushes arrives as a text frame.
        sender
            .send(ServerMessage::Connected { client_id })
            .unwrap();
        let frame = ws.next().await.unwrap().unwrap();
        assert!(frame.into_text().unwrap().contains("connected"));

        // Inbound path: a text frame becomes a parsed hub message.
        ws.send(Message::Text(
            r#"{"type":"leave-room","data":{}}"#.into(),
        ))
        .await
        .unwrap();
        assert!(matches!(
            recv_cmd(&mut hub_rx).await,
            HubCommand::Message { client_id: id, .. } if id == client_id
        ));

        // Closing the socket yields exactly one Disconnect.
        ws.close(None).await.unwrap();
        assert!(matches!(
            recv_cmd(&mut hub_rx).await,
            HubCommand::Disconnect { client_id: id } if id == client_id
        ));
    }

    #[tokio::test]
    async fn malformed_json_does_not_kill_the_connection() {
        let (hub_tx, mut hub_rx) = mpsc::unbounded_channel();
        let listener = WebSocketListener::bind("127.0.0.1:0".parse().unwrap(), hub_tx, None)
            .await
            .unwrap();
        let addr = listener.local_addr();
        tokio::spawn(Box::new(listener).run());

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .unwrap();
        // Hold the Connect command so its outbound sender stays alive;
        // dropping it would close the connection independently of the test.
        let _connect = recv_cmd(&mut hub_rx).await; // Connect

        ws.send(Message::Text("{broken".into())).await.unwrap();
        ws.send(Message::Text(
            r#"{"type":"leave-room","data":{}}"#.into(),
        ))
        .await
        .unwrap();

        // The malformed frame was dropped; the valid one still arrives.
        assert!(matches!(
            recv_cmd(&mut hub_rx).await,
            HubCommand::Message { .. }
        ));
    }
}

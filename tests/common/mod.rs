#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Shared test utilities for the signaling server integration tests.
//!
//! Provides a typed WebSocket test client (usable against both the
//! tungstenite listener and the hand-rolled raw listener), plain-TCP HTTP
//! helpers for the polling endpoints, and message constructors.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use greenroom_signal_server::protocol::{ClientId, ClientMessage, Role, ServerMessage};
use greenroom_signal_server::{ServerConfig, ServerHandle, SignalServer};

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

/// Start a server on ephemeral ports.
pub async fn start_server() -> ServerHandle {
    let config = ServerConfig::new()
        .with_raw_addr("127.0.0.1:0".parse().unwrap())
        .with_ws_addr("127.0.0.1:0".parse().unwrap());
    SignalServer::start(config).await.expect("server start")
}

// ── WebSocket test client ───────────────────────────────────────────

/// A typed WebSocket client for tests. Works against either listener —
/// the tungstenite one, or the hand-rolled raw one (which makes a real
/// WebSocket implementation exercise our handshake and framing).
pub struct WsClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let (stream, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .expect("websocket connect");
        Self { stream }
    }

    pub async fn send(&mut self, message: &ClientMessage) {
        let json = serde_json::to_string(message).expect("serialize client message");
        self.stream
            .send(Message::Text(json.into()))
            .await
            .expect("websocket send");
    }

    /// Send a raw text frame, bypassing the typed protocol.
    pub async fn send_raw(&mut self, text: &str) {
        self.stream
            .send(Message::Text(text.to_owned().into()))
            .await
            .expect("websocket send");
    }

    /// Receive the next server event, with a timeout.
    pub async fn recv(&mut self) -> ServerMessage {
        loop {
            let frame = tokio::time::timeout(RECV_TIMEOUT, self.stream.next())
                .await
                .expect("timed out waiting for a server event")
                .expect("connection closed")
                .expect("websocket receive");
            if let Message::Text(text) = frame {
                return serde_json::from_str(&text).expect("parse server message");
            }
        }
    }

    /// Expect the `connected` greeting and return the allocated id.
    pub async fn expect_connected(&mut self) -> ClientId {
        match self.recv().await {
            ServerMessage::Connected { client_id } => client_id,
            other => panic!("expected connected greeting, got {other:?}"),
        }
    }

    pub async fn close(mut self) {
        let _ = self.stream.close(None).await;
    }
}

// ── Polling HTTP helpers ────────────────────────────────────────────

/// Issue one HTTP request against the raw listener and return the
/// response body (everything after the head).
pub async fn http_request(addr: SocketAddr, request: &str) -> (String, String) {
    let mut stream = TcpStream::connect(addr).await.expect("tcp connect");
    stream
        .write_all(request.as_bytes())
        .await
        .expect("http write");

    let mut response = Vec::new();
    let mut scratch = [0u8; 4096];
    loop {
        match stream.read(&mut scratch).await {
            Ok(0) | Err(_) => break,
            Ok(n) => response.extend_from_slice(&scratch[..n]),
        }
    }
    let text = String::from_utf8(response).expect("utf-8 response");
    let (head, body) = text
        .split_once("\r\n\r\n")
        .expect("response head terminator");
    (head.to_owned(), body.to_owned())
}

pub async fn polling_submit(addr: SocketAddr, room: &str, message: &ClientMessage) -> (String, String) {
    let body = serde_json::to_string(message).expect("serialize");
    let request = format!(
        "POST /rooms/{room}/messages HTTP/1.1\r\n\
         Host: localhost\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\r\n{body}",
        body.len()
    );
    http_request(addr, &request).await
}

pub async fn polling_users(addr: SocketAddr, room: &str) -> (String, String) {
    let request = format!("GET /rooms/{room}/users HTTP/1.1\r\nHost: localhost\r\n\r\n");
    http_request(addr, &request).await
}

pub async fn polling_events(addr: SocketAddr, room: &str, since: u64) -> (String, String) {
    let request =
        format!("GET /rooms/{room}/events?since={since} HTTP/1.1\r\nHost: localhost\r\n\r\n");
    http_request(addr, &request).await
}

// ── Message constructors ────────────────────────────────────────────

pub fn join_msg(room: &str, name: &str, role: Role) -> ClientMessage {
    ClientMessage::JoinRoom {
        room_id: room.into(),
        user_name: name.into(),
        role,
        user_id: None,
    }
}

pub fn join_msg_with_id(room: &str, name: &str, role: Role, user_id: ClientId) -> ClientMessage {
    ClientMessage::JoinRoom {
        room_id: room.into(),
        user_name: name.into(),
        role,
        user_id: Some(user_id),
    }
}

pub fn leave_msg(user_id: Option<ClientId>) -> ClientMessage {
    ClientMessage::LeaveRoom {
        room_id: None,
        user_id,
    }
}

pub fn chat_msg(room: &str, text: &str, name: &str, user_id: Option<ClientId>) -> ClientMessage {
    ClientMessage::ChatMessage {
        room_id: Some(room.into()),
        message: text.into(),
        user_name: name.into(),
        user_id,
    }
}

pub fn signaling_msg(
    payload: serde_json::Value,
    target: Option<ClientId>,
    from: Option<ClientId>,
) -> ClientMessage {
    ClientMessage::SignalingMessage {
        room_id: None,
        message: payload,
        target_user_id: target,
        from_user_id: from,
    }
}

//! Hand-rolled transport backend: the WebSocket upgrade handshake and
//! framing implemented directly over [`tokio::net::TcpStream`] via
//! [`crate::frame`], plus the stateless polling fallback.
//!
//! One listener serves both roles. An accepted socket's first HTTP request
//! decides its fate: an `Upgrade: websocket` request is answered with the
//! computed accept key and the socket becomes a persistent framed
//! connection; anything else is treated as a single stateless
//! request/response exchange against the polling endpoints:
//!
//! | endpoint | behavior |
//! |---|---|
//! | `POST /rooms/{roomId}/messages` | submit one `{type,data}` envelope, synchronous ack |
//! | `GET /rooms/{roomId}/users` | current member list |
//! | `GET /rooms/{roomId}/events?since={cursor}` | buffered events after the cursor |

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::SignalServerError;
use crate::frame::{self, FrameError};
use crate::hub::HubCommand;
use crate::protocol::{ClientMessage, PollingAck};
use crate::transports::{drive_connection, Connection, Listener};

/// Upper bound on an HTTP request head.
const MAX_REQUEST_HEAD: usize = 8 * 1024;
/// Upper bound on a polling request body.
const MAX_REQUEST_BODY: usize = 64 * 1024;
/// How long a polling request waits for the hub before giving up.
const HUB_REPLY_TIMEOUT: Duration = Duration::from_secs(5);

// ── Listener ────────────────────────────────────────────────────────

/// Accept loop for the hand-rolled backend.
pub struct RawListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    hub: mpsc::UnboundedSender<HubCommand>,
    idle_timeout: Option<Duration>,
}

impl RawListener {
    /// Bind to `addr`. Pass port `0` to let the OS pick one.
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
        debug!(%local_addr, "raw listener bound");
        Ok(Self {
            listener,
            local_addr,
            hub,
            idle_timeout,
        })
    }
}

#[async_trait]
impl Listener for RawListener {
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
                        if let Err(e) = handle_socket(stream, peer, hub, idle_timeout).await {
                            debug!(%peer, "raw connection ended with error: {e}");
                        }
                    });
                }
                Err(e) => {
                    warn!("raw accept error: {e}");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

// ── Request parsing ─────────────────────────────────────────────────

/// Minimal parsed HTTP/1.1 request head.
struct RequestHead {
    method: String,
    target: String,
    headers: Vec<(String, String)>,
}

impl RequestHead {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Request path without the query string.
    fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or(&self.target)
    }

    /// Value of one query parameter, if present.
    fn query_param(&self, name: &str) -> Option<&str> {
        let query = self.target.split_once('?')?.1;
        query.split('&').find_map(|pair| {
            let (k, v) = pair.split_once('=')?;
            (k == name).then_some(v)
        })
    }

    fn wants_websocket_upgrade(&self) -> bool {
        self.header("upgrade")
            .is_some_and(|v| v.to_ascii_lowercase().contains("websocket"))
    }
}

fn parse_request_head(head: &str) -> Option<RequestHead> {
    let mut lines = head.split("\r\n");
    let request_line = lines.next()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_owned();
    let target = parts.next()?.to_owned();

    let headers = lines
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            Some((name.trim().to_owned(), value.trim().to_owned()))
        })
        .collect();

    Some(RequestHead {
        method,
        target,
        headers,
    })
}

/// Read one chunk from the stream into `buf`. Returns the byte count
/// (0 = EOF).
async fn read_more(stream: &mut TcpStream, buf: &mut Vec<u8>) -> std::io::Result<usize> {
    let mut scratch = [0u8; 4096];
    let n = stream.read(&mut scratch).await?;
    if let Some(chunk) = scratch.get(..n) {
        buf.extend_from_slice(chunk);
    }
    Ok(n)
}

/// Read until the head terminator, parse, and leave any bytes past the
/// head (pipelined frames, request body) in `buf`.
async fn read_request_head(
    stream: &mut TcpStream,
    buf: &mut Vec<u8>,
) -> Result<RequestHead, SignalServerError> {
    loop {
        if let Some(end) = find_head_end(buf) {
            let head_bytes: Vec<u8> = buf.drain(..end + 4).collect();
            let text = std::str::from_utf8(&head_bytes)
                .map_err(|_| SignalServerError::Handshake("request head is not UTF-8".into()))?;
            return parse_request_head(text)
                .ok_or_else(|| SignalServerError::Handshake("malformed request line".into()));
        }
        if buf.len() > MAX_REQUEST_HEAD {
            return Err(SignalServerError::Handshake("request head too large".into()));
        }
        if read_more(stream, buf).await? == 0 {
            return Err(SignalServerError::Handshake(
                "connection closed before request head".into(),
            ));
        }
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

// ── Socket handling ─────────────────────────────────────────────────

async fn handle_socket(
    mut stream: TcpStream,
    peer: SocketAddr,
    hub: mpsc::UnboundedSender<HubCommand>,
    idle_timeout: Option<Duration>,
) -> Result<(), SignalServerError> {
    let mut buf = Vec::new();
    let head = read_request_head(&mut stream, &mut buf).await?;

    if head.wants_websocket_upgrade() {
        upgrade_connection(stream, buf, &head, peer, hub, idle_timeout).await
    } else {
        serve_polling_request(stream, buf, &head, hub).await
    }
}

/// Complete the upgrade handshake and hand the socket to the shared
/// connection loop as a framed persistent connection.
async fn upgrade_connection(
    mut stream: TcpStream,
    buf: Vec<u8>,
    head: &RequestHead,
    peer: SocketAddr,
    hub: mpsc::UnboundedSender<HubCommand>,
    idle_timeout: Option<Duration>,
) -> Result<(), SignalServerError> {
    let Some(client_key) = head.header("sec-websocket-key") else {
        write_response(&mut stream, "400 Bad Request", r#"{"error":"missing Sec-WebSocket-Key"}"#)
            .await?;
        return Err(SignalServerError::Handshake(
            "upgrade request without Sec-WebSocket-Key".into(),
        ));
    };

    let accept_key = frame::compute_accept_key(client_key.trim());
    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept_key}\r\n\r\n"
    );
    stream.write_all(response.as_bytes()).await?;

    let client_id = Uuid::new_v4();
    debug!(client = %client_id, %peer, "raw websocket connection upgraded");

    let (out_tx, out_rx) = mpsc::unbounded_channel();
    if hub
        .send(HubCommand::Connect {
            client_id,
            sender: out_tx,
        })
        .is_err()
    {
        return Ok(());
    }

    // `buf` may already hold frames the client pipelined after the
    // handshake request; the connection starts from them.
    let conn = RawConnection {
        stream,
        buf,
        closed: false,
    };
    drive_connection(conn, client_id, hub, out_rx, idle_timeout).await;
    Ok(())
}

// ── Framed connection ───────────────────────────────────────────────

/// [`Connection`] over a plain TCP stream using the hand-rolled codec.
struct RawConnection {
    stream: TcpStream,
    /// Incomplete inbound bytes. Lives in `self` so `recv` stays
    /// cancel-safe.
    buf: Vec<u8>,
    closed: bool,
}

#[async_trait]
impl Connection for RawConnection {
    async fn send(&mut self, message: String) -> Result<(), SignalServerError> {
        if self.closed {
            return Err(SignalServerError::TransportClosed);
        }
        self.stream
            .write_all(&frame::encode_frame(&message))
            .await
            .map_err(|e| SignalServerError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, SignalServerError>> {
        loop {
            if !self.buf.is_empty() {
                match frame::decode_frame(&self.buf) {
                    Ok(decoded) => {
                        self.buf.drain(..decoded.len);
                        return Some(Ok(decoded.text));
                    }
                    // Not enough bytes yet — fall through and read more.
                    Err(FrameError::Truncated) => {}
                    Err(FrameError::ConnectionClose) => return None,
                    Err(e @ FrameError::PayloadTooLarge(_)) => {
                        // Unskippable without buffering the declared size.
                        return Some(Err(e.into()));
                    }
                    Err(e) => {
                        // Rejected but skippable (wrong opcode, bad UTF-8,
                        // fragmentation): drop the frame, keep the
                        // connection, stay in sync.
                        match frame::declared_frame_len(&self.buf) {
                            Ok(len) if self.buf.len() >= len => {
                                warn!("dropping rejected frame: {e}");
                                self.buf.drain(..len);
                                continue;
                            }
                            // Frame not fully buffered yet; read more
                            // before skipping it.
                            Ok(_) => {}
                            Err(skip_err) => return Some(Err(skip_err.into())),
                        }
                    }
                }
            }

            let mut scratch = [0u8; 4096];
            match self.stream.read(&mut scratch).await {
                Ok(0) => return None,
                Ok(n) => {
                    if let Some(chunk) = scratch.get(..n) {
                        self.buf.extend_from_slice(chunk);
                    }
                }
                Err(e) => return Some(Err(SignalServerError::TransportReceive(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        // Best-effort close frame, then tear the stream down.
        let _ = self.stream.write_all(&[0x88, 0x00]).await;
        let _ = self.stream.shutdown().await;
    }
}

// ── Polling fallback ────────────────────────────────────────────────

/// Serve one stateless request and close, per the fallback transport
/// contract: one message in, one synchronous acknowledgement out.
async fn serve_polling_request(
    mut stream: TcpStream,
    mut buf: Vec<u8>,
    head: &RequestHead,
    hub: mpsc::UnboundedSender<HubCommand>,
) -> Result<(), SignalServerError> {
    let Some((room_id, endpoint)) = parse_room_route(head.path()) else {
        write_response(&mut stream, "404 Not Found", r#"{"error":"not found"}"#).await?;
        return Ok(());
    };

    match (head.method.as_str(), endpoint) {
        ("POST", "messages") => {
            let body = match read_request_body(&mut stream, &mut buf, head).await {
                Ok(body) => body,
                Err(reason) => {
                    let body = format!(r#"{{"error":"{reason}"}}"#);
                    write_response(&mut stream, "400 Bad Request", &body).await?;
                    return Ok(());
                }
            };
            match serde_json::from_slice::<ClientMessage>(&body) {
                Ok(message) => {
                    let (reply_tx, reply_rx) = oneshot::channel();
                    let command = HubCommand::PollingSubmit {
                        allocated: Uuid::new_v4(),
                        message,
                        reply: reply_tx,
                    };
                    match hub_round_trip(&hub, command, reply_rx).await {
                        Some(ack) => {
                            let status = if ack.ok { "200 OK" } else { "400 Bad Request" };
                            write_json(&mut stream, status, &ack).await?;
                        }
                        None => {
                            write_response(
                                &mut stream,
                                "503 Service Unavailable",
                                r#"{"error":"relay unavailable"}"#,
                            )
                            .await?;
                        }
                    }
                }
                Err(e) => {
                    debug!(room = room_id, "rejecting malformed polling submission: {e}");
                    let ack = PollingAck {
                        ok: false,
                        client_id: None,
                    };
                    write_json(&mut stream, "400 Bad Request", &ack).await?;
                }
            }
        }
        ("GET", "users") => {
            let (reply_tx, reply_rx) = oneshot::channel();
            let command = HubCommand::PollingMembers {
                room_id: room_id.to_owned(),
                reply: reply_tx,
            };
            match hub_round_trip(&hub, command, reply_rx).await {
                Some(members) => write_json(&mut stream, "200 OK", &members).await?,
                None => {
                    write_response(
                        &mut stream,
                        "503 Service Unavailable",
                        r#"{"error":"relay unavailable"}"#,
                    )
                    .await?;
                }
            }
        }
        ("GET", "events") => {
            let since = head
                .query_param("since")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            let (reply_tx, reply_rx) = oneshot::channel();
            let command = HubCommand::PollingEvents {
                room_id: room_id.to_owned(),
                since,
                reply: reply_tx,
            };
            match hub_round_trip(&hub, command, reply_rx).await {
                Some(events) => write_json(&mut stream, "200 OK", &events).await?,
                None => {
                    write_response(
                        &mut stream,
                        "503 Service Unavailable",
                        r#"{"error":"relay unavailable"}"#,
                    )
                    .await?;
                }
            }
        }
        _ => {
            write_response(
                &mut stream,
                "405 Method Not Allowed",
                r#"{"error":"method not allowed"}"#,
            )
            .await?;
        }
    }

    let _ = stream.shutdown().await;
    Ok(())
}

/// Split `/rooms/{roomId}/{endpoint}` into its parts.
fn parse_room_route(path: &str) -> Option<(&str, &str)> {
    let rest = path.strip_prefix("/rooms/")?;
    let (room_id, endpoint) = rest.split_once('/')?;
    if room_id.is_empty() || endpoint.is_empty() || endpoint.contains('/') {
        return None;
    }
    Some((room_id, endpoint))
}

/// Read the request body per `Content-Length`. Any prefix already sits in
/// `buf` from the head read.
async fn read_request_body(
    stream: &mut TcpStream,
    buf: &mut Vec<u8>,
    head: &RequestHead,
) -> Result<Vec<u8>, &'static str> {
    let length: usize = head
        .header("content-length")
        .and_then(|v| v.parse().ok())
        .ok_or("missing content-length")?;
    if length > MAX_REQUEST_BODY {
        return Err("body too large");
    }
    while buf.len() < length {
        match read_more(stream, buf).await {
            Ok(0) => return Err("truncated body"),
            Ok(_) => {}
            Err(_) => return Err("read error"),
        }
    }
    Ok(buf.drain(..length).collect())
}

/// Send a command to the hub and await its oneshot reply. `None` when the
/// hub is gone or does not answer in time.
async fn hub_round_trip<T>(
    hub: &mpsc::UnboundedSender<HubCommand>,
    command: HubCommand,
    reply: oneshot::Receiver<T>,
) -> Option<T> {
    hub.send(command).ok()?;
    tokio::time::timeout(HUB_REPLY_TIMEOUT, reply).await.ok()?.ok()
}

async fn write_json<T: serde::Serialize>(
    stream: &mut TcpStream,
    status: &str,
    value: &T,
) -> Result<(), SignalServerError> {
    let body = serde_json::to_string(value)?;
    write_response(stream, status, &body).await
}

async fn write_response(
    stream: &mut TcpStream,
    status: &str,
    body: &str,
) -> Result<(), SignalServerError> {
    let response = format!(
        "HTTP/1.1 {status}\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await?;
    Ok(())
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

    async fn start_listener() -> (SocketAddr, mpsc::UnboundedReceiver<HubCommand>) {
        let (hub_tx, hub_rx) = mpsc::unbounded_channel();
        let listener = RawListener::bind("127.0.0.1:0".parse().unwrap(), hub_tx, None)
            .await
            .unwrap();
        let addr = listener.local_addr();
        tokio::spawn(Box::new(listener).run());
        (addr, hub_rx)
    }

    async fn recv_cmd(rx: &mut mpsc::UnboundedReceiver<HubCommand>) -> HubCommand {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for a hub command")
            .expect("hub channel closed")
    }

    /// Read from `stream` until it closes, returning everything.
    async fn read_to_end(stream: &mut TcpStream) -> Vec<u8> {
        let mut out = Vec::new();
        let mut scratch = [0u8; 4096];
        loop {
            match stream.read(&mut scratch).await {
                Ok(0) | Err(_) => break,
                Ok(n) => out.extend_from_slice(&scratch[..n]),
            }
        }
        out
    }

    /// Read until the response head terminator and return the full head.
    async fn read_head(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        while find_head_end(&buf).is_none() {
            let mut scratch = [0u8; 1024];
            let n = stream.read(&mut scratch).await.unwrap();
            assert_ne!(n, 0, "connection closed before response head");
            buf.extend_from_slice(&scratch[..n]);
        }
        String::from_utf8(buf).unwrap()
    }

    fn masked_frame(payload: &str) -> Vec<u8> {
        let key = [0x11, 0x22, 0x33, 0x44];
        let data = payload.as_bytes();
        let mut out = vec![0x81];
        assert!(data.len() < 126, "test helper only does the short tier");
        out.push(0x80 | data.len() as u8);
        out.extend_from_slice(&key);
        out.extend(data.iter().zip(key.iter().cycle()).map(|(b, k)| b ^ k));
        out
    }

    #[tokio::test]
    async fn upgrade_handshake_returns_the_computed_accept_key() {
        let (addr, _hub_rx) = start_listener().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let request = "GET / HTTP/1.1\r\n\
                       Host: localhost\r\n\
                       Upgrade: websocket\r\n\
                       Connection: Upgrade\r\n\
                       Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
                       Sec-WebSocket-Version: 13\r\n\r\n";
        stream.write_all(request.as_bytes()).await.unwrap();

        let head = read_head(&mut stream).await;
        assert!(head.starts_with("HTTP/1.1 101"));
        assert!(head.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
    }

    #[tokio::test]
    async fn upgrade_without_key_is_rejected() {
        let (addr, _hub_rx) = start_listener().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let request = "GET / HTTP/1.1\r\nUpgrade: websocket\r\n\r\n";
        stream.write_all(request.as_bytes()).await.unwrap();

        let head = read_head(&mut stream).await;
        assert!(head.starts_with("HTTP/1.1 400"));
    }

    #[tokio::test]
    async fn framed_messages_flow_both_ways() {
        let (addr, mut hub_rx) = start_listener().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let request = "GET / HTTP/1.1\r\n\
                       Upgrade: websocket\r\n\
                       Connection: Upgrade\r\n\
                       Sec-WebSocket-Key: AQIDBAUGBwgJCgsMDQ4PEC==\r\n\r\n";
        stream.write_all(request.as_bytes()).await.unwrap();
        let _ = read_head(&mut stream).await;

        let (client_id, sender) = match recv_cmd(&mut hub_rx).await {
            HubCommand::Connect { client_id, sender } => (client_id, sender),
            other => panic!("expected Connect, got {other:?}"),
        };

        // Inbound: a masked client frame becomes a parsed hub message.
        stream
            .write_all(&masked_frame(r#"{"type":"leave-room","data":{}}"#))
            .await
            .unwrap();
        assert!(matches!(
            recv_cmd(&mut hub_rx).await,
            HubCommand::Message { client_id: id, message: ClientMessage::LeaveRoom { .. } } if id == client_id
        ));

        // Outbound: hub pushes arrive as unmasked text frames.
        sender
            .send(ServerMessage::Connected { client_id })
            .unwrap();
        let mut frame_buf = Vec::new();
        loop {
            if let Ok(decoded) = frame::decode_frame(&frame_buf) {
                assert!(decoded.text.contains("connected"));
                break;
            }
            let mut scratch = [0u8; 1024];
            let n = stream.read(&mut scratch).await.unwrap();
            assert_ne!(n, 0);
            frame_buf.extend_from_slice(&scratch[..n]);
        }
    }

    #[tokio::test]
    async fn rejected_frame_is_skipped_and_connection_survives() {
        let (addr, mut hub_rx) = start_listener().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        stream
            .write_all(
                "GET / HTTP/1.1\r\nUpgrade: websocket\r\nSec-WebSocket-Key: k\r\n\r\n".as_bytes(),
            )
            .await
            .unwrap();
        let _ = read_head(&mut stream).await;
        // Hold the Connect command so its outbound sender stays alive;
        // dropping it would close the connection independently of the test.
        let _connect = recv_cmd(&mut hub_rx).await; // Connect

        // A binary frame (rejected opcode), then a valid message.
        stream.write_all(&[0x82, 0x02, 0xAB, 0xCD]).await.unwrap();
        stream
            .write_all(&masked_frame(r#"{"type":"leave-room","data":{}}"#))
            .await
            .unwrap();

        assert!(matches!(
            recv_cmd(&mut hub_rx).await,
            HubCommand::Message { .. }
        ));
    }

    #[tokio::test]
    async fn close_frame_triggers_exactly_one_disconnect() {
        let (addr, mut hub_rx) = start_listener().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        stream
            .write_all(
                "GET / HTTP/1.1\r\nUpgrade: websocket\r\nSec-WebSocket-Key: k\r\n\r\n".as_bytes(),
            )
            .await
            .unwrap();
        let _ = read_head(&mut stream).await;
        let client_id = match recv_cmd(&mut hub_rx).await {
            HubCommand::Connect { client_id, .. } => client_id,
            other => panic!("expected Connect, got {other:?}"),
        };

        // Masked close frame.
        stream
            .write_all(&[0x88, 0x80, 0x01, 0x02, 0x03, 0x04])
            .await
            .unwrap();

        assert!(matches!(
            recv_cmd(&mut hub_rx).await,
            HubCommand::Disconnect { client_id: id } if id == client_id
        ));
    }

    #[tokio::test]
    async fn polling_routes_are_parsed() {
        assert_eq!(parse_room_route("/rooms/R1/users"), Some(("R1", "users")));
        assert_eq!(
            parse_room_route("/rooms/interview-42/messages"),
            Some(("interview-42", "messages"))
        );
        assert_eq!(parse_room_route("/rooms//users"), None);
        assert_eq!(parse_room_route("/rooms/R1"), None);
        assert_eq!(parse_room_route("/rooms/R1/a/b"), None);
        assert_eq!(parse_room_route("/other"), None);
    }

    #[tokio::test]
    async fn polling_submit_round_trips_an_ack() {
        let (addr, mut hub_rx) = start_listener().await;

        // Answer the hub side from the test.
        tokio::spawn(async move {
            if let HubCommand::PollingSubmit {
                allocated, reply, ..
            } = recv_cmd(&mut hub_rx).await
            {
                let _ = reply.send(PollingAck {
                    ok: true,
                    client_id: Some(allocated),
                });
            }
        });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let body = r#"{"type":"join-room","data":{"roomId":"R1","userName":"Poll","role":"candidate"}}"#;
        let request = format!(
            "POST /rooms/R1/messages HTTP/1.1\r\n\
             Content-Type: application/json\r\n\
             Content-Length: {}\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(request.as_bytes()).await.unwrap();

        let response = String::from_utf8(read_to_end(&mut stream).await).unwrap();
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains(r#""ok":true"#));
        assert!(response.contains("clientId"));
    }

    #[tokio::test]
    async fn unknown_path_is_a_404() {
        let (addr, _hub_rx) = start_listener().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /health HTTP/1.1\r\n\r\n")
            .await
            .unwrap();
        let response = String::from_utf8(read_to_end(&mut stream).await).unwrap();
        assert!(response.starts_with("HTTP/1.1 404"));
    }

    #[tokio::test]
    async fn malformed_polling_body_is_a_400() {
        let (addr, _hub_rx) = start_listener().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let body = "not json";
        let request = format!(
            "POST /rooms/R1/messages HTTP/1.1\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        );
        stream.write_all(request.as_bytes()).await.unwrap();
        let response = String::from_utf8(read_to_end(&mut stream).await).unwrap();
        assert!(response.starts_with("HTTP/1.1 400"));
        assert!(response.contains(r#""ok":false"#));
    }
}

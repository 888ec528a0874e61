//! # Greenroom Signal Server
//!
//! A lightweight, in-memory signaling and room-presence server for
//! real-time interview sessions.
//!
//! Two or three participants join a named room, negotiate a peer-to-peer
//! audio/video session by relaying opaque SDP/ICE payloads through this
//! server, and exchange chat lines. The server authenticates no one — it
//! trusts each caller's declared identity — and keeps all state in one
//! process: no database, no cloud services.
//!
//! ## Architecture
//!
//! Uses the actor pattern over `mpsc` channels:
//!
//! - [`hub::RelayHub`] is the single worker owning all room and session
//!   state; every mutation is serialized through its command queue.
//! - Each connection has its own reader/writer task communicating with the
//!   hub — no locks in handler code.
//! - Transport backends are pluggable behind [`transports::Listener`]:
//!   a `tokio-tungstenite` WebSocket listener (default feature), a
//!   hand-rolled framed listener built on [`frame`], and a stateless
//!   HTTP polling fallback served by the latter.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use greenroom_signal_server::{ServerConfig, SignalServer};
//!
//! # async fn example() -> greenroom_signal_server::error::Result<()> {
//! let handle = SignalServer::start(ServerConfig::from_env()).await?;
//! tokio::signal::ctrl_c().await?;
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

/// Server configuration and environment variables
pub mod config;

/// Error types
pub mod error;

/// Hand-rolled WebSocket handshake and frame codec
pub mod frame;

/// The state-owning relay hub actor
pub mod hub;

/// Bounded per-room event logs for the polling fallback
pub mod polling;

/// Presence fan-out (join/leave notifications, snapshots)
pub mod presence;

/// Wire protocol definitions
pub mod protocol;

/// Room membership bookkeeping
pub mod rooms;

/// Message routing
pub mod router;

/// Main server orchestration
pub mod server;

/// Client session registry
pub mod session;

/// Transport listener backends
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use config::ServerConfig;
pub use error::SignalServerError;
pub use protocol::{ClientMessage, MemberInfo, Role, ServerMessage};
pub use server::{ServerHandle, SignalServer};

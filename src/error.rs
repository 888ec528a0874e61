//! Error types for the signaling server.

use thiserror::Error;

use crate::frame::FrameError;

/// Errors that can occur while running the signaling server.
#[derive(Debug, Error)]
pub enum SignalServerError {
    /// Failed to send a message through a transport connection.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from a transport connection.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// The WebSocket upgrade handshake could not be completed.
    #[error("handshake error: {0}")]
    Handshake(String),

    /// The wire frame could not be decoded.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Failed to serialize or deserialize a protocol message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for signaling server operations.
pub type Result<T> = std::result::Result<T, SignalServerError>;

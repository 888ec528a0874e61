//! Wire types for the signaling protocol.
//!
//! Every inbound and outbound message shares one envelope shape:
//! `{ "type": "<kebab-case tag>", "data": { ...camelCase fields... } }`.
//! The envelope is what browser clients already speak, so the serde
//! attributes here are the contract — adjacently tagged enums with
//! kebab-case tags and camelCase payload fields.
//!
//! Signaling payloads (SDP offers/answers, ICE candidates) are carried as
//! opaque [`serde_json::Value`]s and never interpreted by the server.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Type aliases ────────────────────────────────────────────────────

/// Unique identifier for a connected client.
pub type ClientId = Uuid;

/// Identifier for a room. Free-form string chosen by the caller.
pub type RoomId = String;

// ── Enums ───────────────────────────────────────────────────────────

/// Role a participant declares when joining a room.
///
/// The server trusts the declared role; there is no authentication.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Candidate,
    Interviewer,
    Admin,
}

// ── Structs ─────────────────────────────────────────────────────────

/// One entry of a `room-users` snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MemberInfo {
    pub id: ClientId,
    pub user_name: String,
    pub role: Role,
}

/// Synchronous acknowledgement returned by the stateless fallback transport.
///
/// `client_id` is populated when the submitted message was a `join-room`,
/// so the polling client learns the id the server allocated for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollingAck {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<ClientId>,
}

// ── Messages ────────────────────────────────────────────────────────

/// Message types sent from clients to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Join (or lazily create) a room, declaring a display name and role.
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        room_id: RoomId,
        user_name: String,
        role: Role,
        /// Honored when supplied (stateless clients re-submitting with an
        /// id they were previously allocated); otherwise the transport
        /// listener allocates a fresh id.
        user_id: Option<ClientId>,
    },
    /// Leave the current room. `data` may be an empty object.
    #[serde(rename_all = "camelCase")]
    LeaveRoom {
        room_id: Option<RoomId>,
        /// Resolves the sender on the stateless transport, which has no
        /// per-connection identity.
        user_id: Option<ClientId>,
    },
    /// Relay an opaque session-negotiation payload (SDP offer/answer,
    /// ICE candidate). With `target_user_id` the message is unicast;
    /// without it, broadcast to every other room member.
    #[serde(rename_all = "camelCase")]
    SignalingMessage {
        room_id: Option<RoomId>,
        message: serde_json::Value,
        target_user_id: Option<ClientId>,
        from_user_id: Option<ClientId>,
    },
    /// Chat line for the whole room, echoed back to the sender too.
    #[serde(rename_all = "camelCase")]
    ChatMessage {
        room_id: Option<RoomId>,
        message: String,
        user_name: String,
        user_id: Option<ClientId>,
    },
}

/// Message types sent from the server to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Greeting carrying the id allocated for this connection.
    #[serde(rename_all = "camelCase")]
    Connected { client_id: ClientId },
    /// Snapshot of the full member list of a room.
    RoomUsers(Vec<MemberInfo>),
    /// Another participant joined the room.
    #[serde(rename_all = "camelCase")]
    UserJoined {
        user_id: ClientId,
        user_name: String,
        role: Role,
    },
    /// A participant left the room (or disconnected).
    #[serde(rename_all = "camelCase")]
    UserLeft { user_id: ClientId },
    /// Relayed session-negotiation payload.
    #[serde(rename_all = "camelCase")]
    SignalingMessage {
        message: serde_json::Value,
        from_user_id: ClientId,
        #[serde(skip_serializing_if = "Option::is_none")]
        target_user_id: Option<ClientId>,
    },
    /// Chat line with a server-generated id and timestamp, delivered to
    /// every room member including the sender.
    #[serde(rename_all = "camelCase")]
    ChatMessage {
        id: Uuid,
        user_name: String,
        message: String,
        /// ISO 8601 UTC timestamp.
        timestamp: String,
        user_id: ClientId,
    },
}

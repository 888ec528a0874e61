#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! End-to-end tests over real sockets.
//!
//! The test client is a real WebSocket implementation
//! (`tokio-tungstenite`), pointed at both listeners — which means the
//! hand-rolled handshake and frame codec get exercised against an
//! independent peer, not just against themselves.

mod common;

use common::*;
use serde_json::json;
use std::time::Duration;

use greenroom_signal_server::protocol::{Role, ServerMessage};

#[cfg(feature = "transport-websocket")]
#[tokio::test]
async fn solo_join_over_websocket_listener() {
    let server = start_server().await;
    let mut x = WsClient::connect(server.ws_addr.unwrap()).await;

    let x_id = x.expect_connected().await;
    x.send(&join_msg("R1", "Alice", Role::Candidate)).await;

    match x.recv().await {
        ServerMessage::RoomUsers(users) => {
            assert_eq!(users.len(), 1, "snapshot includes the joiner");
            assert_eq!(users[0].id, x_id);
            assert_eq!(users[0].user_name, "Alice");
            assert_eq!(users[0].role, Role::Candidate);
        }
        other => panic!("expected room-users, got {other:?}"),
    }

    server.shutdown().await;
}

#[cfg(feature = "transport-websocket")]
#[tokio::test]
async fn full_interview_flow_over_websocket_listener() {
    let server = start_server().await;
    let addr = server.ws_addr.unwrap();

    let mut x = WsClient::connect(addr).await;
    let x_id = x.expect_connected().await;
    x.send(&join_msg("R1", "Alice", Role::Candidate)).await;
    let _ = x.recv().await; // room-users

    let mut y = WsClient::connect(addr).await;
    let y_id = y.expect_connected().await;
    y.send(&join_msg("R1", "Bob", Role::Interviewer)).await;

    // Existing member learns about the newcomer; newcomer gets the
    // two-person snapshot.
    match x.recv().await {
        ServerMessage::UserJoined { user_id, user_name, .. } => {
            assert_eq!(user_id, y_id);
            assert_eq!(user_name, "Bob");
        }
        other => panic!("expected user-joined, got {other:?}"),
    }
    match y.recv().await {
        ServerMessage::RoomUsers(users) => assert_eq!(users.len(), 2),
        other => panic!("expected room-users, got {other:?}"),
    }

    // Targeted signaling: only Bob sees Alice's offer.
    x.send(&signaling_msg(json!({"type": "offer"}), Some(y_id), Some(x_id)))
        .await;
    match y.recv().await {
        ServerMessage::SignalingMessage {
            message,
            from_user_id,
            ..
        } => {
            assert_eq!(message, json!({"type": "offer"}));
            assert_eq!(from_user_id, x_id);
        }
        other => panic!("expected signaling-message, got {other:?}"),
    }

    // Chat is echoed to the whole room, sender included, identically.
    x.send(&chat_msg("R1", "hi", "Alice", Some(x_id))).await;
    let to_x = x.recv().await;
    let to_y = y.recv().await;
    assert_eq!(to_x, to_y);
    match to_x {
        ServerMessage::ChatMessage {
            message, user_id, ..
        } => {
            assert_eq!(message, "hi");
            assert_eq!(user_id, x_id);
        }
        other => panic!("expected chat-message, got {other:?}"),
    }

    // Leaving notifies the remaining member.
    y.send(&leave_msg(None)).await;
    match x.recv().await {
        ServerMessage::UserLeft { user_id } => assert_eq!(user_id, y_id),
        other => panic!("expected user-left, got {other:?}"),
    }

    x.close().await;
    y.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn raw_listener_speaks_real_websocket() {
    let server = start_server().await;

    // A real WebSocket client against the hand-rolled handshake + codec.
    let mut x = WsClient::connect(server.raw_addr).await;
    let x_id = x.expect_connected().await;

    x.send(&join_msg("R1", "Alice", Role::Candidate)).await;
    match x.recv().await {
        ServerMessage::RoomUsers(users) => {
            assert_eq!(users.len(), 1);
            assert_eq!(users[0].id, x_id);
        }
        other => panic!("expected room-users, got {other:?}"),
    }

    x.send(&chat_msg("R1", "framed hello", "Alice", Some(x_id)))
        .await;
    match x.recv().await {
        ServerMessage::ChatMessage { message, .. } => assert_eq!(message, "framed hello"),
        other => panic!("expected chat-message, got {other:?}"),
    }

    x.close().await;
    server.shutdown().await;
}

#[cfg(feature = "transport-websocket")]
#[tokio::test]
async fn rooms_span_transport_backends() {
    let server = start_server().await;

    // Alice on the tungstenite listener, Bob on the hand-rolled one.
    let mut x = WsClient::connect(server.ws_addr.unwrap()).await;
    let x_id = x.expect_connected().await;
    x.send(&join_msg("R1", "Alice", Role::Candidate)).await;
    let _ = x.recv().await; // room-users

    let mut y = WsClient::connect(server.raw_addr).await;
    let y_id = y.expect_connected().await;
    y.send(&join_msg("R1", "Bob", Role::Interviewer)).await;
    let _ = y.recv().await; // room-users

    assert!(matches!(
        x.recv().await,
        ServerMessage::UserJoined { user_id, .. } if user_id == y_id
    ));

    // Signaling crosses the backend boundary.
    y.send(&signaling_msg(json!({"type": "answer"}), Some(x_id), Some(y_id)))
        .await;
    assert!(matches!(
        x.recv().await,
        ServerMessage::SignalingMessage { from_user_id, .. } if from_user_id == y_id
    ));

    x.close().await;
    y.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn abrupt_disconnect_frees_the_room() {
    let server = start_server().await;

    let mut x = WsClient::connect(server.raw_addr).await;
    let _ = x.expect_connected().await;
    x.send(&join_msg("R1", "Alice", Role::Candidate)).await;
    let _ = x.recv().await; // room-users
    x.close().await;

    // Disconnect processing is asynchronous; poll until the member list
    // empties out.
    let mut emptied = false;
    for _ in 0..40 {
        let (_, body) = polling_users(server.raw_addr, "R1").await;
        if body == "[]" {
            emptied = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(emptied, "room must be deleted after its only member drops");

    // A later join behaves as a fresh room creation.
    let mut z = WsClient::connect(server.raw_addr).await;
    let _ = z.expect_connected().await;
    z.send(&join_msg("R1", "Zoe", Role::Interviewer)).await;
    match z.recv().await {
        ServerMessage::RoomUsers(users) => {
            assert_eq!(users.len(), 1);
            assert_eq!(users[0].user_name, "Zoe");
        }
        other => panic!("expected room-users, got {other:?}"),
    }

    z.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn unknown_message_types_do_not_kill_the_connection() {
    let server = start_server().await;

    let mut x = WsClient::connect(server.raw_addr).await;
    let x_id = x.expect_connected().await;

    x.send_raw(r#"{"type":"share-screen","data":{}}"#).await;
    x.send_raw("definitely not json").await;

    // Still alive: the join goes through normally.
    x.send(&join_msg("R1", "Alice", Role::Candidate)).await;
    assert!(matches!(x.recv().await, ServerMessage::RoomUsers(_)));

    x.send(&chat_msg("R1", "still here", "Alice", Some(x_id)))
        .await;
    assert!(matches!(x.recv().await, ServerMessage::ChatMessage { .. }));

    x.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn polling_fallback_round_trip() {
    let server = start_server().await;
    let addr = server.raw_addr;

    // Join over the stateless transport; the ack carries the allocated id.
    let (head, body) = polling_submit(addr, "R1", &join_msg("R1", "Poller", Role::Candidate)).await;
    assert!(head.starts_with("HTTP/1.1 200"), "head: {head}");
    let ack: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(ack["ok"], json!(true));
    let poller_id: uuid::Uuid = serde_json::from_value(ack["clientId"].clone()).unwrap();

    // The member list shows the polling participant.
    let (_, body) = polling_users(addr, "R1").await;
    let users: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(users[0]["userName"], json!("Poller"));

    // A persistent participant joins the same room.
    let mut x = WsClient::connect(addr).await;
    let x_id = x.expect_connected().await;
    x.send(&join_msg("R1", "Alice", Role::Interviewer)).await;
    match x.recv().await {
        ServerMessage::RoomUsers(users) => assert_eq!(users.len(), 2),
        other => panic!("expected room-users, got {other:?}"),
    }

    // The polling log has Alice's join.
    let (_, body) = polling_events(addr, "R1", 0).await;
    let events: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert!(
        events
            .as_array()
            .unwrap()
            .iter()
            .any(|e| e["event"]["type"] == json!("user-joined")
                && e["event"]["data"]["userId"] == json!(x_id.to_string())),
        "polling log must contain Alice's join"
    );
    let cursor = events.as_array().unwrap().last().unwrap()["timestamp"]
        .as_u64()
        .unwrap();

    // Chat submitted over the stateless transport reaches the websocket
    // participant...
    let (head, _) = polling_submit(
        addr,
        "R1",
        &chat_msg("R1", "hello from the poller", "Poller", Some(poller_id)),
    )
    .await;
    assert!(head.starts_with("HTTP/1.1 200"));
    match x.recv().await {
        ServerMessage::ChatMessage {
            message, user_id, ..
        } => {
            assert_eq!(message, "hello from the poller");
            assert_eq!(user_id, poller_id);
        }
        other => panic!("expected chat-message, got {other:?}"),
    }

    // ...and shows up after the cursor for the poller itself.
    let (_, body) = polling_events(addr, "R1", cursor).await;
    let events: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert!(events
        .as_array()
        .unwrap()
        .iter()
        .all(|e| e["timestamp"].as_u64().unwrap() > cursor));
    assert!(events
        .as_array()
        .unwrap()
        .iter()
        .any(|e| e["event"]["type"] == json!("chat-message")));

    // Explicit leave is the stateless transport's only cleanup path.
    let (head, _) = polling_submit(addr, "R1", &leave_msg(Some(poller_id))).await;
    assert!(head.starts_with("HTTP/1.1 200"));
    assert!(matches!(
        x.recv().await,
        ServerMessage::UserLeft { user_id } if user_id == poller_id
    ));

    x.close().await;
    server.shutdown().await;
}

#[tokio::test]
async fn targeted_signaling_to_a_polling_member_lands_in_the_log() {
    let server = start_server().await;
    let addr = server.raw_addr;

    let (_, body) = polling_submit(addr, "R1", &join_msg("R1", "Poller", Role::Candidate)).await;
    let ack: serde_json::Value = serde_json::from_str(&body).unwrap();
    let poller_id: uuid::Uuid = serde_json::from_value(ack["clientId"].clone()).unwrap();

    let mut x = WsClient::connect(addr).await;
    let x_id = x.expect_connected().await;
    x.send(&join_msg("R1", "Alice", Role::Interviewer)).await;
    let _ = x.recv().await; // room-users

    let (_, body) = polling_events(addr, "R1", 0).await;
    let events: serde_json::Value = serde_json::from_str(&body).unwrap();
    let cursor = events.as_array().unwrap().last().unwrap()["timestamp"]
        .as_u64()
        .unwrap();

    x.send(&signaling_msg(json!({"type": "offer"}), Some(poller_id), Some(x_id)))
        .await;

    // The unicast is only observable through the room's event log.
    let mut found = false;
    for _ in 0..40 {
        let (_, body) = polling_events(addr, "R1", cursor).await;
        let events: serde_json::Value = serde_json::from_str(&body).unwrap();
        if events
            .as_array()
            .unwrap()
            .iter()
            .any(|e| e["event"]["type"] == json!("signaling-message"))
        {
            found = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(found, "targeted signaling to a poller must reach the log");

    x.close().await;
    server.shutdown().await;
}

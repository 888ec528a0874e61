#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Wire-shape tests for the signaling protocol.
//!
//! Browser clients speak this envelope directly, so these tests pin the
//! exact JSON — kebab-case `type` tags, camelCase `data` fields — with
//! fixtures, not just round trips.

use serde_json::json;
use uuid::Uuid;

use greenroom_signal_server::protocol::{ClientMessage, MemberInfo, Role, ServerMessage};

fn test_uuid(n: u128) -> Uuid {
    Uuid::from_u128(n)
}

/// Serialize `val` to JSON, then deserialize back and return it.
fn round_trip<T: serde::Serialize + serde::de::DeserializeOwned>(val: &T) -> T {
    let json = serde_json::to_string(val).expect("serialize");
    serde_json::from_str(&json).expect("deserialize")
}

// ════════════════════════════════════════════════════════════════════
// Inbound fixtures — exactly what a browser client sends
// ════════════════════════════════════════════════════════════════════

#[test]
fn join_room_fixture_parses() {
    let raw = r#"{"type":"join-room","data":{"roomId":"R1","userName":"Alice","role":"candidate"}}"#;
    let msg: ClientMessage = serde_json::from_str(raw).expect("parse join-room");
    match msg {
        ClientMessage::JoinRoom {
            room_id,
            user_name,
            role,
            user_id,
        } => {
            assert_eq!(room_id, "R1");
            assert_eq!(user_name, "Alice");
            assert_eq!(role, Role::Candidate);
            assert!(user_id.is_none());
        }
        other => panic!("expected JoinRoom, got {other:?}"),
    }
}

#[test]
fn join_room_fixture_with_user_id_parses() {
    let id = test_uuid(7);
    let raw = format!(
        r#"{{"type":"join-room","data":{{"roomId":"R1","userName":"Bob","role":"interviewer","userId":"{id}"}}}}"#
    );
    let msg: ClientMessage = serde_json::from_str(&raw).expect("parse");
    assert!(matches!(
        msg,
        ClientMessage::JoinRoom { user_id: Some(got), .. } if got == id
    ));
}

#[test]
fn leave_room_with_empty_data_parses() {
    let raw = r#"{"type":"leave-room","data":{}}"#;
    let msg: ClientMessage = serde_json::from_str(raw).expect("parse leave-room");
    assert!(matches!(
        msg,
        ClientMessage::LeaveRoom {
            room_id: None,
            user_id: None
        }
    ));
}

#[test]
fn signaling_message_fixture_parses_with_opaque_payload() {
    let target = test_uuid(2);
    let raw = format!(
        r#"{{"type":"signaling-message","data":{{"roomId":"R1","message":{{"type":"offer","sdp":"v=0..."}},"targetUserId":"{target}"}}}}"#
    );
    let msg: ClientMessage = serde_json::from_str(&raw).expect("parse signaling-message");
    match msg {
        ClientMessage::SignalingMessage {
            message,
            target_user_id,
            ..
        } => {
            // The payload stays opaque — whatever the client put there.
            assert_eq!(message, json!({"type": "offer", "sdp": "v=0..."}));
            assert_eq!(target_user_id, Some(target));
        }
        other => panic!("expected SignalingMessage, got {other:?}"),
    }
}

#[test]
fn chat_message_fixture_parses() {
    let raw = r#"{"type":"chat-message","data":{"roomId":"R1","message":"hi","userName":"Alice"}}"#;
    let msg: ClientMessage = serde_json::from_str(raw).expect("parse chat-message");
    assert!(matches!(
        msg,
        ClientMessage::ChatMessage { message, user_name, .. }
            if message == "hi" && user_name == "Alice"
    ));
}

#[test]
fn unknown_message_type_fails_to_parse() {
    let raw = r#"{"type":"start-screen-share","data":{}}"#;
    assert!(serde_json::from_str::<ClientMessage>(raw).is_err());
}

#[test]
fn envelope_without_data_fails_to_parse() {
    assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"join-room"}"#).is_err());
}

#[test]
fn role_tags_are_lowercase() {
    assert_eq!(serde_json::to_value(Role::Candidate).unwrap(), json!("candidate"));
    assert_eq!(
        serde_json::to_value(Role::Interviewer).unwrap(),
        json!("interviewer")
    );
    assert_eq!(serde_json::to_value(Role::Admin).unwrap(), json!("admin"));
    assert!(serde_json::from_value::<Role>(json!("observer")).is_err());
}

// ════════════════════════════════════════════════════════════════════
// Outbound fixtures — exactly what clients must receive
// ════════════════════════════════════════════════════════════════════

#[test]
fn connected_wire_shape() {
    let id = test_uuid(1);
    let value = serde_json::to_value(ServerMessage::Connected { client_id: id }).unwrap();
    assert_eq!(
        value,
        json!({"type": "connected", "data": {"clientId": id.to_string()}})
    );
}

#[test]
fn room_users_data_is_an_array() {
    let msg = ServerMessage::RoomUsers(vec![MemberInfo {
        id: test_uuid(1),
        user_name: "Alice".into(),
        role: Role::Candidate,
    }]);
    let value = serde_json::to_value(&msg).unwrap();
    assert_eq!(value["type"], "room-users");
    assert!(value["data"].is_array());
    assert_eq!(
        value["data"][0],
        json!({
            "id": test_uuid(1).to_string(),
            "userName": "Alice",
            "role": "candidate"
        })
    );
}

#[test]
fn user_joined_wire_shape() {
    let id = test_uuid(3);
    let value = serde_json::to_value(ServerMessage::UserJoined {
        user_id: id,
        user_name: "Bob".into(),
        role: Role::Interviewer,
    })
    .unwrap();
    assert_eq!(
        value,
        json!({
            "type": "user-joined",
            "data": {
                "userId": id.to_string(),
                "userName": "Bob",
                "role": "interviewer"
            }
        })
    );
}

#[test]
fn user_left_wire_shape() {
    let id = test_uuid(4);
    let value = serde_json::to_value(ServerMessage::UserLeft { user_id: id }).unwrap();
    assert_eq!(
        value,
        json!({"type": "user-left", "data": {"userId": id.to_string()}})
    );
}

#[test]
fn signaling_message_omits_absent_target() {
    let from = test_uuid(5);
    let value = serde_json::to_value(ServerMessage::SignalingMessage {
        message: json!({"candidate": "..."}),
        from_user_id: from,
        target_user_id: None,
    })
    .unwrap();
    assert_eq!(value["type"], "signaling-message");
    assert_eq!(value["data"]["fromUserId"], from.to_string());
    assert!(
        value["data"].get("targetUserId").is_none(),
        "absent target must be omitted, not null"
    );
}

#[test]
fn signaling_message_includes_present_target() {
    let target = test_uuid(6);
    let value = serde_json::to_value(ServerMessage::SignalingMessage {
        message: json!({}),
        from_user_id: test_uuid(5),
        target_user_id: Some(target),
    })
    .unwrap();
    assert_eq!(value["data"]["targetUserId"], target.to_string());
}

#[test]
fn chat_message_wire_shape() {
    let id = test_uuid(8);
    let sender = test_uuid(9);
    let value = serde_json::to_value(ServerMessage::ChatMessage {
        id,
        user_name: "Alice".into(),
        message: "hello".into(),
        timestamp: "2026-08-06T12:00:00.000Z".into(),
        user_id: sender,
    })
    .unwrap();
    assert_eq!(
        value,
        json!({
            "type": "chat-message",
            "data": {
                "id": id.to_string(),
                "userName": "Alice",
                "message": "hello",
                "timestamp": "2026-08-06T12:00:00.000Z",
                "userId": sender.to_string()
            }
        })
    );
}

// ════════════════════════════════════════════════════════════════════
// Round trips
// ════════════════════════════════════════════════════════════════════

#[test]
fn client_message_variants_round_trip() {
    let variants = vec![
        ClientMessage::JoinRoom {
            room_id: "R1".into(),
            user_name: "Alice".into(),
            role: Role::Candidate,
            user_id: Some(test_uuid(1)),
        },
        ClientMessage::LeaveRoom {
            room_id: Some("R1".into()),
            user_id: Some(test_uuid(1)),
        },
        ClientMessage::SignalingMessage {
            room_id: Some("R1".into()),
            message: json!({"type": "answer"}),
            target_user_id: None,
            from_user_id: Some(test_uuid(1)),
        },
        ClientMessage::ChatMessage {
            room_id: Some("R1".into()),
            message: "hi".into(),
            user_name: "Alice".into(),
            user_id: None,
        },
    ];
    for msg in &variants {
        let back = round_trip(msg);
        assert_eq!(
            std::mem::discriminant(msg),
            std::mem::discriminant(&back),
            "variant changed through round trip"
        );
    }
}

#[test]
fn server_message_variants_round_trip() {
    let variants = vec![
        ServerMessage::Connected {
            client_id: test_uuid(1),
        },
        ServerMessage::RoomUsers(vec![]),
        ServerMessage::UserJoined {
            user_id: test_uuid(2),
            user_name: "Bob".into(),
            role: Role::Admin,
        },
        ServerMessage::UserLeft {
            user_id: test_uuid(3),
        },
        ServerMessage::SignalingMessage {
            message: json!({"ice": true}),
            from_user_id: test_uuid(4),
            target_user_id: Some(test_uuid(5)),
        },
        ServerMessage::ChatMessage {
            id: test_uuid(6),
            user_name: "Alice".into(),
            message: "hello".into(),
            timestamp: "2026-08-06T12:00:00Z".into(),
            user_id: test_uuid(7),
        },
    ];
    for msg in &variants {
        assert_eq!(msg, &round_trip(msg));
    }
}

//! Room membership bookkeeping.
//!
//! Rooms hold membership only — they never own the sessions themselves.
//! A room springs into existence on the first join to its id and is deleted
//! the instant the last member leaves; "room exists" and "room has members"
//! are the same statement. The directory is owned by the relay hub and
//! passed by reference to the router, never reached through global state.

use std::collections::HashMap;

use crate::protocol::{ClientId, RoomId};

/// One active room: an insertion-ordered member set.
///
/// Interview rooms hold two or three participants, so a `Vec` with a
/// linear membership check beats a hash set and keeps `room-users`
/// snapshots in join order.
#[derive(Debug)]
pub struct Room {
    members: Vec<ClientId>,
}

impl Room {
    fn new() -> Self {
        Self {
            members: Vec::new(),
        }
    }

    pub fn members(&self) -> &[ClientId] {
        &self.members
    }

    pub fn contains(&self, client: ClientId) -> bool {
        self.members.contains(&client)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// All active rooms, keyed by id.
#[derive(Debug, Default)]
pub struct RoomDirectory {
    rooms: HashMap<RoomId, Room>,
}

impl RoomDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `client` into `room_id`, creating the room lazily.
    ///
    /// Returns `true` if the membership changed; `false` if the client was
    /// already a member (idempotent join).
    pub fn add_member(&mut self, room_id: &str, client: ClientId) -> bool {
        let room = self
            .rooms
            .entry(room_id.to_owned())
            .or_insert_with(Room::new);
        if room.contains(client) {
            return false;
        }
        room.members.push(client);
        true
    }

    /// Remove `client` from `room_id`, deleting the room if it is now
    /// empty. Returns `true` if the client was a member.
    pub fn remove_member(&mut self, room_id: &str, client: ClientId) -> bool {
        let Some(room) = self.rooms.get_mut(room_id) else {
            return false;
        };
        let before = room.members.len();
        room.members.retain(|m| *m != client);
        let removed = room.members.len() != before;
        if room.is_empty() {
            self.rooms.remove(room_id);
        }
        removed
    }

    pub fn get(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    /// Member ids in join order; empty when the room does not exist.
    pub fn members(&self, room_id: &str) -> &[ClientId] {
        self.rooms.get(room_id).map_or(&[], |room| room.members())
    }

    pub fn contains(&self, room_id: &str, client: ClientId) -> bool {
        self.rooms
            .get(room_id)
            .is_some_and(|room| room.contains(client))
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
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
    use uuid::Uuid;

    #[test]
    fn room_is_created_on_first_join_and_deleted_when_empty() {
        let mut rooms = RoomDirectory::new();
        let x = Uuid::new_v4();

        assert!(rooms.is_empty());
        assert!(rooms.add_member("interview-1", x));
        assert_eq!(rooms.room_count(), 1);

        assert!(rooms.remove_member("interview-1", x));
        assert!(rooms.is_empty(), "empty room must be deleted immediately");
    }

    #[test]
    fn add_member_is_idempotent() {
        let mut rooms = RoomDirectory::new();
        let x = Uuid::new_v4();

        assert!(rooms.add_member("r", x));
        assert!(!rooms.add_member("r", x));
        assert_eq!(rooms.members("r").len(), 1);
    }

    #[test]
    fn members_preserve_join_order() {
        let mut rooms = RoomDirectory::new();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        rooms.add_member("r", a);
        rooms.add_member("r", b);
        rooms.add_member("r", c);
        assert_eq!(rooms.members("r"), &[a, b, c]);

        rooms.remove_member("r", b);
        assert_eq!(rooms.members("r"), &[a, c]);
    }

    #[test]
    fn remove_from_unknown_room_is_a_noop() {
        let mut rooms = RoomDirectory::new();
        assert!(!rooms.remove_member("ghost", Uuid::new_v4()));
    }

    #[test]
    fn rooms_are_independent() {
        let mut rooms = RoomDirectory::new();
        let x = Uuid::new_v4();
        let y = Uuid::new_v4();

        rooms.add_member("r1", x);
        rooms.add_member("r2", y);

        rooms.remove_member("r1", x);
        assert!(rooms.get("r1").is_none());
        assert!(rooms.contains("r2", y));
    }
}

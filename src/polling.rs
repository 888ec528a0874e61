//! Bounded per-room event logs for the stateless fallback transport.
//!
//! Clients that cannot hold a persistent connection read room traffic by
//! polling `GET /rooms/{roomId}/events?since={cursor}`. Each room keeps a
//! FIFO log capped at a configurable number of entries; once an event is
//! evicted it is gone — there is no delivery guarantee beyond the retention
//! window, and that is documented behavior rather than an error condition.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::protocol::{RoomId, ServerMessage};

/// Default per-room event log capacity.
pub const DEFAULT_EVENT_LOG_CAPACITY: usize = 50;

/// One buffered room event, tagged with the cursor a poller uses to resume.
///
/// `timestamp` is a per-room strictly increasing sequence number, which
/// satisfies the "monotonically non-decreasing" contract and makes
/// `since` exact even when two events land within the same millisecond.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PollingEvent {
    pub room_id: RoomId,
    pub timestamp: u64,
    /// The full outbound envelope (`{type, data}`), exactly what a
    /// persistent client would have received.
    pub event: ServerMessage,
}

/// One room's bounded FIFO log.
#[derive(Debug)]
struct RelayBuffer {
    events: VecDeque<PollingEvent>,
    next_cursor: u64,
}

impl RelayBuffer {
    fn new() -> Self {
        Self {
            events: VecDeque::new(),
            next_cursor: 1,
        }
    }
}

/// All per-room relay buffers, owned by the hub.
#[derive(Debug)]
pub struct PollingBuffers {
    rooms: HashMap<RoomId, RelayBuffer>,
    capacity: usize,
}

impl PollingBuffers {
    /// `capacity` below 1 is clamped to 1.
    pub fn new(capacity: usize) -> Self {
        Self {
            rooms: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Append `event` to `room_id`'s log, evicting the oldest entry once
    /// the log is at capacity. Returns the cursor assigned to the event.
    pub fn append(&mut self, room_id: &str, event: ServerMessage) -> u64 {
        let buffer = self
            .rooms
            .entry(room_id.to_owned())
            .or_insert_with(RelayBuffer::new);

        let timestamp = buffer.next_cursor;
        buffer.next_cursor += 1;

        if buffer.events.len() == self.capacity {
            buffer.events.pop_front();
        }
        buffer.events.push_back(PollingEvent {
            room_id: room_id.to_owned(),
            timestamp,
            event,
        });
        timestamp
    }

    /// All retained events with a cursor strictly greater than `cursor`,
    /// in append order. Empty when the room has no log.
    pub fn since(&self, room_id: &str, cursor: u64) -> Vec<PollingEvent> {
        self.rooms.get(room_id).map_or_else(Vec::new, |buffer| {
            buffer
                .events
                .iter()
                .filter(|e| e.timestamp > cursor)
                .cloned()
                .collect()
        })
    }

    /// Highest cursor handed out for `room_id` so far (0 when none).
    pub fn latest_cursor(&self, room_id: &str) -> u64 {
        self.rooms
            .get(room_id)
            .map_or(0, |buffer| buffer.next_cursor - 1)
    }

    /// Drop a room's log. Called when the room itself is deleted.
    pub fn remove_room(&mut self, room_id: &str) {
        self.rooms.remove(room_id);
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
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

    fn left_event() -> ServerMessage {
        ServerMessage::UserLeft {
            user_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn append_assigns_strictly_increasing_cursors() {
        let mut buffers = PollingBuffers::new(10);
        let a = buffers.append("r", left_event());
        let b = buffers.append("r", left_event());
        let c = buffers.append("r", left_event());
        assert!(a < b && b < c);
    }

    #[test]
    fn since_returns_only_events_after_the_cursor() {
        let mut buffers = PollingBuffers::new(10);
        buffers.append("r", left_event());
        let second = buffers.append("r", left_event());
        buffers.append("r", left_event());

        let events = buffers.since("r", second);
        assert_eq!(events.len(), 1);
        assert!(events.iter().all(|e| e.timestamp > second));

        assert_eq!(buffers.since("r", 0).len(), 3);
        assert!(buffers.since("r", buffers.latest_cursor("r")).is_empty());
    }

    #[test]
    fn capacity_evicts_oldest_first() {
        let mut buffers = PollingBuffers::new(50);
        for _ in 0..50 {
            buffers.append("r", left_event());
        }
        // The 51st append evicts cursor 1.
        buffers.append("r", left_event());

        let all = buffers.since("r", 0);
        assert_eq!(all.len(), 50);
        let oldest = all.first().unwrap().timestamp;
        assert_eq!(oldest, 2, "cursor 1 must have been evicted");

        // A cursor just below the new oldest returns exactly the current
        // window, none of the evicted entries.
        let window = buffers.since("r", oldest - 1);
        assert_eq!(window.len(), 50);
        assert_eq!(window.first().unwrap().timestamp, 2);
        assert_eq!(window.last().unwrap().timestamp, 51);
    }

    #[test]
    fn cursors_survive_eviction() {
        let mut buffers = PollingBuffers::new(2);
        buffers.append("r", left_event());
        buffers.append("r", left_event());
        buffers.append("r", left_event());
        // Evicted events are permanently lost; cursor numbering continues.
        assert_eq!(buffers.latest_cursor("r"), 3);
        assert_eq!(buffers.since("r", 0).len(), 2);
    }

    #[test]
    fn rooms_have_independent_logs() {
        let mut buffers = PollingBuffers::new(10);
        buffers.append("r1", left_event());
        assert!(buffers.since("r2", 0).is_empty());
        assert_eq!(buffers.latest_cursor("r2"), 0);
    }

    #[test]
    fn remove_room_drops_the_log() {
        let mut buffers = PollingBuffers::new(10);
        buffers.append("r", left_event());
        buffers.remove_room("r");
        assert_eq!(buffers.room_count(), 0);
        assert!(buffers.since("r", 0).is_empty());
    }

    #[test]
    fn zero_capacity_is_clamped_to_one() {
        let mut buffers = PollingBuffers::new(0);
        buffers.append("r", left_event());
        buffers.append("r", left_event());
        assert_eq!(buffers.since("r", 0).len(), 1);
    }
}

//! Developer guardrails and invariants
//!
//! Debug assertions for detecting impossible states during development.
//! These checks are compiled out in release builds.

use std::collections::HashMap;

use crate::models::{Message, MessageKey, RoomId, UserId};

/// Validate that a delivered list is ordered by (timestamp, key)
pub fn assert_ordered(messages: &[Message]) {
    debug_assert!(
        messages
            .windows(2)
            .all(|pair| (pair[0].timestamp, pair[0].key) < (pair[1].timestamp, pair[1].key)),
        "message list is not in (timestamp, key) order"
    );
}

/// Validate that a delivery never loses a message or un-sees one
pub fn assert_delivery_monotone(previous: &[Message], next: &[Message]) {
    assert_ordered(next);

    let next_by_key: HashMap<MessageKey, &Message> = next.iter().map(|m| (m.key, m)).collect();
    for old in previous {
        let current = next_by_key.get(&old.key);
        debug_assert!(
            current.is_some(),
            "message {} disappeared from a later delivery",
            old.key
        );
        if let Some(current) = current {
            debug_assert!(
                !old.seen || current.seen,
                "message {} went from seen back to unseen",
                old.key
            );
        }
    }
}

/// Validate that a message sender belongs to the room it was written to
pub fn assert_sender_in_room(room_id: &RoomId, sender_id: &UserId) {
    debug_assert!(
        room_id.has_participant(sender_id),
        "sender {} is not a participant of room {}",
        sender_id,
        room_id
    );
}

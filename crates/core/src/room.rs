//! Room identity resolution
//!
//! A room belongs to one unordered pair of users. Its id is the smaller user
//! id, `_`, then the larger one, so both participants derive the same room
//! without a lookup.

use crate::error::{Error, Result};
use crate::models::{RoomId, UserId};

/// Derive the room shared by `a` and `b`
///
/// Commutative. Self-chat is rejected.
pub fn resolve(a: &UserId, b: &UserId) -> Result<RoomId> {
    match a.cmp(b) {
        std::cmp::Ordering::Less => Ok(RoomId::from_ordered(a, b)),
        std::cmp::Ordering::Greater => Ok(RoomId::from_ordered(b, a)),
        std::cmp::Ordering::Equal => Err(Error::InvalidInput(format!(
            "cannot open a room between '{}' and itself",
            a
        ))),
    }
}

/// Convenience over raw strings, validating both ids first
pub fn resolve_str(a: &str, b: &str) -> Result<RoomId> {
    resolve(&UserId::new(a)?, &UserId::new(b)?)
}

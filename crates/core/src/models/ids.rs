//! Identifier newtypes

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Separator between the two participants of a room id
pub const ROOM_SEPARATOR: char = '_';

/// Identifier of a platform user (student, mentor or admin)
///
/// Never empty, never padded with whitespace, and never contains the room
/// separator or a path separator, so a room id always splits back into
/// exactly two users.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::InvalidInput("user id is empty".into()));
        }
        if id.trim() != id {
            return Err(Error::InvalidInput(format!(
                "user id '{}' has surrounding whitespace",
                id
            )));
        }
        if id.contains(ROOM_SEPARATOR) || id.contains('/') {
            return Err(Error::InvalidInput(format!(
                "user id '{}' contains a reserved character",
                id
            )));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UserId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

impl FromStr for UserId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of the chat room shared by one unordered pair of users
///
/// Only produced by [`crate::room::resolve`] or by parsing a string of the
/// same shape, so `first < second` always holds.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomId(String);

impl RoomId {
    /// Build from two already ordered, distinct participants
    pub(crate) fn from_ordered(first: &UserId, second: &UserId) -> Self {
        debug_assert!(first < second, "room participants out of order");
        Self(format!("{}{}{}", first, ROOM_SEPARATOR, second))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The two participants, smaller id first
    pub fn participants(&self) -> (UserId, UserId) {
        // Shape was validated on construction
        let (first, second) = self
            .0
            .split_once(ROOM_SEPARATOR)
            .unwrap_or((self.0.as_str(), ""));
        (UserId(first.to_string()), UserId(second.to_string()))
    }

    /// Whether `user` is one of the two participants
    pub fn has_participant(&self, user: &UserId) -> bool {
        let (first, second) = self.participants();
        &first == user || &second == user
    }

    /// The participant that is not `user`, if `user` belongs to the room
    pub fn peer_of(&self, user: &UserId) -> Option<UserId> {
        let (first, second) = self.participants();
        if &first == user {
            Some(second)
        } else if &second == user {
            Some(first)
        } else {
            None
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        let (first, second) = s
            .split_once(ROOM_SEPARATOR)
            .ok_or_else(|| Error::InvalidInput(format!("room id '{}' has no separator", s)))?;
        let first = UserId::new(first)?;
        let second = UserId::new(second)?;
        if first >= second {
            return Err(Error::InvalidInput(format!(
                "room id '{}' is not in canonical order",
                s
            )));
        }
        Ok(Self::from_ordered(&first, &second))
    }
}

impl TryFrom<String> for RoomId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<RoomId> for String {
    fn from(id: RoomId) -> Self {
        id.0
    }
}

impl FromStr for RoomId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Backend-assigned message key, strictly increasing with insertion order
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MessageKey(pub i64);

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

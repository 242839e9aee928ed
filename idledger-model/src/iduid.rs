//! The `IdUid` identifier pair.
//!
//! Every schema element carries both a small sequential `id` (compact storage
//! key, scoped to its category) and a 64-bit `uid` (globally unique, stable
//! across renames). The canonical text form is `"id:uid"`, which is also how
//! the pair is stored in the ledger JSON.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when parsing an `"id:uid"` string fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseIdUidError {
    /// The string did not contain exactly one `:` separator.
    #[error("expected 'id:uid', got '{0}'")]
    MissingSeparator(String),

    /// One of the two halves was not a valid number.
    #[error("invalid number in '{0}'")]
    InvalidNumber(String),
}

/// A sequential id paired with a 64-bit uid.
///
/// `id == 0` and `uid == 0` means "not yet assigned".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct IdUid {
    pub id: i32,
    pub uid: i64,
}

impl IdUid {
    /// Creates a pair from its two halves.
    #[must_use]
    pub const fn new(id: i32, uid: i64) -> Self {
        Self { id, uid }
    }

    /// Returns true if neither half has been assigned yet.
    #[must_use]
    pub const fn is_unset(&self) -> bool {
        self.id == 0 && self.uid == 0
    }

    /// Advances this counter: increments `id`, adopts `uid`, and returns the
    /// new value. Used on the per-category "last id" trackers when a fresh
    /// identifier is drawn.
    pub fn next(&mut self, uid: i64) -> IdUid {
        self.id += 1;
        self.uid = uid;
        *self
    }
}

impl fmt::Display for IdUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.id, self.uid)
    }
}

impl FromStr for IdUid {
    type Err = ParseIdUidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, uid) = s
            .split_once(':')
            .ok_or_else(|| ParseIdUidError::MissingSeparator(s.to_string()))?;
        let id = id
            .parse::<i32>()
            .map_err(|_| ParseIdUidError::InvalidNumber(s.to_string()))?;
        let uid = uid
            .parse::<i64>()
            .map_err(|_| ParseIdUidError::InvalidNumber(s.to_string()))?;
        Ok(Self { id, uid })
    }
}

impl Serialize for IdUid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for IdUid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Logical key within the dictionary. Always lower-cased, see [`normalize_key`].
pub type Key = String;
/// Opaque value payload stored per key.
pub type Value = String;

/// Case-normalizes a caller-supplied key.
pub fn normalize_key(raw: &str) -> Key {
    raw.to_lowercase()
}

/// Unique identifier assigned to every transaction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct TxnId(Uuid);

impl Default for TxnId {
    fn default() -> Self {
        Self::new()
    }
}

impl TxnId {
    /// Creates a new transaction identifier using a random UUID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID. Useful for tests and deterministic flows.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.hyphenated(), f)
    }
}

impl FromStr for TxnId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A speculative write held by a transaction until commit.
///
/// A tombstone is a pending delete and must never be confused with the absence
/// of a pending write for the key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum PendingWrite {
    Put(Value),
    Tombstone,
}

impl PendingWrite {
    /// Value a reader inside the owning transaction observes.
    pub fn visible(&self) -> Option<&Value> {
        match self {
            PendingWrite::Put(value) => Some(value),
            PendingWrite::Tombstone => None,
        }
    }
}

//! Per-key single-writer transactions over the dictionary's base mapping.
//!
//! Locking is pessimistic and fail-fast: a write against a key owned by another
//! transaction returns [`TransactionError::Locked`] immediately. There is no
//! waiting, queueing, or deadlock detection; callers retry or roll back.

mod manager;
mod table;

use thiserror::Error;

use crate::types::{Key, TxnId};

pub use manager::{TransactionManager, spawn_reaper};
pub use table::TransactionTable;

/// Errors surfaced by the transaction table.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransactionError {
    #[error("key {key} locked by {owner}")]
    Locked { key: Key, owner: TxnId },
    #[error("transaction {0} is not active")]
    UnknownTransaction(TxnId),
}

/// Result returned when a transaction commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitReceipt {
    /// Number of pending writes applied to the base mapping. Zero for unknown ids.
    pub writes_applied: usize,
}

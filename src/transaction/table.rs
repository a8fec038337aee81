use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use tokio::time::Instant;

use crate::storage::BaseMapping;
use crate::types::{Key, PendingWrite, TxnId, Value};

use super::{CommitReceipt, TransactionError};

#[derive(Debug)]
struct Transaction {
    pending_writes: BTreeMap<Key, PendingWrite>,
    last_activity: Instant,
    prepared: bool,
}

impl Transaction {
    fn new(now: Instant) -> Self {
        Self {
            pending_writes: BTreeMap::new(),
            last_activity: now,
            prepared: false,
        }
    }
}

/// In-memory transaction state: active transactions, key locks, and the
/// committed base mapping.
///
/// A key appears in a transaction's pending writes exactly when that
/// transaction owns the key's lock. Both are created and released together.
/// The table does no locking of its own; see [`super::TransactionManager`].
#[derive(Debug, Default)]
pub struct TransactionTable {
    base: BaseMapping,
    transactions: HashMap<TxnId, Transaction>,
    key_locks: HashMap<Key, TxnId>,
}

impl TransactionTable {
    pub fn new(base: BaseMapping) -> Self {
        Self {
            base,
            ..Self::default()
        }
    }

    pub fn begin(&mut self, now: Instant) -> TxnId {
        let mut id = TxnId::new();
        while self.transactions.contains_key(&id) {
            id = TxnId::new();
        }
        self.transactions.insert(id, Transaction::new(now));
        id
    }

    /// Reads `key` as seen by `txid`, or committed state when `txid` is `None`
    /// or not active. A pending tombstone reads as absent.
    pub fn read(&self, txid: Option<&TxnId>, key: &str) -> Option<&Value> {
        let pending = txid
            .and_then(|id| self.transactions.get(id))
            .and_then(|txn| txn.pending_writes.get(key));
        match pending {
            Some(write) => write.visible(),
            None => self.base.get(key),
        }
    }

    /// Stages `write` for `key`, acquiring the key lock for `txid`.
    ///
    /// Re-entrant for the current owner.
    pub fn write(
        &mut self,
        txid: &TxnId,
        key: Key,
        write: PendingWrite,
        now: Instant,
    ) -> Result<(), TransactionError> {
        let Some(txn) = self.transactions.get_mut(txid) else {
            return Err(TransactionError::UnknownTransaction(*txid));
        };
        if let Some(owner) = self.key_locks.get(&key)
            && owner != txid
        {
            return Err(TransactionError::Locked { key, owner: *owner });
        }

        self.key_locks.insert(key.clone(), *txid);
        txn.pending_writes.insert(key, write);
        txn.last_activity = now;
        Ok(())
    }

    /// Vote step: succeeds while `txid` is active. A prepared transaction
    /// stays until COMMIT or ROLLBACK and is never reported idle.
    pub fn prepare(&mut self, txid: &TxnId, now: Instant) -> Result<(), TransactionError> {
        let Some(txn) = self.transactions.get_mut(txid) else {
            return Err(TransactionError::UnknownTransaction(*txid));
        };
        txn.prepared = true;
        txn.last_activity = now;
        Ok(())
    }

    /// Applies every pending write, releases the locks, and forgets `txid`.
    /// Unknown ids are a no-op.
    pub fn commit(&mut self, txid: &TxnId) -> CommitReceipt {
        let Some(txn) = self.transactions.remove(txid) else {
            return CommitReceipt { writes_applied: 0 };
        };

        let writes_applied = txn.pending_writes.len();
        for (key, write) in txn.pending_writes {
            self.release_lock(&key, txid);
            match write {
                PendingWrite::Put(value) => {
                    self.base.insert(key, value);
                }
                PendingWrite::Tombstone => {
                    self.base.remove(&key);
                }
            }
        }
        CommitReceipt { writes_applied }
    }

    /// Discards pending writes and releases the locks. Returns whether `txid`
    /// was active.
    pub fn rollback(&mut self, txid: &TxnId) -> bool {
        let Some(txn) = self.transactions.remove(txid) else {
            return false;
        };
        for key in txn.pending_writes.keys() {
            self.release_lock(key, txid);
        }
        true
    }

    pub fn touch(&mut self, txid: &TxnId, now: Instant) {
        if let Some(txn) = self.transactions.get_mut(txid) {
            txn.last_activity = now;
        }
    }

    /// Unprepared transactions whose last activity is older than `max_idle`.
    pub fn idle_transactions(&self, now: Instant, max_idle: Duration) -> Vec<TxnId> {
        self.transactions
            .iter()
            .filter(|(_, txn)| !txn.prepared)
            .filter(|(_, txn)| now.saturating_duration_since(txn.last_activity) > max_idle)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn lock_owner(&self, key: &str) -> Option<&TxnId> {
        self.key_locks.get(key)
    }

    pub fn is_active(&self, txid: &TxnId) -> bool {
        self.transactions.contains_key(txid)
    }

    pub fn active_transactions(&self) -> usize {
        self.transactions.len()
    }

    pub fn base(&self) -> &BaseMapping {
        &self.base
    }

    fn release_lock(&mut self, key: &str, txid: &TxnId) {
        if self.key_locks.get(key) == Some(txid) {
            self.key_locks.remove(key);
        }
    }
}

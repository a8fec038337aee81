use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::storage::BaseMapping;
use crate::types::{PendingWrite, TxnId, Value, normalize_key};

use super::table::TransactionTable;
use super::{CommitReceipt, TransactionError};

/// Shares one [`TransactionTable`] behind a single exclusion.
///
/// Each operation holds the lock only while touching the in-memory table, so a
/// commit is applied and its locks released atomically with respect to every
/// other operation.
#[derive(Debug, Default)]
pub struct TransactionManager {
    table: Mutex<TransactionTable>,
}

impl TransactionManager {
    pub fn new(base: BaseMapping) -> Self {
        Self {
            table: Mutex::new(TransactionTable::new(base)),
        }
    }

    pub async fn begin(&self) -> TxnId {
        let txid = self.table.lock().await.begin(Instant::now());
        debug!(%txid, "transaction started");
        txid
    }

    /// Reads `key` through `txid`'s pending writes, or committed state only when
    /// `txid` is `None`.
    pub async fn read(&self, txid: Option<&TxnId>, key: &str) -> Option<Value> {
        let key = normalize_key(key);
        let mut table = self.table.lock().await;
        if let Some(txid) = txid {
            table.touch(txid, Instant::now());
        }
        table.read(txid, &key).cloned()
    }

    pub async fn write(
        &self,
        txid: &TxnId,
        key: &str,
        value: impl Into<Value>,
    ) -> Result<(), TransactionError> {
        self.stage(txid, key, PendingWrite::Put(value.into())).await
    }

    pub async fn delete(&self, txid: &TxnId, key: &str) -> Result<(), TransactionError> {
        self.stage(txid, key, PendingWrite::Tombstone).await
    }

    async fn stage(
        &self,
        txid: &TxnId,
        key: &str,
        write: PendingWrite,
    ) -> Result<(), TransactionError> {
        let key = normalize_key(key);
        self.table
            .lock()
            .await
            .write(txid, key, write, Instant::now())
    }

    pub async fn prepare(&self, txid: &TxnId) -> Result<(), TransactionError> {
        self.table.lock().await.prepare(txid, Instant::now())
    }

    pub async fn commit(&self, txid: &TxnId) -> CommitReceipt {
        let receipt = self.table.lock().await.commit(txid);
        debug!(%txid, writes = receipt.writes_applied, "transaction committed");
        receipt
    }

    pub async fn rollback(&self, txid: &TxnId) -> bool {
        let existed = self.table.lock().await.rollback(txid);
        debug!(%txid, existed, "transaction rolled back");
        existed
    }

    /// Rolls back every transaction idle for longer than `max_idle`.
    pub async fn reap_idle_at(&self, now: Instant, max_idle: Duration) -> Vec<TxnId> {
        let mut table = self.table.lock().await;
        let idle = table.idle_transactions(now, max_idle);
        for txid in &idle {
            table.rollback(txid);
        }
        idle
    }

    pub async fn is_active(&self, txid: &TxnId) -> bool {
        self.table.lock().await.is_active(txid)
    }

    pub async fn active_transactions(&self) -> usize {
        self.table.lock().await.active_transactions()
    }

    pub async fn lock_owner(&self, key: &str) -> Option<TxnId> {
        let key = normalize_key(key);
        self.table.lock().await.lock_owner(&key).copied()
    }

    /// Copy of the committed mapping.
    pub async fn committed(&self) -> BaseMapping {
        self.table.lock().await.base().clone()
    }
}

/// Periodically rolls back transactions idle for longer than `max_idle`.
///
/// Opt-in: without a reaper, an abandoned transaction keeps its locks forever.
/// Prepared transactions are left for their COMMIT or ROLLBACK.
pub fn spawn_reaper(manager: Arc<TransactionManager>, max_idle: Duration) -> JoinHandle<()> {
    let period = (max_idle / 2).max(Duration::from_millis(100));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            for txid in manager.reap_idle_at(Instant::now(), max_idle).await {
                warn!(%txid, ?max_idle, "rolled back idle transaction");
            }
        }
    })
}

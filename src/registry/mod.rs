//! Liveness registry tracking which named service instances are reachable.
//!
//! Records are refreshed by `register`/`heartbeat` and removed either by
//! `deregister` or by the background pruner once their silence exceeds
//! TTL + grace. Liveness is eventually consistent: `lookup` may return an
//! instance whose TTL has lapsed if the pruner has not run yet.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Registry entry describing one reachable endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceRecord {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub last_seen: Instant,
}

impl InstanceRecord {
    fn is_expired(&self, now: Instant, expiry: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > expiry
    }
}

/// Shared table of instance records keyed by instance name.
///
/// Every operation holds the table lock only for the in-memory access.
#[derive(Debug, Default)]
pub struct LivenessRegistry {
    instances: Mutex<HashMap<String, InstanceRecord>>,
}

impl LivenessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites the record for `name`.
    pub async fn register(&self, name: impl Into<String>, host: impl Into<String>, port: u16) {
        self.register_at(name, host, port, Instant::now()).await;
    }

    pub async fn register_at(
        &self,
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        now: Instant,
    ) {
        let name = name.into();
        let record = InstanceRecord {
            name: name.clone(),
            host: host.into(),
            port,
            last_seen: now,
        };
        self.instances.lock().await.insert(name, record);
    }

    /// Refreshes `last_seen` for a known instance.
    ///
    /// Returns `false` when no record exists. A heartbeat never recreates a
    /// pruned record; the instance has to register again.
    pub async fn heartbeat(&self, name: &str) -> bool {
        self.heartbeat_at(name, Instant::now()).await
    }

    pub async fn heartbeat_at(&self, name: &str, now: Instant) -> bool {
        match self.instances.lock().await.get_mut(name) {
            Some(record) => {
                record.last_seen = now;
                true
            }
            None => false,
        }
    }

    /// Returns the most recently seen instance.
    ///
    /// Equal `last_seen` values resolve to the lexicographically smallest name.
    pub async fn lookup(&self) -> Option<InstanceRecord> {
        let instances = self.instances.lock().await;
        instances
            .values()
            .max_by(|a, b| freshest_first(a, b))
            .cloned()
    }

    /// Removes the record for `name`. Returns whether a record was present.
    pub async fn deregister(&self, name: &str) -> bool {
        self.instances.lock().await.remove(name).is_some()
    }

    /// Removes every record silent for longer than `expiry` and returns their names.
    pub async fn prune_expired_at(&self, now: Instant, expiry: Duration) -> Vec<String> {
        let mut instances = self.instances.lock().await;
        let dead: Vec<String> = instances
            .values()
            .filter(|record| record.is_expired(now, expiry))
            .map(|record| record.name.clone())
            .collect();
        for name in &dead {
            instances.remove(name);
        }
        dead
    }

    pub async fn len(&self) -> usize {
        self.instances.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.instances.lock().await.is_empty()
    }

    /// Copy of all records sorted by name.
    pub async fn snapshot(&self) -> Vec<InstanceRecord> {
        let mut records: Vec<InstanceRecord> =
            self.instances.lock().await.values().cloned().collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }
}

// Greater means "preferred by lookup".
fn freshest_first(a: &InstanceRecord, b: &InstanceRecord) -> Ordering {
    a.last_seen
        .cmp(&b.last_seen)
        .then_with(|| b.name.cmp(&a.name))
}

/// Spawns the background pruning pass.
///
/// The first pass runs one `interval` after spawning. The task runs until the
/// returned handle is aborted.
pub fn spawn_pruner(
    registry: Arc<LivenessRegistry>,
    interval: Duration,
    expiry: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let pruned = registry.prune_expired_at(Instant::now(), expiry).await;
            if pruned.is_empty() {
                debug!("prune pass removed nothing");
            }
            for name in pruned {
                info!(instance = %name, "pruned instance after missed heartbeats");
            }
        }
    })
}

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the naming service.
///
/// The binary hydrates these values from command-line flags with environment
/// fallbacks (`NAMING_PORT`, `TTL_SECONDS`, `HEARTBEAT_GRACE`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NamingConfig {
    /// Address the naming listener binds to (e.g. `0.0.0.0:8000`).
    pub listen_addr: String,
    /// Maximum silence tolerated before an instance counts as dead.
    pub ttl: Duration,
    /// Extra slack added to `ttl` before the pruner removes a record.
    pub grace: Duration,
    /// How often the background pruner runs.
    pub prune_interval: Duration,
    /// How long a connection may take to deliver its request before it is dropped.
    pub request_timeout: Duration,
}

impl NamingConfig {
    pub fn new(listen_addr: impl Into<String>) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            ..Self::default()
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn with_prune_interval(mut self, interval: Duration) -> Self {
        self.prune_interval = interval;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Silence after which a record is eligible for pruning.
    pub fn expiry(&self) -> Duration {
        self.ttl + self.grace
    }
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8000".into(),
            ttl: Duration::from_secs(20),
            grace: Duration::from_secs(10),
            prune_interval: Duration::from_secs(3),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Configuration for one dictionary manager instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DictionaryConfig {
    /// Name the instance registers under. Must be unique across the deployment.
    pub instance_name: String,
    /// Address the request listener binds to.
    pub listen_addr: String,
    /// Host advertised to the naming service. Clients connect to this.
    pub advertise_host: String,
    /// Snapshot file loaded once at startup.
    pub snapshot_path: PathBuf,
    /// Address of the naming service.
    pub naming_addr: String,
    pub heartbeat_interval: Duration,
    /// Roll back transactions idle for longer than this. Disabled when `None`.
    pub idle_txn_timeout: Option<Duration>,
}

impl DictionaryConfig {
    pub fn new(instance_name: impl Into<String>, listen_addr: impl Into<String>) -> Self {
        Self {
            instance_name: instance_name.into(),
            listen_addr: listen_addr.into(),
            ..Self::default()
        }
    }

    pub fn with_snapshot(mut self, path: impl Into<PathBuf>) -> Self {
        self.snapshot_path = path.into();
        self
    }

    pub fn with_naming_addr(mut self, addr: impl Into<String>) -> Self {
        self.naming_addr = addr.into();
        self
    }

    pub fn with_advertise_host(mut self, host: impl Into<String>) -> Self {
        self.advertise_host = host.into();
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_idle_txn_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_txn_timeout = timeout;
        self
    }
}

impl Default for DictionaryConfig {
    fn default() -> Self {
        Self {
            instance_name: "server1".into(),
            listen_addr: "0.0.0.0:9000".into(),
            advertise_host: "127.0.0.1".into(),
            snapshot_path: PathBuf::from("./dictionary.json"),
            naming_addr: "127.0.0.1:8000".into(),
            heartbeat_interval: Duration::from_secs(5),
            idle_txn_timeout: None,
        }
    }
}

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinHandle};
use tracing::{info, warn};

use crate::config::DictionaryConfig;
use crate::dictionary::{
    DictRequest, DictionaryHandle, DictionaryManager, DictionaryServer, Operation,
    spawn_dictionary_manager,
};
use crate::naming::{Endpoint, NamingClient, spawn_heartbeat};
use crate::storage::load_snapshot_or_empty;
use crate::transaction::{TransactionManager, spawn_reaper};

const REQUEST_QUEUE_DEPTH: usize = 1024;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("dictionary listener error: {0}")]
    Io(#[from] io::Error),
    #[error("background task failed: {0}")]
    Task(#[from] JoinError),
}

/// One dictionary instance: command loop, TCP transport, and naming presence.
pub struct DictionaryNode {
    config: DictionaryConfig,
    endpoint: Endpoint,
    local_addr: SocketAddr,
    transactions: Arc<TransactionManager>,
    handle: DictionaryHandle,
    naming: NamingClient,
    manager_task: JoinHandle<()>,
    server_task: JoinHandle<io::Result<()>>,
    server_shutdown: oneshot::Sender<()>,
    heartbeat_task: JoinHandle<()>,
    reaper_task: Option<JoinHandle<()>>,
}

impl DictionaryNode {
    pub async fn start(config: DictionaryConfig) -> Result<Self, NodeError> {
        let listener = TcpListener::bind(&config.listen_addr).await?;
        Self::start_with_listener(config, listener).await
    }

    /// Loads the snapshot, starts serving on `listener`, and registers with the
    /// naming service. An unreachable naming service is not fatal; the
    /// heartbeat task keeps retrying the registration.
    pub async fn start_with_listener(
        config: DictionaryConfig,
        listener: TcpListener,
    ) -> Result<Self, NodeError> {
        let snapshot_path = config.snapshot_path.clone();
        let base = tokio::task::spawn_blocking(move || load_snapshot_or_empty(snapshot_path)).await?;

        let transactions = Arc::new(TransactionManager::new(base));
        let (handle, manager_task) = spawn_dictionary_manager(
            DictionaryManager::new(transactions.clone()),
            REQUEST_QUEUE_DEPTH,
        );

        let server = DictionaryServer::from_listener(listener, handle.clone());
        let local_addr = server.local_addr()?;
        let (server_shutdown, shutdown_rx) = oneshot::channel::<()>();
        let server_task = tokio::spawn(server.serve_with_shutdown(async move {
            let _ = shutdown_rx.await;
        }));

        let endpoint = Endpoint::new(
            config.instance_name.clone(),
            config.advertise_host.clone(),
            local_addr.port(),
        );
        let naming = NamingClient::new(config.naming_addr.clone());
        let registered = match naming
            .register(&endpoint.name, &endpoint.host, endpoint.port)
            .await
        {
            Ok(()) => {
                info!(instance = %endpoint.name, addr = %endpoint.address(), "registered with naming service");
                true
            }
            Err(err) => {
                warn!(instance = %endpoint.name, naming = %naming.addr(), "initial registration failed: {err}");
                false
            }
        };
        let heartbeat_task = spawn_heartbeat(
            naming.clone(),
            endpoint.clone(),
            config.heartbeat_interval,
            registered,
        );

        let reaper_task = config
            .idle_txn_timeout
            .map(|max_idle| spawn_reaper(transactions.clone(), max_idle));

        Ok(Self {
            config,
            endpoint,
            local_addr,
            transactions,
            handle,
            naming,
            manager_task,
            server_task,
            server_shutdown,
            heartbeat_task,
            reaper_task,
        })
    }

    pub fn config(&self) -> &DictionaryConfig {
        &self.config
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Endpoint advertised to the naming service.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn handle(&self) -> DictionaryHandle {
        self.handle.clone()
    }

    pub fn transactions(&self) -> &Arc<TransactionManager> {
        &self.transactions
    }

    /// Serves until a SHUTDOWN request stops the command loop or `signal`
    /// resolves, then deregisters and stops every background task.
    pub async fn run_until_shutdown(
        mut self,
        signal: impl Future<Output = ()>,
    ) -> Result<(), NodeError> {
        let manager_stopped = tokio::select! {
            joined = &mut self.manager_task => {
                joined?;
                true
            }
            _ = signal => false,
        };

        if !manager_stopped {
            // Ignored if the loop already exited between the select and here.
            let _ = self
                .handle
                .call(DictRequest::new(0, Operation::Shutdown))
                .await;
            (&mut self.manager_task).await?;
        }

        self.stop_background().await
    }

    /// Stops the node immediately.
    pub async fn shutdown(self) -> Result<(), NodeError> {
        self.run_until_shutdown(std::future::ready(())).await
    }

    async fn stop_background(self) -> Result<(), NodeError> {
        self.heartbeat_task.abort();
        if let Some(reaper) = self.reaper_task {
            reaper.abort();
        }

        let _ = self.server_shutdown.send(());
        self.server_task.await??;

        if let Err(err) = self.naming.deregister(&self.endpoint.name).await {
            warn!(instance = %self.endpoint.name, "deregistration failed: {err}");
        }
        info!(instance = %self.endpoint.name, "dictionary node stopped");
        Ok(())
    }
}

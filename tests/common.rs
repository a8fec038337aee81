use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use lexkv::{DictionaryConfig, DictionaryNode, LivenessRegistry, NamingConfig, NamingServer};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Naming service bound to an ephemeral port for the duration of a test.
#[allow(dead_code)]
pub struct TestNaming {
    pub addr: SocketAddr,
    pub registry: Arc<LivenessRegistry>,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<std::io::Result<()>>>,
}

#[allow(dead_code)]
impl TestNaming {
    pub async fn spawn() -> Self {
        Self::spawn_with(NamingConfig::default()).await
    }

    pub async fn spawn_with(config: NamingConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind naming listener");
        let server = NamingServer::from_listener(config, listener);
        let addr = server.local_addr().expect("naming local addr");
        let registry = server.registry();

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.serve_with_shutdown(async move {
            let _ = shutdown_rx.await;
        }));

        Self {
            addr,
            registry,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn addr_string(&self) -> String {
        self.addr.to_string()
    }

    pub async fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => panic!("naming server exited with error: {err}"),
                Err(err) => panic!("naming server task panicked: {err}"),
            }
        }
    }
}

/// Writes a JSON snapshot file with the given entries.
#[allow(dead_code)]
pub fn write_snapshot(dir: &Path, entries: &[(&str, &str)]) -> PathBuf {
    let map: serde_json::Map<String, serde_json::Value> = entries
        .iter()
        .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
        .collect();
    let path = dir.join("dictionary.json");
    std::fs::write(&path, serde_json::to_vec(&map).expect("encode snapshot"))
        .expect("write snapshot");
    path
}

/// Starts a dictionary node on an ephemeral port registered with `naming_addr`.
#[allow(dead_code)]
pub async fn start_node(name: &str, naming_addr: &str, snapshot: &Path) -> DictionaryNode {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind dictionary listener");
    let config = DictionaryConfig::new(name, "127.0.0.1:0")
        .with_snapshot(snapshot)
        .with_naming_addr(naming_addr)
        .with_heartbeat_interval(Duration::from_millis(100));
    DictionaryNode::start_with_listener(config, listener)
        .await
        .expect("start dictionary node")
}

/// Sends raw bytes on a fresh connection and returns everything the server wrote.
#[allow(dead_code)]
pub async fn send_raw(addr: SocketAddr, payload: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    stream.write_all(payload).await.expect("write request");
    stream.shutdown().await.expect("close write half");
    let mut buf = String::new();
    stream.read_to_string(&mut buf).await.expect("read response");
    buf
}

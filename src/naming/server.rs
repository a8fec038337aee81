use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::de::IgnoredAny;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::config::NamingConfig;
use crate::registry::{LivenessRegistry, spawn_pruner};

use super::protocol::{Endpoint, NamingErrorCode, NamingRequest, NamingResponse, decode_request};

/// Largest request accepted on one connection.
pub const MAX_REQUEST_BYTES: usize = 64 * 1024;

/// TCP front-end for the liveness registry.
///
/// Each accepted connection carries exactly one request and one response and is
/// served on its own task. A request ends at the first newline, at EOF, or as
/// soon as a complete JSON value has arrived, so peers may keep their write
/// half open while they wait.
pub struct NamingServer {
    config: NamingConfig,
    listener: TcpListener,
    registry: Arc<LivenessRegistry>,
}

impl NamingServer {
    pub async fn bind(config: NamingConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(&config.listen_addr).await?;
        Ok(Self::from_listener(config, listener))
    }

    /// Wraps an already bound listener (used by tests binding port 0).
    pub fn from_listener(config: NamingConfig, listener: TcpListener) -> Self {
        Self {
            config,
            listener,
            registry: Arc::new(LivenessRegistry::new()),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<LivenessRegistry> {
        self.registry.clone()
    }

    pub async fn serve(self) -> io::Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Accepts connections until `shutdown` resolves. The pruner runs for the
    /// lifetime of the accept loop.
    pub async fn serve_with_shutdown(self, shutdown: impl Future<Output = ()>) -> io::Result<()> {
        let addr = self.listener.local_addr()?;
        info!(%addr, ttl = ?self.config.ttl, grace = ?self.config.grace, "naming service listening");

        let pruner = spawn_pruner(
            self.registry.clone(),
            self.config.prune_interval,
            self.config.expiry(),
        );

        let request_timeout = self.config.request_timeout;
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let registry = self.registry.clone();
                        tokio::spawn(async move {
                            let served = handle_connection(stream, &registry, request_timeout);
                            if let Err(err) = served.await {
                                debug!(%peer, "naming connection failed: {err}");
                            }
                        });
                    }
                    Err(err) => warn!("naming accept failed: {err}"),
                },
            }
        }

        pruner.abort();
        info!(%addr, "naming service stopped");
        Ok(())
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    registry: &LivenessRegistry,
    request_timeout: Duration,
) -> io::Result<()> {
    let (mut reader, mut writer) = stream.split();
    let payload = match tokio::time::timeout(request_timeout, read_request(&mut reader)).await {
        Ok(payload) => payload?,
        Err(_) => {
            debug!(?request_timeout, "naming request not received in time");
            return Ok(());
        }
    };

    let response = if payload.len() > MAX_REQUEST_BYTES {
        Some(NamingResponse::error(NamingErrorCode::InvalidJson))
    } else {
        handle_payload(registry, &payload).await
    };

    if let Some(response) = response {
        let mut bytes = serde_json::to_vec(&response).map_err(io::Error::other)?;
        bytes.push(b'\n');
        writer.write_all(&bytes).await?;
        writer.shutdown().await?;
    }
    Ok(())
}

/// Reads one request: up to the first newline, EOF, a complete JSON value, or
/// just past [`MAX_REQUEST_BYTES`], whichever comes first.
async fn read_request(reader: &mut (impl AsyncRead + Unpin)) -> io::Result<Vec<u8>> {
    let mut payload = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let read = reader.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        let scanned = payload.len();
        payload.extend_from_slice(&chunk[..read]);
        if let Some(pos) = payload[scanned..].iter().position(|&b| b == b'\n') {
            payload.truncate(scanned + pos + 1);
            break;
        }
        if payload.len() > MAX_REQUEST_BYTES || holds_complete_value(&payload) {
            break;
        }
    }
    Ok(payload)
}

/// True once more bytes cannot change how `payload` decodes: it starts with a
/// whole JSON value, or with text that is not JSON at all.
fn holds_complete_value(payload: &[u8]) -> bool {
    let mut values = serde_json::Deserializer::from_slice(payload).into_iter::<IgnoredAny>();
    match values.next() {
        None => false,
        Some(Ok(_)) => true,
        Some(Err(err)) => !err.is_eof(),
    }
}

/// Decodes and executes one raw request. Blank payloads produce no response.
pub async fn handle_payload(registry: &LivenessRegistry, payload: &[u8]) -> Option<NamingResponse> {
    if payload.trim_ascii().is_empty() {
        return None;
    }
    let response = match decode_request(payload.trim_ascii()) {
        Ok(request) => handle_request(registry, request).await,
        Err(code) => NamingResponse::error(code),
    };
    Some(response)
}

pub async fn handle_request(registry: &LivenessRegistry, request: NamingRequest) -> NamingResponse {
    match request {
        NamingRequest::Register { name, host, port } => {
            info!(instance = %name, %host, port, "instance registered");
            registry.register(name, host, port).await;
            NamingResponse::ok()
        }
        NamingRequest::Heartbeat { name } => {
            if !registry.heartbeat(&name).await {
                debug!(instance = %name, "heartbeat for unknown instance ignored");
            }
            NamingResponse::ok()
        }
        NamingRequest::Lookup => match registry.lookup().await {
            Some(record) => NamingResponse::endpoint(Endpoint::from(record)),
            None => NamingResponse::error(NamingErrorCode::NoServers),
        },
        NamingRequest::Deregister { name } => {
            if registry.deregister(&name).await {
                info!(instance = %name, "instance deregistered");
            }
            NamingResponse::ok()
        }
    }
}

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tracing::debug;

use crate::dictionary::{DictRequest, DictResponse, RequestId};
use crate::naming::{Endpoint, NamingClient, NamingClientError};

/// Configuration for connecting to one dictionary instance.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub endpoint: String,
}

impl ClientConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

/// Errors surfaced by the dictionary client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
    #[error("naming error: {0}")]
    Naming(#[from] NamingClientError),
    #[error("no dictionary instances available")]
    NoInstances,
    #[error("connection closed by server")]
    Closed,
    #[error("failed to encode request: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("malformed response from server: {0}")]
    MalformedResponse(String),
    #[error("response id {got:?} does not match request id {expected:?}")]
    MismatchedId {
        expected: Option<RequestId>,
        got: Option<RequestId>,
    },
}

struct Connection {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    /// Set from writing a request until its response line is read.
    awaiting_response: bool,
}

impl Connection {
    async fn open(endpoint: &str) -> std::io::Result<Self> {
        let stream = TcpStream::connect(endpoint).await?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            lines: BufReader::new(reader).lines(),
            writer,
            awaiting_response: false,
        })
    }
}

/// Client for a dictionary instance's newline-delimited JSON transport.
///
/// Requests on one client are serialized over a single connection, so
/// responses always arrive in request order. [`Self::call`] is cancel-safe: a
/// call dropped before its response arrives makes the next call reconnect.
#[derive(Clone)]
pub struct DictionaryClient {
    endpoint: String,
    connection: Arc<Mutex<Connection>>,
    next_id: Arc<AtomicU64>,
}

impl DictionaryClient {
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let connection = Connection::open(&config.endpoint).await?;
        Ok(Self {
            endpoint: config.endpoint,
            connection: Arc::new(Mutex::new(connection)),
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    /// Asks the naming service for the most recently live instance and connects to it.
    pub async fn resolve(naming: &NamingClient) -> Result<(Self, Endpoint), ClientError> {
        let endpoint = naming.lookup().await?.ok_or(ClientError::NoInstances)?;
        debug!(instance = %endpoint.name, addr = %endpoint.address(), "resolved dictionary instance");
        let client = Self::connect(ClientConfig::new(endpoint.address())).await?;
        Ok((client, endpoint))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Fresh correlation id for a request sent through this client.
    pub fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn call(&self, request: DictRequest) -> Result<DictResponse, ClientError> {
        let mut payload = serde_json::to_vec(&request).map_err(ClientError::Encode)?;
        payload.push(b'\n');

        let mut conn = self.connection.lock().await;
        if conn.awaiting_response {
            // An abandoned call's response is still unread on this stream.
            debug!(endpoint = %self.endpoint, "reconnecting after interrupted call");
            *conn = Connection::open(&self.endpoint).await?;
        }
        conn.awaiting_response = true;
        conn.writer.write_all(&payload).await?;
        let line = conn.lines.next_line().await?.ok_or(ClientError::Closed)?;
        conn.awaiting_response = false;
        drop(conn);

        let response: DictResponse = serde_json::from_str(&line)
            .map_err(|err| ClientError::MalformedResponse(err.to_string()))?;
        if response.id != request.id {
            return Err(ClientError::MismatchedId {
                expected: request.id,
                got: response.id,
            });
        }
        Ok(response)
    }
}

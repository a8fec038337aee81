use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::protocol::{Endpoint, NamingErrorCode, NamingRequest, NamingResponse, ResponseStatus};

/// Errors surfaced by the naming client.
#[derive(Debug, Error)]
pub enum NamingClientError {
    #[error("naming transport error: {0}")]
    Io(#[from] std::io::Error),
    #[error("naming request timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed naming response: {0}")]
    MalformedResponse(String),
    #[error("naming service rejected request: {0}")]
    Rejected(NamingErrorCode),
}

/// Client for the naming service. Every call opens a fresh connection.
#[derive(Debug, Clone)]
pub struct NamingClient {
    addr: String,
    timeout: Duration,
}

impl NamingClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub async fn register(
        &self,
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Result<(), NamingClientError> {
        let request = NamingRequest::Register {
            name: name.into(),
            host: host.into(),
            port,
        };
        self.expect_ok(request).await
    }

    pub async fn heartbeat(&self, name: impl Into<String>) -> Result<(), NamingClientError> {
        self.expect_ok(NamingRequest::Heartbeat { name: name.into() })
            .await
    }

    pub async fn deregister(&self, name: impl Into<String>) -> Result<(), NamingClientError> {
        self.expect_ok(NamingRequest::Deregister { name: name.into() })
            .await
    }

    /// Resolves the most recently live instance. `Ok(None)` when none is registered.
    pub async fn lookup(&self) -> Result<Option<Endpoint>, NamingClientError> {
        let response = self.send(&NamingRequest::Lookup).await?;
        match (response.status, response.error) {
            (ResponseStatus::Error, Some(NamingErrorCode::NoServers)) => Ok(None),
            (ResponseStatus::Error, code) => Err(rejected(code)),
            (ResponseStatus::Ok, _) => response.into_endpoint().map(Some).ok_or_else(|| {
                NamingClientError::MalformedResponse("lookup response without endpoint".into())
            }),
        }
    }

    async fn expect_ok(&self, request: NamingRequest) -> Result<(), NamingClientError> {
        let response = self.send(&request).await?;
        match response.status {
            ResponseStatus::Ok => Ok(()),
            ResponseStatus::Error => Err(rejected(response.error)),
        }
    }

    /// Sends one request and reads the single response.
    pub async fn send(&self, request: &NamingRequest) -> Result<NamingResponse, NamingClientError> {
        tokio::time::timeout(self.timeout, self.round_trip(request))
            .await
            .map_err(|_| NamingClientError::Timeout(self.timeout))?
    }

    async fn round_trip(&self, request: &NamingRequest) -> Result<NamingResponse, NamingClientError> {
        let mut stream = TcpStream::connect(&self.addr).await?;
        let mut payload = serde_json::to_vec(request)
            .map_err(|err| NamingClientError::MalformedResponse(err.to_string()))?;
        payload.push(b'\n');
        stream.write_all(&payload).await?;

        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await?;
        serde_json::from_slice(buf.trim_ascii())
            .map_err(|err| NamingClientError::MalformedResponse(err.to_string()))
    }
}

fn rejected(code: Option<NamingErrorCode>) -> NamingClientError {
    match code {
        Some(code) => NamingClientError::Rejected(code),
        None => NamingClientError::MalformedResponse("error response without code".into()),
    }
}

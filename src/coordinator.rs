//! Caller-side transaction state machine.
//!
//! The dictionary manager never retries on its own: a conflicting write is
//! reported as `retry` and the caller decides. [`Coordinator`] tracks one
//! transaction through `None -> Active -> Prepared -> Committed | Aborted` and
//! [`run_transaction`] is an explicit retry loop built on top of it.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::client::{ClientError, DictionaryClient};
use crate::dictionary::{
    DictRequest, DictResponse, DictionaryHandle, DictionaryUnavailable, Operation, Status,
};
use crate::types::{TxnId, Value};

/// Failure to deliver a request or receive its response.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Channel(#[from] DictionaryUnavailable),
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Anything that can carry a dictionary request to a manager and back.
#[async_trait]
pub trait DictionaryTransport: Send + Sync {
    async fn call(&self, request: DictRequest) -> Result<DictResponse, TransportError>;
}

#[async_trait]
impl DictionaryTransport for DictionaryHandle {
    async fn call(&self, request: DictRequest) -> Result<DictResponse, TransportError> {
        Ok(DictionaryHandle::call(self, request).await?)
    }
}

#[async_trait]
impl DictionaryTransport for DictionaryClient {
    async fn call(&self, request: DictRequest) -> Result<DictResponse, TransportError> {
        Ok(DictionaryClient::call(self, request).await?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    None,
    Active,
    Prepared,
    Committed,
    Aborted,
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("{operation} not allowed in state {state:?}")]
    InvalidState {
        operation: Operation,
        state: CoordinatorState,
    },
    #[error("write conflict: {0}")]
    Locked(String),
    #[error("{operation} rejected: {message}")]
    Rejected {
        operation: Operation,
        message: String,
    },
    #[error("BEGIN response carried no transaction id")]
    MissingTxid,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Drives one transaction at a time against a dictionary manager.
pub struct Coordinator<T> {
    transport: T,
    state: CoordinatorState,
    txid: Option<TxnId>,
    next_id: u64,
}

impl<T: DictionaryTransport> Coordinator<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            state: CoordinatorState::None,
            txid: None,
            next_id: 1,
        }
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    pub fn txid(&self) -> Option<TxnId> {
        self.txid
    }

    /// Starts a new transaction. Allowed when no transaction is in flight.
    pub async fn begin(&mut self) -> Result<TxnId, CoordinatorError> {
        self.require(
            Operation::Begin,
            &[
                CoordinatorState::None,
                CoordinatorState::Committed,
                CoordinatorState::Aborted,
            ],
        )?;
        let response = self.send(Operation::Begin, |req| req).await?;
        let txid = expect_ok(Operation::Begin, &response)
            .and_then(|()| response.txid.ok_or(CoordinatorError::MissingTxid))?;
        self.txid = Some(txid);
        self.state = CoordinatorState::Active;
        debug!(%txid, "coordinator began transaction");
        Ok(txid)
    }

    /// Reads through the in-flight transaction, or committed state when none is.
    pub async fn lookup(&mut self, key: &str) -> Result<Option<Value>, CoordinatorError> {
        let txid = match self.state {
            CoordinatorState::Active | CoordinatorState::Prepared => self.txid,
            _ => None,
        };
        let key = key.to_string();
        let response = self
            .send(Operation::Lookup, |req| req.with_txid(txid).with_key(key))
            .await?;
        match response.status {
            Status::Ok => Ok(response.value),
            Status::NotFound => Ok(None),
            _ => Err(rejected(Operation::Lookup, response)),
        }
    }

    pub async fn insert(&mut self, key: &str, value: &str) -> Result<(), CoordinatorError> {
        self.write(Operation::Insert, key, Some(value)).await
    }

    pub async fn update(&mut self, key: &str, value: &str) -> Result<(), CoordinatorError> {
        self.write(Operation::Update, key, Some(value)).await
    }

    pub async fn delete(&mut self, key: &str) -> Result<(), CoordinatorError> {
        self.write(Operation::Delete, key, None).await
    }

    async fn write(
        &mut self,
        op: Operation,
        key: &str,
        value: Option<&str>,
    ) -> Result<(), CoordinatorError> {
        self.require(op, &[CoordinatorState::Active])?;
        let txid = self.txid;
        let (key, value) = (key.to_string(), value.map(str::to_string));
        let response = self
            .send(op, |req| {
                let req = req.with_txid(txid).with_key(key);
                match value {
                    Some(value) => req.with_value(value),
                    None => req,
                }
            })
            .await?;
        match response.status {
            Status::Ok => Ok(()),
            Status::Retry => Err(CoordinatorError::Locked(response.value.unwrap_or_default())),
            _ => Err(rejected(op, response)),
        }
    }

    pub async fn prepare(&mut self) -> Result<(), CoordinatorError> {
        self.require(Operation::Prepare, &[CoordinatorState::Active])?;
        let txid = self.txid;
        let response = self
            .send(Operation::Prepare, |req| req.with_txid(txid))
            .await?;
        expect_ok(Operation::Prepare, &response)?;
        self.state = CoordinatorState::Prepared;
        Ok(())
    }

    pub async fn commit(&mut self) -> Result<(), CoordinatorError> {
        self.require(Operation::Commit, &[CoordinatorState::Prepared])?;
        let txid = self.txid;
        let response = self.send(Operation::Commit, |req| req.with_txid(txid)).await?;
        expect_ok(Operation::Commit, &response)?;
        self.state = CoordinatorState::Committed;
        Ok(())
    }

    pub async fn rollback(&mut self) -> Result<(), CoordinatorError> {
        self.require(
            Operation::Rollback,
            &[CoordinatorState::Active, CoordinatorState::Prepared],
        )?;
        let txid = self.txid;
        let response = self
            .send(Operation::Rollback, |req| req.with_txid(txid))
            .await?;
        expect_ok(Operation::Rollback, &response)?;
        self.state = CoordinatorState::Aborted;
        Ok(())
    }

    fn require(
        &self,
        operation: Operation,
        allowed: &[CoordinatorState],
    ) -> Result<(), CoordinatorError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(CoordinatorError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    async fn send(
        &mut self,
        op: Operation,
        build: impl FnOnce(DictRequest) -> DictRequest,
    ) -> Result<DictResponse, CoordinatorError> {
        let id = self.next_id;
        self.next_id += 1;
        let response = self.transport.call(build(DictRequest::new(id, op))).await?;
        Ok(response)
    }
}

fn expect_ok(operation: Operation, response: &DictResponse) -> Result<(), CoordinatorError> {
    match response.status {
        Status::Ok => Ok(()),
        _ => Err(rejected(operation, response.clone())),
    }
}

fn rejected(operation: Operation, response: DictResponse) -> CoordinatorError {
    CoordinatorError::Rejected {
        operation,
        message: response
            .value
            .unwrap_or_else(|| format!("status {:?}", response.status)),
    }
}

/// Bounds for [`run_transaction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_millis(50),
        }
    }
}

/// Runs `body` inside BEGIN ... PREPARE/COMMIT, retrying on write conflicts.
///
/// On [`CoordinatorError::Locked`] the attempt is rolled back and restarted
/// after `policy.backoff`, up to `policy.max_attempts` attempts. Any other
/// error rolls back and is returned as is. `body` may finish the transaction
/// itself; whatever is left open is prepared and committed.
pub async fn run_transaction<T, F, R>(
    transport: T,
    policy: RetryPolicy,
    mut body: F,
) -> Result<R, CoordinatorError>
where
    T: DictionaryTransport + Clone,
    F: AsyncFnMut(&mut Coordinator<T>) -> Result<R, CoordinatorError>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let mut coordinator = Coordinator::new(transport.clone());
        coordinator.begin().await?;

        match body(&mut coordinator).await {
            Ok(result) => {
                if coordinator.state() == CoordinatorState::Active {
                    coordinator.prepare().await?;
                }
                if coordinator.state() == CoordinatorState::Prepared {
                    coordinator.commit().await?;
                }
                return Ok(result);
            }
            Err(CoordinatorError::Locked(reason)) if attempt < attempts => {
                debug!(attempt, %reason, "write conflict, retrying transaction");
                coordinator.rollback().await?;
                attempt += 1;
                tokio::time::sleep(policy.backoff).await;
            }
            Err(err) => {
                if matches!(
                    coordinator.state(),
                    CoordinatorState::Active | CoordinatorState::Prepared
                ) {
                    // The original error matters more than a failed cleanup.
                    let _ = coordinator.rollback().await;
                }
                return Err(err);
            }
        }
    }
}

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::transaction::{TransactionError, TransactionManager};
use crate::types::TxnId;

use super::protocol::{DictRequest, DictResponse, Operation, RequestId, Status};

/// Whether the command loop keeps draining after a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Shutdown,
}

#[derive(Debug, Error)]
enum RequestError {
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("transaction {0} is not active")]
    UnknownTxid(String),
    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

/// Maps protocol requests onto the transaction manager.
#[derive(Debug, Clone)]
pub struct DictionaryManager {
    transactions: Arc<TransactionManager>,
}

impl DictionaryManager {
    pub fn new(transactions: Arc<TransactionManager>) -> Self {
        Self { transactions }
    }

    pub fn transactions(&self) -> &Arc<TransactionManager> {
        &self.transactions
    }

    /// Executes one request. Every failure is reported in the response; only
    /// SHUTDOWN asks the loop to stop.
    pub async fn handle(&self, request: DictRequest) -> (DictResponse, Control) {
        let id = request.id.clone();
        let op = match request.op.parse::<Operation>() {
            Ok(op) => op,
            Err(unsupported) => {
                let msg = format!("Unsupported op: {}", unsupported.0);
                return (DictResponse::error(id, msg), Control::Continue);
            }
        };

        if op == Operation::Shutdown {
            return (
                DictResponse::ok(id).with_value("Shutting down"),
                Control::Shutdown,
            );
        }

        let response = match self.dispatch(op, id.clone(), request).await {
            Ok(response) => response,
            Err(err) => DictResponse::error(id, err.to_string()),
        };
        (response, Control::Continue)
    }

    async fn dispatch(
        &self,
        op: Operation,
        id: Option<RequestId>,
        request: DictRequest,
    ) -> Result<DictResponse, RequestError> {
        let txid = request.parsed_txid();
        let DictRequest {
            txid: raw_txid,
            key,
            value,
            ..
        } = request;
        // A txid that is present but not one of ours names no transaction.
        let active_txid = || match (txid, raw_txid.as_ref()) {
            (Some(txid), _) => Ok(txid),
            (None, Some(raw)) => Err(RequestError::UnknownTxid(raw.clone())),
            (None, None) => Err(RequestError::MissingField("txid")),
        };

        match op {
            Operation::Begin => {
                let txid = self.transactions.begin().await;
                Ok(DictResponse::ok(id).with_txid(txid))
            }
            Operation::Lookup => {
                let key = key.ok_or(RequestError::MissingField("key"))?;
                Ok(match self.transactions.read(txid.as_ref(), &key).await {
                    Some(value) => DictResponse::ok(id).with_value(value),
                    None => DictResponse::new(id, Status::NotFound),
                })
            }
            Operation::Insert | Operation::Update => {
                let txid = active_txid()?;
                let key = key.ok_or(RequestError::MissingField("key"))?;
                let value = value.ok_or(RequestError::MissingField("value"))?;
                let result = self.transactions.write(&txid, &key, value).await;
                write_response(id, result)
            }
            Operation::Delete => {
                let txid = active_txid()?;
                let key = key.ok_or(RequestError::MissingField("key"))?;
                let result = self.transactions.delete(&txid, &key).await;
                write_response(id, result)
            }
            Operation::Prepare => {
                let txid = active_txid()?;
                self.transactions.prepare(&txid).await?;
                Ok(DictResponse::ok(id))
            }
            Operation::Commit => {
                if let Some(txid) = txid {
                    self.transactions.commit(&txid).await;
                }
                Ok(DictResponse::ok(id))
            }
            Operation::Rollback => {
                if let Some(txid) = txid {
                    self.transactions.rollback(&txid).await;
                }
                Ok(DictResponse::ok(id))
            }
            Operation::Shutdown => Ok(DictResponse::ok(id)),
        }
    }
}

fn write_response(
    id: Option<RequestId>,
    result: Result<(), TransactionError>,
) -> Result<DictResponse, RequestError> {
    match result {
        Ok(()) => Ok(DictResponse::ok(id).with_value("ok")),
        Err(TransactionError::Locked { owner, .. }) => {
            Ok(DictResponse::new(id, Status::Retry).with_value(format!("locked by {owner}")))
        }
        Err(err) => Err(err.into()),
    }
}

/// Returned when the command loop has stopped.
#[derive(Debug, Error)]
#[error("dictionary manager is no longer running")]
pub struct DictionaryUnavailable;

struct Envelope {
    request: DictRequest,
    reply: oneshot::Sender<DictResponse>,
}

/// Sending side of the manager's request channel.
#[derive(Debug, Clone)]
pub struct DictionaryHandle {
    tx: mpsc::Sender<Envelope>,
}

impl DictionaryHandle {
    /// Submits `request` and waits for its response.
    pub async fn call(&self, request: DictRequest) -> Result<DictResponse, DictionaryUnavailable> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(Envelope { request, reply })
            .await
            .map_err(|_| DictionaryUnavailable)?;
        response.await.map_err(|_| DictionaryUnavailable)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Begins a transaction; convenience over [`Self::call`].
    pub async fn begin(
        &self,
        id: impl Into<RequestId>,
    ) -> Result<Option<TxnId>, DictionaryUnavailable> {
        let response = self.call(DictRequest::new(id, Operation::Begin)).await?;
        Ok(response.txid)
    }
}

/// Starts the single-consumer command loop.
///
/// Requests are processed one at a time in receipt order. The loop ends after
/// answering SHUTDOWN or once every handle is dropped; queued requests behind a
/// SHUTDOWN observe [`DictionaryUnavailable`].
pub fn spawn_dictionary_manager(
    manager: DictionaryManager,
    capacity: usize,
) -> (DictionaryHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<Envelope>(capacity.max(1));
    let task = tokio::spawn(async move {
        while let Some(Envelope { request, reply }) = rx.recv().await {
            debug!(op = %request.op, id = ?request.id, "dictionary request");
            let (response, control) = manager.handle(request).await;
            // The caller may have given up waiting; nothing to report then.
            let _ = reply.send(response);
            if control == Control::Shutdown {
                info!("dictionary manager shutting down");
                break;
            }
        }
    });
    (DictionaryHandle { tx }, task)
}

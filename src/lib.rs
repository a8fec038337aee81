//! Core crate exports for lexkv.
//!
//! Two independent cores live here: the liveness registry behind the naming
//! service, and the transaction table behind the dictionary manager. Each is an
//! owned struct behind its own exclusion and is handed to the serving loops
//! that use it.

pub mod client;
pub mod config;
pub mod coordinator;
pub mod dictionary;
pub mod naming;
pub mod node;
pub mod registry;
pub mod storage;
pub mod transaction;
pub mod types;

pub use client::{ClientConfig, ClientError, DictionaryClient};
pub use config::{DictionaryConfig, NamingConfig};
pub use coordinator::{
    Coordinator, CoordinatorError, CoordinatorState, DictionaryTransport, RetryPolicy,
    run_transaction,
};
pub use dictionary::{DictRequest, DictResponse, DictionaryHandle, Operation, Status};
pub use naming::{Endpoint, NamingClient, NamingServer};
pub use node::{DictionaryNode, NodeError};
pub use registry::{InstanceRecord, LivenessRegistry};
pub use transaction::{CommitReceipt, TransactionError, TransactionManager};
pub use types::{Key, PendingWrite, TxnId, Value};

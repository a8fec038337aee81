//! Dictionary manager: the request/response protocol over the transaction table.

pub mod manager;
pub mod protocol;
pub mod server;

pub use manager::{
    Control, DictionaryHandle, DictionaryManager, DictionaryUnavailable, spawn_dictionary_manager,
};
pub use protocol::{DictRequest, DictResponse, Operation, RequestId, Status};
pub use server::DictionaryServer;

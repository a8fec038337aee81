//! Naming service: request/response protocol over the liveness registry.

pub mod client;
pub mod heartbeat;
pub mod protocol;
pub mod server;

pub use client::{NamingClient, NamingClientError};
pub use heartbeat::spawn_heartbeat;
pub use protocol::{Endpoint, NamingErrorCode, NamingRequest, NamingResponse, ResponseStatus};
pub use server::NamingServer;

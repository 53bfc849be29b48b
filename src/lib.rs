//! docwire - request dispatch and reply correlation for a document database
//! wire-protocol server
//!
//! Decoded client requests enter through [`Dispatcher::on_request`]. Queries
//! always come back as exactly one correlated [`Reply`]; backend failures are
//! translated into error documents inside that reply. Inserts, updates and
//! deletes are forwarded to the [`Backend`] without a reply.

pub mod backend;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod document;
pub mod error;
pub mod memory;
pub mod message;
pub mod registry;
pub mod router;
pub mod server;
pub mod status;
pub mod telemetry;
pub mod translate;
pub mod wire;

pub use backend::Backend;
pub use connection::{Connection, ConnectionId};
pub use dispatcher::Dispatcher;
pub use document::Document;
pub use error::{Result, ServerError};
pub use memory::MemoryBackend;
pub use message::{ClientRequest, Delete, Insert, MessageHeader, Namespace, Query, Reply, Update};
pub use registry::ConnectionRegistry;

//! Backend - the storage and execution engine behind the dispatcher
//!
//! The dispatcher never interprets data itself. Everything except routing,
//! `serverStatus` and error translation is delegated through this trait.
//! Implementations are shared by all connection threads and may block.

use crate::connection::Connection;
use crate::document::Document;
use crate::error::Result;
use crate::message::{Delete, Insert, Query, Update};

/// Query, write and command execution consumed by the dispatcher
///
/// Send + Sync required: one instance serves every connection thread.
pub trait Backend: Send + Sync {
    // === READ PATH ===

    /// Execute a query, returning the matching documents in result order
    fn handle_query(&self, query: &Query) -> Result<Vec<Document>>;

    /// Execute a command addressed to `<database>.$cmd`
    fn handle_command(
        &self,
        connection: &Connection,
        database: &str,
        command: &str,
        query: &Document,
    ) -> Result<Document>;

    /// Operations currently executing (for `$cmd.sys.inprog`)
    fn get_current_operations(&self, query: &Query) -> Result<Vec<Document>>;

    // === WRITE PATH ===

    fn handle_insert(&self, insert: &Insert) -> Result<()>;

    fn handle_update(&self, update: &Update) -> Result<()>;

    fn handle_delete(&self, delete: &Delete) -> Result<()>;

    // === LIFECYCLE ===

    /// Release any state held for a closed connection
    fn handle_close(&self, connection: &Connection);

    /// Version components, reported dot-joined by `serverStatus`
    fn version(&self) -> Vec<u32>;
}

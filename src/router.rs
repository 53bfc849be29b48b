//! Command routing for administrative pseudo-collections
//!
//! Queries against `<db>.$cmd*` are not data reads. They are routed here:
//!
//! - `$cmd.sys.inprog` -> backend current operations, wrapped under `inprog`
//! - `$cmd` + `serverStatus` -> answered locally by [`StatusReporter`]
//! - `$cmd` + anything else -> backend command handler
//! - any other `$cmd...` name -> unclassified error

use std::sync::Arc;

use serde_json::Value;

use crate::backend::Backend;
use crate::connection::Connection;
use crate::document::{doc, Document};
use crate::error::{Result, ServerError};
use crate::message::{Query, COMMAND_COLLECTION, CURRENT_OP_COLLECTION};
use crate::registry::ConnectionRegistry;
use crate::status::StatusReporter;

/// Command answered by this layer instead of the backend
pub const SERVER_STATUS_COMMAND: &str = "serverStatus";

/// Key wrapping the current-operations list
pub const INPROG_KEY: &str = "inprog";

pub struct CommandRouter {
    backend: Arc<dyn Backend>,
    registry: Arc<ConnectionRegistry>,
    status: StatusReporter,
}

impl CommandRouter {
    pub fn new(backend: Arc<dyn Backend>, registry: Arc<ConnectionRegistry>, status: StatusReporter) -> Self {
        Self { backend, registry, status }
    }

    pub fn status_reporter(&self) -> &StatusReporter {
        &self.status
    }

    /// Produce the single result document for an administrative query
    pub fn route(&self, connection: &Connection, query: &Query) -> Result<Document> {
        let collection = query.collection_name();

        if collection == CURRENT_OP_COLLECTION {
            let operations = self.backend.get_current_operations(query)?;
            let inprog: Vec<Value> = operations.into_iter().map(Value::Object).collect();
            return Ok(doc([(INPROG_KEY, Value::Array(inprog))]));
        }

        if collection == COMMAND_COLLECTION {
            let command = command_name(&query.query)?;
            if command == SERVER_STATUS_COMMAND {
                return self.status.snapshot(&self.registry, &self.backend.version());
            }
            return self
                .backend
                .handle_command(connection, query.database_name(), command, &query.query);
        }

        Err(ServerError::unclassified(format!("unknown collection: {}", collection)))
    }
}

/// Name of the command in a command document: its first key.
///
/// Additional keys are command arguments.
pub fn command_name(query: &Document) -> Result<&str> {
    query
        .keys()
        .next()
        .map(|k| k.as_str())
        .ok_or_else(|| ServerError::no_such_command(""))
}

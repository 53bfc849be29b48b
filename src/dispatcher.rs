//! Dispatcher - per-connection entry point
//!
//! The transport calls three hooks:
//!
//! - `on_connection_open` once when a connection is accepted
//! - `on_request` for every decoded request, in arrival order
//! - `on_connection_close` once when the connection goes away
//!
//! One `Dispatcher` is shared (via `Arc`) by all connection threads. The
//! only state it mutates is the registry. Response ids come from the
//! process-wide sequence, so replies from different dispatchers never share
//! an id.
//!
//! # Failure handling
//!
//! Queries always produce exactly one reply: any backend failure is caught
//! in `handle_query` and becomes a single error document. Inserts, updates
//! and deletes have no reply, so their failures are returned to the
//! transport, which treats them as fatal for the connection.

use std::sync::Arc;
use std::time::Instant;

use time::OffsetDateTime;

use crate::backend::Backend;
use crate::connection::Connection;
use crate::document::Document;
use crate::error::Result;
use crate::message::{self, ClientRequest, MessageHeader, Query, Reply};
use crate::registry::ConnectionRegistry;
use crate::router::CommandRouter;
use crate::status::StatusReporter;
use crate::translate;

pub struct Dispatcher {
    backend: Arc<dyn Backend>,
    registry: Arc<ConnectionRegistry>,
    router: CommandRouter,
    started_date: OffsetDateTime,
}

impl Dispatcher {
    /// Create a dispatcher with an empty registry; uptime starts now
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self::with_parts(
            backend,
            Arc::new(ConnectionRegistry::new()),
            StatusReporter::new(Instant::now()),
        )
    }

    /// Create a dispatcher from explicit collaborators
    pub fn with_parts(
        backend: Arc<dyn Backend>,
        registry: Arc<ConnectionRegistry>,
        status: StatusReporter,
    ) -> Self {
        let router = CommandRouter::new(Arc::clone(&backend), Arc::clone(&registry), status);
        Self {
            backend,
            registry,
            router,
            started_date: OffsetDateTime::now_utc(),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Wall-clock time at which this dispatcher was created
    pub fn started_date(&self) -> OffsetDateTime {
        self.started_date
    }

    /// Monotonic instant uptime is measured from
    pub fn started_at(&self) -> Instant {
        self.router.status_reporter().started_at()
    }

    // ========================================================================
    // Connection lifecycle
    // ========================================================================

    pub fn on_connection_open(&self, connection: &Connection) {
        self.registry.add(connection);
        tracing::info!(connection = %connection, open = self.registry.size(), "client connected");
    }

    /// Unregister a connection and let the backend release its state.
    ///
    /// Closing a connection that is not registered does nothing.
    pub fn on_connection_close(&self, connection: &Connection) {
        if !self.registry.remove(connection) {
            tracing::debug!(connection = %connection, "close of unregistered connection ignored");
            return;
        }
        self.backend.handle_close(connection);
        tracing::info!(connection = %connection, open = self.registry.size(), "connection closed");
    }

    // ========================================================================
    // Requests
    // ========================================================================

    /// Handle one decoded request.
    ///
    /// Returns `Ok(Some(reply))` for queries and `Ok(None)` for writes.
    ///
    /// # Errors
    /// A write the backend rejects. There is no reply channel for writes, so
    /// the caller must treat this as fatal for the connection.
    pub fn on_request(&self, connection: &Connection, request: &ClientRequest) -> Result<Option<Reply>> {
        tracing::debug!(
            connection = %connection,
            op = request.operation_name(),
            ns = %request.namespace(),
            request_id = request.header().request_id,
            "dispatching request"
        );

        match request {
            ClientRequest::Query(query) => Ok(Some(self.handle_query(connection, query))),
            ClientRequest::Insert(insert) => {
                self.backend.handle_insert(insert)?;
                Ok(None)
            }
            ClientRequest::Update(update) => {
                self.backend.handle_update(update)?;
                Ok(None)
            }
            ClientRequest::Delete(delete) => {
                self.backend.handle_delete(delete)?;
                Ok(None)
            }
        }
    }

    /// Answer a query with exactly one correlated reply.
    ///
    /// Result documents are passed through in backend order. A failure
    /// becomes the reply's only document.
    pub fn handle_query(&self, connection: &Connection, query: &Query) -> Reply {
        let header = MessageHeader::reply(message::next_response_id(), query.header.request_id);

        let documents = match self.execute_query(connection, query) {
            Ok(documents) => documents,
            Err(e) => {
                translate::log_failure(&e, query);
                vec![translate::error_document(&e, query)]
            }
        };

        Reply::new(header, documents)
    }

    fn execute_query(&self, connection: &Connection, query: &Query) -> Result<Vec<Document>> {
        if query.namespace.is_command() {
            return Ok(vec![self.router.route(connection, query)?]);
        }
        self.backend.handle_query(query)
    }
}

//! Decoded client requests and correlated replies
//!
//! A request arrives already framed and decoded into one of four variants.
//! Only queries are answered; writes have no reply channel at the wire level.

use std::sync::atomic::{AtomicI32, Ordering};

use crate::document::Document;
use crate::error::{Result, ServerError};

/// Prefix of every administrative pseudo-collection
pub const COMMAND_COLLECTION: &str = "$cmd";

/// Pseudo-collection listing the operations currently in progress
pub const CURRENT_OP_COLLECTION: &str = "$cmd.sys.inprog";

// ============================================================================
// Header
// ============================================================================

/// Correlation fields of a message.
///
/// On a request `request_id` is the client-assigned id. On a reply it is the
/// server-assigned response id and `response_to` echoes the request's id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub request_id: i32,
    pub response_to: i32,
}

impl MessageHeader {
    /// Header of a client request
    pub fn request(request_id: i32) -> Self {
        Self { request_id, response_to: 0 }
    }

    /// Header of a reply to `request_id`
    pub fn reply(response_id: i32, request_id: i32) -> Self {
        Self { request_id: response_id, response_to: request_id }
    }
}

// ============================================================================
// Namespace
// ============================================================================

/// Fully qualified collection name, `<database>.<collection>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    pub database: String,
    pub collection: String,
}

impl Namespace {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self { database: database.into(), collection: collection.into() }
    }

    /// Split a full collection name at its first dot.
    ///
    /// The collection part keeps any further dots (`admin.$cmd.sys.inprog`).
    pub fn parse(full_name: &str) -> Result<Self> {
        match full_name.split_once('.') {
            Some((db, coll)) if !db.is_empty() && !coll.is_empty() => Ok(Self::new(db, coll)),
            _ => Err(ServerError::unclassified(format!("invalid namespace: {}", full_name))),
        }
    }

    /// Check whether this namespace addresses an administrative pseudo-collection
    pub fn is_command(&self) -> bool {
        self.collection.starts_with(COMMAND_COLLECTION)
    }

    pub fn full_name(&self) -> String {
        format!("{}.{}", self.database, self.collection)
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

// ============================================================================
// Requests
// ============================================================================

/// Read request against a collection or pseudo-collection
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub header: MessageHeader,
    pub namespace: Namespace,
    pub query: Document,
    pub field_selector: Option<Document>,
    pub number_to_skip: u32,
    /// Zero means "backend default"; positive values cap the result
    pub number_to_return: i32,
}

impl Query {
    pub fn new(header: MessageHeader, namespace: Namespace, query: Document) -> Self {
        Self {
            header,
            namespace,
            query,
            field_selector: None,
            number_to_skip: 0,
            number_to_return: 0,
        }
    }

    pub fn database_name(&self) -> &str {
        &self.namespace.database
    }

    pub fn collection_name(&self) -> &str {
        &self.namespace.collection
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Insert {
    pub header: MessageHeader,
    pub namespace: Namespace,
    pub documents: Vec<Document>,
    pub continue_on_error: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub header: MessageHeader,
    pub namespace: Namespace,
    pub selector: Document,
    pub update: Document,
    pub upsert: bool,
    pub multi: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delete {
    pub header: MessageHeader,
    pub namespace: Namespace,
    pub selector: Document,
    pub single_remove: bool,
}

/// A decoded client request
#[derive(Debug, Clone, PartialEq)]
pub enum ClientRequest {
    Query(Query),
    Insert(Insert),
    Update(Update),
    Delete(Delete),
}

impl ClientRequest {
    pub fn header(&self) -> &MessageHeader {
        match self {
            ClientRequest::Query(q) => &q.header,
            ClientRequest::Insert(i) => &i.header,
            ClientRequest::Update(u) => &u.header,
            ClientRequest::Delete(d) => &d.header,
        }
    }

    pub fn namespace(&self) -> &Namespace {
        match self {
            ClientRequest::Query(q) => &q.namespace,
            ClientRequest::Insert(i) => &i.namespace,
            ClientRequest::Update(u) => &u.namespace,
            ClientRequest::Delete(d) => &d.namespace,
        }
    }

    /// Operation name for logs and slow-request tracking
    pub fn operation_name(&self) -> &'static str {
        match self {
            ClientRequest::Query(_) => "Query",
            ClientRequest::Insert(_) => "Insert",
            ClientRequest::Update(_) => "Update",
            ClientRequest::Delete(_) => "Delete",
        }
    }
}

// ============================================================================
// Reply
// ============================================================================

/// Reply to exactly one query
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub header: MessageHeader,
    pub documents: Vec<Document>,
}

impl Reply {
    pub fn new(header: MessageHeader, documents: Vec<Document>) -> Self {
        Self { header, documents }
    }

    /// Response id assigned by the server
    pub fn response_id(&self) -> i32 {
        self.header.request_id
    }

    /// Echoed client request id
    pub fn response_to(&self) -> i32 {
        self.header.response_to
    }
}

// Process-wide response id counter, shared by every dispatcher
static NEXT_RESPONSE_ID: ResponseIdSequence = ResponseIdSequence::new();

/// Allocate a response id from the process-wide sequence
pub fn next_response_id() -> i32 {
    NEXT_RESPONSE_ID.next_id()
}

/// Atomic source of response ids.
///
/// Ids are never reused within the lifetime of the sequence; the counter
/// wraps around on overflow. Replies draw from the single process-wide
/// instance behind [`next_response_id`].
#[derive(Debug, Default)]
pub struct ResponseIdSequence {
    last: AtomicI32,
}

impl ResponseIdSequence {
    pub const fn new() -> Self {
        Self::starting_after(0)
    }

    /// Sequence whose first id is `base + 1`
    pub const fn starting_after(base: i32) -> Self {
        Self { last: AtomicI32::new(base) }
    }

    /// Allocate the next id
    pub fn next_id(&self) -> i32 {
        self.last.fetch_add(1, Ordering::SeqCst).wrapping_add(1)
    }
}

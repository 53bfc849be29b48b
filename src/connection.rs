//! Connection - identity of one client connection
//!
//! Each accepted transport stream gets a `Connection` before its first
//! request and keeps it until it closes. The registry and the backend key
//! per-connection state by `ConnectionId`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Unique identifier for a client connection
pub type ConnectionId = u64;

// Global connection ID counter
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Handle for a client connection
///
/// Cheap to clone; clones compare equal and share the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Connection {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    opened_at: Instant,
}

impl Connection {
    /// Create a connection with a fresh process-wide id
    ///
    /// # Arguments
    /// * `peer` - Remote address, if the transport has one
    pub fn new(peer: Option<SocketAddr>) -> Self {
        Self::with_id(NEXT_CONNECTION_ID.fetch_add(1, Ordering::SeqCst), peer)
    }

    /// Create a connection with a caller-chosen id (tests, embedded transports)
    pub fn with_id(id: ConnectionId, peer: Option<SocketAddr>) -> Self {
        Self { id, peer, opened_at: Instant::now() }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    /// Time since the connection was created
    pub fn age(&self) -> std::time::Duration {
        self.opened_at.elapsed()
    }
}

impl std::fmt::Display for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.peer {
            Some(addr) => write!(f, "#{} ({})", self.id, addr),
            None => write!(f, "#{}", self.id),
        }
    }
}

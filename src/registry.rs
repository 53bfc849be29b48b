//! ConnectionRegistry - Thread-safe set of open connections
//!
//! Connections are added when the transport opens them and removed when it
//! closes them. The live size feeds `serverStatus.connections.current`.
//!
//! Membership changes from different connection threads are serialized by a
//! single `RwLock`, so a `size()` taken after `add()` returns always reflects
//! that addition.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::connection::{Connection, ConnectionId};

/// Registry of currently open connections
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an open connection
    ///
    /// Returns `false` if it was already registered.
    pub fn add(&self, connection: &Connection) -> bool {
        let mut connections = self.connections.write().unwrap_or_else(PoisonError::into_inner);
        connections.insert(connection.id(), connection.clone()).is_none()
    }

    /// Remove a connection
    ///
    /// Removing an absent connection is a no-op and returns `false`.
    pub fn remove(&self, connection: &Connection) -> bool {
        let mut connections = self.connections.write().unwrap_or_else(PoisonError::into_inner);
        connections.remove(&connection.id()).is_some()
    }

    /// Number of open connections
    pub fn size(&self) -> usize {
        self.connections.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn contains(&self, connection: &Connection) -> bool {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&connection.id())
    }

    /// Snapshot of the open connections, ordered by id
    pub fn connections(&self) -> Vec<Connection> {
        let connections = self.connections.read().unwrap_or_else(PoisonError::into_inner);
        let mut list: Vec<Connection> = connections.values().cloned().collect();
        list.sort_by_key(|c| c.id());
        list
    }
}

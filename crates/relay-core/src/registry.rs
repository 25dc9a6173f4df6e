//! The registry of live connections.
//!
//! Structural changes and snapshots share one reader/writer lock. A snapshot
//! is a copy of the current `Arc<Connection>` handles, so iterating it never
//! holds the lock and never observes a half-applied insert or removal.

use crate::connection::{Connection, ConnectionId};
use crate::error::RelayError;
use crate::metrics as names;
use metrics::gauge;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Default maximum number of registered connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10_000;

/// Set of live connections keyed by identity.
pub struct Registry {
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    max_connections: usize,
}

impl Registry {
    /// Create a registry with the default connection limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_MAX_CONNECTIONS)
    }

    /// Create a registry holding at most `max_connections` entries.
    #[must_use]
    pub fn with_limit(max_connections: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            max_connections,
        }
    }

    /// Register a connection.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::DuplicateIdentity`] if the identity is already
    /// registered and [`RelayError::RegistryFull`] if the limit is reached.
    pub fn add(&self, connection: Arc<Connection>) -> Result<(), RelayError> {
        let id = connection.id();
        let count = {
            let mut connections = self.connections.write();
            if connections.contains_key(&id) {
                return Err(RelayError::DuplicateIdentity(id));
            }
            if connections.len() >= self.max_connections {
                return Err(RelayError::RegistryFull(self.max_connections));
            }
            connections.insert(id, connection);
            connections.len()
        };

        gauge!(names::CONNECTIONS_ACTIVE).set(count as f64);
        debug!(connection = %id, connections = count, "Registered");
        Ok(())
    }

    /// Remove a connection. Removing an absent identity is a no-op.
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let (removed, count) = {
            let mut connections = self.connections.write();
            let removed = connections.remove(&id);
            (removed, connections.len())
        };

        if removed.is_some() {
            gauge!(names::CONNECTIONS_ACTIVE).set(count as f64);
            debug!(connection = %id, connections = count, "Unregistered");
        }
        removed
    }

    /// Point-in-time copy of the registered connections.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.read().values().cloned().collect()
    }

    /// Look up a connection.
    #[must_use]
    pub fn get(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.read().get(&id).cloned()
    }

    /// Whether a connection is registered.
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.read().contains_key(&id)
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Whether no connection is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Connection limit.
    #[must_use]
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

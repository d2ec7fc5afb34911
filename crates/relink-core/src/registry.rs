//! Bidirectional connection registry.
//!
//! Maps relay-issued (or direct-module-issued) peer ids to the local
//! connection handles exposed to the application. Two plain maps are kept in
//! lockstep; every mutation checks both sides so the mapping stays a
//! bijection.

use crate::error::RegistryError;
use std::collections::HashMap;

/// Identifier issued by the relay or the direct-connect module
pub type RemoteId = i32;

/// Handle exposed to the application
pub type ConnectionId = i32;

/// Bijective remote id ↔ local handle map
#[derive(Debug, Default, Clone)]
pub struct ConnectionRegistry {
    by_remote: HashMap<RemoteId, ConnectionId>,
    by_local: HashMap<ConnectionId, RemoteId>,
}

impl ConnectionRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pair
    ///
    /// # Errors
    ///
    /// Returns `RegistryError` if either side is already mapped; the registry
    /// is left unchanged.
    pub fn add(&mut self, remote: RemoteId, local: ConnectionId) -> Result<(), RegistryError> {
        if self.by_remote.contains_key(&remote) {
            return Err(RegistryError::RemoteInUse(remote));
        }
        if self.by_local.contains_key(&local) {
            return Err(RegistryError::LocalInUse(local));
        }
        self.by_remote.insert(remote, local);
        self.by_local.insert(local, remote);
        Ok(())
    }

    /// Local handle for a remote id
    #[must_use]
    pub fn lookup_by_remote(&self, remote: RemoteId) -> Option<ConnectionId> {
        self.by_remote.get(&remote).copied()
    }

    /// Remote id for a local handle
    #[must_use]
    pub fn lookup_by_local(&self, local: ConnectionId) -> Option<RemoteId> {
        self.by_local.get(&local).copied()
    }

    /// Remove by remote id, returning the local handle it was mapped to
    pub fn remove_by_remote(&mut self, remote: RemoteId) -> Option<ConnectionId> {
        let local = self.by_remote.remove(&remote)?;
        self.by_local.remove(&local);
        Some(local)
    }

    /// Remove by local handle, returning the remote id it was mapped to
    pub fn remove_by_local(&mut self, local: ConnectionId) -> Option<RemoteId> {
        let remote = self.by_local.remove(&local)?;
        self.by_remote.remove(&remote);
        Some(remote)
    }

    /// Every live remote id, ascending
    #[must_use]
    pub fn all_remote_ids(&self) -> Vec<RemoteId> {
        let mut ids: Vec<_> = self.by_remote.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of live pairs
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_remote.len()
    }

    /// True when no pair is live
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_remote.is_empty()
    }

    /// Drop every pair
    pub fn clear(&mut self) {
        self.by_remote.clear();
        self.by_local.clear();
    }
}

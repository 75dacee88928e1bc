//! ConnectionRegistry: the set of live connections and their display names.
//!
//! The registry is the only state shared by all reader tasks.  It is guarded
//! by a single `std::sync::Mutex` whose critical sections only mutate the
//! member list or copy it.  No I/O ever happens while the lock is held:
//! callers take a [`ConnectionRegistry::snapshot`] and write to the returned
//! links after the lock has been released, so a slow peer cannot stall
//! accepts and removals for everyone else.
//!
//! # Membership vs. names
//!
//! ```text
//!   accept ──► add()  ──►  member (no name)  ──► set_name() ──► member (named)
//!                                │                                   │
//!                                └──────────── remove() ◄────────────┘
//! ```
//!
//! A connection is counted against the capacity bound from the moment it is
//! accepted, but it only has a display name once its `USER|` line arrived.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::debug;

use crate::application::link::{ConnectionId, PeerLink};

/// Default admission bound.
pub const MAX_CLIENTS: usize = 5;

/// Error type for registry operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The registry already holds `max` connections.
    #[error("server is full ({max} connections)")]
    CapacityExceeded { max: usize },

    /// The same connection was added twice.
    #[error("connection {0} is already registered")]
    AlreadyRegistered(ConnectionId),
}

struct Member {
    link: Arc<dyn PeerLink>,
    name: Option<String>,
}

/// Tracks live connections, their display names, and enforces the capacity
/// bound.
///
/// Members are kept in admission order, which is also the order of every
/// snapshot and therefore the order in which broadcasts reach peers.
pub struct ConnectionRegistry {
    max_clients: usize,
    members: Mutex<Vec<Member>>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(MAX_CLIENTS)
    }
}

impl ConnectionRegistry {
    /// Creates an empty registry admitting at most `max_clients` connections.
    pub fn new(max_clients: usize) -> Self {
        Self {
            max_clients,
            members: Mutex::new(Vec::with_capacity(max_clients)),
        }
    }

    /// Returns the admission bound.
    pub fn max_clients(&self) -> usize {
        self.max_clients
    }

    /// Admits a connection.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::CapacityExceeded`] without side effects if the
    /// registry is full, or [`RegistryError::AlreadyRegistered`] if the link's
    /// id is already present.
    pub fn add(&self, link: Arc<dyn PeerLink>) -> Result<(), RegistryError> {
        let mut members = self.lock();
        if members.len() >= self.max_clients {
            return Err(RegistryError::CapacityExceeded {
                max: self.max_clients,
            });
        }
        let id = link.id();
        if members.iter().any(|m| m.link.id() == id) {
            return Err(RegistryError::AlreadyRegistered(id));
        }
        members.push(Member { link, name: None });
        debug!(connection = %id, count = members.len(), "connection registered");
        Ok(())
    }

    /// Removes a connection.  Idempotent.
    ///
    /// Returns the display name if one was assigned, so that exactly one
    /// caller observes the departure of a named peer.
    pub fn remove(&self, id: ConnectionId) -> Option<String> {
        let mut members = self.lock();
        let index = members.iter().position(|m| m.link.id() == id)?;
        let member = members.remove(index);
        debug!(connection = %id, count = members.len(), "connection removed");
        member.name
    }

    /// Assigns or overwrites the display name of a connection.
    ///
    /// Returns `false` if the connection is not registered.
    pub fn set_name(&self, id: ConnectionId, name: impl Into<String>) -> bool {
        let mut members = self.lock();
        match members.iter_mut().find(|m| m.link.id() == id) {
            Some(member) => {
                member.name = Some(name.into());
                true
            }
            None => false,
        }
    }

    /// Returns the display name of a connection, if it announced one.
    pub fn name_of(&self, id: ConnectionId) -> Option<String> {
        self.lock()
            .iter()
            .find(|m| m.link.id() == id)
            .and_then(|m| m.name.clone())
    }

    /// Returns a point-in-time copy of the members, in admission order,
    /// optionally leaving one connection out.
    pub fn snapshot(&self, excluding: Option<ConnectionId>) -> Vec<Arc<dyn PeerLink>> {
        self.lock()
            .iter()
            .filter(|m| Some(m.link.id()) != excluding)
            .map(|m| Arc::clone(&m.link))
            .collect()
    }

    /// Returns the display names announced so far, in admission order.
    pub fn names(&self) -> Vec<String> {
        self.lock().iter().filter_map(|m| m.name.clone()).collect()
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` when no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // Poison is ignored: every mutation is a single push, remove or assignment.
    fn lock(&self) -> MutexGuard<'_, Vec<Member>> {
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

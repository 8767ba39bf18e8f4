//! Live peer registry: one entry per registered Directory connection.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use share_core::{Announcement, FileDescriptor, ListingEntry};

/// Identity of one accepted Directory connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Process-unique id for a freshly accepted connection.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A registered peer and the catalog it advertised at CONNECT time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub username: String,
    pub hostname: String,
    pub speed: String,
    pub catalog: Vec<FileDescriptor>,
}

impl From<Announcement> for Peer {
    fn from(a: Announcement) -> Self {
        Self {
            username: a.username,
            hostname: a.hostname,
            speed: a.speed,
            catalog: a.files,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("connection is already registered; valid methods are LIST, KEYWORD")]
    AlreadyRegistered,
}

/// Registered peers in insertion order. Shared behind a single lock by the server.
#[derive(Debug, Default)]
pub struct Registry {
    peers: Vec<(ConnectionId, Peer)>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, conn: ConnectionId, peer: Peer) -> Result<(), RegistryError> {
        if self.contains(conn) {
            return Err(RegistryError::AlreadyRegistered);
        }
        self.peers.push((conn, peer));
        Ok(())
    }

    /// Drop the entry owned by `conn`, if any.
    pub fn remove(&mut self, conn: ConnectionId) -> Option<Peer> {
        let idx = self.peers.iter().position(|(c, _)| *c == conn)?;
        Some(self.peers.remove(idx).1)
    }

    pub fn contains(&self, conn: ConnectionId) -> bool {
        self.peers.iter().any(|(c, _)| *c == conn)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Every file of every peer except `requester`, in registration then catalog order.
    pub fn listing_excluding(&self, requester: ConnectionId) -> Vec<ListingEntry> {
        self.peers
            .iter()
            .filter(|(c, _)| *c != requester)
            .flat_map(|(_, peer)| {
                peer.catalog.iter().map(move |f| ListingEntry {
                    filename: f.filename.clone(),
                    hostname: peer.hostname.clone(),
                    speed: peer.speed.clone(),
                })
            })
            .collect()
    }
}

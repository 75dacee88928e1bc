//! The outbound half of one peer connection, as seen by the relay logic.
//!
//! The application layer never touches sockets.  It writes to peers through
//! the [`PeerLink`] trait, which the infrastructure implements on top of a TCP
//! write half and which tests replace with mocks.
//!
//! # Single-writer discipline (for beginners)
//!
//! Several tasks may want to write to the same peer at once: the reader task
//! of every other peer (relaying chat and files) and the server operator.  If
//! two of them interleaved partial writes, the peer would receive a corrupted
//! byte stream.  Every implementation therefore guarantees:
//!
//! - [`PeerLink::send`] writes one complete frame before any other write to
//!   the same link may start.
//! - [`PeerLink::reserve`] hands out a [`LinkWriter`] that holds the link
//!   exclusively until it is dropped.  A file header and its payload are
//!   written through such a reservation, so no chat line can end up inside
//!   the payload.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use uuid::Uuid;

/// Identifies one accepted connection for its whole lifetime.
pub type ConnectionId = Uuid;

/// Write access to one connected peer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Returns the connection's identifier.
    fn id(&self) -> ConnectionId;

    /// Returns the remote address of the connection.
    fn peer_addr(&self) -> SocketAddr;

    /// Writes one complete frame.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the link is closed or the write fails.
    async fn send(&self, frame: &[u8]) -> io::Result<()>;

    /// Waits for exclusive write access to the link.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the link is already closed.
    async fn reserve(&self) -> io::Result<Box<dyn LinkWriter>>;

    /// Closes the link and wakes its reader task.  Idempotent.
    fn close(&self);
}

/// Exclusive write access to a [`PeerLink`], released on drop.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LinkWriter: Send {
    /// Writes `bytes` while the reservation is held.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the link closed or the write failed.
    async fn write(&mut self, bytes: &[u8]) -> io::Result<()>;
}

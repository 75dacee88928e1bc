//! PeerConnection: the socket-backed [`PeerLink`] of one accepted connection.
//!
//! The write half lives behind a `tokio::sync::Mutex`.  [`PeerLink::send`]
//! holds the lock for one `write_all` + `flush`; [`PeerLink::reserve`] hands
//! out the owned guard itself, so a file header and its whole payload go out
//! without anything else in between.
//!
//! Every connection carries a child of the server's [`CancellationToken`].
//! Cancelling it (directly through [`PeerLink::close`] or by shutting the
//! server down) wakes the reader task and makes every pending or future write
//! fail fast, so a peer that stopped reading cannot hold a writer forever.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::application::link::{ConnectionId, LinkWriter, PeerLink};

/// The write side of one connected peer.
pub struct PeerConnection<W = OwnedWriteHalf> {
    id: ConnectionId,
    peer_addr: SocketAddr,
    writer: Arc<Mutex<Option<W>>>,
    cancel: CancellationToken,
}

impl<W> PeerConnection<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Wraps `writer` under a fresh connection id.
    pub fn new(peer_addr: SocketAddr, writer: W, cancel: CancellationToken) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer_addr,
            writer: Arc::new(Mutex::new(Some(writer))),
            cancel,
        }
    }

    /// Token cancelled when this connection is closed.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[async_trait]
impl<W> PeerLink for PeerConnection<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    async fn send(&self, frame: &[u8]) -> io::Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or_else(closed)?;
        write_cancellable(writer, frame, &self.cancel).await
    }

    async fn reserve(&self) -> io::Result<Box<dyn LinkWriter>> {
        let guard = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(closed()),
            guard = Arc::clone(&self.writer).lock_owned() => guard,
        };
        if guard.is_none() {
            return Err(closed());
        }
        Ok(Box::new(ReservedWriter {
            guard,
            cancel: self.cancel.clone(),
        }))
    }

    fn close(&self) {
        self.cancel.cancel();
        // Dropping the write half shuts it down.  A writer busy elsewhere
        // sees the cancellation and the half is dropped with the connection.
        if let Ok(mut guard) = self.writer.try_lock() {
            guard.take();
        }
    }
}

struct ReservedWriter<W> {
    guard: OwnedMutexGuard<Option<W>>,
    cancel: CancellationToken,
}

#[async_trait]
impl<W> LinkWriter for ReservedWriter<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let writer = self.guard.as_mut().ok_or_else(closed)?;
        write_cancellable(writer, bytes, &self.cancel).await
    }
}

async fn write_cancellable<W>(writer: &mut W, bytes: &[u8], cancel: &CancellationToken) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(closed()),
        result = async {
            writer.write_all(bytes).await?;
            writer.flush().await
        } => result,
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "connection closed")
}

// ── Tests ─────────────────────────────────────────────────────────────────────

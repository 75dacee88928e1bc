//! RelayServer: TCP accept loop and per-connection reader tasks.
//!
//! # Task layout
//!
//! ```text
//! RelayServer::run()                      (accept loop)
//!  ├─ registry.add(conn)  ── full? ──►  close + PeerRejected
//!  └─ JoinSet::spawn(read_connection)     (one per admitted peer)
//!        loop { read → FrameDecoder::feed → InboundRelay::handle }
//!        InboundRelay::close()            (always runs on exit)
//! ```
//!
//! Shutdown is a single [`CancellationToken`].  Every connection holds a
//! child token, so cancelling the server token stops the accept loop, makes
//! every pending read return, aborts open transfers, and the accept loop then
//! joins every reader task before `run` returns.

use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use relay_core::{
    encode_chat, encode_file_header, FrameDecoder, ProtocolError, RelayErrorKind, RelayEvent,
    TransferSink,
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::broadcast::{BroadcastReport, RelayBroadcaster};
use crate::application::link::{ConnectionId, PeerLink};
use crate::application::registry::ConnectionRegistry;
use crate::application::relay_inbound::{InboundRelay, RelaySink};
use crate::infrastructure::network::connection::PeerConnection;
use crate::infrastructure::storage::config::ServerSettings;

/// Size of the per-connection read buffer.
pub const READ_BUFFER_SIZE: usize = 32 * 1024;

/// Size of the chunks an operator file is sent in.
pub const FILE_CHUNK_SIZE: usize = 32 * 1024;

/// Capacity of the UI event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 128;

/// Display name under which the server operator chats and shares files.
pub const OPERATOR_NAME: &str = "Server";

const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Error type for the relay server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("bind failed on {addr}: {source}")]
    BindFailed {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("cannot read '{path}': {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("'{0}' does not name a file")]
    NoFileName(PathBuf),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// The relay server before and while it runs.
pub struct RelayServer {
    listener: TcpListener,
    broadcaster: Arc<RelayBroadcaster>,
    shutdown: CancellationToken,
}

impl RelayServer {
    /// Binds the listener and returns the server with its UI event stream.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::BindFailed`] if the address cannot be bound.
    pub async fn bind(
        settings: &ServerSettings,
    ) -> Result<(Self, mpsc::Receiver<RelayEvent>), ServerError> {
        let listener = TcpListener::bind((settings.bind_address.as_str(), settings.port))
            .await
            .map_err(|source| ServerError::BindFailed {
                addr: format!("{}:{}", settings.bind_address, settings.port),
                source,
            })?;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let registry = Arc::new(ConnectionRegistry::new(settings.max_clients));
        let server = Self {
            listener,
            broadcaster: Arc::new(RelayBroadcaster::new(registry, tx)),
            shutdown: CancellationToken::new(),
        };

        info!(
            address = %server.local_addr()?,
            max_clients = settings.max_clients,
            "relay server listening"
        );
        Ok((server, rx))
    }

    /// Returns the bound address (useful when binding port `0`).
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Returns a handle for the operator and for shutdown.
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            broadcaster: Arc::clone(&self.broadcaster),
            shutdown: self.shutdown.clone(),
        }
    }

    /// Runs the accept loop until [`ServerHandle::shutdown`] is called, then
    /// waits for every connection task to finish.
    pub async fn run(self) {
        let mut readers = JoinSet::new();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => self.admit(stream, addr, &mut readers).await,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    }
                },
                Some(joined) = readers.join_next() => log_reader_exit(joined),
            }
        }

        drop(self.listener);
        info!(connections = readers.len(), "relay server shutting down");
        while let Some(joined) = readers.join_next().await {
            log_reader_exit(joined);
        }
        info!("relay server stopped");
    }

    async fn admit(&self, stream: TcpStream, addr: SocketAddr, readers: &mut JoinSet<()>) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %addr, error = %e, "could not disable Nagle");
        }
        let (read_half, write_half) = stream.into_split();
        let connection = PeerConnection::new(addr, write_half, self.shutdown.child_token());
        let cancel = connection.cancellation().clone();
        let link: Arc<dyn PeerLink> = Arc::new(connection);

        let registry = self.broadcaster.registry();
        match registry.add(Arc::clone(&link)) {
            Ok(()) => {
                info!(peer = %addr, connections = registry.len(), "peer connected");
                let registration = Registration {
                    registry: Arc::clone(registry),
                    id: link.id(),
                };
                let relay = InboundRelay::new(link, Arc::clone(&self.broadcaster));
                readers.spawn(read_connection(
                    read_half,
                    relay,
                    Arc::clone(&self.broadcaster),
                    registration,
                    cancel,
                ));
            }
            Err(e) => {
                warn!(peer = %addr, error = %e, "connection rejected");
                link.close();
                self.broadcaster
                    .emit(RelayEvent::PeerRejected {
                        address: addr.to_string(),
                    })
                    .await;
            }
        }
    }
}

/// Removes the connection from the registry when the reader task ends,
/// even if it ends by panicking.
struct Registration {
    registry: Arc<ConnectionRegistry>,
    id: ConnectionId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}

enum ReadOutcome {
    Closed,
    Cancelled,
    Failed(io::Error),
}

async fn read_connection<R>(
    mut reader: R,
    mut relay: InboundRelay,
    broadcaster: Arc<RelayBroadcaster>,
    registration: Registration,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    let outcome = loop {
        let n = tokio::select! {
            _ = cancel.cancelled() => break ReadOutcome::Cancelled,
            read = reader.read(&mut buf) => match read {
                Ok(0) => break ReadOutcome::Closed,
                Ok(n) => n,
                Err(e) => break ReadOutcome::Failed(e),
            },
        };
        for frame in decoder.feed(&buf[..n]) {
            relay.handle(frame).await;
        }
    };

    match outcome {
        ReadOutcome::Closed => debug!(connection = %registration.id, "peer closed the stream"),
        ReadOutcome::Cancelled => debug!(connection = %registration.id, "connection cancelled"),
        ReadOutcome::Failed(e) => {
            warn!(connection = %registration.id, error = %e, "read failed");
            broadcaster
                .emit(RelayEvent::error(
                    RelayErrorKind::Io,
                    format!("read failed: {e}"),
                ))
                .await;
        }
    }

    relay.close().await;
    drop(registration);
}

fn log_reader_exit(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "connection task failed");
    }
}

/// Operator-side surface of a running server.
#[derive(Clone)]
pub struct ServerHandle {
    broadcaster: Arc<RelayBroadcaster>,
    shutdown: CancellationToken,
}

impl ServerHandle {
    /// Sends `MSG|Server: <text>` to every connected peer.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Protocol`] if the text is empty or spans lines.
    pub async fn send_text(&self, text: &str) -> Result<BroadcastReport, ServerError> {
        let line = encode_chat(OPERATOR_NAME, text)?;
        Ok(self.broadcaster.broadcast(&line, None).await)
    }

    /// Sends a file to every connected peer, returning how many received it
    /// completely.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::NoFileName`], [`ServerError::FileRead`], or
    /// [`ServerError::Protocol`].  If reading fails after the header went out
    /// the recipients' payload is padded to the declared size first.
    pub async fn send_file(&self, path: &Path) -> Result<usize, ServerError> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| ServerError::NoFileName(path.to_path_buf()))?;
        let read_error = |source: io::Error| ServerError::FileRead {
            path: path.to_path_buf(),
            source,
        };

        let mut file = tokio::fs::File::open(path).await.map_err(read_error)?;
        let size = file.metadata().await.map_err(read_error)?.len();
        let header = encode_file_header(file_name, size, Some(OPERATOR_NAME))?;

        let fanout = self.broadcaster.open_fanout(&header, None).await;
        info!(file = %file_name, size, recipients = fanout.len(), "sending file");
        let mut sink = RelaySink::new(fanout, size);

        let mut buf = vec![0u8; FILE_CHUNK_SIZE];
        let mut sent = 0u64;
        while sent < size {
            let n = match file.read(&mut buf).await {
                Ok(0) => {
                    sink.abort().await;
                    return Err(read_error(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "file shrank while sending",
                    )));
                }
                Ok(n) => n.min(usize::try_from(size - sent).unwrap_or(usize::MAX)),
                Err(e) => {
                    sink.abort().await;
                    return Err(read_error(e));
                }
            };
            sink.write_chunk(&buf[..n]).await?;
            sent += n as u64;
        }
        Ok(sink.finish().await?)
    }

    /// Display names of the peers that have announced themselves.
    pub fn peers(&self) -> Vec<String> {
        self.broadcaster.registry().names()
    }

    /// Number of live connections, named or not.
    pub fn connection_count(&self) -> usize {
        self.broadcaster.registry().len()
    }

    /// Stops the accept loop and closes every connection.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Completes once shutdown has been requested.
    pub async fn stopped(&self) {
        self.shutdown.cancelled().await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! PeerSession: one peer's TCP connection to the relay server.
//!
//! # Task layout
//!
//! ```text
//! PeerSession::connect()
//!  ├─ write USER|<name>
//!  └─ spawn read_session               (one tracked task per session)
//!        loop { read → FrameDecoder::feed → InboundHandler::handle }
//!        InboundHandler::close()        (aborts a half-received file)
//!        Notice "disconnected from server"
//! ```
//!
//! # Single writer
//!
//! The write half sits behind a `tokio::sync::Mutex`.  `send_text` holds it
//! for one line; `send_file` holds it from the header to the last payload
//! byte, so a chat line typed during an upload waits instead of landing in
//! the middle of the file.
//!
//! # Session lifetime
//!
//! A single [`CancellationToken`] marks the end of the session.  The reader
//! task cancels it when the server goes away, and [`PeerSession::shutdown`]
//! cancels it to stop the reader.  Writes select on it, so nothing waits on a
//! dead connection.

use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use relay_core::{
    encode_chat, encode_file_header, encode_user, validate_display_name, FrameDecoder,
    ProtocolError, RelayErrorKind, RelayEvent,
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::inbound::InboundHandler;
use crate::infrastructure::storage::config::PeerSettings;
use crate::infrastructure::storage::received_files::ReceivedFileStore;

/// Size of the read buffer of the session's reader task.
pub const READ_BUFFER_SIZE: usize = 32 * 1024;

/// Size of the chunks a file is sent in.
pub const FILE_CHUNK_SIZE: usize = 32 * 1024;

/// Capacity of the UI event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 128;

/// Text of the notice emitted when the server closes the connection.
pub const DISCONNECTED_NOTICE: &str = "disconnected from server";

/// Errors returned by [`PeerSession`].
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid display name: {0}")]
    InvalidName(#[source] ProtocolError),

    #[error("failed to connect to {addr}: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("cannot use download directory {path}: {source}")]
    DownloadDir {
        path: PathBuf,
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

    #[error("not connected to the server")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A connected peer.
pub struct PeerSession {
    display_name: String,
    server_addr: SocketAddr,
    writer: Mutex<Option<OwnedWriteHalf>>,
    cancel: CancellationToken,
    reader: JoinHandle<()>,
}

impl PeerSession {
    /// Connects to `address`, announces `display_name`, and starts reading.
    ///
    /// Returns the session and the stream of [`RelayEvent`]s it raises.  The
    /// stream ends after the session does.
    ///
    /// # Errors
    ///
    /// - [`SessionError::InvalidName`] before anything touches the network.
    /// - [`SessionError::DownloadDir`] if the download directory is unusable.
    /// - [`SessionError::ConnectFailed`] if the server cannot be reached.
    /// - [`SessionError::Io`] / [`SessionError::Closed`] if the announcement
    ///   cannot be written.
    pub async fn connect(
        address: &str,
        display_name: &str,
        settings: &PeerSettings,
    ) -> Result<(Self, mpsc::Receiver<RelayEvent>), SessionError> {
        validate_display_name(display_name).map_err(SessionError::InvalidName)?;

        let download_dir = settings.download_dir();
        let store = ReceivedFileStore::open(&download_dir).map_err(|source| {
            SessionError::DownloadDir {
                path: download_dir.clone(),
                source,
            }
        })?;

        let stream = TcpStream::connect(address)
            .await
            .map_err(|source| SessionError::ConnectFailed {
                addr: address.to_string(),
                source,
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "could not disable Nagle");
        }
        let server_addr = stream.peer_addr()?;
        let (read_half, mut write_half) = stream.into_split();

        let cancel = CancellationToken::new();
        write_cancellable(&mut write_half, &encode_user(display_name)?, &cancel).await?;
        info!(server = %server_addr, name = %display_name, downloads = %download_dir.display(), "connected");

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let handler = InboundHandler::new(store, tx.clone());
        let reader = tokio::spawn(read_session(read_half, handler, tx, cancel.clone()));

        let session = Self {
            display_name: display_name.to_string(),
            server_addr,
            writer: Mutex::new(Some(write_half)),
            cancel,
            reader,
        };
        Ok((session, rx))
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    /// Returns `false` once the server closed the connection or
    /// [`shutdown`](Self::shutdown) began.
    pub fn is_connected(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Completes when the session has ended.
    pub async fn disconnected(&self) {
        self.cancel.cancelled().await;
    }

    /// Sends `MSG|<name>: <text>`.
    ///
    /// # Errors
    ///
    /// [`SessionError::Protocol`] for empty or multi-line text,
    /// [`SessionError::Closed`] after the session ended, [`SessionError::Io`]
    /// if the write fails.
    pub async fn send_text(&self, text: &str) -> Result<(), SessionError> {
        let line = encode_chat(&self.display_name, text)?;
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(SessionError::Closed)?;
        write_cancellable(writer, &line, &self.cancel).await
    }

    /// Sends `FILE|<name>|<size>` followed by the file content, returning the
    /// number of bytes sent.
    ///
    /// If the file cannot be read to the end after the header went out, the
    /// missing bytes are sent as zeros so the stream stays framed, and the
    /// read error is returned.
    ///
    /// # Errors
    ///
    /// [`SessionError::NoFileName`], [`SessionError::FileRead`],
    /// [`SessionError::Protocol`] for names the header cannot carry, plus the
    /// write errors of [`send_text`](Self::send_text).
    pub async fn send_file(&self, path: &Path) -> Result<u64, SessionError> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| SessionError::NoFileName(path.to_path_buf()))?;
        let read_error = |source: io::Error| SessionError::FileRead {
            path: path.to_path_buf(),
            source,
        };

        let mut file = tokio::fs::File::open(path).await.map_err(read_error)?;
        let size = file.metadata().await.map_err(read_error)?.len();
        let header = encode_file_header(file_name, size, None)?;

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(SessionError::Closed)?;
        write_cancellable(writer, &header, &self.cancel).await?;
        info!(file = %file_name, size, "sending file");

        let mut buf = vec![0u8; FILE_CHUNK_SIZE];
        let mut sent = 0u64;
        while sent < size {
            let remaining = size - sent;
            let read = match file.read(&mut buf).await {
                Ok(0) => Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "file shrank while sending",
                )),
                Ok(n) => Ok(usize::try_from(remaining).map_or(n, |r| n.min(r))),
                Err(e) => Err(e),
            };
            let n = match read {
                Ok(n) => n,
                Err(e) => {
                    warn!(file = %file_name, sent, size, error = %e, "read failed mid-file; padding");
                    write_padding(writer, remaining, &self.cancel).await?;
                    return Err(read_error(e));
                }
            };
            write_cancellable(writer, &buf[..n], &self.cancel).await?;
            sent += n as u64;
        }

        debug!(file = %file_name, size, "file sent");
        Ok(size)
    }

    /// Stops the reader, closes the connection and waits for the reader
    /// task to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                debug!(error = %e, "write half shutdown failed");
            }
        }
        if let Err(e) = self.reader.await {
            warn!(error = %e, "session reader task failed");
        }
        info!(server = %self.server_addr, "session closed");
    }
}

enum ReadOutcome {
    Closed,
    Cancelled,
    Failed(io::Error),
}

async fn read_session<R>(
    mut reader: R,
    mut handler: InboundHandler<ReceivedFileStore>,
    events: mpsc::Sender<RelayEvent>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    // The session ends with this task, however it exits.
    let _session_end = cancel.clone().drop_guard();

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
            handler.handle(frame).await;
        }
    };

    handler.close().await;

    let lost = match outcome {
        ReadOutcome::Cancelled => {
            debug!("session reader stopped");
            false
        }
        ReadOutcome::Closed => {
            info!("server closed the connection");
            true
        }
        ReadOutcome::Failed(e) => {
            warn!(error = %e, "read failed");
            let _ = events
                .send(RelayEvent::error(RelayErrorKind::Io, format!("read failed: {e}")))
                .await;
            true
        }
    };
    if lost {
        let _ = events
            .send(RelayEvent::Notice {
                text: DISCONNECTED_NOTICE.to_string(),
            })
            .await;
    }
}

async fn write_cancellable<W>(
    writer: &mut W,
    bytes: &[u8],
    cancel: &CancellationToken,
) -> Result<(), SessionError>
where
    W: AsyncWrite + Unpin,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SessionError::Closed),
        result = async {
            writer.write_all(bytes).await?;
            writer.flush().await
        } => result.map_err(SessionError::from),
    }
}

async fn write_padding<W>(
    writer: &mut W,
    missing: u64,
    cancel: &CancellationToken,
) -> Result<(), SessionError>
where
    W: AsyncWrite + Unpin,
{
    let zeros = vec![0u8; FILE_CHUNK_SIZE];
    let mut left = missing;
    while left > 0 {
        let take = usize::try_from(left).map_or(FILE_CHUNK_SIZE, |l| l.min(FILE_CHUNK_SIZE));
        write_cancellable(writer, &zeros[..take], cancel).await?;
        left -= take as u64;
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

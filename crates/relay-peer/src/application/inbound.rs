//! InboundHandler: what the peer does with each frame the server relays.
//!
//! The peer mirrors the server's per-connection reader but never re-sends
//! anything; every frame ends up as a [`RelayEvent`] for the UI.
//!
//! ```text
//!   UserAnnounce  → PeerJoined
//!   ChatMessage   → MessageReceived
//!   FileHeader    → DownloadStore::create, transfer begins
//!   BinaryChunk   → written to the download, FileReceived after the last byte
//!   Unknown       → Notice (server notices such as "Alice left." arrive this way)
//! ```
//!
//! A payload whose file cannot be created is still read to the end through a
//! [`Download::Skipped`] sink, so the decoder stays aligned with the stream.

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use relay_core::{
    Frame, RelayErrorKind, RelayEvent, TransferError, TransferProgress, TransferSink,
    TransferStateMachine,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Sender name used when a file header carries none.
pub const UNKNOWN_SENDER: &str = "Unknown";

/// Creates the destination of every incoming file.
#[async_trait]
pub trait DownloadStore: Send + Sync {
    /// Sink one payload is written into; finishing it yields the stored path.
    type Sink: TransferSink<Output = PathBuf>;

    /// Opens a new destination for `file_name` sent by `sender_name`.
    async fn create(&self, file_name: &str, sender_name: &str) -> io::Result<Self::Sink>;
}

/// Destination of one inbound payload.
pub enum Download<S> {
    Stored(S),
    /// The file could not be created; the payload is read and dropped.
    Skipped,
}

#[async_trait]
impl<S> TransferSink for Download<S>
where
    S: TransferSink<Output = PathBuf>,
{
    type Output = Option<PathBuf>;

    async fn write_chunk(&mut self, bytes: &[u8]) -> io::Result<()> {
        match self {
            Download::Stored(sink) => sink.write_chunk(bytes).await,
            Download::Skipped => Ok(()),
        }
    }

    async fn finish(&mut self) -> io::Result<Option<PathBuf>> {
        match self {
            Download::Stored(sink) => sink.finish().await.map(Some),
            Download::Skipped => Ok(None),
        }
    }

    async fn abort(&mut self) {
        if let Download::Stored(sink) = self {
            sink.abort().await;
        }
    }
}

/// Applies the peer-side rules to every frame read from the server.
pub struct InboundHandler<D: DownloadStore> {
    store: D,
    transfer: TransferStateMachine<Download<D::Sink>>,
    events: mpsc::Sender<RelayEvent>,
}

impl<D: DownloadStore> InboundHandler<D> {
    pub fn new(store: D, events: mpsc::Sender<RelayEvent>) -> Self {
        Self {
            store,
            transfer: TransferStateMachine::new(),
            events,
        }
    }

    /// Returns `true` while no file payload is expected.
    pub fn is_idle(&self) -> bool {
        self.transfer.is_idle()
    }

    /// Handles one decoded frame.
    pub async fn handle(&mut self, frame: Frame) {
        match frame {
            Frame::UserAnnounce { name } => {
                info!(name = %name, "peer joined");
                self.emit(RelayEvent::PeerJoined { name }).await;
            }
            Frame::ChatMessage { sender_name, text } => {
                debug!(sender = %sender_name, "chat received");
                self.emit(RelayEvent::MessageReceived { sender_name, text })
                    .await;
            }
            Frame::FileHeader {
                file_name,
                size,
                sender_name,
            } => self.on_file_header(file_name, size, sender_name).await,
            Frame::BinaryChunk { bytes } => {
                let result = self.transfer.consume(&bytes).await;
                self.on_transfer_result(result).await;
            }
            Frame::Unknown { raw } => self.emit(RelayEvent::Notice { text: raw }).await,
        }
    }

    /// Ends the session: a file still being received is aborted and its
    /// partial download discarded.
    pub async fn close(mut self) {
        if let Some(aborted) = self.transfer.abort().await {
            warn!(transfer = %aborted, "connection closed mid-transfer");
            self.emit(RelayEvent::error(
                RelayErrorKind::TransferAborted,
                aborted.to_string(),
            ))
            .await;
        }
    }

    async fn on_file_header(&mut self, file_name: String, size: u64, sender_name: Option<String>) {
        let sender_name = sender_name.unwrap_or_else(|| UNKNOWN_SENDER.to_string());

        let sink = if !self.transfer.is_idle() {
            Download::Skipped
        } else {
            match self.store.create(&file_name, &sender_name).await {
                Ok(sink) => Download::Stored(sink),
                Err(e) => {
                    warn!(file = %file_name, error = %e, "cannot create download; skipping payload");
                    self.emit(RelayEvent::error(
                        RelayErrorKind::TransferFailed,
                        format!("cannot store '{file_name}' from {sender_name}: {e}"),
                    ))
                    .await;
                    Download::Skipped
                }
            }
        };

        info!(file = %file_name, size, sender = %sender_name, "receiving file");
        let result = self.transfer.begin(file_name, sender_name, size, sink).await;
        self.on_transfer_result(result).await;
    }

    async fn on_transfer_result(
        &mut self,
        result: Result<TransferProgress<Option<PathBuf>>, TransferError>,
    ) {
        match result {
            Ok(TransferProgress::Completed(done)) => {
                let Some(local_path) = done.output else {
                    return;
                };
                info!(file = %done.file_name, size = done.size, path = %local_path.display(), "file received");
                self.emit(RelayEvent::FileReceived {
                    sender_name: done.sender_name,
                    file_name: done.file_name,
                    local_path,
                })
                .await;
            }
            Ok(TransferProgress::InProgress { .. } | TransferProgress::Discarded { .. }) => {}
            Err(e) => {
                let kind = match e {
                    TransferError::SinkFailed { .. } => RelayErrorKind::TransferFailed,
                    _ => RelayErrorKind::Protocol,
                };
                warn!(error = %e, "transfer error");
                self.emit(RelayEvent::error(kind, e.to_string())).await;
            }
        }
    }

    async fn emit(&self, event: RelayEvent) {
        if self.events.send(event).await.is_err() {
            debug!("event receiver dropped");
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

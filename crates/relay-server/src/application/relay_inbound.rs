//! InboundRelay: what the server does with each frame one peer sends.
//!
//! One `InboundRelay` exists per accepted connection and is owned by that
//! connection's reader task, together with the connection's
//! [`TransferStateMachine`].  The reader decodes frames and hands them here;
//! this module decides what to report to the UI and what to relay.
//!
//! ```text
//!   UserAnnounce  → name assigned,  PeerJoined,       relay USER|<name>
//!   ChatMessage   → name looked up, MessageReceived,  relay MSG|<name>: <text>
//!   FileHeader    → name looked up, targets reserved, relay FILE|<file>|<size>|<sender>
//!   BinaryChunk   → forwarded to the header's targets, FileRelayed after the last one
//!   Unknown       → Notice, not relayed
//! ```
//!
//! The server stores nothing: a file is forwarded chunk by chunk through a
//! [`RelaySink`] and never touches the disk.

use std::io;
use std::sync::Arc;

use async_trait::async_trait;
use relay_core::{
    encode_chat, encode_file_header, encode_notice, encode_user, Frame, RelayErrorKind,
    RelayEvent, TransferError, TransferProgress, TransferSink, TransferStateMachine,
};
use tracing::{debug, info, warn};

use crate::application::broadcast::{Fanout, RelayBroadcaster};
use crate::application::link::PeerLink;

/// Sender name used when neither the registry nor the header supplies one.
pub const UNKNOWN_SENDER: &str = "Unknown";

/// Largest shortfall an interrupted relayed payload is padded over.
///
/// Recipients of a cut-short file still expect the declared number of bytes.
/// Up to this many missing bytes are filled with zeros so that their streams
/// stay framed; beyond it the recipients are disconnected instead.
pub const MAX_PADDING: u64 = 16 * 1024 * 1024;

const PADDING_CHUNK: usize = 32 * 1024;

/// Forwards one file payload to the targets reserved when its header arrived.
///
/// Writes never fail: a target that cannot keep up is closed and dropped by
/// the [`Fanout`], and the transfer continues for the others.  The output is
/// the number of recipients that received the whole file.
pub struct RelaySink {
    fanout: Option<Fanout>,
    declared_size: u64,
    forwarded: u64,
}

impl RelaySink {
    pub fn new(fanout: Fanout, declared_size: u64) -> Self {
        Self {
            fanout: Some(fanout),
            declared_size,
            forwarded: 0,
        }
    }
}

#[async_trait]
impl TransferSink for RelaySink {
    type Output = usize;

    async fn write_chunk(&mut self, bytes: &[u8]) -> io::Result<()> {
        if let Some(fanout) = self.fanout.as_mut() {
            fanout.forward(bytes).await;
        }
        self.forwarded += bytes.len() as u64;
        Ok(())
    }

    async fn finish(&mut self) -> io::Result<usize> {
        Ok(self.fanout.take().map_or(0, |fanout| fanout.len()))
    }

    async fn abort(&mut self) {
        let Some(mut fanout) = self.fanout.take() else {
            return;
        };
        let missing = self.declared_size.saturating_sub(self.forwarded);
        if missing > MAX_PADDING {
            warn!(missing, "interrupted payload too large to pad; closing recipients");
            fanout.close_all();
            return;
        }

        debug!(missing, recipients = fanout.len(), "padding interrupted payload");
        let zeros = vec![0u8; PADDING_CHUNK];
        let mut left = missing;
        while left > 0 && !fanout.is_empty() {
            let take = usize::try_from(left).map_or(PADDING_CHUNK, |l| l.min(PADDING_CHUNK));
            fanout.forward(&zeros[..take]).await;
            left -= take as u64;
        }
    }
}

/// Applies the relay rules to every frame received from one connection.
pub struct InboundRelay {
    origin: Arc<dyn PeerLink>,
    broadcaster: Arc<RelayBroadcaster>,
    transfer: TransferStateMachine<RelaySink>,
}

impl InboundRelay {
    pub fn new(origin: Arc<dyn PeerLink>, broadcaster: Arc<RelayBroadcaster>) -> Self {
        Self {
            origin,
            broadcaster,
            transfer: TransferStateMachine::new(),
        }
    }

    /// Returns `true` while no file payload is expected from this connection.
    pub fn is_idle(&self) -> bool {
        self.transfer.is_idle()
    }

    /// Handles one decoded frame.
    pub async fn handle(&mut self, frame: Frame) {
        match frame {
            Frame::UserAnnounce { name } => self.on_user(name).await,
            Frame::ChatMessage { sender_name, text } => self.on_chat(sender_name, text).await,
            Frame::FileHeader {
                file_name,
                size,
                sender_name,
            } => self.on_file_header(file_name, size, sender_name).await,
            Frame::BinaryChunk { bytes } => {
                let result = self.transfer.consume(&bytes).await;
                self.on_transfer_result(result).await;
            }
            Frame::Unknown { raw } => {
                debug!(peer = %self.origin.peer_addr(), "unrecognised line");
                self.broadcaster.emit(RelayEvent::Notice { text: raw }).await;
            }
        }
    }

    /// Tears the connection down: aborts any open transfer, removes the
    /// connection from the registry and announces the departure.
    pub async fn close(mut self) {
        let id = self.origin.id();
        if let Some(aborted) = self.transfer.abort().await {
            warn!(peer = %self.origin.peer_addr(), transfer = %aborted, "connection closed mid-transfer");
            let notice = format!(
                "Transfer of {} from {} was interrupted.",
                aborted.file_name, aborted.sender_name
            );
            self.broadcaster
                .emit(RelayEvent::error(
                    RelayErrorKind::TransferAborted,
                    aborted.to_string(),
                ))
                .await;
            if let Ok(line) = encode_notice(&notice) {
                self.broadcaster.broadcast(&line, Some(id)).await;
            }
        }

        if let Some(name) = self.broadcaster.depart(id).await {
            info!(peer = %self.origin.peer_addr(), name = %name, "peer left");
        }
        self.origin.close();
    }

    async fn on_user(&mut self, name: String) {
        let id = self.origin.id();
        let line = match encode_user(&name) {
            Ok(line) => line,
            Err(e) => {
                warn!(peer = %self.origin.peer_addr(), error = %e, "display name rejected");
                self.broadcaster
                    .emit(RelayEvent::error(
                        RelayErrorKind::Protocol,
                        format!("display name '{name}' rejected: {e}"),
                    ))
                    .await;
                return;
            }
        };

        self.broadcaster.registry().set_name(id, name.clone());
        info!(peer = %self.origin.peer_addr(), name = %name, "peer joined");
        self.broadcaster.emit(RelayEvent::PeerJoined { name }).await;
        self.broadcaster.broadcast(&line, Some(id)).await;
    }

    async fn on_chat(&mut self, claimed_sender: String, text: String) {
        let id = self.origin.id();
        let sender_name = self
            .broadcaster
            .registry()
            .name_of(id)
            .unwrap_or(claimed_sender);

        let line = encode_chat(&sender_name, &text);
        self.broadcaster
            .emit(RelayEvent::MessageReceived {
                sender_name: sender_name.clone(),
                text,
            })
            .await;

        match line {
            Ok(line) => {
                let report = self.broadcaster.broadcast(&line, Some(id)).await;
                debug!(sender = %sender_name, delivered = report.delivered, "chat relayed");
            }
            Err(e) => {
                self.broadcaster
                    .emit(RelayEvent::error(
                        RelayErrorKind::Protocol,
                        format!("chat from {sender_name} not relayed: {e}"),
                    ))
                    .await
            }
        }
    }

    async fn on_file_header(&mut self, file_name: String, size: u64, header_sender: Option<String>) {
        let id = self.origin.id();
        let sender_name = self
            .broadcaster
            .registry()
            .name_of(id)
            .or(header_sender)
            .unwrap_or_else(|| UNKNOWN_SENDER.to_string());

        // The payload must be consumed even when the header cannot be relayed.
        let fanout = match encode_file_header(&file_name, size, Some(&sender_name)) {
            Ok(header) if self.transfer.is_idle() => {
                self.broadcaster.open_fanout(&header, Some(id)).await
            }
            Ok(_) => Fanout::empty(),
            Err(e) => {
                self.broadcaster
                    .emit(RelayEvent::error(
                        RelayErrorKind::Protocol,
                        format!("file '{file_name}' from {sender_name} not relayed: {e}"),
                    ))
                    .await;
                Fanout::empty()
            }
        };

        info!(
            peer = %self.origin.peer_addr(),
            file = %file_name,
            size,
            recipients = fanout.len(),
            "relaying file"
        );
        let result = self
            .transfer
            .begin(file_name, sender_name, size, RelaySink::new(fanout, size))
            .await;
        self.on_transfer_result(result).await;
    }

    async fn on_transfer_result(
        &mut self,
        result: Result<TransferProgress<usize>, TransferError>,
    ) {
        match result {
            Ok(TransferProgress::Completed(done)) => {
                info!(file = %done.file_name, size = done.size, recipients = done.output, "file relayed");
                self.broadcaster
                    .emit(RelayEvent::FileRelayed {
                        sender_name: done.sender_name,
                        file_name: done.file_name,
                        size: done.size,
                        recipients: done.output,
                    })
                    .await;
            }
            Ok(TransferProgress::InProgress { .. } | TransferProgress::Discarded { .. }) => {}
            Err(e) => {
                let kind = match e {
                    TransferError::SinkFailed { .. } => RelayErrorKind::TransferFailed,
                    _ => RelayErrorKind::Protocol,
                };
                warn!(peer = %self.origin.peer_addr(), error = %e, "transfer error");
                self.broadcaster
                    .emit(RelayEvent::error(kind, e.to_string()))
                    .await;
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::link::{ConnectionId, LinkWriter, MockLinkWriter, MockPeerLink};
    use crate::application::registry::ConnectionRegistry;
    use std::sync::Mutex;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    type Wire = Arc<Mutex<Vec<u8>>>;

    /// A link whose frames and reserved writes all land in one byte buffer.
    fn wire_link(id: ConnectionId, wire: Wire) -> MockPeerLink {
        let mut link = MockPeerLink::new();
        link.expect_id().return_const(id);
        link.expect_peer_addr()
            .return_const("127.0.0.1:40000".parse::<std::net::SocketAddr>().unwrap());
        link.expect_close().return_const(());
        let sent = Arc::clone(&wire);
        link.expect_send().returning(move |frame| {
            sent.lock().unwrap().extend_from_slice(frame);
            Ok(())
        });
        link.expect_reserve().returning(move || {
            let wire = Arc::clone(&wire);
            let mut writer = MockLinkWriter::new();
            writer.expect_write().returning(move |bytes| {
                wire.lock().unwrap().extend_from_slice(bytes);
                Ok(())
            });
            Ok(Box::new(writer) as Box<dyn LinkWriter>)
        });
        link
    }

    struct Fixture {
        relay: InboundRelay,
        origin_id: ConnectionId,
        origin_wire: Wire,
        other_wire: Wire,
        registry: Arc<ConnectionRegistry>,
        events: mpsc::Receiver<RelayEvent>,
    }

    fn fixture() -> Fixture {
        let (tx, events) = mpsc::channel(32);
        let registry = Arc::new(ConnectionRegistry::default());
        let broadcaster = Arc::new(RelayBroadcaster::new(Arc::clone(&registry), tx));

        let origin_id = Uuid::new_v4();
        let origin_wire = Wire::default();
        let origin: Arc<dyn PeerLink> = Arc::new(wire_link(origin_id, Arc::clone(&origin_wire)));
        registry.add(Arc::clone(&origin)).unwrap();

        let other_id = Uuid::new_v4();
        let other_wire = Wire::default();
        registry
            .add(Arc::new(wire_link(other_id, Arc::clone(&other_wire))))
            .unwrap();
        registry.set_name(other_id, "Bob");

        Fixture {
            relay: InboundRelay::new(origin, broadcaster),
            origin_id,
            origin_wire,
            other_wire,
            registry,
            events,
        }
    }

    fn drain(events: &mut mpsc::Receiver<RelayEvent>) -> Vec<RelayEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn test_user_announce_names_connection_and_relays_join() {
        // Arrange
        let mut f = fixture();

        // Act
        f.relay
            .handle(Frame::UserAnnounce {
                name: "Alice".to_string(),
            })
            .await;

        // Assert
        assert_eq!(f.registry.name_of(f.origin_id).as_deref(), Some("Alice"));
        assert_eq!(
            drain(&mut f.events),
            vec![RelayEvent::PeerJoined {
                name: "Alice".to_string()
            }]
        );
        assert_eq!(*f.other_wire.lock().unwrap(), b"USER|Alice\n");
        assert!(f.origin_wire.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_display_name_is_reported_not_assigned() {
        let mut f = fixture();

        f.relay
            .handle(Frame::UserAnnounce {
                name: "a:b".to_string(),
            })
            .await;

        assert_eq!(f.registry.name_of(f.origin_id), None);
        assert!(matches!(
            drain(&mut f.events).as_slice(),
            [RelayEvent::Error {
                kind: RelayErrorKind::Protocol,
                ..
            }]
        ));
        assert!(f.other_wire.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_chat_uses_registered_name_over_claimed_name() {
        // Arrange
        let mut f = fixture();
        f.registry.set_name(f.origin_id, "Alice");

        // Act
        f.relay
            .handle(Frame::ChatMessage {
                sender_name: "Mallory".to_string(),
                text: "hi".to_string(),
            })
            .await;

        // Assert
        assert_eq!(*f.other_wire.lock().unwrap(), b"MSG|Alice: hi\n");
        assert!(f.origin_wire.lock().unwrap().is_empty(), "no echo to the sender");
        assert_eq!(
            drain(&mut f.events),
            vec![RelayEvent::MessageReceived {
                sender_name: "Alice".to_string(),
                text: "hi".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_chat_from_unnamed_connection_uses_claimed_name() {
        let mut f = fixture();

        f.relay
            .handle(Frame::ChatMessage {
                sender_name: "Carol".to_string(),
                text: "hello".to_string(),
            })
            .await;

        assert_eq!(*f.other_wire.lock().unwrap(), b"MSG|Carol: hello\n");
    }

    #[tokio::test]
    async fn test_file_is_relayed_with_sender_appended() {
        // Arrange
        let mut f = fixture();
        f.registry.set_name(f.origin_id, "Alice");

        // Act
        f.relay
            .handle(Frame::FileHeader {
                file_name: "a.txt".to_string(),
                size: 5,
                sender_name: None,
            })
            .await;
        f.relay
            .handle(Frame::BinaryChunk {
                bytes: b"he".to_vec(),
            })
            .await;
        f.relay
            .handle(Frame::BinaryChunk {
                bytes: b"llo".to_vec(),
            })
            .await;

        // Assert
        assert_eq!(*f.other_wire.lock().unwrap(), b"FILE|a.txt|5|Alice\nhello");
        assert!(f.relay.is_idle());
        assert_eq!(
            drain(&mut f.events),
            vec![RelayEvent::FileRelayed {
                sender_name: "Alice".to_string(),
                file_name: "a.txt".to_string(),
                size: 5,
                recipients: 1
            }]
        );
    }

    #[tokio::test]
    async fn test_file_header_without_any_sender_uses_unknown() {
        let mut f = fixture();

        f.relay
            .handle(Frame::FileHeader {
                file_name: "empty.txt".to_string(),
                size: 0,
                sender_name: None,
            })
            .await;

        assert_eq!(*f.other_wire.lock().unwrap(), b"FILE|empty.txt|0|Unknown\n");
        assert!(matches!(
            drain(&mut f.events).as_slice(),
            [RelayEvent::FileRelayed { size: 0, .. }]
        ));
    }

    #[tokio::test]
    async fn test_file_header_sender_used_when_connection_unnamed() {
        let mut f = fixture();

        f.relay
            .handle(Frame::FileHeader {
                file_name: "x".to_string(),
                size: 0,
                sender_name: Some("Dave".to_string()),
            })
            .await;

        assert_eq!(*f.other_wire.lock().unwrap(), b"FILE|x|0|Dave\n");
    }

    #[tokio::test]
    async fn test_unknown_line_becomes_notice_and_is_not_relayed() {
        let mut f = fixture();

        f.relay
            .handle(Frame::Unknown {
                raw: "hello there".to_string(),
            })
            .await;

        assert_eq!(
            drain(&mut f.events),
            vec![RelayEvent::Notice {
                text: "hello there".to_string()
            }]
        );
        assert!(f.other_wire.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_close_mid_transfer_pads_payload_and_reports_abort() {
        // Arrange
        let mut f = fixture();
        f.registry.set_name(f.origin_id, "Alice");
        f.relay
            .handle(Frame::FileHeader {
                file_name: "r.bin".to_string(),
                size: 10,
                sender_name: None,
            })
            .await;
        f.relay
            .handle(Frame::BinaryChunk {
                bytes: b"1234".to_vec(),
            })
            .await;
        let registry = Arc::clone(&f.registry);

        // Act
        f.relay.close().await;

        // Assert – the recipient got exactly the declared size, then notices.
        let mut expected = b"FILE|r.bin|10|Alice\n1234".to_vec();
        expected.extend_from_slice(&[0u8; 6]);
        expected.extend_from_slice(b"Transfer of r.bin from Alice was interrupted.\n");
        expected.extend_from_slice(b"Alice left.\n");
        assert_eq!(*f.other_wire.lock().unwrap(), expected);

        let events = drain(&mut f.events);
        assert!(matches!(
            &events[0],
            RelayEvent::Error {
                kind: RelayErrorKind::TransferAborted,
                ..
            }
        ));
        assert_eq!(
            events[1],
            RelayEvent::PeerLeft {
                name: "Alice".to_string()
            }
        );
        assert_eq!(registry.len(), 1, "only the closed connection is removed");
    }

    #[tokio::test]
    async fn test_close_without_transfer_only_departs() {
        let mut f = fixture();
        f.registry.set_name(f.origin_id, "Alice");
        let registry = Arc::clone(&f.registry);

        f.relay.close().await;

        assert_eq!(
            drain(&mut f.events),
            vec![RelayEvent::PeerLeft {
                name: "Alice".to_string()
            }]
        );
        assert_eq!(*f.other_wire.lock().unwrap(), b"Alice left.\n");
        assert_eq!(registry.names(), vec!["Bob".to_string()]);
    }
}

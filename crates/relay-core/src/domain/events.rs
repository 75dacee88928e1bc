//! Notifications raised by the relay for the UI collaborator.
//!
//! The server and the peer never render anything themselves.  Every
//! user-visible happening is reported as a [`RelayEvent`] on an `mpsc`
//! channel, and the UI layer decides how to show it.

use std::fmt;
use std::path::PathBuf;

/// Category of a non-fatal failure reported through [`RelayEvent::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayErrorKind {
    /// A connection closed before its file payload was complete.
    TransferAborted,
    /// Writing a received file failed (disk full, permission denied, …).
    TransferFailed,
    /// An outbound frame could not be serialized or written.
    SendFailed,
    /// An inbound frame was inconsistent with the connection state.
    Protocol,
    /// Any other connection-scoped I/O failure.
    Io,
}

impl fmt::Display for RelayErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RelayErrorKind::TransferAborted => "transfer aborted",
            RelayErrorKind::TransferFailed => "transfer failed",
            RelayErrorKind::SendFailed => "send failed",
            RelayErrorKind::Protocol => "protocol error",
            RelayErrorKind::Io => "I/O error",
        };
        f.write_str(label)
    }
}

/// Outbound notification for the UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// A peer announced its display name.
    PeerJoined { name: String },
    /// A named peer disconnected.
    PeerLeft { name: String },
    /// A chat line arrived.
    MessageReceived { sender_name: String, text: String },
    /// A file was received completely and stored at `local_path`.
    FileReceived {
        sender_name: String,
        file_name: String,
        local_path: PathBuf,
    },
    /// The server finished forwarding a file without storing it.
    FileRelayed {
        sender_name: String,
        file_name: String,
        size: u64,
        recipients: usize,
    },
    /// A line that is not a protocol frame, shown verbatim.
    Notice { text: String },
    /// A connection was turned away because the server is full.
    PeerRejected { address: String },
    /// A connection-scoped failure; the relay keeps running.
    Error { kind: RelayErrorKind, detail: String },
}

impl RelayEvent {
    /// Shorthand for building an [`RelayEvent::Error`].
    pub fn error(kind: RelayErrorKind, detail: impl Into<String>) -> Self {
        RelayEvent::Error {
            kind,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for RelayEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayEvent::PeerJoined { name } => write!(f, "{name} joined."),
            RelayEvent::PeerLeft { name } => write!(f, "{name} left."),
            RelayEvent::MessageReceived { sender_name, text } => {
                write!(f, "{sender_name}: {text}")
            }
            RelayEvent::FileReceived {
                sender_name,
                file_name,
                local_path,
            } => write!(
                f,
                "{sender_name}: [File received: {file_name}] saved to {}",
                local_path.display()
            ),
            RelayEvent::FileRelayed {
                sender_name,
                file_name,
                size,
                recipients,
            } => write!(
                f,
                "Relayed file [{file_name}] ({size} bytes) from {sender_name} to {recipients} peer(s)"
            ),
            RelayEvent::Notice { text } => f.write_str(text),
            RelayEvent::PeerRejected { address } => {
                write!(f, "Rejected connection from {address}: server is full")
            }
            RelayEvent::Error { kind, detail } => write!(f, "Error ({kind}): {detail}"),
        }
    }
}

//! # relay-core
//!
//! Shared library for the chat relay containing the line protocol, the
//! incremental frame decoder, and the per-connection file transfer state
//! machine.
//!
//! This crate is used by both the relay server and the peer application.
//! It has no dependency on sockets, files, or any UI layer.
//!
//! # Architecture overview
//!
//! The relay lets up to five peers chat and share files through one server.
//! Every peer holds a single TCP stream to the server and that stream carries
//! two kinds of traffic:
//!
//! - **Text lines** (`USER|…`, `MSG|…`, `FILE|…`) terminated by `\n`.
//! - **Raw file payload** that immediately follows a `FILE|` header, with no
//!   further framing.
//!
//! This crate defines:
//!
//! - **`protocol`** – The [`Frame`] tagged variant, the encoders that produce
//!   outbound lines, and the [`FrameDecoder`] that turns an arbitrary sequence
//!   of reads back into frames, switching between text and binary mode.
//!
//! - **`domain`** – The [`TransferStateMachine`] that writes one file payload
//!   into a [`TransferSink`], and the [`RelayEvent`]s that the server and the
//!   peer report to whatever UI sits on top of them.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `relay_core::Frame` instead of `relay_core::protocol::frame::Frame`.
pub use domain::events::{RelayErrorKind, RelayEvent};
pub use domain::transfer::{
    AbortedTransfer, CompletedTransfer, TransferError, TransferProgress, TransferSink,
    TransferStateMachine,
};
pub use protocol::decoder::{DecoderMode, FrameDecoder, Frames, MAX_LINE_LEN};
pub use protocol::frame::{
    encode_chat, encode_file_header, encode_notice, encode_user, validate_display_name, Frame,
    ProtocolError,
};

//! Application layer of the relay peer.
//!
//! # Sub-modules
//!
//! - **`inbound`** – `InboundHandler`: turns decoded frames into UI events and
//!   writes incoming file payloads into sinks obtained from a `DownloadStore`.
//!   It never touches a socket or the file system directly.

pub mod inbound;

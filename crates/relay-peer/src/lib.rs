//! relay-peer library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! # What does relay-peer do? (for beginners)
//!
//! A *peer* is one chat participant.  It opens a single TCP connection to the
//! relay server and keeps it for the whole session:
//!
//! 1. Announces its display name with `USER|<name>`.
//! 2. Sends chat lines (`MSG|<name>: <text>`) and files (`FILE|<name>|<size>`
//!    followed by exactly `<size>` raw bytes) typed or chosen by the user.
//! 3. Reads everything the server relays from the other peers, decodes it
//!    with the same `FrameDecoder` the server uses, stores incoming files in
//!    the download directory, and reports each step as a `RelayEvent`.

/// Application layer: what the peer does with each inbound frame.
pub mod application;

/// Infrastructure layer: TCP session, received-file storage, configuration.
pub mod infrastructure;

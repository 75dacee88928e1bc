//! Network infrastructure for the relay server.
//!
//! # Sub-modules
//!
//! - **`connection`** – `PeerConnection`: the TCP write half of one accepted
//!   connection behind a mutex, implementing `PeerLink`, plus the
//!   cancellation token that stops its reader.
//!
//! - **`server`** – `RelayServer`: binds the listener, runs the accept loop,
//!   spawns one tracked reader task per admitted connection, and exposes a
//!   `ServerHandle` through which the operator chats, shares files, and shuts
//!   the server down.

pub mod connection;
pub mod server;

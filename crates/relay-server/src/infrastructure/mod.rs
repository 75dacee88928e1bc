//! Infrastructure layer for the relay server.
//!
//! Contains the OS-facing adapters: the TCP accept loop and per-connection
//! reader tasks, the socket-backed `PeerLink`, and TOML configuration.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `relay_core`, but MUST NOT be imported by the `application` layer.

pub mod network;
pub mod storage;

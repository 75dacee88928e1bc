//! Infrastructure layer for the relay peer.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `relay_core`, but MUST NOT be imported by the `application` layer.
//!
//! # Sub-modules
//!
//! - **`network`** – `PeerSession`: the TCP connection to the server, its
//!   reader task, and the single-writer send path.
//!
//! - **`storage`** – `ReceivedFileStore` / `FileSink` that put incoming files
//!   on disk, and the TOML configuration.

pub mod network;
pub mod storage;

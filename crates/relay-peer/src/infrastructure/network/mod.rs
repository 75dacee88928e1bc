//! Network infrastructure for the relay peer.

pub mod session;

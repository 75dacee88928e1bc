//! Domain layer: pure state shared by the server and the peer.
//!
//! - **`transfer`** – The per-connection file transfer state machine and the
//!   [`TransferSink`](transfer::TransferSink) seam it writes into.
//! - **`events`** – Notifications raised for the UI collaborator.

pub mod events;
pub mod transfer;

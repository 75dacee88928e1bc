//! Application layer of the relay server.
//!
//! Everything here works against the [`link::PeerLink`] trait and never
//! touches a socket, so the relay rules are unit-testable with mocks.
//!
//! # Sub-modules
//!
//! - **`link`** – The `PeerLink` / `LinkWriter` seam through which the relay
//!   writes to peers, and the single-writer guarantees implementations give.
//!
//! - **`registry`** – `ConnectionRegistry`: live connections, display names,
//!   and the five-connection admission bound.
//!
//! - **`broadcast`** – `RelayBroadcaster`: best-effort fan-out of frames to a
//!   registry snapshot, reserved fan-out of file payloads, and departure
//!   announcements.
//!
//! - **`relay_inbound`** – `InboundRelay`: what happens to each frame a peer
//!   sends, including forwarding file payloads through a `RelaySink`.

pub mod broadcast;
pub mod link;
pub mod registry;
pub mod relay_inbound;

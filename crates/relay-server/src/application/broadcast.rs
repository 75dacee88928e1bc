//! RelayBroadcaster: fans frames out to a snapshot of registry members.
//!
//! Delivery is best-effort and sequential, in snapshot order.  A target whose
//! write fails is closed and the loop moves on; closing wakes the target's
//! own reader task, which then removes it from the registry and announces its
//! departure.  A slow target delays the targets after it in the same call.
//!
//! File payloads use a [`Fanout`]: the target set is captured and reserved
//! once when the header is relayed, and every later chunk goes to that same
//! set.  Peers that join mid-transfer never see a truncated file, and no other
//! frame can be written to a reserved target until the fanout is dropped.

use std::sync::Arc;

use relay_core::{encode_notice, RelayEvent};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::application::link::{ConnectionId, LinkWriter, PeerLink};
use crate::application::registry::ConnectionRegistry;

/// Outcome of one fan-out call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Targets that accepted the write.
    pub delivered: usize,
    /// Targets whose write failed; each has been closed.
    pub failed: Vec<ConnectionId>,
}

/// Sends frames to every connected peer except the originator.
pub struct RelayBroadcaster {
    registry: Arc<ConnectionRegistry>,
    events: mpsc::Sender<RelayEvent>,
}

impl RelayBroadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>, events: mpsc::Sender<RelayEvent>) -> Self {
        Self { registry, events }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Reports an event to the UI.  A dropped receiver is not an error.
    pub async fn emit(&self, event: RelayEvent) {
        if self.events.send(event).await.is_err() {
            debug!("event receiver dropped; event discarded");
        }
    }

    /// Sends one complete frame to every member except `exclude`.
    pub async fn broadcast(&self, frame: &[u8], exclude: Option<ConnectionId>) -> BroadcastReport {
        let targets = self.registry.snapshot(exclude);
        self.broadcast_to(&targets, frame).await
    }

    /// Sends one complete frame to a fixed list of targets.
    pub async fn broadcast_to(
        &self,
        targets: &[Arc<dyn PeerLink>],
        frame: &[u8],
    ) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        for link in targets {
            match link.send(frame).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(peer = %link.peer_addr(), error = %e, "relay write failed; closing link");
                    link.close();
                    report.failed.push(link.id());
                }
            }
        }
        report
    }

    /// Reserves every member except `exclude` and writes `header` to each.
    ///
    /// Targets are reserved one after another in admission order, so two
    /// concurrent fanouts always acquire their reservations in the same order.
    pub async fn open_fanout(&self, header: &[u8], exclude: Option<ConnectionId>) -> Fanout {
        let mut fanout = Fanout::empty();
        for link in self.registry.snapshot(exclude) {
            let reserved = match link.reserve().await {
                Ok(mut writer) => writer.write(header).await.map(|()| writer),
                Err(e) => Err(e),
            };
            match reserved {
                Ok(writer) => fanout.members.push(FanoutMember { link, writer }),
                Err(e) => {
                    warn!(peer = %link.peer_addr(), error = %e, "file header write failed; closing link");
                    link.close();
                }
            }
        }
        fanout
    }

    /// Removes a connection and, if it had announced a name, reports the
    /// departure once: a `PeerLeft` event and a `<name> left.` line to the
    /// remaining peers.
    pub async fn depart(&self, id: ConnectionId) -> Option<String> {
        let name = self.registry.remove(id)?;
        self.emit(RelayEvent::PeerLeft { name: name.clone() }).await;
        match encode_notice(&format!("{name} left.")) {
            Ok(line) => {
                self.broadcast(&line, None).await;
            }
            Err(e) => debug!(error = %e, "departure notice not encodable"),
        }
        Some(name)
    }
}

struct FanoutMember {
    link: Arc<dyn PeerLink>,
    writer: Box<dyn LinkWriter>,
}

/// A fixed, reserved set of targets for one file payload.
///
/// Dropping the fanout releases every reservation.
#[derive(Default)]
pub struct Fanout {
    members: Vec<FanoutMember>,
}

impl Fanout {
    /// A fanout with no targets; writes to it are no-ops.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of targets still reachable.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Closes every remaining target and empties the set.
    pub fn close_all(&mut self) {
        for member in self.members.drain(..) {
            member.link.close();
        }
    }

    /// Writes `bytes` to every remaining target.
    ///
    /// Targets whose write fails are closed and dropped from the set.
    pub async fn forward(&mut self, bytes: &[u8]) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut index = 0;
        while index < self.members.len() {
            let member = &mut self.members[index];
            match member.writer.write(bytes).await {
                Ok(()) => {
                    report.delivered += 1;
                    index += 1;
                }
                Err(e) => {
                    warn!(peer = %member.link.peer_addr(), error = %e, "payload write failed; closing link");
                    member.link.close();
                    report.failed.push(member.link.id());
                    self.members.remove(index);
                }
            }
        }
        report
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! Event pump — applies substrate events on a dedicated task.
//!
//! A substrate that must not run routing work on its own threads can hand
//! events to a [`ChannelSink`] instead of the table; an [`EventPump`] task
//! drains the channel into the real sink until the channel closes or the
//! shutdown signal fires.
//!
//! The channel is unbounded: dropping a membership or fact event would
//! leave the routing view permanently wrong, so ingestion never sheds load.

use std::sync::Arc;

use spino_core::{LocationFact, MemberId};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::events::{ClusterEvent, ClusterEvents};

/// Create a connected sink/pump pair.
pub fn channel(target: Arc<dyn ClusterEvents>) -> (ChannelSink, EventPump) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelSink { tx }, EventPump { rx, target })
}

/// A [`ClusterEvents`] that forwards every event into the pump's queue.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ClusterEvent>,
}

impl ChannelSink {
    fn send(&self, event: ClusterEvent) {
        let kind = event.kind();
        if self.tx.send(event).is_err() {
            warn!(kind, "event pump stopped, dropping cluster event");
        }
    }
}

impl ClusterEvents for ChannelSink {
    fn fact_published(&self, fact: LocationFact) {
        self.send(ClusterEvent::FactPublished(fact));
    }

    fn fact_withdrawn(&self, fact: LocationFact) {
        self.send(ClusterEvent::FactWithdrawn(fact));
    }

    fn member_added(&self, member: &MemberId) {
        self.send(ClusterEvent::MemberAdded(member.clone()));
    }

    fn member_removed(&self, member: &MemberId) {
        self.send(ClusterEvent::MemberRemoved(member.clone()));
    }
}

/// Counters reported when the pump stops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PumpStats {
    pub applied: u64,
}

/// Drains queued events into a target sink.
pub struct EventPump {
    rx: mpsc::UnboundedReceiver<ClusterEvent>,
    target: Arc<dyn ClusterEvents>,
}

impl EventPump {
    /// Run until every [`ChannelSink`] is dropped or `shutdown` flips.
    ///
    /// Events still queued at shutdown are not applied.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> PumpStats {
        let mut stats = PumpStats::default();
        debug!("event pump starting");

        loop {
            tokio::select! {
                event = self.rx.recv() => match event {
                    Some(event) => {
                        debug!(kind = event.kind(), "applying cluster event");
                        event.deliver(self.target.as_ref());
                        stats.applied += 1;
                    }
                    None => {
                        debug!("event channel closed");
                        break;
                    }
                },
                _ = shutdown.changed() => {
                    debug!("event pump shutting down");
                    break;
                }
            }
        }

        info!(applied = stats.applied, "event pump stopped");
        stats
    }
}

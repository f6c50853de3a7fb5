//! Events delivered by the cluster substrate.

use spino_core::{LocationFact, MemberId, RoutingTable};
use tracing::debug;

/// Receiver of substrate events.
///
/// Implemented by [`RoutingTable`] directly, so a substrate can feed a table
/// without any glue. Delivery is synchronous on the substrate's thread.
pub trait ClusterEvents: Send + Sync {
    /// A fact was published or updated anywhere in the cluster, including
    /// by the local member.
    fn fact_published(&self, fact: LocationFact);

    /// A fact was withdrawn, evicted, or expired.
    fn fact_withdrawn(&self, fact: LocationFact);

    fn member_added(&self, member: &MemberId);

    fn member_removed(&self, member: &MemberId);
}

impl ClusterEvents for RoutingTable {
    fn fact_published(&self, fact: LocationFact) {
        debug!(%fact, "fact published");
        self.put(fact);
    }

    fn fact_withdrawn(&self, fact: LocationFact) {
        debug!(%fact, "fact withdrawn");
        self.remove(&fact);
    }

    fn member_added(&self, member: &MemberId) {
        debug!(%member, "member added");
        RoutingTable::member_added(self, member);
    }

    fn member_removed(&self, member: &MemberId) {
        debug!(%member, "member removed");
        RoutingTable::member_removed(self, member);
    }
}

/// A substrate event as a value, for delivery across tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterEvent {
    FactPublished(LocationFact),
    FactWithdrawn(LocationFact),
    MemberAdded(MemberId),
    MemberRemoved(MemberId),
}

impl ClusterEvent {
    pub fn deliver(self, sink: &dyn ClusterEvents) {
        match self {
            ClusterEvent::FactPublished(fact) => sink.fact_published(fact),
            ClusterEvent::FactWithdrawn(fact) => sink.fact_withdrawn(fact),
            ClusterEvent::MemberAdded(member) => sink.member_added(&member),
            ClusterEvent::MemberRemoved(member) => sink.member_removed(&member),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClusterEvent::FactPublished(_) => "fact_published",
            ClusterEvent::FactWithdrawn(_) => "fact_withdrawn",
            ClusterEvent::MemberAdded(_) => "member_added",
            ClusterEvent::MemberRemoved(_) => "member_removed",
        }
    }
}

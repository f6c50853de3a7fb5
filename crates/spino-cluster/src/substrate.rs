//! Interfaces of the group-membership and distributed-map substrate.
//!
//! Spino does not detect failures or replicate facts itself. It consumes
//! a membership view and a replicated fact map through these traits.

use std::collections::HashSet;
use std::sync::Arc;

use spino_core::{LocationFact, MemberId, SpinoResult};

use crate::events::ClusterEvents;

/// Handle for removing a sink registered with `watch_*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(pub(crate) u64);

/// Cluster membership as seen from one process.
pub trait Membership: Send + Sync {
    /// Identity of the member this process runs as.
    fn local_member(&self) -> MemberId;

    /// Members currently believed to be live.
    fn members(&self) -> HashSet<MemberId>;

    /// Deliver `member_added` / `member_removed` to `sink`, once per
    /// transition, in the order observed.
    fn watch_members(&self, sink: Arc<dyn ClusterEvents>) -> WatchId;

    fn unwatch_members(&self, id: WatchId) -> bool;
}

/// The replicated map of published location facts.
pub trait FactMap: Send + Sync {
    /// Publish a fact. The map echoes it back as `fact_published`.
    fn publish(&self, fact: LocationFact) -> SpinoResult<()>;

    /// Withdraw a fact. Unknown facts are ignored.
    fn withdraw(&self, fact: &LocationFact) -> SpinoResult<()>;

    /// Point-in-time enumeration of every published fact.
    fn facts(&self) -> Vec<LocationFact>;

    /// Deliver `fact_published` / `fact_withdrawn` to `sink` for every
    /// change anywhere in the cluster.
    fn watch_facts(&self, sink: Arc<dyn ClusterEvents>) -> WatchId;

    fn unwatch_facts(&self, id: WatchId) -> bool;
}

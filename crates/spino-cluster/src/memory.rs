//! In-process cluster substrate.
//!
//! `InMemoryCluster` plays both collaborators for any number of members
//! living in one process: a roster with join/leave, and a service-keyed
//! multimap of facts. Every change is broadcast synchronously to the
//! attached sinks, the way a replicated map delivers entry events to
//! every member. Used by tests and by the `spinod` simulator.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use spino_core::config::ClusterConfig;
use spino_core::{LocationFact, MemberId, SpinoError, SpinoResult};
use tracing::{debug, info};

use crate::events::ClusterEvents;
use crate::substrate::{FactMap, Membership, WatchId};

type Sinks = Vec<(WatchId, Arc<dyn ClusterEvents>)>;

#[derive(Default)]
struct ClusterState {
    roster: BTreeSet<MemberId>,
    /// service → distinct facts, like a multimap keyed by service name.
    facts: BTreeMap<String, Vec<LocationFact>>,
    member_sinks: Sinks,
    fact_sinks: Sinks,
}

struct Inner {
    group: String,
    map_name: String,
    state: RwLock<ClusterState>,
    next_watch: AtomicU64,
}

/// Shared in-memory cluster. Cheap to clone.
///
/// Events are delivered after the cluster's own lock is released, so a
/// sink may call back into the cluster. Events from calls made
/// concurrently on different threads may interleave.
#[derive(Clone)]
pub struct InMemoryCluster {
    inner: Arc<Inner>,
}

impl InMemoryCluster {
    pub fn new(config: &ClusterConfig) -> Self {
        info!(
            group = %config.group,
            map = %config.services_map,
            seeds = ?config.seeds,
            "in-memory cluster created"
        );
        Self {
            inner: Arc::new(Inner {
                group: config.group.clone(),
                map_name: config.services_map.clone(),
                state: RwLock::new(ClusterState::default()),
                next_watch: AtomicU64::new(0),
            }),
        }
    }

    pub fn group(&self) -> &str {
        &self.inner.group
    }

    pub fn map_name(&self) -> &str {
        &self.inner.map_name
    }

    /// Add `member` to the roster and return its view of the cluster.
    /// Joining twice is harmless and emits a single `member_added`.
    pub fn join(&self, member: impl Into<MemberId>) -> MemberHandle {
        let member = member.into();
        let sinks = {
            let mut state = self.inner.state.write();
            if !state.roster.insert(member.clone()) {
                None
            } else {
                Some(state.member_sinks.clone())
            }
        };

        if let Some(sinks) = sinks {
            info!(group = %self.inner.group, %member, "member joined");
            for (_, sink) in sinks {
                sink.member_added(&member);
            }
        }

        self.handle(member)
    }

    /// Remove `member` from the roster. Its published facts stay in the map.
    pub fn leave(&self, member: &MemberId) -> bool {
        let sinks = {
            let mut state = self.inner.state.write();
            if !state.roster.remove(member) {
                return false;
            }
            state.member_sinks.clone()
        };

        info!(group = %self.inner.group, %member, "member left");
        for (_, sink) in sinks {
            sink.member_removed(member);
        }
        true
    }

    /// A view of the cluster as `member`, without joining.
    pub fn handle(&self, member: impl Into<MemberId>) -> MemberHandle {
        MemberHandle {
            cluster: self.clone(),
            local: member.into(),
        }
    }

    pub fn members(&self) -> HashSet<MemberId> {
        self.inner.state.read().roster.iter().cloned().collect()
    }

    pub fn is_member(&self, member: &MemberId) -> bool {
        self.inner.state.read().roster.contains(member)
    }

    /// Store `fact`. Returns false, and emits nothing, if the identical fact
    /// is already present.
    pub fn publish(&self, fact: LocationFact) -> bool {
        let sinks = {
            let mut state = self.inner.state.write();
            let values = state.facts.entry(fact.service().to_string()).or_default();
            if values.contains(&fact) {
                return false;
            }
            values.push(fact.clone());
            state.fact_sinks.clone()
        };

        debug!(map = %self.inner.map_name, %fact, "entry added");
        for (_, sink) in sinks {
            sink.fact_published(fact.clone());
        }
        true
    }

    /// Remove `fact`. Returns false, and emits nothing, if it was not present.
    pub fn withdraw(&self, fact: &LocationFact) -> bool {
        self.remove_entry(fact, "entry removed")
    }

    /// Drop `fact` as if it had expired in the replicated map.
    pub fn evict(&self, fact: &LocationFact) -> bool {
        self.remove_entry(fact, "entry evicted")
    }

    fn remove_entry(&self, fact: &LocationFact, reason: &'static str) -> bool {
        let sinks = {
            let mut state = self.inner.state.write();
            let Some(values) = state.facts.get_mut(fact.service()) else {
                return false;
            };
            let before = values.len();
            values.retain(|existing| existing != fact);
            if values.len() == before {
                return false;
            }
            if values.is_empty() {
                state.facts.remove(fact.service());
            }
            state.fact_sinks.clone()
        };

        debug!(map = %self.inner.map_name, %fact, "{reason}");
        for (_, sink) in sinks {
            sink.fact_withdrawn(fact.clone());
        }
        true
    }

    pub fn facts(&self) -> Vec<LocationFact> {
        self.inner
            .state
            .read()
            .facts
            .values()
            .flatten()
            .cloned()
            .collect()
    }

    fn next_watch_id(&self) -> WatchId {
        WatchId(self.inner.next_watch.fetch_add(1, Ordering::Relaxed))
    }

    fn watch_members(&self, sink: Arc<dyn ClusterEvents>) -> WatchId {
        let id = self.next_watch_id();
        self.inner.state.write().member_sinks.push((id, sink));
        id
    }

    fn watch_facts(&self, sink: Arc<dyn ClusterEvents>) -> WatchId {
        let id = self.next_watch_id();
        self.inner.state.write().fact_sinks.push((id, sink));
        id
    }

    fn unwatch(sinks: &mut Sinks, id: WatchId) -> bool {
        let before = sinks.len();
        sinks.retain(|(existing, _)| *existing != id);
        sinks.len() != before
    }
}

/// One member's view of an [`InMemoryCluster`].
#[derive(Clone)]
pub struct MemberHandle {
    cluster: InMemoryCluster,
    local: MemberId,
}

impl MemberHandle {
    pub fn cluster(&self) -> &InMemoryCluster {
        &self.cluster
    }

    fn ensure_joined(&self) -> SpinoResult<()> {
        if self.cluster.is_member(&self.local) {
            Ok(())
        } else {
            Err(SpinoError::Cluster(format!(
                "member {} is not part of group {}",
                self.local,
                self.cluster.group()
            )))
        }
    }
}

impl Membership for MemberHandle {
    fn local_member(&self) -> MemberId {
        self.local.clone()
    }

    fn members(&self) -> HashSet<MemberId> {
        self.cluster.members()
    }

    fn watch_members(&self, sink: Arc<dyn ClusterEvents>) -> WatchId {
        self.cluster.watch_members(sink)
    }

    fn unwatch_members(&self, id: WatchId) -> bool {
        InMemoryCluster::unwatch(&mut self.cluster.inner.state.write().member_sinks, id)
    }
}

impl FactMap for MemberHandle {
    fn publish(&self, fact: LocationFact) -> SpinoResult<()> {
        self.ensure_joined()?;
        self.cluster.publish(fact);
        Ok(())
    }

    fn withdraw(&self, fact: &LocationFact) -> SpinoResult<()> {
        self.ensure_joined()?;
        self.cluster.withdraw(fact);
        Ok(())
    }

    fn facts(&self) -> Vec<LocationFact> {
        self.cluster.facts()
    }

    fn watch_facts(&self, sink: Arc<dyn ClusterEvents>) -> WatchId {
        self.cluster.watch_facts(sink)
    }

    fn unwatch_facts(&self, id: WatchId) -> bool {
        InMemoryCluster::unwatch(&mut self.cluster.inner.state.write().fact_sinks, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spino_core::{Address, RoutingTable};

    fn cluster() -> InMemoryCluster {
        InMemoryCluster::new(&ClusterConfig::default())
    }

    fn fact(service: &str, address: &str, owner: &str) -> LocationFact {
        LocationFact::new(service, Address::parse(address).unwrap(), owner.into()).unwrap()
    }

    #[test]
    fn join_and_leave_update_roster() {
        let cluster = cluster();
        cluster.join("m1");
        cluster.join("m2");
        cluster.join("m1");

        assert_eq!(cluster.members().len(), 2);
        assert!(cluster.leave(&"m1".into()));
        assert!(!cluster.leave(&"m1".into()));
        assert!(!cluster.is_member(&"m1".into()));
    }

    #[test]
    fn publish_is_a_multimap_of_distinct_values() {
        let cluster = cluster();
        assert!(cluster.publish(fact("api", "http://h1:80", "m1")));
        assert!(!cluster.publish(fact("api", "http://h1:80", "m1")));
        assert!(cluster.publish(fact("api", "http://h2:80", "m2")));
        assert_eq!(cluster.facts().len(), 2);

        assert!(cluster.withdraw(&fact("api", "http://h1:80", "m1")));
        assert!(!cluster.withdraw(&fact("api", "http://h1:80", "m1")));
        assert!(cluster.evict(&fact("api", "http://h2:80", "m2")));
        assert!(cluster.facts().is_empty());
    }

    #[test]
    fn events_reach_attached_table() {
        let cluster = cluster();
        let table = Arc::new(RoutingTable::new());
        let m1 = cluster.join("m1");
        m1.watch_members(table.clone());
        m1.watch_facts(table.clone());

        m1.publish(fact("api", "http://h1:80", "m1")).unwrap();
        assert_eq!(table.addresses("api").len(), 1);

        cluster.leave(&"m1".into());
        assert!(table.addresses("api").is_empty());
        assert_eq!(table.len(), 1);

        cluster.join("m1");
        assert_eq!(table.addresses("api").len(), 1);
    }

    #[test]
    fn unwatch_stops_delivery() {
        let cluster = cluster();
        let table = Arc::new(RoutingTable::new());
        let m1 = cluster.join("m1");
        let id = m1.watch_facts(table.clone());

        assert!(m1.unwatch_facts(id));
        assert!(!m1.unwatch_facts(id));

        m1.publish(fact("api", "http://h1:80", "m1")).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn publish_requires_membership() {
        let cluster = cluster();
        let outsider = cluster.handle("ghost");
        let err = outsider
            .publish(fact("api", "http://h1:80", "ghost"))
            .unwrap_err();
        assert!(matches!(err, SpinoError::Cluster(_)));
        assert!(cluster.facts().is_empty());
    }
}

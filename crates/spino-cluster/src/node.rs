//! Spino node — one process's entry point into the routing layer.
//!
//! `SpinoNode` wires a [`RoutingTable`] to the membership and fact-map
//! collaborators and exposes the query/subscription surface:
//!
//! - `activate` / `deactivate` publish into the fact map. The table learns
//!   about the change only when the map echoes it back, exactly like a
//!   remote member's publication.
//! - `addresses` reads the table's latest snapshot.
//! - `subscribe` / `unsubscribe` register change listeners.
//!
//! There is no global instance; construct one per process and share it.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use spino_core::config::NotifyConfig;
use spino_core::{
    Address, ListenerId, LocationFact, MemberId, RoutingTable, ServiceChange, ServiceListener,
    SpinoError, SpinoResult,
};
use tokio::sync::mpsc;
use tracing::info;

use crate::events::ClusterEvents;
use crate::substrate::{FactMap, Membership, WatchId};

/// Outcome of seeding the table from the fact map at startup.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedStats {
    pub imported: usize,
    pub skipped: usize,
}

struct Watches {
    members: WatchId,
    facts: WatchId,
}

pub struct SpinoNode {
    table: Arc<RoutingTable>,
    membership: Arc<dyn Membership>,
    facts: Arc<dyn FactMap>,
    notify: NotifyConfig,
    watches: Mutex<Option<Watches>>,
}

impl SpinoNode {
    pub fn new(membership: Arc<dyn Membership>, facts: Arc<dyn FactMap>) -> Self {
        Self {
            table: Arc::new(RoutingTable::new()),
            membership,
            facts,
            notify: NotifyConfig::default(),
            watches: Mutex::new(None),
        }
    }

    /// Use an existing table instead of a fresh one.
    pub fn with_table(mut self, table: Arc<RoutingTable>) -> Self {
        self.table = table;
        self
    }

    pub fn with_notify_config(mut self, notify: NotifyConfig) -> Self {
        self.notify = notify;
        self
    }

    /// Attach the table to both collaborators, then import the facts of
    /// members currently in the roster. Facts whose owner is not in the
    /// roster are skipped; they arrive later through `member_added` only if
    /// they are published again.
    ///
    /// Starting an already started node does nothing.
    pub fn start(&self) -> SpinoResult<SeedStats> {
        let mut watches = self.watches.lock();
        if watches.is_some() {
            return Ok(SeedStats::default());
        }

        let sink: Arc<dyn ClusterEvents> = self.table.clone();
        *watches = Some(Watches {
            members: self.membership.watch_members(sink.clone()),
            facts: self.facts.watch_facts(sink),
        });
        drop(watches);

        let local = self.membership.local_member();
        info!(member = %local, "spino node starting");

        let stats = self.seed();
        info!(
            member = %local,
            imported = stats.imported,
            skipped = stats.skipped,
            "routing table seeded"
        );
        Ok(stats)
    }

    fn seed(&self) -> SeedStats {
        let roster: HashSet<MemberId> = self.membership.members();
        let mut stats = SeedStats::default();
        let mut owners = HashSet::new();

        for fact in self.facts.facts() {
            if !roster.contains(fact.owner()) {
                info!(%fact, "skipping import, owner is not online");
                stats.skipped += 1;
                continue;
            }
            info!(%fact, "importing existing location");
            owners.insert(fact.owner().clone());
            self.table.put(fact);
            stats.imported += 1;
        }

        // A member that left while we were importing had its removal event
        // applied to an empty row. Disable what it owns now.
        let current = self.membership.members();
        for owner in owners.difference(&current) {
            info!(%owner, "owner left during import, disabling its locations");
            self.table.member_removed(owner);
        }

        stats
    }

    /// Detach from the collaborators. The table keeps its last state.
    pub fn shutdown(&self) {
        if let Some(watches) = self.watches.lock().take() {
            self.membership.unwatch_members(watches.members);
            self.facts.unwatch_facts(watches.facts);
            info!(member = %self.membership.local_member(), "spino node stopped");
        }
    }

    pub fn is_started(&self) -> bool {
        self.watches.lock().is_some()
    }

    /// Declare that this member serves `service` at `address`.
    /// Re-activating an active location has no effect.
    pub fn activate(&self, service: &str, address: &str) -> SpinoResult<()> {
        let address = Address::parse(address)?;
        self.activate_address(service, address)
    }

    pub fn activate_address(&self, service: &str, address: Address) -> SpinoResult<()> {
        let fact = self.local_fact(service, address)?;
        info!(service, address = %fact.address(), "activating service location");
        self.facts.publish(fact)
    }

    /// Withdraw this member's location for `service` at `address`.
    /// Deactivating an unknown location has no effect.
    pub fn deactivate(&self, service: &str, address: &str) -> SpinoResult<()> {
        let address = Address::parse(address)?;
        self.deactivate_address(service, address)
    }

    pub fn deactivate_address(&self, service: &str, address: Address) -> SpinoResult<()> {
        let fact = self.local_fact(service, address)?;
        info!(service, address = %fact.address(), "deactivating service location");
        self.facts.withdraw(&fact)
    }

    fn local_fact(&self, service: &str, address: Address) -> SpinoResult<LocationFact> {
        if !self.is_started() {
            return Err(SpinoError::NotStarted);
        }
        LocationFact::new(service, address, self.membership.local_member())
    }

    /// Addresses currently serving `service`, in no particular order.
    pub fn addresses(&self, service: &str) -> Vec<Address> {
        self.table.addresses(service)
    }

    pub fn subscribe(&self, service: &str, listener: Arc<dyn ServiceListener>) -> ListenerId {
        self.table.subscribe(service, listener)
    }

    /// Channel subscription sized by the node's notify config.
    pub fn subscribe_channel(&self, service: &str) -> (ListenerId, mpsc::Receiver<ServiceChange>) {
        self.table
            .subscribe_channel(service, self.notify.channel_capacity)
    }

    pub fn unsubscribe(&self, service: &str, id: ListenerId) -> bool {
        self.table.unsubscribe(service, id)
    }

    pub fn local_member(&self) -> MemberId {
        self.membership.local_member()
    }

    pub fn table(&self) -> &Arc<RoutingTable> {
        &self.table
    }
}

impl Drop for SpinoNode {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryCluster;
    use spino_core::config::ClusterConfig;

    fn node(cluster: &InMemoryCluster, member: &str) -> SpinoNode {
        let handle = Arc::new(cluster.join(member));
        SpinoNode::new(handle.clone(), handle)
    }

    #[test]
    fn activate_requires_start() {
        let cluster = InMemoryCluster::new(&ClusterConfig::default());
        let node = node(&cluster, "m1");
        let err = node.activate("api", "http://h1:80").unwrap_err();
        assert!(matches!(err, SpinoError::NotStarted));
    }

    #[test]
    fn activate_rejects_bad_input() {
        let cluster = InMemoryCluster::new(&ClusterConfig::default());
        let node = node(&cluster, "m1");
        node.start().unwrap();

        assert!(matches!(
            node.activate("api", "not a url"),
            Err(SpinoError::Address(_))
        ));
        assert!(matches!(
            node.activate("", "http://h1:80"),
            Err(SpinoError::EmptyService)
        ));
        assert!(cluster.facts().is_empty());
    }

    #[test]
    fn activation_is_echoed_into_table() {
        let cluster = InMemoryCluster::new(&ClusterConfig::default());
        let node = node(&cluster, "m1");
        node.start().unwrap();

        node.activate("api", "http://h1:80").unwrap();
        node.activate("api", "http://h1:80").unwrap();
        assert_eq!(node.addresses("api").len(), 1);

        node.deactivate("api", "http://h1:80").unwrap();
        node.deactivate("api", "http://h1:80").unwrap();
        assert!(node.addresses("api").is_empty());
    }

    #[test]
    fn start_is_idempotent_and_shutdown_detaches() {
        let cluster = InMemoryCluster::new(&ClusterConfig::default());
        let node = node(&cluster, "m1");
        node.start().unwrap();
        node.start().unwrap();

        node.activate("api", "http://h1:80").unwrap();
        assert_eq!(node.addresses("api").len(), 1);

        node.shutdown();
        assert!(!node.is_started());
        cluster.withdraw(&LocationFact::new(
            "api",
            Address::parse("http://h1:80").unwrap(),
            "m1".into(),
        )
        .unwrap());
        // Detached: the table keeps its last view.
        assert_eq!(node.addresses("api").len(), 1);
    }
}

//! Routing table — reconciles fact events and membership events into one
//! queryable view.
//!
//! Mutations (`put`, `remove`, `member_added`, `member_removed`) run under a
//! single mutex. Each one updates the [`FactTable`] and [`StatusIndex`],
//! recomputes the affected services, and publishes a new [`SnapshotView`]
//! by swapping one pointer. Readers load that pointer without locking and
//! may see a view one generation old, never a half-built one.
//!
//! Listeners run after the mutex is released, and only for services whose
//! enabled address set actually changed.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{Level, debug, info};

use crate::fact_table::FactTable;
use crate::listeners::{ListenerId, ListenerRegistry, NotifyStats, ServiceChange, ServiceListener};
use crate::snapshot::SnapshotView;
use crate::status::StatusIndex;
use crate::types::{Address, LocationFact, MemberId};

/// One row of [`RoutingTable::entries`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableEntry {
    pub owner: MemberId,
    pub service: String,
    pub address: Address,
    pub enabled: bool,
}

#[derive(Debug, Default)]
struct TableState {
    facts: FactTable,
    status: StatusIndex,
    generation: u64,
}

/// The local, authoritative service → addresses view of one process.
///
/// Construct one per process and share it behind an `Arc`.
pub struct RoutingTable {
    state: Mutex<TableState>,
    snapshot: ArcSwap<SnapshotView>,
    listeners: ListenerRegistry,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TableState::default()),
            snapshot: ArcSwap::from_pointee(SnapshotView::default()),
            listeners: ListenerRegistry::new(),
        }
    }

    /// Insert or overwrite the fact at `(owner, service)` and enable it.
    pub fn put(&self, fact: LocationFact) -> NotifyStats {
        info!(
            service = fact.service(),
            owner = %fact.owner(),
            address = %fact.address(),
            "put location"
        );

        let changed = {
            let mut state = self.state.lock();
            let affected = BTreeSet::from([fact.service().to_string()]);

            if let Some(previous) = state.facts.insert(fact.clone()) {
                if previous != fact {
                    state.status.remove(&previous);
                }
            }
            state.status.enable_new(fact);

            self.rebuild(&mut state, affected)
        };

        self.notify(&changed)
    }

    /// Remove `fact` if the table holds exactly it. Unknown facts are ignored.
    pub fn remove(&self, fact: &LocationFact) -> NotifyStats {
        let changed = {
            let mut state = self.state.lock();
            if !state.facts.remove(fact) {
                debug!(
                    service = fact.service(),
                    owner = %fact.owner(),
                    address = %fact.address(),
                    "remove ignored, location not present"
                );
                return NotifyStats::default();
            }
            state.status.remove(fact);

            info!(
                service = fact.service(),
                owner = %fact.owner(),
                address = %fact.address(),
                "removed location"
            );

            let affected = BTreeSet::from([fact.service().to_string()]);
            self.rebuild(&mut state, affected)
        };

        self.notify(&changed)
    }

    /// Enable every fact owned by `owner`.
    pub fn member_added(&self, owner: &MemberId) -> NotifyStats {
        self.set_member_status(owner, true)
    }

    /// Disable every fact owned by `owner`. The facts stay in the table and
    /// come back if the member rejoins before they are removed.
    pub fn member_removed(&self, owner: &MemberId) -> NotifyStats {
        self.set_member_status(owner, false)
    }

    fn set_member_status(&self, owner: &MemberId, enabled: bool) -> NotifyStats {
        let changed = {
            let mut state = self.state.lock();
            let owned: Vec<LocationFact> = state.facts.row(owner).cloned().collect();
            if owned.is_empty() {
                debug!(%owner, enabled, "member owns no locations");
                return NotifyStats::default();
            }

            info!(%owner, enabled, count = owned.len(), "updating member locations");

            let mut affected = BTreeSet::new();
            for fact in &owned {
                state.status.set(fact, enabled);
                affected.insert(fact.service().to_string());
            }

            self.rebuild(&mut state, affected)
        };

        self.notify(&changed)
    }

    /// Discard the published view and recompute every service from the
    /// fact table and status index.
    pub fn rebuild_all(&self) -> NotifyStats {
        let changed = {
            let mut state = self.state.lock();
            let mut affected: BTreeSet<String> =
                state.facts.services().map(str::to_string).collect();
            affected.extend(self.snapshot.load().services().map(str::to_string));
            self.rebuild(&mut state, affected)
        };

        self.notify(&changed)
    }

    /// Enabled addresses for `service` in the latest published view.
    pub fn addresses(&self, service: &str) -> Vec<Address> {
        self.snapshot.load().addresses(service).to_vec()
    }

    /// The latest published view.
    pub fn snapshot(&self) -> Arc<SnapshotView> {
        self.snapshot.load_full()
    }

    /// Services with at least one enabled address.
    pub fn services(&self) -> Vec<String> {
        self.snapshot.load().services().map(str::to_string).collect()
    }

    /// Every fact held, with its status, in no particular order.
    pub fn entries(&self) -> Vec<TableEntry> {
        let state = self.state.lock();
        collect_entries(&state)
    }

    /// Number of facts held, enabled or not.
    pub fn len(&self) -> usize {
        self.state.lock().facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().facts.is_empty()
    }

    pub fn subscribe(&self, service: &str, listener: Arc<dyn ServiceListener>) -> ListenerId {
        self.listeners.subscribe(service, listener)
    }

    pub fn subscribe_channel(
        &self,
        service: &str,
        capacity: usize,
    ) -> (ListenerId, mpsc::Receiver<ServiceChange>) {
        self.listeners.subscribe_channel(service, capacity)
    }

    pub fn unsubscribe(&self, service: &str, id: ListenerId) -> bool {
        self.listeners.unsubscribe(service, id)
    }

    pub fn subscriber_count(&self, service: &str) -> usize {
        self.listeners.subscriber_count(service)
    }

    /// Recompute `affected` and publish a new view if any of them changed.
    /// Returns the services whose address set changed.
    fn rebuild(&self, state: &mut TableState, affected: BTreeSet<String>) -> BTreeSet<String> {
        check_indexes(state);

        let current = self.snapshot.load();
        let mut services: HashMap<String, Arc<[Address]>> = current.entries().clone();
        let mut changed = BTreeSet::new();

        for service in affected {
            let mut enabled: Vec<Address> = state
                .facts
                .column(&service)
                .filter(|fact| state.status.is_enabled(fact))
                .map(|fact| fact.address().clone())
                .collect();
            enabled.sort();

            if !same_addresses(current.addresses(&service), &enabled) {
                changed.insert(service.clone());
            }

            if enabled.is_empty() {
                services.remove(&service);
            } else {
                services.insert(service, enabled.into());
            }
        }

        if changed.is_empty() {
            return changed;
        }

        state.generation += 1;
        self.snapshot
            .store(Arc::new(SnapshotView::new(services, state.generation)));

        debug!(
            generation = state.generation,
            changed = ?changed,
            "routing view published"
        );
        if tracing::enabled!(Level::DEBUG) {
            dump(state);
        }

        changed
    }

    fn notify(&self, changed: &BTreeSet<String>) -> NotifyStats {
        if changed.is_empty() {
            return NotifyStats::default();
        }
        self.listeners.notify(changed.iter().map(String::as_str))
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RoutingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingTable")
            .field("generation", &self.snapshot.load().generation())
            .field("listeners", &self.listeners)
            .finish_non_exhaustive()
    }
}

/// Order-insensitive comparison. `enabled` must already be sorted.
fn same_addresses(published: &[Address], enabled: &[Address]) -> bool {
    if published.len() != enabled.len() {
        return false;
    }
    let mut published = published.to_vec();
    published.sort();
    published == enabled
}

/// Every held fact has exactly one status entry.
fn check_indexes(state: &TableState) {
    debug_assert_eq!(state.facts.len(), state.status.len());
    debug_assert_eq!(state.facts.is_empty(), state.status.is_empty());
    debug_assert!(state.facts.iter().all(|fact| state.status.contains(fact)));
}

fn collect_entries(state: &TableState) -> Vec<TableEntry> {
    state
        .facts
        .iter()
        .map(|fact| TableEntry {
            owner: fact.owner().clone(),
            service: fact.service().to_string(),
            address: fact.address().clone(),
            enabled: state.status.is_enabled(fact),
        })
        .collect()
}

fn dump(state: &TableState) {
    for entry in collect_entries(state) {
        debug!(
            owner = %entry.owner,
            service = %entry.service,
            address = %entry.address,
            enabled = entry.enabled,
            "routing table entry"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;

    fn fact(service: &str, address: &str, owner: &str) -> LocationFact {
        LocationFact::new(service, Address::parse(address).unwrap(), owner.into()).unwrap()
    }

    fn addrs(table: &RoutingTable, service: &str) -> HashSet<String> {
        table
            .addresses(service)
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    fn set(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn counting_listener(table: &RoutingTable, service: &str) -> Arc<StdMutex<Vec<String>>> {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        table.subscribe(
            service,
            Arc::new(move |s: &str| -> anyhow::Result<()> {
                sink.lock().unwrap().push(s.to_string());
                Ok(())
            }),
        );
        seen
    }

    #[test]
    fn replaced_fact_leaves_one_status_entry() {
        let table = RoutingTable::new();
        table.put(fact("svc", "http://old:80", "m1"));
        table.put(fact("svc", "http://new:80", "m1"));
        table.member_removed(&"m1".into());
        table.member_added(&"m1".into());

        {
            let state = table.state.lock();
            assert_eq!(state.status.len(), 1);
            assert!(state.status.contains(&fact("svc", "http://new:80", "m1")));
            assert!(!state.status.contains(&fact("svc", "http://old:80", "m1")));
        }

        table.remove(&fact("svc", "http://new:80", "m1"));
        assert!(table.state.lock().status.is_empty());
        assert!(table.is_empty());
    }

    #[test]
    fn subscriber_count_tracks_unsubscribe() {
        let table = RoutingTable::new();
        let id = table.subscribe("svc", Arc::new(|_: &str| -> anyhow::Result<()> { Ok(()) }));
        let (_, _rx) = table.subscribe_channel("svc", 4);
        assert_eq!(table.subscriber_count("svc"), 2);
        assert_eq!(table.subscriber_count("other"), 0);

        assert!(table.unsubscribe("svc", id));
        assert_eq!(table.subscriber_count("svc"), 1);
    }

    #[test]
    fn membership_scenario() {
        let table = RoutingTable::new();
        table.put(fact("svc", "http://h1:80", "m1"));
        table.put(fact("svc", "http://h2:80", "m2"));
        assert_eq!(addrs(&table, "svc"), set(&["http://h1:80", "http://h2:80"]));

        table.member_removed(&"m1".into());
        assert_eq!(addrs(&table, "svc"), set(&["http://h2:80"]));

        table.member_added(&"m1".into());
        assert_eq!(addrs(&table, "svc"), set(&["http://h1:80", "http://h2:80"]));

        table.remove(&fact("svc", "http://h2:80", "m2"));
        assert_eq!(addrs(&table, "svc"), set(&["http://h1:80"]));
    }

    #[test]
    fn unknown_service_is_empty() {
        let table = RoutingTable::new();
        assert!(table.addresses("nope").is_empty());
        assert!(table.services().is_empty());
    }

    #[test]
    fn put_overwrites_same_owner_and_service() {
        let table = RoutingTable::new();
        table.put(fact("svc", "http://old:80", "m1"));
        table.put(fact("svc", "http://new:80", "m1"));

        assert_eq!(addrs(&table, "svc"), set(&["http://new:80"]));
        assert_eq!(table.len(), 1);
        // The old fact no longer matches anything, so removing it is a no-op.
        table.remove(&fact("svc", "http://old:80", "m1"));
        assert_eq!(addrs(&table, "svc"), set(&["http://new:80"]));
    }

    #[test]
    fn put_reenables_disabled_fact() {
        let table = RoutingTable::new();
        table.put(fact("svc", "http://h1:80", "m1"));
        table.member_removed(&"m1".into());
        assert!(table.addresses("svc").is_empty());

        table.put(fact("svc", "http://h1:80", "m1"));
        assert_eq!(addrs(&table, "svc"), set(&["http://h1:80"]));
    }

    #[test]
    fn member_removal_keeps_facts() {
        let table = RoutingTable::new();
        table.put(fact("svc", "http://h1:80", "m1"));
        table.member_removed(&"m1".into());

        let entries = table.entries();
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].enabled);
        assert!(!table.snapshot().contains("svc"));

        // Explicit removal still works on a disabled fact.
        table.remove(&fact("svc", "http://h1:80", "m1"));
        assert!(table.is_empty());
        table.member_added(&"m1".into());
        assert!(table.addresses("svc").is_empty());
    }

    #[test]
    fn notifies_on_change() {
        let table = RoutingTable::new();
        let seen = counting_listener(&table, "svc");

        let stats = table.put(fact("svc", "http://h1:80", "m1"));
        assert_eq!(stats.delivered, 1);
        assert_eq!(*seen.lock().unwrap(), vec!["svc"]);
    }

    #[test]
    fn identical_put_does_not_notify() {
        let table = RoutingTable::new();
        table.put(fact("svc", "http://h1:80", "m1"));
        let seen = counting_listener(&table, "svc");

        table.put(fact("svc", "http://h1:80", "m1"));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn remove_absent_is_silent() {
        let table = RoutingTable::new();
        let seen = counting_listener(&table, "svc");
        let generation = table.snapshot().generation();

        table.remove(&fact("svc", "http://h1:80", "m1"));
        table.remove(&fact("svc", "http://h1:80", "m1"));

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(table.snapshot().generation(), generation);
    }

    #[test]
    fn member_events_notify_each_service_once() {
        let table = RoutingTable::new();
        table.put(fact("api", "http://h1:80", "m1"));
        table.put(fact("web", "http://h1:81", "m1"));
        table.put(fact("db", "tcp://h2:5432", "m2"));

        let api = counting_listener(&table, "api");
        let web = counting_listener(&table, "web");
        let db = counting_listener(&table, "db");

        table.member_removed(&"m1".into());

        assert_eq!(*api.lock().unwrap(), vec!["api"]);
        assert_eq!(*web.lock().unwrap(), vec!["web"]);
        assert!(db.lock().unwrap().is_empty());
    }

    #[test]
    fn member_without_facts_is_noop() {
        let table = RoutingTable::new();
        let generation = table.snapshot().generation();
        assert_eq!(table.member_added(&"ghost".into()), NotifyStats::default());
        assert_eq!(table.member_removed(&"ghost".into()), NotifyStats::default());
        assert_eq!(table.snapshot().generation(), generation);
    }

    #[test]
    fn repeated_member_removal_notifies_once() {
        let table = RoutingTable::new();
        table.put(fact("svc", "http://h1:80", "m1"));
        let seen = counting_listener(&table, "svc");

        table.member_removed(&"m1".into());
        table.member_removed(&"m1".into());
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn listener_sees_committed_state() {
        let table = Arc::new(RoutingTable::new());
        let observed = Arc::new(StdMutex::new(Vec::new()));

        let reader = table.clone();
        let sink = observed.clone();
        table.subscribe(
            "svc",
            Arc::new(move |service: &str| -> anyhow::Result<()> {
                sink.lock().unwrap().push(reader.addresses(service).len());
                Ok(())
            }),
        );

        table.put(fact("svc", "http://h1:80", "m1"));
        table.put(fact("svc", "http://h2:80", "m2"));
        assert_eq!(*observed.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn listener_can_mutate_table() {
        let table = Arc::new(RoutingTable::new());
        let writer = table.clone();
        table.subscribe(
            "primary",
            Arc::new(move |_: &str| -> anyhow::Result<()> {
                writer.put(fact("mirror", "http://m:80", "m9"));
                Ok(())
            }),
        );

        table.put(fact("primary", "http://p:80", "m1"));
        assert_eq!(addrs(&table, "mirror"), set(&["http://m:80"]));
    }

    #[test]
    fn failing_listener_leaves_state_intact() {
        let table = RoutingTable::new();
        table.subscribe(
            "svc",
            Arc::new(|_: &str| -> anyhow::Result<()> { anyhow::bail!("listener broke") }),
        );

        let stats = table.put(fact("svc", "http://h1:80", "m1"));
        assert_eq!(stats.failed, 1);
        assert_eq!(addrs(&table, "svc"), set(&["http://h1:80"]));
    }

    #[test]
    fn rebuild_all_matches_incremental_view() {
        let table = RoutingTable::new();
        table.put(fact("api", "http://h1:80", "m1"));
        table.put(fact("api", "http://h2:80", "m2"));
        table.put(fact("web", "http://h3:80", "m2"));
        table.member_removed(&"m2".into());

        let before = table.snapshot();
        let stats = table.rebuild_all();

        assert_eq!(stats, NotifyStats::default());
        let after = table.snapshot();
        assert_eq!(after.generation(), before.generation());
        assert_eq!(addrs(&table, "api"), set(&["http://h1:80"]));
        assert!(!after.contains("web"));
    }

    #[test]
    fn channel_subscription_receives_changes() {
        let table = RoutingTable::new();
        let (_, mut rx) = table.subscribe_channel("svc", 8);

        table.put(fact("svc", "http://h1:80", "m1"));
        table.member_removed(&"m1".into());

        assert_eq!(rx.try_recv().unwrap().service, "svc");
        assert_eq!(rx.try_recv().unwrap().service, "svc");
        assert!(rx.try_recv().is_err());
    }
}

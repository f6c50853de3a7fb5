//! Host provider — an always up-to-date host list for one service.
//!
//! The provider subscribes to its service on the routing table and rebuilds
//! the host list whenever the service's addresses change. Callers pick a
//! host with round-robin `next_host`, or iterate the whole list, e.g. to
//! feed an HTTP client's failover set.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use spino_cluster::SpinoNode;
use spino_core::{Address, ListenerId, RoutingTable};
use tracing::debug;

/// A host an HTTP client can connect to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct HttpHost {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl HttpHost {
    pub fn from_address(address: &Address) -> Self {
        Self {
            scheme: address.scheme().to_string(),
            host: address.host().to_string(),
            port: address.port(),
        }
    }

    /// `host:port`, bracketing IPv6 literals.
    pub fn endpoint(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// `scheme://host:port`.
    pub fn url(&self) -> String {
        format!("{}://{}", self.scheme, self.endpoint())
    }
}

/// Tracks the hosts of one service.
///
/// Dropping the provider unsubscribes it.
pub struct HostProvider {
    service: String,
    table: Weak<RoutingTable>,
    hosts: Arc<RwLock<Vec<HttpHost>>>,
    counter: AtomicUsize,
    listener: ListenerId,
}

impl HostProvider {
    pub fn of_service(table: &Arc<RoutingTable>, service: &str) -> Self {
        let hosts = Arc::new(RwLock::new(build_hosts(&table.addresses(service))));

        // Weak, so the table's listener does not keep the table alive.
        let weak = Arc::downgrade(table);
        let target = hosts.clone();
        let listener = table.subscribe(
            service,
            Arc::new(move |service: &str| -> anyhow::Result<()> {
                let table = weak
                    .upgrade()
                    .ok_or_else(|| anyhow::anyhow!("routing table dropped"))?;
                let rebuilt = build_hosts(&table.addresses(service));
                debug!(service, count = rebuilt.len(), "rebuilt host list");
                *target.write() = rebuilt;
                Ok(())
            }),
        );
        debug!(
            service,
            subscribers = table.subscriber_count(service),
            "host provider attached"
        );

        Self {
            service: service.to_string(),
            table: Arc::downgrade(table),
            hosts,
            counter: AtomicUsize::new(0),
            listener,
        }
    }

    pub fn for_node(node: &SpinoNode, service: &str) -> Self {
        Self::of_service(node.table(), service)
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Current hosts, sorted.
    pub fn hosts(&self) -> Vec<HttpHost> {
        self.hosts.read().clone()
    }

    /// Select the next host (round-robin). `None` when the service has no
    /// live address.
    pub fn next_host(&self) -> Option<HttpHost> {
        let hosts = self.hosts.read();
        if hosts.is_empty() {
            return None;
        }

        let idx = self.counter.fetch_add(1, Ordering::Relaxed) % hosts.len();
        Some(hosts[idx].clone())
    }

    pub fn len(&self) -> usize {
        self.hosts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.read().is_empty()
    }
}

impl Drop for HostProvider {
    fn drop(&mut self) {
        if let Some(table) = self.table.upgrade() {
            table.unsubscribe(&self.service, self.listener);
        }
    }
}

/// Deduplicated, sorted hosts. Addresses that differ only by path map to
/// the same host.
fn build_hosts(addresses: &[Address]) -> Vec<HttpHost> {
    addresses
        .iter()
        .map(HttpHost::from_address)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

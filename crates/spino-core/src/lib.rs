//! spino-core — local routing view of a cluster's service locations.
//!
//! Members publish *location facts* ("service `api` is reachable at
//! `http://h1:80`, says member `m1`") and join or leave the cluster. The
//! [`RoutingTable`] reconciles both event streams into one snapshot of
//! enabled addresses per service and tells subscribers which services
//! changed.
//!
//! # Architecture
//!
//! ```text
//! RoutingTable
//!   ├── Mutex<TableState>         (writers, one critical section)
//!   │   ├── FactTable             owner × service → LocationFact
//!   │   └── StatusIndex           LocationFact → enabled
//!   ├── ArcSwap<SnapshotView>     service → [Address], lock-free reads
//!   └── ListenerRegistry          service → [ServiceListener]
//! ```
//!
//! A member leaving disables its facts instead of deleting them; they come
//! back when the member rejoins, and go away only on explicit removal.

pub mod config;
pub mod error;
pub mod fact_table;
pub mod listeners;
pub mod routing;
pub mod snapshot;
pub mod status;
pub mod types;

pub use config::SpinoConfig;
pub use error::{AddressError, SpinoError, SpinoResult};
pub use fact_table::FactTable;
pub use listeners::{ListenerId, ListenerRegistry, NotifyStats, ServiceChange, ServiceListener};
pub use routing::{RoutingTable, TableEntry};
pub use snapshot::SnapshotView;
pub use status::StatusIndex;
pub use types::{Address, LocationFact, MemberId};

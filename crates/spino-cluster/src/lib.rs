//! spino-cluster — connects a routing table to the cluster substrate.
//!
//! The substrate (group membership plus a replicated fact map) is consumed
//! through the [`Membership`] and [`FactMap`] traits. This crate also ships
//! an in-process substrate for tests and simulation.
//!
//! # Architecture
//!
//! ```text
//! SpinoNode
//!   ├── activate()/deactivate() ──► FactMap ──┐ (echo)
//!   │                                          ▼
//!   ├── RoutingTable ◄── ClusterEvents ◄── Membership / FactMap
//!   │     (directly, or through ChannelSink → EventPump task)
//!   └── addresses() / subscribe()
//! ```

pub mod events;
pub mod memory;
pub mod node;
pub mod pump;
pub mod substrate;

pub use events::{ClusterEvent, ClusterEvents};
pub use memory::{InMemoryCluster, MemberHandle};
pub use node::{SeedStats, SpinoNode};
pub use pump::{ChannelSink, EventPump, PumpStats};
pub use substrate::{FactMap, Membership, WatchId};

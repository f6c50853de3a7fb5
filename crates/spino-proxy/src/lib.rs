//! spino-proxy — client-side helpers on top of the routing view.
//!
//! # Components
//!
//! - **`hosts`** — per-service host list kept current by subscription,
//!   with round-robin selection

pub mod hosts;

pub use hosts::{HostProvider, HttpHost};

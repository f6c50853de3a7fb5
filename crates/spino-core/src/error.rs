//! Error types for Spino routing.

use thiserror::Error;

/// Result type alias for Spino operations.
pub type SpinoResult<T> = Result<T, SpinoError>;

/// Errors raised at the boundaries of the routing layer.
///
/// The routing table itself has no failure modes: every input it sees has
/// already been validated. These errors surface where values enter the
/// system (activation, config, collaborator calls).
#[derive(Debug, Error)]
pub enum SpinoError {
    #[error("service name must not be empty")]
    EmptyService,

    #[error("invalid address: {0}")]
    Address(#[from] AddressError),

    #[error("node has not been started")]
    NotStarted,

    #[error("cluster error: {0}")]
    Cluster(String),
}

/// Reasons an endpoint string is rejected by [`Address::parse`](crate::Address::parse).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("address is empty")]
    Empty,

    #[error("missing scheme in {0:?}")]
    MissingScheme(String),

    #[error("unsupported scheme in {0:?}")]
    UnsupportedScheme(String),

    #[error("missing host in {0:?}")]
    MissingHost(String),

    #[error("invalid host in {0:?}")]
    InvalidHost(String),

    #[error("user info, query or fragment not allowed in {0:?}")]
    UnsupportedComponent(String),

    #[error("missing port in {0:?} and scheme has no default")]
    MissingPort(String),

    #[error("invalid port in {0:?}")]
    InvalidPort(String),
}

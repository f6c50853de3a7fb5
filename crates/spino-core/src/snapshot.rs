//! Read-optimized service → addresses view.

use std::collections::HashMap;
use std::sync::Arc;

use crate::types::Address;

/// An immutable generation of the routing view.
///
/// Only services with at least one enabled address appear. A new
/// generation shares the address lists of services it did not touch.
#[derive(Debug, Default, Clone)]
pub struct SnapshotView {
    services: HashMap<String, Arc<[Address]>>,
    generation: u64,
}

impl SnapshotView {
    pub(crate) fn new(services: HashMap<String, Arc<[Address]>>, generation: u64) -> Self {
        Self {
            services,
            generation,
        }
    }

    /// Enabled addresses for `service`, empty if unknown. Order is not
    /// meaningful.
    pub fn addresses(&self, service: &str) -> &[Address] {
        self.services
            .get(service)
            .map(|addresses| &addresses[..])
            .unwrap_or(&[])
    }

    pub fn contains(&self, service: &str) -> bool {
        self.services.contains_key(service)
    }

    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    /// Number of rebuilds that produced a visible change before this view.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub(crate) fn entries(&self) -> &HashMap<String, Arc<[Address]>> {
        &self.services
    }
}

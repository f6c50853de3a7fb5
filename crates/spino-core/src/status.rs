//! Enabled/disabled flag per location fact.

use std::collections::HashMap;

use crate::types::LocationFact;

/// Tracks whether each fact's owner is believed to be a live member.
///
/// Holds exactly the facts present in the [`FactTable`](crate::FactTable);
/// the routing table inserts and removes in both structures together.
#[derive(Debug, Default)]
pub struct StatusIndex {
    entries: HashMap<LocationFact, bool>,
}

impl StatusIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `fact` as enabled, resetting any previous status.
    pub fn enable_new(&mut self, fact: LocationFact) {
        self.entries.insert(fact, true);
    }

    /// Change the flag of an already tracked fact. Returns the previous flag,
    /// or `None` (and does nothing) if the fact is not tracked.
    pub fn set(&mut self, fact: &LocationFact, enabled: bool) -> Option<bool> {
        self.entries
            .get_mut(fact)
            .map(|flag| std::mem::replace(flag, enabled))
    }

    pub fn remove(&mut self, fact: &LocationFact) -> Option<bool> {
        self.entries.remove(fact)
    }

    /// Untracked facts are reported as disabled.
    pub fn is_enabled(&self, fact: &LocationFact) -> bool {
        self.entries.get(fact).copied().unwrap_or(false)
    }

    pub fn contains(&self, fact: &LocationFact) -> bool {
        self.entries.contains_key(fact)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

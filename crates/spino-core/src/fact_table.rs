//! Two-key index over location facts: owner × service → fact.
//!
//! The row map answers "what did this member publish" (membership churn),
//! the column map answers "who serves this service" (rebuilds). Both maps
//! hold the same set of facts and are updated together.

use std::collections::HashMap;

use crate::types::{LocationFact, MemberId};

/// At most one fact per (owner, service) cell; inserting into an occupied
/// cell overwrites it.
#[derive(Debug, Default)]
pub struct FactTable {
    rows: HashMap<MemberId, HashMap<String, LocationFact>>,
    columns: HashMap<String, HashMap<MemberId, LocationFact>>,
}

impl FactTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the cell for `(fact.owner, fact.service)`.
    ///
    /// Returns the fact previously stored in that cell, if any.
    pub fn insert(&mut self, fact: LocationFact) -> Option<LocationFact> {
        self.columns
            .entry(fact.service().to_string())
            .or_default()
            .insert(fact.owner().clone(), fact.clone());
        self.rows
            .entry(fact.owner().clone())
            .or_default()
            .insert(fact.service().to_string(), fact)
    }

    /// Remove the cell for `(fact.owner, fact.service)` only if it holds
    /// exactly `fact`. Returns whether anything was removed.
    pub fn remove(&mut self, fact: &LocationFact) -> bool {
        if self.get(fact.owner(), fact.service()) != Some(fact) {
            return false;
        }

        if let Some(row) = self.rows.get_mut(fact.owner()) {
            row.remove(fact.service());
            if row.is_empty() {
                self.rows.remove(fact.owner());
            }
        }
        if let Some(column) = self.columns.get_mut(fact.service()) {
            column.remove(fact.owner());
            if column.is_empty() {
                self.columns.remove(fact.service());
            }
        }
        true
    }

    pub fn get(&self, owner: &MemberId, service: &str) -> Option<&LocationFact> {
        self.rows.get(owner).and_then(|row| row.get(service))
    }

    /// All facts published by `owner`.
    pub fn row(&self, owner: &MemberId) -> impl Iterator<Item = &LocationFact> {
        self.rows.get(owner).into_iter().flat_map(|row| row.values())
    }

    /// All facts for `service`, across owners.
    pub fn column(&self, service: &str) -> impl Iterator<Item = &LocationFact> {
        self.columns
            .get(service)
            .into_iter()
            .flat_map(|column| column.values())
    }

    /// Names of every service with at least one fact.
    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LocationFact> {
        self.rows.values().flat_map(|row| row.values())
    }

    pub fn len(&self) -> usize {
        self.rows.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

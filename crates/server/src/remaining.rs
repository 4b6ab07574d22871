//! Accumulated remaining-time map for one scenario run.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::Serialize;

/// Entity id → most recently reported remaining time.
///
/// Entries are only ever inserted or overwritten, never removed, so every map
/// broadcast during a run is a key-superset of the ones before it. Insertion
/// order is kept so clients see entities in the order they first appeared.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct RemainingTimes(IndexMap<String, f64>);

impl RemainingTimes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key-wise overwrite merge of one step's partial map.
    pub fn merge(&mut self, partial: HashMap<String, f64>) {
        self.0.extend(partial);
    }

    pub fn get(&self, entity: &str) -> Option<f64> {
        self.0.get(entity).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

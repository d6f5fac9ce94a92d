//! Per-run variable cache.
//!
//! The controller owns one [`VariableCache`] and hands out the
//! [`VariableStore`] of each pipeline run by UID. Entries live until the run is
//! forgotten.

use dashmap::DashMap;
use std::sync::Arc;

use super::VariableStore;

/// Variable stores keyed by pipeline UID.
#[derive(Debug, Default)]
pub struct VariableCache {
    stores: DashMap<String, Arc<VariableStore>>,
}

impl VariableCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the store of a run
    pub fn get(&self, uid: &str) -> Option<Arc<VariableStore>> {
        self.stores.get(uid).map(|entry| Arc::clone(entry.value()))
    }

    /// Get the store of a run, creating it with `init` if absent
    pub fn get_or_insert_with<F>(&self, uid: &str, init: F) -> Arc<VariableStore>
    where
        F: FnOnce() -> VariableStore,
    {
        Arc::clone(
            self.stores
                .entry(uid.to_string())
                .or_insert_with(|| Arc::new(init()))
                .value(),
        )
    }

    /// Replace the store of a run
    pub fn insert(&self, uid: impl Into<String>, store: Arc<VariableStore>) {
        self.stores.insert(uid.into(), store);
    }

    /// Drop the store of a run
    pub fn forget(&self, uid: &str) -> Option<Arc<VariableStore>> {
        self.stores.remove(uid).map(|(_, store)| store)
    }

    /// Drop every store
    pub fn clear(&self) {
        self.stores.clear();
    }

    /// Number of cached runs
    pub fn len(&self) -> usize {
        self.stores.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}

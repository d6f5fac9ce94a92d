//! Variable store shared by the compiler and the reconciler workers.
//!
//! One [`VariableStore`] exists per pipeline run. It owns the inventory, the
//! [`LocationTree`] seeded during compilation, runtime host data (gathered
//! facts, `set_fact`), and data scoped to a location for one host
//! (`register` results, loop items). All state sits behind a single
//! `parking_lot::RwLock`, so every merge is applied as a whole.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

use super::{merge_variables, Location, LocationId, LocationTree, Variables};
use crate::error::{Error, Result};
use crate::inventory::{Inventory, InventoryError};

/// Runtime data merged into one or more hosts.
#[derive(Debug, Clone, Default)]
pub struct HostMerge {
    /// Target hosts
    pub hosts: Vec<String>,
    /// Restrict the data to this location (and its descendants)
    pub location: Option<LocationId>,
    /// Data to merge, incoming keys win
    pub data: Variables,
}

impl HostMerge {
    /// Host-level data for a single host.
    pub fn host(host: impl Into<String>, data: Variables) -> Self {
        Self {
            hosts: vec![host.into()],
            location: None,
            data,
        }
    }

    /// Location-scoped data for a single host.
    pub fn scoped(host: impl Into<String>, location: LocationId, data: Variables) -> Self {
        Self {
            hosts: vec![host.into()],
            location: Some(location),
            data,
        }
    }
}

#[derive(Debug, Default)]
struct StoreState {
    inventory: Inventory,
    runtime: HashMap<String, Variables>,
    locations: LocationTree,
    scoped: HashMap<(String, LocationId), Variables>,
}

/// Per-run variable store.
#[derive(Debug)]
pub struct VariableStore {
    state: RwLock<StoreState>,
    next_id: AtomicU64,
}

impl Default for VariableStore {
    fn default() -> Self {
        Self::new(Inventory::default())
    }
}

impl VariableStore {
    /// Create a store over an inventory.
    pub fn new(inventory: Inventory) -> Self {
        Self {
            state: RwLock::new(StoreState {
                inventory,
                ..StoreState::default()
            }),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a store whose lowest variable layer is `base`, beneath the
    /// inventory vars.
    pub fn with_base_vars(mut inventory: Inventory, base: &Variables) -> Self {
        let mut vars = base.clone();
        merge_variables(&mut vars, &inventory.vars);
        inventory.vars = vars;
        Self::new(inventory)
    }

    /// Allocate a fresh location id.
    pub fn next_location_id(&self) -> LocationId {
        LocationId::new(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Insert or update a location node.
    pub fn merge_location(&self, location: Location) -> Result<()> {
        trace!(id = %location.id, parent = %location.parent, name = %location.name, "merge location");
        let mut state = self.state.write();
        state.locations.merge(location)?;
        Ok(())
    }

    /// Merge runtime data into hosts.
    ///
    /// Without a location the data joins the host layer; with one it is only
    /// visible to tasks at or below that location.
    pub fn merge_host(&self, merge: HostMerge) -> Result<()> {
        let mut state = self.state.write();
        for host in &merge.hosts {
            if !state.inventory.contains_host(host) {
                return Err(InventoryError::HostNotFound(host.clone()).into());
            }
        }
        if let Some(location) = merge.location {
            if state.locations.get(location).is_none() {
                return Err(Error::LocationNotFound(location.get()));
            }
        }

        for host in merge.hosts {
            let target = match merge.location {
                Some(location) => state.scoped.entry((host, location)).or_default(),
                None => state.runtime.entry(host).or_default(),
            };
            for (key, value) in &merge.data {
                target.insert(key.clone(), value.clone());
            }
        }
        Ok(())
    }

    /// Resolved variables of a host: inventory, groups, host, then runtime
    /// data.
    pub fn host_vars(&self, host: &str) -> Result<Variables> {
        let state = self.state.read();
        Self::host_layer(&state, host)
    }

    fn host_layer(state: &StoreState, host: &str) -> Result<Variables> {
        let mut vars = state.inventory.host_vars(host)?;
        if let Some(runtime) = state.runtime.get(host) {
            merge_variables(&mut vars, runtime);
        }
        Ok(vars)
    }

    /// Variables visible to a task at `location` running on `host`.
    ///
    /// Layers, lowest first: special variables, the vars of the location's
    /// ancestors (nearest wins), the host layer, the location's own vars,
    /// then data scoped to the chain for this host.
    pub fn location_vars(&self, host: &str, location: LocationId) -> Result<Variables> {
        let state = self.state.read();
        let chain = state.locations.ancestry(location)?;
        let (own, ancestors) = match chain.split_first() {
            Some((own, ancestors)) => (Some(*own), ancestors),
            None => (None, &[][..]),
        };

        let mut vars = Variables::new();
        vars.insert(
            "inventory_hostname".to_string(),
            Value::String(host.to_string()),
        );
        let groups = state.inventory.group_map()?;
        vars.insert("groups".to_string(), serde_json::to_value(groups)?);

        for node in ancestors.iter().rev() {
            merge_variables(&mut vars, &node.vars);
        }
        merge_variables(&mut vars, &Self::host_layer(&state, host)?);
        if let Some(own) = own {
            merge_variables(&mut vars, &own.vars);
        }
        for node in chain.iter().rev() {
            if let Some(scoped) = state.scoped.get(&(host.to_string(), node.id)) {
                merge_variables(&mut vars, scoped);
            }
        }
        Ok(vars)
    }

    /// Snapshot of a location.
    pub fn location(&self, id: LocationId) -> Option<Location> {
        self.state.read().locations.get(id).cloned()
    }

    /// Parent of a location.
    pub fn parent_location(&self, id: LocationId) -> Option<LocationId> {
        self.state.read().locations.parent(id)
    }

    /// Snapshot of a location's ancestry, nearest first.
    pub fn ancestry(&self, id: LocationId) -> Result<Vec<Location>> {
        let state = self.state.read();
        Ok(state
            .locations
            .ancestry(id)?
            .into_iter()
            .cloned()
            .collect())
    }

    /// Number of locations merged so far.
    pub fn location_count(&self) -> usize {
        self.state.read().locations.len()
    }

    /// Expand host patterns against the inventory.
    pub fn expand_hosts(&self, patterns: &[String]) -> Result<Vec<String>> {
        Ok(self.state.read().inventory.expand(patterns)?)
    }

    /// Whether a host is known to the inventory.
    pub fn contains_host(&self, host: &str) -> bool {
        self.state.read().inventory.contains_host(host)
    }
}

//! Location arena for the variable-scope tree.
//!
//! Every play, role, and block instance produced by the compiler becomes a
//! [`Location`]. Locations reference their parent by [`LocationId`], never by
//! pointer, so the tree is a flat map that serializes trivially.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use super::{merge_variables, Variables};
use crate::error::{Error, Result};

/// Identifier of a location. `0` is the virtual root.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct LocationId(u64);

impl LocationId {
    /// The virtual root every top-level location hangs from.
    pub const ROOT: LocationId = LocationId(0);

    /// Wrap a raw id.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw id value.
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Whether this is the virtual root.
    pub const fn is_root(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Section of the enclosing block a location belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationKind {
    /// Main body (also used for plays and roles)
    #[default]
    Block,
    /// `rescue` section
    Rescue,
    /// `always` section
    Always,
}

impl fmt::Display for LocationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocationKind::Block => write!(f, "block"),
            LocationKind::Rescue => write!(f, "rescue"),
            LocationKind::Always => write!(f, "always"),
        }
    }
}

/// A node of the variable-scope tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Unique id, never [`LocationId::ROOT`]
    pub id: LocationId,
    /// Parent id, [`LocationId::ROOT`] for top-level locations
    pub parent: LocationId,
    /// Section kind
    pub kind: LocationKind,
    /// Display name (play, role, or block name)
    pub name: String,
    /// Variables declared at this scope
    #[serde(default)]
    pub vars: Variables,
}

impl Location {
    /// Create a location without variables.
    pub fn new(
        id: LocationId,
        parent: LocationId,
        kind: LocationKind,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id,
            parent,
            kind,
            name: name.into(),
            vars: Variables::new(),
        }
    }

    /// Attach variables.
    pub fn with_vars(mut self, vars: Variables) -> Self {
        self.vars = vars;
        self
    }
}

/// Flat arena of locations keyed by id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocationTree {
    nodes: IndexMap<LocationId, Location>,
}

impl LocationTree {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a location.
    ///
    /// A new location's parent must already be present (or be the root).
    /// Updating an existing location replaces its parent, kind, and name and
    /// merges the incoming vars over the stored ones. Any merge that would
    /// make a location its own ancestor is rejected.
    pub fn merge(&mut self, location: Location) -> Result<()> {
        if location.id.is_root() {
            return Err(Error::InvalidLocation {
                id: location.id.get(),
                name: location.name,
                message: "id 0 is reserved for the root".into(),
            });
        }
        if !location.parent.is_root() && !self.nodes.contains_key(&location.parent) {
            return Err(Error::DanglingLocation {
                id: location.id.get(),
                name: location.name,
                parent: location.parent.get(),
            });
        }
        if self.would_cycle(location.id, location.parent) {
            return Err(Error::InvalidLocation {
                id: location.id.get(),
                name: location.name,
                message: format!("parent {} is a descendant", location.parent),
            });
        }

        match self.nodes.get_mut(&location.id) {
            Some(existing) => {
                existing.parent = location.parent;
                existing.kind = location.kind;
                existing.name = location.name;
                merge_variables(&mut existing.vars, &location.vars);
            }
            None => {
                self.nodes.insert(location.id, location);
            }
        }
        Ok(())
    }

    fn would_cycle(&self, id: LocationId, parent: LocationId) -> bool {
        let mut current = parent;
        let mut seen = HashSet::new();
        while !current.is_root() {
            if current == id || !seen.insert(current) {
                return true;
            }
            match self.nodes.get(&current) {
                Some(node) => current = node.parent,
                None => break,
            }
        }
        false
    }

    /// Get a location.
    pub fn get(&self, id: LocationId) -> Option<&Location> {
        self.nodes.get(&id)
    }

    /// Get a location's parent id.
    pub fn parent(&self, id: LocationId) -> Option<LocationId> {
        self.nodes.get(&id).map(|l| l.parent)
    }

    /// Locations from `id` up to the top-level ancestor, nearest first.
    ///
    /// Always terminates: a revisited id stops the walk.
    pub fn ancestry(&self, id: LocationId) -> Result<Vec<&Location>> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut current = id;
        while !current.is_root() && seen.insert(current) {
            let node = self
                .nodes
                .get(&current)
                .ok_or(Error::LocationNotFound(current.get()))?;
            chain.push(node);
            current = node.parent;
        }
        Ok(chain)
    }

    /// Variables visible at `id`, merged root first so the nearest scope wins.
    pub fn resolve(&self, id: LocationId) -> Result<Variables> {
        let mut vars = Variables::new();
        for node in self.ancestry(id)?.iter().rev() {
            merge_variables(&mut vars, &node.vars);
        }
        Ok(vars)
    }

    /// Number of locations.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterate locations in merge order.
    pub fn iter(&self) -> impl Iterator<Item = &Location> {
        self.nodes.values()
    }
}

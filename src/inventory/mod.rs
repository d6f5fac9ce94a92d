//! Inventory and host-group resolution for kubekit.
//!
//! This module provides:
//! - the inventory model: hosts with vars, top-level vars, and groups that
//!   list hosts and other groups
//! - host pattern expansion into an ordered, duplicate-free host list
//! - the per-host variable layering (inventory, groups, host)
//! - serial batch partitioning, see [`serial`]
//!
//! # Host Patterns
//!
//! - `all`: every host, declared hosts first
//! - `<host>`: a single declared host
//! - `<group>`: all hosts of a group, including child groups
//! - `<name>[<index>]`: the host at `index` in the expansion of `name`
//!
//! A pattern string may contain several comma-separated patterns.

pub mod serial;

pub use serial::{partition, plan_batches, SerialValue};

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::vars::{deserialize_vars, merge_variables, Variables};

/// Errors that can occur during inventory operations
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("host not found: {0}")]
    HostNotFound(String),

    #[error("group not found: {0}")]
    GroupNotFound(String),

    #[error("host pattern '{0}' matches no host or group")]
    UnknownPattern(String),

    #[error("invalid host pattern: {0}")]
    InvalidPattern(String),

    #[error("circular group dependency detected: {0}")]
    CircularDependency(String),

    #[error("invalid serial value: {0}")]
    InvalidSerial(String),
}

/// Result type for inventory operations
pub type InventoryResult<T> = Result<T, InventoryError>;

/// Regex pattern for `name[index]` host selectors
static INDEXED_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<name>[^\[\]]+)\[(?P<index>\d+)\]$").expect("Invalid indexed host regex")
});

/// Name of the implicit group containing every host.
pub const ALL_GROUP: &str = "all";

/// Variables declared for a single host.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Host {
    /// Host-level variables
    pub vars: Variables,
}

impl<'de> Deserialize<'de> for Host {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Host {
            vars: deserialize_vars(deserializer)?,
        })
    }
}

/// A named group of hosts and child groups.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Group {
    /// Child groups whose hosts belong to this group
    #[serde(default)]
    pub groups: Vec<String>,
    /// Hosts listed directly
    #[serde(default)]
    pub hosts: Vec<String>,
    /// Group-level variables
    #[serde(default, deserialize_with = "deserialize_vars")]
    pub vars: Variables,
}

/// The inventory: hosts, groups, and inventory-wide variables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Inventory {
    /// Declared hosts in declaration order
    #[serde(default)]
    pub hosts: IndexMap<String, Host>,
    /// Inventory-wide variables
    #[serde(default, deserialize_with = "deserialize_vars")]
    pub vars: Variables,
    /// Groups in declaration order
    #[serde(default)]
    pub groups: IndexMap<String, Group>,
}

impl Inventory {
    /// Create an empty inventory
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an inventory from YAML (or JSON) and validate its groups
    pub fn from_yaml(content: &str) -> InventoryResult<Self> {
        let inventory: Inventory = serde_yaml::from_str(content)?;
        inventory.validate()?;
        Ok(inventory)
    }

    /// Load an inventory file
    pub fn load(path: impl AsRef<Path>) -> InventoryResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Add a host with variables
    pub fn add_host(&mut self, name: impl Into<String>, vars: Variables) -> &mut Self {
        self.hosts.insert(name.into(), Host { vars });
        self
    }

    /// Add a group
    pub fn add_group(&mut self, name: impl Into<String>, group: Group) -> &mut Self {
        self.groups.insert(name.into(), group);
        self
    }

    /// Check that every child group exists and no group contains itself
    pub fn validate(&self) -> InventoryResult<()> {
        for name in self.groups.keys() {
            self.group_hosts(name)?;
        }
        Ok(())
    }

    /// Whether a host is declared or listed by any group
    pub fn contains_host(&self, host: &str) -> bool {
        self.hosts.contains_key(host)
            || self
                .groups
                .values()
                .any(|g| g.hosts.iter().any(|h| h == host))
    }

    /// All hosts: declared hosts first, then hosts only listed by groups
    pub fn all_hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self.hosts.keys().cloned().collect();
        for group in self.groups.values() {
            for host in &group.hosts {
                if !hosts.contains(host) {
                    hosts.push(host.clone());
                }
            }
        }
        hosts
    }

    /// Hosts of a group including its child groups, in listing order
    pub fn group_hosts(&self, name: &str) -> InventoryResult<Vec<String>> {
        let mut stack = Vec::new();
        let mut hosts = Vec::new();
        self.collect_group(name, &mut stack, &mut hosts)?;
        Ok(hosts)
    }

    fn collect_group(
        &self,
        name: &str,
        stack: &mut Vec<String>,
        out: &mut Vec<String>,
    ) -> InventoryResult<()> {
        if stack.iter().any(|g| g == name) {
            let mut chain = stack.join(" -> ");
            chain.push_str(" -> ");
            chain.push_str(name);
            return Err(InventoryError::CircularDependency(chain));
        }
        let group = self
            .groups
            .get(name)
            .ok_or_else(|| InventoryError::GroupNotFound(name.to_string()))?;

        stack.push(name.to_string());
        for host in &group.hosts {
            push_unique(out, host);
        }
        for child in &group.groups {
            self.collect_group(child, stack, out)?;
        }
        stack.pop();
        Ok(())
    }

    /// Expand host patterns into an ordered, duplicate-free host list
    pub fn expand(&self, patterns: &[String]) -> InventoryResult<Vec<String>> {
        let mut hosts = Vec::new();
        for pattern in patterns.iter().flat_map(|p| p.split(',')) {
            let pattern = pattern.trim();
            if pattern.is_empty() {
                continue;
            }
            for host in self.expand_one(pattern)? {
                push_unique(&mut hosts, &host);
            }
        }
        Ok(hosts)
    }

    fn expand_one(&self, pattern: &str) -> InventoryResult<Vec<String>> {
        if let Some(caps) = INDEXED_PATTERN.captures(pattern) {
            let name = &caps["name"];
            let index: usize = caps["index"]
                .parse()
                .map_err(|_| InventoryError::InvalidPattern(pattern.to_string()))?;
            let hosts = self.expand_one(name)?;
            return hosts
                .get(index)
                .map(|h| vec![h.clone()])
                .ok_or_else(|| InventoryError::InvalidPattern(pattern.to_string()));
        }

        if pattern == ALL_GROUP && !self.groups.contains_key(ALL_GROUP) {
            return Ok(self.all_hosts());
        }
        if self.hosts.contains_key(pattern) {
            return Ok(vec![pattern.to_string()]);
        }
        if self.groups.contains_key(pattern) {
            return self.group_hosts(pattern);
        }
        if self.contains_host(pattern) {
            return Ok(vec![pattern.to_string()]);
        }
        Err(InventoryError::UnknownPattern(pattern.to_string()))
    }

    /// Groups containing a host directly or through child groups, in
    /// declaration order
    pub fn groups_of(&self, host: &str) -> InventoryResult<Vec<&str>> {
        let mut names = Vec::new();
        for name in self.groups.keys() {
            if self.group_hosts(name)?.iter().any(|h| h == host) {
                names.push(name.as_str());
            }
        }
        Ok(names)
    }

    /// Resolve a host's inventory variables: inventory vars, then group vars
    /// in declaration order, then host vars
    pub fn host_vars(&self, host: &str) -> InventoryResult<Variables> {
        if !self.contains_host(host) {
            return Err(InventoryError::HostNotFound(host.to_string()));
        }
        let mut vars = self.vars.clone();
        for name in self.groups_of(host)? {
            if let Some(group) = self.groups.get(name) {
                merge_variables(&mut vars, &group.vars);
            }
        }
        if let Some(h) = self.hosts.get(host) {
            merge_variables(&mut vars, &h.vars);
        }
        Ok(vars)
    }

    /// Every group with its expanded hosts, plus the implicit `all` group
    pub fn group_map(&self) -> InventoryResult<IndexMap<String, Vec<String>>> {
        let mut map = IndexMap::new();
        map.insert(ALL_GROUP.to_string(), self.all_hosts());
        for name in self.groups.keys() {
            map.insert(name.clone(), self.group_hosts(name)?);
        }
        Ok(map)
    }
}

fn push_unique(list: &mut Vec<String>, item: &str) {
    if !list.iter().any(|h| h == item) {
        list.push(item.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const INVENTORY: &str = r#"
hosts:
  node1:
    ip: 10.0.0.1
  node2:
    ip: 10.0.0.2
  node3:
vars:
  cluster: demo
groups:
  etcd:
    hosts: [node1]
  control_plane:
    hosts: [node1, node2]
    vars:
      role: master
  worker:
    hosts: [node3, node2]
  k8s_cluster:
    groups: [control_plane, worker]
"#;

    fn s(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_parse_inventory() {
        let inv = Inventory::from_yaml(INVENTORY).unwrap();
        assert_eq!(inv.hosts.len(), 3);
        assert_eq!(inv.groups.len(), 4);
        assert!(inv.hosts["node3"].vars.is_empty());
        assert_eq!(inv.vars["cluster"], json!("demo"));
    }

    #[test]
    fn test_expand_groups_and_hosts() {
        let inv = Inventory::from_yaml(INVENTORY).unwrap();
        assert_eq!(
            inv.expand(&s(&["k8s_cluster"])).unwrap(),
            s(&["node1", "node2", "node3"])
        );
        assert_eq!(
            inv.expand(&s(&["worker", "etcd"])).unwrap(),
            s(&["node3", "node2", "node1"])
        );
        assert_eq!(inv.expand(&s(&["node2,node2"])).unwrap(), s(&["node2"]));
    }

    #[test]
    fn test_expand_all() {
        let inv = Inventory::from_yaml(INVENTORY).unwrap();
        assert_eq!(
            inv.expand(&s(&["all"])).unwrap(),
            s(&["node1", "node2", "node3"])
        );
    }

    #[test]
    fn test_expand_indexed() {
        let inv = Inventory::from_yaml(INVENTORY).unwrap();
        assert_eq!(inv.expand(&s(&["worker[1]"])).unwrap(), s(&["node2"]));
        assert!(matches!(
            inv.expand(&s(&["worker[5]"])),
            Err(InventoryError::InvalidPattern(_))
        ));
    }

    #[test]
    fn test_expand_unknown() {
        let inv = Inventory::from_yaml(INVENTORY).unwrap();
        assert!(matches!(
            inv.expand(&s(&["nope"])),
            Err(InventoryError::UnknownPattern(_))
        ));
    }

    #[test]
    fn test_cycle_detected() {
        let yaml = r#"
groups:
  a:
    groups: [b]
  b:
    groups: [a]
"#;
        let err = Inventory::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, InventoryError::CircularDependency(_)));
    }

    #[test]
    fn test_unknown_child_group() {
        let yaml = "groups:\n  a:\n    groups: [missing]\n";
        assert!(matches!(
            Inventory::from_yaml(yaml),
            Err(InventoryError::GroupNotFound(_))
        ));
    }

    #[test]
    fn test_host_vars_layering() {
        let mut inv = Inventory::new();
        inv.vars = crate::vars::to_variables(json!({"a": 4, "b": 5, "c": 6})).unwrap();
        inv.add_host("h1", crate::vars::to_variables(json!({"a": 1})).unwrap());
        inv.add_group(
            "g",
            Group {
                hosts: s(&["h1"]),
                vars: crate::vars::to_variables(json!({"a": 2, "b": 3})).unwrap(),
                ..Group::default()
            },
        );
        let vars = inv.host_vars("h1").unwrap();
        assert_eq!(
            vars,
            crate::vars::to_variables(json!({"a": 1, "b": 3, "c": 6})).unwrap()
        );
    }

    #[test]
    fn test_group_order_for_vars() {
        let inv = Inventory::from_yaml(INVENTORY).unwrap();
        assert_eq!(
            inv.groups_of("node2").unwrap(),
            vec!["control_plane", "worker", "k8s_cluster"]
        );
        let vars = inv.host_vars("node2").unwrap();
        assert_eq!(vars["role"], json!("master"));
        assert_eq!(vars["ip"], json!("10.0.0.2"));
        assert!(matches!(
            inv.host_vars("ghost"),
            Err(InventoryError::HostNotFound(_))
        ));
    }

    #[test]
    fn test_group_map() {
        let inv = Inventory::from_yaml(INVENTORY).unwrap();
        let map = inv.group_map().unwrap();
        assert_eq!(map["all"].len(), 3);
        assert_eq!(map["etcd"], s(&["node1"]));
    }
}

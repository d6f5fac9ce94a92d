//! Variable system for kubekit.
//!
//! This module provides:
//! - [`Variables`], the ordered key/value mapping used for every scope
//! - deep merging of variable layers
//! - the [`LocationTree`] arena of play, role, and block scopes
//! - the [`VariableStore`] resolving variables per host and per location
//! - a per-run [`VariableCache`] keyed by pipeline UID
//! - template rendering and condition evaluation ([`TemplateEngine`])
//!
//! # Precedence
//!
//! For a host, layers apply lowest first and later layers overwrite keys
//! from earlier ones:
//!
//! 1. inventory vars
//! 2. group vars, in group declaration order
//! 3. host vars
//! 4. gathered facts and runtime host merges
//!
//! For a task, the vars of its enclosing locations are merged root first
//! (nearest wins), the host's variables are laid over them, and finally the
//! task's own location vars and any data scoped to the chain for that host.

pub mod cache;
pub mod location;
pub mod store;
pub mod template;

pub use cache::VariableCache;
pub use location::{Location, LocationId, LocationKind, LocationTree};
pub use store::{HostMerge, VariableStore};
pub use template::TemplateEngine;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Ordered variable mapping.
pub type Variables = IndexMap<String, Value>;

/// Merge `overlay` into `base`.
///
/// Nested objects are merged recursively, every other value in `overlay`
/// replaces the one in `base`.
pub fn merge_variables(base: &mut Variables, overlay: &Variables) {
    for (key, value) in overlay {
        match base.get_mut(key) {
            Some(existing) => deep_merge(existing, value),
            None => {
                base.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Deep merge two JSON values in place, `overlay` wins on conflicts.
pub fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

/// Convert an arbitrary value into [`Variables`].
///
/// `null` yields an empty mapping; anything other than an object is `None`.
pub fn to_variables(value: Value) -> Option<Variables> {
    match value {
        Value::Null => Some(Variables::new()),
        Value::Object(map) => Some(map.into_iter().collect()),
        _ => None,
    }
}

/// Deserialize a variable mapping, accepting `null` as empty.
///
/// Used with `#[serde(default, deserialize_with = "...")]` on `vars` keys,
/// which YAML authors often leave blank.
pub fn deserialize_vars<'de, D>(deserializer: D) -> Result<Variables, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Variables>::deserialize(deserializer)?.unwrap_or_default())
}

/// Look up a dotted path (`os.release.ID`) in a variable mapping.
pub fn lookup_path<'a>(vars: &'a Variables, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = vars.get(parts.next()?)?;
    for part in parts {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Render a value as plain text: strings without quotes, everything else as JSON.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(value: Value) -> Variables {
        to_variables(value).unwrap()
    }

    #[test]
    fn test_merge_overwrites_scalars() {
        let mut base = vars(json!({"a": 1, "b": 2}));
        merge_variables(&mut base, &vars(json!({"a": 3, "c": 4})));
        assert_eq!(base, vars(json!({"a": 3, "b": 2, "c": 4})));
    }

    #[test]
    fn test_merge_nested_objects() {
        let mut base = vars(json!({"kube": {"version": "v1.28", "arch": "amd64"}}));
        merge_variables(&mut base, &vars(json!({"kube": {"version": "v1.29"}})));
        assert_eq!(
            base,
            vars(json!({"kube": {"version": "v1.29", "arch": "amd64"}}))
        );
    }

    #[test]
    fn test_merge_replaces_lists() {
        let mut base = vars(json!({"items": [1, 2, 3]}));
        merge_variables(&mut base, &vars(json!({"items": [4]})));
        assert_eq!(base["items"], json!([4]));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let overlay = vars(json!({"a": {"b": 1}, "c": [1]}));
        let mut once = vars(json!({"a": {"x": 0}}));
        merge_variables(&mut once, &overlay);
        let mut twice = once.clone();
        merge_variables(&mut twice, &overlay);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_to_variables() {
        assert!(to_variables(Value::Null).unwrap().is_empty());
        assert!(to_variables(json!([1])).is_none());
        assert_eq!(to_variables(json!({"k": "v"})).unwrap()["k"], json!("v"));
    }

    #[test]
    fn test_lookup_path() {
        let v = vars(json!({"os": {"release": {"ID": "ubuntu"}}, "list": [10, 20]}));
        assert_eq!(lookup_path(&v, "os.release.ID"), Some(&json!("ubuntu")));
        assert_eq!(lookup_path(&v, "list.1"), Some(&json!(20)));
        assert_eq!(lookup_path(&v, "os.missing"), None);
        assert_eq!(lookup_path(&v, "missing"), None);
    }

    #[test]
    fn test_value_to_string() {
        assert_eq!(value_to_string(&json!("text")), "text");
        assert_eq!(value_to_string(&json!(3)), "3");
        assert_eq!(value_to_string(&Value::Null), "");
    }
}

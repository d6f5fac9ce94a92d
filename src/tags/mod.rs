//! Tag evaluation for plays, roles, blocks, and tasks.
//!
//! A tagged unit is included or excluded by two filter lists: the requested
//! tags (`only`) and the skipped tags (`skip`). Evaluation is a pure function
//! of three tag sets and never fails.
//!
//! # Reserved Tags
//!
//! - `always`: selected even when the requested tags do not mention it
//! - `never`: not selected through `all` or `tagged`
//! - `all`: in the requested list, selects every unit not tagged `never`
//! - `tagged`: in the requested list, behaves like `all`; in the skip list,
//!   excludes every unit that carries at least one tag
//!
//! # Tag Inheritance
//!
//! A nested unit carries the union of its own tags and every ancestor's tags,
//! see [`inherit`].
//!
//! # Example
//!
//! ```rust
//! use kubekit::tags::TagFilter;
//!
//! let filter = TagFilter::new()
//!     .with_tags(vec!["etcd".to_string()])
//!     .with_skip_tags(vec!["certs".to_string()]);
//!
//! assert!(filter.is_enabled(&["etcd".to_string()]));
//! assert!(!filter.is_enabled(&["etcd".to_string(), "certs".to_string()]));
//! assert!(!filter.is_enabled(&["kubelet".to_string()]));
//! ```

mod filter;
mod inheritance;

pub use filter::TagFilter;
pub use inheritance::inherit;

/// Reserved tag names
pub mod special {
    /// Unit runs whenever requested tags are given, whatever they are
    pub const ALWAYS: &str = "always";

    /// Unit is not selected through `all` or `tagged`
    pub const NEVER: &str = "never";

    /// Matches any unit that has at least one tag
    pub const TAGGED: &str = "tagged";

    /// Matches all units
    pub const ALL: &str = "all";
}

/// Check if a tag is a reserved tag
pub fn is_special_tag(tag: &str) -> bool {
    matches!(
        tag,
        special::ALWAYS | special::NEVER | special::TAGGED | special::ALL
    )
}

fn contains(set: &[String], tag: &str) -> bool {
    set.iter().any(|t| t == tag)
}

fn intersects(a: &[String], b: &[String]) -> bool {
    a.iter().any(|t| contains(b, t))
}

/// Decide whether a unit carrying `tags` is enabled under the requested
/// (`only`) and skipped (`skip`) tag lists.
///
/// The requested list is applied first, then the skip list narrows the
/// result. With both lists empty every unit is enabled.
pub fn is_enabled(tags: &[String], only: &[String], skip: &[String]) -> bool {
    let mut enabled = true;

    if !only.is_empty() {
        let never = contains(tags, special::NEVER);
        enabled = contains(tags, special::ALWAYS)
            || (contains(only, special::ALL) && !never)
            || (contains(only, special::TAGGED) && !never)
            || intersects(tags, only);
    }

    if enabled && !skip.is_empty() {
        if contains(skip, special::ALL) {
            // skip [all, always] still keeps units tagged always
            return contains(tags, special::ALWAYS) && contains(skip, special::ALWAYS);
        }
        if intersects(tags, skip) {
            enabled = false;
        } else if contains(skip, special::TAGGED) && !tags.is_empty() {
            enabled = false;
        }
    }

    enabled
}

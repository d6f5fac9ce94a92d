//! Tag inheritance from enclosing plays, roles, and blocks.

/// Effective tags of a nested unit: its own tags plus every inherited tag,
/// duplicates removed.
///
/// `inherited` is the effective tag set of the parent, so applying this at
/// every level yields the union over the whole ancestor chain.
pub fn inherit(inherited: &[String], own: &[String]) -> Vec<String> {
    let mut tags: Vec<String> = Vec::with_capacity(inherited.len() + own.len());
    for tag in own.iter().chain(inherited.iter()) {
        if !tags.contains(tag) {
            tags.push(tag.clone());
        }
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_inherit_union() {
        let tags = inherit(&tags(&["play", "common"]), &tags(&["task", "common"]));
        assert_eq!(tags, vec!["task", "common", "play"]);
    }

    #[test]
    fn test_inherit_empty_parent() {
        assert_eq!(inherit(&[], &tags(&["a"])), vec!["a"]);
        assert!(inherit(&[], &[]).is_empty());
    }

    #[test]
    fn test_inherit_chain() {
        let role = inherit(&tags(&["play"]), &tags(&["role"]));
        let block = inherit(&role, &tags(&["block"]));
        let task = inherit(&block, &[]);
        for t in ["play", "role", "block"] {
            assert!(task.contains(&t.to_string()));
        }
    }
}

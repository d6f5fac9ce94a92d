//! Tag evaluation tests
//!
//! Covers the reserved tags, the skip list, inheritance through roles and
//! blocks, and tag-driven play and task selection in the compiler.

mod common;

use common::*;
use kubekit::playbook::Playbook;
use kubekit::tags::{inherit, is_enabled, TagFilter};

fn enabled(tags: &[&str], only: &[&str], skip: &[&str]) -> bool {
    is_enabled(&strings(tags), &strings(only), &strings(skip))
}

// ============================================================================
// Requested tags
// ============================================================================

#[test]
fn test_no_filters_enable_everything() {
    assert!(enabled(&[], &[], &[]));
    assert!(enabled(&["a"], &[], &[]));
    assert!(enabled(&["never"], &[], &[]));
}

#[test]
fn test_only_tags_intersection() {
    assert!(enabled(&["a", "b"], &["b"], &[]));
    assert!(!enabled(&["a"], &["b"], &[]));
    assert!(!enabled(&[], &["b"], &[]));
}

#[test]
fn test_always_tag_survives_only_tags() {
    assert!(enabled(&["always"], &["b"], &[]));
    assert!(enabled(&["always", "never"], &["b"], &[]));
}

#[test]
fn test_all_and_tagged_respect_never() {
    assert!(enabled(&["a"], &["all"], &[]));
    assert!(enabled(&[], &["all"], &[]));
    assert!(!enabled(&["never"], &["all"], &[]));
    assert!(enabled(&["x"], &["tagged"], &[]));
    assert!(!enabled(&["never"], &["tagged"], &[]));
}

#[test]
fn test_never_tag_selected_by_name() {
    assert!(enabled(&["never", "debug"], &["debug"], &[]));
}

// ============================================================================
// Skip tags
// ============================================================================

#[test]
fn test_skip_tags_intersection() {
    assert!(!enabled(&["a", "slow"], &[], &["slow"]));
    assert!(enabled(&["a"], &[], &["slow"]));
    assert!(!enabled(&["a", "slow"], &["a"], &["slow"]));
}

#[test]
fn test_skip_all() {
    assert!(!enabled(&["a"], &[], &["all"]));
    assert!(!enabled(&[], &[], &["all"]));
    assert!(!enabled(&["always"], &[], &["all"]));
    assert!(enabled(&["always"], &[], &["all", "always"]));
    assert!(enabled(&["always", "a"], &[], &["all", "always"]));
    assert!(!enabled(&["a"], &[], &["all", "always"]));
}

#[test]
fn test_skip_tagged_only_hits_tagged_units() {
    assert!(!enabled(&["a"], &[], &["tagged"]));
    assert!(enabled(&[], &[], &["tagged"]));
}

// ============================================================================
// Inheritance
// ============================================================================

#[test]
fn test_inherit_unions_without_duplicates() {
    let tags = inherit(&strings(&["role", "shared"]), &strings(&["shared", "task"]));
    assert_eq!(tags.len(), 3);
    for tag in ["role", "shared", "task"] {
        assert!(tags.iter().any(|t| t == tag));
    }
}

#[test]
fn test_filter_builder() {
    let filter = TagFilter::new()
        .with_tags(strings(&["etcd"]))
        .with_skip_tags(strings(&["certs"]));
    assert!(filter.is_active());
    assert!(filter.is_enabled(&strings(&["etcd"])));
    assert!(!filter.is_enabled(&strings(&["etcd", "certs"])));
    assert!(!TagFilter::new().with_tags(vec![]).is_active());
}

// ============================================================================
// Compiler selection
// ============================================================================

const TAGGED_PLAYBOOK: &str = r#"
- name: tagged play
  hosts: [h1]
  tasks:
    - name: only task
      tags: [a]
      debug:
        msg: hello
"#;

#[tokio::test]
async fn test_only_tags_select_tasks() {
    let playbook = Playbook::from_yaml(TAGGED_PLAYBOOK, "site.yaml").unwrap();

    let selected = compiler(inventory(&["h1"]))
        .with_filter(TagFilter::new().with_tags(strings(&["a"])))
        .compile(&playbook)
        .await
        .unwrap();
    assert_eq!(selected.len(), 1);

    let none = compiler(inventory(&["h1"]))
        .with_filter(TagFilter::new().with_tags(strings(&["b"])))
        .compile(&playbook)
        .await
        .unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn test_block_tags_are_inherited_by_children() {
    let playbook = Playbook::from_yaml(
        r#"
- hosts: h1
  tasks:
    - name: group
      tags: [setup]
      block:
        - name: child one
          debug:
            msg: one
        - name: child two
          tags: [extra]
          debug:
            msg: two
    - name: untagged
      debug:
        msg: three
"#,
        "site.yaml",
    )
    .unwrap();

    let tasks = compiler(inventory(&["h1"]))
        .with_filter(TagFilter::new().with_tags(strings(&["setup"])))
        .compile(&playbook)
        .await
        .unwrap();
    let names: Vec<&str> = tasks.iter().map(|t| t.spec.name.as_str()).collect();
    assert_eq!(names, vec!["child one", "child two"]);

    let tasks = compiler(inventory(&["h1"]))
        .with_filter(TagFilter::new().with_skip_tags(strings(&["extra"])))
        .compile(&playbook)
        .await
        .unwrap();
    let names: Vec<&str> = tasks.iter().map(|t| t.spec.name.as_str()).collect();
    assert_eq!(names, vec!["child one", "untagged"]);
}

#[tokio::test]
async fn test_play_tags_reach_tasks() {
    let playbook = Playbook::from_yaml(
        r#"
- name: first
  hosts: h1
  tags: [first]
  tasks:
    - debug:
        msg: a
- name: second
  hosts: h1
  tasks:
    - debug:
        msg: b
"#,
        "site.yaml",
    )
    .unwrap();

    let tasks = compiler(inventory(&["h1"]))
        .with_filter(TagFilter::new().with_tags(strings(&["first"])))
        .compile(&playbook)
        .await
        .unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].spec.module.args["msg"], "a");
}

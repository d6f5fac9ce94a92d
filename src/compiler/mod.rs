//! Playbook compiler
//!
//! Turns a resolved [`Playbook`] into a flat, document-ordered list of
//! [`TaskRecord`]s and seeds the [`VariableStore`] with the location tree the
//! tasks resolve their variables through.
//!
//! For every play that survives tag filtering:
//! - host patterns are expanded and facts gathered when `gather_facts` is set
//! - hosts are split into serial batches (or the single `run_once` batch)
//! - per batch, a play location is created and `pre_tasks`, each role,
//!   `tasks`, and `post_tasks` are expanded in that order
//!
//! A composite block gets its own location; its `rescue` and `always`
//! sections are only compiled when the main section produced at least one
//! task. A leaf block becomes exactly one task record.

pub mod facts;

pub use facts::Facts;

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::connection::Connector;
use crate::error::{Error, Result};
use crate::inventory::{plan_batches, InventoryError};
use crate::modules::ModuleRegistry;
use crate::playbook::{Block, Play, Playbook};
use crate::tags::{inherit, TagFilter};
use crate::task::{
    ModuleRef, ObjectMeta, TaskRecord, TaskSpec, REL_PATH_ANNOTATION, ROLE_ANNOTATION,
    SEQUENCE_ANNOTATION,
};
use crate::vars::{merge_variables, HostMerge, Location, LocationId, LocationKind, VariableStore};

/// Compiles playbooks against one variable store.
#[derive(Debug, Clone)]
pub struct Compiler {
    store: Arc<VariableStore>,
    modules: Arc<ModuleRegistry>,
    filter: TagFilter,
    connector: Option<Arc<dyn Connector>>,
}

/// Inherited state while walking nested blocks.
#[derive(Debug, Clone)]
struct Scope<'a> {
    play: &'a str,
    hosts: &'a [String],
    location: LocationId,
    when: Vec<String>,
    tags: Vec<String>,
    run_once: bool,
    ignore_errors: Option<bool>,
    role: Option<&'a str>,
    dir: &'a str,
}

impl<'a> Scope<'a> {
    fn nested(&self, block: &'a Block, location: LocationId) -> Self {
        Self {
            play: self.play,
            hosts: self.hosts,
            location,
            when: join_when(&self.when, &block.when),
            tags: inherit(&self.tags, &block.tags),
            run_once: self.run_once || block.run_once,
            ignore_errors: block.ignore_errors.or(self.ignore_errors),
            role: self.role,
            dir: block.source_dir.as_deref().unwrap_or(self.dir),
        }
    }
}

/// Ancestor conditions followed by the unit's own, duplicates dropped.
fn join_when(inherited: &[String], own: &[String]) -> Vec<String> {
    let mut when = inherited.to_vec();
    for condition in own {
        if !when.contains(condition) {
            when.push(condition.clone());
        }
    }
    when
}

impl Compiler {
    /// Create a compiler writing locations into `store`.
    pub fn new(store: Arc<VariableStore>, modules: Arc<ModuleRegistry>) -> Self {
        Self {
            store,
            modules,
            filter: TagFilter::new(),
            connector: None,
        }
    }

    /// Only compile units enabled by `filter`.
    pub fn with_filter(mut self, filter: TagFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Connector used for fact gathering.
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// The variable store being seeded.
    pub fn store(&self) -> &Arc<VariableStore> {
        &self.store
    }

    /// Compile a playbook into task records.
    ///
    /// Records carry their spec and annotations only; naming, namespace, and
    /// ownership are filled in by the caller before persisting.
    #[instrument(skip(self, playbook), fields(playbook = %playbook.path))]
    pub async fn compile(&self, playbook: &Playbook) -> Result<Vec<TaskRecord>> {
        let mut tasks = Vec::new();

        for (index, play) in playbook.plays.iter().enumerate() {
            let name = play.display_name(index);
            if let Some(import) = &play.import_playbook {
                return Err(Error::PlaybookValidation(format!(
                    "play '{}' has an unresolved import_playbook '{}'",
                    name, import
                )));
            }
            if !self.play_enabled(play) {
                debug!(play = %name, "Skipping play by tags");
                continue;
            }

            let hosts = self.store.expand_hosts(&play.hosts)?;
            if hosts.is_empty() {
                return Err(Error::EmptyHosts {
                    play: name,
                    pattern: play.hosts.join(","),
                });
            }

            if play.gather_facts {
                self.gather_facts(&hosts).await?;
            }

            let batches =
                plan_batches(&hosts, &play.serial, play.run_once).map_err(|e| match e {
                    InventoryError::InvalidSerial(value) => Error::InvalidSerial {
                        play: name.clone(),
                        value,
                    },
                    other => other.into(),
                })?;

            info!(play = %name, hosts = hosts.len(), batches = batches.len(), "Compiling play");
            for batch in &batches {
                self.compile_batch(playbook, play, &name, batch, &mut tasks)?;
            }
        }

        info!(tasks = tasks.len(), "Compiled playbook");
        Ok(tasks)
    }

    fn compile_batch(
        &self,
        playbook: &Playbook,
        play: &Play,
        name: &str,
        batch: &[String],
        tasks: &mut Vec<TaskRecord>,
    ) -> Result<()> {
        let play_location = self.store.next_location_id();
        self.store.merge_location(
            Location::new(play_location, LocationId::ROOT, LocationKind::Block, name)
                .with_vars(play.vars.clone()),
        )?;

        let scope = Scope {
            play: name,
            hosts: batch,
            location: play_location,
            when: Vec::new(),
            tags: play.tags.clone(),
            run_once: false,
            ignore_errors: None,
            role: None,
            dir: playbook.dir(),
        };

        self.expand_blocks(&play.pre_tasks, &scope, LocationKind::Block, tasks)?;

        for role in &play.roles {
            let tags = inherit(&play.tags, &role.tags);
            if !self.selects(&role.blocks, &tags) {
                debug!(play = %name, role = %role.role, "Skipping role by tags");
                continue;
            }
            let role_location = self.store.next_location_id();
            let mut vars = role.defaults.clone();
            merge_variables(&mut vars, &role.vars);
            self.store.merge_location(
                Location::new(role_location, play_location, LocationKind::Block, &role.role)
                    .with_vars(vars),
            )?;

            let role_scope = Scope {
                location: role_location,
                when: join_when(&scope.when, &role.when),
                tags,
                role: Some(&role.role),
                dir: role.path.as_deref().unwrap_or(scope.dir),
                ..scope.clone()
            };
            self.expand_blocks(&role.blocks, &role_scope, LocationKind::Block, tasks)?;
        }

        self.expand_blocks(&play.tasks, &scope, LocationKind::Block, tasks)?;
        self.expand_blocks(&play.post_tasks, &scope, LocationKind::Block, tasks)?;
        Ok(())
    }

    /// Expand one block section. Returns the number of tasks emitted.
    fn expand_blocks(
        &self,
        blocks: &[Block],
        scope: &Scope<'_>,
        kind: LocationKind,
        tasks: &mut Vec<TaskRecord>,
    ) -> Result<usize> {
        let mut emitted = 0;
        for block in blocks {
            if let (Some(file), false) = (&block.include_tasks, block.include_resolved) {
                return Err(Error::UnresolvedInclude {
                    play: scope.play.to_string(),
                    block: block.display_name(),
                    file: file.clone(),
                });
            }

            if block.is_composite() {
                let tags = inherit(&scope.tags, &block.tags);
                if !self.selects(&block.block, &tags) {
                    continue;
                }
                let location = self.merge_block_location(block, scope.location, kind)?;
                let nested = scope.nested(block, location);

                let body = self.expand_blocks(&block.block, &nested, LocationKind::Block, tasks)?;
                emitted += body;
                if body > 0 {
                    emitted +=
                        self.expand_blocks(&block.rescue, &nested, LocationKind::Rescue, tasks)?;
                    emitted +=
                        self.expand_blocks(&block.always, &nested, LocationKind::Always, tasks)?;
                }
                continue;
            }

            let (module, args) =
                self.modules
                    .find_in(&block.module_fields)
                    .ok_or_else(|| Error::NoModule {
                        play: scope.play.to_string(),
                        block: block.display_name(),
                    })?;
            if !self.filter.is_enabled(&inherit(&scope.tags, &block.tags)) {
                continue;
            }

            let location = self.merge_block_location(block, scope.location, kind)?;
            let leaf = scope.nested(block, location);
            let hosts = if leaf.run_once {
                leaf.hosts.iter().take(1).cloned().collect()
            } else {
                leaf.hosts.to_vec()
            };

            let mut annotations = BTreeMap::new();
            annotations.insert(SEQUENCE_ANNOTATION.to_string(), tasks.len().to_string());
            annotations.insert(REL_PATH_ANNOTATION.to_string(), leaf.dir.to_string());
            if let Some(role) = leaf.role {
                annotations.insert(ROLE_ANNOTATION.to_string(), role.to_string());
            }

            debug!(play = %scope.play, block = %block.display_name(), module = %module, "Emitting task");
            tasks.push(TaskRecord {
                metadata: ObjectMeta {
                    annotations,
                    ..ObjectMeta::default()
                },
                spec: TaskSpec {
                    name: block.display_name(),
                    hosts,
                    module: ModuleRef {
                        name: module.to_string(),
                        args: args.clone(),
                    },
                    when: leaf.when,
                    failed_when: block.failed_when.clone(),
                    loop_items: block.loop_items.clone(),
                    register: block.register.clone(),
                    ignore_errors: leaf.ignore_errors.unwrap_or(false),
                    retries: block.retries,
                    location,
                },
                ..TaskRecord::default()
            });
            emitted += 1;
        }
        Ok(emitted)
    }

    fn merge_block_location(
        &self,
        block: &Block,
        parent: LocationId,
        kind: LocationKind,
    ) -> Result<LocationId> {
        let id = self.store.next_location_id();
        self.store.merge_location(
            Location::new(id, parent, kind, block.display_name()).with_vars(block.vars.clone()),
        )?;
        Ok(id)
    }

    /// Whether a play contributes anything under the tag filter.
    fn play_enabled(&self, play: &Play) -> bool {
        if !self.filter.is_active() {
            return true;
        }
        self.selects(&play.pre_tasks, &play.tags)
            || play
                .roles
                .iter()
                .any(|role| self.selects(&role.blocks, &inherit(&play.tags, &role.tags)))
            || self.selects(&play.tasks, &play.tags)
            || self.selects(&play.post_tasks, &play.tags)
    }

    /// Whether any leaf of the main sections below `blocks` is enabled.
    fn selects(&self, blocks: &[Block], inherited: &[String]) -> bool {
        blocks.iter().any(|block| {
            let tags = inherit(inherited, &block.tags);
            if block.is_composite() {
                self.selects(&block.block, &tags)
            } else {
                self.filter.is_enabled(&tags)
            }
        })
    }

    async fn gather_facts(&self, hosts: &[String]) -> Result<()> {
        let Some(connector) = &self.connector else {
            warn!("gather_facts requested without a connector, skipping");
            return Ok(());
        };
        for host in hosts {
            let facts = Facts::gather(connector.as_ref(), host).await?;
            self.store
                .merge_host(HostMerge::host(host.clone(), facts.into_variables()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{Group, Inventory};
    use crate::vars::Variables;
    use pretty_assertions::assert_eq;

    fn store() -> Arc<VariableStore> {
        let mut inventory = Inventory::new();
        for host in ["h1", "h2", "h3"] {
            inventory.add_host(host, Variables::new());
        }
        inventory.add_group(
            "nodes",
            Group {
                hosts: vec!["h1".into(), "h2".into(), "h3".into()],
                ..Group::default()
            },
        );
        Arc::new(VariableStore::new(inventory))
    }

    fn compiler() -> Compiler {
        Compiler::new(store(), Arc::new(ModuleRegistry::with_builtins()))
    }

    fn playbook(yaml: &str) -> Playbook {
        Playbook::from_yaml(yaml, "site.yaml").unwrap()
    }

    #[tokio::test]
    async fn test_leaf_task_fields() {
        let pb = playbook(
            r#"
- hosts: nodes
  tasks:
    - name: ping
      command: echo hi
      register: out
      retries: 2
"#,
        );
        let tasks = compiler().compile(&pb).await.unwrap();
        assert_eq!(tasks.len(), 1);
        let task = &tasks[0];
        assert_eq!(task.spec.name, "ping");
        assert_eq!(task.spec.module.name, "command");
        assert_eq!(task.spec.module.args, serde_json::json!("echo hi"));
        assert_eq!(task.spec.hosts, vec!["h1", "h2", "h3"]);
        assert_eq!(task.spec.register.as_deref(), Some("out"));
        assert_eq!(task.spec.retries, 2);
        assert_eq!(task.sequence(), Some(0));
    }

    #[tokio::test]
    async fn test_block_sections_and_kinds() {
        let pb = playbook(
            r#"
- hosts: h1
  tasks:
    - name: guarded
      when: x
      block:
        - name: main
          command: "true"
      rescue:
        - name: recover
          debug:
            msg: rescued
      always:
        - name: cleanup
          debug:
            msg: done
"#,
        );
        let compiler = compiler();
        let tasks = compiler.compile(&pb).await.unwrap();
        let names: Vec<&str> = tasks.iter().map(|t| t.spec.name.as_str()).collect();
        assert_eq!(names, vec!["main", "recover", "cleanup"]);
        for task in &tasks {
            assert_eq!(task.spec.when, vec!["x"]);
        }

        let kind = |i: usize| compiler.store().location(tasks[i].spec.location).unwrap().kind;
        assert_eq!(kind(0), LocationKind::Block);
        assert_eq!(kind(1), LocationKind::Rescue);
        assert_eq!(kind(2), LocationKind::Always);
    }

    #[tokio::test]
    async fn test_no_module_names_block() {
        let pb = playbook("- hosts: h1\n  tasks:\n    - name: broken\n      nonsense: 1\n");
        let err = compiler().compile(&pb).await.unwrap_err();
        assert!(matches!(err, Error::NoModule { ref block, .. } if block == "broken"));
    }

    #[tokio::test]
    async fn test_run_once_block() {
        let pb = playbook(
            "- hosts: nodes\n  tasks:\n    - name: once\n      run_once: true\n      debug:\n        msg: x\n",
        );
        let tasks = compiler().compile(&pb).await.unwrap();
        assert_eq!(tasks[0].spec.hosts, vec!["h1"]);
    }

    #[tokio::test]
    async fn test_serial_batches_compile_in_order() {
        let pb = playbook(
            "- hosts: nodes\n  serial: 2\n  tasks:\n    - command: a\n    - command: b\n",
        );
        let tasks = compiler().compile(&pb).await.unwrap();
        let hosts: Vec<Vec<String>> = tasks.iter().map(|t| t.spec.hosts.clone()).collect();
        assert_eq!(
            hosts,
            vec![
                vec!["h1".to_string(), "h2".to_string()],
                vec!["h1".to_string(), "h2".to_string()],
                vec!["h3".to_string()],
                vec!["h3".to_string()],
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_hosts_error() {
        let mut inventory = Inventory::new();
        inventory.add_host("h1", Variables::new());
        inventory.add_group("empty", Group::default());
        let compiler = Compiler::new(
            Arc::new(VariableStore::new(inventory)),
            Arc::new(ModuleRegistry::with_builtins()),
        );
        let pb = playbook("- name: bootstrap\n  hosts: empty\n  tasks:\n    - command: a\n");
        let err = compiler.compile(&pb).await.unwrap_err();
        assert!(matches!(err, Error::EmptyHosts { ref play, .. } if play == "bootstrap"));
    }

    #[tokio::test]
    async fn test_invalid_serial_names_play() {
        let pb = playbook("- name: p\n  hosts: nodes\n  serial: \"0%\"\n  tasks:\n    - command: a\n");
        let err = compiler().compile(&pb).await.unwrap_err();
        assert!(matches!(err, Error::InvalidSerial { ref play, .. } if play == "p"));
    }

    #[tokio::test]
    async fn test_skipped_body_drops_rescue_and_always() {
        let pb = playbook(
            r#"
- hosts: h1
  tasks:
    - block:
        - command: a
          tags: [install]
      always:
        - debug:
            msg: x
    - command: b
      tags: [config]
"#,
        );
        let compiler = compiler().with_filter(TagFilter::new().with_tags(vec!["config".into()]));
        let tasks = compiler.compile(&pb).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].spec.module.args, serde_json::json!("b"));
    }

    #[test]
    fn test_join_when_dedups() {
        let when = join_when(&["a".into(), "b".into()], &["b".into(), "c".into()]);
        assert_eq!(when, vec!["a", "b", "c"]);
    }
}

//! Playbook resolution.
//!
//! Loads a playbook from a project and fills in everything the compiler needs
//! without touching the project again:
//!
//! - `import_playbook` plays are replaced by the imported plays
//! - `vars_files` are merged into play vars
//! - roles get their tasks, defaults, directory, and `meta` dependencies
//! - `include_tasks` blocks get the included blocks as children
//!
//! Search order for a role `r` referenced from a playbook in `dir`:
//! `dir/../roles/r`, `dir/roles/r`, `roles/r`, then each configured roles
//! path. An included file `f` is looked up as `source/f`, `source/tasks/f`,
//! `top/f`, `top/tasks/f`, where `source` is the directory of the file holding
//! the include and `top` the role or playbook directory.

use futures::future::{BoxFuture, FutureExt};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, instrument};

use super::{join, parent_dir, ProjectLoader};
use crate::error::{Error, Result};
use crate::playbook::{parse_blocks, Block, Play, Playbook, RoleRef};
use crate::vars::{merge_variables, Variables};

const MAIN_FILES: [&str; 2] = ["main.yaml", "main.yml"];

#[derive(Debug, Default, Deserialize)]
struct RoleMeta {
    #[serde(default)]
    dependencies: Vec<RoleRef>,
}

/// Resolves playbooks against a project.
#[derive(Debug, Clone)]
pub struct PlaybookResolver {
    loader: Arc<dyn ProjectLoader>,
    roles_path: Vec<String>,
}

impl PlaybookResolver {
    /// Create a resolver over a project loader.
    pub fn new(loader: Arc<dyn ProjectLoader>) -> Self {
        Self {
            loader,
            roles_path: Vec::new(),
        }
    }

    /// Extra role search paths, tried after the built-in candidates.
    pub fn with_roles_path(mut self, roles_path: Vec<String>) -> Self {
        self.roles_path = roles_path;
        self
    }

    /// Load and resolve a playbook.
    #[instrument(skip(self))]
    pub async fn load(&self, path: &str) -> Result<Playbook> {
        let path = super::normalize(path)?;
        let mut stack = Vec::new();
        let plays = self.load_plays(path.clone(), &mut stack).await?;
        Ok(Playbook { plays, path })
    }

    fn load_plays<'a>(
        &'a self,
        path: String,
        stack: &'a mut Vec<String>,
    ) -> BoxFuture<'a, Result<Vec<Play>>> {
        async move {
            if stack.contains(&path) {
                return Err(Error::ImportCycle(cycle_chain(stack, &path)));
            }
            let content = self.loader.read_to_string(&path).await?;
            let playbook = Playbook::from_yaml(&content, path.clone())?;
            let dir = parent_dir(&path).to_string();

            stack.push(path.clone());
            let mut plays = Vec::new();
            for (index, mut play) in playbook.plays.into_iter().enumerate() {
                if let Some(import) = &play.import_playbook {
                    let imported = join(&dir, import)?;
                    debug!(from = %path, import = %imported, "importing playbook");
                    plays.extend(self.load_plays(imported, stack).await?);
                    continue;
                }
                self.resolve_play(&mut play, index, &dir).await?;
                plays.push(play);
            }
            stack.pop();
            Ok(plays)
        }
        .boxed()
    }

    async fn resolve_play(&self, play: &mut Play, index: usize, dir: &str) -> Result<()> {
        let play_name = play.display_name(index);

        for file in &play.vars_files {
            let path = join(dir, file)?;
            let content = self.loader.read_to_string(&path).await?;
            let vars: Option<Variables> = serde_yaml::from_str(&content)
                .map_err(|e| Error::playbook_parse(&path, e.to_string(), Some(Box::new(e))))?;
            if let Some(vars) = vars {
                merge_variables(&mut play.vars, &vars);
            }
        }

        for blocks in [&mut play.pre_tasks, &mut play.tasks, &mut play.post_tasks] {
            for block in blocks.iter_mut() {
                block.stamp_source_dir(dir);
            }
            self.resolve_includes(blocks, dir, &mut Vec::new()).await?;
        }

        let mut roles = Vec::new();
        for role in std::mem::take(&mut play.roles) {
            self.resolve_role(role, dir, &play_name, &mut Vec::new(), &mut roles)
                .await?;
        }
        play.roles = roles;
        Ok(())
    }

    fn resolve_role<'a>(
        &'a self,
        mut role: RoleRef,
        dir: &'a str,
        play: &'a str,
        stack: &'a mut Vec<String>,
        out: &'a mut Vec<RoleRef>,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            if stack.contains(&role.role) {
                return Err(Error::RoleCycle(cycle_chain(stack, &role.role)));
            }
            let role_dir = self
                .find_role(&role.role, dir)
                .await
                .ok_or_else(|| Error::RoleNotFound {
                    role: role.role.clone(),
                    play: play.to_string(),
                })?;
            debug!(role = %role.role, dir = %role_dir, "resolved role");

            stack.push(role.role.clone());
            if let Some(meta_path) = self.find_main(&role_dir, "meta").await {
                let content = self.loader.read_to_string(&meta_path).await?;
                let meta: Option<RoleMeta> = serde_yaml::from_str(&content).map_err(|e| {
                    Error::playbook_parse(&meta_path, e.to_string(), Some(Box::new(e)))
                })?;
                for dependency in meta.unwrap_or_default().dependencies {
                    if out.iter().any(|r| r.role == dependency.role) {
                        continue;
                    }
                    self.resolve_role(dependency, dir, play, stack, out).await?;
                }
            }
            stack.pop();

            let tasks_path =
                self.find_main(&role_dir, "tasks")
                    .await
                    .ok_or_else(|| Error::RoleNotFound {
                        role: format!("{} (no tasks/main.yaml)", role.role),
                        play: play.to_string(),
                    })?;
            let content = self.loader.read_to_string(&tasks_path).await?;
            let mut blocks = parse_blocks(&content, &tasks_path)?;
            let tasks_dir = parent_dir(&tasks_path).to_string();
            for block in blocks.iter_mut() {
                block.stamp_source_dir(&tasks_dir);
            }
            self.resolve_includes(&mut blocks, &role_dir, &mut Vec::new())
                .await?;

            if let Some(defaults_path) = self.find_main(&role_dir, "defaults").await {
                let content = self.loader.read_to_string(&defaults_path).await?;
                let defaults: Option<Variables> = serde_yaml::from_str(&content).map_err(|e| {
                    Error::playbook_parse(&defaults_path, e.to_string(), Some(Box::new(e)))
                })?;
                role.defaults = defaults.unwrap_or_default();
            }

            role.blocks = blocks;
            role.path = Some(role_dir);
            out.push(role);
            Ok(())
        }
        .boxed()
    }

    async fn find_role(&self, role: &str, dir: &str) -> Option<String> {
        let mut candidates = vec![
            join(dir, &format!("../roles/{}", role)),
            join(dir, &format!("roles/{}", role)),
            join("", &format!("roles/{}", role)),
        ];
        for extra in &self.roles_path {
            candidates.push(join(extra, role));
        }
        for candidate in candidates.into_iter().flatten() {
            if self.loader.is_dir(&candidate).await {
                return Some(candidate);
            }
        }
        None
    }

    async fn find_main(&self, role_dir: &str, sub: &str) -> Option<String> {
        for file in MAIN_FILES {
            if let Ok(path) = join(role_dir, &format!("{}/{}", sub, file)) {
                if self.loader.is_file(&path).await {
                    return Some(path);
                }
            }
        }
        None
    }

    fn resolve_includes<'a>(
        &'a self,
        blocks: &'a mut [Block],
        top: &'a str,
        stack: &'a mut Vec<String>,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            for block in blocks.iter_mut() {
                if let (Some(file), false) = (block.include_tasks.clone(), block.include_resolved)
                {
                    let source = block.source_dir.clone().unwrap_or_else(|| top.to_string());
                    let path = self.find_include(&file, &source, top).await.ok_or_else(|| {
                        Error::IncludeNotFound {
                            block: block.display_name(),
                            file: file.clone(),
                        }
                    })?;
                    if stack.contains(&path) {
                        return Err(Error::IncludeCycle(cycle_chain(stack, &path)));
                    }

                    let content = self.loader.read_to_string(&path).await?;
                    let mut children = parse_blocks(&content, &path)?;
                    let child_dir = parent_dir(&path).to_string();
                    for child in children.iter_mut() {
                        child.stamp_source_dir(&child_dir);
                    }
                    stack.push(path);
                    self.resolve_includes(&mut children, top, stack).await?;
                    stack.pop();

                    block.block = children;
                    block.include_resolved = true;
                    continue;
                }

                self.resolve_includes(&mut block.block, top, stack).await?;
                self.resolve_includes(&mut block.rescue, top, stack).await?;
                self.resolve_includes(&mut block.always, top, stack).await?;
            }
            Ok(())
        }
        .boxed()
    }

    async fn find_include(&self, file: &str, source: &str, top: &str) -> Option<String> {
        let candidates = [
            join(source, file),
            join(source, &format!("tasks/{}", file)),
            join(top, file),
            join(top, &format!("tasks/{}", file)),
        ];
        for candidate in candidates.into_iter().flatten() {
            if self.loader.is_file(&candidate).await {
                return Some(candidate);
            }
        }
        None
    }
}

fn cycle_chain(stack: &[String], next: &str) -> String {
    let mut chain: Vec<&str> = stack.iter().map(String::as_str).collect();
    chain.push(next);
    chain.join(" -> ")
}

//! Subcommands module for kubekit CLI

pub mod check;
pub mod compile;
pub mod run;

use anyhow::{Context, Result};
use clap::Args;
use kubekit::compiler::Compiler;
use kubekit::config::Config;
use kubekit::inventory::Inventory;
use kubekit::modules::ModuleRegistry;
use kubekit::playbook::Playbook;
use kubekit::project::{FsProject, PlaybookResolver, ProjectLoader};
use kubekit::tags::TagFilter;
use kubekit::task::TaskRecord;
use kubekit::vars::VariableStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Playbook and inventory selection shared by every subcommand
#[derive(Args, Debug, Clone)]
pub struct TargetArgs {
    /// Playbook path, relative to the project root
    #[arg(required = true)]
    pub playbook: String,

    /// Inventory file (YAML or JSON)
    #[arg(short = 'i', long, required = true, env = "KUBEKIT_INVENTORY")]
    pub inventory: PathBuf,

    /// Only run units carrying one of these tags
    #[arg(long, short = 't', action = clap::ArgAction::Append, value_delimiter = ',')]
    pub tags: Vec<String>,

    /// Skip units carrying one of these tags
    #[arg(long, action = clap::ArgAction::Append, value_delimiter = ',')]
    pub skip_tags: Vec<String>,
}

/// Common context shared between commands
#[derive(Debug, Clone)]
pub struct CommandContext {
    /// Configuration, with command-line overrides applied
    pub config: Config,
}

impl CommandContext {
    /// Create a new command context from CLI arguments
    pub fn new(cli: &crate::cli::Cli, mut config: Config) -> Self {
        if let Some(dir) = &cli.project_dir {
            config.project.project_dir = dir.clone();
        }
        Self { config }
    }

    /// Loader over the configured project root
    pub fn project(&self) -> Arc<dyn ProjectLoader> {
        Arc::new(FsProject::new(self.config.project.project_dir.clone()))
    }

    /// Command-line tags, falling back to the configured defaults
    pub fn tag_filter(&self, target: &TargetArgs) -> (Vec<String>, Vec<String>) {
        let pick = |cli: &[String], config: &[String]| {
            if cli.is_empty() {
                config.to_vec()
            } else {
                cli.to_vec()
            }
        };
        (
            pick(&target.tags, &self.config.pipeline.tags),
            pick(&target.skip_tags, &self.config.pipeline.skip_tags),
        )
    }

    /// Load the resolved playbook
    pub async fn load_playbook(&self, target: &TargetArgs) -> Result<Playbook> {
        let resolver = PlaybookResolver::new(self.project())
            .with_roles_path(self.config.project.roles_path.clone());
        let playbook = resolver
            .load(&target.playbook)
            .await
            .with_context(|| format!("Failed to load playbook '{}'", target.playbook))?;
        debug!(plays = playbook.plays.len(), "Playbook resolved");
        Ok(playbook)
    }

    /// Compile without a connector, so facts are not gathered
    pub async fn compile(&self, target: &TargetArgs) -> Result<Vec<TaskRecord>> {
        let inventory = load_inventory(&target.inventory)?;
        let playbook = self.load_playbook(target).await?;

        let (tags, skip_tags) = self.tag_filter(target);
        let filter = TagFilter::new().with_tags(tags).with_skip_tags(skip_tags);
        let store = Arc::new(VariableStore::new(inventory));
        let compiler = Compiler::new(store, Arc::new(ModuleRegistry::with_builtins()))
            .with_filter(filter);
        Ok(compiler.compile(&playbook).await?)
    }
}

/// Read and validate an inventory file
pub fn load_inventory(path: &Path) -> Result<Inventory> {
    Inventory::load(path)
        .with_context(|| format!("Failed to load inventory: {}", path.display()))
}

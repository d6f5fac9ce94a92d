//! Check command - validate that a playbook compiles

use super::{CommandContext, TargetArgs};
use anyhow::Result;
use clap::Parser;
use std::collections::BTreeSet;

/// Arguments for the check command
#[derive(Parser, Debug, Clone)]
pub struct CheckArgs {
    #[command(flatten)]
    pub target: TargetArgs,
}

impl CheckArgs {
    /// Execute the check command
    pub async fn execute(&self, ctx: &CommandContext) -> Result<i32> {
        let tasks = ctx.compile(&self.target).await?;
        let hosts: BTreeSet<&str> = tasks
            .iter()
            .flat_map(|t| t.spec.hosts.iter().map(String::as_str))
            .collect();
        println!(
            "{}: ok ({} tasks, {} hosts)",
            self.target.playbook,
            tasks.len(),
            hosts.len()
        );
        Ok(0)
    }
}

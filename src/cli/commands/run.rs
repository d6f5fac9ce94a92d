//! Run command - compile a playbook and drive its tasks on the local host
//!
//! Records live in an in-memory store for the duration of the command. The
//! controller runs until every task is complete and the pipeline phase is
//! final, then it is cancelled and the recap printed.

use super::{load_inventory, CommandContext, TargetArgs};
use anyhow::{anyhow, Context, Result};
use clap::Parser;
use kubekit::connection::LocalConnector;
use kubekit::controller::{ControllerContext, TaskController};
use kubekit::pipeline::{InventoryRecord, Pipeline, PipelinePhase, PipelineSpec};
use kubekit::store::Client;
use kubekit::task::{ObjectKey, ObjectMeta, TaskRecord};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Pipeline name used for the single run
const PIPELINE_NAME: &str = "run";

/// Poll interval of the pipeline phase
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Arguments for the run command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Number of parallel reconcile workers
    #[arg(long, short = 'j')]
    pub max_concurrent: Option<usize>,
}

impl RunArgs {
    /// Execute the run command
    pub async fn execute(&self, ctx: &CommandContext) -> Result<i32> {
        let start_time = Instant::now();
        let namespace = ctx.config.pipeline.namespace.clone();
        let client = Client::in_memory();
        let key = self.seed(ctx, &client, &namespace).await?;

        let context = ControllerContext::new(client.clone(), ctx.project())
            .with_connector(Arc::new(LocalConnector::new()))
            .with_roles_path(ctx.config.project.roles_path.clone());
        let controller = Arc::new(
            TaskController::new(context)
                .with_max_concurrent(
                    self.max_concurrent
                        .unwrap_or(ctx.config.controller.max_concurrent),
                )
                .with_backoff(
                    ctx.config.controller.backoff_base,
                    ctx.config.controller.backoff_max,
                ),
        );

        controller.add_tasks(&key).await?;

        let cancel = CancellationToken::new();
        let workers = {
            let controller = Arc::clone(&controller);
            let cancel = cancel.clone();
            tokio::spawn(async move { controller.start(cancel).await })
        };

        let finished = wait_finished(&client, &key).await;
        cancel.cancel();
        workers
            .await
            .map_err(|e| anyhow!("controller task panicked: {}", e))??;
        let (pipeline, tasks) = finished?;

        print_recap(&pipeline, &tasks);
        info!(
            phase = %pipeline.status.phase,
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "Pipeline finished"
        );

        Ok(match pipeline.status.phase {
            PipelinePhase::Succeeded => 0,
            _ => 2,
        })
    }

    /// Store the inventory and pipeline records
    async fn seed(&self, ctx: &CommandContext, client: &Client, namespace: &str) -> Result<ObjectKey> {
        let inventory = load_inventory(&self.target.inventory)?;
        client
            .inventories
            .create(InventoryRecord {
                metadata: ObjectMeta::named(namespace, PIPELINE_NAME),
                spec: inventory,
            })
            .await?;

        let (tags, skip_tags) = ctx.tag_filter(&self.target);
        let pipeline = client
            .pipelines
            .create(Pipeline {
                metadata: ObjectMeta::named(namespace, PIPELINE_NAME),
                spec: PipelineSpec {
                    playbook: self.target.playbook.clone(),
                    inventory_ref: PIPELINE_NAME.to_string(),
                    config_ref: None,
                    tags,
                    skip_tags,
                },
                ..Pipeline::default()
            })
            .await
            .context("Failed to create pipeline")?;
        Ok(pipeline.metadata.key())
    }
}

/// Poll until every task is complete and the pipeline phase is final.
///
/// The phase alone turns `Failed` as soon as one task exhausts its retries,
/// while rescue and always tasks of that block are still pending.
async fn wait_finished(client: &Client, key: &ObjectKey) -> Result<(Pipeline, Vec<TaskRecord>)> {
    let mut interval = tokio::time::interval(POLL_INTERVAL);
    loop {
        interval.tick().await;
        let pipeline = client
            .pipelines
            .get(key)
            .await?
            .ok_or_else(|| anyhow!("pipeline '{}' disappeared", key))?;
        let tasks = client.pipeline_tasks(&pipeline).await?;
        let pending = tasks.iter().filter(|t| !t.is_complete()).count();
        debug!(phase = %pipeline.status.phase, pending, "Polled pipeline");
        if pending == 0 && pipeline.status.phase.is_terminal() {
            return Ok((pipeline, tasks));
        }
    }
}

fn print_recap(pipeline: &Pipeline, tasks: &[TaskRecord]) {
    for task in tasks {
        println!("{:<10} {}", task.status.phase.to_string(), task.spec.name);
        for host in &task.status.failed_detail {
            eprintln!("  {}: {}", host.host, host.stderr);
        }
    }
    let counts = pipeline.status.task_result;
    println!(
        "{}: total={} success={} ignored={} skipped={} failed={}",
        pipeline.status.phase,
        counts.total,
        counts.success,
        counts.ignored,
        counts.skipped,
        counts.failed
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_args_parsing() {
        let args = RunArgs::try_parse_from(["run", "site.yaml", "-i", "hosts.yaml", "-j", "4"]).unwrap();
        assert_eq!(args.max_concurrent, Some(4));
        assert_eq!(args.target.playbook, "site.yaml");
    }
}

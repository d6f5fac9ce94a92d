//! Task reconciliation.
//!
//! A [`Reconciler`] advances one task record a single step toward a terminal
//! phase and tells the controller whether to look at it again. Errors are
//! always retried by the controller; a task that must stop retrying is marked
//! `Failed` and reported as done.

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::phase::infer_phase;
use super::ControllerContext;
use crate::error::{Error, Result};
use crate::modules::{to_params, Module, ModuleContext, ModuleOutput};
use crate::pipeline::Pipeline;
use crate::store::Resource;
use crate::task::{HostResult, ObjectKey, TaskCondition, TaskPhase, TaskRecord, TaskSpec};
use crate::vars::{HostMerge, VariableStore, Variables};

/// What the controller does with an item after a reconcile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileResult {
    /// Requeue with rate-limited backoff
    pub requeue: bool,
    /// Requeue after a fixed delay, taking precedence over `requeue`
    pub requeue_after: Option<Duration>,
}

impl ReconcileResult {
    /// Nothing left to do.
    pub fn done() -> Self {
        Self::default()
    }

    /// Look again after the item's backoff.
    pub fn requeue() -> Self {
        Self {
            requeue: true,
            requeue_after: None,
        }
    }

    /// Look again after `delay`.
    pub fn requeue_after(delay: Duration) -> Self {
        Self {
            requeue: false,
            requeue_after: Some(delay),
        }
    }
}

/// Advances the object behind a queue key.
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Reconcile the object named by `key`.
    async fn reconcile(&self, key: &ObjectKey, cancel: &CancellationToken)
        -> Result<ReconcileResult>;
}

const SKIP_BY_WHEN: &str = "skip by when";

/// Reconciler for [`TaskRecord`]s.
#[derive(Debug, Clone)]
pub struct TaskReconciler {
    ctx: ControllerContext,
    status_lock: Arc<Mutex<()>>,
}

impl TaskReconciler {
    /// Create a reconciler over the controller's collaborators.
    pub fn new(ctx: ControllerContext) -> Self {
        Self {
            ctx,
            status_lock: Arc::new(Mutex::new(())),
        }
    }

    async fn owner(&self, task: &TaskRecord) -> Result<Option<Pipeline>> {
        let Some(owner) = task
            .metadata
            .owner_references
            .iter()
            .find(|o| o.kind == Pipeline::KIND)
        else {
            return Ok(None);
        };
        let key = ObjectKey::new(task.metadata.namespace.clone(), owner.name.clone());
        Ok(self
            .ctx
            .client
            .pipelines
            .get(&key)
            .await?
            .filter(|p| p.metadata.uid == owner.uid))
    }

    async fn advance(
        &self,
        task: &mut TaskRecord,
        pipeline: &Pipeline,
        cancel: &CancellationToken,
    ) -> Result<ReconcileResult> {
        match task.status.phase {
            TaskPhase::Failed if !task.retries_exhausted() => {
                task.status.phase = TaskPhase::Pending;
                task.status.restart_count += 1;
                task.status.failed_detail.clear();
                info!(
                    task = %task.spec.name,
                    restart = task.status.restart_count,
                    "Retrying task"
                );
                self.ctx.client.tasks.update(task.clone()).await?;
                Ok(ReconcileResult::requeue())
            }
            TaskPhase::Pending => {
                let tasks = self.ctx.client.pipeline_tasks(pipeline).await?;
                let store = self.ctx.variable_store(pipeline).await?;
                match infer_phase(task, &tasks, &store) {
                    TaskPhase::Pending => Ok(ReconcileResult::requeue()),
                    next => {
                        debug!(task = %task.spec.name, phase = %next, "Task phase inferred");
                        task.status.phase = next;
                        self.ctx.client.tasks.update(task.clone()).await?;
                        if next == TaskPhase::Running {
                            Ok(ReconcileResult::requeue())
                        } else {
                            Ok(ReconcileResult::done())
                        }
                    }
                }
            }
            TaskPhase::Running => self.execute(task, pipeline, cancel).await,
            _ => Ok(ReconcileResult::done()),
        }
    }

    async fn execute(
        &self,
        task: &mut TaskRecord,
        pipeline: &Pipeline,
        cancel: &CancellationToken,
    ) -> Result<ReconcileResult> {
        let store = self.ctx.variable_store(pipeline).await?;
        let module = self.ctx.modules.get(&task.spec.module.name);
        let spec = task.spec.clone();
        let start = Utc::now();

        let runs = spec
            .hosts
            .iter()
            .map(|host| self.run_host(&spec, host, &store, module.clone()));
        let results = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(task = %spec.name, "Cancelled while running");
                return Ok(ReconcileResult::requeue());
            }
            results = join_all(runs) => results,
        };

        let failed: Vec<HostResult> = results.iter().filter(|r| r.failed).cloned().collect();
        task.status.phase = if !failed.is_empty() {
            if spec.ignore_errors {
                TaskPhase::Ignored
            } else {
                task.status.failed_detail = failed;
                TaskPhase::Failed
            }
        } else if results.iter().all(|r| r.skipped) {
            TaskPhase::Skipped
        } else {
            TaskPhase::Succeeded
        };
        task.status.conditions.push(TaskCondition {
            start_timestamp: start,
            end_timestamp: Utc::now(),
            host_results: results,
        });

        match task.status.phase {
            TaskPhase::Failed => warn!(task = %spec.name, "Task failed"),
            phase => info!(task = %spec.name, phase = %phase, "Task finished"),
        }
        self.ctx.client.tasks.update(task.clone()).await?;

        if task.status.phase == TaskPhase::Failed && !task.retries_exhausted() {
            Ok(ReconcileResult::requeue())
        } else {
            Ok(ReconcileResult::done())
        }
    }

    async fn run_host(
        &self,
        spec: &TaskSpec,
        host: &str,
        store: &Arc<VariableStore>,
        module: Option<Arc<dyn Module>>,
    ) -> HostResult {
        let templates = &self.ctx.templates;
        let vars = match store
            .location_vars(host, spec.location)
            .and_then(|vars| templates.render_variables(&vars))
        {
            Ok(vars) => vars,
            Err(e) => return HostResult::failed(host, format!("parse variable error: {}", e)),
        };

        match templates.evaluate_all(&spec.when, &vars) {
            Ok(true) => {}
            Ok(false) => {
                debug!(task = %spec.name, host = %host, "Skipping host by when");
                return HostResult::skipped(host, SKIP_BY_WHEN);
            }
            Err(e) => return HostResult::failed(host, format!("evaluate when error: {}", e)),
        }

        let Some(module) = module else {
            return HostResult::failed(
                host,
                format!("module '{}' is not registered", spec.module.name),
            );
        };

        let items = match self.loop_items(spec, &vars) {
            Ok(items) => items,
            Err(e) => return HostResult::failed(host, format!("parse loop error: {}", e)),
        };

        let mut outputs = Vec::with_capacity(items.len());
        for item in items {
            let mut vars = vars.clone();
            if let Some(item) = item {
                let mut data = Variables::new();
                data.insert("item".to_string(), item.clone());
                if let Err(e) = store.merge_host(HostMerge::scoped(host, spec.location, data)) {
                    return HostResult::failed(host, format!("merge loop item error: {}", e));
                }
                vars.insert("item".to_string(), item);
            }
            outputs.push(self.run_module(spec, host, store, &*module, vars).await);
        }

        if let Some(register) = &spec.register {
            let value = match outputs.as_slice() {
                [single] => single.to_value(),
                many => json!({
                    "results": many.iter().map(ModuleOutput::to_value).collect::<Vec<_>>(),
                    "changed": many.iter().any(|o| o.changed),
                    "failed": many.iter().any(|o| o.failed),
                }),
            };
            let mut data = Variables::new();
            data.insert(register.clone(), value);
            let merge = match store.parent_location(spec.location) {
                Some(parent) if !parent.is_root() => HostMerge::scoped(host, parent, data),
                _ => HostMerge::host(host, data),
            };
            if let Err(e) = store.merge_host(merge) {
                return HostResult::failed(host, format!("register '{}' error: {}", register, e));
            }
        }

        HostResult {
            host: host.to_string(),
            stdout: join_lines(outputs.iter().map(|o| o.stdout.as_str())),
            stderr: join_lines(outputs.iter().map(|o| o.stderr.as_str())),
            skipped: false,
            failed: outputs.iter().any(|o| o.failed),
        }
    }

    async fn run_module(
        &self,
        spec: &TaskSpec,
        host: &str,
        store: &Arc<VariableStore>,
        module: &dyn Module,
        vars: Variables,
    ) -> ModuleOutput {
        let templates = &self.ctx.templates;
        let args = match templates.render_value(&spec.module.args, &vars) {
            Ok(args) => args,
            Err(e) => return ModuleOutput::failed(format!("render args error: {}", e)),
        };

        let context = ModuleContext {
            host: host.to_string(),
            params: to_params(&args),
            vars,
            connector: self.ctx.connector.clone(),
            store: Arc::clone(store),
            templates: Arc::clone(templates),
            location: spec.location,
        };
        let mut output = match module.validate_params(&context.params) {
            Ok(()) => module
                .execute(&context)
                .await
                .unwrap_or_else(|e| ModuleOutput::failed(e.to_string())),
            Err(e) => ModuleOutput::failed(e.to_string()),
        };

        if !spec.failed_when.is_empty() {
            let mut vars = context.vars;
            if let Some(register) = &spec.register {
                vars.insert(register.clone(), output.to_value());
            }
            match templates.evaluate_all(&spec.failed_when, &vars) {
                Ok(failed) => output.failed = failed,
                Err(e) => {
                    output.failed = true;
                    output.stderr = format!("evaluate failed_when error: {}", e);
                }
            }
        }
        output
    }

    fn loop_items(&self, spec: &TaskSpec, vars: &Variables) -> Result<Vec<Option<Value>>> {
        let items = match &spec.loop_items {
            None | Some(Value::Null) => return Ok(vec![None]),
            Some(Value::String(expr)) => self.ctx.templates.evaluate_value(expr, vars)?,
            Some(items @ Value::Array(_)) => self.ctx.templates.render_value(items, vars)?,
            Some(other) => other.clone(),
        };
        match items {
            Value::Array(items) => Ok(items.into_iter().map(Some).collect()),
            other => Err(Error::template_render(
                spec.loop_items
                    .as_ref()
                    .map(|v| v.to_string())
                    .unwrap_or_default(),
                format!("loop must be a list, got {}", other),
            )),
        }
    }

    async fn sync_pipeline(&self, key: &ObjectKey) -> Result<()> {
        // Read and write under one lock so a stale count never lands last.
        let _guard = self.status_lock.lock().await;
        let Some(mut pipeline) = self.ctx.client.pipelines.get(key).await? else {
            return Ok(());
        };
        let tasks = self.ctx.client.pipeline_tasks(&pipeline).await?;
        if pipeline.calculate_status(&tasks) {
            info!(
                pipeline = %key,
                phase = %pipeline.status.phase,
                "Pipeline status changed"
            );
            self.ctx.client.pipelines.update(pipeline).await?;
        }
        Ok(())
    }
}

fn join_lines<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    parts.filter(|s| !s.is_empty()).collect::<Vec<_>>().join("\n")
}

#[async_trait]
impl Reconciler for TaskReconciler {
    #[instrument(skip(self, cancel), fields(task = %key))]
    async fn reconcile(
        &self,
        key: &ObjectKey,
        cancel: &CancellationToken,
    ) -> Result<ReconcileResult> {
        let Some(mut task) = self.ctx.client.tasks.get(key).await? else {
            debug!("Task no longer exists");
            return Ok(ReconcileResult::done());
        };
        let Some(pipeline) = self.owner(&task).await? else {
            debug!("Owner pipeline no longer exists");
            return Ok(ReconcileResult::done());
        };
        if pipeline.is_paused() {
            debug!(pipeline = %pipeline.metadata.key(), "Pipeline paused");
            return Ok(ReconcileResult::done());
        }

        let result = self.advance(&mut task, &pipeline, cancel).await;
        if let Err(e) = self.sync_pipeline(&pipeline.metadata.key()).await {
            // The next reconcile of any task in the run recomputes it.
            warn!(pipeline = %pipeline.metadata.key(), error = %e, "Failed to sync pipeline status");
        }
        result
    }
}

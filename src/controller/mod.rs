//! Task controller.
//!
//! The controller turns a pipeline into task records and drives them through
//! a [`Reconciler`] with a fixed pool of workers:
//!
//! 1. [`TaskController::add_tasks`] compiles the pipeline's playbook (or finds
//!    the tasks of an earlier attempt), persists the records and queues them.
//! 2. [`TaskController::start`] runs `max_concurrent` workers against the
//!    shared [`WorkQueue`] until the run is cancelled.
//!
//! Workers interpret reconcile results level-triggered: an error or a plain
//! requeue goes back through the rate limiter, a fixed delay resets the
//! item's backoff history, and a finished item is forgotten.

pub mod phase;
pub mod queue;
pub mod ratelimit;
pub mod reconciler;

pub use phase::infer_phase;
pub use queue::WorkQueue;
pub use ratelimit::{BackoffStrategy, ItemBackoff, RateLimiter};
pub use reconciler::{ReconcileResult, Reconciler, TaskReconciler};

use futures::future::join_all;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::compiler::Compiler;
use crate::connection::Connector;
use crate::error::{Error, Result};
use crate::modules::ModuleRegistry;
use crate::pipeline::{InventoryRecord, Pipeline, PipelineConfig, PipelinePhase};
use crate::project::{MemoryProject, PlaybookResolver, ProjectLoader};
use crate::store::{Client, Resource, StoreError};
use crate::tags::TagFilter;
use crate::task::{ObjectKey, OwnerReference, TaskRecord};
use crate::vars::{TemplateEngine, VariableCache, VariableStore, Variables};

/// Collaborators shared by the controller and its reconciler.
#[derive(Clone)]
pub struct ControllerContext {
    /// Persistence
    pub client: Client,
    /// Project the playbooks are read from
    pub project: Arc<dyn ProjectLoader>,
    /// Registered modules
    pub modules: Arc<ModuleRegistry>,
    /// Remote execution, if any
    pub connector: Option<Arc<dyn Connector>>,
    /// Variable stores of running pipelines
    pub cache: Arc<VariableCache>,
    /// Template engine
    pub templates: Arc<TemplateEngine>,
    /// Extra role search paths
    pub roles_path: Vec<String>,
}

impl fmt::Debug for ControllerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerContext")
            .field("client", &self.client)
            .field("project", &self.project)
            .field("connector", &self.connector)
            .field("cached_runs", &self.cache.len())
            .field("roles_path", &self.roles_path)
            .finish()
    }
}

impl ControllerContext {
    /// Context with the built-in modules and no connector.
    pub fn new(client: Client, project: Arc<dyn ProjectLoader>) -> Self {
        Self {
            client,
            project,
            modules: Arc::new(ModuleRegistry::with_builtins()),
            connector: None,
            cache: Arc::new(VariableCache::new()),
            templates: Arc::new(TemplateEngine::new()),
            roles_path: Vec::new(),
        }
    }

    /// Context over in-memory persistence and an empty project.
    pub fn in_memory() -> Self {
        Self::new(Client::in_memory(), Arc::new(MemoryProject::new()))
    }

    /// Use a connector for fact gathering and remote modules.
    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Use a different module table.
    pub fn with_modules(mut self, modules: Arc<ModuleRegistry>) -> Self {
        self.modules = modules;
        self
    }

    /// Extra role search paths.
    pub fn with_roles_path(mut self, roles_path: Vec<String>) -> Self {
        self.roles_path = roles_path;
        self
    }

    /// Variable store of a pipeline run.
    ///
    /// A run missing from the cache gets a fresh store built from its
    /// inventory and config. Such a store has no locations, so tasks that
    /// resolve variables through it fail.
    pub async fn variable_store(&self, pipeline: &Pipeline) -> Result<Arc<VariableStore>> {
        if let Some(store) = self.cache.get(&pipeline.metadata.uid) {
            return Ok(store);
        }
        warn!(pipeline = %pipeline.metadata.key(), "Variable store not cached, rebuilding");
        let store = self.build_store(pipeline).await?;
        Ok(self
            .cache
            .get_or_insert_with(&pipeline.metadata.uid, move || store))
    }

    /// Fresh variable store over the pipeline's inventory and config vars.
    pub async fn build_store(&self, pipeline: &Pipeline) -> Result<VariableStore> {
        let namespace = &pipeline.metadata.namespace;
        let inventory_key = ObjectKey::new(namespace.clone(), pipeline.spec.inventory_ref.clone());
        let inventory = self
            .client
            .inventories
            .get(&inventory_key)
            .await?
            .ok_or(StoreError::NotFound {
                kind: InventoryRecord::KIND,
                key: inventory_key,
            })?;

        let base = match &pipeline.spec.config_ref {
            Some(name) => {
                let key = ObjectKey::new(namespace.clone(), name.clone());
                self.client
                    .configs
                    .get(&key)
                    .await?
                    .ok_or(StoreError::NotFound {
                        kind: PipelineConfig::KIND,
                        key,
                    })?
                    .vars
            }
            None => Variables::new(),
        };
        Ok(VariableStore::with_base_vars(inventory.spec, &base))
    }
}

/// Drives the tasks of pipelines to completion.
pub struct TaskController {
    ctx: ControllerContext,
    queue: Arc<WorkQueue<ObjectKey>>,
    reconciler: Arc<dyn Reconciler>,
    max_concurrent: usize,
}

impl fmt::Debug for TaskController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskController")
            .field("queue", &self.queue)
            .field("max_concurrent", &self.max_concurrent)
            .finish()
    }
}

impl TaskController {
    /// Controller with one worker and the default backoff.
    pub fn new(ctx: ControllerContext) -> Self {
        Self {
            reconciler: Arc::new(TaskReconciler::new(ctx.clone())),
            queue: Arc::new(WorkQueue::new(ItemBackoff::default())),
            max_concurrent: 1,
            ctx,
        }
    }

    /// Number of parallel workers, at least one.
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    /// Backoff for rate-limited requeues.
    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.queue = Arc::new(WorkQueue::new(ItemBackoff::new(base, max)));
        self
    }

    /// Use a different reconciler.
    pub fn with_reconciler(mut self, reconciler: Arc<dyn Reconciler>) -> Self {
        self.reconciler = reconciler;
        self
    }

    /// Shared collaborators.
    pub fn context(&self) -> &ControllerContext {
        &self.ctx
    }

    /// The work queue.
    pub fn queue(&self) -> &Arc<WorkQueue<ObjectKey>> {
        &self.queue
    }

    /// Materialize and queue the tasks of a pipeline.
    ///
    /// Tasks left by an earlier call are queued again instead of being
    /// recompiled. A compile error marks the pipeline `Failed` and is
    /// returned.
    #[instrument(skip(self), fields(pipeline = %key))]
    pub async fn add_tasks(&self, key: &ObjectKey) -> Result<()> {
        let client = &self.ctx.client;
        let mut pipeline = client
            .pipelines
            .get(key)
            .await?
            .ok_or_else(|| Error::PipelineNotFound(key.to_string()))?;

        let existing = client.pipeline_tasks(&pipeline).await?;
        if !existing.is_empty() {
            info!(tasks = existing.len(), "Tasks already materialized, requeueing");
            if pipeline.status.phase == PipelinePhase::Pending {
                pipeline.status.phase = PipelinePhase::Running;
                pipeline.calculate_status(&existing);
                pipeline = client.pipelines.update(pipeline).await?;
            } else if pipeline.calculate_status(&existing) {
                pipeline = client.pipelines.update(pipeline).await?;
            }
            debug!(phase = %pipeline.status.phase, "Pipeline status");
            for task in &existing {
                self.queue.add(task.metadata.key());
            }
            return Ok(());
        }

        let compiled = match self.compile(&pipeline).await {
            Ok(tasks) => tasks,
            Err(e) => {
                error!(error = %e, "Compilation failed");
                pipeline.status.phase = PipelinePhase::Failed;
                pipeline.status.reason = e.to_string();
                client.pipelines.update(pipeline).await?;
                return Err(e);
            }
        };

        let mut created = Vec::with_capacity(compiled.len());
        for mut task in compiled {
            task.metadata.namespace = pipeline.metadata.namespace.clone();
            task.metadata.generate_name = Some(format!("{}-", pipeline.metadata.name));
            task.metadata.owner_references.push(OwnerReference {
                kind: Pipeline::KIND.to_string(),
                name: pipeline.metadata.name.clone(),
                uid: pipeline.metadata.uid.clone(),
            });
            created.push(client.tasks.create(task).await?);
        }
        info!(tasks = created.len(), "Tasks created");

        pipeline.status.phase = PipelinePhase::Running;
        pipeline.calculate_status(&created);
        client.pipelines.update(pipeline).await?;

        for task in &created {
            self.queue.add(task.metadata.key());
        }
        Ok(())
    }

    async fn compile(&self, pipeline: &Pipeline) -> Result<Vec<TaskRecord>> {
        let store = Arc::new(self.ctx.build_store(pipeline).await?);
        let playbook = PlaybookResolver::new(Arc::clone(&self.ctx.project))
            .with_roles_path(self.ctx.roles_path.clone())
            .load(&pipeline.spec.playbook)
            .await?;

        let filter = TagFilter::new()
            .with_tags(pipeline.spec.tags.clone())
            .with_skip_tags(pipeline.spec.skip_tags.clone());
        let mut compiler =
            Compiler::new(Arc::clone(&store), Arc::clone(&self.ctx.modules)).with_filter(filter);
        if let Some(connector) = &self.ctx.connector {
            compiler = compiler.with_connector(Arc::clone(connector));
        }
        let tasks = compiler.compile(&playbook).await?;

        self.ctx.cache.insert(pipeline.metadata.uid.clone(), store);
        Ok(tasks)
    }

    /// Run the workers until `cancel` fires.
    ///
    /// On cancellation the queue stops handing out items and every worker
    /// finishes its in-flight reconcile before this returns.
    pub async fn start(&self, cancel: CancellationToken) -> Result<()> {
        info!(workers = self.max_concurrent, "Starting task controller");
        let delayed = tokio::spawn(Arc::clone(&self.queue).run_delayed());

        let workers: Vec<_> = (0..self.max_concurrent)
            .map(|id| {
                tokio::spawn(worker(
                    id,
                    Arc::clone(&self.queue),
                    Arc::clone(&self.reconciler),
                    cancel.clone(),
                ))
            })
            .collect();

        cancel.cancelled().await;
        info!("Shutting down task controller");
        self.queue.shutdown();

        for result in join_all(workers).await {
            if let Err(e) = result {
                error!(error = %e, "Worker panicked");
            }
        }
        if let Err(e) = delayed.await {
            error!(error = %e, "Delay queue panicked");
        }
        self.ctx.cache.clear();
        Ok(())
    }
}

async fn worker(
    id: usize,
    queue: Arc<WorkQueue<ObjectKey>>,
    reconciler: Arc<dyn Reconciler>,
    cancel: CancellationToken,
) {
    debug!(worker = id, "Worker started");
    while let Some(key) = queue.get().await {
        process_next_item(&queue, reconciler.as_ref(), &key, &cancel).await;
        queue.done(&key);
    }
    debug!(worker = id, "Worker stopped");
}

async fn process_next_item(
    queue: &WorkQueue<ObjectKey>,
    reconciler: &dyn Reconciler,
    key: &ObjectKey,
    cancel: &CancellationToken,
) {
    match reconciler.reconcile(key, cancel).await {
        Err(e) => {
            warn!(task = %key, error = %e, "Reconcile failed, requeueing");
            queue.add_rate_limited(key.clone());
        }
        Ok(ReconcileResult {
            requeue_after: Some(delay),
            ..
        }) => {
            queue.forget(key);
            queue.add_after(key.clone(), delay);
        }
        Ok(ReconcileResult { requeue: true, .. }) => queue.add_rate_limited(key.clone()),
        Ok(_) => queue.forget(key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::Inventory;
    use crate::pipeline::PipelineSpec;
    use crate::task::{ObjectMeta, TaskPhase};
    use pretty_assertions::assert_eq;

    const PLAYBOOK: &str = r#"
- name: site
  hosts: all
  tasks:
    - name: hello
      debug:
        msg: "hello {{ inventory_hostname }}"
    - name: check
      assert:
        that: "inventory_hostname != ''"
"#;

    async fn setup(playbook: &str) -> (TaskController, ObjectKey) {
        let project = MemoryProject::new().with_file("site.yaml", playbook);
        let ctx = ControllerContext::new(Client::in_memory(), Arc::new(project));

        let mut inventory = Inventory::new();
        inventory.add_host("h1", Variables::new());
        ctx.client
            .inventories
            .create(InventoryRecord {
                metadata: ObjectMeta::named("default", "inv"),
                spec: inventory,
            })
            .await
            .unwrap();
        let pipeline = ctx
            .client
            .pipelines
            .create(Pipeline {
                metadata: ObjectMeta::named("default", "run"),
                spec: PipelineSpec {
                    playbook: "site.yaml".into(),
                    inventory_ref: "inv".into(),
                    ..PipelineSpec::default()
                },
                ..Pipeline::default()
            })
            .await
            .unwrap();
        (TaskController::new(ctx), pipeline.metadata.key())
    }

    #[tokio::test]
    async fn test_add_tasks_materializes_and_queues() {
        let (controller, key) = setup(PLAYBOOK).await;
        controller.add_tasks(&key).await.unwrap();

        let client = &controller.context().client;
        let pipeline = client.pipelines.get(&key).await.unwrap().unwrap();
        assert_eq!(pipeline.status.phase, PipelinePhase::Running);
        assert_eq!(pipeline.status.task_result.total, 2);

        let tasks = client.pipeline_tasks(&pipeline).await.unwrap();
        assert_eq!(tasks.len(), 2);
        assert!(tasks[0].metadata.name.starts_with("run-"));
        assert_eq!(tasks[0].spec.module.name, "debug");
        assert_eq!(tasks[1].spec.module.name, "assert");
        assert_eq!(controller.queue().len(), 2);
        assert!(controller.context().cache.get(&pipeline.metadata.uid).is_some());
    }

    #[tokio::test]
    async fn test_add_tasks_is_idempotent() {
        let (controller, key) = setup(PLAYBOOK).await;
        controller.add_tasks(&key).await.unwrap();
        controller.add_tasks(&key).await.unwrap();

        let client = &controller.context().client;
        let pipeline = client.pipelines.get(&key).await.unwrap().unwrap();
        assert_eq!(client.pipeline_tasks(&pipeline).await.unwrap().len(), 2);
        assert_eq!(controller.queue().len(), 2);
    }

    #[tokio::test]
    async fn test_compile_error_fails_pipeline() {
        let (controller, key) = setup("- hosts: nowhere\n  tasks:\n    - debug: {}\n").await;
        assert!(controller.add_tasks(&key).await.is_err());

        let pipeline = controller
            .context()
            .client
            .pipelines
            .get(&key)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pipeline.status.phase, PipelinePhase::Failed);
        assert!(!pipeline.status.reason.is_empty());
    }

    #[tokio::test]
    async fn test_missing_pipeline() {
        let (controller, _) = setup(PLAYBOOK).await;
        let err = controller
            .add_tasks(&ObjectKey::new("default", "ghost"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PipelineNotFound(_)));
    }

    #[tokio::test]
    async fn test_start_runs_pipeline_to_completion() {
        let (controller, key) = setup(PLAYBOOK).await;
        let controller = Arc::new(controller.with_max_concurrent(2));
        controller.add_tasks(&key).await.unwrap();

        let cancel = CancellationToken::new();
        let run = {
            let controller = Arc::clone(&controller);
            let cancel = cancel.clone();
            tokio::spawn(async move { controller.start(cancel).await })
        };

        let client = controller.context().client.clone();
        let mut phase = PipelinePhase::Running;
        for _ in 0..500 {
            phase = client.pipelines.get(&key).await.unwrap().unwrap().status.phase;
            if phase.is_terminal() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(phase, PipelinePhase::Succeeded);

        cancel.cancel();
        run.await.unwrap().unwrap();

        let pipeline = client.pipelines.get(&key).await.unwrap().unwrap();
        let tasks = client.pipeline_tasks(&pipeline).await.unwrap();
        assert!(tasks.iter().all(|t| t.status.phase == TaskPhase::Succeeded));
        assert!(controller.context().cache.is_empty());
    }
}

//! Object persistence.
//!
//! Task, pipeline, config, and inventory records are kept in a store keyed by
//! namespace and name, with owner references linking tasks to their pipeline.
//! The controller only ever talks to a [`Client`], which bundles one
//! [`ResourceStore`] per record kind.
//!
//! - [`MemoryStore`]: in-process storage used by the CLI and in tests

pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;
use std::sync::Arc;
use thiserror::Error;

use crate::pipeline::{InventoryRecord, Pipeline, PipelineConfig};
use crate::task::{ObjectKey, ObjectMeta, TaskRecord};

/// Errors from the object store
#[derive(Error, Debug)]
pub enum StoreError {
    /// Object does not exist
    #[error("{kind} '{key}' not found")]
    NotFound {
        /// Object kind
        kind: &'static str,
        /// Object key
        key: ObjectKey,
    },

    /// Object already exists
    #[error("{kind} '{key}' already exists")]
    AlreadyExists {
        /// Object kind
        kind: &'static str,
        /// Object key
        key: ObjectKey,
    },

    /// Object cannot be stored as given
    #[error("Invalid {kind}: {message}")]
    Invalid {
        /// Object kind
        kind: &'static str,
        /// Error message
        message: String,
    },
}

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A record kind the store can hold.
pub trait Resource: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Kind name used in owner references and errors
    const KIND: &'static str;

    /// Object metadata
    fn metadata(&self) -> &ObjectMeta;

    /// Mutable object metadata
    fn metadata_mut(&mut self) -> &mut ObjectMeta;

    /// Key of the object
    fn key(&self) -> ObjectKey {
        self.metadata().key()
    }
}

impl Resource for TaskRecord {
    const KIND: &'static str = "Task";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Resource for Pipeline {
    const KIND: &'static str = "Pipeline";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Resource for PipelineConfig {
    const KIND: &'static str = "Config";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

impl Resource for InventoryRecord {
    const KIND: &'static str = "Inventory";

    fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/// Storage for one record kind.
#[async_trait]
pub trait ResourceStore<R: Resource>: Send + Sync + Debug {
    /// Store a new object.
    ///
    /// Assigns the UID and creation timestamp, and generates the name from
    /// `generate_name` when the name is empty. Returns the stored object.
    async fn create(&self, object: R) -> StoreResult<R>;

    /// Replace an existing object.
    async fn update(&self, object: R) -> StoreResult<R>;

    /// Fetch an object.
    async fn get(&self, key: &ObjectKey) -> StoreResult<Option<R>>;

    /// List objects in a namespace, optionally only those owned by `owner_uid`.
    async fn list(&self, namespace: &str, owner_uid: Option<&str>) -> StoreResult<Vec<R>>;

    /// Remove an object. Returns whether it existed.
    async fn delete(&self, key: &ObjectKey) -> StoreResult<bool>;
}

/// Handle to the stores of every record kind.
#[derive(Debug, Clone)]
pub struct Client {
    /// Task records
    pub tasks: Arc<dyn ResourceStore<TaskRecord>>,
    /// Pipelines
    pub pipelines: Arc<dyn ResourceStore<Pipeline>>,
    /// Configs
    pub configs: Arc<dyn ResourceStore<PipelineConfig>>,
    /// Inventories
    pub inventories: Arc<dyn ResourceStore<InventoryRecord>>,
}

impl Client {
    /// Client backed by in-memory stores.
    pub fn in_memory() -> Self {
        Self {
            tasks: Arc::new(MemoryStore::<TaskRecord>::new()),
            pipelines: Arc::new(MemoryStore::<Pipeline>::new()),
            configs: Arc::new(MemoryStore::<PipelineConfig>::new()),
            inventories: Arc::new(MemoryStore::<InventoryRecord>::new()),
        }
    }

    /// Tasks owned by a pipeline, in document order.
    pub async fn pipeline_tasks(&self, pipeline: &Pipeline) -> StoreResult<Vec<TaskRecord>> {
        let mut tasks = self
            .tasks
            .list(&pipeline.metadata.namespace, Some(&pipeline.metadata.uid))
            .await?;
        tasks.sort_by_key(|t| t.sequence().unwrap_or(u64::MAX));
        Ok(tasks)
    }
}

impl Default for Client {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{OwnerReference, SEQUENCE_ANNOTATION};

    #[tokio::test]
    async fn test_pipeline_tasks_sorted_by_sequence() {
        let client = Client::in_memory();
        let pipeline = client
            .pipelines
            .create(Pipeline {
                metadata: ObjectMeta::named("default", "p"),
                ..Pipeline::default()
            })
            .await
            .unwrap();

        for seq in [2u64, 0, 1] {
            let mut meta = ObjectMeta::named("default", format!("t{}", seq));
            meta.owner_references.push(OwnerReference {
                kind: Pipeline::KIND.into(),
                name: pipeline.metadata.name.clone(),
                uid: pipeline.metadata.uid.clone(),
            });
            meta.annotations
                .insert(SEQUENCE_ANNOTATION.into(), seq.to_string());
            client
                .tasks
                .create(TaskRecord {
                    metadata: meta,
                    ..TaskRecord::default()
                })
                .await
                .unwrap();
        }
        client
            .tasks
            .create(TaskRecord {
                metadata: ObjectMeta::named("default", "orphan"),
                ..TaskRecord::default()
            })
            .await
            .unwrap();

        let names: Vec<String> = client
            .pipeline_tasks(&pipeline)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.metadata.name)
            .collect();
        assert_eq!(names, vec!["t0", "t1", "t2"]);
    }

    #[test]
    fn test_not_found_message() {
        let err = StoreError::NotFound {
            kind: TaskRecord::KIND,
            key: ObjectKey::new("default", "x"),
        };
        assert_eq!(err.to_string(), "Task 'default/x' not found");
    }
}

//! In-memory object store.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;
use uuid::Uuid;

use super::{Resource, ResourceStore, StoreError, StoreResult};
use crate::task::ObjectKey;

/// Length of the random suffix appended to `generate_name`.
const GENERATED_SUFFIX_LEN: usize = 8;

/// In-memory store for one record kind
pub struct MemoryStore<R: Resource> {
    objects: DashMap<ObjectKey, R>,
}

impl<R: Resource> MemoryStore<R> {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            objects: DashMap::new(),
        }
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn generated_name(prefix: &str) -> String {
        let id = Uuid::new_v4().simple().to_string();
        format!("{}{}", prefix, &id[..GENERATED_SUFFIX_LEN])
    }
}

impl<R: Resource> Default for MemoryStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Resource> fmt::Debug for MemoryStore<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("kind", &R::KIND)
            .field("objects", &self.objects.len())
            .finish()
    }
}

#[async_trait]
impl<R: Resource> ResourceStore<R> for MemoryStore<R> {
    async fn create(&self, mut object: R) -> StoreResult<R> {
        let meta = object.metadata_mut();
        if meta.name.is_empty() {
            let prefix = meta.generate_name.as_deref().ok_or_else(|| StoreError::Invalid {
                kind: R::KIND,
                message: "name or generateName is required".to_string(),
            })?;
            meta.name = Self::generated_name(prefix);
        }
        meta.uid = Uuid::new_v4().to_string();
        meta.creation_timestamp = Some(Utc::now());

        let key = object.key();
        match self.objects.entry(key.clone()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists {
                kind: R::KIND,
                key,
            }),
            Entry::Vacant(slot) => {
                slot.insert(object.clone());
                Ok(object)
            }
        }
    }

    async fn update(&self, object: R) -> StoreResult<R> {
        let key = object.key();
        match self.objects.get_mut(&key) {
            Some(mut existing) => {
                *existing = object.clone();
                Ok(object)
            }
            None => Err(StoreError::NotFound { kind: R::KIND, key }),
        }
    }

    async fn get(&self, key: &ObjectKey) -> StoreResult<Option<R>> {
        Ok(self.objects.get(key).map(|r| r.value().clone()))
    }

    async fn list(&self, namespace: &str, owner_uid: Option<&str>) -> StoreResult<Vec<R>> {
        let mut objects: Vec<R> = self
            .objects
            .iter()
            .filter(|r| r.key().namespace == namespace)
            .filter(|r| owner_uid.map_or(true, |uid| r.value().metadata().is_owned_by(uid)))
            .map(|r| r.value().clone())
            .collect();
        objects.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(objects)
    }

    async fn delete(&self, key: &ObjectKey) -> StoreResult<bool> {
        Ok(self.objects.remove(key).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{ObjectMeta, TaskRecord};

    fn record(name: &str) -> TaskRecord {
        TaskRecord {
            metadata: ObjectMeta::named("default", name),
            ..TaskRecord::default()
        }
    }

    #[tokio::test]
    async fn test_create_assigns_uid_and_timestamp() {
        let store = MemoryStore::<TaskRecord>::new();
        let created = store.create(record("a")).await.unwrap();
        assert!(!created.metadata.uid.is_empty());
        assert!(created.metadata.creation_timestamp.is_some());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_generate_name() {
        let store = MemoryStore::<TaskRecord>::new();
        let mut task = TaskRecord::default();
        task.metadata.namespace = "default".into();
        task.metadata.generate_name = Some("pipeline-".into());
        let created = store.create(task).await.unwrap();
        assert!(created.metadata.name.starts_with("pipeline-"));
        assert_eq!(created.metadata.name.len(), "pipeline-".len() + 8);

        let err = store.create(TaskRecord::default()).await.unwrap_err();
        assert!(matches!(err, StoreError::Invalid { .. }));
    }

    #[tokio::test]
    async fn test_create_duplicate_rejected() {
        let store = MemoryStore::<TaskRecord>::new();
        store.create(record("a")).await.unwrap();
        let err = store.create(record("a")).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_update_and_get() {
        let store = MemoryStore::<TaskRecord>::new();
        let mut created = store.create(record("a")).await.unwrap();
        created.status.restart_count = 2;
        store.update(created.clone()).await.unwrap();

        let fetched = store
            .get(&ObjectKey::new("default", "a"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.status.restart_count, 2);

        let missing = store.update(record("b")).await.unwrap_err();
        assert!(matches!(missing, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_list_filters_namespace() {
        let store = MemoryStore::<TaskRecord>::new();
        store.create(record("b")).await.unwrap();
        store.create(record("a")).await.unwrap();
        let mut other = record("c");
        other.metadata.namespace = "other".into();
        store.create(other).await.unwrap();

        let names: Vec<String> = store
            .list("default", None)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.metadata.name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);

        assert!(store.delete(&ObjectKey::new("default", "a")).await.unwrap());
        assert!(!store.delete(&ObjectKey::new("default", "a")).await.unwrap());
    }
}

//! Task records.
//!
//! A [`TaskRecord`] is the persisted unit of work produced for one leaf block
//! instance. Records follow the object layout of the persistence layer:
//! [`ObjectMeta`] (name, namespace, UID, annotations, owner references), an
//! immutable [`TaskSpec`], and a [`TaskStatus`] mutated by the reconciler.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::vars::LocationId;

/// Annotation naming the role a task came from.
pub const ROLE_ANNOTATION: &str = "kubekit.io/role";
/// Annotation holding the project directory the block was loaded from.
pub const REL_PATH_ANNOTATION: &str = "kubekit.io/rel-path";
/// Annotation holding the document-order index of a task in its pipeline.
pub const SEQUENCE_ANNOTATION: &str = "kubekit.io/sequence";

/// Namespace and name of a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    /// Namespace
    pub namespace: String,
    /// Name
    pub name: String,
}

impl ObjectKey {
    /// Create a key
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Link from an object to the object owning it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerReference {
    /// Owner kind
    pub kind: String,
    /// Owner name
    pub name: String,
    /// Owner UID
    pub uid: String,
}

/// Metadata common to every stored object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Name, generated on create when empty
    #[serde(default)]
    pub name: String,
    /// Prefix for generated names
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generate_name: Option<String>,
    /// Namespace
    #[serde(default)]
    pub namespace: String,
    /// UID assigned on create
    #[serde(default)]
    pub uid: String,
    /// Annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Owners
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
    /// Creation time, set on create
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    /// Metadata with a fixed name.
    pub fn named(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// Key of the object.
    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), self.name.clone())
    }

    /// Annotation value.
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    /// Whether `uid` owns this object.
    pub fn is_owned_by(&self, uid: &str) -> bool {
        self.owner_references.iter().any(|o| o.uid == uid)
    }
}

/// Lifecycle phase of a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskPhase {
    /// Waiting for earlier tasks
    #[default]
    Pending,
    /// Ready to execute
    Running,
    /// Finished successfully on every host
    Succeeded,
    /// Failed on at least one host
    Failed,
    /// Skipped by `when` or an earlier failure
    Skipped,
    /// Failed with `ignore_errors`
    Ignored,
}

impl fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskPhase::Pending => "Pending",
            TaskPhase::Running => "Running",
            TaskPhase::Succeeded => "Succeeded",
            TaskPhase::Failed => "Failed",
            TaskPhase::Skipped => "Skipped",
            TaskPhase::Ignored => "Ignored",
        };
        write!(f, "{}", s)
    }
}

/// Module invocation of a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleRef {
    /// Registered module name, never empty
    pub name: String,
    /// Raw arguments, rendered per host at execution
    #[serde(default)]
    pub args: Value,
}

/// Desired state of a task, fixed at compile time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    /// Display name
    pub name: String,
    /// Target hosts
    pub hosts: Vec<String>,
    /// Module to run
    pub module: ModuleRef,
    /// Conditions from every enclosing scope, outermost first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub when: Vec<String>,
    /// Conditions marking a run as failed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_when: Vec<String>,
    /// Loop items or expression
    #[serde(default, rename = "loop", skip_serializing_if = "Option::is_none")]
    pub loop_items: Option<Value>,
    /// Variable receiving the result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub register: Option<String>,
    /// Whether failures are ignored
    #[serde(default)]
    pub ignore_errors: bool,
    /// Additional attempts after a failure
    #[serde(default)]
    pub retries: u32,
    /// Variable scope of the task
    pub location: LocationId,
}

/// Result of one host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostResult {
    /// Host
    pub host: String,
    /// Standard output
    #[serde(default)]
    pub stdout: String,
    /// Standard error or error message
    #[serde(default)]
    pub stderr: String,
    /// Skipped by `when`
    #[serde(default)]
    pub skipped: bool,
    /// Failed
    #[serde(default)]
    pub failed: bool,
}

impl HostResult {
    /// Host skipped with a message.
    pub fn skipped(host: impl Into<String>, stdout: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            stdout: stdout.into(),
            skipped: true,
            ..Self::default()
        }
    }

    /// Host failed with a message.
    pub fn failed(host: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            stderr: stderr.into(),
            failed: true,
            ..Self::default()
        }
    }
}

/// One execution attempt of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCondition {
    /// Start of the attempt
    pub start_timestamp: DateTime<Utc>,
    /// End of the attempt
    pub end_timestamp: DateTime<Utc>,
    /// Per-host results
    pub host_results: Vec<HostResult>,
}

/// Observed state of a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    /// Current phase
    pub phase: TaskPhase,
    /// Number of retries so far
    #[serde(default)]
    pub restart_count: u32,
    /// Failure details per host
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_detail: Vec<HostResult>,
    /// Execution attempts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<TaskCondition>,
}

/// A compiled task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Object metadata
    pub metadata: ObjectMeta,
    /// Compiled spec
    pub spec: TaskSpec,
    /// Reconciler-owned status
    #[serde(default)]
    pub status: TaskStatus,
}

impl TaskRecord {
    /// Whether every retry is used up.
    pub fn retries_exhausted(&self) -> bool {
        self.status.restart_count >= self.spec.retries
    }

    /// Whether the task is in a final phase. `Failed` is final only once
    /// retries are exhausted.
    pub fn is_complete(&self) -> bool {
        match self.status.phase {
            TaskPhase::Succeeded | TaskPhase::Skipped | TaskPhase::Ignored => true,
            TaskPhase::Failed => self.retries_exhausted(),
            TaskPhase::Pending | TaskPhase::Running => false,
        }
    }

    /// Whether the task failed for good.
    pub fn is_failed(&self) -> bool {
        self.status.phase == TaskPhase::Failed && self.retries_exhausted()
    }

    /// Document-order index within the pipeline.
    pub fn sequence(&self) -> Option<u64> {
        self.metadata
            .annotation(SEQUENCE_ANNOTATION)
            .and_then(|s| s.parse().ok())
    }
}

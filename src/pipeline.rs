//! Pipeline, config, and inventory records.
//!
//! A [`Pipeline`] names a playbook, the inventory and config records to run it
//! against, and the tag filters. Its status is a read-only summary of the
//! phases of the tasks it owns, recomputed by [`Pipeline::calculate_status`].

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::inventory::Inventory;
use crate::task::{HostResult, ObjectMeta, TaskPhase, TaskRecord};
use crate::vars::{deserialize_vars, Variables};

/// Annotation that pauses reconciliation of a pipeline's tasks.
pub const PAUSE_ANNOTATION: &str = "kubekit.io/pause";

/// Reason recorded when a task failed.
pub const TASK_FAILED_REASON: &str = "task failed";

/// Phase of a pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelinePhase {
    /// Not compiled yet
    #[default]
    Pending,
    /// Tasks are being reconciled
    Running,
    /// Every task finished
    Succeeded,
    /// Compilation or a task failed
    Failed,
}

impl PipelinePhase {
    /// Whether the phase is final.
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelinePhase::Succeeded | PipelinePhase::Failed)
    }
}

impl fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelinePhase::Pending => "Pending",
            PipelinePhase::Running => "Running",
            PipelinePhase::Succeeded => "Succeeded",
            PipelinePhase::Failed => "Failed",
        };
        write!(f, "{}", s)
    }
}

/// What a pipeline runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSpec {
    /// Playbook path inside the project
    pub playbook: String,
    /// Name of the inventory record in the pipeline's namespace
    pub inventory_ref: String,
    /// Name of the config record, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_ref: Option<String>,
    /// Only run units carrying one of these tags
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Skip units carrying one of these tags
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skip_tags: Vec<String>,
}

/// Task counts of a pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResultCounts {
    /// All tasks
    pub total: usize,
    /// Succeeded tasks
    pub success: usize,
    /// Failed tasks with `ignore_errors`
    pub ignored: usize,
    /// Skipped tasks
    pub skipped: usize,
    /// Failed tasks with retries exhausted
    pub failed: usize,
}

/// Failure summary of one task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineFailedDetail {
    /// Task name
    pub task: String,
    /// Failed hosts
    pub hosts: Vec<HostResult>,
}

/// Observed state of a pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStatus {
    /// Current phase
    pub phase: PipelinePhase,
    /// Reason for the phase
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    /// Task counts
    #[serde(default)]
    pub task_result: TaskResultCounts,
    /// Failed tasks
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_detail: Vec<PipelineFailedDetail>,
}

/// A pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    /// Object metadata
    pub metadata: ObjectMeta,
    /// What to run
    pub spec: PipelineSpec,
    /// Observed state
    #[serde(default)]
    pub status: PipelineStatus,
}

impl Pipeline {
    /// Whether the pause annotation is set to `true`.
    pub fn is_paused(&self) -> bool {
        self.metadata.annotation(PAUSE_ANNOTATION) == Some("true")
    }

    /// Recompute status from the pipeline's tasks.
    ///
    /// Only a `Running` pipeline is touched. Returns whether the status
    /// changed.
    pub fn calculate_status(&mut self, tasks: &[TaskRecord]) -> bool {
        if self.status.phase != PipelinePhase::Running {
            return false;
        }
        let before = self.status.clone();

        let mut counts = TaskResultCounts {
            total: tasks.len(),
            ..TaskResultCounts::default()
        };
        let mut failed_detail = Vec::new();
        for task in tasks {
            match task.status.phase {
                TaskPhase::Succeeded => counts.success += 1,
                TaskPhase::Ignored => counts.ignored += 1,
                TaskPhase::Skipped => counts.skipped += 1,
                TaskPhase::Failed if task.is_failed() => {
                    counts.failed += 1;
                    failed_detail.push(PipelineFailedDetail {
                        task: task.spec.name.clone(),
                        hosts: task.status.failed_detail.clone(),
                    });
                }
                _ => {}
            }
        }

        self.status.task_result = counts;
        if counts.failed > 0 {
            self.status.phase = PipelinePhase::Failed;
            self.status.reason = TASK_FAILED_REASON.to_string();
            self.status.failed_detail = failed_detail;
        } else if counts.success + counts.ignored + counts.skipped == counts.total {
            self.status.phase = PipelinePhase::Succeeded;
        }
        self.status != before
    }
}

/// Variables applied beneath the inventory of a pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Object metadata
    pub metadata: ObjectMeta,
    /// Variables
    #[serde(default, deserialize_with = "deserialize_vars")]
    pub vars: Variables,
}

/// Stored inventory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InventoryRecord {
    /// Object metadata
    pub metadata: ObjectMeta,
    /// Inventory content
    pub spec: Inventory,
}

//! # kubekit - Playbook Compilation and Task Scheduling
//!
//! kubekit compiles declarative playbooks (plays of roles and blocks
//! addressed to groups of hosts) into an ordered set of task records,
//! resolves per-host variables through a layered scope tree, and drives the
//! tasks to completion with a bounded pool of reconcile workers.
//!
//! ## Core Concepts
//!
//! - **Playbooks**: YAML plays containing `pre_tasks`, roles, `tasks`, and `post_tasks`
//! - **Blocks**: a task, or a group of blocks with `rescue` and `always` sections
//! - **Inventory**: hosts organized into groups with variables
//! - **Locations**: nodes of the variable-scope tree, one per play, role, and block instance
//! - **Task records**: the persisted unit of work compiled from one leaf block
//! - **Pipelines**: one run of a playbook against an inventory
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        CLI (kubekit binary)                          │
//! │                 compile, check, run (clap derive)                    │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                          Task Controller                             │
//! │       (rate-limited work queue, worker pool, task reconciler)        │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │
//!          ┌─────────────────────────┼─────────────────────────┐
//!          ▼                         ▼                         ▼
//! ┌─────────────────┐   ┌─────────────────────┐   ┌─────────────────────┐
//! │    Playbook     │   │   Variable Store    │   │   Module Registry   │
//! │    Compiler     │   │   (location tree +  │   │   (registered-name  │
//! │  (tags, serial) │   │    host layers)     │   │    lookup table)    │
//! └─────────────────┘   └─────────────────────┘   └─────────────────────┘
//!          │                         │                         │
//!          └─────────────────────────┼─────────────────────────┘
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │            Collaborators: project loader, connector, store           │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use kubekit::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let project = Arc::new(FsProject::new("."));
//!     let ctx = ControllerContext::new(Client::in_memory(), project);
//!     let controller = TaskController::new(ctx).with_max_concurrent(4);
//!
//!     controller.add_tasks(&ObjectKey::new("default", "site")).await?;
//!     controller.start(CancellationToken::new()).await
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

// Re-export commonly used items in prelude
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    pub use std::sync::Arc;
    pub use tokio_util::sync::CancellationToken;

    // Error handling
    pub use crate::error::{Error, Result};

    // Compilation
    pub use crate::compiler::{Compiler, Facts};
    pub use crate::inventory::{partition, Group, Inventory, SerialValue};
    pub use crate::playbook::{Block, Play, Playbook};
    pub use crate::project::{FsProject, MemoryProject, PlaybookResolver, ProjectLoader};
    pub use crate::tags::{is_enabled, TagFilter};

    // Variables
    pub use crate::vars::{
        HostMerge, Location, LocationId, LocationKind, TemplateEngine, VariableCache,
        VariableStore, Variables,
    };

    // Execution
    pub use crate::connection::{CommandResult, ConnectionError, Connector, LocalConnector};
    pub use crate::controller::{
        ControllerContext, ReconcileResult, Reconciler, TaskController, TaskReconciler,
    };
    pub use crate::modules::{Module, ModuleContext, ModuleOutput, ModuleRegistry};

    // Records
    pub use crate::pipeline::{Pipeline, PipelinePhase, PipelineSpec};
    pub use crate::store::{Client, ResourceStore};
    pub use crate::task::{ObjectKey, ObjectMeta, TaskPhase, TaskRecord};
}

// ============================================================================
// Core
// ============================================================================

/// Error types and result aliases.
///
/// One crate-wide [`Error`](error::Error) enum with sub-enums per
/// collaborator converted through `#[from]`.
pub mod error;

pub use error::{Error, Result};

/// Tag evaluation and inheritance.
pub mod tags;

/// Variable store, location tree, and template rendering.
///
/// Variables resolve through the inventory (all, groups, host), runtime host
/// data, and the chain of locations a task sits under.
pub mod vars;

/// Host and group inventory, host pattern expansion, serial batches.
pub mod inventory;

// ============================================================================
// Playbooks
// ============================================================================

/// Playbook, play, role reference, and block model.
pub mod playbook;

/// Project loading and playbook resolution.
///
/// Reads playbooks, roles, and included task files through a
/// [`ProjectLoader`](project::ProjectLoader) and splices them into one
/// resolved [`Playbook`](playbook::Playbook).
pub mod project;

/// Playbook compiler and fact gathering.
pub mod compiler;

// ============================================================================
// Execution
// ============================================================================

/// Module table and built-in modules.
pub mod modules;

/// Remote execution interface.
pub mod connection;

/// Task records.
pub mod task;

/// Pipeline, config, and inventory records.
pub mod pipeline;

/// Persistence interface.
pub mod store;

/// Task controller, work queue, and reconciler.
pub mod controller;

// ============================================================================
// Application
// ============================================================================

/// Configuration loading.
pub mod config;

/// Logging setup.
pub mod telemetry;

// ============================================================================
// Version Information
// ============================================================================

/// Returns the current version of kubekit.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

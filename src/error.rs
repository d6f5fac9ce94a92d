//! Error types for kubekit.
//!
//! One crate-wide [`Error`] covers compilation, variable resolution,
//! inventory expansion, persistence, and reconciliation. Compile errors always
//! name the play, block, role, or host pattern that caused them.

use std::path::PathBuf;
use thiserror::Error;

use crate::connection::ConnectionError;
use crate::inventory::InventoryError;
use crate::modules::ModuleError;
use crate::project::ProjectError;
use crate::store::StoreError;

/// Result type alias for kubekit operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for kubekit.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Playbook Errors
    // ========================================================================
    /// Error parsing a playbook, role, or task file.
    #[error("Failed to parse '{path}': {message}")]
    PlaybookParse {
        /// Path of the file inside the project
        path: PathBuf,
        /// Error message
        message: String,
        /// Source error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Structural problem in a playbook.
    #[error("Playbook validation failed: {0}")]
    PlaybookValidation(String),

    /// `import_playbook` chain revisits a file.
    #[error("Circular import_playbook detected: {0}")]
    ImportCycle(String),

    // ========================================================================
    // Compile Errors
    // ========================================================================
    /// Role could not be located in any search path.
    #[error("Role '{role}' referenced by play '{play}' not found")]
    RoleNotFound {
        /// Role name
        role: String,
        /// Play referencing the role
        play: String,
    },

    /// Role dependency chain revisits a role.
    #[error("Circular role dependency detected: {0}")]
    RoleCycle(String),

    /// `include_tasks` file could not be located.
    #[error("Included task file '{file}' of block '{block}' not found")]
    IncludeNotFound {
        /// Block carrying the include
        block: String,
        /// Referenced file
        file: String,
    },

    /// `include_tasks` chain revisits a file.
    #[error("Circular include_tasks detected: {0}")]
    IncludeCycle(String),

    /// A block still carries an `include_tasks` reference at compile time.
    #[error("Block '{block}' in play '{play}' has an unresolved include_tasks '{file}'")]
    UnresolvedInclude {
        /// Play name
        play: String,
        /// Block name
        block: String,
        /// Referenced file
        file: String,
    },

    /// Leaf block without any registered module key.
    #[error("No module/action detected in block '{block}' of play '{play}'")]
    NoModule {
        /// Play name
        play: String,
        /// Block name
        block: String,
    },

    /// Host pattern of a play resolved to nothing.
    #[error("Host pattern '{pattern}' of play '{play}' resolved to empty set")]
    EmptyHosts {
        /// Play name
        play: String,
        /// Joined host pattern
        pattern: String,
    },

    /// Invalid `serial` value on a play.
    #[error("Invalid serial value '{value}' in play '{play}'")]
    InvalidSerial {
        /// Play name
        play: String,
        /// Offending value
        value: String,
    },

    // ========================================================================
    // Variable Errors
    // ========================================================================
    /// Location merge referenced a parent that was never merged.
    #[error("Location {id} ('{name}') references unknown parent location {parent}")]
    DanglingLocation {
        /// Location being merged
        id: u64,
        /// Location display name
        name: String,
        /// Missing parent
        parent: u64,
    },

    /// Location merge would create a cycle or uses the reserved root id.
    #[error("Invalid location {id} ('{name}'): {message}")]
    InvalidLocation {
        /// Location id
        id: u64,
        /// Location display name
        name: String,
        /// Error message
        message: String,
    },

    /// Location lookup failed.
    #[error("Location {0} not found")]
    LocationNotFound(u64),

    /// Template rendering failure.
    #[error("Template rendering failed for '{template}': {message}")]
    TemplateRender {
        /// Template source
        template: String,
        /// Error message
        message: String,
    },

    // ========================================================================
    // Inventory and Collaborator Errors
    // ========================================================================
    /// Inventory error.
    #[error(transparent)]
    Inventory(#[from] InventoryError),

    /// Project loader error.
    #[error(transparent)]
    Project(#[from] ProjectError),

    /// Remote execution error.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Module error.
    #[error(transparent)]
    Module(#[from] ModuleError),

    /// Persistence error.
    #[error(transparent)]
    Store(#[from] StoreError),

    // ========================================================================
    // Controller Errors
    // ========================================================================
    /// Pipeline record missing.
    #[error("Pipeline '{0}' not found")]
    PipelineNotFound(String),

    /// Task failed on a host.
    #[error("Task '{task}' failed on host '{host}': {message}")]
    TaskFailed {
        /// Task name
        task: String,
        /// Target host
        host: String,
        /// Error message
        message: String,
    },

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // IO and Serialization Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error.
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// JSON parsing error.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Template engine error.
    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),

    // ========================================================================
    // Other Errors
    // ========================================================================
    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a new playbook parse error.
    pub fn playbook_parse(
        path: impl Into<PathBuf>,
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::PlaybookParse {
            path: path.into(),
            message: message.into(),
            source,
        }
    }

    /// Creates a new task failed error.
    pub fn task_failed(
        task: impl Into<String>,
        host: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::TaskFailed {
            task: task.into(),
            host: host.into(),
            message: message.into(),
        }
    }

    /// Creates a new template render error.
    pub fn template_render(template: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TemplateRender {
            template: template.into(),
            message: message.into(),
        }
    }

    /// Returns true for errors that abort compilation of a pipeline run.
    ///
    /// These are never retried by the controller's caller.
    pub fn is_compile_error(&self) -> bool {
        matches!(
            self,
            Error::PlaybookParse { .. }
                | Error::PlaybookValidation(_)
                | Error::ImportCycle(_)
                | Error::RoleNotFound { .. }
                | Error::RoleCycle(_)
                | Error::IncludeNotFound { .. }
                | Error::IncludeCycle(_)
                | Error::UnresolvedInclude { .. }
                | Error::NoModule { .. }
                | Error::EmptyHosts { .. }
                | Error::InvalidSerial { .. }
                | Error::DanglingLocation { .. }
                | Error::InvalidLocation { .. }
                | Error::Inventory(_)
        )
    }

    /// Returns the error code for CLI exit status.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::TaskFailed { .. } => 2,
            Error::Connection(_) => 3,
            e if e.is_compile_error() => 4,
            Error::Config(_) => 5,
            _ => 1,
        }
    }
}

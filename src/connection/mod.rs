//! Remote execution interface.
//!
//! The compiler (fact gathering) and the modules reach hosts only through
//! the [`Connector`] trait, which runs a shell command on a named host and
//! fetches files from it. The transport behind it is pluggable; this crate
//! ships [`LocalConnector`], which runs everything on the control node.
//!
//! # Example
//!
//! ```rust,ignore
//! use kubekit::connection::{Connector, LocalConnector};
//!
//! let connector = LocalConnector::new();
//! let result = connector.execute_command("node1", "uname -r").await?;
//! println!("kernel: {}", result.stdout.trim());
//! ```

/// Local execution connector.
pub mod local;

pub use local::LocalConnector;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during remote execution.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Failed to reach the host.
    #[error("Connection to '{host}' failed: {message}")]
    ConnectionFailed {
        /// Target host
        host: String,
        /// Error message
        message: String,
    },

    /// The command could not be run (not a non-zero exit).
    #[error("Command execution failed: {0}")]
    ExecutionFailed(String),

    /// File fetch failed.
    #[error("File transfer failed: {0}")]
    TransferFailed(String),

    /// Operation timed out.
    #[error("Connection timeout after {0} seconds")]
    Timeout(u64),

    /// The host is unknown to the connector.
    #[error("Host not found: {0}")]
    HostNotFound(String),

    /// I/O error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for connection operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Result of a command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    /// Exit code of the command (0 typically indicates success).
    pub exit_code: i32,
    /// Content written to standard output.
    pub stdout: String,
    /// Content written to standard error.
    pub stderr: String,
    /// `true` if `exit_code == 0`.
    pub success: bool,
}

impl CommandResult {
    /// Create a successful result
    pub fn success(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: stderr.into(),
            success: true,
        }
    }

    /// Create a failed result
    pub fn failure(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
            success: false,
        }
    }
}

/// Remote execution on named hosts.
#[async_trait]
pub trait Connector: Send + Sync + std::fmt::Debug {
    /// Run a shell command on `host`.
    async fn execute_command(&self, host: &str, command: &str) -> ConnectionResult<CommandResult>;

    /// Read a file from `host`.
    async fn fetch_file(&self, host: &str, remote_path: &Path) -> ConnectionResult<Vec<u8>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_result_constructors() {
        let ok = CommandResult::success("out", "");
        assert!(ok.success);
        assert_eq!(ok.exit_code, 0);

        let failed = CommandResult::failure(2, "", "boom");
        assert!(!failed.success);
        assert_eq!(failed.stderr, "boom");
    }

    #[test]
    fn test_error_display() {
        let err = ConnectionError::ConnectionFailed {
            host: "node1".into(),
            message: "refused".into(),
        };
        assert_eq!(err.to_string(), "Connection to 'node1' failed: refused");
    }
}

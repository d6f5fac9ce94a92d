//! Local connector
//!
//! Runs commands with `sh -c` on the control node and reads files from the
//! local filesystem, whatever host name is given.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, trace};

use super::{CommandResult, ConnectionError, ConnectionResult, Connector};

/// Connector executing everything on the current host
#[derive(Debug, Clone, Default)]
pub struct LocalConnector {
    timeout: Option<Duration>,
}

impl LocalConnector {
    /// Create a new local connector
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail commands running longer than `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl Connector for LocalConnector {
    async fn execute_command(&self, host: &str, command: &str) -> ConnectionResult<CommandResult> {
        debug!(host = %host, command = %command, "Executing local command");

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| {
            ConnectionError::ExecutionFailed(format!("Failed to spawn process: {}", e))
        })?;

        let output = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, child.wait_with_output())
                .await
                .map_err(|_| ConnectionError::Timeout(timeout.as_secs()))?,
            None => child.wait_with_output().await,
        }
        .map_err(|e| {
            ConnectionError::ExecutionFailed(format!("Failed to wait for process: {}", e))
        })?;

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        trace!(exit_code, "Local command finished");

        if output.status.success() {
            Ok(CommandResult::success(stdout, stderr))
        } else {
            Ok(CommandResult::failure(exit_code, stdout, stderr))
        }
    }

    async fn fetch_file(&self, host: &str, remote_path: &Path) -> ConnectionResult<Vec<u8>> {
        debug!(host = %host, src = %remote_path.display(), "Reading file content locally");
        tokio::fs::read(remote_path).await.map_err(|e| {
            ConnectionError::TransferFailed(format!(
                "Failed to read {}: {}",
                remote_path.display(),
                e
            ))
        })
    }
}

//! Shared test utilities and fixtures for the kubekit test suite.
//!
//! This module provides:
//! - A mock [`Connector`] with canned command output and files
//! - Inventory and project builders
//! - Pipeline seeding against an in-memory [`Client`]
//!
//! # Usage
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use kubekit::compiler::Compiler;
use kubekit::connection::{CommandResult, ConnectionError, ConnectionResult, Connector};
use kubekit::inventory::{Group, Inventory};
use kubekit::modules::ModuleRegistry;
use kubekit::pipeline::{InventoryRecord, Pipeline, PipelinePhase, PipelineSpec};
use kubekit::project::MemoryProject;
use kubekit::store::Client;
use kubekit::task::{ObjectKey, ObjectMeta};
use kubekit::vars::{to_variables, VariableStore, Variables};

// ============================================================================
// Mock Connector
// ============================================================================

/// Connector answering from canned tables and recording every call
#[derive(Debug, Default)]
pub struct MockConnector {
    commands: Mutex<HashMap<String, CommandResult>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canned output for a command on any host
    pub fn with_command(self, command: &str, stdout: &str) -> Self {
        self.commands
            .lock()
            .insert(command.to_string(), CommandResult::success(stdout, ""));
        self
    }

    /// Canned failure for a command on any host
    pub fn with_failing_command(self, command: &str, exit_code: i32, stderr: &str) -> Self {
        self.commands
            .lock()
            .insert(command.to_string(), CommandResult::failure(exit_code, "", stderr));
        self
    }

    /// Canned file content on any host
    pub fn with_file(self, path: &str, content: &str) -> Self {
        self.files
            .lock()
            .insert(path.to_string(), content.as_bytes().to_vec());
        self
    }

    /// Facts files and commands for a Linux host
    pub fn with_linux_facts(self) -> Self {
        self.with_file(
            "/etc/os-release",
            "NAME=\"Ubuntu\"\nVERSION_ID=\"22.04\"\nID=ubuntu\n",
        )
        .with_command("hostname", "node\n")
        .with_command("uname -r", "6.1.0\n")
        .with_command("uname -m", "x86_64\n")
        .with_file("/proc/cpuinfo", "processor\t: 0\nmodel name\t: test cpu\n")
        .with_file("/proc/meminfo", "MemTotal:       2048 kB\n")
    }

    /// Every `(host, command)` executed so far
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn execute_command(&self, host: &str, command: &str) -> ConnectionResult<CommandResult> {
        self.calls
            .lock()
            .push((host.to_string(), command.to_string()));
        Ok(self
            .commands
            .lock()
            .get(command)
            .cloned()
            .unwrap_or_else(|| CommandResult::success("", "")))
    }

    async fn fetch_file(&self, host: &str, remote_path: &Path) -> ConnectionResult<Vec<u8>> {
        let path = remote_path.to_string_lossy().to_string();
        self.files.lock().get(&path).cloned().ok_or_else(|| {
            ConnectionError::TransferFailed(format!("{} not found on {}", path, host))
        })
    }
}

// ============================================================================
// Builders
// ============================================================================

/// Variables from a JSON object literal
pub fn vars(value: Value) -> Variables {
    to_variables(value).unwrap_or_default()
}

/// Inventory with the given hosts and no variables
pub fn inventory(hosts: &[&str]) -> Inventory {
    let mut inventory = Inventory::new();
    for host in hosts {
        inventory.add_host(*host, Variables::new());
    }
    inventory
}

/// Group listing `hosts` directly
pub fn group(hosts: &[&str]) -> Group {
    Group {
        hosts: hosts.iter().map(|h| h.to_string()).collect(),
        ..Group::default()
    }
}

/// Project holding the given files
pub fn project(files: &[(&str, &str)]) -> MemoryProject {
    let mut project = MemoryProject::new();
    for (path, content) in files {
        project.insert(path, *content);
    }
    project
}

/// Compiler over a fresh store for `inventory`
pub fn compiler(inventory: Inventory) -> Compiler {
    Compiler::new(
        Arc::new(VariableStore::new(inventory)),
        Arc::new(ModuleRegistry::with_builtins()),
    )
}

/// Owned strings
pub fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

// ============================================================================
// Pipeline Fixtures
// ============================================================================

/// Store an inventory record and a pipeline running `playbook` against it
pub async fn seed_pipeline(
    client: &Client,
    name: &str,
    playbook: &str,
    inventory: Inventory,
) -> ObjectKey {
    client
        .inventories
        .create(InventoryRecord {
            metadata: ObjectMeta::named("default", name),
            spec: inventory,
        })
        .await
        .unwrap();
    let pipeline = client
        .pipelines
        .create(Pipeline {
            metadata: ObjectMeta::named("default", name),
            spec: PipelineSpec {
                playbook: playbook.to_string(),
                inventory_ref: name.to_string(),
                ..PipelineSpec::default()
            },
            ..Pipeline::default()
        })
        .await
        .unwrap();
    pipeline.metadata.key()
}

/// Poll until the pipeline reaches a terminal phase, giving up after ~5s
pub async fn wait_terminal(client: &Client, key: &ObjectKey) -> PipelinePhase {
    let mut phase = PipelinePhase::Pending;
    for _ in 0..500 {
        phase = client
            .pipelines
            .get(key)
            .await
            .unwrap()
            .unwrap()
            .status
            .phase;
        if phase.is_terminal() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    phase
}

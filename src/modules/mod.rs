//! Module system for kubekit
//!
//! A module is the action a leaf block invokes. The compiler decides which
//! key of a block names the module by scanning the block's keys in document
//! order against the [`ModuleRegistry`]; the first registered name wins.
//!
//! Built-in modules, in registration order:
//!
//! | Module | Runs on | Purpose |
//! |---|---|---|
//! | `command` | host | run a command |
//! | `shell` | host | run a shell snippet |
//! | `debug` | control node | print a message or variable |
//! | `set_fact` | control node | merge values into the host's variables |
//! | `assert` | control node | check conditions |
//! | `fetch` | host | copy a file from the host to the control node |

pub mod assert;
pub mod command;
pub mod debug;
pub mod fetch;
pub mod set_fact;
pub mod shell;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::connection::Connector;
use crate::vars::{LocationId, TemplateEngine, VariableStore, Variables};

/// Errors that can occur during module execution
#[derive(Error, Debug)]
pub enum ModuleError {
    #[error("Module not found: {0}")]
    NotFound(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Module '{0}' requires a connector")]
    NoConnector(&'static str),
}

/// Result type for module operations
pub type ModuleResult<T> = Result<T, ModuleError>;

/// Parameters passed to a module, already rendered
pub type ModuleParams = IndexMap<String, Value>;

/// Key holding a scalar argument (`command: echo hi`)
pub const RAW_PARAMS: &str = "_raw_params";

/// Turn raw module arguments into parameters.
///
/// A mapping is used as-is, any other non-null value is stored under
/// [`RAW_PARAMS`].
pub fn to_params(args: &Value) -> ModuleParams {
    match args {
        Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        Value::Null => ModuleParams::new(),
        other => {
            let mut params = ModuleParams::new();
            params.insert(RAW_PARAMS.to_string(), other.clone());
            params
        }
    }
}

/// Output of a module run, stored by `register`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleOutput {
    /// Standard output or message
    pub stdout: String,
    /// Standard error or failure message
    pub stderr: String,
    /// Return code (command modules)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rc: Option<i32>,
    /// Whether the module changed anything
    pub changed: bool,
    /// Whether the run failed
    pub failed: bool,
}

impl ModuleOutput {
    /// Successful output with a message
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Self::default()
        }
    }

    /// Successful output that changed something
    pub fn changed(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            changed: true,
            ..Self::default()
        }
    }

    /// Failed output
    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            stderr: stderr.into(),
            failed: true,
            ..Self::default()
        }
    }

    /// Value exposed to `register` and `failed_when`
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "stdout": self.stdout,
            "stderr": self.stderr,
            "rc": self.rc,
            "changed": self.changed,
            "failed": self.failed,
        })
    }
}

/// Everything a module needs for one host
#[derive(Clone)]
pub struct ModuleContext {
    /// Target host
    pub host: String,
    /// Rendered parameters
    pub params: ModuleParams,
    /// Variables visible to the task on this host
    pub vars: Variables,
    /// Remote execution, if available
    pub connector: Option<Arc<dyn Connector>>,
    /// Variable store of the run
    pub store: Arc<VariableStore>,
    /// Template engine
    pub templates: Arc<TemplateEngine>,
    /// Location of the task
    pub location: LocationId,
}

impl std::fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleContext")
            .field("host", &self.host)
            .field("params", &self.params)
            .field("location", &self.location)
            .finish()
    }
}

impl ModuleContext {
    /// The connector, or an error naming the module
    pub fn require_connector(&self, module: &'static str) -> ModuleResult<&Arc<dyn Connector>> {
        self.connector
            .as_ref()
            .ok_or(ModuleError::NoConnector(module))
    }
}

/// Trait that all modules implement
#[async_trait]
pub trait Module: Send + Sync {
    /// Returns the name of the module
    fn name(&self) -> &'static str;

    /// Returns a description of what the module does
    fn description(&self) -> &'static str;

    /// Validate the parameters before execution
    fn validate_params(&self, params: &ModuleParams) -> ModuleResult<()> {
        let _ = params;
        Ok(())
    }

    /// Execute the module for one host
    async fn execute(&self, context: &ModuleContext) -> ModuleResult<ModuleOutput>;
}

/// Extension helpers for reading parameters
pub trait ParamExt {
    fn get_string(&self, key: &str) -> ModuleResult<Option<String>>;
    fn get_string_required(&self, key: &str) -> ModuleResult<String>;
    fn get_bool_or(&self, key: &str, default: bool) -> bool;
    fn get_vec_string(&self, key: &str) -> ModuleResult<Option<Vec<String>>>;
}

impl ParamExt for ModuleParams {
    fn get_string(&self, key: &str) -> ModuleResult<Option<String>> {
        match self.get(key) {
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(Value::Null) | None => Ok(None),
            Some(v) => Ok(Some(v.to_string())),
        }
    }

    fn get_string_required(&self, key: &str) -> ModuleResult<String> {
        self.get_string(key)?
            .ok_or_else(|| ModuleError::MissingParameter(key.to_string()))
    }

    fn get_bool_or(&self, key: &str, default: bool) -> bool {
        match self.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => match s.to_lowercase().as_str() {
                "true" | "yes" | "1" | "on" => true,
                "false" | "no" | "0" | "off" => false,
                _ => default,
            },
            _ => default,
        }
    }

    fn get_vec_string(&self, key: &str) -> ModuleResult<Option<Vec<String>>> {
        match self.get(key) {
            Some(Value::Array(items)) => Ok(Some(
                items
                    .iter()
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect(),
            )),
            Some(Value::String(s)) => Ok(Some(vec![s.clone()])),
            Some(Value::Null) | None => Ok(None),
            Some(_) => Err(ModuleError::InvalidParameter(format!(
                "{} must be a list",
                key
            ))),
        }
    }
}

/// Registry of modules keyed by name, in registration order
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    modules: IndexMap<String, Arc<dyn Module>>,
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.modules.keys()).finish()
    }
}

impl ModuleRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with all built-in modules
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(command::CommandModule));
        registry.register(Arc::new(shell::ShellModule));
        registry.register(Arc::new(debug::DebugModule));
        registry.register(Arc::new(set_fact::SetFactModule));
        registry.register(Arc::new(assert::AssertModule));
        registry.register(Arc::new(fetch::FetchModule));
        registry
    }

    /// Register a module, replacing one of the same name
    pub fn register(&mut self, module: Arc<dyn Module>) {
        self.modules.insert(module.name().to_string(), module);
    }

    /// Get a module by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Module>> {
        self.modules.get(name).cloned()
    }

    /// Whether a module is registered
    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Registered names in registration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    /// First key of `fields` naming a registered module, with its arguments
    pub fn find_in<'a>(&self, fields: &'a IndexMap<String, Value>) -> Option<(&'a str, &'a Value)> {
        fields
            .iter()
            .find(|(key, _)| self.modules.contains_key(key.as_str()))
            .map(|(key, value)| (key.as_str(), value))
    }
}

#[cfg(test)]
pub(crate) fn test_context(params: Value, connector: Option<Arc<dyn Connector>>) -> ModuleContext {
    let mut inventory = crate::inventory::Inventory::new();
    inventory.add_host("node1", Variables::new());
    ModuleContext {
        host: "node1".to_string(),
        params: to_params(&params),
        vars: Variables::new(),
        connector,
        store: Arc::new(VariableStore::new(inventory)),
        templates: Arc::new(TemplateEngine::new()),
        location: LocationId::ROOT,
    }
}

//! Configuration module for kubekit
//!
//! Handles loading and merging configuration from multiple sources:
//! - Default values
//! - System configuration (/etc/kubekit/kubekit.yaml)
//! - User configuration (~/.kubekit/config.yaml)
//! - Project configuration (./kubekit.yaml, ./kubekit.toml)
//! - Environment variables
//!
//! Later sources override earlier ones key by key. Command-line flags are
//! applied on top by the binary.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::controller::ratelimit::{DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY};

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Controller settings
    pub controller: ControllerConfig,

    /// Project settings
    pub project: ProjectConfig,

    /// Pipeline defaults
    pub pipeline: PipelineDefaults,

    /// Logging settings
    pub logging: LoggingConfig,
}

/// Task controller settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Number of parallel reconcile workers
    pub max_concurrent: usize,

    /// Delay of the first rate-limited requeue
    #[serde(with = "humantime_serde")]
    pub backoff_base: Duration,

    /// Cap on the rate-limited requeue delay
    #[serde(with = "humantime_serde")]
    pub backoff_max: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 1,
            backoff_base: DEFAULT_BASE_DELAY,
            backoff_max: DEFAULT_MAX_DELAY,
        }
    }
}

/// Where playbooks and roles are read from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Project root
    pub project_dir: PathBuf,

    /// Extra role search paths, relative to the project root
    pub roles_path: Vec<String>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            project_dir: PathBuf::from("."),
            roles_path: Vec::new(),
        }
    }
}

/// Defaults for new pipelines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineDefaults {
    /// Namespace of created records
    pub namespace: String,

    /// Tags to run
    pub tags: Vec<String>,

    /// Tags to skip
    pub skip_tags: Vec<String>,
}

impl Default for PipelineDefaults {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            tags: Vec::new(),
            skip_tags: Vec::new(),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level, overridden by `-v` and `RUST_LOG`
    pub level: Option<String>,

    /// Log format (pretty, compact, json)
    pub format: String,

    /// ANSI colors
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: None,
            format: "compact".to_string(),
            ansi: true,
        }
    }
}

impl Config {
    /// Load configuration from all sources
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let mut value = serde_yaml::to_value(Config::default())?;

        for path in Self::get_config_paths(config_path) {
            if path.exists() {
                let overlay = Self::read_file(&path)?;
                merge_values(&mut value, overlay);
            }
        }

        let mut config: Config = serde_yaml::from_value(value)
            .context("Failed to build configuration from merged sources")?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load from a single file over the defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut value = serde_yaml::to_value(Config::default())?;
        merge_values(&mut value, Self::read_file(path.as_ref())?);
        Ok(serde_yaml::from_value(value)?)
    }

    /// Get the list of configuration file paths to check
    fn get_config_paths(explicit_path: Option<&PathBuf>) -> Vec<PathBuf> {
        // Explicit path takes priority
        if let Some(path) = explicit_path {
            return vec![path.clone()];
        }
        if let Ok(env_config) = std::env::var("KUBEKIT_CONFIG") {
            return vec![PathBuf::from(env_config)];
        }

        let mut paths = vec![PathBuf::from("/etc/kubekit/kubekit.yaml")];
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".kubekit/config.yaml"));
        }
        paths.push(PathBuf::from("kubekit.yaml"));
        paths.push(PathBuf::from("kubekit.toml"));
        paths
    }

    /// Read a config file as a generic value
    fn read_file(path: &Path) -> Result<serde_yaml::Value> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        // Determine format based on extension
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let value = match extension {
            "json" => serde_json::from_str::<serde_yaml::Value>(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
            "toml" => {
                let parsed: toml::Value = toml::from_str(&content)
                    .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
                serde_yaml::to_value(parsed)?
            }
            _ => serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?,
        };
        Ok(value)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        // KUBEKIT_MAX_CONCURRENT
        if let Ok(value) = std::env::var("KUBEKIT_MAX_CONCURRENT") {
            self.controller.max_concurrent = value
                .parse()
                .with_context(|| format!("Invalid KUBEKIT_MAX_CONCURRENT '{}'", value))?;
        }

        // KUBEKIT_NAMESPACE
        if let Ok(namespace) = std::env::var("KUBEKIT_NAMESPACE") {
            self.pipeline.namespace = namespace;
        }

        // KUBEKIT_PROJECT_DIR
        if let Ok(dir) = std::env::var("KUBEKIT_PROJECT_DIR") {
            self.project.project_dir = PathBuf::from(dir);
        }

        // KUBEKIT_LOG_LEVEL
        if let Ok(level) = std::env::var("KUBEKIT_LOG_LEVEL") {
            self.logging.level = Some(level);
        }

        // NO_COLOR
        if std::env::var("NO_COLOR").is_ok() {
            self.logging.ansi = false;
        }
        Ok(())
    }
}

/// Merge `overlay` into `base`, mappings key by key, anything else replaced.
fn merge_values(base: &mut serde_yaml::Value, overlay: serde_yaml::Value) {
    match (base, overlay) {
        (serde_yaml::Value::Mapping(base), serde_yaml::Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

//! Host facts gathered through the remote execution interface.
//!
//! Facts are grouped as
//!
//! ```text
//! os:
//!   release: {NAME: .., VERSION_ID: ..}   # /etc/os-release
//!   hostname: ..
//!   kernel_version: ..                    # uname -r
//!   architecture: ..                      # uname -m
//! process:
//!   cpu_info: [{processor: "0", ..}, ..]  # /proc/cpuinfo, one map per CPU
//!   mem_info: {MemTotal: .., ..}          # /proc/meminfo
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::Path;
use tracing::debug;

use crate::connection::{ConnectionError, Connector};
use crate::error::Result;
use crate::vars::Variables;

/// Facts gathered from a host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Facts {
    data: IndexMap<String, Value>,
}

impl Facts {
    /// Create empty facts
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a fact
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    /// Get a fact
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Get all facts
    pub fn all(&self) -> &IndexMap<String, Value> {
        &self.data
    }

    /// Facts as host variables
    pub fn into_variables(self) -> Variables {
        self.data
    }

    /// Gather facts from `host`
    pub async fn gather(connector: &dyn Connector, host: &str) -> Result<Self> {
        debug!(host = %host, "Gathering facts");

        let release = fetch_text(connector, host, "/etc/os-release").await?;
        let hostname = command_output(connector, host, "hostname").await?;
        let kernel = command_output(connector, host, "uname -r").await?;
        let arch = command_output(connector, host, "uname -m").await?;
        let cpu = fetch_text(connector, host, "/proc/cpuinfo").await?;
        let mem = fetch_text(connector, host, "/proc/meminfo").await?;

        let mut facts = Self::new();
        facts.set(
            "os",
            json!({
                "release": parse_key_values(&release, '='),
                "hostname": hostname,
                "kernel_version": kernel,
                "architecture": arch,
            }),
        );
        facts.set(
            "process",
            json!({
                "cpu_info": parse_sections(&cpu, ':'),
                "mem_info": parse_key_values(&mem, ':'),
            }),
        );
        Ok(facts)
    }
}

async fn fetch_text(connector: &dyn Connector, host: &str, path: &str) -> Result<String> {
    let bytes = connector.fetch_file(host, Path::new(path)).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

async fn command_output(connector: &dyn Connector, host: &str, command: &str) -> Result<String> {
    let result = connector.execute_command(host, command).await?;
    if !result.success {
        return Err(ConnectionError::ExecutionFailed(format!(
            "'{}' on '{}' exited with {}: {}",
            command,
            host,
            result.exit_code,
            result.stderr.trim()
        ))
        .into());
    }
    Ok(result.stdout.trim_end().to_string())
}

/// `key<sep>value` lines as a map; other lines are ignored.
fn parse_key_values(text: &str, sep: char) -> IndexMap<String, String> {
    text.lines()
        .filter_map(|line| line.split_once(sep))
        .map(|(k, v)| (k.trim().to_string(), unquote(v.trim()).to_string()))
        .filter(|(k, _)| !k.is_empty())
        .collect()
}

/// Blank-line separated `key<sep>value` sections.
fn parse_sections(text: &str, sep: char) -> Vec<IndexMap<String, String>> {
    let mut sections = Vec::new();
    let mut current = IndexMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            if !current.is_empty() {
                sections.push(std::mem::take(&mut current));
            }
            continue;
        }
        if let Some((k, v)) = line.split_once(sep) {
            current.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
    if !current.is_empty() {
        sections.push(current);
    }
    sections
}

fn unquote(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_os_release() {
        let text = "NAME=\"Ubuntu\"\nVERSION_ID=\"22.04\"\n# comment\nID=ubuntu\n";
        let map = parse_key_values(text, '=');
        assert_eq!(map.get("NAME").map(String::as_str), Some("Ubuntu"));
        assert_eq!(map.get("VERSION_ID").map(String::as_str), Some("22.04"));
        assert_eq!(map.get("ID").map(String::as_str), Some("ubuntu"));
        assert_eq!(map.len(), 3);
    }

    #[test]
    fn test_parse_cpuinfo_sections() {
        let text = "processor\t: 0\nmodel name\t: A\n\nprocessor\t: 1\nmodel name\t: B\n\n";
        let sections = parse_sections(text, ':');
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[1].get("processor").map(String::as_str), Some("1"));
        assert_eq!(sections[0].get("model name").map(String::as_str), Some("A"));
    }

    #[test]
    fn test_parse_meminfo() {
        let map = parse_key_values("MemTotal:       16337012 kB\nMemFree: 1 kB\n", ':');
        assert_eq!(map.get("MemTotal").map(String::as_str), Some("16337012 kB"));
    }

    #[test]
    fn test_facts_accessors() {
        let mut facts = Facts::new();
        facts.set("os", json!({"hostname": "node1"}));
        assert_eq!(facts.get("os").unwrap()["hostname"], "node1");
        assert_eq!(facts.into_variables().len(), 1);
    }
}

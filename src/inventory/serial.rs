//! Serial batch partitioning.
//!
//! A play's `serial` keyword splits its hosts into batches that run one after
//! another. Each entry is a host count (`2`, `"2"`), a percentage of the play's
//! hosts (`"30%"`), or `-1` for "everything that is left". The last entry
//! repeats until all hosts are placed.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{InventoryError, InventoryResult};

/// One entry of a `serial` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SerialValue {
    /// Absolute host count, `-1` for all remaining hosts
    Count(i64),
    /// Count or percentage written as text
    Text(String),
}

impl From<i64> for SerialValue {
    fn from(value: i64) -> Self {
        SerialValue::Count(value)
    }
}

impl From<&str> for SerialValue {
    fn from(value: &str) -> Self {
        SerialValue::Text(value.to_string())
    }
}

impl fmt::Display for SerialValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SerialValue::Count(n) => write!(f, "{}", n),
            SerialValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl SerialValue {
    /// Batch size for a play of `total` hosts. `None` means all remaining.
    pub fn batch_size(&self, total: usize) -> InventoryResult<Option<usize>> {
        let invalid = || InventoryError::InvalidSerial(self.to_string());
        match self {
            SerialValue::Count(-1) => Ok(None),
            SerialValue::Count(n) if *n > 0 => Ok(Some(*n as usize)),
            SerialValue::Count(_) => Err(invalid()),
            SerialValue::Text(text) => {
                let text = text.trim();
                if let Some(percent) = text.strip_suffix('%') {
                    let p: f64 = percent.trim().parse().map_err(|_| invalid())?;
                    if p.is_nan() || p <= 0.0 {
                        return Err(invalid());
                    }
                    let size = (total as f64 * p / 100.0).ceil() as usize;
                    Ok(Some(size.max(1)))
                } else {
                    let n: i64 = text.parse().map_err(|_| invalid())?;
                    SerialValue::Count(n).batch_size(total).map_err(|_| invalid())
                }
            }
        }
    }
}

/// Split `hosts` into consecutive batches according to `serial`.
///
/// An empty `serial` list yields a single batch. Batch sizes are clamped to
/// the hosts remaining, so the union of the batches is exactly `hosts` in
/// order.
pub fn partition(hosts: &[String], serial: &[SerialValue]) -> InventoryResult<Vec<Vec<String>>> {
    if hosts.is_empty() {
        return Ok(Vec::new());
    }
    if serial.is_empty() {
        return Ok(vec![hosts.to_vec()]);
    }

    let total = hosts.len();
    let sizes = serial
        .iter()
        .map(|value| value.batch_size(total))
        .collect::<InventoryResult<Vec<_>>>()?;

    let mut batches = Vec::new();
    let mut start = 0;
    let mut index = 0;
    while start < total {
        let remaining = total - start;
        let size = sizes[index.min(sizes.len() - 1)]
            .unwrap_or(remaining)
            .min(remaining);
        batches.push(hosts[start..start + size].to_vec());
        start += size;
        index += 1;
    }
    Ok(batches)
}

/// Batches for a play: a single first-host batch under `run_once`,
/// otherwise [`partition`].
pub fn plan_batches(
    hosts: &[String],
    serial: &[SerialValue],
    run_once: bool,
) -> InventoryResult<Vec<Vec<String>>> {
    if run_once {
        return Ok(hosts.first().map(|h| vec![vec![h.clone()]]).unwrap_or_default());
    }
    partition(hosts, serial)
}

//! Per-item backoff for rate-limited requeues.
//!
//! Every item that fails is requeued after a delay that grows with the number
//! of times the item has failed in a row:
//!
//! ```text
//! delay = min(base * 2^failures, max)
//! ```
//!
//! The history of an item is dropped with [`RateLimiter::forget`] once it
//! reconciles cleanly.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

/// Default delay of the first requeue.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(5);

/// Default cap on the requeue delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(1000);

/// Backoff strategy for calculating delay between requeues.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Constant delay between requeues.
    Constant,

    /// Exponential backoff: delay = base * multiplier^failures
    Exponential {
        /// Multiplier for exponential growth (default: 2.0)
        multiplier: f64,
    },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Exponential { multiplier: 2.0 }
    }
}

impl BackoffStrategy {
    /// Delay for an item that already failed `failures` times.
    pub fn calculate_delay(&self, failures: u32, base: Duration) -> Duration {
        let base_nanos = base.as_nanos() as f64;
        let delay_nanos = match self {
            Self::Constant => base_nanos,
            Self::Exponential { multiplier } => base_nanos * multiplier.powf(failures as f64),
        };
        // Float to int casts saturate, so overflow lands on u64::MAX.
        Duration::from_nanos(delay_nanos as u64)
    }
}

/// Decides how long an item waits before it is requeued.
pub trait RateLimiter<K>: Send + Sync {
    /// Delay for the next requeue of `item`, recording the attempt.
    fn when(&self, item: &K) -> Duration;

    /// Drop the failure history of `item`.
    fn forget(&self, item: &K);

    /// Number of requeues recorded for `item`.
    fn num_requeues(&self, item: &K) -> u32;
}

/// Exponential per-item backoff capped at a maximum delay.
#[derive(Debug)]
pub struct ItemBackoff<K> {
    base: Duration,
    max: Duration,
    strategy: BackoffStrategy,
    failures: Mutex<HashMap<K, u32>>,
}

impl<K: Eq + Hash> ItemBackoff<K> {
    /// Create a limiter with the given base and cap.
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            strategy: BackoffStrategy::default(),
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Use a different growth strategy.
    pub fn with_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.strategy = strategy;
        self
    }
}

impl<K: Eq + Hash> Default for ItemBackoff<K> {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}

impl<K> RateLimiter<K> for ItemBackoff<K>
where
    K: Eq + Hash + Clone + Send + Sync,
{
    fn when(&self, item: &K) -> Duration {
        let mut failures = self.failures.lock();
        let count = failures.entry(item.clone()).or_insert(0);
        let delay = self.strategy.calculate_delay(*count, self.base);
        *count = count.saturating_add(1);
        delay.min(self.max)
    }

    fn forget(&self, item: &K) {
        self.failures.lock().remove(item);
    }

    fn num_requeues(&self, item: &K) -> u32 {
        self.failures.lock().get(item).copied().unwrap_or(0)
    }
}

//! Configuration for the dispatch core.
//!
//! Two independent tunable sets: [`BatcherConfig`] for the grouping window
//! and [`RetryConfig`] for the backoff schedule. Both can be constructed
//! programmatically or deserialized from the replicator's config file.
//!
//! # Quick Start
//!
//! ```rust
//! use sync_dispatch::config::{BatcherConfig, RetryConfig};
//! use std::time::Duration;
//!
//! let batching = BatcherConfig {
//!     capacity: 100,
//!     delay: Duration::from_millis(500),
//! };
//! let retry = RetryConfig::default(); // 3 retries, 4s base
//! assert_eq!(retry.delay_for_attempt(2), Duration::from_secs(8));
//! let _ = batching;
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the batcher's grouping window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatcherConfig {
    /// Maximum group size delivered in one processor call.
    /// When the inbox reaches this size, delivery is immediate.
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Maximum wait between a first arrival and its delivery.
    /// Doubles as the idle threshold: if nothing was processed for at least
    /// this long, the next arrival is rushed through with no delay.
    #[serde(default = "default_delay")]
    pub delay: Duration,
}

fn default_capacity() -> usize {
    100
}

fn default_delay() -> Duration {
    Duration::from_millis(500)
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            delay: Duration::from_millis(500),
        }
    }
}

impl BatcherConfig {
    /// Fast flush for testing.
    pub fn testing() -> Self {
        Self {
            capacity: 10,
            delay: Duration::from_millis(5),
        }
    }
}

/// Configuration for outbound request retry behavior.
///
/// The schedule is exponential with no cap: `base_delay * 2^(attempt - 1)`
/// where `attempt` is the 1-indexed retry. Defaults give 4s, 8s, 16s.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries beyond the first attempt (total attempts = `max_retries + 1`).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base for the exponential backoff.
    #[serde(default = "default_base_delay")]
    pub base_delay: Duration,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_secs(4)
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(4),
        }
    }
}

impl RetryConfig {
    /// Fast-fail retry for tests.
    pub fn testing() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(10),
        }
    }

    /// Calculate the backoff delay for a given retry (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return self.base_delay;
        }
        self.base_delay * 2u32.saturating_pow(attempt - 1)
    }
}

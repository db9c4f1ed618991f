//! Configuration for the chunked document core

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::operations::SchedulePolicyKind;

/// Tunables for chunking, identifier generation and persistence.
///
/// Partial JSON is accepted; missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    /// Maximum addressable nodes per chunk (`NODE_LIMIT`)
    pub node_limit: usize,

    /// Decimal depth at which identifier generation advises renumbering
    pub max_decimal_depth: usize,

    /// Gap used when appending after the last node and when renumbering
    pub renumber_gap: u64,

    /// Decimal digit count above which generation uses string-only logic
    pub long_decimal_threshold: usize,

    /// Trailing debounce for queued saves
    pub save_debounce_ms: u64,

    /// Delay before the authoritative recount that follows a count delta
    pub recount_debounce_ms: u64,

    /// Upper bound on how long idle-time cache invalidation may wait
    pub toc_idle_timeout_ms: u64,

    /// Write attempts per identifier before the failure is surfaced
    pub max_write_attempts: u32,

    /// Base of the exponential retry backoff (10ms, 20ms, 40ms, ...)
    pub retry_backoff_ms: u64,

    /// Delay after overflow migration before moved elements are re-queried
    pub overflow_settle_ms: u64,

    /// How deferred work (recounts, cache invalidation) is scheduled
    pub schedule_policy: SchedulePolicyKind,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            node_limit: 100,
            max_decimal_depth: 3,
            renumber_gap: 100,
            long_decimal_threshold: 10,
            save_debounce_ms: 500,
            recount_debounce_ms: 100,
            toc_idle_timeout_ms: 1000,
            max_write_attempts: 3,
            retry_backoff_ms: 10,
            overflow_settle_ms: 0,
            schedule_policy: SchedulePolicyKind::Idle,
        }
    }
}

impl EditorConfig {
    /// Load configuration from JSON layered over the defaults, then validate
    pub fn from_json_str(json: &str) -> Result<Self, String> {
        let config: EditorConfig =
            serde_json::from_str(json).map_err(|e| format!("invalid editor config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.node_limit == 0 {
            return Err("node_limit must be greater than 0".to_string());
        }

        if self.max_decimal_depth == 0 {
            return Err("max_decimal_depth must be greater than 0".to_string());
        }

        if self.renumber_gap < 2 {
            return Err("renumber_gap must be at least 2 to leave insertion room".to_string());
        }

        if self.max_write_attempts == 0 {
            return Err("max_write_attempts must be greater than 0".to_string());
        }

        Ok(())
    }

    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.save_debounce_ms)
    }

    pub fn recount_debounce(&self) -> Duration {
        Duration::from_millis(self.recount_debounce_ms)
    }

    pub fn toc_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.toc_idle_timeout_ms)
    }

    pub fn overflow_settle(&self) -> Duration {
        Duration::from_millis(self.overflow_settle_ms)
    }

    /// Backoff before retry number `attempt` (0-based)
    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(1u64 << attempt.min(16)))
    }
}

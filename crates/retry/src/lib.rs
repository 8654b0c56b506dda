//! Retry budgets for field execution.
//!
//! One counter per (field, order index). The budget is scoped to a retry
//! epoch: when the anomaly detector reports the challenge cleared, every
//! counter resets so the fresh challenge cycle gets a fresh budget.
//! Exhausting a budget is never fatal; the field is abandoned for that
//! order and the run continues.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

const MAX_HISTORY: usize = 1000;

#[derive(Debug, Error)]
pub enum RetryError {
    #[error("statistics export failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("statistics serialization failed: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Configured retry behavior.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,

    /// Delay the engine waits before re-attempting, in milliseconds.
    pub delay_ms: u64,

    /// Whether the cached-coordinate fallback participates in retries.
    pub use_coordinate_cache: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 2000,
            use_coordinate_cache: true,
        }
    }
}

impl RetryPolicy {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct RetryAttempt {
    pub field: String,
    pub order_index: u32,
    pub attempt_number: u32,
    pub success: bool,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RetryStatistics {
    pub total_attempts: usize,
    pub successful_retries: usize,
    pub success_rate: f64,
    pub recent: Vec<RetryAttempt>,
}

/// Tracks attempt counters and decides whether another retry is allowed.
pub struct RetryCoordinator {
    policy: RetryPolicy,
    attempts: DashMap<(String, u32), u32>,
    history: Mutex<VecDeque<RetryAttempt>>,
}

impl RetryCoordinator {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempts: DashMap::new(),
            history: Mutex::new(VecDeque::new()),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// True while the attempt counter is below the configured maximum.
    pub fn should_retry(&self, field: &str, order_index: u32) -> bool {
        let attempts = self
            .attempts
            .get(&(field.to_string(), order_index))
            .map(|entry| *entry)
            .unwrap_or(0);
        attempts < self.policy.max_attempts
    }

    /// Record one attempt and its outcome.
    pub fn record_attempt(&self, field: &str, order_index: u32, success: bool) {
        let key = (field.to_string(), order_index);
        let attempt_number = {
            let mut entry = self.attempts.entry(key).or_insert(0);
            *entry += 1;
            *entry
        };
        debug!(field, order_index, attempt_number, success, "retry attempt recorded");

        let mut history = self.history.lock();
        if history.len() == MAX_HISTORY {
            history.pop_front();
        }
        history.push_back(RetryAttempt {
            field: field.to_string(),
            order_index,
            attempt_number,
            success,
            recorded_at: Utc::now(),
        });
    }

    /// Attempts consumed so far for a key.
    pub fn attempts_used(&self, field: &str, order_index: u32) -> u32 {
        self.attempts
            .get(&(field.to_string(), order_index))
            .map(|entry| *entry)
            .unwrap_or(0)
    }

    /// Clear one key's counter.
    pub fn reset_key(&self, field: &str, order_index: u32) {
        self.attempts.remove(&(field.to_string(), order_index));
    }

    /// Clear every counter. Invoked on the blocked→clear transition so a
    /// fresh challenge cycle starts with a fresh budget.
    pub fn reset_epoch(&self) {
        let cleared = self.attempts.len();
        self.attempts.clear();
        info!(cleared, "retry epoch reset");
    }

    pub fn statistics(&self) -> RetryStatistics {
        let history = self.history.lock();
        let total = history.len();
        let successful = history.iter().filter(|a| a.success).count();
        RetryStatistics {
            total_attempts: total,
            successful_retries: successful,
            success_rate: if total > 0 {
                successful as f64 / total as f64
            } else {
                0.0
            },
            recent: history.iter().rev().take(10).rev().cloned().collect(),
        }
    }

    pub fn export_statistics<P: AsRef<Path>>(&self, path: P) -> Result<(), RetryError> {
        let stats = self.statistics();
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &stats)?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn budget_exhausts_exactly_at_max_attempts() {
        let retry = RetryCoordinator::new(RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        });

        for _ in 0..2 {
            assert!(retry.should_retry("ship_info", 4));
            retry.record_attempt("ship_info", 4, false);
        }
        assert!(retry.should_retry("ship_info", 4));
        retry.record_attempt("ship_info", 4, false);
        assert!(!retry.should_retry("ship_info", 4));
        assert_eq!(retry.attempts_used("ship_info", 4), 3);
    }

    #[test]
    fn keys_are_independent() {
        let retry = RetryCoordinator::new(RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        });
        retry.record_attempt("ship_info", 1, false);
        assert!(!retry.should_retry("ship_info", 1));
        assert!(retry.should_retry("ship_info", 2));
        assert!(retry.should_retry("order_no", 1));
    }

    #[test]
    fn epoch_reset_restores_every_key() {
        let retry = RetryCoordinator::new(RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        });
        retry.record_attempt("a", 1, false);
        retry.record_attempt("b", 2, false);
        assert!(!retry.should_retry("a", 1));
        assert!(!retry.should_retry("b", 2));

        retry.reset_epoch();
        assert!(retry.should_retry("a", 1));
        assert!(retry.should_retry("b", 2));
    }

    #[test]
    fn statistics_track_success_rate() {
        let retry = RetryCoordinator::new(RetryPolicy::default());
        retry.record_attempt("a", 1, false);
        retry.record_attempt("a", 1, true);
        let stats = retry.statistics();
        assert_eq!(stats.total_attempts, 2);
        assert_eq!(stats.successful_retries, 1);
        assert!((stats.success_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(stats.recent.len(), 2);
    }

    #[test]
    fn statistics_export_writes_json() {
        let retry = RetryCoordinator::new(RetryPolicy::default());
        retry.record_attempt("a", 1, true);
        let file = NamedTempFile::new().unwrap();
        retry.export_statistics(file.path()).unwrap();
        let raw = std::fs::read_to_string(file.path()).unwrap();
        assert!(raw.contains("\"total_attempts\""));
    }
}

// 📋 Batch bookkeeping - summaries, failure accumulation, throttling
//
// Per-entity failures are collected here instead of being raised, so one bad
// member or meeting never aborts a run. The operator reads the summary after
// the run; re-running is the retry strategy.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub entity: String,
    pub reason: String,
}

impl FailureDetail {
    pub fn new(entity: impl Into<String>, reason: impl fmt::Display) -> Self {
        FailureDetail {
            entity: entity.into(),
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for FailureDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.entity, self.reason)
    }
}

/// Outcome of a batch job, suitable for logging
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total_processed: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub failure_details: Vec<FailureDetail>,
}

impl BatchSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self) {
        self.total_processed += 1;
        self.succeeded += 1;
    }

    pub fn record_skip(&mut self) {
        self.total_processed += 1;
        self.skipped += 1;
    }

    pub fn record_failure(&mut self, entity: impl Into<String>, reason: impl fmt::Display) {
        let detail = FailureDetail::new(entity, reason);
        tracing::warn!(entity = %detail.entity, reason = %detail.reason, "entity failed");
        self.total_processed += 1;
        self.failed += 1;
        self.failure_details.push(detail);
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }

    pub fn summary(&self) -> String {
        format!(
            "processed {}: {} succeeded, {} skipped, {} failed",
            self.total_processed, self.succeeded, self.skipped, self.failed
        )
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

/// Fixed pause between per-entity mutation sequences, to stay under the
/// store's request-rate limits. Not a correctness mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Throttle {
    delay: Duration,
}

impl Throttle {
    pub fn new(delay: Duration) -> Self {
        Throttle { delay }
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::new(Duration::from_millis(ms))
    }

    pub fn none() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn pause(&self) {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
    }
}

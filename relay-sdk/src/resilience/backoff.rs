//! Backoff schedules and attempt records
//!
//! A `BackoffPolicy` is an immutable delay table plus a fixed delay for
//! rate-limit failures. Each pipeline picks its own policy.

use std::fmt;
use std::time::Duration;

use crate::error::{FailureKind, RelayError, Result};

/// Delay schedule applied between attempts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delays indexed by attempt; the last entry is the plateau
    schedule: Vec<Duration>,

    /// Delay applied after every rate-limited attempt, whatever its index
    rate_limit_delay: Duration,
}

impl BackoffPolicy {
    /// Create a policy; the schedule must not be empty
    pub fn new(schedule: Vec<Duration>, rate_limit_delay: Duration) -> Result<Self> {
        if schedule.is_empty() {
            return Err(RelayError::configuration("Backoff schedule must not be empty"));
        }

        Ok(Self {
            schedule,
            rate_limit_delay,
        })
    }

    /// Default schedule for loading external content: 2s, 4s, 8s, 16s, then 60s
    pub fn ingestion() -> Self {
        Self {
            schedule: [2, 4, 8, 16, 60].into_iter().map(Duration::from_secs).collect(),
            rate_limit_delay: Duration::from_secs(60),
        }
    }

    /// Default schedule for restarting a streamed chat request: 2s, 4s, then 8s
    pub fn streaming() -> Self {
        Self {
            schedule: [2, 4, 8].into_iter().map(Duration::from_secs).collect(),
            rate_limit_delay: Duration::from_secs(60),
        }
    }

    /// Delay to wait after `attempt_index` failed with `kind`
    pub fn delay_for(&self, kind: FailureKind, attempt_index: u32) -> Duration {
        match kind {
            FailureKind::RateLimited => self.rate_limit_delay,
            _ => {
                let last = self.schedule.len() - 1;
                self.schedule[(attempt_index as usize).min(last)]
            }
        }
    }

    /// Whether another attempt may follow `attempt_index` under `max_retries` total attempts
    pub fn should_retry(&self, attempt_index: u32, max_retries: u32) -> bool {
        attempt_index.saturating_add(1) < max_retries
    }

    /// The delay table
    pub fn schedule(&self) -> &[Duration] {
        &self.schedule
    }

    /// The fixed rate-limit delay
    pub fn rate_limit_delay(&self) -> Duration {
        self.rate_limit_delay
    }
}

impl fmt::Display for BackoffPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let schedule: Vec<String> = self
            .schedule
            .iter()
            .map(|d| crate::util::format_duration(*d))
            .collect();
        write!(
            f,
            "BackoffPolicy {{ schedule: [{}], rate_limit_delay: {} }}",
            schedule.join(", "),
            crate::util::format_duration(self.rate_limit_delay)
        )
    }
}

/// Result of one attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The operation completed
    Success,

    /// The operation failed in a way that permits another attempt
    Retryable(FailureKind),

    /// The operation failed on a precondition
    Fatal(String),
}

/// One execution of a retryable operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    /// 0-based attempt index
    pub index: u32,

    /// How the attempt ended
    pub outcome: AttemptOutcome,

    /// Time spent in the operation itself
    pub elapsed: Duration,

    /// Backoff slept before this attempt started (zero for the first)
    pub delay_before: Duration,
}

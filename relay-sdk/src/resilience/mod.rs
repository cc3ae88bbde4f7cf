//! Resilience patterns shared by both pipelines
//!
//! - Backoff schedules with a fixed rate-limit delay
//! - Attempt records
//! - Injectable, cancellable sleeping
//! - A bounded retry executor for one-shot operations

mod backoff;
mod retry;
mod sleeper;

pub use backoff::{Attempt, AttemptOutcome, BackoffPolicy};
pub use retry::{Retried, RetryExecutor, RetryFailure, RetryFailureReason};
pub use sleeper::{sleep_or_cancel, RecordingSleeper, Sleeper, TokioSleeper};

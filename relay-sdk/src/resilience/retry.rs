//! Bounded retry loop for one-shot operations
//!
//! Runs an operation until it succeeds, fails fatally, is cancelled, or
//! uses up its attempt budget. Every failure is classified and the delay
//! before the next attempt comes from the `BackoffPolicy`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::backoff::{Attempt, AttemptOutcome, BackoffPolicy};
use super::sleeper::{sleep_or_cancel, Sleeper};
use crate::error::{classify, FailureKind, RelayError, Result};
use crate::util::{measure_time_async, sanitize_for_logging};

/// Successful run with its attempt history
#[derive(Debug)]
pub struct Retried<T> {
    /// Value produced by the successful attempt
    pub value: T,

    /// Every attempt made, the successful one last
    pub attempts: Vec<Attempt>,
}

/// Why a retried operation gave up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryFailureReason {
    /// Every allowed attempt failed; carries the last failure kind
    Exhausted(FailureKind),

    /// A precondition failed; no further attempts were made
    Fatal(String),

    /// The caller cancelled
    Cancelled,
}

/// Failed run with its attempt history
#[derive(Debug, Clone)]
pub struct RetryFailure {
    /// Why the loop stopped
    pub reason: RetryFailureReason,

    /// Every attempt made
    pub attempts: Vec<Attempt>,
}

/// Executor for bounded retries
#[derive(Clone)]
pub struct RetryExecutor {
    /// Delay table
    policy: BackoffPolicy,

    /// Total attempts allowed (the first one included)
    max_retries: u32,

    /// Where backoff delays are spent
    sleeper: Arc<dyn Sleeper>,
}

impl RetryExecutor {
    /// Create a new retry executor
    pub fn new(policy: BackoffPolicy, max_retries: u32, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            policy,
            max_retries: max_retries.max(1),
            sleeper,
        }
    }

    /// Get the backoff policy
    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Get the attempt budget
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Execute `operation` with retries. The closure receives the attempt index.
    pub async fn execute<F, Fut, T>(
        &self,
        label: &str,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> std::result::Result<Retried<T>, RetryFailure>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempts: Vec<Attempt> = Vec::new();
        let mut delay_before = Duration::ZERO;

        for index in 0..self.max_retries {
            if cancel.is_cancelled() {
                return Err(RetryFailure {
                    reason: RetryFailureReason::Cancelled,
                    attempts,
                });
            }

            log::info!("{}: attempt {}/{}", label, index + 1, self.max_retries);

            let fut = operation(index);
            let (result, elapsed) = measure_time_async(|| async {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(RelayError::cancelled("cancelled during attempt")),
                    result = fut => result,
                }
            })
            .await;

            let err = match result {
                Ok(value) => {
                    attempts.push(Attempt {
                        index,
                        outcome: AttemptOutcome::Success,
                        elapsed,
                        delay_before,
                    });
                    log::info!("{}: succeeded on attempt {}", label, index + 1);
                    return Ok(Retried { value, attempts });
                }
                Err(err) => err,
            };

            if err.is_cancelled() {
                return Err(RetryFailure {
                    reason: RetryFailureReason::Cancelled,
                    attempts,
                });
            }

            let kind = classify(&err);
            let message = sanitize_for_logging(&err.to_string());

            if !kind.is_retryable() {
                log::error!("{}: fatal failure, not retrying: {}", label, message);
                attempts.push(Attempt {
                    index,
                    outcome: AttemptOutcome::Fatal(message.clone()),
                    elapsed,
                    delay_before,
                });
                return Err(RetryFailure {
                    reason: RetryFailureReason::Fatal(message),
                    attempts,
                });
            }

            attempts.push(Attempt {
                index,
                outcome: AttemptOutcome::Retryable(kind),
                elapsed,
                delay_before,
            });

            if !self.policy.should_retry(index, self.max_retries) {
                log::error!(
                    "{}: giving up after {} attempts ({}): {}",
                    label,
                    index + 1,
                    kind,
                    message
                );
                return Err(RetryFailure {
                    reason: RetryFailureReason::Exhausted(kind),
                    attempts,
                });
            }

            let delay = self.policy.delay_for(kind, index);
            log::warn!(
                "{}: attempt {}/{} failed with {}, retrying in {:?}: {}",
                label,
                index + 1,
                self.max_retries,
                kind,
                delay,
                message
            );

            if sleep_or_cancel(self.sleeper.as_ref(), delay, cancel).await.is_err() {
                return Err(RetryFailure {
                    reason: RetryFailureReason::Cancelled,
                    attempts,
                });
            }
            delay_before = delay;
        }

        // The loop always returns from its final iteration
        Err(RetryFailure {
            reason: RetryFailureReason::Exhausted(FailureKind::Unknown),
            attempts,
        })
    }
}

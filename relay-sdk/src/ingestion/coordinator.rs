//! Ingestion coordinator
//!
//! Holds no state beyond the job it is running. Each attempt, each sleep
//! and each probe is logged.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::{
    IngestionFailure, IngestionJob, IngestionReport, IngestionStatus, KnowledgeStore,
    VerificationProbe,
};
use crate::error::{classify, FailureKind, RelayError};
use crate::resilience::{
    sleep_or_cancel, BackoffPolicy, RetryExecutor, RetryFailureReason, Sleeper, TokioSleeper,
};
use crate::util::sanitize_for_logging;

/// Drives an `IngestionJob` to a verified load, a terminal failure, or cancellation
pub struct IngestionCoordinator {
    /// Where content is loaded
    store: Arc<dyn KnowledgeStore>,

    /// Delay table for load attempts
    policy: BackoffPolicy,

    /// Total load attempts allowed
    max_retries: u32,

    /// Optional post-load confirmation
    probe: Option<VerificationProbe>,

    /// Where delays are spent
    sleeper: Arc<dyn Sleeper>,
}

impl IngestionCoordinator {
    /// Create a coordinator without verification
    pub fn new(store: Arc<dyn KnowledgeStore>, policy: BackoffPolicy, max_retries: u32) -> Self {
        Self {
            store,
            policy,
            max_retries: max_retries.max(1),
            probe: None,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Confirm loads with a probe
    pub fn with_probe(mut self, probe: VerificationProbe) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Replace the sleeper (tests use `RecordingSleeper`)
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Run a job to completion
    pub async fn run(
        &self,
        job: &IngestionJob,
        cancel: &CancellationToken,
    ) -> Result<IngestionReport, IngestionFailure> {
        if let Err(err) = self.store.preflight() {
            log::error!("Ingestion precondition failed: {}", err);
            return Err(IngestionFailure::Fatal(err.to_string()));
        }

        if job.skip_if_exists && self.already_present(job, cancel).await? {
            log::info!(
                "{} already present in knowledge store, skipping load",
                job.source_locator
            );
            return Ok(IngestionReport {
                status: IngestionStatus::AlreadyPresent,
                attempts: Vec::new(),
                probes: 0,
            });
        }

        let retry = RetryExecutor::new(
            self.policy.clone(),
            self.max_retries,
            Arc::clone(&self.sleeper),
        );
        let label = format!("ingest {}", job.source_locator);
        let store = Arc::clone(&self.store);

        let loaded = retry
            .execute(&label, cancel, |_| {
                let store = Arc::clone(&store);
                async move { store.add_content(job).await }
            })
            .await
            .map_err(|failure| match failure.reason {
                RetryFailureReason::Exhausted(last) => IngestionFailure::RetriesExhausted {
                    last,
                    attempts: failure.attempts.len() as u32,
                },
                RetryFailureReason::Fatal(message) => IngestionFailure::Fatal(message),
                RetryFailureReason::Cancelled => IngestionFailure::Cancelled,
            })?;

        let attempts = loaded.attempts;

        let Some(probe) = self.probe.as_ref() else {
            return Ok(IngestionReport {
                status: IngestionStatus::Loaded,
                attempts,
                probes: 0,
            });
        };

        let probes = self.verify(probe, cancel).await?;
        Ok(IngestionReport {
            status: IngestionStatus::Verified,
            attempts,
            probes,
        })
    }

    /// Existence check for the skip short-circuit; a non-fatal error means "not known to exist"
    async fn already_present(
        &self,
        job: &IngestionJob,
        cancel: &CancellationToken,
    ) -> Result<bool, IngestionFailure> {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(IngestionFailure::Cancelled),
            result = self.store.content_exists(job) => result,
        };

        match result {
            Ok(exists) => Ok(exists),
            Err(err) if classify(&err) == FailureKind::Fatal => {
                Err(IngestionFailure::Fatal(err.to_string()))
            }
            Err(err) => {
                log::warn!(
                    "Existence check for {} failed, loading anyway: {}",
                    job.source_locator,
                    sanitize_for_logging(&err.to_string())
                );
                Ok(false)
            }
        }
    }

    /// Probe until the store returns at least one hit; returns the probes used
    async fn verify(
        &self,
        probe: &VerificationProbe,
        cancel: &CancellationToken,
    ) -> Result<u32, IngestionFailure> {
        let max_attempts = probe.max_attempts.max(1);

        for index in 0..max_attempts {
            log::info!(
                "Waiting {:?} before verification probe {}/{}",
                probe.delay,
                index + 1,
                max_attempts
            );
            sleep_or_cancel(self.sleeper.as_ref(), probe.delay, cancel)
                .await
                .map_err(|_| IngestionFailure::Cancelled)?;

            let result: Result<_, RelayError> = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(IngestionFailure::Cancelled),
                result = self.store.search(&probe.query, probe.limit) => result,
            };

            match result {
                Ok(hits) if !hits.is_empty() => {
                    log::info!(
                        "Verification probe {} found {} results for {:?}",
                        index + 1,
                        hits.len(),
                        probe.query
                    );
                    return Ok(index + 1);
                }
                Ok(_) => {
                    log::warn!(
                        "Verification probe {}/{} returned no results for {:?}",
                        index + 1,
                        max_attempts,
                        probe.query
                    );
                }
                Err(err) if classify(&err) == FailureKind::Fatal => {
                    return Err(IngestionFailure::Fatal(err.to_string()));
                }
                Err(err) => {
                    log::warn!(
                        "Verification probe {}/{} failed: {}",
                        index + 1,
                        max_attempts,
                        sanitize_for_logging(&err.to_string())
                    );
                }
            }
        }

        log::error!(
            "Content loaded but never became visible after {} probes",
            max_attempts
        );
        Err(IngestionFailure::VerificationExhausted {
            probes: max_attempts,
        })
    }
}

//! Retrying ingestion of external content into a knowledge store
//!
//! An `IngestionJob` names one "load this resource" request. The
//! `IngestionCoordinator` drives it through bounded attempts against a
//! `KnowledgeStore` and, optionally, confirms the content became visible
//! with a `VerificationProbe`.

mod coordinator;
mod store;

pub use coordinator::IngestionCoordinator;
pub use store::{HttpKnowledgeStore, KnowledgeStore, SearchHit};

#[cfg(test)]
pub use store::MockKnowledgeStore;

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::FailureKind;
use crate::resilience::Attempt;

/// One logical "load this external resource" request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionJob {
    /// Where the content lives (URL of the PDF)
    pub source_locator: String,

    /// Provenance attached to the loaded content
    pub metadata: BTreeMap<String, String>,

    /// Skip the load when the store already holds this content
    pub skip_if_exists: bool,
}

impl IngestionJob {
    /// New job for a source, with `skip_if_exists` enabled
    pub fn new(source_locator: impl Into<String>) -> Self {
        Self {
            source_locator: source_locator.into(),
            metadata: BTreeMap::new(),
            skip_if_exists: true,
        }
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Set the idempotency flag
    pub fn skip_if_exists(mut self, skip: bool) -> Self {
        self.skip_if_exists = skip;
        self
    }
}

/// Follow-up read confirming a load became visible
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationProbe {
    /// Query sent to the store's search
    pub query: String,

    /// Wait before each probe, giving the index time to catch up
    pub delay: Duration,

    /// Probes allowed before giving up
    pub max_attempts: u32,

    /// Maximum hits requested per probe
    pub limit: usize,
}

impl VerificationProbe {
    /// Probe with the default 5s delay, 3 attempts and 5 hits
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            delay: Duration::from_secs(5),
            max_attempts: 3,
            limit: 5,
        }
    }

    /// Set the delay before each probe
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Set the probe budget
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

/// How a successful ingestion ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestionStatus {
    /// Content was already present; nothing was loaded
    AlreadyPresent,

    /// Content was loaded; no verification was configured
    Loaded,

    /// Content was loaded and a probe found it
    Verified,
}

/// Successful ingestion run
#[derive(Debug, Clone)]
pub struct IngestionReport {
    /// Final state of the job
    pub status: IngestionStatus,

    /// Load attempts made
    pub attempts: Vec<Attempt>,

    /// Verification probes made
    pub probes: u32,
}

/// Terminal ingestion failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngestionFailure {
    /// A retryable failure persisted past the attempt budget
    #[error("ingestion failed after {attempts} attempts (last failure: {last})")]
    RetriesExhausted { last: FailureKind, attempts: u32 },

    /// The load succeeded but never became visible to the probe
    #[error("content loaded but not found after {probes} verification probes")]
    VerificationExhausted { probes: u32 },

    /// A precondition failed; nothing was retried
    #[error("ingestion aborted: {0}")]
    Fatal(String),

    /// The caller cancelled
    #[error("ingestion cancelled")]
    Cancelled,
}

impl IngestionFailure {
    /// Whether this failure should stop the surrounding service from starting
    pub fn is_fatal(&self) -> bool {
        matches!(self, IngestionFailure::Fatal(_))
    }
}

//! # Relay SDK
//!
//! Resilient plumbing between a chat front end and a remote PDF question-answering agent.
//!
//! This crate provides:
//!
//! - A retrying ingestion coordinator that loads a document into a knowledge store
//!   and confirms it became searchable
//! - A streaming client that decodes the agent's server-sent events and retries
//!   whole requests on rate limits, dropped connections and timeouts
//! - An event reducer that folds a stream into an in-memory chat session
//! - Error classification, backoff policies and configuration shared by both
//!
//! ## Architecture
//!
//! The SDK is designed around the following key abstractions:
//!
//! - `KnowledgeStore`: The ingestion boundary (`HttpKnowledgeStore` in production)
//! - `StreamTransport`: The streaming boundary (`HttpStreamTransport` in production)
//! - `BackoffPolicy` and `classify`: The retry vocabulary both pipelines share
//! - `Sleeper`: Injectable waiting, so tests run full schedules instantly
//! - `RelayError`: Comprehensive error handling system

// Re-export error handling
pub mod error;
pub use error::{classify, ErrorContext, FailureKind, RelayError, Result};

// Re-export resilience patterns
pub mod resilience;
pub use resilience::{BackoffPolicy, RecordingSleeper, Sleeper, TokioSleeper};

// Re-export the ingestion pipeline
pub mod ingestion;
pub use ingestion::{
    HttpKnowledgeStore, IngestionCoordinator, IngestionFailure, IngestionJob, IngestionReport,
    IngestionStatus, KnowledgeStore, VerificationProbe,
};

// Re-export the streaming pipeline
pub mod stream;
pub use stream::{HttpStreamTransport, StreamEvent, StreamRequest, StreamRetryClient};

// Re-export the chat session
pub mod session;
pub use session::{converse, EventReducer, Message, ReducerState, Role, Session};

// Re-export configuration management
pub mod config;
pub use config::{ConfigProvider, IngestionConfig, ServiceConfig, StreamConfig};

// Re-export cancellation so callers need not depend on tokio-util directly
pub use tokio_util::sync::CancellationToken;

// HTTP plumbing shared by the production boundaries
mod http;

// Utility module for common functionality
mod util;

#[cfg(test)]
mod tests;

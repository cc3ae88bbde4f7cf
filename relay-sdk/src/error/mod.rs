//! Error handling for the relay SDK
//!
//! This module provides the error system shared by both pipelines:
//! - Categorizes errors by origin (network, rate limit, HTTP status, etc.)
//! - Adds rich context to errors for better debugging
//! - Classifies errors into a closed `FailureKind` for retry decisions
//! - Provides convenient Result type alias

use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

pub mod classify;
pub use classify::{classify, FailureKind};

/// Result type for relay SDK operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Main error type for the relay SDK
#[derive(Error, Debug)]
pub enum RelayError {
    /// Connection could not be established or dropped mid-flight
    #[error("Network error: {0}")]
    Network(String),

    /// The origin reported a rate limit
    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    /// A deadline elapsed
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// Non-2xx HTTP response
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Response or frame decoding errors
    #[error("Parsing error: {0}")]
    Parsing(String),

    /// Configuration or credential precondition failures
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The caller cancelled the operation
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Unexpected or internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    /// Unknown errors
    #[error("Unknown error: {0}")]
    Unknown(String),

    /// Errors with additional context
    #[error("{inner}")]
    WithContext {
        inner: Box<RelayError>,
        context: ErrorContext,
    },
}

impl RelayError {
    /// Create a network error
    pub fn network(message: impl Into<String>) -> Self {
        RelayError::Network(message.into())
    }

    /// Create a rate limit error
    pub fn rate_limit(message: impl Into<String>) -> Self {
        RelayError::RateLimit(message.into())
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        RelayError::Timeout(message.into())
    }

    /// Create an HTTP status error
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        RelayError::Http {
            status,
            message: message.into(),
        }
    }

    /// Create a parsing error
    pub fn parsing(message: impl Into<String>) -> Self {
        RelayError::Parsing(message.into())
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        RelayError::Configuration(message.into())
    }

    /// Create a cancellation error
    pub fn cancelled(message: impl Into<String>) -> Self {
        RelayError::Cancelled(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        RelayError::Internal(message.into())
    }

    /// Create an unknown error
    pub fn unknown(message: impl Into<String>) -> Self {
        RelayError::Unknown(message.into())
    }

    /// Add context to an existing error
    pub fn with_context(self, context: ErrorContext) -> Self {
        RelayError::WithContext {
            inner: Box::new(self),
            context,
        }
    }

    /// The innermost error, skipping any context wrappers
    pub fn root(&self) -> &RelayError {
        match self {
            RelayError::WithContext { inner, .. } => inner.root(),
            other => other,
        }
    }

    /// Get the HTTP status code if available
    pub fn status_code(&self) -> Option<u16> {
        match self {
            RelayError::Http { status, .. } => Some(*status),
            RelayError::WithContext { inner, context } => {
                inner.status_code().or(context.status_code)
            }
            _ => None,
        }
    }

    /// Get the request ID if one was recorded
    pub fn request_id(&self) -> Option<&str> {
        match self {
            RelayError::WithContext { inner, context } => {
                context.request_id.as_deref().or_else(|| inner.request_id())
            }
            _ => None,
        }
    }

    /// Get the endpoint the error originated from, if recorded
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            RelayError::WithContext { inner, context } => {
                context.endpoint.as_deref().or_else(|| inner.endpoint())
            }
            _ => None,
        }
    }

    /// Check if this error represents a caller cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), RelayError::Cancelled(_))
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        classify(self).is_retryable()
    }
}

/// Error context information
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// Service that generated the error
    pub service: String,

    /// Time the error was recorded
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,

    /// HTTP status code if applicable
    pub status_code: Option<u16>,

    /// Request ID for tracing
    pub request_id: Option<String>,

    /// Endpoint that was called
    pub endpoint: Option<String>,

    /// Additional context data
    pub data: HashMap<String, String>,
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self {
            service: "unknown".to_string(),
            timestamp: Some(chrono::Utc::now()),
            status_code: None,
            request_id: None,
            endpoint: None,
            data: HashMap::new(),
        }
    }
}

impl ErrorContext {
    /// Create a new error context
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new error context for a specific service
    pub fn for_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            ..Self::default()
        }
    }

    /// Add an HTTP status code
    pub fn status_code(mut self, code: u16) -> Self {
        self.status_code = Some(code);
        self
    }

    /// Add a request ID
    pub fn request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    /// Add an endpoint
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Add a context value
    pub fn add<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: fmt::Display,
    {
        self.data.insert(key.into(), value.to_string());
    }

    /// Add a context value and return self (builder pattern)
    pub fn with<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: fmt::Display,
    {
        self.add(key, value);
        self
    }
}

/// Convert reqwest errors to RelayError
impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        let mut context = ErrorContext::for_service("http_client");
        if let Some(url) = err.url() {
            context = context.endpoint(url.as_str());
        }

        let relay_error = if err.is_timeout() {
            RelayError::timeout(format!("Request timed out: {}", err))
        } else if err.is_connect() {
            RelayError::network(format!("Connection error: {}", err))
        } else if let Some(status) = err.status() {
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                RelayError::rate_limit(err.to_string())
            } else {
                RelayError::http(status.as_u16(), err.to_string())
            }
        } else if err.is_decode() {
            RelayError::parsing(format!("Response decode error: {}", err))
        } else if err.is_body() || err.is_request() {
            RelayError::network(format!("Transport error: {}", err))
        } else {
            RelayError::unknown(format!("HTTP client error: {}", err))
        };

        relay_error.with_context(context)
    }
}

/// Convert serde_json errors to RelayError
impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::parsing(format!("JSON error: {}", err))
            .with_context(ErrorContext::for_service("json"))
    }
}

//! Failure classification
//!
//! Maps any `RelayError` onto the closed `FailureKind` set that the retry
//! loops of both pipelines branch on, and maps raw HTTP error responses
//! onto `RelayError`.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::StatusCode;
use serde_json::Value;

use super::{ErrorContext, RelayError};

/// Textual rate-limit signatures, matched case-insensitively.
static RATE_LIMIT_SIGNATURE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b429\b|rate[ _-]?limit|too many requests")
        .expect("rate limit signature pattern is valid")
});

/// Closed classification of a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Origin asked us to slow down
    RateLimited,

    /// Connection could not be established or was dropped
    ConnectionError,

    /// An attempt deadline elapsed
    Timeout,

    /// Non-2xx status not otherwise classified
    ServerError(u16),

    /// One frame or body failed to decode
    Malformed,

    /// Precondition violation; never retried
    Fatal,

    /// Anything else
    Unknown,
}

impl FailureKind {
    /// Whether the ingestion pipeline retries this kind.
    ///
    /// Everything except `Fatal` is retried there, `Unknown` and `ServerError`
    /// included.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FailureKind::Fatal)
    }

    /// Whether the streaming pipeline restarts the request for this kind.
    pub fn is_stream_retryable(&self) -> bool {
        matches!(
            self,
            FailureKind::RateLimited | FailureKind::ConnectionError | FailureKind::Timeout
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited => write!(f, "RateLimited"),
            Self::ConnectionError => write!(f, "ConnectionError"),
            Self::Timeout => write!(f, "Timeout"),
            Self::ServerError(status) => write!(f, "ServerError({})", status),
            Self::Malformed => write!(f, "Malformed"),
            Self::Fatal => write!(f, "Fatal"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Whether a piece of text carries a rate-limit signature
pub fn has_rate_limit_signature(text: &str) -> bool {
    RATE_LIMIT_SIGNATURE.is_match(text)
}

/// Classify an error into a `FailureKind`.
///
/// Pure and total. Rules apply in priority order: rate limit (tagged, 429
/// status or textual signature), connection, timeout, other HTTP status,
/// decode failure, precondition, unknown.
pub fn classify(error: &RelayError) -> FailureKind {
    let root = error.root();

    if matches!(root, RelayError::RateLimit(_))
        || error.status_code() == Some(429)
        || has_rate_limit_signature(&error.to_string())
    {
        return FailureKind::RateLimited;
    }

    match root {
        RelayError::Network(_) => FailureKind::ConnectionError,
        RelayError::Timeout(_) => FailureKind::Timeout,
        RelayError::Http { status, .. } => FailureKind::ServerError(*status),
        RelayError::Parsing(_) => FailureKind::Malformed,
        RelayError::Configuration(_) | RelayError::Cancelled(_) => FailureKind::Fatal,
        _ => match error.status_code() {
            Some(status) if !(200..300).contains(&status) => FailureKind::ServerError(status),
            _ => FailureKind::Unknown,
        },
    }
}

/// Map a non-2xx HTTP response to a RelayError
pub fn map_http_error(status: StatusCode, body: &str, context: &mut ErrorContext) -> RelayError {
    context.status_code = Some(status.as_u16());

    // Prefer a structured message when the body is JSON
    let message = match serde_json::from_str::<Value>(body) {
        Ok(json) => json
            .get("detail")
            .or_else(|| json.get("message"))
            .or_else(|| json.get("error"))
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| body.to_string()),
        Err(_) => body.to_string(),
    };

    let message = if message.trim().is_empty() {
        status.canonical_reason().unwrap_or("unknown status").to_string()
    } else {
        crate::util::truncate_string(message.trim(), 200)
    };

    match status {
        StatusCode::TOO_MANY_REQUESTS => RelayError::rate_limit(format!("HTTP 429: {}", message)),
        _ => RelayError::http(status.as_u16(), message),
    }
}

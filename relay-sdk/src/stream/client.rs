//! Retrying streaming client
//!
//! One spawned task per request. Events are forwarded as soon as their line
//! is decoded. When a whole attempt fails on a rate limit, a dropped
//! connection or a timeout, the client announces a `Retry`, waits, and opens
//! a fresh request; every other failure ends the sequence with one `Error`.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::parser::SseFrameParser;
use super::transport::StreamTransport;
use super::{StreamEvent, StreamRequest};
use crate::error::{classify, ErrorContext, FailureKind, RelayError};
use crate::resilience::{sleep_or_cancel, BackoffPolicy, Sleeper, TokioSleeper};
use crate::util::{format_duration, sanitize_for_logging};

/// Retry settings for streamed requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamPolicy {
    /// Delay table
    pub backoff: BackoffPolicy,

    /// Total attempts allowed per request
    pub max_attempts: u32,

    /// Deadline for opening the request and for each wait on the next line
    pub attempt_timeout: Duration,
}

impl Default for StreamPolicy {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::streaming(),
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

/// How one attempt ended
enum AttemptEnd {
    /// The body ended normally
    Completed,

    /// An in-band `Error` was forwarded, or the consumer went away
    Terminated,

    /// The caller cancelled
    Cancelled,

    /// The attempt failed and may be retried
    Failed(RelayError),
}

/// Streams agent runs with whole-request retries
#[derive(Clone)]
pub struct StreamRetryClient {
    /// Opens requests
    transport: Arc<dyn StreamTransport>,

    /// Retry settings
    policy: StreamPolicy,

    /// Where delays are spent
    sleeper: Arc<dyn Sleeper>,
}

impl StreamRetryClient {
    /// Create a client with the default policy
    pub fn new(transport: Arc<dyn StreamTransport>) -> Self {
        Self {
            transport,
            policy: StreamPolicy::default(),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Replace the retry settings
    pub fn with_policy(mut self, policy: StreamPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the sleeper (tests use `RecordingSleeper`)
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Get the retry settings
    pub fn policy(&self) -> &StreamPolicy {
        &self.policy
    }

    /// Start a request; events arrive on the returned channel until it closes
    pub fn open_stream(
        &self,
        request: StreamRequest,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<StreamEvent> {
        // Capacity 1: at most one decoded line waits for the consumer
        let (tx, rx) = mpsc::channel(1);
        let client = self.clone();

        tokio::spawn(async move {
            client.drive(request, tx, cancel).await;
        });

        rx
    }

    /// Start a request and expose its events as a `Stream`
    pub fn stream(
        &self,
        request: StreamRequest,
        cancel: CancellationToken,
    ) -> BoxStream<'static, StreamEvent> {
        let rx = self.open_stream(request, cancel);
        stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|event| (event, rx)) })
            .boxed()
    }

    async fn drive(
        &self,
        request: StreamRequest,
        tx: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) {
        let max_attempts = self.policy.max_attempts.max(1);

        for index in 0..max_attempts {
            if cancel.is_cancelled() {
                emit_cancelled(&tx).await;
                return;
            }

            log::info!(
                "Stream {}: attempt {}/{}",
                request.id,
                index + 1,
                max_attempts
            );

            let err = match self.run_attempt(&request, &tx, &cancel).await {
                AttemptEnd::Completed => {
                    log::info!("Stream {} completed on attempt {}", request.id, index + 1);
                    return;
                }
                AttemptEnd::Terminated => return,
                AttemptEnd::Cancelled => {
                    log::info!("Stream {} cancelled", request.id);
                    emit_cancelled(&tx).await;
                    return;
                }
                AttemptEnd::Failed(err) => attempt_error(err, &request, index + 1),
            };

            let kind = classify(&err);
            let detail = sanitize_for_logging(&err.to_string());

            if !kind.is_stream_retryable() {
                log::error!("Stream {} failed ({}): {}", request.id, kind, detail);
                let message = self.describe_failure(kind, &detail);
                let _ = tx.send(StreamEvent::Error { message }).await;
                return;
            }

            if !self.policy.backoff.should_retry(index, max_attempts) {
                log::error!(
                    "Stream {} gave up after {} attempts ({}): {}",
                    request.id,
                    index + 1,
                    kind,
                    detail
                );
                let message = format!(
                    "{}\n\nGave up after {} attempts.",
                    self.describe_failure(kind, &detail),
                    index + 1
                );
                let _ = tx.send(StreamEvent::Error { message }).await;
                return;
            }

            let delay = self.policy.backoff.delay_for(kind, index);
            log::warn!(
                "Stream {}: attempt {}/{} failed with {}, retrying in {:?}: {}",
                request.id,
                index + 1,
                max_attempts,
                kind,
                delay,
                detail
            );

            let retry = StreamEvent::Retry {
                message: retry_message(kind, delay, index + 2, max_attempts),
                delay: Some(delay),
            };
            if tx.send(retry).await.is_err() {
                return;
            }

            if sleep_or_cancel(self.sleeper.as_ref(), delay, &cancel)
                .await
                .is_err()
            {
                emit_cancelled(&tx).await;
                return;
            }
        }
    }

    async fn run_attempt(
        &self,
        request: &StreamRequest,
        tx: &mpsc::Sender<StreamEvent>,
        cancel: &CancellationToken,
    ) -> AttemptEnd {
        let timeout = self.policy.attempt_timeout;

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return AttemptEnd::Cancelled,
            opened = tokio::time::timeout(timeout, self.transport.open(request)) => opened,
        };

        let mut lines = match opened {
            Err(_) => {
                return AttemptEnd::Failed(RelayError::timeout(format!(
                    "no response within {}",
                    format_duration(timeout)
                )))
            }
            Ok(Err(err)) => return AttemptEnd::Failed(err),
            Ok(Ok(lines)) => lines,
        };

        let mut parser = SseFrameParser::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return AttemptEnd::Cancelled,
                next = tokio::time::timeout(timeout, lines.next()) => next,
            };

            let line = match next {
                Err(_) => {
                    return AttemptEnd::Failed(RelayError::timeout(format!(
                        "no data received for {}",
                        format_duration(timeout)
                    )))
                }
                Ok(None) => {
                    log::debug!(
                        "Stream {} ended: {} frames, {} malformed",
                        request.id,
                        parser.frames(),
                        parser.malformed()
                    );
                    return AttemptEnd::Completed;
                }
                Ok(Some(Err(err))) => return AttemptEnd::Failed(err),
                Ok(Some(Ok(line))) => line,
            };

            let Some(event) = parser.parse_body_line(&line) else {
                continue;
            };

            let terminal = event.is_terminal();
            if tx.send(event).await.is_err() {
                log::debug!("Stream {} consumer dropped, stopping", request.id);
                return AttemptEnd::Terminated;
            }
            if terminal {
                return AttemptEnd::Terminated;
            }
        }
    }

    fn describe_failure(&self, kind: FailureKind, detail: &str) -> String {
        let endpoint = self.transport.endpoint();
        match kind {
            FailureKind::RateLimited => format!(
                "Rate limit: the API kept refusing requests.\n\nURL: {}\n\nError: {}",
                endpoint, detail
            ),
            FailureKind::ConnectionError => format!(
                "Connection error: could not reach the API.\n\nCheck that the server is running at:\n{}\n\nError: {}",
                endpoint, detail
            ),
            FailureKind::Timeout => format!(
                "Timeout: the request took longer than {}.\n\nURL: {}\n\nError: {}",
                format_duration(self.policy.attempt_timeout),
                endpoint,
                detail
            ),
            FailureKind::ServerError(status) => {
                format!("HTTP error {}\n\nURL: {}\n\nError: {}", status, endpoint, detail)
            }
            FailureKind::Malformed => {
                format!("Invalid response from the API.\n\nURL: {}\n\nError: {}", endpoint, detail)
            }
            FailureKind::Fatal => format!("Request rejected: {}", detail),
            FailureKind::Unknown => format!("Unexpected error: {}\n\nURL: {}", detail, endpoint),
        }
    }
}

/// Tag a failed attempt with its request and attempt number
fn attempt_error(err: RelayError, request: &StreamRequest, attempt: u32) -> RelayError {
    err.with_context(
        ErrorContext::for_service("agent")
            .request_id(request.id.to_string())
            .with("attempt", attempt),
    )
}

fn retry_message(kind: FailureKind, delay: Duration, next_attempt: u32, max_attempts: u32) -> String {
    let reason = match kind {
        FailureKind::RateLimited => "Rate limited by the API",
        FailureKind::ConnectionError => "Connection lost",
        FailureKind::Timeout => "Request timed out",
        _ => "Request failed",
    };
    format!(
        "{}, retrying in {} (attempt {}/{})",
        reason,
        format_duration(delay),
        next_attempt,
        max_attempts
    )
}

async fn emit_cancelled(tx: &mpsc::Sender<StreamEvent>) {
    let _ = tx
        .send(StreamEvent::Error {
            message: "Request cancelled".to_string(),
        })
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_message() {
        assert_eq!(
            retry_message(FailureKind::RateLimited, Duration::from_secs(60), 2, 3),
            "Rate limited by the API, retrying in 60s (attempt 2/3)"
        );
        assert_eq!(
            retry_message(FailureKind::Timeout, Duration::from_secs(4), 3, 3),
            "Request timed out, retrying in 4s (attempt 3/3)"
        );
    }

    #[test]
    fn test_attempt_error_keeps_classification() {
        let request = StreamRequest::new("Qual foi a receita?");
        let id = request.id.to_string();

        let err = attempt_error(RelayError::http(503, "Service Unavailable"), &request, 2);

        assert_eq!(err.request_id(), Some(id.as_str()));
        assert_eq!(classify(&err), FailureKind::ServerError(503));
        assert_eq!(err.to_string(), "HTTP 503: Service Unavailable");
        match err {
            RelayError::WithContext { context, .. } => {
                assert_eq!(context.data["attempt"], "2");
            }
            other => panic!("expected context, got {:?}", other),
        }
    }

    #[test]
    fn test_default_policy() {
        let policy = StreamPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.attempt_timeout, Duration::from_secs(30));
        assert_eq!(policy.backoff, BackoffPolicy::streaming());
    }
}

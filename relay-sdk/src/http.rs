//! Shared HTTP plumbing for the reqwest-backed collaborators

use std::fmt;
use std::time::Duration;

use reqwest::{header, Client};

use crate::error::{classify::map_http_error, ErrorContext, RelayError, Result};

/// UserAgent structure for identifying the client to upstream services
#[derive(Debug, Clone)]
pub struct UserAgent {
    /// Application name
    pub app_name: String,

    /// Version string
    pub version: String,

    /// Optional extra info
    pub extra: Option<String>,
}

impl Default for UserAgent {
    fn default() -> Self {
        Self {
            app_name: "pdf-agent-relay".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            extra: Some("relay-sdk".to_string()),
        }
    }
}

impl UserAgent {
    /// Default user agent with a component tag
    pub fn component(extra: impl Into<String>) -> Self {
        Self {
            extra: Some(extra.into()),
            ..Self::default()
        }
    }
}

impl fmt::Display for UserAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.app_name, self.version)?;

        if let Some(ref extra) = self.extra {
            write!(f, " ({})", extra)?;
        }

        Ok(())
    }
}

/// Build an HTTP client.
///
/// `timeout` bounds the whole request including the body; pass `None` for
/// streamed responses, which bound each read themselves.
pub fn build_http_client(
    user_agent: Option<UserAgent>,
    timeout: Option<Duration>,
    connect_timeout: Duration,
) -> Result<Client> {
    let mut headers = header::HeaderMap::new();
    let ua = user_agent.unwrap_or_default().to_string();

    headers.insert(
        header::USER_AGENT,
        header::HeaderValue::from_str(&ua)
            .map_err(|e| RelayError::configuration(format!("Invalid user agent: {}", e)))?,
    );

    let mut builder = Client::builder()
        .default_headers(headers)
        .connect_timeout(connect_timeout)
        .gzip(true);

    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }

    builder
        .build()
        .map_err(|e| RelayError::configuration(format!("Failed to build HTTP client: {}", e)))
}

/// Turn a non-2xx response into a RelayError, reading its body
pub async fn parse_error_response(service_name: &str, response: reqwest::Response) -> RelayError {
    let status = response.status();
    let mut context = ErrorContext::for_service(service_name).endpoint(response.url().as_str());

    if let Some(retry_after) = response
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
    {
        context.add("retry_after", retry_after);
    }

    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => format!("Failed to read error response: {}", e),
    };

    let error = map_http_error(status, &body, &mut context);
    error.with_context(context)
}

//! Knowledge store boundary
//!
//! The store owns the vector index; the SDK only asks it to load content,
//! whether content exists, and to search.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::IngestionJob;
use crate::error::{ErrorContext, RelayError, Result};
use crate::http::{build_http_client, parse_error_response, UserAgent};

/// One search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Matched chunk text
    pub content: String,

    /// Metadata stored alongside the chunk
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

/// Operations the ingestion coordinator needs from a knowledge store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Check preconditions (credentials, addresses) before any attempt
    fn preflight(&self) -> Result<()> {
        Ok(())
    }

    /// Load the job's content
    async fn add_content(&self, job: &IngestionJob) -> Result<()>;

    /// Whether the job's content is already present
    async fn content_exists(&self, job: &IngestionJob) -> Result<bool>;

    /// Search the store
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>>;
}

#[derive(Serialize)]
struct AddContentRequest<'a> {
    url: &'a str,
    metadata: &'a std::collections::BTreeMap<String, String>,
    skip_if_exists: bool,
}

#[derive(Deserialize)]
struct ExistsResponse {
    exists: bool,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    max_results: usize,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

const SERVICE_NAME: &str = "knowledge";

/// Knowledge store reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpKnowledgeStore {
    /// HTTP client
    http_client: Client,

    /// Base URL of the knowledge API
    base_url: String,

    /// Bearer credential
    api_key: Option<String>,

    /// Refuse to run without a credential
    require_api_key: bool,
}

impl HttpKnowledgeStore {
    /// Create a store client; `timeout` bounds each call (loading a large PDF is slow)
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http_client = build_http_client(
            Some(UserAgent::component("knowledge")),
            Some(timeout),
            Duration::from_secs(10),
        )?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            require_api_key: false,
        })
    }

    /// Set the bearer credential
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.is_empty());
        self
    }

    /// Require a credential before any attempt
    pub fn require_api_key(mut self, required: bool) -> Self {
        self.require_api_key = required;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.api_key {
            Some(ref key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = self.authorize(builder).send().await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(parse_error_response(SERVICE_NAME, response).await)
        }
    }
}

#[async_trait]
impl KnowledgeStore for HttpKnowledgeStore {
    fn preflight(&self) -> Result<()> {
        if self.base_url.is_empty() {
            return Err(RelayError::configuration("Knowledge API URL is required"));
        }

        if self.require_api_key && self.api_key.is_none() {
            return Err(RelayError::configuration(
                "Knowledge API key is required but not set",
            ));
        }

        Ok(())
    }

    async fn add_content(&self, job: &IngestionJob) -> Result<()> {
        let url = self.url("knowledge/content");
        log::debug!("Loading {} into knowledge store via {}", job.source_locator, url);

        let body = AddContentRequest {
            url: &job.source_locator,
            metadata: &job.metadata,
            skip_if_exists: job.skip_if_exists,
        };

        self.send(self.http_client.post(&url).json(&body)).await?;
        Ok(())
    }

    async fn content_exists(&self, job: &IngestionJob) -> Result<bool> {
        let url = self.url("knowledge/content");
        let builder = self
            .http_client
            .get(&url)
            .query(&[("url", job.source_locator.as_str())]);

        let response = self.authorize(builder).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !response.status().is_success() {
            return Err(parse_error_response(SERVICE_NAME, response).await);
        }

        let exists: ExistsResponse = response.json().await.map_err(|e| {
            RelayError::parsing(format!("Invalid existence response: {}", e))
                .with_context(ErrorContext::for_service(SERVICE_NAME).endpoint(url.as_str()))
        })?;
        Ok(exists.exists)
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let url = self.url("knowledge/search");
        let body = SearchRequest {
            query,
            max_results: limit,
        };

        let response = self.send(self.http_client.post(&url).json(&body)).await?;
        let results: SearchResponse = response.json().await.map_err(|e| {
            RelayError::parsing(format!("Invalid search response: {}", e))
                .with_context(ErrorContext::for_service(SERVICE_NAME).endpoint(url.as_str()))
        })?;
        Ok(results.results)
    }
}

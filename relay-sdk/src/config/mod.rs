//! Configuration management for the relay
//!
//! Values come from a `ConfigProvider`, environment variables by default.
//! `StreamConfig` and `IngestionConfig` turn them into ready-to-use clients.

use std::collections::{BTreeMap, HashMap};
use std::env;
use std::fmt::Debug;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use url::Url;

use crate::error::{RelayError, Result};
use crate::ingestion::{HttpKnowledgeStore, IngestionCoordinator, IngestionJob, VerificationProbe};
use crate::resilience::BackoffPolicy;
use crate::stream::{HttpStreamTransport, StreamPolicy, StreamRetryClient};
use crate::util::{parse_duration, parse_duration_list};

/// Public agent server used when nothing is configured
pub const DEFAULT_AGENT_BASE_URL: &str = "https://agno-agent-api.onrender.com";

/// Agent answering questions about the loaded PDF
pub const DEFAULT_AGENT_ID: &str = "agente_pdf";

/// Quarterly report loaded at startup
pub const DEFAULT_SOURCE_URL: &str =
    "https://s3.sa-east-1.amazonaws.com/static.grendene.aatb.com.br/releases/2417_2T25.pdf";

/// Base trait for configuration providers
pub trait ConfigProvider: Send + Sync {
    /// Get a string configuration value
    fn get_string(&self, key: &str) -> Result<String>;
}

/// Extension methods for configuration providers
pub trait ConfigProviderExt: ConfigProvider {
    /// Get an integer configuration value
    fn get_int(&self, key: &str) -> Result<i64> {
        let value = self.get_string(key)?;
        value
            .trim()
            .parse::<i64>()
            .map_err(|e| RelayError::configuration(format!("Invalid integer for key {}: {}", key, e)))
    }

    /// Get a boolean configuration value
    fn get_bool(&self, key: &str) -> Result<bool> {
        let value = self.get_string(key)?;
        match value.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" | "on" => Ok(true),
            "false" | "no" | "0" | "off" => Ok(false),
            _ => Err(RelayError::configuration(format!(
                "Invalid boolean value for key {}: {}",
                key, value
            ))),
        }
    }

    /// Get a duration such as `500ms`, `2s`, `5m` or bare seconds
    fn get_duration(&self, key: &str) -> Result<Duration> {
        let value = self.get_string(key)?;
        parse_duration(&value).ok_or_else(|| {
            RelayError::configuration(format!("Invalid duration for key {}: {}", key, value))
        })
    }

    /// Get a comma-separated list of durations
    fn get_durations(&self, key: &str) -> Result<Vec<Duration>> {
        let value = self.get_string(key)?;
        parse_duration_list(&value).ok_or_else(|| {
            RelayError::configuration(format!("Invalid duration list for key {}: {}", key, value))
        })
    }

    /// Get a string configuration value with a default
    fn get_string_or(&self, key: &str, default: &str) -> String {
        self.get_string(key).unwrap_or_else(|_| default.to_string())
    }

    /// Get a boolean configuration value with a default
    fn get_bool_or(&self, key: &str, default: bool) -> bool {
        self.get_bool(key).unwrap_or(default)
    }

    /// Get a duration with a default
    fn get_duration_or(&self, key: &str, default: Duration) -> Duration {
        self.get_duration(key).unwrap_or(default)
    }

    /// Get a duration list with a default
    fn get_durations_or(&self, key: &str, default: &[Duration]) -> Vec<Duration> {
        self.get_durations(key).unwrap_or_else(|_| default.to_vec())
    }

    /// Get a non-empty string, treating blank values as unset
    fn get_optional(&self, key: &str) -> Option<String> {
        self.get_string(key)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

impl<T: ConfigProvider> ConfigProviderExt for T {}

/// Generic configuration provider trait
pub trait GenericConfigProvider: ConfigProvider {
    /// Get a typed configuration value by parsing from string
    fn get<T>(&self, key: &str) -> Result<T>
    where
        T: FromStr,
        <T as FromStr>::Err: std::fmt::Display,
    {
        let value = self.get_string(key)?;
        value
            .trim()
            .parse::<T>()
            .map_err(|e| RelayError::configuration(format!("Invalid value for key {}: {}", key, e)))
    }

    /// Get a typed configuration with a default value
    fn get_or<T>(&self, key: &str, default: T) -> T
    where
        T: FromStr,
        <T as FromStr>::Err: std::fmt::Display,
    {
        self.get::<T>(key).unwrap_or(default)
    }
}

impl<T: ConfigProvider> GenericConfigProvider for T {}

/// Environment variable based configuration provider
#[derive(Debug, Clone, Default)]
pub struct EnvConfigProvider {
    /// Optional prefix for environment variables
    prefix: Option<String>,

    /// Optional namespace for variables (e.g., "STREAM", "INGEST")
    namespace: Option<String>,
}

impl EnvConfigProvider {
    /// Create a new environment variable config provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a prefix for environment variables
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Set a namespace for environment variables
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Format a configuration key as an environment variable
    pub(crate) fn format_key(&self, key: &str) -> String {
        let mut env_key = String::new();

        if let Some(ref prefix) = self.prefix {
            env_key.push_str(prefix);
            env_key.push('_');
        }

        if let Some(ref namespace) = self.namespace {
            env_key.push_str(namespace);
            env_key.push('_');
        }

        env_key.push_str(&key.to_uppercase().replace(|c: char| !c.is_ascii_alphanumeric(), "_"));

        env_key
    }
}

impl ConfigProvider for EnvConfigProvider {
    fn get_string(&self, key: &str) -> Result<String> {
        let env_key = self.format_key(key);

        env::var(&env_key).map_err(|e| match e {
            env::VarError::NotPresent => {
                RelayError::configuration(format!("Environment variable not set: {}", env_key))
            }
            env::VarError::NotUnicode(_) => RelayError::configuration(format!(
                "Environment variable is not valid unicode: {}",
                env_key
            )),
        })
    }
}

/// In-memory config provider for testing or static configuration
#[derive(Debug, Clone, Default)]
pub struct MemoryConfigProvider {
    /// Configuration values
    values: HashMap<String, String>,
}

impl MemoryConfigProvider {
    /// Create a new empty memory config provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a memory config provider with initial values
    pub fn with_values(values: HashMap<String, String>) -> Self {
        Self { values }
    }

    /// Set a configuration value
    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: ToString,
    {
        self.values.insert(key.into(), value.to_string());
    }
}

impl ConfigProvider for MemoryConfigProvider {
    fn get_string(&self, key: &str) -> Result<String> {
        self.values
            .get(key)
            .cloned()
            .ok_or_else(|| RelayError::configuration(format!("Configuration key not found: {}", key)))
    }
}

/// A composite config provider that tries multiple providers in order
#[derive(Default)]
pub struct CompositeConfigProvider {
    /// Ordered list of config providers to try
    providers: Vec<Box<dyn ConfigProvider>>,
}

impl CompositeConfigProvider {
    /// Create a new composite config provider
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a provider to the chain
    pub fn add_provider(&mut self, provider: impl ConfigProvider + 'static) {
        self.providers.push(Box::new(provider));
    }

    /// Builder form of `add_provider`
    pub fn with_provider(mut self, provider: impl ConfigProvider + 'static) -> Self {
        self.add_provider(provider);
        self
    }
}

impl ConfigProvider for CompositeConfigProvider {
    fn get_string(&self, key: &str) -> Result<String> {
        self.providers
            .iter()
            .find_map(|provider| provider.get_string(key).ok())
            .ok_or_else(|| {
                RelayError::configuration(format!(
                    "Configuration key not found in any provider: {}",
                    key
                ))
            })
    }
}

/// Global default configuration provider
pub static DEFAULT_PROVIDER: Lazy<Arc<EnvConfigProvider>> =
    Lazy::new(|| Arc::new(EnvConfigProvider::new().with_prefix("PDF_AGENT")));

/// Trait for service-specific configuration
pub trait ServiceConfig: Debug + Send + Sync {
    /// Validate this configuration
    fn validate(&self) -> Result<()>;

    /// Service name
    fn service_name(&self) -> &str;
}

fn validate_url(name: &str, value: &str) -> Result<Url> {
    let url = Url::parse(value)
        .map_err(|e| RelayError::configuration(format!("Invalid {} '{}': {}", name, value, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(RelayError::configuration(format!(
            "Invalid {} '{}': unsupported scheme {}",
            name, value, other
        ))),
    }
}

fn validate_credential(service: &str, required: bool, api_key: &Option<String>) -> Result<()> {
    if required && api_key.is_none() {
        return Err(RelayError::configuration(format!(
            "{} requires an API key but none is configured",
            service
        )));
    }
    Ok(())
}

/// Streaming endpoint settings
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Full `runs` URL of the agent
    pub endpoint: String,

    /// Per-attempt deadline
    pub timeout: Duration,

    /// Total attempts per question
    pub max_attempts: u32,

    /// Delays for connection and timeout failures
    pub retry_schedule: Vec<Duration>,

    /// Fixed delay after a rate limit
    pub rate_limit_delay: Duration,

    /// Bearer credential
    pub api_key: Option<String>,

    /// Refuse to start without `api_key`
    pub require_api_key: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        let backoff = BackoffPolicy::streaming();
        Self {
            endpoint: format!("{}/agents/{}/runs", DEFAULT_AGENT_BASE_URL, DEFAULT_AGENT_ID),
            timeout: Duration::from_secs(30),
            max_attempts: 3,
            retry_schedule: backoff.schedule().to_vec(),
            rate_limit_delay: backoff.rate_limit_delay(),
            api_key: None,
            require_api_key: false,
        }
    }
}

impl StreamConfig {
    /// Load configuration from a config provider
    ///
    /// `stream_endpoint` wins over `agent_base_url` + `agent_id`.
    pub fn from_provider<P: ConfigProvider>(provider: &P) -> Result<Self> {
        let defaults = Self::default();

        let endpoint = match provider.get_optional("stream_endpoint") {
            Some(endpoint) => endpoint,
            None => {
                let base = provider.get_string_or("agent_base_url", DEFAULT_AGENT_BASE_URL);
                let agent_id = provider.get_string_or("agent_id", DEFAULT_AGENT_ID);
                format!("{}/agents/{}/runs", base.trim_end_matches('/'), agent_id)
            }
        };

        let config = Self {
            endpoint,
            timeout: provider.get_duration_or("stream_timeout", defaults.timeout),
            max_attempts: provider.get_or("stream_max_attempts", defaults.max_attempts),
            retry_schedule: provider
                .get_durations_or("stream_retry_schedule", &defaults.retry_schedule),
            rate_limit_delay: provider
                .get_duration_or("stream_rate_limit_delay", defaults.rate_limit_delay),
            api_key: provider.get_optional("api_key"),
            require_api_key: provider.get_bool_or("require_api_key", false),
        };

        config.validate()?;
        Ok(config)
    }

    /// Retry settings for the client
    pub fn policy(&self) -> Result<StreamPolicy> {
        Ok(StreamPolicy {
            backoff: BackoffPolicy::new(self.retry_schedule.clone(), self.rate_limit_delay)?,
            max_attempts: self.max_attempts,
            attempt_timeout: self.timeout,
        })
    }

    /// Build a streaming client for the configured endpoint
    pub fn build_client(&self) -> Result<StreamRetryClient> {
        self.validate()?;
        let transport = HttpStreamTransport::new(&self.endpoint, self.timeout)?
            .with_api_key(self.api_key.clone());
        Ok(StreamRetryClient::new(Arc::new(transport)).with_policy(self.policy()?))
    }
}

impl ServiceConfig for StreamConfig {
    fn validate(&self) -> Result<()> {
        validate_url("stream endpoint", &self.endpoint)?;

        if self.max_attempts == 0 {
            return Err(RelayError::configuration("stream_max_attempts must be at least 1"));
        }

        if self.timeout.is_zero() {
            return Err(RelayError::configuration("stream_timeout must be positive"));
        }

        if self.retry_schedule.is_empty() {
            return Err(RelayError::configuration("stream_retry_schedule must not be empty"));
        }

        validate_credential(self.service_name(), self.require_api_key, &self.api_key)
    }

    fn service_name(&self) -> &str {
        "stream"
    }
}

/// Knowledge ingestion settings
#[derive(Debug, Clone)]
pub struct IngestionConfig {
    /// Base URL of the knowledge API
    pub knowledge_url: String,

    /// Document to load
    pub source_url: String,

    /// Provenance attached to the loaded content
    pub metadata: BTreeMap<String, String>,

    /// Skip the load when the document is already present
    pub skip_if_exists: bool,

    /// Total load attempts
    pub max_retries: u32,

    /// Delays between load attempts
    pub retry_schedule: Vec<Duration>,

    /// Fixed delay after a rate limit
    pub rate_limit_delay: Duration,

    /// Per-request deadline for the knowledge API
    pub timeout: Duration,

    /// Confirm the load with a search
    pub verify: bool,

    /// Wait before each verification search
    pub verification_delay: Duration,

    /// Searches before giving up on verification
    pub verification_attempts: u32,

    /// Query used to confirm the load
    pub probe_query: String,

    /// Bearer credential
    pub api_key: Option<String>,

    /// Refuse to start without `api_key`
    pub require_api_key: bool,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        let backoff = BackoffPolicy::ingestion();
        let description = "Relatório Trimestral 2T25";

        let mut metadata = BTreeMap::new();
        metadata.insert("source".to_string(), "Grendene".to_string());
        metadata.insert("type".to_string(), "pdf".to_string());
        metadata.insert("description".to_string(), description.to_string());

        Self {
            knowledge_url: DEFAULT_AGENT_BASE_URL.to_string(),
            source_url: DEFAULT_SOURCE_URL.to_string(),
            metadata,
            skip_if_exists: true,
            max_retries: 5,
            retry_schedule: backoff.schedule().to_vec(),
            rate_limit_delay: backoff.rate_limit_delay(),
            timeout: Duration::from_secs(120),
            verify: true,
            verification_delay: Duration::from_secs(5),
            verification_attempts: 3,
            probe_query: description.to_string(),
            api_key: None,
            require_api_key: false,
        }
    }
}

impl IngestionConfig {
    /// Load configuration from a config provider
    pub fn from_provider<P: ConfigProvider>(provider: &P) -> Result<Self> {
        let defaults = Self::default();

        let mut metadata = defaults.metadata.clone();
        for (key, name) in [
            ("source", "metadata_source"),
            ("type", "metadata_type"),
            ("description", "metadata_description"),
        ] {
            if let Some(value) = provider.get_optional(name) {
                metadata.insert(key.to_string(), value);
            }
        }

        let probe_query = provider
            .get_optional("probe_query")
            .or_else(|| metadata.get("description").cloned())
            .unwrap_or(defaults.probe_query);

        let config = Self {
            knowledge_url: provider
                .get_optional("knowledge_url")
                .unwrap_or(defaults.knowledge_url),
            source_url: provider.get_optional("source_url").unwrap_or(defaults.source_url),
            metadata,
            skip_if_exists: provider.get_bool_or("skip_if_exists", defaults.skip_if_exists),
            max_retries: provider.get_or("ingest_max_retries", defaults.max_retries),
            retry_schedule: provider
                .get_durations_or("ingest_retry_schedule", &defaults.retry_schedule),
            rate_limit_delay: provider
                .get_duration_or("ingest_rate_limit_delay", defaults.rate_limit_delay),
            timeout: provider.get_duration_or("ingest_timeout", defaults.timeout),
            verify: provider.get_bool_or("verify", defaults.verify),
            verification_delay: provider
                .get_duration_or("verification_delay", defaults.verification_delay),
            verification_attempts: provider
                .get_or("verification_attempts", defaults.verification_attempts),
            probe_query,
            api_key: provider.get_optional("api_key"),
            require_api_key: provider.get_bool_or("require_api_key", false),
        };

        config.validate()?;
        Ok(config)
    }

    /// The job describing the configured document
    pub fn job(&self) -> IngestionJob {
        self.metadata.iter().fold(
            IngestionJob::new(&self.source_url).skip_if_exists(self.skip_if_exists),
            |job, (key, value)| job.with_metadata(key, value),
        )
    }

    /// The verification probe, if verification is enabled
    pub fn probe(&self) -> Option<VerificationProbe> {
        self.verify.then(|| {
            VerificationProbe::new(&self.probe_query)
                .with_delay(self.verification_delay)
                .with_max_attempts(self.verification_attempts)
        })
    }

    /// Delay table for load attempts
    pub fn policy(&self) -> Result<BackoffPolicy> {
        BackoffPolicy::new(self.retry_schedule.clone(), self.rate_limit_delay)
    }

    /// Build the knowledge API client
    pub fn build_store(&self) -> Result<HttpKnowledgeStore> {
        validate_url("knowledge URL", &self.knowledge_url)?;
        Ok(HttpKnowledgeStore::new(&self.knowledge_url, self.timeout)?
            .with_api_key(self.api_key.clone())
            .require_api_key(self.require_api_key))
    }

    /// Build a coordinator wired to the knowledge API
    pub fn build_coordinator(&self) -> Result<IngestionCoordinator> {
        self.validate()?;
        let coordinator =
            IngestionCoordinator::new(Arc::new(self.build_store()?), self.policy()?, self.max_retries);
        Ok(match self.probe() {
            Some(probe) => coordinator.with_probe(probe),
            None => coordinator,
        })
    }
}

impl ServiceConfig for IngestionConfig {
    fn validate(&self) -> Result<()> {
        validate_url("knowledge URL", &self.knowledge_url)?;
        validate_url("source URL", &self.source_url)?;

        if self.max_retries == 0 {
            return Err(RelayError::configuration("ingest_max_retries must be at least 1"));
        }

        if self.retry_schedule.is_empty() {
            return Err(RelayError::configuration("ingest_retry_schedule must not be empty"));
        }

        if self.verify && self.verification_attempts == 0 {
            return Err(RelayError::configuration(
                "verification_attempts must be at least 1 when verify is on",
            ));
        }

        if self.verify && self.probe_query.trim().is_empty() {
            return Err(RelayError::configuration("probe_query must not be empty"));
        }

        validate_credential(self.service_name(), self.require_api_key, &self.api_key)
    }

    fn service_name(&self) -> &str {
        "ingestion"
    }
}

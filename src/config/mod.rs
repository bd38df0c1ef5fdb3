//! # Fetchflow Configuration
//!
//! Typed configuration for workers, endpoints, retry policy and the batch
//! lifecycle. Values are loaded in layers by [`ConfigLoader`]:
//!
//! 1. `config/fetchflow.toml` (or the file named by `FETCHFLOW_CONFIG_PATH`)
//! 2. `config/fetchflow.<env>.toml` when present
//! 3. `FETCHFLOW__SECTION__FIELD` environment variables
//!
//! Every section has a usable `Default`, so tests construct configuration
//! directly without touching the filesystem.
//!
//! ```rust
//! use fetchflow_core::config::FetchflowConfig;
//!
//! let config = FetchflowConfig::default();
//! assert!(config.validate().is_ok());
//! assert_eq!(config.retry.initial_delay().as_millis(), 1000);
//! ```

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigLoader;

use crate::constants::{placeholders, queues};
use crate::endpoint::EndpointKind;

/// Root configuration structure mirroring `config/fetchflow.toml`
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FetchflowConfig {
    /// Database connection settings for the record store and queues
    pub database: DatabaseConfig,

    /// Message broker selection and queue topology
    pub messaging: MessagingConfig,

    /// Upstream network endpoints, in fallback order
    pub endpoints: Vec<EndpointConfig>,

    /// Intra-endpoint retry policy
    pub retry: RetryConfig,

    /// Per-endpoint health tracking
    pub circuit_breaker: CircuitBreakerConfig,

    /// Consumer prefetch limits
    pub workers: WorkersConfig,

    /// Placeholder detection for the fallback resolution chain
    pub fallback: FallbackConfig,

    /// Batch submission settings
    pub batch: BatchConfig,

    /// Transaction classification settings
    pub classifier: ClassifierConfig,

    /// Logging output settings
    pub telemetry: TelemetryConfig,
}

impl FetchflowConfig {
    /// Check cross-field constraints that serde cannot express
    pub fn validate(&self) -> ConfigResult<()> {
        self.database.validate()?;
        self.messaging.validate()?;
        for endpoint in &self.endpoints {
            endpoint.validate()?;
        }
        self.retry.validate()?;
        self.workers.validate()?;
        self.classifier.validate()?;
        Ok(())
    }

    /// Endpoints of one kind, in configured order
    pub fn endpoints_of_kind(&self, kind: EndpointKind) -> impl Iterator<Item = &EndpointConfig> {
        self.endpoints.iter().filter(move |e| e.kind == kind)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            acquire_timeout_seconds: 30,
            run_migrations: true,
        }
    }
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_seconds)
    }

    /// Resolve the connection URL, preferring the configured value over `DATABASE_URL`
    pub fn database_url(&self) -> ConfigResult<String> {
        self.url
            .clone()
            .or_else(|| std::env::var("DATABASE_URL").ok())
            .ok_or_else(|| ConfigurationError::missing_field("url", "database"))
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.max_connections == 0 {
            return Err(ConfigurationError::invalid_value(
                "database.max_connections",
                self.max_connections,
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagingBackend {
    InMemory,
    Pgmq,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MessagingConfig {
    pub backend: MessagingBackend,
    pub visibility_timeout_seconds: u64,
    pub poll_interval_ms: u64,
    pub reply_timeout_ms: u64,
    pub queues: QueueNames,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            backend: MessagingBackend::InMemory,
            visibility_timeout_seconds: 30,
            poll_interval_ms: 100,
            reply_timeout_ms: 30_000,
            queues: QueueNames::default(),
        }
    }
}

impl MessagingConfig {
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.visibility_timeout_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "messaging.visibility_timeout_seconds",
                self.visibility_timeout_seconds,
                "must be greater than zero",
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "messaging.poll_interval_ms",
                self.poll_interval_ms,
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Names of the pipeline stage queues
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueNames {
    /// Request/reply queue for transaction fetches
    pub transaction_requests: String,
    /// Task queue for token sub-fetches
    pub token_tasks: String,
    /// Task queue for downstream transaction finalization
    pub finalize_tasks: String,
    /// Prefix for per-client reply queues
    pub reply_prefix: String,
}

impl Default for QueueNames {
    fn default() -> Self {
        Self {
            transaction_requests: queues::TRANSACTION_REQUESTS.to_string(),
            token_tasks: queues::TOKEN_TASKS.to_string(),
            finalize_tasks: queues::FINALIZE_TASKS.to_string(),
            reply_prefix: queues::REPLY_PREFIX.to_string(),
        }
    }
}

impl QueueNames {
    /// All stage queues a worker fleet needs to exist
    pub fn stage_queues(&self) -> Vec<String> {
        vec![
            self.transaction_requests.clone(),
            self.token_tasks.clone(),
            self.finalize_tasks.clone(),
        ]
    }
}

/// One upstream network endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EndpointConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_endpoint_kind")]
    pub kind: EndpointKind,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default)]
    pub min_interval_ms: u64,
}

fn default_endpoint_kind() -> EndpointKind {
    EndpointKind::PrimaryRpc
}

fn default_max_concurrent() -> usize {
    4
}

impl EndpointConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>, kind: EndpointKind) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            kind,
            max_concurrent: default_max_concurrent(),
            min_interval_ms: 0,
        }
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_min_interval_ms(mut self, min_interval_ms: u64) -> Self {
        self.min_interval_ms = min_interval_ms;
        self
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.name.trim().is_empty() {
            return Err(ConfigurationError::missing_field("name", "endpoints"));
        }
        if self.max_concurrent == 0 {
            return Err(ConfigurationError::invalid_value(
                format!("endpoints.{}.max_concurrent", self.name),
                self.max_concurrent,
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Exponential backoff settings for retries against a single endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay_ms: 1000,
            multiplier: 2.0,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.max_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "retry.max_attempts",
                self.max_attempts,
                "at least one attempt is required",
            ));
        }
        if !(self.multiplier >= 1.0) {
            return Err(ConfigurationError::invalid_value(
                "retry.multiplier",
                self.multiplier,
                "must be at least 1.0",
            ));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(ConfigurationError::invalid_value(
                "retry.max_delay_ms",
                self.max_delay_ms,
                "must not be smaller than initial_delay_ms",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,
    pub failure_threshold: u32,
    pub open_timeout_seconds: u64,
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            open_timeout_seconds: 30,
            success_threshold: 1,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.open_timeout_seconds)
    }
}

/// Prefetch limits per consumer role
///
/// A prefetch of 1 processes strictly one message at a time; workers that
/// hit rate-limited endpoints should stay there.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkersConfig {
    pub transaction_prefetch: usize,
    pub token_prefetch: usize,
    pub finalize_prefetch: usize,
    pub known_keys_capacity: usize,
    pub shutdown_grace_seconds: u64,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            transaction_prefetch: 1,
            token_prefetch: 1,
            finalize_prefetch: 8,
            known_keys_capacity: 100_000,
            shutdown_grace_seconds: 10,
        }
    }
}

impl WorkersConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }

    fn validate(&self) -> ConfigResult<()> {
        for (field, value) in [
            ("workers.transaction_prefetch", self.transaction_prefetch),
            ("workers.token_prefetch", self.token_prefetch),
            ("workers.finalize_prefetch", self.finalize_prefetch),
        ] {
            if value == 0 {
                return Err(ConfigurationError::invalid_value(
                    field,
                    value,
                    "prefetch must be at least 1",
                ));
            }
        }
        Ok(())
    }
}

/// Names that upstream sources use when they have no real metadata
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FallbackConfig {
    pub placeholder_names: Vec<String>,
    pub placeholder_prefixes: Vec<String>,
    pub case_sensitive: bool,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            placeholder_names: placeholders::DEFAULT_NAMES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            placeholder_prefixes: placeholders::DEFAULT_PREFIXES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            case_sensitive: false,
        }
    }
}

/// A batch credential accepted without a database lookup
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StaticCredential {
    pub requester: String,
    pub key: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Credentials stored as values, not table keys: the `config` crate
    /// lowercases map keys.
    pub credentials: Vec<StaticCredential>,
    /// Look credentials up in the database instead of the static table
    pub database_credentials: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub min_confidence: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.6,
        }
    }
}

impl ClassifierConfig {
    fn validate(&self) -> ConfigResult<()> {
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ConfigurationError::invalid_value(
                "classifier.min_confidence",
                self.min_confidence,
                "must be within 0.0..=1.0",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_format: LogFormat,
    pub log_level: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Pretty,
            log_level: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = FetchflowConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.workers.transaction_prefetch, 1);
        assert_eq!(config.retry.max_attempts, 4);
    }

    #[test]
    fn test_zero_prefetch_rejected() {
        let mut config = FetchflowConfig::default();
        config.workers.token_prefetch = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("workers.token_prefetch"));
    }

    #[test]
    fn test_multiplier_below_one_rejected() {
        let mut config = FetchflowConfig::default();
        config.retry.multiplier = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_endpoint_zero_concurrency_rejected() {
        let mut config = FetchflowConfig::default();
        config.endpoints.push(
            EndpointConfig::new("rpc-a", "http://localhost:8899", EndpointKind::PrimaryRpc)
                .with_max_concurrent(0),
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_endpoints_of_kind_preserves_order() {
        let mut config = FetchflowConfig::default();
        config.endpoints = vec![
            EndpointConfig::new("a", "http://a", EndpointKind::PrimaryRpc),
            EndpointConfig::new("meta", "http://m", EndpointKind::MetadataApi),
            EndpointConfig::new("b", "http://b", EndpointKind::PrimaryRpc),
        ];
        let names: Vec<_> = config
            .endpoints_of_kind(EndpointKind::PrimaryRpc)
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}

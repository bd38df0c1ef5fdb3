//! Layered configuration loader built on the `config` crate.

use std::env;
use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use tracing::{debug, info};

use super::error::{ConfigResult, ConfigurationError};
use super::FetchflowConfig;

const CONFIG_PATH_ENV: &str = "FETCHFLOW_CONFIG_PATH";
const ENVIRONMENT_ENV: &str = "FETCHFLOW_ENV";
const ENV_PREFIX: &str = "FETCHFLOW";
const DEFAULT_CONFIG_PATH: &str = "config/fetchflow.toml";

/// Zero-state loader; all methods are associated functions.
#[derive(Debug)]
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load from `FETCHFLOW_CONFIG_PATH` (or `config/fetchflow.toml`) plus overrides
    pub fn load() -> ConfigResult<FetchflowConfig> {
        let path = env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_from_path(&path, &Self::detect_environment())
    }

    /// Load a base file, an optional `<stem>.<environment>.toml` sibling and
    /// `FETCHFLOW__`-prefixed environment variables, in that precedence order.
    pub fn load_from_path(path: &Path, environment: &str) -> ConfigResult<FetchflowConfig> {
        if !path.exists() {
            return Err(ConfigurationError::ConfigFileNotFound {
                path: path.to_path_buf(),
            });
        }

        let override_path = Self::environment_override_path(path, environment);
        debug!(
            base = %path.display(),
            override_file = %override_path.display(),
            environment = %environment,
            "Loading configuration layers"
        );

        let config = Config::builder()
            .add_source(File::from(path).format(FileFormat::Toml))
            .add_source(
                File::from(override_path.as_path())
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let parsed: FetchflowConfig = config.try_deserialize()?;
        parsed.validate()?;

        info!(
            environment = %environment,
            endpoints = parsed.endpoints.len(),
            backend = ?parsed.messaging.backend,
            "Configuration loaded"
        );
        Ok(parsed)
    }

    /// Parse a TOML string without any file or environment layering
    pub fn from_toml_str(contents: &str) -> ConfigResult<FetchflowConfig> {
        let config = Config::builder()
            .add_source(File::from_str(contents, FileFormat::Toml))
            .build()?;
        let parsed: FetchflowConfig = config.try_deserialize()?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn detect_environment() -> String {
        env::var(ENVIRONMENT_ENV).unwrap_or_else(|_| "development".to_string())
    }

    fn environment_override_path(path: &Path, environment: &str) -> PathBuf {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("fetchflow");
        path.with_file_name(format!("{stem}.{environment}.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MessagingBackend;
    use crate::endpoint::EndpointKind;
    use std::fs;
    use tempfile::TempDir;

    fn base_config() -> &'static str {
        r#"
[messaging]
backend = "pgmq"
visibility_timeout_seconds = 45

[retry]
max_attempts = 3
initial_delay_ms = 500

[workers]
transaction_prefetch = 1
finalize_prefetch = 16

[[endpoints]]
name = "rpc-primary"
url = "https://rpc.example.org"
max_concurrent = 2
min_interval_ms = 100

[[endpoints]]
name = "metadata"
url = "https://meta.example.org"
kind = "metadata_api"
"#
    }

    fn write_config(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_load_base_file() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "fetchflow.toml", base_config());

        let config = ConfigLoader::load_from_path(&path, "test").unwrap();

        assert_eq!(config.messaging.backend, MessagingBackend::Pgmq);
        assert_eq!(config.messaging.visibility_timeout_seconds, 45);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.initial_delay_ms, 500);
        // untouched fields keep their defaults
        assert_eq!(config.retry.max_delay_ms, 30_000);
        assert_eq!(config.endpoints.len(), 2);
        assert_eq!(config.endpoints[0].kind, EndpointKind::PrimaryRpc);
        assert_eq!(config.endpoints[1].kind, EndpointKind::MetadataApi);
        assert_eq!(config.endpoints[1].max_concurrent, 4);
    }

    #[test]
    fn test_environment_override_file() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "fetchflow.toml", base_config());
        write_config(
            &dir,
            "fetchflow.production.toml",
            "[workers]\nfinalize_prefetch = 64\n",
        );

        let config = ConfigLoader::load_from_path(&path, "production").unwrap();
        assert_eq!(config.workers.finalize_prefetch, 64);
        assert_eq!(config.workers.transaction_prefetch, 1);

        let config = ConfigLoader::load_from_path(&path, "development").unwrap();
        assert_eq!(config.workers.finalize_prefetch, 16);
    }

    #[test]
    fn test_missing_file() {
        let err = ConfigLoader::load_from_path(Path::new("/nonexistent/fetchflow.toml"), "test")
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::ConfigFileNotFound { .. }));
    }

    #[test]
    fn test_invalid_values_fail_validation() {
        let err = ConfigLoader::from_toml_str("[workers]\ntoken_prefetch = 0\n").unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidValue { .. }));
    }

    #[test]
    fn test_from_toml_str_defaults() {
        let config = ConfigLoader::from_toml_str("").unwrap();
        assert_eq!(config.messaging.backend, MessagingBackend::InMemory);
        assert!(config.endpoints.is_empty());
    }
}

//! Error types for the fetch orchestration system.
//!
//! Network and upstream failures are never represented here: they are
//! values (`FetchOutcome`, `ChainOutcome`) that the fetcher and fallback
//! chain absorb. These variants cover infrastructure faults only.

use thiserror::Error;

use crate::config::ConfigurationError;
use crate::messaging::MessagingError;
use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchflowError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Store error: {0}")]
    StoreError(String),
    #[error("Messaging error: {0}")]
    MessagingError(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Endpoint error: {0}")]
    EndpointError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },
    #[error("Credential rejected")]
    CredentialInvalid,
    #[error("Cancelled")]
    Cancelled,
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for FetchflowError {
    fn from(error: serde_json::Error) -> Self {
        FetchflowError::ValidationError(format!("JSON serialization error: {error}"))
    }
}

impl From<sqlx::Error> for FetchflowError {
    fn from(err: sqlx::Error) -> Self {
        FetchflowError::DatabaseError(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for FetchflowError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        FetchflowError::DatabaseError(format!("migration failed: {err}"))
    }
}

impl From<MessagingError> for FetchflowError {
    fn from(error: MessagingError) -> Self {
        FetchflowError::MessagingError(error.to_string())
    }
}

impl From<ConfigurationError> for FetchflowError {
    fn from(error: ConfigurationError) -> Self {
        FetchflowError::ConfigurationError(error.to_string())
    }
}

impl From<StoreError> for FetchflowError {
    fn from(error: StoreError) -> Self {
        FetchflowError::StoreError(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FetchflowError>;

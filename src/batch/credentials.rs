use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashMap;
use std::fmt;

use crate::config::StaticCredential;
use crate::error::Result;

/// Maps a presented credential to the requester it belongs to.
///
/// `Ok(None)` means unknown. Callers treat errors as rejection.
#[async_trait]
pub trait CredentialValidator: Send + Sync + fmt::Debug {
    async fn validate(&self, credential: &str) -> Result<Option<String>>;
}

/// Credentials from configuration
#[derive(Clone, Default)]
pub struct StaticCredentials {
    by_key: HashMap<String, String>,
}

impl fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("count", &self.by_key.len())
            .finish()
    }
}

impl StaticCredentials {
    pub fn new(credentials: &[StaticCredential]) -> Self {
        let by_key = credentials
            .iter()
            .filter(|c| !c.key.trim().is_empty())
            .map(|c| (c.key.clone(), c.requester.clone()))
            .collect();
        Self { by_key }
    }
}

#[async_trait]
impl CredentialValidator for StaticCredentials {
    async fn validate(&self, credential: &str) -> Result<Option<String>> {
        Ok(self.by_key.get(credential).cloned())
    }
}

/// Credentials in `batch_credentials`; revoked rows never match
#[derive(Debug, Clone)]
pub struct PgCredentialValidator {
    pool: PgPool,
}

impl PgCredentialValidator {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialValidator for PgCredentialValidator {
    async fn validate(&self, credential: &str) -> Result<Option<String>> {
        let requester: Option<String> = sqlx::query_scalar(
            "SELECT requester FROM batch_credentials WHERE api_key = $1 AND revoked_at IS NULL",
        )
        .bind(credential)
        .fetch_optional(&self.pool)
        .await?;
        Ok(requester)
    }
}

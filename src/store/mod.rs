//! # Record Store
//!
//! Read/write contract over the persistent cache of transaction and token
//! records. Access is always keyed by the resource's natural key; the
//! implementation owns upsert atomicity. Re-persisting an existing key is an
//! overwrite, never an error.

pub mod known_keys;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub use known_keys::KnownKeySet;
pub use memory::InMemoryRecordStore;
pub use postgres::PgRecordStore;

use crate::models::{Document, FieldMask, Provenance, ResolverTag, ResourceKey, ResourceKind};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("database error: {0}")]
    Database(String),
    #[error("stored document is malformed: {0}")]
    Malformed(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                StoreError::Unavailable(err.to_string())
            }
            other => StoreError::Database(other.to_string()),
        }
    }
}

/// A document read back from the store, projected to the requested mask
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub key: ResourceKey,
    pub document: Document,
    pub indexed_at: DateTime<Utc>,
}

impl StoredRecord {
    pub fn provenance(&self) -> Provenance {
        Provenance::indexed_at(self.indexed_at).with_resolver(ResolverTag::LocalCache)
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync + std::fmt::Debug {
    /// Which record family this store holds
    fn kind(&self) -> ResourceKind;

    async fn get_by_key(
        &self,
        key: &ResourceKey,
        mask: FieldMask,
    ) -> Result<Option<StoredRecord>, StoreError>;

    async fn exists(&self, key: &ResourceKey) -> Result<bool, StoreError>;

    /// Insert or overwrite the full document for `key`
    async fn upsert(&self, key: &ResourceKey, document: &Document) -> Result<(), StoreError>;

    /// Replace one top-level section of an existing document.
    ///
    /// Returns `false` when no record exists for `key`.
    async fn merge_section(
        &self,
        key: &ResourceKey,
        section: &str,
        value: &Document,
    ) -> Result<bool, StoreError>;
}

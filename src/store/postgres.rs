use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::debug;

use super::{RecordStore, StoreError, StoredRecord};
use crate::models::{Document, FieldMask, ResourceKey, ResourceKind};

/// JSONB documents, one table per record kind
#[derive(Debug, Clone)]
pub struct PgRecordStore {
    pool: PgPool,
    kind: ResourceKind,
}

struct Statements {
    select: &'static str,
    exists: &'static str,
    upsert: &'static str,
    merge: &'static str,
}

const TRANSACTIONS: Statements = Statements {
    select: "SELECT document, indexed_at FROM fetch_transactions WHERE key = $1",
    exists: "SELECT EXISTS(SELECT 1 FROM fetch_transactions WHERE key = $1)",
    upsert: "INSERT INTO fetch_transactions (key, document, indexed_at) VALUES ($1, $2, NOW()) \
             ON CONFLICT (key) DO UPDATE SET document = EXCLUDED.document, indexed_at = NOW()",
    merge: "UPDATE fetch_transactions SET document = jsonb_set(document, ARRAY[$2::text], $3, true) \
            WHERE key = $1",
};

const TOKENS: Statements = Statements {
    select: "SELECT document, indexed_at FROM fetch_tokens WHERE key = $1",
    exists: "SELECT EXISTS(SELECT 1 FROM fetch_tokens WHERE key = $1)",
    upsert: "INSERT INTO fetch_tokens (key, document, indexed_at) VALUES ($1, $2, NOW()) \
             ON CONFLICT (key) DO UPDATE SET document = EXCLUDED.document, indexed_at = NOW()",
    merge: "UPDATE fetch_tokens SET document = jsonb_set(document, ARRAY[$2::text], $3, true) \
            WHERE key = $1",
};

impl PgRecordStore {
    pub fn new(pool: PgPool, kind: ResourceKind) -> Self {
        Self { pool, kind }
    }

    fn statements(&self) -> &'static Statements {
        match self.kind {
            ResourceKind::Transaction => &TRANSACTIONS,
            ResourceKind::Token => &TOKENS,
        }
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    fn kind(&self) -> ResourceKind {
        self.kind
    }

    async fn get_by_key(
        &self,
        key: &ResourceKey,
        mask: FieldMask,
    ) -> Result<Option<StoredRecord>, StoreError> {
        let row = sqlx::query(self.statements().select)
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let document: Document = row.try_get("document")?;
        let indexed_at: DateTime<Utc> = row.try_get("indexed_at")?;
        Ok(Some(StoredRecord {
            key: key.clone(),
            document: mask.project(&document),
            indexed_at,
        }))
    }

    async fn exists(&self, key: &ResourceKey) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar(self.statements().exists)
            .bind(key.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(exists)
    }

    async fn upsert(&self, key: &ResourceKey, document: &Document) -> Result<(), StoreError> {
        sqlx::query(self.statements().upsert)
            .bind(key.as_str())
            .bind(document)
            .execute(&self.pool)
            .await?;
        debug!(kind = %self.kind, key = %key, "record upserted");
        Ok(())
    }

    async fn merge_section(
        &self,
        key: &ResourceKey,
        section: &str,
        value: &Document,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(self.statements().merge)
            .bind(key.as_str())
            .bind(section)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

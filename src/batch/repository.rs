//! Persistence for batch requests and their queue items.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::fmt;
use uuid::Uuid;

use super::state::BatchState;
use crate::error::{FetchflowError, Result};
use crate::models::{records::RecordRef, ResourceKey, ResourceKind};

/// Progress counters captured on every terminal transition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProgress {
    /// Items already persisted when staged
    pub existing_count: u32,
    /// Uncached items fetched successfully
    pub fetched_count: u32,
    pub failed_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub id: Uuid,
    pub requester: String,
    pub priority: u8,
    pub created_at: DateTime<Utc>,
    pub state: BatchState,
    pub progress: BatchProgress,
}

impl BatchRequest {
    pub fn new(requester: impl Into<String>, priority: u8) -> Self {
        Self {
            id: Uuid::new_v4(),
            requester: requester.into(),
            priority,
            created_at: Utc::now(),
            state: BatchState::Created,
            progress: BatchProgress::default(),
        }
    }
}

/// One entry of a batch's work set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    pub key: ResourceKey,
    pub priority: u8,
    /// Persisted before the batch started
    pub existed: bool,
    /// Filled once the record is known to be persisted
    pub resolved: Option<RecordRef>,
}

impl QueueItem {
    pub fn staged(kind: ResourceKind, key: ResourceKey, priority: u8, existed: bool) -> Self {
        let resolved = existed.then(|| RecordRef::new(kind, key.clone()));
        Self {
            key,
            priority,
            existed,
            resolved,
        }
    }
}

#[async_trait]
pub trait BatchRepository: Send + Sync + fmt::Debug {
    async fn create(&self, batch: &BatchRequest) -> Result<()>;

    async fn stage_items(&self, batch_id: Uuid, items: &[QueueItem]) -> Result<()>;

    async fn resolve_item(&self, batch_id: Uuid, key: &ResourceKey, record: &RecordRef) -> Result<()>;

    /// Move `batch_id` from `from` to `to`; fails if the batch is not in `from`
    async fn transition(&self, batch_id: Uuid, from: BatchState, to: BatchState) -> Result<()>;

    async fn record_progress(&self, batch_id: Uuid, progress: &BatchProgress) -> Result<()>;

    async fn get(&self, batch_id: Uuid) -> Result<Option<BatchRequest>>;

    async fn items(&self, batch_id: Uuid) -> Result<Vec<QueueItem>>;
}

fn unknown_batch(batch_id: Uuid) -> FetchflowError {
    FetchflowError::ValidationError(format!("unknown batch {batch_id}"))
}

#[derive(Debug, Default)]
pub struct InMemoryBatchRepository {
    batches: DashMap<Uuid, BatchRequest>,
    items: DashMap<Uuid, Vec<QueueItem>>,
}

impl InMemoryBatchRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }
}

#[async_trait]
impl BatchRepository for InMemoryBatchRepository {
    async fn create(&self, batch: &BatchRequest) -> Result<()> {
        self.batches.insert(batch.id, batch.clone());
        self.items.entry(batch.id).or_default();
        Ok(())
    }

    async fn stage_items(&self, batch_id: Uuid, items: &[QueueItem]) -> Result<()> {
        let mut staged = self.items.get_mut(&batch_id).ok_or_else(|| unknown_batch(batch_id))?;
        staged.extend(items.iter().cloned());
        Ok(())
    }

    async fn resolve_item(&self, batch_id: Uuid, key: &ResourceKey, record: &RecordRef) -> Result<()> {
        let mut staged = self.items.get_mut(&batch_id).ok_or_else(|| unknown_batch(batch_id))?;
        for item in staged.iter_mut().filter(|item| &item.key == key) {
            item.resolved = Some(record.clone());
        }
        Ok(())
    }

    async fn transition(&self, batch_id: Uuid, from: BatchState, to: BatchState) -> Result<()> {
        let mut batch = self.batches.get_mut(&batch_id).ok_or_else(|| unknown_batch(batch_id))?;
        if batch.state != from {
            return Err(FetchflowError::InvalidStateTransition {
                from: batch.state.to_string(),
                to: to.to_string(),
            });
        }
        batch.state = from.transition_to(to)?;
        Ok(())
    }

    async fn record_progress(&self, batch_id: Uuid, progress: &BatchProgress) -> Result<()> {
        let mut batch = self.batches.get_mut(&batch_id).ok_or_else(|| unknown_batch(batch_id))?;
        batch.progress = *progress;
        Ok(())
    }

    async fn get(&self, batch_id: Uuid) -> Result<Option<BatchRequest>> {
        Ok(self.batches.get(&batch_id).map(|b| b.value().clone()))
    }

    async fn items(&self, batch_id: Uuid) -> Result<Vec<QueueItem>> {
        Ok(self
            .items
            .get(&batch_id)
            .map(|items| items.value().clone())
            .unwrap_or_default())
    }
}

/// `batch_requests` and `batch_queue_items`
#[derive(Debug, Clone)]
pub struct PgBatchRepository {
    pool: PgPool,
}

impl PgBatchRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse_kind(kind: &str) -> Result<ResourceKind> {
    match kind {
        "transaction" => Ok(ResourceKind::Transaction),
        "token" => Ok(ResourceKind::Token),
        other => Err(FetchflowError::DatabaseError(format!(
            "unknown record kind in batch_queue_items: {other}"
        ))),
    }
}

fn count(value: i32) -> u32 {
    u32::try_from(value).unwrap_or_default()
}

#[async_trait]
impl BatchRepository for PgBatchRepository {
    async fn create(&self, batch: &BatchRequest) -> Result<()> {
        sqlx::query(
            "INSERT INTO batch_requests (id, requester, priority, state, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, NOW())",
        )
        .bind(batch.id)
        .bind(&batch.requester)
        .bind(i16::from(batch.priority))
        .bind(batch.state.to_string())
        .bind(batch.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn stage_items(&self, batch_id: Uuid, items: &[QueueItem]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for item in items {
            sqlx::query(
                "INSERT INTO batch_queue_items \
                 (batch_id, resource_key, priority, existed, resolved_kind, resolved_key) \
                 VALUES ($1, $2, $3, $4, $5, $6) \
                 ON CONFLICT (batch_id, resource_key) DO NOTHING",
            )
            .bind(batch_id)
            .bind(item.key.as_str())
            .bind(i16::from(item.priority))
            .bind(item.existed)
            .bind(item.resolved.as_ref().map(|r| r.kind.to_string()))
            .bind(item.resolved.as_ref().map(|r| r.key.as_str().to_string()))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn resolve_item(&self, batch_id: Uuid, key: &ResourceKey, record: &RecordRef) -> Result<()> {
        sqlx::query(
            "UPDATE batch_queue_items SET resolved_kind = $3, resolved_key = $4 \
             WHERE batch_id = $1 AND resource_key = $2",
        )
        .bind(batch_id)
        .bind(key.as_str())
        .bind(record.kind.to_string())
        .bind(record.key.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn transition(&self, batch_id: Uuid, from: BatchState, to: BatchState) -> Result<()> {
        from.transition_to(to)?;
        let updated = sqlx::query(
            "UPDATE batch_requests SET state = $3, updated_at = NOW() WHERE id = $1 AND state = $2",
        )
        .bind(batch_id)
        .bind(from.to_string())
        .bind(to.to_string())
        .execute(&self.pool)
        .await?
        .rows_affected();
        if updated == 0 {
            let current = self
                .get(batch_id)
                .await?
                .ok_or_else(|| unknown_batch(batch_id))?;
            return Err(FetchflowError::InvalidStateTransition {
                from: current.state.to_string(),
                to: to.to_string(),
            });
        }
        Ok(())
    }

    async fn record_progress(&self, batch_id: Uuid, progress: &BatchProgress) -> Result<()> {
        sqlx::query(
            "UPDATE batch_requests \
             SET existing_count = $2, fetched_count = $3, failed_count = $4, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(batch_id)
        .bind(i32::try_from(progress.existing_count).unwrap_or(i32::MAX))
        .bind(i32::try_from(progress.fetched_count).unwrap_or(i32::MAX))
        .bind(i32::try_from(progress.failed_count).unwrap_or(i32::MAX))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, batch_id: Uuid) -> Result<Option<BatchRequest>> {
        let row = sqlx::query(
            "SELECT id, requester, priority, state, created_at, \
             existing_count, fetched_count, failed_count \
             FROM batch_requests WHERE id = $1",
        )
        .bind(batch_id)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let state: String = row.try_get("state")?;
        let priority: i16 = row.try_get("priority")?;
        Ok(Some(BatchRequest {
            id: row.try_get("id")?,
            requester: row.try_get("requester")?,
            priority: u8::try_from(priority).unwrap_or(u8::MAX),
            created_at: row.try_get("created_at")?,
            state: state.parse().map_err(FetchflowError::DatabaseError)?,
            progress: BatchProgress {
                existing_count: count(row.try_get("existing_count")?),
                fetched_count: count(row.try_get("fetched_count")?),
                failed_count: count(row.try_get("failed_count")?),
            },
        }))
    }

    async fn items(&self, batch_id: Uuid) -> Result<Vec<QueueItem>> {
        let rows = sqlx::query(
            "SELECT resource_key, priority, existed, resolved_kind, resolved_key \
             FROM batch_queue_items WHERE batch_id = $1 ORDER BY position",
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<QueueItem> {
                let priority: i16 = row.try_get("priority")?;
                let kind: Option<String> = row.try_get("resolved_kind")?;
                let resolved_key: Option<String> = row.try_get("resolved_key")?;
                let resolved = match (kind, resolved_key) {
                    (Some(kind), Some(key)) => {
                        Some(RecordRef::new(parse_kind(&kind)?, ResourceKey::new(key)))
                    }
                    _ => None,
                };
                Ok(QueueItem {
                    key: ResourceKey::new(row.try_get::<String, _>("resource_key")?),
                    priority: u8::try_from(priority).unwrap_or(u8::MAX),
                    existed: row.try_get("existed")?,
                    resolved,
                })
            })
            .collect()
    }
}


#[cfg(all(test, feature = "integration-tests"))]
mod pg_tests {
    use super::*;

    #[sqlx::test(migrations = "./migrations")]
    async fn test_batch_round_trip(pool: PgPool) {
        let repository = PgBatchRepository::new(pool);
        let batch = BatchRequest::new("site", 10);
        repository.create(&batch).await.unwrap();
        repository
            .stage_items(
                batch.id,
                &[
                    QueueItem::staged(ResourceKind::Transaction, ResourceKey::from("s1"), 10, true),
                    QueueItem::staged(ResourceKind::Transaction, ResourceKey::from("s2"), 10, false),
                ],
            )
            .await
            .unwrap();
        repository
            .transition(batch.id, BatchState::Created, BatchState::Processing)
            .await
            .unwrap();
        repository
            .record_progress(
                batch.id,
                &BatchProgress {
                    existing_count: 1,
                    fetched_count: 1,
                    failed_count: 0,
                },
            )
            .await
            .unwrap();

        let stored = repository.get(batch.id).await.unwrap().unwrap();
        assert_eq!(stored.state, BatchState::Processing);
        assert_eq!(stored.progress.fetched_count, 1);
        let items = repository.items(batch.id).await.unwrap();
        assert_eq!(items[0].key, ResourceKey::from("s1"));
        assert!(items[0].resolved.is_some());
        assert!(items[1].resolved.is_none());

        assert!(repository
            .transition(batch.id, BatchState::Created, BatchState::Stale)
            .await
            .is_err());
    }
}

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

use super::{FanInStatus, FanInSynchronizer};
use crate::error::Result;
use crate::models::ResourceKey;

/// Counters in `pending_counters`, shared by every worker process.
///
/// `complete` runs the decrement and the zero-row delete in one
/// transaction. The `UPDATE` takes the row lock, so concurrent completions
/// for the same parent serialize and exactly one of them observes zero.
#[derive(Debug, Clone)]
pub struct PgFanIn {
    pool: PgPool,
}

impl PgFanIn {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FanInSynchronizer for PgFanIn {
    async fn register(&self, parent: &ResourceKey, count: u32) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        sqlx::query(
            "INSERT INTO pending_counters (parent_key, remaining, created_at) VALUES ($1, $2, NOW()) \
             ON CONFLICT (parent_key) DO UPDATE \
             SET remaining = pending_counters.remaining + EXCLUDED.remaining",
        )
        .bind(parent.as_str())
        .bind(i64::from(count))
        .execute(&self.pool)
        .await?;
        debug!(parent = %parent, count, "fan-in registered");
        Ok(())
    }

    async fn complete(&self, parent: &ResourceKey) -> Result<FanInStatus> {
        let mut tx = self.pool.begin().await?;

        let remaining: Option<i64> = sqlx::query_scalar(
            "UPDATE pending_counters SET remaining = remaining - 1 \
             WHERE parent_key = $1 RETURNING remaining",
        )
        .bind(parent.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let status = match remaining {
            None => FanInStatus::Untracked,
            Some(n) if n <= 0 => {
                sqlx::query("DELETE FROM pending_counters WHERE parent_key = $1")
                    .bind(parent.as_str())
                    .execute(&mut *tx)
                    .await?;
                FanInStatus::Satisfied
            }
            Some(n) => FanInStatus::StillPending(u32::try_from(n).unwrap_or(u32::MAX)),
        };

        tx.commit().await?;
        debug!(parent = %parent, %status, "fan-in completion");
        Ok(status)
    }

    async fn pending(&self, parent: &ResourceKey) -> Result<Option<u32>> {
        let remaining: Option<i64> =
            sqlx::query_scalar("SELECT remaining FROM pending_counters WHERE parent_key = $1")
                .bind(parent.as_str())
                .fetch_optional(&self.pool)
                .await?;
        Ok(remaining.map(|n| u32::try_from(n.max(0)).unwrap_or(u32::MAX)))
    }
}

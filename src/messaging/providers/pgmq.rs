//! # PGMQ Messaging Service
//!
//! Queues backed by the PostgreSQL `pgmq` extension, driven through its SQL
//! functions over the shared `sqlx` pool. Ack archives the message so a
//! processed payload remains inspectable in `pgmq.a_<queue>`.
//!
//! `pgmq` has no priority support; `send_message_with_priority` uses the
//! trait's default and sends in arrival order.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::debug;

use crate::messaging::errors::MessagingError;
use crate::messaging::service::{MessagingService, QueueMessage};
use crate::messaging::types::{
    MessageId, QueueCheck, QueueStats, QueuedMessage, ReceiptHandle,
};

#[derive(Debug, Clone)]
pub struct PgmqMessagingService {
    pool: PgPool,
}

impl PgmqMessagingService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn message_id(receipt_handle: &ReceiptHandle) -> Result<i64, MessagingError> {
        receipt_handle
            .as_i64()
            .ok_or_else(|| MessagingError::unknown_receipt(receipt_handle.as_str()))
    }
}

fn seconds(duration: Duration) -> i32 {
    i32::try_from(duration.as_secs()).unwrap_or(i32::MAX)
}

#[async_trait]
impl MessagingService for PgmqMessagingService {
    async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError> {
        sqlx::query("SELECT pgmq.create($1)")
            .bind(queue_name)
            .execute(&self.pool)
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "create", e.to_string()))?;
        debug!(queue = queue_name, "queue ensured");
        Ok(())
    }

    async fn verify_queues(
        &self,
        queue_names: &[String],
    ) -> Result<QueueCheck, MessagingError> {
        let existing: Vec<String> = sqlx::query_scalar("SELECT queue_name FROM pgmq.list_queues()")
            .fetch_all(&self.pool)
            .await?;
        Ok(QueueCheck::of(queue_names, |name| existing.iter().any(|q| q == name)))
    }

    async fn send_message<T: QueueMessage>(
        &self,
        queue_name: &str,
        message: &T,
    ) -> Result<MessageId, MessagingError> {
        let json: serde_json::Value = serde_json::from_slice(&message.to_bytes()?)
            .map_err(|e| MessagingError::message_serialization(e.to_string()))?;
        let msg_id: i64 = sqlx::query_scalar("SELECT * FROM pgmq.send($1, $2)")
            .bind(queue_name)
            .bind(json)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "send", e.to_string()))?;
        Ok(MessageId::from(msg_id))
    }

    async fn receive_messages<T: QueueMessage>(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueuedMessage<T>>, MessagingError> {
        let rows = sqlx::query(
            "SELECT msg_id, read_ct, enqueued_at, message FROM pgmq.read($1, $2, $3)",
        )
        .bind(queue_name)
        .bind(seconds(visibility_timeout))
        .bind(i32::try_from(max_messages).unwrap_or(i32::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MessagingError::queue_operation(queue_name, "read", e.to_string()))?;

        let mut result = Vec::with_capacity(rows.len());
        for row in rows {
            let msg_id: i64 = row.try_get("msg_id")?;
            let read_ct: i32 = row.try_get("read_ct")?;
            let enqueued_at: DateTime<Utc> = row.try_get("enqueued_at")?;
            let message: serde_json::Value = row.try_get("message")?;
            let bytes = serde_json::to_vec(&message)
                .map_err(|e| MessagingError::message_serialization(e.to_string()))?;
            result.push(QueuedMessage::new(
                ReceiptHandle::from(msg_id),
                T::from_bytes(&bytes)?,
                u32::try_from(read_ct).unwrap_or(0),
                enqueued_at,
            ));
        }
        Ok(result)
    }

    async fn ack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), MessagingError> {
        let message_id = Self::message_id(receipt_handle)?;
        let archived: bool = sqlx::query_scalar("SELECT pgmq.archive($1, $2)")
            .bind(queue_name)
            .bind(message_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "archive", e.to_string()))?;
        if archived {
            Ok(())
        } else {
            Err(MessagingError::unknown_receipt(message_id.to_string()))
        }
    }

    async fn nack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> Result<(), MessagingError> {
        let message_id = Self::message_id(receipt_handle)?;
        if requeue {
            sqlx::query("SELECT msg_id FROM pgmq.set_vt($1, $2, 0)")
                .bind(queue_name)
                .bind(message_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| MessagingError::queue_operation(queue_name, "nack", e.to_string()))?;
        } else {
            sqlx::query("SELECT pgmq.delete($1, $2)")
                .bind(queue_name)
                .bind(message_id)
                .execute(&self.pool)
                .await
                .map_err(|e| MessagingError::queue_operation(queue_name, "nack", e.to_string()))?;
        }
        Ok(())
    }

    async fn extend_visibility(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        extension: Duration,
    ) -> Result<(), MessagingError> {
        let message_id = Self::message_id(receipt_handle)?;
        sqlx::query("SELECT msg_id FROM pgmq.set_vt($1, $2, $3)")
            .bind(queue_name)
            .bind(message_id)
            .bind(seconds(extension))
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                MessagingError::queue_operation(queue_name, "extend_visibility", e.to_string())
            })?;
        Ok(())
    }

    async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats, MessagingError> {
        let row = sqlx::query("SELECT queue_length, oldest_msg_age_sec FROM pgmq.metrics($1)")
            .bind(queue_name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "stats", e.to_string()))?
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let length: i64 = row.try_get("queue_length")?;
        let oldest: Option<i32> = row.try_get("oldest_msg_age_sec")?;
        let mut stats = QueueStats::new(queue_name, u64::try_from(length).unwrap_or(0));
        if let Some(age) = oldest {
            stats = stats.with_oldest_message_age(Duration::from_secs(u64::try_from(age).unwrap_or(0)));
        }
        Ok(stats)
    }

    async fn health_check(&self) -> Result<bool, MessagingError> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map(|one| one == 1)
            .map_err(|e| MessagingError::Database(e.to_string()))
    }

    fn provider_name(&self) -> &'static str {
        "pgmq"
    }
}

#[cfg(all(test, feature = "integration-tests"))]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Ping {
        n: u32,
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_pgmq_send_receive_ack(pool: PgPool) -> sqlx::Result<()> {
        let service = PgmqMessagingService::new(pool);
        service.ensure_queue("fetchflow_test").await.unwrap();
        service.send_message("fetchflow_test", &Ping { n: 7 }).await.unwrap();

        let received = service
            .receive_messages::<Ping>("fetchflow_test", 5, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].message, Ping { n: 7 });

        service
            .ack_message("fetchflow_test", &received[0].receipt_handle)
            .await
            .unwrap();
        let stats = service.queue_stats("fetchflow_test").await.unwrap();
        assert_eq!(stats.message_count, 0);
        Ok(())
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_pgmq_nack_requeue(pool: PgPool) -> sqlx::Result<()> {
        let service = PgmqMessagingService::new(pool);
        service.ensure_queue("fetchflow_nack").await.unwrap();
        service.send_message("fetchflow_nack", &Ping { n: 1 }).await.unwrap();
        let first = service
            .receive_messages::<Ping>("fetchflow_nack", 1, Duration::from_secs(30))
            .await
            .unwrap();
        service
            .nack_message("fetchflow_nack", &first[0].receipt_handle, true)
            .await
            .unwrap();
        let second = service
            .receive_messages::<Ping>("fetchflow_nack", 1, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].receive_count, 2);
        Ok(())
    }
}

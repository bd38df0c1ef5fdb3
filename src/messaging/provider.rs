//! Enum dispatch over the concrete brokers.
//!
//! `MessagingService` has generic methods and is therefore not object safe;
//! components hold an `Arc<MessagingProvider>` instead of a trait object.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;

use super::errors::MessagingError;
use super::providers::{InMemoryMessagingService, PgmqMessagingService};
use super::service::{MessagingService, QueueMessage};
use super::types::{MessageId, QueueCheck, QueueStats, QueuedMessage, ReceiptHandle};
use crate::config::{MessagingBackend, MessagingConfig};

#[derive(Debug, Clone)]
pub enum MessagingProvider {
    /// PostgreSQL `pgmq` extension
    Pgmq(PgmqMessagingService),
    /// Process-local queues; shared so tests can inspect them
    InMemory(Arc<InMemoryMessagingService>),
}

impl MessagingProvider {
    pub fn in_memory() -> Self {
        Self::InMemory(Arc::new(InMemoryMessagingService::new()))
    }

    pub fn pgmq(pool: PgPool) -> Self {
        Self::Pgmq(PgmqMessagingService::new(pool))
    }

    /// Build the configured backend; `pgmq` needs a database pool
    pub fn from_config(
        config: &MessagingConfig,
        pool: Option<PgPool>,
    ) -> Result<Self, MessagingError> {
        match config.backend {
            MessagingBackend::InMemory => Ok(Self::in_memory()),
            MessagingBackend::Pgmq => pool.map(Self::pgmq).ok_or_else(|| {
                MessagingError::configuration("pgmq backend requires a database pool")
            }),
        }
    }

    /// The in-memory service, when that is the active backend
    pub fn as_in_memory(&self) -> Option<&Arc<InMemoryMessagingService>> {
        match self {
            Self::InMemory(s) => Some(s),
            Self::Pgmq(_) => None,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        match self {
            Self::Pgmq(s) => s.provider_name(),
            Self::InMemory(s) => s.provider_name(),
        }
    }

    pub async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError> {
        match self {
            Self::Pgmq(s) => s.ensure_queue(queue_name).await,
            Self::InMemory(s) => s.ensure_queue(queue_name).await,
        }
    }

    pub async fn ensure_queues(&self, queue_names: &[String]) -> Result<(), MessagingError> {
        match self {
            Self::Pgmq(s) => s.ensure_queues(queue_names).await,
            Self::InMemory(s) => s.ensure_queues(queue_names).await,
        }
    }

    pub async fn verify_queues(
        &self,
        queue_names: &[String],
    ) -> Result<QueueCheck, MessagingError> {
        match self {
            Self::Pgmq(s) => s.verify_queues(queue_names).await,
            Self::InMemory(s) => s.verify_queues(queue_names).await,
        }
    }

    pub async fn send_message<T: QueueMessage>(
        &self,
        queue_name: &str,
        message: &T,
    ) -> Result<MessageId, MessagingError> {
        match self {
            Self::Pgmq(s) => s.send_message(queue_name, message).await,
            Self::InMemory(s) => s.send_message(queue_name, message).await,
        }
    }

    pub async fn send_message_with_priority<T: QueueMessage>(
        &self,
        queue_name: &str,
        message: &T,
        priority: u8,
    ) -> Result<MessageId, MessagingError> {
        match self {
            Self::Pgmq(s) => {
                s.send_message_with_priority(queue_name, message, priority)
                    .await
            }
            Self::InMemory(s) => {
                s.send_message_with_priority(queue_name, message, priority)
                    .await
            }
        }
    }

    pub async fn receive_messages<T: QueueMessage>(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueuedMessage<T>>, MessagingError> {
        match self {
            Self::Pgmq(s) => {
                s.receive_messages(queue_name, max_messages, visibility_timeout)
                    .await
            }
            Self::InMemory(s) => {
                s.receive_messages(queue_name, max_messages, visibility_timeout)
                    .await
            }
        }
    }

    pub async fn ack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), MessagingError> {
        match self {
            Self::Pgmq(s) => s.ack_message(queue_name, receipt_handle).await,
            Self::InMemory(s) => s.ack_message(queue_name, receipt_handle).await,
        }
    }

    pub async fn nack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> Result<(), MessagingError> {
        match self {
            Self::Pgmq(s) => s.nack_message(queue_name, receipt_handle, requeue).await,
            Self::InMemory(s) => s.nack_message(queue_name, receipt_handle, requeue).await,
        }
    }

    pub async fn extend_visibility(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        extension: Duration,
    ) -> Result<(), MessagingError> {
        match self {
            Self::Pgmq(s) => {
                s.extend_visibility(queue_name, receipt_handle, extension)
                    .await
            }
            Self::InMemory(s) => {
                s.extend_visibility(queue_name, receipt_handle, extension)
                    .await
            }
        }
    }

    pub async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats, MessagingError> {
        match self {
            Self::Pgmq(s) => s.queue_stats(queue_name).await,
            Self::InMemory(s) => s.queue_stats(queue_name).await,
        }
    }

    pub async fn health_check(&self) -> Result<bool, MessagingError> {
        match self {
            Self::Pgmq(s) => s.health_check().await,
            Self::InMemory(s) => s.health_check().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pgmq_backend_requires_pool() {
        let config = MessagingConfig {
            backend: MessagingBackend::Pgmq,
            ..MessagingConfig::default()
        };
        assert!(MessagingProvider::from_config(&config, None).is_err());

        let provider = MessagingProvider::from_config(&MessagingConfig::default(), None).unwrap();
        assert_eq!(provider.provider_name(), "in_memory");
        assert!(provider.as_in_memory().is_some());
    }
}

//! # Broker contract
//!
//! `MessagingService` is the queue API every provider implements. Delivery is
//! at-least-once: a received message stays in the queue, invisible, until it
//! is acked; if the consumer dies first it reappears after the visibility
//! timeout.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;

use super::errors::MessagingError;
use super::types::{MessageId, QueueCheck, QueueStats, QueuedMessage, ReceiptHandle};

/// Anything that can travel through a queue
pub trait QueueMessage: Send + Sync + Sized + 'static {
    fn to_bytes(&self) -> Result<Vec<u8>, MessagingError>;
    fn from_bytes(bytes: &[u8]) -> Result<Self, MessagingError>;
}

impl<T> QueueMessage for T
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn to_bytes(&self) -> Result<Vec<u8>, MessagingError> {
        serde_json::to_vec(self).map_err(|e| MessagingError::message_serialization(e.to_string()))
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, MessagingError> {
        serde_json::from_slice(bytes)
            .map_err(|e| MessagingError::message_deserialization(e.to_string()))
    }
}

#[async_trait]
pub trait MessagingService: Send + Sync + 'static {
    /// Create a queue if it doesn't exist (idempotent)
    async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError>;

    async fn ensure_queues(&self, queue_names: &[String]) -> Result<(), MessagingError> {
        for name in queue_names {
            self.ensure_queue(name).await?;
        }
        Ok(())
    }

    async fn verify_queues(
        &self,
        queue_names: &[String],
    ) -> Result<QueueCheck, MessagingError>;

    async fn send_message<T: QueueMessage>(
        &self,
        queue_name: &str,
        message: &T,
    ) -> Result<MessageId, MessagingError>;

    /// Send with a delivery priority (higher is sooner).
    ///
    /// Priority is advisory. Providers without priority support fall back
    /// to plain `send_message`.
    async fn send_message_with_priority<T: QueueMessage>(
        &self,
        queue_name: &str,
        message: &T,
        _priority: u8,
    ) -> Result<MessageId, MessagingError> {
        self.send_message(queue_name, message).await
    }

    /// Receive up to `max_messages`, hiding them for `visibility_timeout`
    async fn receive_messages<T: QueueMessage>(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueuedMessage<T>>, MessagingError>;

    /// Remove a processed message
    async fn ack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), MessagingError>;

    /// Return a message to the queue (`requeue`) or drop it
    async fn nack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> Result<(), MessagingError>;

    async fn extend_visibility(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        extension: Duration,
    ) -> Result<(), MessagingError>;

    async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats, MessagingError>;

    async fn health_check(&self) -> Result<bool, MessagingError>;

    fn provider_name(&self) -> &'static str;
}

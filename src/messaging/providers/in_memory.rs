//! # In-Memory Messaging Service
//!
//! Process-local queues for tests and single-process runs.
//!
//! - **Visibility timeout**: received messages are hidden until acked or the
//!   timeout lapses, then redelivered (at-least-once).
//! - **Priority**: among visible messages the highest priority is delivered
//!   first, FIFO within a priority.
//!
//! Visibility uses `tokio::time::Instant`, so paused-clock tests can drive
//! redelivery with `tokio::time::advance`.

use std::cmp::Reverse;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::trace;

use crate::constants::priority;
use crate::messaging::errors::MessagingError;
use crate::messaging::service::{MessagingService, QueueMessage};
use crate::messaging::types::{
    MessageId, QueueCheck, QueueStats, QueuedMessage, ReceiptHandle,
};

#[derive(Debug, Clone)]
struct InMemoryQueuedMessage {
    id: u64,
    payload: Vec<u8>,
    priority: u8,
    enqueued_at: DateTime<Utc>,
    /// None = visible now
    visible_at: Option<Instant>,
    receive_count: u32,
}

impl InMemoryQueuedMessage {
    fn is_visible(&self, now: Instant) -> bool {
        self.visible_at.map(|at| at <= now).unwrap_or(true)
    }
}

#[derive(Debug)]
struct InMemoryQueue {
    messages: VecDeque<InMemoryQueuedMessage>,
    next_id: u64,
    total_sent: u64,
    total_acked: u64,
}

impl InMemoryQueue {
    fn new() -> Self {
        Self {
            messages: VecDeque::new(),
            next_id: 1,
            total_sent: 0,
            total_acked: 0,
        }
    }

    fn push(&mut self, payload: Vec<u8>, priority: u8) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.total_sent += 1;
        self.messages.push_back(InMemoryQueuedMessage {
            id,
            payload,
            priority,
            enqueued_at: Utc::now(),
            visible_at: None,
            receive_count: 0,
        });
        id
    }

    fn position(&self, id: u64) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }
}

#[derive(Debug)]
pub struct InMemoryMessagingService {
    queues: RwLock<HashMap<String, InMemoryQueue>>,
}

impl Default for InMemoryMessagingService {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMessagingService {
    pub fn new() -> Self {
        Self {
            queues: RwLock::new(HashMap::new()),
        }
    }

    /// Messages currently stored, visible or not
    pub async fn queue_length(&self, queue_name: &str) -> usize {
        self.queues
            .read()
            .await
            .get(queue_name)
            .map(|q| q.messages.len())
            .unwrap_or(0)
    }

    pub async fn total_acked(&self, queue_name: &str) -> u64 {
        self.queues
            .read()
            .await
            .get(queue_name)
            .map(|q| q.total_acked)
            .unwrap_or(0)
    }

    /// Decode every stored message without changing visibility
    pub async fn peek_all<T: QueueMessage>(
        &self,
        queue_name: &str,
    ) -> Result<Vec<T>, MessagingError> {
        let queues = self.queues.read().await;
        let queue = queues
            .get(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;
        queue
            .messages
            .iter()
            .map(|m| T::from_bytes(&m.payload))
            .collect()
    }

    fn parse_handle(receipt_handle: &ReceiptHandle) -> Result<u64, MessagingError> {
        receipt_handle
            .as_str()
            .parse()
            .map_err(|_| MessagingError::unknown_receipt(receipt_handle.as_str()))
    }
}

#[async_trait]
impl MessagingService for InMemoryMessagingService {
    async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError> {
        self.queues
            .write()
            .await
            .entry(queue_name.to_string())
            .or_insert_with(InMemoryQueue::new);
        Ok(())
    }

    async fn verify_queues(
        &self,
        queue_names: &[String],
    ) -> Result<QueueCheck, MessagingError> {
        let queues = self.queues.read().await;
        Ok(QueueCheck::of(queue_names, |name| queues.contains_key(name)))
    }

    async fn send_message<T: QueueMessage>(
        &self,
        queue_name: &str,
        message: &T,
    ) -> Result<MessageId, MessagingError> {
        self.send_message_with_priority(queue_name, message, priority::DEFAULT)
            .await
    }

    async fn send_message_with_priority<T: QueueMessage>(
        &self,
        queue_name: &str,
        message: &T,
        priority: u8,
    ) -> Result<MessageId, MessagingError> {
        let payload = message.to_bytes()?;
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;
        let id = queue.push(payload, priority);
        trace!(queue = queue_name, id, priority, "message enqueued");
        Ok(MessageId::from(id))
    }

    async fn receive_messages<T: QueueMessage>(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueuedMessage<T>>, MessagingError> {
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let now = Instant::now();
        let mut candidates: Vec<usize> = queue
            .messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.is_visible(now))
            .map(|(index, _)| index)
            .collect();
        // VecDeque order is send order, so the stable sort keeps FIFO per priority.
        candidates.sort_by_key(|&index| Reverse(queue.messages[index].priority));
        candidates.truncate(max_messages);

        let mut received = Vec::with_capacity(candidates.len());
        for index in candidates {
            let msg = &mut queue.messages[index];
            let decoded = T::from_bytes(&msg.payload)?;
            msg.visible_at = Some(now + visibility_timeout);
            msg.receive_count += 1;
            received.push(QueuedMessage::new(
                ReceiptHandle::from(msg.id),
                decoded,
                msg.receive_count,
                msg.enqueued_at,
            ));
        }
        Ok(received)
    }

    async fn ack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), MessagingError> {
        let id = Self::parse_handle(receipt_handle)?;
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;
        let position = queue
            .position(id)
            .ok_or_else(|| MessagingError::unknown_receipt(id.to_string()))?;
        queue.messages.remove(position);
        queue.total_acked += 1;
        Ok(())
    }

    async fn nack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        requeue: bool,
    ) -> Result<(), MessagingError> {
        let id = Self::parse_handle(receipt_handle)?;
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;
        let position = queue
            .position(id)
            .ok_or_else(|| MessagingError::unknown_receipt(id.to_string()))?;
        if requeue {
            queue.messages[position].visible_at = None;
        } else {
            queue.messages.remove(position);
        }
        Ok(())
    }

    async fn extend_visibility(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        extension: Duration,
    ) -> Result<(), MessagingError> {
        let id = Self::parse_handle(receipt_handle)?;
        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;
        let msg = queue
            .messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| MessagingError::unknown_receipt(id.to_string()))?;
        msg.visible_at = Some(Instant::now() + extension);
        Ok(())
    }

    async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats, MessagingError> {
        let queues = self.queues.read().await;
        let queue = queues
            .get(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let now = Instant::now();
        let in_flight = queue.messages.iter().filter(|m| !m.is_visible(now)).count() as u64;
        let mut stats =
            QueueStats::new(queue_name, queue.messages.len() as u64).with_in_flight_count(in_flight);
        if let Some(oldest) = queue.messages.front() {
            let age = (Utc::now() - oldest.enqueued_at).to_std().unwrap_or_default();
            stats = stats.with_oldest_message_age(age);
        }
        Ok(stats)
    }

    async fn health_check(&self) -> Result<bool, MessagingError> {
        Ok(true)
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}

//! Request/reply and fire-and-forget publishing on top of the broker.

use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::envelope::{ReplyEnvelope, RequestEnvelope};
use super::errors::MessagingError;
use super::provider::MessagingProvider;
use super::types::MessageId;
use crate::config::MessagingConfig;

/// Caller side of the queue topology.
///
/// Each client owns a private reply queue. Calls through one client are
/// serialized, so any reply that does not match the in-flight correlation id
/// is a leftover from an earlier timed-out call; those are acked and dropped.
#[derive(Debug)]
pub struct RpcClient {
    messaging: Arc<MessagingProvider>,
    reply_queue: String,
    reply_timeout: Duration,
    poll_interval: Duration,
    visibility_timeout: Duration,
    in_flight: Mutex<()>,
}

impl RpcClient {
    /// Create the client and its reply queue
    pub async fn connect(
        messaging: Arc<MessagingProvider>,
        config: &MessagingConfig,
    ) -> Result<Self, MessagingError> {
        let reply_queue = format!(
            "{}_{}",
            config.queues.reply_prefix,
            Uuid::new_v4().simple()
        );
        messaging.ensure_queue(&reply_queue).await?;
        debug!(reply_queue = %reply_queue, "rpc client connected");
        Ok(Self {
            messaging,
            reply_queue,
            reply_timeout: config.reply_timeout(),
            poll_interval: config.poll_interval(),
            visibility_timeout: config.visibility_timeout(),
            in_flight: Mutex::new(()),
        })
    }

    pub fn reply_queue(&self) -> &str {
        &self.reply_queue
    }

    pub fn with_reply_timeout(mut self, reply_timeout: Duration) -> Self {
        self.reply_timeout = reply_timeout;
        self
    }

    /// Publish `body` to `queue` and wait for the matching reply
    #[instrument(skip(self, body), fields(reply_queue = %self.reply_queue))]
    pub async fn call<Req, Resp>(
        &self,
        queue: &str,
        body: Req,
        priority: u8,
    ) -> Result<Resp, MessagingError>
    where
        Req: Serialize + DeserializeOwned + Send + Sync + 'static,
        Resp: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let _guard = self.in_flight.lock().await;
        let envelope = RequestEnvelope::request(body, self.reply_queue.clone(), priority);
        let correlation_id = envelope.correlation_id;
        self.messaging
            .send_message_with_priority(queue, &envelope, priority)
            .await?;

        match tokio::time::timeout(self.reply_timeout, self.await_reply(correlation_id)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(%correlation_id, "no reply before timeout");
                Err(MessagingError::timeout(
                    format!("rpc call on {queue}"),
                    self.reply_timeout.as_millis() as u64,
                ))
            }
        }
    }

    async fn await_reply<Resp>(&self, correlation_id: Uuid) -> Result<Resp, MessagingError>
    where
        Resp: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        loop {
            let replies = self
                .messaging
                .receive_messages::<ReplyEnvelope<serde_json::Value>>(
                    &self.reply_queue,
                    10,
                    self.visibility_timeout,
                )
                .await?;

            let mut matched = None;
            for reply in replies {
                self.messaging
                    .ack_message(&self.reply_queue, &reply.receipt_handle)
                    .await?;
                if reply.message.correlation_id == correlation_id && matched.is_none() {
                    matched = Some(reply.message.body);
                } else {
                    debug!(
                        stale = %reply.message.correlation_id,
                        "dropping reply for another call"
                    );
                }
            }

            if let Some(body) = matched {
                return serde_json::from_value(body)
                    .map_err(|e| MessagingError::message_deserialization(e.to_string()));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Publish a fire-and-forget task
    pub async fn publish_task<T>(
        &self,
        queue: &str,
        body: T,
        priority: u8,
    ) -> Result<MessageId, MessagingError>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        publish_task(&self.messaging, queue, body, priority).await
    }
}

/// Publish a fire-and-forget task without an `RpcClient`
pub async fn publish_task<T>(
    messaging: &MessagingProvider,
    queue: &str,
    body: T,
    priority: u8,
) -> Result<MessageId, MessagingError>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let envelope = RequestEnvelope::task(body, priority);
    messaging
        .send_message_with_priority(queue, &envelope, priority)
        .await
}

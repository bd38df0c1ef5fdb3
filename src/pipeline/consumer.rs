//! Queue consumer with prefetch backpressure.
//!
//! At most `prefetch` messages are held (received but not yet acked) at any
//! time. The receive size is `prefetch - in_flight`, and each message holds a
//! semaphore permit until it is settled.
//!
//! While a handler runs, its message's visibility is extended every third of
//! the visibility timeout, so a slow handler is never raced by a redelivered
//! copy of its own message.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::MessageHandler;
use crate::error::{FetchflowError, Result};
use crate::messaging::{MessagingProvider, QueuedMessage, ReceiptHandle, RequestEnvelope};

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub queue: String,
    /// Maximum unacknowledged messages held by this consumer
    pub prefetch: usize,
    pub poll_interval: Duration,
    pub visibility_timeout: Duration,
}

impl ConsumerConfig {
    pub fn new(queue: impl Into<String>, prefetch: usize) -> Self {
        Self {
            queue: queue.into(),
            prefetch,
            poll_interval: Duration::from_millis(100),
            visibility_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_visibility_timeout(mut self, visibility_timeout: Duration) -> Self {
        self.visibility_timeout = visibility_timeout;
        self
    }

    /// How often an in-flight message's visibility is extended
    pub fn heartbeat_interval(&self) -> Duration {
        (self.visibility_timeout / 3).max(Duration::from_millis(1))
    }
}

#[derive(Debug, Default)]
pub struct ConsumerStats {
    pub received: AtomicU64,
    pub acked: AtomicU64,
    pub requeued: AtomicU64,
    pub malformed: AtomicU64,
    pub replies: AtomicU64,
    pub extensions: AtomicU64,
}

impl ConsumerStats {
    pub fn acked(&self) -> u64 {
        self.acked.load(Ordering::Relaxed)
    }

    pub fn requeued(&self) -> u64 {
        self.requeued.load(Ordering::Relaxed)
    }

    pub fn replies(&self) -> u64 {
        self.replies.load(Ordering::Relaxed)
    }

    pub fn extensions(&self) -> u64 {
        self.extensions.load(Ordering::Relaxed)
    }
}

pub struct QueueConsumer<H: MessageHandler> {
    messaging: Arc<MessagingProvider>,
    handler: Arc<H>,
    config: ConsumerConfig,
    permits: Arc<Semaphore>,
    stats: Arc<ConsumerStats>,
}

impl<H: MessageHandler> std::fmt::Debug for QueueConsumer<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueConsumer")
            .field("stage", &self.handler.stage())
            .field("config", &self.config)
            .finish()
    }
}

impl<H: MessageHandler> QueueConsumer<H> {
    pub fn new(
        messaging: Arc<MessagingProvider>,
        handler: Arc<H>,
        config: ConsumerConfig,
    ) -> Result<Self> {
        if config.prefetch == 0 {
            return Err(FetchflowError::ConfigurationError(format!(
                "prefetch for {} must be at least 1",
                config.queue
            )));
        }
        Ok(Self {
            messaging,
            handler,
            permits: Arc::new(Semaphore::new(config.prefetch)),
            config,
            stats: Arc::new(ConsumerStats::default()),
        })
    }

    pub fn stats(&self) -> Arc<ConsumerStats> {
        Arc::clone(&self.stats)
    }

    pub fn in_flight(&self) -> usize {
        self.config.prefetch - self.permits.available_permits()
    }

    /// Consume until `shutdown` fires, then wait for in-flight messages
    #[instrument(skip(self, shutdown), fields(stage = self.handler.stage(), queue = %self.config.queue))]
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        info!(prefetch = self.config.prefetch, "consumer started");
        let mut tasks = JoinSet::new();

        loop {
            while let Some(joined) = tasks.try_join_next() {
                report_panic(joined);
            }
            if shutdown.is_cancelled() {
                break;
            }

            let free = self.permits.available_permits();
            if free == 0 {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    joined = tasks.join_next() => {
                        if let Some(joined) = joined {
                            report_panic(joined);
                        }
                    }
                }
                continue;
            }

            let batch = match self
                .messaging
                .receive_messages::<serde_json::Value>(
                    &self.config.queue,
                    free,
                    self.config.visibility_timeout,
                )
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(error = %e, "receive failed");
                    Vec::new()
                }
            };

            if batch.is_empty() {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
                continue;
            }

            for raw in batch {
                self.stats.received.fetch_add(1, Ordering::Relaxed);
                let permit = Arc::clone(&self.permits)
                    .acquire_owned()
                    .await
                    .map_err(|_| FetchflowError::Internal("consumer semaphore closed".to_string()))?;
                let consumer = Arc::clone(&self);
                tasks.spawn(async move {
                    consumer.settle(raw).await;
                    drop(permit);
                });
            }
        }

        info!(in_flight = tasks.len(), "consumer draining");
        while let Some(joined) = tasks.join_next().await {
            report_panic(joined);
        }
        info!("consumer stopped");
        Ok(())
    }

    async fn settle(&self, raw: QueuedMessage<serde_json::Value>) {
        let receipt = raw.receipt_handle.clone();
        let envelope: RequestEnvelope<H::Request> = match serde_json::from_value(raw.message) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(receipt = %receipt, error = %e, "dropping malformed message");
                self.stats.malformed.fetch_add(1, Ordering::Relaxed);
                self.ack(&receipt).await;
                return;
            }
        };

        let correlation_id = envelope.correlation_id;
        let reply_to = envelope.reply_to.clone();

        let handling = self.handler.handle(envelope.body);
        tokio::pin!(handling);
        let period = self.config.heartbeat_interval();
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        let outcome = loop {
            tokio::select! {
                outcome = &mut handling => break outcome,
                _ = heartbeat.tick() => self.keep_invisible(&receipt).await,
            }
        };

        let delivered = match outcome {
            Ok(Some(reply)) => match &reply_to {
                Some(reply_to) => {
                    let reply = crate::messaging::ReplyEnvelope {
                        correlation_id,
                        sent_at: chrono::Utc::now(),
                        body: reply,
                    };
                    match self.messaging.send_message(reply_to, &reply).await {
                        Ok(_) => {
                            self.stats.replies.fetch_add(1, Ordering::Relaxed);
                            true
                        }
                        Err(e) => {
                            warn!(%correlation_id, error = %e, "reply publish failed");
                            false
                        }
                    }
                }
                None => true,
            },
            Ok(None) => true,
            Err(e) => {
                warn!(%correlation_id, redelivery = raw.receive_count, error = %e, "handler failed");
                false
            }
        };

        if delivered {
            self.ack(&receipt).await;
        } else {
            self.requeue(&receipt).await;
        }
    }

    async fn keep_invisible(&self, receipt: &ReceiptHandle) {
        match self
            .messaging
            .extend_visibility(&self.config.queue, receipt, self.config.visibility_timeout)
            .await
        {
            Ok(()) => {
                self.stats.extensions.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => warn!(receipt = %receipt, error = %e, "visibility extension failed"),
        }
    }

    async fn ack(&self, receipt: &ReceiptHandle) {
        match self.messaging.ack_message(&self.config.queue, receipt).await {
            Ok(()) => {
                self.stats.acked.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => error!(receipt = %receipt, error = %e, "ack failed"),
        }
    }

    async fn requeue(&self, receipt: &ReceiptHandle) {
        match self
            .messaging
            .nack_message(&self.config.queue, receipt, true)
            .await
        {
            Ok(()) => {
                self.stats.requeued.fetch_add(1, Ordering::Relaxed);
                debug!(receipt = %receipt, "message requeued");
            }
            Err(e) => error!(receipt = %receipt, error = %e, "nack failed"),
        }
    }
}

fn report_panic(joined: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!(error = %e, "message task panicked");
    }
}

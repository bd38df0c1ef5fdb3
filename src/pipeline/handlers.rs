//! Handlers for the three stage queues.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, instrument};

use super::{FinalizeMessage, MessageHandler};
use crate::constants::priority;
use crate::error::Result;
use crate::fan_in::FanInSynchronizer;
use crate::logging::log_fetch_operation;
use crate::messaging::{publish_task, MessagingProvider};
use crate::models::{FetchRequest, FetchResponse};
use crate::orchestration::{CacheFirstOrchestrator, RecordFinalizer};

/// Request/reply transaction fetches. Upstream failure is an error reply;
/// only failed dependency dispatch fails the message, so it is redelivered
/// and dispatch resumes from the cache hit.
#[derive(Debug)]
pub struct TransactionRequestHandler {
    orchestrator: Arc<CacheFirstOrchestrator>,
}

impl TransactionRequestHandler {
    pub fn new(orchestrator: Arc<CacheFirstOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl MessageHandler for TransactionRequestHandler {
    type Request = FetchRequest;
    type Reply = FetchResponse;

    fn stage(&self) -> &'static str {
        "transactions"
    }

    async fn handle(&self, request: FetchRequest) -> Result<Option<FetchResponse>> {
        self.orchestrator.process_with_follow_up(&request).await.map(Some)
    }
}

/// Token fetches. Sub-fetches report to their parent's fan-in counter and
/// publish finalize when they release it.
///
/// A lookup failure still counts as a completion, so one unresolvable mint
/// cannot hold its parent forever.
#[derive(Debug)]
pub struct TokenTaskHandler {
    orchestrator: Arc<CacheFirstOrchestrator>,
    fan_in: Arc<dyn FanInSynchronizer>,
    messaging: Arc<MessagingProvider>,
    finalize_queue: String,
}

impl TokenTaskHandler {
    pub fn new(
        orchestrator: Arc<CacheFirstOrchestrator>,
        fan_in: Arc<dyn FanInSynchronizer>,
        messaging: Arc<MessagingProvider>,
        finalize_queue: impl Into<String>,
    ) -> Self {
        Self {
            orchestrator,
            fan_in,
            messaging,
            finalize_queue: finalize_queue.into(),
        }
    }
}

#[async_trait]
impl MessageHandler for TokenTaskHandler {
    type Request = FetchRequest;
    type Reply = FetchResponse;

    fn stage(&self) -> &'static str {
        "tokens"
    }

    #[instrument(skip(self, request), fields(key = %request.key))]
    async fn handle(&self, request: FetchRequest) -> Result<Option<FetchResponse>> {
        let response = self.orchestrator.process(&request).await;

        if let Some(parent) = &request.parent_key {
            let status = self.fan_in.complete(parent).await?;
            debug!(parent = %parent, status = %status, "sub-fetch reported");
            if status.should_trigger() {
                publish_task(
                    &self.messaging,
                    &self.finalize_queue,
                    FinalizeMessage::new(parent.clone()),
                    priority::DEFAULT,
                )
                .await?;
                log_fetch_operation(
                    self.stage(),
                    parent.as_str(),
                    "finalize_published",
                    None,
                    Some(&status.to_string()),
                );
            }
        }

        Ok(Some(response))
    }
}

#[derive(Debug)]
pub struct FinalizeTaskHandler {
    finalizer: Arc<dyn RecordFinalizer>,
}

impl FinalizeTaskHandler {
    pub fn new(finalizer: Arc<dyn RecordFinalizer>) -> Self {
        Self { finalizer }
    }
}

#[async_trait]
impl MessageHandler for FinalizeTaskHandler {
    type Request = FinalizeMessage;
    type Reply = ();

    fn stage(&self) -> &'static str {
        "finalize"
    }

    async fn handle(&self, message: FinalizeMessage) -> Result<Option<()>> {
        self.finalizer.finalize(&message.key).await?;
        Ok(None)
    }
}

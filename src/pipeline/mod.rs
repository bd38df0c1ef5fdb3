//! # Pipeline Stages
//!
//! Typed stages connected by queues. Every stage assumes at-least-once
//! delivery: a message is acked only after its handler and any reply
//! publish have finished, so a crash means redelivery, never loss.
//!
//! | queue | kind | input | output |
//! |---|---|---|---|
//! | `transactions.fetch` | request/reply | `FetchRequest` | one `FetchResponse`; N × `tokens.fetch` tasks, or one `transactions.finalize` when N = 0 |
//! | `tokens.fetch` | task (reply if asked) | `FetchRequest` with `parent_key` | one `transactions.finalize` when the parent's fan-in is satisfied |
//! | `transactions.finalize` | task | `FinalizeMessage` | none; classification and party records (idempotent) |

pub mod consumer;
pub mod handlers;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

pub use consumer::{ConsumerConfig, ConsumerStats, QueueConsumer};
pub use handlers::{FinalizeTaskHandler, TokenTaskHandler, TransactionRequestHandler};

use crate::error::Result;
use crate::models::ResourceKey;

/// Input of the finalize stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeMessage {
    pub key: ResourceKey,
}

impl FinalizeMessage {
    pub fn new(key: ResourceKey) -> Self {
        Self { key }
    }
}

/// Processing for one stage queue.
///
/// Returning `Err` makes the consumer requeue the message. A returned reply
/// is published only when the request carried a reply address.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    type Request: Serialize + DeserializeOwned + Send + Sync + 'static;
    type Reply: Serialize + DeserializeOwned + Send + Sync + 'static;

    fn stage(&self) -> &'static str;

    async fn handle(&self, request: Self::Request) -> Result<Option<Self::Reply>>;
}

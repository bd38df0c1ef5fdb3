//! # Messaging
//!
//! Broker abstraction connecting the pipeline stages. Two providers are
//! available: an in-memory broker with priority delivery, and PostgreSQL
//! `pgmq`. Stages exchange `RequestEnvelope`s; request/reply callers use
//! `RpcClient`, fire-and-forget dispatch uses `publish_task`.

pub mod envelope;
pub mod errors;
pub mod provider;
pub mod providers;
pub mod rpc;
pub mod service;
pub mod types;

pub use envelope::{ReplyEnvelope, RequestEnvelope};
pub use errors::MessagingError;
pub use provider::MessagingProvider;
pub use providers::{InMemoryMessagingService, PgmqMessagingService};
pub use rpc::{publish_task, RpcClient};
pub use service::{MessagingService, QueueMessage};
pub use types::{MessageId, QueueCheck, QueueStats, QueuedMessage, ReceiptHandle};

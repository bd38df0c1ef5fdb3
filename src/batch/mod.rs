//! # Batch Request Lifecycle
//!
//! A credentialed batch of keys is staged, driven through the cache-first
//! orchestrator one item at a time, finalized per item and reported with a
//! terminal state. The lifecycle is the only writer of a batch's state.

pub mod credentials;
pub mod lifecycle;
pub mod repository;
pub mod state;

pub use credentials::{CredentialValidator, PgCredentialValidator, StaticCredentials};
pub use lifecycle::{BatchLifecycle, BatchReport, BatchSubmission, ItemError};
pub use repository::{
    BatchProgress, BatchRepository, BatchRequest, InMemoryBatchRepository, PgBatchRepository,
    QueueItem,
};
pub use state::BatchState;

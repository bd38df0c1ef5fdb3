//! # Orchestration
//!
//! Per-kind request processing: cache check, network acquisition through
//! the rate-limited fetcher and fallback chain, persistence, dependency
//! dispatch and downstream finalization.

pub mod acquirers;
pub mod cache_first;
pub mod dependencies;
pub mod finalize;

pub use acquirers::{
    Acquisition, FailureReason, ResourceAcquirer, TokenAcquirer, TransactionAcquirer,
};
pub use cache_first::{CacheFirstOrchestrator, FetchFollowUp, RequestPhase};
pub use dependencies::{DependencyDispatcher, DispatchSummary};
pub use finalize::{
    transaction_parties, FinalizeOutcome, InMemoryPartyRecorder, PartyRecorder, RecordFinalizer,
    TransactionFinalizer,
};

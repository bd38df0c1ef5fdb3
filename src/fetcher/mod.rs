//! # Rate-Limited Fetcher
//!
//! Two-level retry around the [`EndpointPool`](crate::endpoint::EndpointPool):
//! exponential backoff against one endpoint, then sequential fallback to the
//! next endpoint. Upstream failures are returned as [`FetchOutcome`] values
//! and never as errors.

pub mod backoff;
pub mod outcome;
pub mod rate_limited;
pub mod source;

pub use backoff::BackoffPolicy;
pub use outcome::{FetchOutcome, OutcomeKind};
pub use rate_limited::{AttemptRecord, EndpointFetch, FallbackFetch, FetchTrace, RateLimitedFetcher};
pub use source::{NetworkSource, SourceOperation, SourceRequest};

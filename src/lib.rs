#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Fetchflow Core
//!
//! Cache-first, rate-limited fetch orchestration for blockchain transaction
//! and token records.
//!
//! ## Overview
//!
//! Requests arrive on broker queues. A consumer consults the local store and
//! either answers from cache or fetches through a pool of rate-limited
//! upstream endpoints, with exponential backoff per endpoint and fallback
//! across endpoints. Tokens the primary source cannot name go through a
//! fallback resolution chain. Every token a freshly fetched transaction
//! references is fetched by its own fire-and-forget sub-task, and a fan-in
//! counter releases the transaction's finalization once all of them report.
//!
//! ## Module Organization
//!
//! - [`endpoint`] - Endpoint pool: per-endpoint concurrency, pacing, health
//! - [`fetcher`] - Rate-limited fetcher with backoff and endpoint fallback
//! - [`providers`] - JSON-RPC and metadata API sources over `reqwest`
//! - [`fallback`] - Fallback resolution chain for placeholder tokens
//! - [`store`] - Record persistence (PostgreSQL and in-memory)
//! - [`fan_in`] - Fan-in synchronizer for dependent sub-fetches
//! - [`orchestration`] - Cache-first orchestrator, dependency dispatch, finalization
//! - [`messaging`] - Broker abstraction (pgmq and in-memory)
//! - [`pipeline`] - Typed stage handlers and the prefetch-bounded consumer
//! - [`batch`] - Credentialed batch request lifecycle
//! - [`runtime`] - Wiring from configuration to running consumers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fetchflow_core::config::ConfigLoader;
//! use fetchflow_core::runtime::{Collaborators, FetchflowRuntime, WorkerRole};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::load()?;
//! let runtime = FetchflowRuntime::bootstrap(config, Collaborators::default()).await?;
//! let handle = runtime.start(WorkerRole::All)?;
//! // ...
//! handle.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod classifier;
pub mod config;
pub mod constants;
pub mod database;
pub mod endpoint;
pub mod error;
pub mod fallback;
pub mod fan_in;
pub mod fetcher;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod orchestration;
pub mod pipeline;
pub mod providers;
pub mod resilience;
pub mod runtime;
pub mod store;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_helpers;

pub use config::FetchflowConfig;
pub use error::{FetchflowError, Result};
pub use models::{FetchRequest, FetchResponse, ResourceKey, ResourceKind};

//! # Fan-In Synchronizer
//!
//! Tracks how many dependent sub-fetches a parent still waits for and
//! releases the downstream action exactly once.
//!
//! `complete` decrements, checks for zero and deletes in one atomic step.
//! Completing a key with no pending counter (never registered, or already
//! satisfied and removed) is reported as [`FanInStatus::Untracked`], which
//! callers treat like `Satisfied`. That keeps redelivered completions and
//! zero-dependency parents safe without extra bookkeeping.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use memory::InMemoryFanIn;
pub use postgres::PgFanIn;

use crate::error::Result;
use crate::models::ResourceKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "remaining", rename_all = "snake_case")]
pub enum FanInStatus {
    /// Still waiting on this many completions
    StillPending(u32),
    /// This call brought the counter to zero and removed it
    Satisfied,
    /// No counter exists for the key
    Untracked,
}

impl FanInStatus {
    /// Whether the caller should fire the downstream action
    pub fn should_trigger(self) -> bool {
        matches!(self, Self::Satisfied | Self::Untracked)
    }
}

impl fmt::Display for FanInStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StillPending(n) => write!(f, "still_pending({n})"),
            Self::Satisfied => write!(f, "satisfied"),
            Self::Untracked => write!(f, "untracked"),
        }
    }
}

#[async_trait]
pub trait FanInSynchronizer: Send + Sync + fmt::Debug {
    /// Create the counter for `parent` or add `count` to an existing one
    async fn register(&self, parent: &ResourceKey, count: u32) -> Result<()>;

    /// Atomically decrement; delete and report `Satisfied` at zero
    async fn complete(&self, parent: &ResourceKey) -> Result<FanInStatus>;

    /// Current remaining count, `None` when untracked
    async fn pending(&self, parent: &ResourceKey) -> Result<Option<u32>>;
}

//! # Endpoint Pool
//!
//! The only path to the network. Each configured endpoint carries its own
//! concurrency limit, minimum inter-request interval and circuit breaker;
//! none of that state is shared across endpoints.

pub mod pool;
pub mod state;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use pool::{EndpointHealth, EndpointPermit, EndpointPool};
pub use state::EndpointState;

/// What an endpoint can answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    /// JSON-RPC node: transactions, assets, signature history
    PrimaryRpc,
    /// Secondary token metadata REST API
    MetadataApi,
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PrimaryRpc => write!(f, "primary_rpc"),
            Self::MetadataApi => write!(f, "metadata_api"),
        }
    }
}

/// Index of an endpoint within its pool, in configured order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(pub(crate) usize);

impl EndpointId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

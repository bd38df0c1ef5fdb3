//! # Network Sources
//!
//! Concrete [`NetworkSource`] implementations over `reqwest`, plus the typed
//! representations their payloads are validated into.

pub mod http;
pub mod json_rpc;
pub mod metadata_api;
pub mod types;

use async_trait::async_trait;
use std::time::Duration;

pub use json_rpc::JsonRpcSource;
pub use metadata_api::MetadataApiSource;

use crate::endpoint::{EndpointKind, EndpointState};
use crate::error::Result;
use crate::fetcher::{FetchOutcome, NetworkSource, SourceRequest};

/// Dispatches to the source that speaks the endpoint's protocol
#[derive(Debug, Clone)]
pub struct RoutedSource {
    rpc: JsonRpcSource,
    metadata: MetadataApiSource,
}

impl RoutedSource {
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = http::build_client(request_timeout)?;
        Ok(Self {
            rpc: JsonRpcSource::new(client.clone()),
            metadata: MetadataApiSource::new(client),
        })
    }
}

#[async_trait]
impl NetworkSource for RoutedSource {
    async fn fetch(&self, endpoint: &EndpointState, request: &SourceRequest) -> FetchOutcome {
        match endpoint.kind {
            EndpointKind::PrimaryRpc => self.rpc.fetch(endpoint, request).await,
            EndpointKind::MetadataApi => self.metadata.fetch(endpoint, request).await,
        }
    }

    fn name(&self) -> &str {
        "routed"
    }
}

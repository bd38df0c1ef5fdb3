use async_trait::async_trait;
use std::fmt;

use super::FetchOutcome;
use crate::endpoint::{EndpointKind, EndpointState};
use crate::models::ResourceKey;

/// What is being asked of an upstream source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceOperation {
    /// Full transaction by signature
    Transaction,
    /// Token asset (name, symbol, decimals) by mint from the primary node
    TokenAsset,
    /// Token metadata by mint from the secondary metadata API
    TokenMetadata,
    /// Oldest transaction signature touching an address
    CreationSignature,
}

impl SourceOperation {
    pub fn endpoint_kind(self) -> EndpointKind {
        match self {
            Self::TokenMetadata => EndpointKind::MetadataApi,
            _ => EndpointKind::PrimaryRpc,
        }
    }
}

impl fmt::Display for SourceOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transaction => write!(f, "transaction"),
            Self::TokenAsset => write!(f, "token_asset"),
            Self::TokenMetadata => write!(f, "token_metadata"),
            Self::CreationSignature => write!(f, "creation_signature"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceRequest {
    pub operation: SourceOperation,
    pub key: ResourceKey,
}

impl SourceRequest {
    pub fn new(operation: SourceOperation, key: impl Into<ResourceKey>) -> Self {
        Self {
            operation,
            key: key.into(),
        }
    }

    pub fn endpoint_kind(&self) -> EndpointKind {
        self.operation.endpoint_kind()
    }
}

/// One network call against one endpoint, classified.
///
/// Implementations must not retry; the fetcher owns retry and fallback.
#[async_trait]
pub trait NetworkSource: Send + Sync {
    async fn fetch(&self, endpoint: &EndpointState, request: &SourceRequest) -> FetchOutcome;

    fn name(&self) -> &str {
        "network"
    }
}

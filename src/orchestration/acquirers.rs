//! Network acquisition per resource kind.
//!
//! An acquirer turns a cache miss into either a document worth persisting
//! or a terminal failure. Transport problems are absorbed below this layer
//! by the rate-limited fetcher; what reaches here is already final.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::fallback::{ChainOutcome, FallbackChain};
use crate::fetcher::{FetchOutcome, RateLimitedFetcher, SourceOperation, SourceRequest};
use crate::models::{Document, Provenance, ResourceKey, ResourceKind, TokenRecord};

#[derive(Debug, Clone, PartialEq)]
pub enum FailureReason {
    /// Every endpoint reported the resource absent
    NotFound,
    /// The fallback chain ran out of resolvers
    Unresolved,
    /// Endpoints kept failing after retries and fallback
    Transport(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not found on any endpoint"),
            Self::Unresolved => write!(f, "unresolved after all fallback resolvers"),
            Self::Transport(detail) => write!(f, "upstream unavailable: {detail}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Acquisition {
    Acquired {
        document: Document,
        provenance: Provenance,
    },
    Failed(FailureReason),
}

#[async_trait]
pub trait ResourceAcquirer: Send + Sync + fmt::Debug {
    fn kind(&self) -> ResourceKind;

    async fn acquire(&self, key: &ResourceKey) -> Acquisition;
}

fn failure(outcome: FetchOutcome) -> FailureReason {
    match outcome {
        FetchOutcome::NotFound => FailureReason::NotFound,
        FetchOutcome::RateLimited { .. } => FailureReason::Transport("rate limited".to_string()),
        FetchOutcome::TransportError(detail) => FailureReason::Transport(detail),
        FetchOutcome::Found { .. } => FailureReason::Transport("unexpected found".to_string()),
    }
}

/// `getTransaction` against the primary endpoints
#[derive(Debug)]
pub struct TransactionAcquirer {
    fetcher: Arc<RateLimitedFetcher>,
}

impl TransactionAcquirer {
    pub fn new(fetcher: Arc<RateLimitedFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl ResourceAcquirer for TransactionAcquirer {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Transaction
    }

    async fn acquire(&self, key: &ResourceKey) -> Acquisition {
        let request = SourceRequest::new(SourceOperation::Transaction, key.clone());
        let fetched = self.fetcher.fetch_with_fallback(&request).await;
        debug!(
            key = %key,
            failed_attempts = fetched.trace.failed_attempts(),
            outcome = %fetched.outcome.kind(),
            "transaction fetch finished"
        );
        match fetched.outcome {
            FetchOutcome::Found {
                payload,
                provenance,
            } => Acquisition::Acquired {
                document: payload,
                provenance,
            },
            other => Acquisition::Failed(failure(other)),
        }
    }
}

/// Primary `getAsset`, then the fallback chain when the primary answer is
/// missing or only a placeholder
#[derive(Debug)]
pub struct TokenAcquirer {
    fetcher: Arc<RateLimitedFetcher>,
    chain: Arc<FallbackChain>,
}

impl TokenAcquirer {
    pub fn new(fetcher: Arc<RateLimitedFetcher>, chain: Arc<FallbackChain>) -> Self {
        Self { fetcher, chain }
    }

    async fn primary(&self, key: &ResourceKey) -> Option<(TokenRecord, Provenance)> {
        let request = SourceRequest::new(SourceOperation::TokenAsset, key.clone());
        match self.fetcher.fetch_with_fallback(&request).await.outcome {
            FetchOutcome::Found {
                payload,
                provenance,
            } => match TokenRecord::from_document(&payload) {
                Ok(record) if !self.chain.detector().needs_resolution(&record) => {
                    Some((record, provenance))
                }
                Ok(record) => {
                    debug!(key = %key, name = ?record.name, "primary asset is a placeholder");
                    None
                }
                Err(e) => {
                    debug!(key = %key, error = %e, "primary asset unreadable");
                    None
                }
            },
            other => {
                debug!(key = %key, outcome = %other.kind(), "primary asset lookup failed");
                None
            }
        }
    }
}

#[async_trait]
impl ResourceAcquirer for TokenAcquirer {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Token
    }

    async fn acquire(&self, key: &ResourceKey) -> Acquisition {
        if let Some((record, provenance)) = self.primary(key).await {
            return Acquisition::Acquired {
                document: record.to_document(),
                provenance,
            };
        }

        match self.chain.resolve(key).await {
            ChainOutcome::Resolved {
                record, provenance, ..
            } => {
                info!(key = %key, resolver = ?provenance.resolver, "token resolved by fallback chain");
                Acquisition::Acquired {
                    document: record.to_document(),
                    provenance,
                }
            }
            ChainOutcome::Unresolved { attempts } => {
                debug!(key = %key, attempts = attempts.len(), "token unresolved");
                Acquisition::Failed(FailureReason::Unresolved)
            }
        }
    }
}

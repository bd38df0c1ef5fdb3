use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::resolvers::{
    CacheResolver, DerivedLookupResolver, DirectLookupResolver, Resolver, ResolverResult,
};
use super::PlaceholderDetector;
use crate::fetcher::RateLimitedFetcher;
use crate::models::{Provenance, ResolverTag, ResourceKey, TokenRecord};
use crate::store::RecordStore;

#[derive(Debug, Clone, PartialEq)]
pub enum AttemptResult {
    Usable,
    /// Resolver answered with a generic placeholder name
    Placeholder,
    Empty(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolverAttempt {
    pub resolver: ResolverTag,
    pub result: AttemptResult,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChainOutcome {
    Resolved {
        record: TokenRecord,
        provenance: Provenance,
        attempts: Vec<ResolverAttempt>,
    },
    /// Every resolver came back empty or with a placeholder
    Unresolved { attempts: Vec<ResolverAttempt> },
}

impl ChainOutcome {
    pub fn attempts(&self) -> &[ResolverAttempt] {
        match self {
            Self::Resolved { attempts, .. } | Self::Unresolved { attempts } => attempts,
        }
    }

    pub fn resolver(&self) -> Option<ResolverTag> {
        match self {
            Self::Resolved { provenance, .. } => provenance.resolver,
            Self::Unresolved { .. } => None,
        }
    }
}

/// Ordered resolvers tried until one produces a usable (non-placeholder)
/// token record
pub struct FallbackChain {
    resolvers: Vec<Arc<dyn Resolver>>,
    detector: PlaceholderDetector,
}

impl std::fmt::Debug for FallbackChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tags: Vec<ResolverTag> = self.resolvers.iter().map(|r| r.tag()).collect();
        f.debug_struct("FallbackChain")
            .field("resolvers", &tags)
            .finish()
    }
}

impl FallbackChain {
    pub fn new(resolvers: Vec<Arc<dyn Resolver>>, detector: PlaceholderDetector) -> Self {
        Self {
            resolvers,
            detector,
        }
    }

    /// Cache, then direct lookup, then derived lookup
    pub fn standard(
        store: Arc<dyn RecordStore>,
        fetcher: Arc<RateLimitedFetcher>,
        detector: PlaceholderDetector,
    ) -> Self {
        Self::new(
            vec![
                Arc::new(CacheResolver::new(store)),
                Arc::new(DirectLookupResolver::new(Arc::clone(&fetcher))),
                Arc::new(DerivedLookupResolver::new(fetcher)),
            ],
            detector,
        )
    }

    pub fn detector(&self) -> &PlaceholderDetector {
        &self.detector
    }

    #[instrument(skip(self), fields(key = %key))]
    pub async fn resolve(&self, key: &ResourceKey) -> ChainOutcome {
        let mut attempts = Vec::with_capacity(self.resolvers.len());

        for resolver in &self.resolvers {
            let tag = resolver.tag();
            match resolver.resolve(key).await {
                ResolverResult::Resolved { record, provenance } => {
                    if self.detector.needs_resolution(&record) {
                        debug!(resolver = %tag, name = ?record.name, "resolver returned placeholder");
                        attempts.push(ResolverAttempt {
                            resolver: tag,
                            result: AttemptResult::Placeholder,
                        });
                        continue;
                    }
                    attempts.push(ResolverAttempt {
                        resolver: tag,
                        result: AttemptResult::Usable,
                    });
                    info!(resolver = %tag, attempts = attempts.len(), "fallback chain resolved");
                    return ChainOutcome::Resolved {
                        record,
                        provenance: provenance.with_resolver(tag),
                        attempts,
                    };
                }
                ResolverResult::Empty { reason } => {
                    debug!(resolver = %tag, %reason, "resolver empty");
                    attempts.push(ResolverAttempt {
                        resolver: tag,
                        result: AttemptResult::Empty(reason),
                    });
                }
            }
        }

        info!(attempts = attempts.len(), "fallback chain unresolved");
        ChainOutcome::Unresolved { attempts }
    }
}

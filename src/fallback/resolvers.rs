use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::constants::{programs, WRAPPED_SOL_MINT};
use crate::fetcher::{FetchOutcome, RateLimitedFetcher, SourceOperation, SourceRequest};
use crate::models::{FieldMask, Provenance, ResolverTag, ResourceKey, TokenRecord, TransactionRecord};
use crate::store::RecordStore;

#[derive(Debug, Clone, PartialEq)]
pub enum ResolverResult {
    Resolved {
        record: TokenRecord,
        provenance: Provenance,
    },
    Empty {
        reason: String,
    },
}

impl ResolverResult {
    pub fn empty(reason: impl Into<String>) -> Self {
        Self::Empty {
            reason: reason.into(),
        }
    }
}

/// One step of the fallback chain. A failing resolver returns `Empty`; it
/// never aborts the chain.
#[async_trait]
pub trait Resolver: Send + Sync {
    fn tag(&self) -> ResolverTag;

    async fn resolve(&self, key: &ResourceKey) -> ResolverResult;
}

/// Local cache lookup by key
#[derive(Debug)]
pub struct CacheResolver {
    store: Arc<dyn RecordStore>,
}

impl CacheResolver {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Resolver for CacheResolver {
    fn tag(&self) -> ResolverTag {
        ResolverTag::LocalCache
    }

    async fn resolve(&self, key: &ResourceKey) -> ResolverResult {
        match self.store.get_by_key(key, FieldMask::CORE).await {
            Ok(Some(stored)) => match TokenRecord::from_document(&stored.document) {
                Ok(record) => ResolverResult::Resolved {
                    record,
                    provenance: stored.provenance(),
                },
                Err(e) => ResolverResult::empty(format!("cached document unreadable: {e}")),
            },
            Ok(None) => ResolverResult::empty("not cached"),
            Err(e) => ResolverResult::empty(e.to_string()),
        }
    }
}

async fn lookup_metadata(
    fetcher: &RateLimitedFetcher,
    key: &ResourceKey,
) -> Result<(TokenRecord, Provenance), String> {
    let request = SourceRequest::new(SourceOperation::TokenMetadata, key.clone());
    match fetcher.fetch_with_fallback(&request).await.outcome {
        FetchOutcome::Found {
            payload,
            provenance,
        } => TokenRecord::from_document(&payload)
            .map(|record| (record, provenance))
            .map_err(|e| format!("unreadable metadata: {e}")),
        other => Err(format!("metadata lookup {}", other.kind())),
    }
}

/// Secondary metadata API lookup by key
#[derive(Debug)]
pub struct DirectLookupResolver {
    fetcher: Arc<RateLimitedFetcher>,
}

impl DirectLookupResolver {
    pub fn new(fetcher: Arc<RateLimitedFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl Resolver for DirectLookupResolver {
    fn tag(&self) -> ResolverTag {
        ResolverTag::DirectLookup
    }

    async fn resolve(&self, key: &ResourceKey) -> ResolverResult {
        match lookup_metadata(&self.fetcher, key).await {
            Ok((record, provenance)) => ResolverResult::Resolved {
                record,
                provenance: provenance.with_resolver(ResolverTag::DirectLookup),
            },
            Err(reason) => ResolverResult::empty(reason),
        }
    }
}

/// Finds the transaction that created the entity, takes the other mint it
/// touched as the correlated key, and looks that key up directly.
#[derive(Debug)]
pub struct DerivedLookupResolver {
    fetcher: Arc<RateLimitedFetcher>,
}

impl DerivedLookupResolver {
    pub fn new(fetcher: Arc<RateLimitedFetcher>) -> Self {
        Self { fetcher }
    }

    async fn creation_transaction(&self, key: &ResourceKey) -> Result<TransactionRecord, String> {
        let request = SourceRequest::new(SourceOperation::CreationSignature, key.clone());
        let signature = match self.fetcher.fetch_with_fallback(&request).await.outcome {
            FetchOutcome::Found { payload, .. } => payload
                .get("signature")
                .and_then(|s| s.as_str())
                .map(ResourceKey::from)
                .ok_or_else(|| "creation lookup returned no signature".to_string())?,
            other => return Err(format!("creation lookup {}", other.kind())),
        };

        let request = SourceRequest::new(SourceOperation::Transaction, signature);
        match self.fetcher.fetch_with_fallback(&request).await.outcome {
            FetchOutcome::Found { payload, .. } => TransactionRecord::from_document(&payload)
                .map_err(|e| format!("unreadable creation transaction: {e}")),
            other => Err(format!("creation transaction {}", other.kind())),
        }
    }
}

/// The first mint touched by the creation event other than the entity itself
pub fn correlated_key(key: &ResourceKey, creation: &TransactionRecord) -> Option<ResourceKey> {
    creation
        .token_balances
        .iter()
        .map(|b| b.mint.as_str())
        .find(|mint| {
            *mint != key.as_str() && *mint != WRAPPED_SOL_MINT && !programs::is_well_known(mint)
        })
        .map(ResourceKey::from)
}

#[async_trait]
impl Resolver for DerivedLookupResolver {
    fn tag(&self) -> ResolverTag {
        ResolverTag::DerivedLookup
    }

    async fn resolve(&self, key: &ResourceKey) -> ResolverResult {
        let creation = match self.creation_transaction(key).await {
            Ok(creation) => creation,
            Err(reason) => return ResolverResult::empty(reason),
        };
        let Some(derived) = correlated_key(key, &creation) else {
            return ResolverResult::empty("creation event has no correlated mint");
        };
        debug!(key = %key, derived = %derived, creation = %creation.signature, "derived lookup key");

        match lookup_metadata(&self.fetcher, &derived).await {
            Ok((derived_record, provenance)) => ResolverResult::Resolved {
                record: TokenRecord {
                    mint: key.as_str().to_string(),
                    ..derived_record
                },
                provenance: provenance
                    .with_resolver(ResolverTag::DerivedLookup)
                    .with_derived_from(derived),
            },
            Err(reason) => ResolverResult::empty(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TokenBalanceDelta;

    fn balance(mint: &str) -> TokenBalanceDelta {
        TokenBalanceDelta {
            mint: mint.to_string(),
            owner: None,
            pre_amount: 0.0,
            post_amount: 1.0,
        }
    }

    #[test]
    fn test_correlated_key_skips_self_and_wrapped_sol() {
        let creation = TransactionRecord {
            signature: "create".to_string(),
            slot: 1,
            block_time: None,
            fee: 0,
            success: true,
            account_keys: vec![],
            instructions: vec![],
            token_balances: vec![balance("lpMint"), balance(WRAPPED_SOL_MINT), balance("baseMint")],
        };
        assert_eq!(
            correlated_key(&ResourceKey::from("lpMint"), &creation),
            Some(ResourceKey::from("baseMint"))
        );
        assert_eq!(
            correlated_key(
                &ResourceKey::from("lpMint"),
                &TransactionRecord {
                    token_balances: vec![balance("lpMint")],
                    ..creation
                }
            ),
            None
        );
    }
}

//! Token acquisition through the primary lookup and the fallback chain,
//! with real endpoint fallback underneath.

mod common;

use std::sync::Arc;

use fetchflow_core::config::FallbackConfig;
use fetchflow_core::constants::WRAPPED_SOL_MINT;
use fetchflow_core::fallback::{FallbackChain, PlaceholderDetector};
use fetchflow_core::fetcher::{FetchOutcome, SourceOperation};
use fetchflow_core::models::{
    FetchRequest, ResolverTag, ResourceKey, ResourceKind, ResponseSource, TokenRecord,
};
use fetchflow_core::orchestration::{CacheFirstOrchestrator, TokenAcquirer};
use fetchflow_core::store::{InMemoryRecordStore, RecordStore};
use fetchflow_core::test_helpers::{
    default_endpoints, fast_backoff, fetcher_with, found_token, found_transaction, named_token,
    sample_transaction, ScriptedSource,
};
use serde_json::json;

fn token_orchestrator(source: Arc<ScriptedSource>) -> (CacheFirstOrchestrator, Arc<dyn RecordStore>) {
    common::init_tracing();
    let store: Arc<dyn RecordStore> = Arc::new(InMemoryRecordStore::new(ResourceKind::Token));
    let fetcher = fetcher_with(&default_endpoints(), source, fast_backoff());
    let chain = Arc::new(FallbackChain::standard(
        Arc::clone(&store),
        Arc::clone(&fetcher),
        PlaceholderDetector::from_config(&FallbackConfig::default()),
    ));
    let orchestrator = CacheFirstOrchestrator::new(
        Arc::clone(&store),
        Arc::new(TokenAcquirer::new(fetcher, chain)),
    );
    (orchestrator, store)
}

#[tokio::test]
async fn test_placeholder_resolved_through_creation_event() {
    let source = Arc::new(
        ScriptedSource::new()
            .respond(
                SourceOperation::TokenAsset,
                "lpMint",
                found_token(&named_token("lpMint", "Unnamed LP", "")),
            )
            .respond(
                SourceOperation::CreationSignature,
                "lpMint",
                FetchOutcome::found(json!({ "signature": "create-sig" })),
            )
            .respond(
                SourceOperation::Transaction,
                "create-sig",
                found_transaction(&sample_transaction(
                    "create-sig",
                    &["lpMint", WRAPPED_SOL_MINT, "baseMint"],
                )),
            )
            .respond(
                SourceOperation::TokenMetadata,
                "baseMint",
                found_token(&named_token("baseMint", "Base", "BSE")),
            ),
    );
    let (orchestrator, store) = token_orchestrator(Arc::clone(&source));

    let response = orchestrator.process(&FetchRequest::new("lpMint")).await;

    assert!(response.success);
    assert_eq!(response.source, ResponseSource::Network);
    let provenance = response.provenance.unwrap();
    assert_eq!(provenance.resolver, Some(ResolverTag::DerivedLookup));
    assert_eq!(provenance.derived_from, Some(ResourceKey::from("baseMint")));

    let record = TokenRecord::from_document(&response.payload.unwrap()).unwrap();
    assert_eq!(record.mint, "lpMint");
    assert_eq!(record.name.as_deref(), Some("Base"));
    assert!(store.exists(&ResourceKey::from("lpMint")).await.unwrap());
}

#[tokio::test]
async fn test_primary_outage_falls_through_to_metadata_api() {
    let outage = vec![FetchOutcome::transport("connection reset")];
    let source = Arc::new(
        ScriptedSource::new()
            .script_endpoint("rpc-1", outage.clone())
            .script_endpoint("rpc-2", outage)
            .respond(
                SourceOperation::TokenMetadata,
                "mintX",
                found_token(&named_token("mintX", "Ex", "EX")),
            ),
    );
    let (orchestrator, _store) = token_orchestrator(Arc::clone(&source));

    let response = orchestrator.process(&FetchRequest::new("mintX")).await;

    assert!(response.success);
    assert_eq!(
        response.provenance.and_then(|p| p.resolver),
        Some(ResolverTag::DirectLookup)
    );
    let mut asset_endpoints: Vec<String> = source
        .calls()
        .into_iter()
        .filter(|c| c.operation == SourceOperation::TokenAsset)
        .map(|c| c.endpoint)
        .collect();
    asset_endpoints.sort();
    assert_eq!(asset_endpoints, vec!["rpc-1".to_string(), "rpc-2".to_string()]);
}

#[tokio::test]
async fn test_unresolvable_placeholder_is_not_persisted() {
    let source = Arc::new(ScriptedSource::new().respond(
        SourceOperation::TokenAsset,
        "mintY",
        found_token(&named_token("mintY", "Unknown Token", "")),
    ));
    let (orchestrator, store) = token_orchestrator(source);

    let response = orchestrator.process(&FetchRequest::new("mintY")).await;

    assert!(!response.success);
    assert_eq!(response.source, ResponseSource::Error);
    assert!(!store.exists(&ResourceKey::from("mintY")).await.unwrap());
}

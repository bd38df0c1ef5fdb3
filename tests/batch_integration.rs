//! Batch submissions through the assembled runtime

mod common;

use common::{harness, BATCH_KEY};
use fetchflow_core::batch::{BatchState, BatchSubmission};
use fetchflow_core::fetcher::SourceOperation;
use fetchflow_core::models::ResourceKey;
use fetchflow_core::test_helpers::{found_transaction, sample_transaction, ScriptedSource};
use fetchflow_core::FetchflowError;
use tokio_util::sync::CancellationToken;

fn keys(keys: &[&str]) -> Vec<ResourceKey> {
    keys.iter().map(|k| ResourceKey::from(*k)).collect()
}

fn source_for(signatures: &[&str]) -> ScriptedSource {
    signatures.iter().fold(ScriptedSource::new(), |source, sig| {
        source.respond(
            SourceOperation::Transaction,
            *sig,
            found_transaction(&sample_transaction(sig, &["mintA"])),
        )
    })
}

#[tokio::test]
async fn test_batch_mixes_cached_and_fetched_items() {
    let h = harness(source_for(&["sig-3", "sig-4", "sig-5"])).await;
    let store = h.runtime.transaction_store();
    for sig in ["sig-1", "sig-2"] {
        store
            .upsert(
                &ResourceKey::from(sig),
                &sample_transaction(sig, &["mintA"]).to_document(),
            )
            .await
            .unwrap();
    }

    let report = h
        .runtime
        .transaction_batches()
        .submit(
            BatchSubmission::new(BATCH_KEY, keys(&["sig-1", "sig-2", "sig-3", "sig-4", "sig-5"])),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(report.state, BatchState::Available);
    assert!(report.batch_id.is_some());
    assert_eq!(report.existing_count, 2);
    assert_eq!(report.fetched_count, 3);
    assert!(report.errors.is_empty());
    assert_eq!(report.items.len(), 5);
    assert!(report.items.iter().all(|item| item.resolved.is_some()));
    assert!(report.failure().is_none());

    // cached items are never fetched
    assert_eq!(h.source.call_count(SourceOperation::Transaction), 3);
    // every resolved item is finalized
    for sig in ["sig-1", "sig-2", "sig-3", "sig-4", "sig-5"] {
        assert!(h.parties.parties_for(&ResourceKey::from(sig)).is_some());
    }
}

#[tokio::test]
async fn test_missing_items_are_reported_per_item() {
    let h = harness(source_for(&["sig-1"])).await;

    let report = h
        .runtime
        .transaction_batches()
        .submit(
            BatchSubmission::new(BATCH_KEY, keys(&["sig-1", "sig-gone", "sig-1"])),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(report.state, BatchState::Available);
    assert_eq!(report.items.len(), 2);
    assert_eq!(report.fetched_count, 1);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].key, ResourceKey::from("sig-gone"));
}

#[tokio::test]
async fn test_invalid_credential_rejects_whole_batch() {
    let h = harness(source_for(&["sig-1"])).await;

    let report = h
        .runtime
        .transaction_batches()
        .submit(
            BatchSubmission::new("not-a-key", keys(&["sig-1"])),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(report.state, BatchState::Errored);
    assert_eq!(report.batch_id, None);
    assert!(report.items.is_empty());
    assert!(matches!(
        report.failure(),
        Some(FetchflowError::CredentialInvalid)
    ));
    assert_eq!(h.source.call_count(SourceOperation::Transaction), 0);
}

#[tokio::test]
async fn test_cancelled_batch_goes_stale_without_fetching() {
    let h = harness(source_for(&["sig-1"])).await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = h
        .runtime
        .transaction_batches()
        .submit(BatchSubmission::new(BATCH_KEY, keys(&["sig-1"])), &cancel)
        .await;

    assert_eq!(report.state, BatchState::Stale);
    assert!(matches!(report.failure(), Some(FetchflowError::Cancelled)));
    assert_eq!(h.source.call_count(SourceOperation::Transaction), 0);
}

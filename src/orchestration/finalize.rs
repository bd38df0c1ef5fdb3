//! Downstream finalization of a transaction once all of its tokens are
//! resolved: classification tag and party records.
//!
//! Finalization runs under at-least-once delivery and may be triggered more
//! than once for the same key, so every write here is an overwrite.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::classifier::{ClassificationInput, ClassificationPolicy, Classifier};
use crate::error::{FetchflowError, Result};
use crate::models::{FieldMask, ResourceKey, TransactionRecord};
use crate::store::RecordStore;

#[derive(Debug, Clone, PartialEq)]
pub enum FinalizeOutcome {
    Finalized {
        label: Option<String>,
        parties: usize,
    },
    /// No persisted record to finalize
    Missing,
}

#[async_trait]
pub trait RecordFinalizer: Send + Sync + fmt::Debug {
    async fn finalize(&self, key: &ResourceKey) -> Result<FinalizeOutcome>;
}

/// Party-record creation, owned by an external collaborator
#[async_trait]
pub trait PartyRecorder: Send + Sync + fmt::Debug {
    async fn record_parties(&self, key: &ResourceKey, parties: &[String]) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryPartyRecorder {
    records: DashMap<ResourceKey, Vec<String>>,
}

impl InMemoryPartyRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parties_for(&self, key: &ResourceKey) -> Option<Vec<String>> {
        self.records.get(key).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl PartyRecorder for InMemoryPartyRecorder {
    async fn record_parties(&self, key: &ResourceKey, parties: &[String]) -> Result<()> {
        self.records.insert(key.clone(), parties.to_vec());
        Ok(())
    }
}

/// Fee payer first, then owners whose balance changed, deduplicated
pub fn transaction_parties(record: &TransactionRecord) -> Vec<String> {
    let mut parties: Vec<String> = Vec::new();
    let owners = record
        .token_balances
        .iter()
        .filter(|b| b.delta() != 0.0)
        .filter_map(|b| b.owner.clone());
    for party in record.account_keys.first().cloned().into_iter().chain(owners) {
        if !parties.contains(&party) {
            parties.push(party);
        }
    }
    parties
}

#[derive(Debug)]
pub struct TransactionFinalizer {
    store: Arc<dyn RecordStore>,
    classifier: Arc<dyn Classifier>,
    policy: ClassificationPolicy,
    parties: Arc<dyn PartyRecorder>,
}

impl TransactionFinalizer {
    pub fn new(
        store: Arc<dyn RecordStore>,
        classifier: Arc<dyn Classifier>,
        policy: ClassificationPolicy,
        parties: Arc<dyn PartyRecorder>,
    ) -> Self {
        Self {
            store,
            classifier,
            policy,
            parties,
        }
    }
}

#[async_trait]
impl RecordFinalizer for TransactionFinalizer {
    #[instrument(skip(self), fields(key = %key))]
    async fn finalize(&self, key: &ResourceKey) -> Result<FinalizeOutcome> {
        let Some(stored) = self.store.get_by_key(key, FieldMask::ALL).await? else {
            warn!(key = %key, "finalize for a transaction that is not persisted");
            return Ok(FinalizeOutcome::Missing);
        };
        let record = TransactionRecord::from_document(&stored.document).map_err(|e| {
            FetchflowError::ValidationError(format!("stored transaction {key} unreadable: {e}"))
        })?;

        let parties = transaction_parties(&record);
        let input = ClassificationInput::from_record(&record, parties.clone());
        let accepted = self.policy.accept(self.classifier.classify(&input).await);
        let label = accepted.as_ref().map(|c| c.label.clone());

        self.store
            .merge_section(key, "classification", &json!(accepted))
            .await?;
        self.store.merge_section(key, "parties", &json!(parties)).await?;
        self.parties.record_parties(key, &parties).await?;

        info!(key = %key, label = ?label, parties = parties.len(), "transaction finalized");
        Ok(FinalizeOutcome::Finalized {
            label,
            parties: parties.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{Classification, NoopClassifier};
    use crate::models::ResourceKind;
    use crate::store::InMemoryRecordStore;
    use crate::test_helpers::{balance, sample_transaction};

    #[derive(Debug)]
    struct FixedClassifier(f64);

    #[async_trait]
    impl Classifier for FixedClassifier {
        async fn classify(&self, input: &ClassificationInput) -> Classification {
            assert!(!input.parties.is_empty());
            Classification {
                label: "swap".to_string(),
                confidence: self.0,
            }
        }
    }

    async fn persisted() -> (Arc<InMemoryRecordStore>, ResourceKey) {
        let store = Arc::new(InMemoryRecordStore::new(ResourceKind::Transaction));
        let mut record = sample_transaction("sig", &["mintA"]);
        record.token_balances.push(balance("mintB", "counterparty", 0.0, 6.0));
        record.token_balances.push(balance("mintC", "bystander", 1.0, 1.0));
        let key = ResourceKey::from("sig");
        store.upsert(&key, &record.to_document()).await.unwrap();
        (store, key)
    }

    #[test]
    fn test_parties_fee_payer_first_and_deduplicated() {
        let mut record = sample_transaction("sig", &["mintA"]);
        record.token_balances.push(balance("mintB", "other", 2.0, 3.0));
        record.token_balances.push(balance("mintC", "idle", 2.0, 2.0));
        assert_eq!(transaction_parties(&record), vec!["payer", "other"]);
    }

    #[tokio::test]
    async fn test_finalize_writes_label_and_parties() {
        let (store, key) = persisted().await;
        let recorder = Arc::new(InMemoryPartyRecorder::new());
        let finalizer = TransactionFinalizer::new(
            store.clone(),
            Arc::new(FixedClassifier(0.9)),
            ClassificationPolicy::new(0.5),
            recorder.clone(),
        );

        let outcome = finalizer.finalize(&key).await.unwrap();
        assert_eq!(
            outcome,
            FinalizeOutcome::Finalized {
                label: Some("swap".to_string()),
                parties: 2
            }
        );
        let raw = store.raw(&key).unwrap();
        assert_eq!(raw["classification"]["label"], "swap");
        assert_eq!(raw["parties"], json!(["payer", "counterparty"]));
        assert_eq!(
            recorder.parties_for(&key),
            Some(vec!["payer".to_string(), "counterparty".to_string()])
        );

        // Second trigger is an overwrite
        finalizer.finalize(&key).await.unwrap();
        assert_eq!(recorder.len(), 1);
    }

    #[tokio::test]
    async fn test_low_confidence_stores_no_label() {
        let (store, key) = persisted().await;
        let finalizer = TransactionFinalizer::new(
            store.clone(),
            Arc::new(NoopClassifier),
            ClassificationPolicy::new(0.5),
            Arc::new(InMemoryPartyRecorder::new()),
        );
        let outcome = finalizer.finalize(&key).await.unwrap();
        assert!(matches!(outcome, FinalizeOutcome::Finalized { label: None, .. }));
        assert!(store.raw(&key).unwrap()["classification"].is_null());
    }

    #[tokio::test]
    async fn test_missing_record() {
        let finalizer = TransactionFinalizer::new(
            Arc::new(InMemoryRecordStore::new(ResourceKind::Transaction)),
            Arc::new(NoopClassifier),
            ClassificationPolicy::new(0.5),
            Arc::new(InMemoryPartyRecorder::new()),
        );
        assert_eq!(
            finalizer.finalize(&ResourceKey::from("nope")).await.unwrap(),
            FinalizeOutcome::Missing
        );
    }
}

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::cache_first::FetchFollowUp;
use crate::constants::priority;
use crate::error::{FetchflowError, Result};
use crate::fan_in::FanInSynchronizer;
use crate::messaging::{publish_task, MessagingProvider};
use crate::models::{records::document_mints, Document, FetchRequest, FieldMask, ResourceKey};
use crate::pipeline::FinalizeMessage;
use crate::store::{KnownKeySet, RecordStore};

/// What one dispatch round did, for logging and tests
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Mints referenced by the parent
    pub discovered: usize,
    /// Mints neither known nor persisted
    pub unknown: usize,
    /// Sub-fetch tasks actually published
    pub dispatched: usize,
    /// Finalize was published by this round
    pub finalize_triggered: bool,
}

/// Dispatches one token sub-fetch per unknown mint of a freshly fetched
/// transaction and tracks them with the fan-in synchronizer.
///
/// The counter is registered before the first task is published, so no
/// sub-fetch can complete against a missing counter. With zero unknown mints
/// nothing is registered and finalize is published straight away.
///
/// Any failure is returned so the transaction message is redelivered. The
/// redelivered request is a cache hit, and [`FetchFollowUp::after_cache_hit`]
/// dispatches again for a transaction that is neither finalized nor waiting
/// on a counter.
#[derive(Debug)]
pub struct DependencyDispatcher {
    transaction_store: Arc<dyn RecordStore>,
    token_store: Arc<dyn RecordStore>,
    known_keys: Arc<KnownKeySet>,
    fan_in: Arc<dyn FanInSynchronizer>,
    messaging: Arc<MessagingProvider>,
    token_queue: String,
    finalize_queue: String,
}

impl DependencyDispatcher {
    pub fn new(
        transaction_store: Arc<dyn RecordStore>,
        token_store: Arc<dyn RecordStore>,
        known_keys: Arc<KnownKeySet>,
        fan_in: Arc<dyn FanInSynchronizer>,
        messaging: Arc<MessagingProvider>,
        token_queue: impl Into<String>,
        finalize_queue: impl Into<String>,
    ) -> Self {
        Self {
            transaction_store,
            token_store,
            known_keys,
            fan_in,
            messaging,
            token_queue: token_queue.into(),
            finalize_queue: finalize_queue.into(),
        }
    }

    async fn is_known(&self, mint: &ResourceKey) -> bool {
        if self.known_keys.contains(mint) {
            return true;
        }
        match self.token_store.exists(mint).await {
            Ok(true) => {
                self.known_keys.confirm(mint);
                true
            }
            Ok(false) => false,
            Err(e) => {
                debug!(mint = %mint, error = %e, "existence check failed, fetching anyway");
                false
            }
        }
    }

    async fn unknown_mints(&self, mints: Vec<ResourceKey>) -> Vec<ResourceKey> {
        let mut unknown = Vec::with_capacity(mints.len());
        for mint in mints {
            if !self.is_known(&mint).await {
                unknown.push(mint);
            }
        }
        unknown
    }

    async fn publish_finalize(&self, parent: &ResourceKey) -> Result<()> {
        publish_task(
            &self.messaging,
            &self.finalize_queue,
            FinalizeMessage::new(parent.clone()),
            priority::DEFAULT,
        )
        .await?;
        info!(parent = %parent, "finalize published");
        Ok(())
    }

    #[instrument(skip(self, document), fields(parent = %parent))]
    pub async fn dispatch(&self, parent: &ResourceKey, document: &Document) -> Result<DispatchSummary> {
        let mints = document_mints(document);
        let mut summary = DispatchSummary {
            discovered: mints.len(),
            ..DispatchSummary::default()
        };
        let unknown = self.unknown_mints(mints).await;
        summary.unknown = unknown.len();

        if unknown.is_empty() {
            self.publish_finalize(parent).await?;
            summary.finalize_triggered = true;
            return Ok(summary);
        }

        let count = u32::try_from(unknown.len()).unwrap_or(u32::MAX);
        self.fan_in.register(parent, count).await?;

        let mut undelivered = 0_usize;
        for mint in unknown {
            let request = FetchRequest::sub_fetch(mint.clone(), parent.clone());
            match publish_task(&self.messaging, &self.token_queue, request, priority::SUB_FETCH).await {
                Ok(_) => summary.dispatched += 1,
                Err(e) => {
                    warn!(mint = %mint, error = %e, "sub-fetch publish failed");
                    undelivered += 1;
                }
            }
        }

        // Account for tasks that will never report back.
        for _ in 0..undelivered {
            if self.fan_in.complete(parent).await?.should_trigger() {
                self.publish_finalize(parent).await?;
                summary.finalize_triggered = true;
            }
        }

        debug!(
            discovered = summary.discovered,
            unknown = summary.unknown,
            dispatched = summary.dispatched,
            "dependencies dispatched"
        );
        if undelivered > 0 {
            return Err(FetchflowError::MessagingError(format!(
                "{undelivered} sub-fetch task(s) for {parent} not published"
            )));
        }
        Ok(summary)
    }

    /// Dispatch again for a persisted transaction that has not been finalized
    /// and has no outstanding counter. Returns `None` when nothing was needed.
    #[instrument(skip(self), fields(parent = %parent))]
    pub async fn resume(&self, parent: &ResourceKey) -> Result<Option<DispatchSummary>> {
        let Some(stored) = self
            .transaction_store
            .get_by_key(parent, FieldMask::CORE | FieldMask::PARTIES)
            .await?
        else {
            return Ok(None);
        };
        if stored.document.get("parties").is_some() {
            return Ok(None);
        }
        if self.fan_in.pending(parent).await?.is_some() {
            debug!("sub-fetches still outstanding");
            return Ok(None);
        }
        info!("resuming dispatch for an unfinalized transaction");
        self.dispatch(parent, &stored.document).await.map(Some)
    }
}

#[async_trait]
impl FetchFollowUp for DependencyDispatcher {
    async fn after_network_fetch(&self, request: &FetchRequest, document: &Document) -> Result<()> {
        self.dispatch(&request.key, document).await.map(|_| ())
    }

    async fn after_cache_hit(&self, request: &FetchRequest) -> Result<()> {
        self.resume(&request.key).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fan_in::{FanInStatus, InMemoryFanIn};
    use crate::messaging::RequestEnvelope;
    use crate::models::ResourceKind;
    use crate::store::InMemoryRecordStore;
    use crate::test_helpers::sample_transaction;
    use serde_json::json;

    struct Fixture {
        transactions: Arc<InMemoryRecordStore>,
        tokens: Arc<InMemoryRecordStore>,
        known: Arc<KnownKeySet>,
        fan_in: Arc<InMemoryFanIn>,
        messaging: Arc<MessagingProvider>,
        dispatcher: DependencyDispatcher,
    }

    async fn fixture() -> Fixture {
        let transactions = Arc::new(InMemoryRecordStore::new(ResourceKind::Transaction));
        let tokens = Arc::new(InMemoryRecordStore::new(ResourceKind::Token));
        let known = Arc::new(KnownKeySet::new(64));
        let fan_in = Arc::new(InMemoryFanIn::new());
        let messaging = Arc::new(MessagingProvider::in_memory());
        messaging
            .ensure_queues(&["tokens".to_string(), "finalize".to_string()])
            .await
            .unwrap();
        let dispatcher = DependencyDispatcher::new(
            transactions.clone(),
            tokens.clone(),
            known.clone(),
            fan_in.clone(),
            messaging.clone(),
            "tokens",
            "finalize",
        );
        Fixture {
            transactions,
            tokens,
            known,
            fan_in,
            messaging,
            dispatcher,
        }
    }

    async fn queued<T: serde::de::DeserializeOwned + serde::Serialize + Send + Sync + 'static>(
        messaging: &MessagingProvider,
        queue: &str,
    ) -> Vec<RequestEnvelope<T>> {
        messaging
            .as_in_memory()
            .unwrap()
            .peek_all::<RequestEnvelope<T>>(queue)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_zero_unknown_dependencies_finalizes_immediately() {
        let f = fixture().await;
        f.known.confirm(&ResourceKey::from("mintA"));
        f.tokens
            .upsert(&ResourceKey::from("mintB"), &json!({"core": {"mint": "mintB"}}))
            .await
            .unwrap();
        let doc = sample_transaction("sig", &["mintA", "mintB"]).to_document();

        let summary = f.dispatcher.dispatch(&ResourceKey::from("sig"), &doc).await.unwrap();
        assert_eq!(summary.unknown, 0);
        assert!(summary.finalize_triggered);
        assert_eq!(f.fan_in.tracked(), 0);
        assert!(queued::<FetchRequest>(&f.messaging, "tokens").await.is_empty());
        let finalize = queued::<FinalizeMessage>(&f.messaging, "finalize").await;
        assert_eq!(finalize[0].body.key, ResourceKey::from("sig"));
        // Existence check fed the advisory set
        assert!(f.known.contains(&ResourceKey::from("mintB")));
    }

    #[tokio::test]
    async fn test_registers_before_dispatching_sub_fetches() {
        let f = fixture().await;
        f.known.confirm(&ResourceKey::from("known"));
        let doc = sample_transaction("sig", &["known", "m1", "m2"]).to_document();

        let summary = f.dispatcher.dispatch(&ResourceKey::from("sig"), &doc).await.unwrap();
        assert_eq!(summary.discovered, 3);
        assert_eq!(summary.dispatched, 2);
        assert!(!summary.finalize_triggered);
        assert_eq!(f.fan_in.pending(&ResourceKey::from("sig")).await.unwrap(), Some(2));

        let tasks = queued::<FetchRequest>(&f.messaging, "tokens").await;
        let keys: Vec<_> = tasks.iter().map(|t| t.body.key.as_str().to_string()).collect();
        assert_eq!(keys, vec!["m1", "m2"]);
        assert!(tasks.iter().all(|t| !t.expects_reply()));
        assert!(tasks
            .iter()
            .all(|t| t.body.parent_key == Some(ResourceKey::from("sig"))));
        assert!(queued::<FinalizeMessage>(&f.messaging, "finalize").await.is_empty());
    }

    #[tokio::test]
    async fn test_undeliverable_sub_fetches_are_completed_locally() {
        let tokens = Arc::new(InMemoryRecordStore::new(ResourceKind::Token));
        let fan_in = Arc::new(InMemoryFanIn::new());
        let messaging = Arc::new(MessagingProvider::in_memory());
        // Token queue deliberately missing
        messaging.ensure_queue("finalize").await.unwrap();
        let dispatcher = DependencyDispatcher::new(
            Arc::new(InMemoryRecordStore::new(ResourceKind::Transaction)),
            tokens,
            Arc::new(KnownKeySet::new(8)),
            fan_in.clone(),
            messaging.clone(),
            "tokens",
            "finalize",
        );
        let doc = sample_transaction("sig", &["m1", "m2"]).to_document();

        // Counted down locally, then reported so the message is redelivered
        assert!(dispatcher.dispatch(&ResourceKey::from("sig"), &doc).await.is_err());
        assert_eq!(
            fan_in.complete(&ResourceKey::from("sig")).await.unwrap(),
            FanInStatus::Untracked
        );
        assert_eq!(queued::<FinalizeMessage>(&messaging, "finalize").await.len(), 1);
    }

    #[tokio::test]
    async fn test_resume_redispatches_after_failed_finalize_publish() {
        let transactions = Arc::new(InMemoryRecordStore::new(ResourceKind::Transaction));
        let messaging = Arc::new(MessagingProvider::in_memory());
        let dispatcher = DependencyDispatcher::new(
            transactions.clone(),
            Arc::new(InMemoryRecordStore::new(ResourceKind::Token)),
            Arc::new(KnownKeySet::new(8)),
            Arc::new(InMemoryFanIn::new()),
            messaging.clone(),
            "tokens",
            "finalize",
        );
        let parent = ResourceKey::from("sig");
        let doc = sample_transaction("sig", &[]).to_document();
        transactions.upsert(&parent, &doc).await.unwrap();

        // Finalize queue missing on the first delivery
        assert!(dispatcher.dispatch(&parent, &doc).await.is_err());

        messaging.ensure_queue("finalize").await.unwrap();
        let summary = dispatcher.resume(&parent).await.unwrap().unwrap();
        assert!(summary.finalize_triggered);
        assert_eq!(queued::<FinalizeMessage>(&messaging, "finalize").await.len(), 1);
    }

    #[tokio::test]
    async fn test_resume_skips_finalized_and_in_flight_parents() {
        let f = fixture().await;
        let finalized = ResourceKey::from("done");
        f.transactions
            .upsert(&finalized, &sample_transaction("done", &["m1"]).to_document())
            .await
            .unwrap();
        f.transactions
            .merge_section(&finalized, "parties", &json!(["payer"]))
            .await
            .unwrap();
        assert_eq!(f.dispatcher.resume(&finalized).await.unwrap(), None);

        let waiting = ResourceKey::from("waiting");
        let doc = sample_transaction("waiting", &["m1", "m2"]).to_document();
        f.transactions.upsert(&waiting, &doc).await.unwrap();
        f.dispatcher.dispatch(&waiting, &doc).await.unwrap();
        assert_eq!(f.dispatcher.resume(&waiting).await.unwrap(), None);
        assert_eq!(queued::<FetchRequest>(&f.messaging, "tokens").await.len(), 2);

        assert_eq!(f.dispatcher.resume(&ResourceKey::from("absent")).await.unwrap(), None);
    }
}

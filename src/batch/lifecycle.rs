use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::credentials::CredentialValidator;
use super::repository::{BatchProgress, BatchRepository, BatchRequest, QueueItem};
use super::state::BatchState;
use crate::constants::priority;
use crate::error::{FetchflowError, Result};
use crate::logging::{log_error, log_fetch_operation};
use crate::models::{records::RecordRef, FetchRequest, ResourceKey};
use crate::orchestration::{CacheFirstOrchestrator, RecordFinalizer};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSubmission {
    pub credential: String,
    pub keys: Vec<ResourceKey>,
    #[serde(default = "default_batch_priority")]
    pub priority: u8,
}

fn default_batch_priority() -> u8 {
    priority::BATCH
}

impl BatchSubmission {
    pub fn new(credential: impl Into<String>, keys: Vec<ResourceKey>) -> Self {
        Self {
            credential: credential.into(),
            keys,
            priority: priority::BATCH,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    pub key: ResourceKey,
    pub error: String,
}

/// Terminal state of one submission plus its per-item results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    /// `None` when the credential was rejected and nothing was created
    pub batch_id: Option<Uuid>,
    pub state: BatchState,
    pub existing_count: u32,
    pub fetched_count: u32,
    pub errors: Vec<ItemError>,
    pub items: Vec<QueueItem>,
    /// Why the batch halted, for `Errored` and `Stale` reports
    #[serde(skip)]
    pub halted_by: Option<FetchflowError>,
}

impl BatchReport {
    /// The batch-level failure this report represents, if any
    pub fn failure(&self) -> Option<FetchflowError> {
        self.halted_by.clone()
    }

    fn rejected(reason: FetchflowError) -> Self {
        Self {
            batch_id: None,
            state: BatchState::Errored,
            existing_count: 0,
            fetched_count: 0,
            errors: Vec::new(),
            items: Vec::new(),
            halted_by: Some(reason),
        }
    }
}

/// Mutable progress of a running batch
#[derive(Debug)]
struct Run {
    batch: BatchRequest,
    state: BatchState,
    items: Vec<QueueItem>,
    progress: BatchProgress,
    errors: Vec<ItemError>,
    halted_by: Option<FetchflowError>,
}

impl Run {
    fn into_report(self) -> BatchReport {
        BatchReport {
            batch_id: Some(self.batch.id),
            state: self.state,
            existing_count: self.progress.existing_count,
            fetched_count: self.progress.fetched_count,
            errors: self.errors,
            items: self.items,
            halted_by: self.halted_by,
        }
    }
}

/// Drives a credentialed batch of keys through the cache-first orchestrator.
///
/// Uncached items are processed one at a time; cancellation is checked
/// between items. Per-item failures land in the report's error list and never
/// abort the batch. Only a rejected credential or a repository failure does.
#[derive(Debug)]
pub struct BatchLifecycle {
    validator: Arc<dyn CredentialValidator>,
    repository: Arc<dyn BatchRepository>,
    orchestrator: Arc<CacheFirstOrchestrator>,
    finalizer: Option<Arc<dyn RecordFinalizer>>,
}

impl BatchLifecycle {
    pub fn new(
        validator: Arc<dyn CredentialValidator>,
        repository: Arc<dyn BatchRepository>,
        orchestrator: Arc<CacheFirstOrchestrator>,
    ) -> Self {
        Self {
            validator,
            repository,
            orchestrator,
            finalizer: None,
        }
    }

    /// Run per-item finalization for every resolved item
    pub fn with_finalizer(mut self, finalizer: Arc<dyn RecordFinalizer>) -> Self {
        self.finalizer = Some(finalizer);
        self
    }

    #[instrument(skip(self, submission, cancel), fields(items = submission.keys.len()))]
    pub async fn submit(&self, submission: BatchSubmission, cancel: &CancellationToken) -> BatchReport {
        let requester = match self.validator.validate(&submission.credential).await {
            Ok(Some(requester)) => requester,
            Ok(None) => {
                warn!("batch rejected: unknown credential");
                return BatchReport::rejected(FetchflowError::CredentialInvalid);
            }
            Err(e) => {
                log_error("batch_lifecycle", "validate_credential", &e.to_string(), None);
                return BatchReport::rejected(e);
            }
        };

        let batch = BatchRequest::new(requester, submission.priority);
        if let Err(e) = self.repository.create(&batch).await {
            log_error("batch_lifecycle", "create", &e.to_string(), None);
            return BatchReport::rejected(e);
        }
        info!(batch_id = %batch.id, requester = %batch.requester, "batch created");

        let mut run = Run {
            state: batch.state,
            batch,
            items: Vec::new(),
            progress: BatchProgress::default(),
            errors: Vec::new(),
            halted_by: None,
        };

        match self.drive(&mut run, submission.keys, cancel).await {
            Ok(terminal) => {
                if terminal == BatchState::Stale {
                    run.halted_by = Some(FetchflowError::Cancelled);
                }
                self.settle(&mut run, terminal).await;
            }
            Err(e) => {
                log_error(
                    "batch_lifecycle",
                    "drive",
                    &e.to_string(),
                    Some(&run.batch.id.to_string()),
                );
                run.halted_by = Some(e);
                self.settle(&mut run, BatchState::Errored).await;
            }
        }

        info!(
            batch_id = %run.batch.id,
            state = %run.state,
            existing = run.progress.existing_count,
            fetched = run.progress.fetched_count,
            failed = run.progress.failed_count,
            "batch finished"
        );
        run.into_report()
    }

    async fn drive(
        &self,
        run: &mut Run,
        keys: Vec<ResourceKey>,
        cancel: &CancellationToken,
    ) -> Result<BatchState> {
        let batch_id = run.batch.id;
        run.items = self.stage(&keys, run.batch.priority).await;
        run.progress.existing_count = count(run.items.iter().filter(|item| item.existed).count());
        self.repository.stage_items(batch_id, &run.items).await?;

        if cancel.is_cancelled() {
            return Ok(BatchState::Stale);
        }
        self.advance(run, BatchState::Processing).await?;

        for index in 0..run.items.len() {
            if run.items[index].existed {
                continue;
            }
            if cancel.is_cancelled() {
                return Ok(BatchState::Stale);
            }
            self.fetch_item(run, index).await?;
        }

        if let Some(finalizer) = &self.finalizer {
            for item in run.items.iter().filter(|item| item.resolved.is_some()) {
                if cancel.is_cancelled() {
                    return Ok(BatchState::Stale);
                }
                if let Err(e) = finalizer.finalize(&item.key).await {
                    run.errors.push(ItemError {
                        key: item.key.clone(),
                        error: format!("finalization failed: {e}"),
                    });
                }
            }
        }

        Ok(BatchState::Available)
    }

    /// One queue item per distinct key, in submission order
    async fn stage(&self, keys: &[ResourceKey], priority: u8) -> Vec<QueueItem> {
        let kind = self.orchestrator.kind();
        let store = self.orchestrator.store();
        let mut items: Vec<QueueItem> = Vec::with_capacity(keys.len());
        for key in keys {
            if items.iter().any(|item| &item.key == key) {
                debug!(key = %key, "duplicate key skipped");
                continue;
            }
            let existed = !key.is_blank() && store.exists(key).await.unwrap_or(false);
            items.push(QueueItem::staged(kind, key.clone(), priority, existed));
        }
        items
    }

    async fn fetch_item(&self, run: &mut Run, index: usize) -> Result<()> {
        let key = run.items[index].key.clone();
        let request = FetchRequest::new(key.clone()).with_priority(run.items[index].priority);
        let response = self.orchestrator.process(&request).await;

        if response.success {
            let record = RecordRef::new(self.orchestrator.kind(), key.clone());
            self.repository
                .resolve_item(run.batch.id, &key, &record)
                .await?;
            run.items[index].resolved = Some(record);
            run.progress.fetched_count += 1;
            log_fetch_operation("batch", key.as_str(), "resolved", None, None);
        } else {
            run.progress.failed_count += 1;
            run.errors.push(ItemError {
                key,
                error: response
                    .error
                    .unwrap_or_else(|| "fetch failed".to_string()),
            });
        }
        Ok(())
    }

    async fn advance(&self, run: &mut Run, to: BatchState) -> Result<()> {
        self.repository.transition(run.batch.id, run.state, to).await?;
        run.state = to;
        Ok(())
    }

    /// Record progress and move to a terminal state, best effort.
    ///
    /// The report carries the decided outcome even when persisting it fails.
    async fn settle(&self, run: &mut Run, terminal: BatchState) {
        if let Err(e) = self
            .repository
            .record_progress(run.batch.id, &run.progress)
            .await
        {
            warn!(batch_id = %run.batch.id, error = %e, "progress not recorded");
        }
        if let Err(e) = self.advance(run, terminal).await {
            warn!(batch_id = %run.batch.id, error = %e, "terminal transition not recorded");
            run.state = terminal;
        }
    }
}

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{InMemoryBatchRepository, StaticCredentials};
    use crate::config::StaticCredential;
    use crate::fetcher::SourceOperation;
    use crate::models::{Provenance, ResourceKind};
    use crate::orchestration::{Acquisition, ResourceAcquirer, TransactionAcquirer};
    use crate::store::{InMemoryRecordStore, RecordStore};
    use crate::test_helpers::{
        default_endpoints, fast_backoff, fetcher_with, found_transaction, sample_transaction,
        ScriptedSource,
    };
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        repository: Arc<InMemoryBatchRepository>,
        store: Arc<InMemoryRecordStore>,
        lifecycle: BatchLifecycle,
    }

    fn fixture(source: Arc<ScriptedSource>) -> Fixture {
        let store = Arc::new(InMemoryRecordStore::new(ResourceKind::Transaction));
        let fetcher = fetcher_with(&default_endpoints(), source, fast_backoff());
        let orchestrator = Arc::new(CacheFirstOrchestrator::new(
            store.clone(),
            Arc::new(TransactionAcquirer::new(fetcher)),
        ));
        let repository = Arc::new(InMemoryBatchRepository::new());
        Fixture {
            repository: repository.clone(),
            store,
            lifecycle: BatchLifecycle::new(validator(), repository, orchestrator),
        }
    }

    fn keys(keys: &[&str]) -> Vec<ResourceKey> {
        keys.iter().map(|k| ResourceKey::from(*k)).collect()
    }

    fn validator() -> Arc<StaticCredentials> {
        Arc::new(StaticCredentials::new(&[StaticCredential {
            requester: "site".to_string(),
            key: "good".to_string(),
        }]))
    }

    /// Acquires every key and fires `cancel` after the first one
    #[derive(Debug)]
    struct CancelAfterFirst {
        cancel: CancellationToken,
        acquired: Mutex<Vec<ResourceKey>>,
    }

    #[async_trait]
    impl ResourceAcquirer for CancelAfterFirst {
        fn kind(&self) -> ResourceKind {
            ResourceKind::Transaction
        }

        async fn acquire(&self, key: &ResourceKey) -> Acquisition {
            self.acquired.lock().push(key.clone());
            self.cancel.cancel();
            Acquisition::Acquired {
                document: sample_transaction(key.as_str(), &[]).to_document(),
                provenance: Provenance::from_endpoint("rpc-1"),
            }
        }
    }

    /// In-memory repository whose writes can be made to fail
    #[derive(Debug, Default)]
    struct FaultyRepository {
        inner: InMemoryBatchRepository,
        fail_create: bool,
        fail_resolve_at: Option<usize>,
        resolves: AtomicUsize,
    }

    #[async_trait]
    impl BatchRepository for FaultyRepository {
        async fn create(&self, batch: &BatchRequest) -> Result<()> {
            if self.fail_create {
                return Err(FetchflowError::DatabaseError("insert refused".to_string()));
            }
            self.inner.create(batch).await
        }

        async fn stage_items(&self, batch_id: Uuid, items: &[QueueItem]) -> Result<()> {
            self.inner.stage_items(batch_id, items).await
        }

        async fn resolve_item(&self, batch_id: Uuid, key: &ResourceKey, record: &RecordRef) -> Result<()> {
            let call = self.resolves.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_resolve_at == Some(call) {
                return Err(FetchflowError::DatabaseError("connection lost".to_string()));
            }
            self.inner.resolve_item(batch_id, key, record).await
        }

        async fn transition(&self, batch_id: Uuid, from: BatchState, to: BatchState) -> Result<()> {
            self.inner.transition(batch_id, from, to).await
        }

        async fn record_progress(&self, batch_id: Uuid, progress: &BatchProgress) -> Result<()> {
            self.inner.record_progress(batch_id, progress).await
        }

        async fn get(&self, batch_id: Uuid) -> Result<Option<BatchRequest>> {
            self.inner.get(batch_id).await
        }

        async fn items(&self, batch_id: Uuid) -> Result<Vec<QueueItem>> {
            self.inner.items(batch_id).await
        }
    }

    #[derive(Debug)]
    struct UnreachableValidator;

    #[async_trait]
    impl CredentialValidator for UnreachableValidator {
        async fn validate(&self, _credential: &str) -> Result<Option<String>> {
            Err(FetchflowError::DatabaseError("credential store down".to_string()))
        }
    }

    fn scripted_orchestrator(signatures: &[&str]) -> Arc<CacheFirstOrchestrator> {
        let source = Arc::new(ScriptedSource::new());
        for sig in signatures {
            source.set_answer(
                SourceOperation::Transaction,
                sig,
                found_transaction(&sample_transaction(sig, &[])),
            );
        }
        let fetcher = fetcher_with(&default_endpoints(), source, fast_backoff());
        Arc::new(CacheFirstOrchestrator::new(
            Arc::new(InMemoryRecordStore::new(ResourceKind::Transaction)),
            Arc::new(TransactionAcquirer::new(fetcher)),
        ))
    }

    #[tokio::test]
    async fn test_rejected_credential_creates_nothing() {
        let f = fixture(Arc::new(ScriptedSource::new()));
        let report = f
            .lifecycle
            .submit(BatchSubmission::new("bad", keys(&["a"])), &CancellationToken::new())
            .await;
        assert_eq!(report.state, BatchState::Errored);
        assert!(report.batch_id.is_none());
        assert!(report.items.is_empty());
        assert_eq!(f.repository.batch_count(), 0);
        assert!(matches!(
            report.failure(),
            Some(FetchflowError::CredentialInvalid)
        ));
    }

    #[tokio::test]
    async fn test_partial_failures_do_not_abort() {
        let source = Arc::new(ScriptedSource::new());
        source.set_answer(
            SourceOperation::Transaction,
            "ok",
            found_transaction(&sample_transaction("ok", &[])),
        );
        let f = fixture(source);
        let report = f
            .lifecycle
            .submit(
                BatchSubmission::new("good", keys(&["ok", "missing", "ok"])),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(report.state, BatchState::Available);
        assert_eq!(report.items.len(), 2);
        assert_eq!(report.fetched_count, 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].key, ResourceKey::from("missing"));
        let stored = f
            .repository
            .get(report.batch_id.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.state, BatchState::Available);
        assert_eq!(stored.progress.failed_count, 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_processing_goes_stale() {
        let f = fixture(Arc::new(ScriptedSource::new()));
        f.store
            .upsert(&ResourceKey::from("cached"), &sample_transaction("cached", &[]).to_document())
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = f
            .lifecycle
            .submit(BatchSubmission::new("good", keys(&["cached", "new"])), &cancel)
            .await;
        assert_eq!(report.state, BatchState::Stale);
        assert_eq!(report.existing_count, 1);
        assert_eq!(report.fetched_count, 0);
        assert!(matches!(
            report.failure(),
            Some(FetchflowError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn test_cancelled_between_items_goes_stale() {
        let cancel = CancellationToken::new();
        let acquirer = Arc::new(CancelAfterFirst {
            cancel: cancel.clone(),
            acquired: Mutex::new(Vec::new()),
        });
        let orchestrator = Arc::new(CacheFirstOrchestrator::new(
            Arc::new(InMemoryRecordStore::new(ResourceKind::Transaction)),
            acquirer.clone(),
        ));
        let repository = Arc::new(InMemoryBatchRepository::new());
        let lifecycle = BatchLifecycle::new(validator(), repository.clone(), orchestrator);

        let report = lifecycle
            .submit(BatchSubmission::new("good", keys(&["a", "b", "c"])), &cancel)
            .await;

        assert_eq!(report.state, BatchState::Stale);
        assert_eq!(report.fetched_count, 1);
        assert_eq!(*acquirer.acquired.lock(), keys(&["a"]));
        assert!(report.items[0].resolved.is_some());
        assert!(report.items[1..].iter().all(|item| item.resolved.is_none()));
        assert_eq!(report.failure(), Some(FetchflowError::Cancelled));

        let stored = repository.get(report.batch_id.unwrap()).await.unwrap().unwrap();
        assert_eq!(stored.state, BatchState::Stale);
        assert_eq!(stored.progress.fetched_count, 1);
    }

    #[tokio::test]
    async fn test_repository_failure_mid_batch_errors_with_partial_progress() {
        let repository = Arc::new(FaultyRepository {
            fail_resolve_at: Some(2),
            ..FaultyRepository::default()
        });
        let lifecycle = BatchLifecycle::new(
            validator(),
            repository.clone(),
            scripted_orchestrator(&["a", "b", "c"]),
        );

        let report = lifecycle
            .submit(
                BatchSubmission::new("good", keys(&["a", "b", "c"])),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(report.state, BatchState::Errored);
        assert!(report.batch_id.is_some());
        assert_eq!(report.fetched_count, 1);
        assert!(matches!(
            report.failure(),
            Some(FetchflowError::DatabaseError(_))
        ));

        let stored = repository.get(report.batch_id.unwrap()).await.unwrap().unwrap();
        assert_eq!(stored.state, BatchState::Errored);
        assert_eq!(stored.progress.fetched_count, 1);
        assert_eq!(stored.progress.failed_count, 0);
        // The third item was never attempted
        assert_eq!(repository.resolves.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_validator_outage_is_not_reported_as_bad_credential() {
        let lifecycle = BatchLifecycle::new(
            Arc::new(UnreachableValidator),
            Arc::new(InMemoryBatchRepository::new()),
            scripted_orchestrator(&[]),
        );
        let report = lifecycle
            .submit(BatchSubmission::new("good", keys(&["a"])), &CancellationToken::new())
            .await;
        assert_eq!(report.state, BatchState::Errored);
        assert!(report.batch_id.is_none());
        assert!(matches!(
            report.failure(),
            Some(FetchflowError::DatabaseError(_))
        ));
    }

    #[tokio::test]
    async fn test_create_failure_is_reported_as_such() {
        let repository = Arc::new(FaultyRepository {
            fail_create: true,
            ..FaultyRepository::default()
        });
        let lifecycle = BatchLifecycle::new(validator(), repository.clone(), scripted_orchestrator(&[]));
        let report = lifecycle
            .submit(BatchSubmission::new("good", keys(&["a"])), &CancellationToken::new())
            .await;
        assert!(report.batch_id.is_none());
        assert_eq!(
            report.failure(),
            Some(FetchflowError::DatabaseError("insert refused".to_string()))
        );
        assert_eq!(repository.inner.batch_count(), 0);
    }
}

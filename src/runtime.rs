//! # Worker Runtime
//!
//! Wires configuration into running components: persistence (PostgreSQL
//! when a database is configured, in-memory otherwise), the messaging
//! backend, the endpoint pool and fetcher, the orchestrators and the stage
//! consumers for the selected role.

use std::sync::Arc;

use sqlx::PgPool;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::batch::{
    BatchLifecycle, BatchRepository, CredentialValidator, InMemoryBatchRepository,
    PgBatchRepository, PgCredentialValidator, StaticCredentials,
};
use crate::classifier::{ClassificationPolicy, Classifier, NoopClassifier};
use crate::config::{FetchflowConfig, MessagingBackend};
use crate::constants::{HTTP_REQUEST_TIMEOUT_SECS, WRAPPED_SOL_MINT};
use crate::database::DatabaseConnection;
use crate::endpoint::{EndpointHealth, EndpointPool};
use crate::error::{FetchflowError, Result};
use crate::fallback::{FallbackChain, PlaceholderDetector};
use crate::fan_in::{FanInSynchronizer, InMemoryFanIn, PgFanIn};
use crate::fetcher::{BackoffPolicy, NetworkSource, RateLimitedFetcher};
use crate::messaging::{MessagingProvider, QueueCheck, RpcClient};
use crate::models::ResourceKind;
use crate::orchestration::{
    CacheFirstOrchestrator, DependencyDispatcher, InMemoryPartyRecorder, PartyRecorder,
    RecordFinalizer, TokenAcquirer, TransactionAcquirer, TransactionFinalizer,
};
use crate::pipeline::{
    ConsumerConfig, FinalizeTaskHandler, MessageHandler, QueueConsumer, TokenTaskHandler,
    TransactionRequestHandler,
};
use crate::providers::RoutedSource;
use crate::store::{InMemoryRecordStore, KnownKeySet, PgRecordStore, RecordStore};

/// Which stage consumers a worker process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum WorkerRole {
    Transactions,
    Tokens,
    Finalize,
    All,
}

impl WorkerRole {
    fn runs(self, stage: WorkerRole) -> bool {
        self == WorkerRole::All || self == stage
    }
}

/// External collaborators the pipeline calls into
#[derive(Debug, Clone)]
pub struct Collaborators {
    pub classifier: Arc<dyn Classifier>,
    pub parties: Arc<dyn PartyRecorder>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            classifier: Arc::new(NoopClassifier),
            parties: Arc::new(InMemoryPartyRecorder::new()),
        }
    }
}

/// Readiness of the configured infrastructure, checked without creating
/// queues or running migrations
#[derive(Debug, Clone)]
pub struct PreflightReport {
    pub backend: MessagingBackend,
    /// `None` when no database is configured
    pub database: Option<bool>,
    pub messaging_healthy: bool,
    pub queues: QueueCheck,
    pub endpoints: Vec<EndpointHealth>,
}

impl PreflightReport {
    /// In-memory queues only exist inside a running worker, so they are not
    /// required up front.
    pub fn is_ready(&self) -> bool {
        self.database.unwrap_or(true)
            && self.messaging_healthy
            && (self.backend == MessagingBackend::InMemory || self.queues.all_present())
    }
}

#[derive(Debug)]
pub struct FetchflowRuntime {
    config: FetchflowConfig,
    pool: Option<PgPool>,
    messaging: Arc<MessagingProvider>,
    transaction_store: Arc<dyn RecordStore>,
    token_store: Arc<dyn RecordStore>,
    fan_in: Arc<dyn FanInSynchronizer>,
    fetcher: Arc<RateLimitedFetcher>,
    transactions: Arc<CacheFirstOrchestrator>,
    tokens: Arc<CacheFirstOrchestrator>,
    finalizer: Arc<dyn RecordFinalizer>,
}

impl FetchflowRuntime {
    /// Connect to the configured infrastructure and assemble every component
    pub async fn bootstrap(config: FetchflowConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;

        let pool = match config.database.database_url() {
            Ok(_) => Some(DatabaseConnection::connect(&config.database).await?.pool().clone()),
            Err(_) if config.messaging.backend == MessagingBackend::InMemory => {
                warn!("no database configured, using in-memory persistence");
                None
            }
            Err(e) => return Err(e.into()),
        };

        let messaging = Arc::new(MessagingProvider::from_config(&config.messaging, pool.clone())?);
        let source = Arc::new(RoutedSource::new(std::time::Duration::from_secs(
            HTTP_REQUEST_TIMEOUT_SECS,
        ))?);
        Self::assemble(config, pool, messaging, source, collaborators).await
    }

    /// Validate configuration and probe the database, broker and stage queues
    pub async fn preflight(config: &FetchflowConfig) -> Result<PreflightReport> {
        config.validate()?;
        let endpoints =
            EndpointPool::from_config(&config.endpoints, &config.circuit_breaker)?.health();

        let connection = match config.database.database_url() {
            Ok(_) => {
                let database = crate::config::DatabaseConfig {
                    run_migrations: false,
                    ..config.database.clone()
                };
                Some(DatabaseConnection::connect(&database).await?)
            }
            Err(_) => None,
        };
        let database = match &connection {
            Some(connection) => Some(connection.health_check().await?),
            None => None,
        };

        let messaging = MessagingProvider::from_config(
            &config.messaging,
            connection.as_ref().map(|c| c.pool().clone()),
        )?;
        let messaging_healthy = messaging.health_check().await?;
        let queues = messaging
            .verify_queues(&config.messaging.queues.stage_queues())
            .await?;

        Ok(PreflightReport {
            backend: config.messaging.backend,
            database,
            messaging_healthy,
            queues,
            endpoints,
        })
    }

    /// Assemble from already constructed infrastructure
    pub async fn assemble(
        config: FetchflowConfig,
        pool: Option<PgPool>,
        messaging: Arc<MessagingProvider>,
        source: Arc<dyn NetworkSource>,
        collaborators: Collaborators,
    ) -> Result<Self> {
        messaging
            .ensure_queues(&config.messaging.queues.stage_queues())
            .await?;

        let (transaction_store, token_store, fan_in): (
            Arc<dyn RecordStore>,
            Arc<dyn RecordStore>,
            Arc<dyn FanInSynchronizer>,
        ) = match &pool {
            Some(pool) => (
                Arc::new(PgRecordStore::new(pool.clone(), ResourceKind::Transaction)),
                Arc::new(PgRecordStore::new(pool.clone(), ResourceKind::Token)),
                Arc::new(PgFanIn::new(pool.clone())),
            ),
            None => (
                Arc::new(InMemoryRecordStore::new(ResourceKind::Transaction)),
                Arc::new(InMemoryRecordStore::new(ResourceKind::Token)),
                Arc::new(InMemoryFanIn::new()),
            ),
        };

        let endpoints = EndpointPool::from_config(&config.endpoints, &config.circuit_breaker)?;
        let fetcher = Arc::new(RateLimitedFetcher::new(
            Arc::new(endpoints),
            source,
            BackoffPolicy::from_config(&config.retry),
        ));

        let known_keys = Arc::new(
            KnownKeySet::new(config.workers.known_keys_capacity).with_static_keys([WRAPPED_SOL_MINT]),
        );
        let queues = &config.messaging.queues;

        let dispatcher = Arc::new(DependencyDispatcher::new(
            Arc::clone(&transaction_store),
            Arc::clone(&token_store),
            Arc::clone(&known_keys),
            Arc::clone(&fan_in),
            Arc::clone(&messaging),
            queues.token_tasks.clone(),
            queues.finalize_tasks.clone(),
        ));
        let transactions = Arc::new(
            CacheFirstOrchestrator::new(
                Arc::clone(&transaction_store),
                Arc::new(TransactionAcquirer::new(Arc::clone(&fetcher))),
            )
            .with_follow_up(dispatcher),
        );

        let chain = Arc::new(FallbackChain::standard(
            Arc::clone(&token_store),
            Arc::clone(&fetcher),
            PlaceholderDetector::from_config(&config.fallback),
        ));
        let tokens = Arc::new(
            CacheFirstOrchestrator::new(
                Arc::clone(&token_store),
                Arc::new(TokenAcquirer::new(Arc::clone(&fetcher), chain)),
            )
            .with_known_keys(known_keys),
        );

        let finalizer: Arc<dyn RecordFinalizer> = Arc::new(TransactionFinalizer::new(
            Arc::clone(&transaction_store),
            collaborators.classifier,
            ClassificationPolicy::from_config(&config.classifier),
            collaborators.parties,
        ));

        info!(
            messaging = messaging.provider_name(),
            persistence = if pool.is_some() { "postgres" } else { "in_memory" },
            endpoints = config.endpoints.len(),
            "runtime assembled"
        );

        Ok(Self {
            config,
            pool,
            messaging,
            transaction_store,
            token_store,
            fan_in,
            fetcher,
            transactions,
            tokens,
            finalizer,
        })
    }

    pub fn config(&self) -> &FetchflowConfig {
        &self.config
    }

    pub fn messaging(&self) -> &Arc<MessagingProvider> {
        &self.messaging
    }

    pub fn transaction_store(&self) -> &Arc<dyn RecordStore> {
        &self.transaction_store
    }

    pub fn token_store(&self) -> &Arc<dyn RecordStore> {
        &self.token_store
    }

    pub fn fan_in(&self) -> &Arc<dyn FanInSynchronizer> {
        &self.fan_in
    }

    pub fn endpoint_health(&self) -> Vec<EndpointHealth> {
        self.fetcher.pool().health()
    }

    /// Request/reply client for interactive callers
    pub async fn rpc_client(&self) -> Result<RpcClient> {
        Ok(RpcClient::connect(Arc::clone(&self.messaging), &self.config.messaging).await?)
    }

    /// Batch lifecycle over transaction keys.
    ///
    /// Batches finalize items themselves, so their orchestrator dispatches
    /// no sub-fetches.
    pub fn transaction_batches(&self) -> BatchLifecycle {
        let (validator, repository): (Arc<dyn CredentialValidator>, Arc<dyn BatchRepository>) =
            match &self.pool {
                Some(pool) if self.config.batch.database_credentials => (
                    Arc::new(PgCredentialValidator::new(pool.clone())),
                    Arc::new(PgBatchRepository::new(pool.clone())),
                ),
                Some(pool) => (
                    Arc::new(StaticCredentials::new(&self.config.batch.credentials)),
                    Arc::new(PgBatchRepository::new(pool.clone())),
                ),
                None => (
                    Arc::new(StaticCredentials::new(&self.config.batch.credentials)),
                    Arc::new(InMemoryBatchRepository::new()),
                ),
            };
        let orchestrator = Arc::new(CacheFirstOrchestrator::new(
            Arc::clone(&self.transaction_store),
            Arc::new(TransactionAcquirer::new(Arc::clone(&self.fetcher))),
        ));
        BatchLifecycle::new(validator, repository, orchestrator)
            .with_finalizer(Arc::clone(&self.finalizer))
    }

    fn consumer<H: MessageHandler>(
        &self,
        handler: H,
        queue: &str,
        prefetch: usize,
    ) -> Result<Arc<QueueConsumer<H>>> {
        let config = ConsumerConfig::new(queue, prefetch)
            .with_poll_interval(self.config.messaging.poll_interval())
            .with_visibility_timeout(self.config.messaging.visibility_timeout());
        Ok(Arc::new(QueueConsumer::new(
            Arc::clone(&self.messaging),
            Arc::new(handler),
            config,
        )?))
    }

    /// Spawn the consumers for `role`
    pub fn start(&self, role: WorkerRole) -> Result<WorkerHandle> {
        let shutdown = CancellationToken::new();
        let mut tasks = JoinSet::new();
        let queues = &self.config.messaging.queues;
        let workers = &self.config.workers;

        if role.runs(WorkerRole::Transactions) {
            let consumer = self.consumer(
                TransactionRequestHandler::new(Arc::clone(&self.transactions)),
                &queues.transaction_requests,
                workers.transaction_prefetch,
            )?;
            tasks.spawn(consumer.run(shutdown.clone()));
        }
        if role.runs(WorkerRole::Tokens) {
            let consumer = self.consumer(
                TokenTaskHandler::new(
                    Arc::clone(&self.tokens),
                    Arc::clone(&self.fan_in),
                    Arc::clone(&self.messaging),
                    queues.finalize_tasks.clone(),
                ),
                &queues.token_tasks,
                workers.token_prefetch,
            )?;
            tasks.spawn(consumer.run(shutdown.clone()));
        }
        if role.runs(WorkerRole::Finalize) {
            let consumer = self.consumer(
                FinalizeTaskHandler::new(Arc::clone(&self.finalizer)),
                &queues.finalize_tasks,
                workers.finalize_prefetch,
            )?;
            tasks.spawn(consumer.run(shutdown.clone()));
        }

        info!(role = ?role, consumers = tasks.len(), "workers started");
        Ok(WorkerHandle {
            shutdown,
            tasks,
            grace: workers.shutdown_grace(),
        })
    }
}

/// Running consumers of one worker process
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: CancellationToken,
    tasks: JoinSet<Result<()>>,
    grace: std::time::Duration,
}

impl WorkerHandle {
    pub fn consumers(&self) -> usize {
        self.tasks.len()
    }

    /// Signal shutdown and wait for in-flight messages to settle
    pub async fn stop(self) -> Result<()> {
        let Self {
            shutdown,
            mut tasks,
            grace,
        } = self;
        shutdown.cancel();
        let drain = async move {
            let mut first_error = None;
            while let Some(joined) = tasks.join_next().await {
                let outcome = joined
                    .map_err(|e| FetchflowError::Internal(format!("consumer task failed: {e}")))
                    .and_then(|r| r);
                if let Err(e) = outcome {
                    warn!(error = %e, "consumer stopped with error");
                    first_error.get_or_insert(e);
                }
            }
            first_error.map_or(Ok(()), Err)
        };
        match tokio::time::timeout(grace, drain).await {
            Ok(result) => result,
            Err(_) => {
                warn!(grace = ?grace, "consumers did not drain before the grace period");
                Err(FetchflowError::Cancelled)
            }
        }
    }
}

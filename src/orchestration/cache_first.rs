//! Cache-first request processing.
//!
//! ```text
//! Received -> CacheCheck -> CacheHit -> Reply
//!                        -> CacheMiss -> NetworkFetch -> Persist -> Reply
//!                                                     -> Failed  -> Reply(error)
//! ```
//!
//! Exactly one `FetchResponse` comes out of every `process` call. Store
//! read errors are treated as misses and store write errors are logged and
//! swallowed, so persistence trouble costs a refetch rather than a failure.
//!
//! Follow-up work is different: a failed follow-up is surfaced by
//! [`CacheFirstOrchestrator::process_with_follow_up`] so queue-driven callers
//! can leave the message for redelivery, and the follow-up gets another
//! chance on the cache hit that redelivery produces.

use async_trait::async_trait;
use chrono::Utc;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::acquirers::{Acquisition, ResourceAcquirer};
use crate::error::Result;
use crate::logging::{log_error, log_fetch_operation};
use crate::models::{Document, FetchRequest, FetchResponse, ResourceKind};
use crate::store::{KnownKeySet, RecordStore, StoredRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    Received,
    CacheCheck,
    CacheHit,
    CacheMiss,
    NetworkFetch,
    Persist,
    Reply,
    Failed,
}

impl fmt::Display for RequestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::CacheCheck => "cache_check",
            Self::CacheHit => "cache_hit",
            Self::CacheMiss => "cache_miss",
            Self::NetworkFetch => "network_fetch",
            Self::Persist => "persist",
            Self::Reply => "reply",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Work triggered by a successful network fetch, after persistence
#[async_trait]
pub trait FetchFollowUp: Send + Sync + fmt::Debug {
    async fn after_network_fetch(&self, request: &FetchRequest, document: &Document) -> Result<()>;

    /// Resume follow-up work that an earlier delivery may not have finished
    async fn after_cache_hit(&self, _request: &FetchRequest) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug)]
pub struct CacheFirstOrchestrator {
    store: Arc<dyn RecordStore>,
    acquirer: Arc<dyn ResourceAcquirer>,
    known_keys: Option<Arc<KnownKeySet>>,
    follow_up: Option<Arc<dyn FetchFollowUp>>,
}

impl CacheFirstOrchestrator {
    pub fn new(store: Arc<dyn RecordStore>, acquirer: Arc<dyn ResourceAcquirer>) -> Self {
        Self {
            store,
            acquirer,
            known_keys: None,
            follow_up: None,
        }
    }

    pub fn with_known_keys(mut self, known_keys: Arc<KnownKeySet>) -> Self {
        self.known_keys = Some(known_keys);
        self
    }

    pub fn with_follow_up(mut self, follow_up: Arc<dyn FetchFollowUp>) -> Self {
        self.follow_up = Some(follow_up);
        self
    }

    pub fn kind(&self) -> ResourceKind {
        self.acquirer.kind()
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    fn stage(&self) -> &'static str {
        match self.kind() {
            ResourceKind::Transaction => "transactions.fetch",
            ResourceKind::Token => "tokens.fetch",
        }
    }

    fn phase(&self, request: &FetchRequest, phase: RequestPhase, details: Option<&str>) {
        let source = match phase {
            RequestPhase::CacheHit => Some("cache"),
            RequestPhase::Persist => Some("network"),
            RequestPhase::Failed => Some("error"),
            _ => None,
        };
        log_fetch_operation(
            self.stage(),
            request.key.as_str(),
            &phase.to_string(),
            source,
            details,
        );
    }

    fn confirm_known(&self, request: &FetchRequest) {
        if let Some(known) = &self.known_keys {
            known.confirm(&request.key);
        }
    }

    async fn cache_check(&self, request: &FetchRequest) -> Option<StoredRecord> {
        match self.store.get_by_key(&request.key, request.mask()).await {
            Ok(found) => found,
            Err(e) => {
                warn!(key = %request.key, error = %e, "cache check failed, treating as miss");
                None
            }
        }
    }

    /// Run one request through cache, network and persistence.
    ///
    /// A failed follow-up is logged; the response is returned regardless.
    pub async fn process(&self, request: &FetchRequest) -> FetchResponse {
        let (response, follow_up) = self.run(request).await;
        if let Err(e) = follow_up {
            log_error(
                "cache_first_orchestrator",
                "follow_up",
                &e.to_string(),
                Some(request.key.as_str()),
            );
        }
        response
    }

    /// Like [`process`](Self::process), but a failed follow-up is returned
    /// instead of the response.
    pub async fn process_with_follow_up(&self, request: &FetchRequest) -> Result<FetchResponse> {
        let (response, follow_up) = self.run(request).await;
        follow_up.map(|()| response)
    }

    #[instrument(skip(self), fields(kind = %self.kind(), key = %request.key))]
    async fn run(&self, request: &FetchRequest) -> (FetchResponse, Result<()>) {
        self.phase(request, RequestPhase::Received, None);
        if request.key.is_blank() {
            self.phase(request, RequestPhase::Failed, Some("blank key"));
            return (
                FetchResponse::error(request.key.clone(), "resource key is blank"),
                Ok(()),
            );
        }

        self.phase(request, RequestPhase::CacheCheck, None);
        if let Some(stored) = self.cache_check(request).await {
            self.confirm_known(request);
            self.phase(request, RequestPhase::CacheHit, None);
            let follow_up = match &self.follow_up {
                Some(follow_up) => follow_up.after_cache_hit(request).await,
                None => Ok(()),
            };
            let provenance = stored.provenance();
            return (
                FetchResponse::from_cache(request.key.clone(), stored.document, provenance),
                follow_up,
            );
        }
        self.phase(request, RequestPhase::CacheMiss, None);

        self.phase(request, RequestPhase::NetworkFetch, None);
        let (document, provenance) = match self.acquirer.acquire(&request.key).await {
            Acquisition::Acquired {
                document,
                provenance,
            } => (document, provenance),
            Acquisition::Failed(reason) => {
                let message = reason.to_string();
                self.phase(request, RequestPhase::Failed, Some(&message));
                return (FetchResponse::error(request.key.clone(), message), Ok(()));
            }
        };

        let indexed_at = Utc::now();
        match self.store.upsert(&request.key, &document).await {
            Ok(()) => {
                self.confirm_known(request);
                self.phase(request, RequestPhase::Persist, None);
            }
            Err(e) => log_error(
                "cache_first_orchestrator",
                "persist",
                &e.to_string(),
                Some(request.key.as_str()),
            ),
        }

        let follow_up = match &self.follow_up {
            Some(follow_up) => follow_up.after_network_fetch(request, &document).await,
            None => Ok(()),
        };

        debug!(key = %request.key, "replying with network result");
        self.phase(request, RequestPhase::Reply, None);
        let response = FetchResponse::from_network(
            request.key.clone(),
            request.mask().project(&document),
            provenance.with_last_indexed(indexed_at),
        );
        (response, follow_up)
    }
}

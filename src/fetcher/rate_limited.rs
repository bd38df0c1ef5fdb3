use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

use super::{BackoffPolicy, FetchOutcome, NetworkSource, OutcomeKind, SourceRequest};
use crate::endpoint::{EndpointId, EndpointPool};
use crate::models::ResolverTag;

/// One network attempt as seen by the fetcher
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    pub endpoint: String,
    pub endpoint_id: EndpointId,
    /// 1-based attempt number on this endpoint
    pub attempt: u32,
    pub outcome: OutcomeKind,
    /// Delay slept after this attempt, if it was retried
    pub backoff: Option<Duration>,
}

/// Result of backoff-retrying a single endpoint
#[derive(Debug, Clone)]
pub struct EndpointFetch {
    pub outcome: FetchOutcome,
    pub attempts: Vec<AttemptRecord>,
}

#[derive(Debug, Clone, Default)]
pub struct FetchTrace {
    pub attempts: Vec<AttemptRecord>,
    /// Endpoints given up on before the final outcome, in order
    pub failed_endpoints: Vec<String>,
}

impl FetchTrace {
    pub fn failed_attempts(&self) -> usize {
        self.attempts
            .iter()
            .filter(|a| a.outcome != OutcomeKind::Found)
            .count()
    }

    pub fn backoff_delays(&self) -> Vec<Duration> {
        self.attempts.iter().filter_map(|a| a.backoff).collect()
    }
}

/// Result of walking the fallback order
#[derive(Debug, Clone)]
pub struct FallbackFetch {
    pub outcome: FetchOutcome,
    pub trace: FetchTrace,
}

pub struct RateLimitedFetcher {
    pool: Arc<EndpointPool>,
    source: Arc<dyn NetworkSource>,
    backoff: BackoffPolicy,
}

impl std::fmt::Debug for RateLimitedFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitedFetcher")
            .field("pool", &self.pool)
            .field("source", &self.source.name())
            .field("backoff", &self.backoff)
            .finish()
    }
}

impl RateLimitedFetcher {
    pub fn new(
        pool: Arc<EndpointPool>,
        source: Arc<dyn NetworkSource>,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            pool,
            source,
            backoff,
        }
    }

    pub fn pool(&self) -> &Arc<EndpointPool> {
        &self.pool
    }

    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    /// Fetch from one endpoint, retrying rate limits and transport errors
    /// with exponential backoff up to the attempt cap.
    #[instrument(skip(self), fields(key = %request.key, operation = %request.operation, endpoint = %endpoint))]
    pub async fn fetch(&self, request: &SourceRequest, endpoint: EndpointId) -> EndpointFetch {
        let name = self.pool.name(endpoint);
        let mut attempts = Vec::new();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let outcome = self.attempt_once(request, endpoint).await;
            let kind = outcome.kind();

            if !outcome.is_retryable() {
                self.pool.record_success(endpoint);
                attempts.push(AttemptRecord {
                    endpoint: name.clone(),
                    endpoint_id: endpoint,
                    attempt,
                    outcome: kind,
                    backoff: None,
                });
                return EndpointFetch {
                    outcome: self.stamp(outcome, &name),
                    attempts,
                };
            }

            if attempt >= self.backoff.max_attempts {
                self.pool.record_failure(endpoint);
                error!(
                    endpoint = %name,
                    attempt,
                    outcome = %kind,
                    "endpoint exhausted retries; yielding to fallback"
                );
                attempts.push(AttemptRecord {
                    endpoint: name.clone(),
                    endpoint_id: endpoint,
                    attempt,
                    outcome: kind,
                    backoff: None,
                });
                return EndpointFetch { outcome, attempts };
            }

            let mut delay = self.backoff.delay_for_retry(attempt);
            if let FetchOutcome::RateLimited {
                retry_after: Some(hint),
            } = &outcome
            {
                delay = delay.max((*hint).min(self.backoff.max_delay));
            }
            warn!(
                endpoint = %name,
                attempt,
                outcome = %kind,
                backoff_ms = delay.as_millis() as u64,
                "fetch failed; retrying after backoff"
            );
            attempts.push(AttemptRecord {
                endpoint: name.clone(),
                endpoint_id: endpoint,
                attempt,
                outcome: kind,
                backoff: Some(delay),
            });
            tokio::time::sleep(delay).await;
        }
    }

    /// Fetch trying every endpoint of the request's kind in fallback order,
    /// starting from the round-robin primary.
    ///
    /// `NotFound` is not retried on the same endpoint but does move on to
    /// the next one. If no endpoint finds the resource the final outcome is
    /// `NotFound` when any endpoint said so, otherwise the last failure.
    #[instrument(skip(self), fields(key = %request.key, operation = %request.operation))]
    pub async fn fetch_with_fallback(&self, request: &SourceRequest) -> FallbackFetch {
        let kind = request.endpoint_kind();
        let start = self.pool.next_primary(kind);
        let order = self.pool.fallback_order(kind, start);
        let mut trace = FetchTrace::default();

        if order.is_empty() {
            warn!(%kind, "no endpoints configured for operation");
            return FallbackFetch {
                outcome: FetchOutcome::transport(format!("no {kind} endpoints configured")),
                trace,
            };
        }

        let mut saw_not_found = false;
        let mut last = FetchOutcome::transport("no endpoint attempted");
        for endpoint in order {
            let result = self.fetch(request, endpoint).await;
            trace.attempts.extend(result.attempts);
            if result.outcome.is_found() {
                debug!(
                    endpoint = %self.pool.name(endpoint),
                    failed_endpoints = trace.failed_endpoints.len(),
                    "fetch succeeded"
                );
                return FallbackFetch {
                    outcome: result.outcome,
                    trace,
                };
            }
            saw_not_found |= result.outcome == FetchOutcome::NotFound;
            trace.failed_endpoints.push(self.pool.name(endpoint));
            last = result.outcome;
        }

        let outcome = if saw_not_found {
            FetchOutcome::NotFound
        } else {
            last
        };
        FallbackFetch { outcome, trace }
    }

    async fn attempt_once(&self, request: &SourceRequest, endpoint: EndpointId) -> FetchOutcome {
        let permit = match self.pool.acquire(endpoint).await {
            Ok(permit) => permit,
            Err(e) => return FetchOutcome::transport(e.to_string()),
        };
        if let Err(e) = self.pool.throttle(endpoint).await {
            return FetchOutcome::transport(e.to_string());
        }
        let state = match self.pool.snapshot(endpoint) {
            Ok(state) => state,
            Err(e) => return FetchOutcome::transport(e.to_string()),
        };
        let outcome = self.source.fetch(&state, request).await;
        drop(permit);
        outcome
    }

    fn stamp(&self, outcome: FetchOutcome, endpoint: &str) -> FetchOutcome {
        match outcome {
            FetchOutcome::Found {
                payload,
                mut provenance,
            } => {
                if provenance.endpoint.is_none() {
                    provenance.endpoint = Some(endpoint.to_string());
                }
                if provenance.resolver.is_none() {
                    provenance.resolver = Some(ResolverTag::PrimaryNetwork);
                }
                FetchOutcome::Found {
                    payload,
                    provenance,
                }
            }
            other => other,
        }
    }
}

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, trace};

use super::{EndpointId, EndpointKind, EndpointState};
use crate::config::{CircuitBreakerConfig, EndpointConfig};
use crate::error::{FetchflowError, Result};
use crate::resilience::{CircuitBreaker, CircuitBreakerMetrics, CircuitState};

struct EndpointSlot {
    state: Mutex<EndpointState>,
    permits: Arc<Semaphore>,
    breaker: CircuitBreaker,
}

/// RAII concurrency slot for one endpoint.
///
/// Owns an `Arc` to the semaphore so it can be held across awaits; the slot
/// is released on drop.
pub struct EndpointPermit {
    endpoint: EndpointId,
    _permit: OwnedSemaphorePermit,
    semaphore: Arc<Semaphore>,
}

impl EndpointPermit {
    pub fn endpoint(&self) -> EndpointId {
        self.endpoint
    }
}

impl Drop for EndpointPermit {
    fn drop(&mut self) {
        trace!(
            endpoint = %self.endpoint,
            available_permits = self.semaphore.available_permits() + 1,
            "endpoint permit released"
        );
    }
}

/// Breaker view of one endpoint, for health reporting
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointHealth {
    pub name: String,
    pub kind: EndpointKind,
    pub circuit: CircuitState,
    pub metrics: CircuitBreakerMetrics,
}

/// Ordered set of independently rate-limited endpoints
pub struct EndpointPool {
    slots: Vec<EndpointSlot>,
    primary_cursor: AtomicUsize,
    metadata_cursor: AtomicUsize,
}

impl std::fmt::Debug for EndpointPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointPool")
            .field("endpoints", &self.slots.len())
            .finish()
    }
}

impl EndpointPool {
    pub fn from_config(
        endpoints: &[EndpointConfig],
        breaker: &CircuitBreakerConfig,
    ) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(FetchflowError::ConfigurationError(
                "at least one endpoint must be configured".to_string(),
            ));
        }
        let slots = endpoints
            .iter()
            .map(|config| {
                if config.max_concurrent == 0 {
                    return Err(FetchflowError::ConfigurationError(format!(
                        "endpoint {} has zero concurrency",
                        config.name
                    )));
                }
                Ok(EndpointSlot {
                    state: Mutex::new(EndpointState::from_config(config)),
                    permits: Arc::new(Semaphore::new(config.max_concurrent)),
                    breaker: CircuitBreaker::new(config.name.clone(), breaker.clone()),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(endpoints = slots.len(), "Endpoint pool initialized");
        Ok(Self {
            slots,
            primary_cursor: AtomicUsize::new(0),
            metadata_cursor: AtomicUsize::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn slot(&self, id: EndpointId) -> Result<&EndpointSlot> {
        self.slots
            .get(id.0)
            .ok_or_else(|| FetchflowError::EndpointError(format!("unknown endpoint {id}")))
    }

    /// Endpoint ids of one kind, in configured order
    pub fn ids_of_kind(&self, kind: EndpointKind) -> Vec<EndpointId> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.state.lock().kind == kind)
            .map(|(index, _)| EndpointId(index))
            .collect()
    }

    /// Wait for a concurrency slot on `id`
    pub async fn acquire(&self, id: EndpointId) -> Result<EndpointPermit> {
        let slot = self.slot(id)?;
        let semaphore = Arc::clone(&slot.permits);
        let permit = Arc::clone(&semaphore)
            .acquire_owned()
            .await
            .map_err(|_| FetchflowError::EndpointError(format!("endpoint {id} is closed")))?;
        Ok(EndpointPermit {
            endpoint: id,
            _permit: permit,
            semaphore,
        })
    }

    /// Enforce the endpoint's minimum interval, returning how long we slept.
    ///
    /// The slot is computed and committed under the endpoint lock before
    /// sleeping, so concurrent callers queue up behind each other instead of
    /// both observing an idle endpoint.
    pub async fn throttle(&self, id: EndpointId) -> Result<Duration> {
        let slot = self.slot(id)?;
        let now = Instant::now();
        let scheduled = slot.state.lock().reserve_slot(now);
        let wait = scheduled.saturating_duration_since(now);
        if !wait.is_zero() {
            trace!(endpoint = %id, wait_ms = wait.as_millis() as u64, "throttling request");
            tokio::time::sleep_until(scheduled).await;
        }
        Ok(wait)
    }

    /// Round-robin choice among endpoints of `kind`
    pub fn next_primary(&self, kind: EndpointKind) -> Option<EndpointId> {
        let ids = self.ids_of_kind(kind);
        if ids.is_empty() {
            return None;
        }
        let cursor = match kind {
            EndpointKind::PrimaryRpc => &self.primary_cursor,
            EndpointKind::MetadataApi => &self.metadata_cursor,
        };
        let turn = cursor.fetch_add(1, Ordering::Relaxed);
        Some(ids[turn % ids.len()])
    }

    /// Sequential fallback order for `kind`, starting at `start`.
    ///
    /// Endpoints whose breaker is open are skipped; when every endpoint is
    /// open the full order is returned so requests are still attempted.
    pub fn fallback_order(&self, kind: EndpointKind, start: Option<EndpointId>) -> Vec<EndpointId> {
        let mut ids = self.ids_of_kind(kind);
        if let Some(position) = start.and_then(|s| ids.iter().position(|id| *id == s)) {
            ids.rotate_left(position);
        }
        let healthy: Vec<EndpointId> = ids
            .iter()
            .copied()
            .filter(|id| self.slots[id.0].breaker.is_call_permitted())
            .collect();
        if healthy.is_empty() {
            debug!(%kind, "all endpoints are open, trying every endpoint");
            ids
        } else {
            healthy
        }
    }

    pub fn snapshot(&self, id: EndpointId) -> Result<EndpointState> {
        Ok(self.slot(id)?.state.lock().clone())
    }

    pub fn name(&self, id: EndpointId) -> String {
        self.slots
            .get(id.0)
            .map(|slot| slot.state.lock().name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    pub fn available_permits(&self, id: EndpointId) -> usize {
        self.slots
            .get(id.0)
            .map(|slot| slot.permits.available_permits())
            .unwrap_or(0)
    }

    pub fn circuit_state(&self, id: EndpointId) -> Option<CircuitState> {
        self.slots.get(id.0).map(|slot| slot.breaker.state())
    }

    /// Breaker state and counters of every endpoint, in configured order
    pub fn health(&self) -> Vec<EndpointHealth> {
        self.slots
            .iter()
            .map(|slot| {
                let (name, kind) = {
                    let state = slot.state.lock();
                    (state.name.clone(), state.kind)
                };
                EndpointHealth {
                    name,
                    kind,
                    circuit: slot.breaker.state(),
                    metrics: slot.breaker.metrics(),
                }
            })
            .collect()
    }

    pub fn record_success(&self, id: EndpointId) {
        if let Some(slot) = self.slots.get(id.0) {
            slot.breaker.record_success();
        }
    }

    pub fn record_failure(&self, id: EndpointId) {
        if let Some(slot) = self.slots.get(id.0) {
            slot.breaker.record_failure();
        }
    }
}

use std::time::Duration;
use tokio::time::Instant;

use super::EndpointKind;
use crate::config::EndpointConfig;

/// Mutable bookkeeping for one endpoint.
///
/// Owned by the [`EndpointPool`](super::EndpointPool) and only mutated
/// under that endpoint's lock. Callers get clones via `snapshot`.
#[derive(Debug, Clone)]
pub struct EndpointState {
    pub name: String,
    pub url: String,
    pub kind: EndpointKind,
    pub max_concurrent: usize,
    pub min_interval: Duration,
    /// Slot time of the most recently reserved request; may lie in the
    /// future while a throttled caller is still sleeping toward it
    pub last_request_at: Option<Instant>,
    pub requests_issued: u64,
}

impl EndpointState {
    pub fn from_config(config: &EndpointConfig) -> Self {
        Self {
            name: config.name.clone(),
            url: config.url.clone(),
            kind: config.kind,
            max_concurrent: config.max_concurrent,
            min_interval: config.min_interval(),
            last_request_at: None,
            requests_issued: 0,
        }
    }

    /// Reserve the next request slot at or after `now` and commit it.
    ///
    /// Returns the reserved instant. The caller must sleep until then.
    pub(crate) fn reserve_slot(&mut self, now: Instant) -> Instant {
        let scheduled = match self.last_request_at {
            Some(last) => (last + self.min_interval).max(now),
            None => now,
        };
        self.last_request_at = Some(scheduled);
        self.requests_issued += 1;
        scheduled
    }
}

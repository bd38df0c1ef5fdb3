use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

use super::{FanInStatus, FanInSynchronizer};
use crate::error::Result;
use crate::models::ResourceKey;

/// Single-process counters; one lock makes decrement, check and delete atomic
#[derive(Debug, Default)]
pub struct InMemoryFanIn {
    counters: Mutex<HashMap<ResourceKey, u32>>,
}

impl InMemoryFanIn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracked(&self) -> usize {
        self.counters.lock().len()
    }
}

#[async_trait]
impl FanInSynchronizer for InMemoryFanIn {
    async fn register(&self, parent: &ResourceKey, count: u32) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        let mut counters = self.counters.lock();
        let remaining = counters.entry(parent.clone()).or_insert(0);
        *remaining = remaining.saturating_add(count);
        debug!(parent = %parent, remaining = *remaining, "fan-in registered");
        Ok(())
    }

    async fn complete(&self, parent: &ResourceKey) -> Result<FanInStatus> {
        let mut counters = self.counters.lock();
        let Some(remaining) = counters.get_mut(parent) else {
            return Ok(FanInStatus::Untracked);
        };
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            counters.remove(parent);
            debug!(parent = %parent, "fan-in satisfied");
            Ok(FanInStatus::Satisfied)
        } else {
            Ok(FanInStatus::StillPending(*remaining))
        }
    }

    async fn pending(&self, parent: &ResourceKey) -> Result<Option<u32>> {
        Ok(self.counters.lock().get(parent).copied())
    }
}

use dashmap::DashSet;

use crate::models::ResourceKey;

/// Advisory set of keys confirmed to exist in persistence.
///
/// A miss means "look it up", never "absent". Keys are only inserted after
/// the store confirmed them, so a hit is always correct. Once `capacity`
/// keys are held new confirmations are dropped.
#[derive(Debug)]
pub struct KnownKeySet {
    keys: DashSet<ResourceKey>,
    capacity: usize,
}

impl KnownKeySet {
    pub fn new(capacity: usize) -> Self {
        Self {
            keys: DashSet::new(),
            capacity,
        }
    }

    /// Seed with keys that never need fetching (wrapped SOL, program ids)
    pub fn with_static_keys<I, K>(self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<ResourceKey>,
    {
        for key in keys {
            self.keys.insert(key.into());
        }
        self
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.keys.contains(key)
    }

    /// Record a key the store has confirmed
    pub fn confirm(&self, key: &ResourceKey) {
        if self.keys.len() < self.capacity && !self.keys.contains(key) {
            self.keys.insert(key.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::{RecordStore, StoreError, StoredRecord};
use crate::models::{Document, FieldMask, ResourceKey, ResourceKind};

/// `dashmap`-backed store for tests and single-process runs
#[derive(Debug)]
pub struct InMemoryRecordStore {
    kind: ResourceKind,
    records: DashMap<ResourceKey, (Document, DateTime<Utc>)>,
}

impl InMemoryRecordStore {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            records: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Full stored document, bypassing projection
    pub fn raw(&self, key: &ResourceKey) -> Option<Document> {
        self.records.get(key).map(|entry| entry.value().0.clone())
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    fn kind(&self) -> ResourceKind {
        self.kind
    }

    async fn get_by_key(
        &self,
        key: &ResourceKey,
        mask: FieldMask,
    ) -> Result<Option<StoredRecord>, StoreError> {
        Ok(self.records.get(key).map(|entry| {
            let (document, indexed_at) = entry.value();
            StoredRecord {
                key: key.clone(),
                document: mask.project(document),
                indexed_at: *indexed_at,
            }
        }))
    }

    async fn exists(&self, key: &ResourceKey) -> Result<bool, StoreError> {
        Ok(self.records.contains_key(key))
    }

    async fn upsert(&self, key: &ResourceKey, document: &Document) -> Result<(), StoreError> {
        self.records.insert(key.clone(), (document.clone(), Utc::now()));
        Ok(())
    }

    async fn merge_section(
        &self,
        key: &ResourceKey,
        section: &str,
        value: &Document,
    ) -> Result<bool, StoreError> {
        let Some(mut entry) = self.records.get_mut(key) else {
            return Ok(false);
        };
        let object = entry
            .value_mut()
            .0
            .as_object_mut()
            .ok_or_else(|| StoreError::Malformed(format!("{key} is not an object")))?;
        object.insert(section.to_string(), value.clone());
        Ok(true)
    }
}

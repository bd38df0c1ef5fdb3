//! # Data Model
//!
//! Request/response shapes that travel over queues, plus the typed record
//! layouts persisted by the record store.

pub mod field_mask;
pub mod records;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use field_mask::FieldMask;
pub use records::{
    InstructionRecord, RecordRef, TokenBalanceDelta, TokenRecord, TransactionRecord,
};

use crate::constants::priority;

/// Opaque structured document as stored and replied
pub type Document = serde_json::Value;

/// Natural unique key of a resource: a transaction signature or a mint address
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKey(String);

impl ResourceKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for ResourceKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl AsRef<str> for ResourceKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Which record family a key belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Transaction,
    Token,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transaction => write!(f, "transaction"),
            Self::Token => write!(f, "token"),
        }
    }
}

/// One unit of work. Immutable once published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRequest {
    pub key: ResourceKey,
    /// 0-255, higher is delivered sooner; advisory only
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask: Option<FieldMask>,
    /// Set on sub-fetches dispatched on behalf of a parent transaction
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "parentKey")]
    pub parent_key: Option<ResourceKey>,
}

fn default_priority() -> u8 {
    priority::DEFAULT
}

impl FetchRequest {
    pub fn new(key: impl Into<ResourceKey>) -> Self {
        Self {
            key: key.into(),
            priority: priority::DEFAULT,
            mask: None,
            parent_key: None,
        }
    }

    /// A fire-and-forget dependency fetch tied to a parent key
    pub fn sub_fetch(key: impl Into<ResourceKey>, parent: ResourceKey) -> Self {
        Self {
            key: key.into(),
            priority: priority::SUB_FETCH,
            mask: Some(FieldMask::CORE),
            parent_key: Some(parent),
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_mask(mut self, mask: FieldMask) -> Self {
        self.mask = Some(mask);
        self
    }

    /// Effective mask; absent means the full record
    pub fn mask(&self) -> FieldMask {
        self.mask.unwrap_or(FieldMask::ALL)
    }
}

/// Where a response payload came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSource {
    Cache,
    Network,
    Error,
}

impl fmt::Display for ResponseSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cache => write!(f, "cache"),
            Self::Network => write!(f, "network"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Which resolver produced a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolverTag {
    /// The primary network source answered directly
    PrimaryNetwork,
    /// Local persistent cache lookup by key
    LocalCache,
    /// Secondary network API lookup by key
    DirectLookup,
    /// Secondary lookup through a key correlated via the creation event
    DerivedLookup,
}

impl fmt::Display for ResolverTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PrimaryNetwork => write!(f, "primary_network"),
            Self::LocalCache => write!(f, "local_cache"),
            Self::DirectLookup => write!(f, "direct_lookup"),
            Self::DerivedLookup => write!(f, "derived_lookup"),
        }
    }
}

/// Metadata recording which source produced a result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_indexed: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolver: Option<ResolverTag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derived_from: Option<ResourceKey>,
}

impl Provenance {
    pub fn indexed_at(at: DateTime<Utc>) -> Self {
        Self {
            last_indexed: Some(at),
            ..Self::default()
        }
    }

    pub fn from_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            resolver: Some(ResolverTag::PrimaryNetwork),
            ..Self::default()
        }
    }

    pub fn with_resolver(mut self, resolver: ResolverTag) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_derived_from(mut self, key: ResourceKey) -> Self {
        self.derived_from = Some(key);
        self
    }

    pub fn with_last_indexed(mut self, at: DateTime<Utc>) -> Self {
        self.last_indexed = Some(at);
        self
    }
}

/// Result of processing a [`FetchRequest`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchResponse {
    pub key: ResourceKey,
    pub success: bool,
    pub source: ResponseSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Document>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FetchResponse {
    pub fn from_cache(key: ResourceKey, payload: Document, provenance: Provenance) -> Self {
        Self {
            key,
            success: true,
            source: ResponseSource::Cache,
            payload: Some(payload),
            provenance: Some(provenance),
            error: None,
        }
    }

    pub fn from_network(key: ResourceKey, payload: Document, provenance: Provenance) -> Self {
        Self {
            key,
            success: true,
            source: ResponseSource::Network,
            payload: Some(payload),
            provenance: Some(provenance),
            error: None,
        }
    }

    pub fn error(key: ResourceKey, message: impl Into<String>) -> Self {
        Self {
            key,
            success: false,
            source: ResponseSource::Error,
            payload: None,
            provenance: None,
            error: Some(message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let parsed: FetchRequest = serde_json::from_value(json!({
            "key": "5sig",
            "priority": 7,
            "mask": 3,
            "parentKey": "parent"
        }))
        .unwrap();
        assert_eq!(parsed.key.as_str(), "5sig");
        assert_eq!(parsed.priority, 7);
        assert_eq!(parsed.mask(), FieldMask::from_bits(3));
        assert_eq!(parsed.parent_key, Some(ResourceKey::from("parent")));

        let minimal: FetchRequest = serde_json::from_value(json!({"key": "k"})).unwrap();
        assert_eq!(minimal.priority, priority::DEFAULT);
        assert_eq!(minimal.mask(), FieldMask::ALL);
        assert!(minimal.parent_key.is_none());
    }

    #[test]
    fn test_response_wire_shape() {
        let response = FetchResponse::error(ResourceKey::from("k"), "unresolved");
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(
            value,
            json!({"key": "k", "success": false, "source": "error", "error": "unresolved"})
        );
    }

    #[test]
    fn test_sub_fetch_carries_parent() {
        let request = FetchRequest::sub_fetch("mint", ResourceKey::from("sig"));
        assert_eq!(request.parent_key.as_ref().map(|k| k.as_str()), Some("sig"));
        assert_eq!(request.priority, priority::SUB_FETCH);
    }
}

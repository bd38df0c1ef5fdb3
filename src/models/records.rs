//! Typed record layouts persisted by the record store.
//!
//! Records are stored as sectioned documents (`core`, `accounts`,
//! `instructions`, `token_balances`, plus `classification` and `parties`
//! written by the finalize stage) so that [`FieldMask`](super::FieldMask)
//! can reconstruct subsets.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map};
use std::collections::BTreeSet;

use super::{Document, ResourceKey, ResourceKind};
use crate::constants::WRAPPED_SOL_MINT;

/// Reference to a persisted record, filled into batch queue items once resolved
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordRef {
    pub kind: ResourceKind,
    pub key: ResourceKey,
}

impl RecordRef {
    pub fn new(kind: ResourceKind, key: ResourceKey) -> Self {
        Self { kind, key }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionRecord {
    pub program_id: String,
    #[serde(default)]
    pub accounts: Vec<String>,
    /// Encoded instruction payload, kept opaque
    #[serde(default)]
    pub data: String,
}

/// Change of one owner's balance of one mint across a transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBalanceDelta {
    pub mint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub pre_amount: f64,
    pub post_amount: f64,
}

impl TokenBalanceDelta {
    pub fn delta(&self) -> f64 {
        self.post_amount - self.pre_amount
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionCore {
    pub signature: String,
    pub slot: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_time: Option<i64>,
    pub fee: u64,
    pub success: bool,
    #[serde(default)]
    pub mints: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub signature: String,
    pub slot: u64,
    pub block_time: Option<i64>,
    pub fee: u64,
    pub success: bool,
    pub account_keys: Vec<String>,
    pub instructions: Vec<InstructionRecord>,
    pub token_balances: Vec<TokenBalanceDelta>,
}

impl TransactionRecord {
    /// Mints referenced by balance changes, deduplicated, wrapped SOL excluded
    pub fn referenced_mints(&self) -> Vec<ResourceKey> {
        self.token_balances
            .iter()
            .map(|b| b.mint.as_str())
            .filter(|mint| !mint.is_empty() && *mint != WRAPPED_SOL_MINT)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(ResourceKey::from)
            .collect()
    }

    pub fn to_document(&self) -> Document {
        let core = TransactionCore {
            signature: self.signature.clone(),
            slot: self.slot,
            block_time: self.block_time,
            fee: self.fee,
            success: self.success,
            mints: self
                .referenced_mints()
                .into_iter()
                .map(|k| k.as_str().to_string())
                .collect(),
        };
        json!({
            "core": core,
            "accounts": self.account_keys,
            "instructions": self.instructions,
            "token_balances": self.token_balances,
        })
    }

    /// Rebuild from a full document; absent optional sections read as empty
    pub fn from_document(document: &Document) -> Result<Self, serde_json::Error> {
        let core: TransactionCore = serde_json::from_value(section(document, "core"))?;
        let account_keys = optional_section(document, "accounts")?;
        let instructions = optional_section(document, "instructions")?;
        let token_balances = optional_section(document, "token_balances")?;
        Ok(Self {
            signature: core.signature,
            slot: core.slot,
            block_time: core.block_time,
            fee: core.fee,
            success: core.success,
            account_keys,
            instructions,
            token_balances,
        })
    }
}

/// Mints listed in the `core` section of a stored transaction document
pub fn document_mints(document: &Document) -> Vec<ResourceKey> {
    document
        .get("core")
        .and_then(|core| core.get("mints"))
        .and_then(|mints| mints.as_array())
        .map(|mints| {
            mints
                .iter()
                .filter_map(|m| m.as_str())
                .map(ResourceKey::from)
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub mint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimals: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

impl TokenRecord {
    pub fn new(mint: impl Into<String>) -> Self {
        Self {
            mint: mint.into(),
            name: None,
            symbol: None,
            decimals: None,
            uri: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    pub fn with_decimals(mut self, decimals: u8) -> Self {
        self.decimals = Some(decimals);
        self
    }

    pub fn to_document(&self) -> Document {
        json!({ "core": self })
    }

    pub fn from_document(document: &Document) -> Result<Self, serde_json::Error> {
        serde_json::from_value(section(document, "core"))
    }
}

fn section(document: &Document, name: &str) -> Document {
    document
        .get(name)
        .cloned()
        .unwrap_or_else(|| Document::Object(Map::new()))
}

fn optional_section<T: serde::de::DeserializeOwned + Default>(
    document: &Document,
    name: &str,
) -> Result<T, serde_json::Error> {
    match document.get(name) {
        Some(value) if !value.is_null() => serde_json::from_value(value.clone()),
        _ => Ok(T::default()),
    }
}

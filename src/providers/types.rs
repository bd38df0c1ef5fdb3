//! Typed intermediate representations of provider responses.
//!
//! Every upstream payload is deserialized into one of these shapes and
//! validated through `TryFrom` before it becomes a record. Absent fields are
//! explicit `Option`s; a payload that violates the shape is a
//! [`ProviderShapeError`] which the sources report as a transport error.

use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::models::{InstructionRecord, TokenBalanceDelta, TokenRecord, TransactionRecord};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderShapeError {
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("account index {index} out of range ({len} keys)")]
    AccountIndexOutOfRange { index: usize, len: usize },
    #[error("invalid amount for mint {mint}: {value}")]
    InvalidAmount { mint: String, value: String },
}

/// JSON-RPC 2.0 response envelope
#[derive(Debug, Deserialize)]
pub struct RpcResponse<T> {
    pub result: Option<T>,
    #[serde(default)]
    pub error: Option<RpcErrorBody>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcErrorBody {
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

impl RpcErrorBody {
    pub fn is_rate_limited(&self) -> bool {
        self.code == 429 || self.message.to_ascii_lowercase().contains("rate limit")
    }

    pub fn is_not_found(&self) -> bool {
        self.message.to_ascii_lowercase().contains("not found")
    }
}

// getTransaction (encoding = "json")

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcTransaction {
    pub slot: u64,
    #[serde(default)]
    pub block_time: Option<i64>,
    pub transaction: RpcTransactionBody,
    #[serde(default)]
    pub meta: Option<RpcTransactionMeta>,
}

#[derive(Debug, Deserialize)]
pub struct RpcTransactionBody {
    #[serde(default)]
    pub signatures: Vec<String>,
    pub message: RpcMessage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcMessage {
    #[serde(default)]
    pub account_keys: Vec<RpcAccountKey>,
    #[serde(default)]
    pub instructions: Vec<RpcInstruction>,
}

/// Plain string under `json` encoding, object under `jsonParsed`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RpcAccountKey {
    Plain(String),
    Parsed { pubkey: String },
}

impl RpcAccountKey {
    pub fn pubkey(&self) -> &str {
        match self {
            Self::Plain(key) => key,
            Self::Parsed { pubkey } => pubkey,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcInstruction {
    pub program_id_index: usize,
    #[serde(default)]
    pub accounts: Vec<usize>,
    #[serde(default)]
    pub data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcTransactionMeta {
    #[serde(default)]
    pub fee: u64,
    #[serde(default)]
    pub err: Option<serde_json::Value>,
    #[serde(default)]
    pub pre_token_balances: Vec<RpcTokenBalance>,
    #[serde(default)]
    pub post_token_balances: Vec<RpcTokenBalance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcTokenBalance {
    pub account_index: usize,
    pub mint: String,
    #[serde(default)]
    pub owner: Option<String>,
    pub ui_token_amount: RpcUiTokenAmount,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcUiTokenAmount {
    #[serde(default)]
    pub ui_amount_string: Option<String>,
    #[serde(default)]
    pub ui_amount: Option<f64>,
}

impl RpcTokenBalance {
    fn amount(&self) -> Result<f64, ProviderShapeError> {
        match (&self.ui_token_amount.ui_amount_string, self.ui_token_amount.ui_amount) {
            (Some(text), _) => text.parse().map_err(|_| ProviderShapeError::InvalidAmount {
                mint: self.mint.clone(),
                value: text.clone(),
            }),
            (None, Some(amount)) => Ok(amount),
            (None, None) => Ok(0.0),
        }
    }
}

impl TryFrom<RpcTransaction> for TransactionRecord {
    type Error = ProviderShapeError;

    fn try_from(raw: RpcTransaction) -> Result<Self, Self::Error> {
        let signature = raw
            .transaction
            .signatures
            .first()
            .cloned()
            .ok_or(ProviderShapeError::MissingField("transaction.signatures"))?;
        let keys: Vec<String> = raw
            .transaction
            .message
            .account_keys
            .iter()
            .map(|k| k.pubkey().to_string())
            .collect();
        let key_at = |index: usize| {
            keys.get(index)
                .cloned()
                .ok_or(ProviderShapeError::AccountIndexOutOfRange {
                    index,
                    len: keys.len(),
                })
        };

        let instructions = raw
            .transaction
            .message
            .instructions
            .iter()
            .map(|ix| {
                Ok(InstructionRecord {
                    program_id: key_at(ix.program_id_index)?,
                    accounts: ix
                        .accounts
                        .iter()
                        .map(|i| key_at(*i))
                        .collect::<Result<_, _>>()?,
                    data: ix.data.clone(),
                })
            })
            .collect::<Result<Vec<_>, ProviderShapeError>>()?;

        let meta = raw.meta;
        let (fee, success, token_balances) = match meta {
            Some(meta) => {
                let deltas = balance_deltas(&meta.pre_token_balances, &meta.post_token_balances)?;
                (meta.fee, meta.err.is_none(), deltas)
            }
            None => (0, true, Vec::new()),
        };

        Ok(TransactionRecord {
            signature,
            slot: raw.slot,
            block_time: raw.block_time,
            fee,
            success,
            account_keys: keys,
            instructions,
            token_balances,
        })
    }
}

/// Pair pre/post balances by (account index, mint); a side that is absent reads as zero
fn balance_deltas(
    pre: &[RpcTokenBalance],
    post: &[RpcTokenBalance],
) -> Result<Vec<TokenBalanceDelta>, ProviderShapeError> {
    let mut joined: BTreeMap<(usize, String), TokenBalanceDelta> = BTreeMap::new();
    for balance in pre {
        let entry = joined
            .entry((balance.account_index, balance.mint.clone()))
            .or_insert_with(|| empty_delta(balance));
        entry.pre_amount = balance.amount()?;
    }
    for balance in post {
        let entry = joined
            .entry((balance.account_index, balance.mint.clone()))
            .or_insert_with(|| empty_delta(balance));
        entry.post_amount = balance.amount()?;
        if entry.owner.is_none() {
            entry.owner = balance.owner.clone();
        }
    }
    Ok(joined.into_values().collect())
}

fn empty_delta(balance: &RpcTokenBalance) -> TokenBalanceDelta {
    TokenBalanceDelta {
        mint: balance.mint.clone(),
        owner: balance.owner.clone(),
        pre_amount: 0.0,
        post_amount: 0.0,
    }
}

// getAsset (DAS)

#[derive(Debug, Deserialize)]
pub struct RpcAsset {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub content: Option<RpcAssetContent>,
    #[serde(default)]
    pub token_info: Option<RpcAssetTokenInfo>,
}

#[derive(Debug, Deserialize)]
pub struct RpcAssetContent {
    #[serde(default)]
    pub json_uri: Option<String>,
    #[serde(default)]
    pub metadata: Option<RpcAssetMetadata>,
}

#[derive(Debug, Deserialize)]
pub struct RpcAssetMetadata {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RpcAssetTokenInfo {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub decimals: Option<u8>,
}

impl TryFrom<RpcAsset> for TokenRecord {
    type Error = ProviderShapeError;

    fn try_from(raw: RpcAsset) -> Result<Self, Self::Error> {
        let mint = raw
            .id
            .filter(|id| !id.is_empty())
            .ok_or(ProviderShapeError::MissingField("id"))?;
        let (name, metadata_symbol, uri) = match raw.content {
            Some(content) => {
                let (name, symbol) = content
                    .metadata
                    .map(|m| (m.name, m.symbol))
                    .unwrap_or((None, None));
                (name, symbol, content.json_uri)
            }
            None => (None, None, None),
        };
        let (info_symbol, decimals) = raw
            .token_info
            .map(|info| (info.symbol, info.decimals))
            .unwrap_or((None, None));

        Ok(TokenRecord {
            mint,
            name: non_empty(name),
            symbol: non_empty(metadata_symbol).or_else(|| non_empty(info_symbol)),
            decimals,
            uri: non_empty(uri),
        })
    }
}

// getSignaturesForAddress

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcSignatureInfo {
    pub signature: String,
    #[serde(default)]
    pub slot: u64,
    #[serde(default)]
    pub block_time: Option<i64>,
}

/// The oldest entry of a newest-first signature page
pub fn oldest_signature(page: &[RpcSignatureInfo]) -> Option<&RpcSignatureInfo> {
    page.iter().min_by_key(|info| info.slot)
}

// Secondary metadata REST API

#[derive(Debug, Deserialize)]
pub struct MetadataApiToken {
    #[serde(default, alias = "address")]
    pub mint: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub decimals: Option<u8>,
    #[serde(default, alias = "logoURI")]
    pub uri: Option<String>,
}

impl MetadataApiToken {
    /// Providers sometimes omit the address; the requested mint is used then
    pub fn into_record(self, requested_mint: &str) -> TokenRecord {
        TokenRecord {
            mint: non_empty(self.mint).unwrap_or_else(|| requested_mint.to_string()),
            name: non_empty(self.name),
            symbol: non_empty(self.symbol),
            decimals: self.decimals,
            uri: non_empty(self.uri),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

//! # Test Helpers
//!
//! Scripted network sources and record builders shared by unit tests,
//! integration tests and benchmarks. Nothing here talks to a real network.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{CircuitBreakerConfig, EndpointConfig};
use crate::endpoint::{EndpointKind, EndpointPool, EndpointState};
use crate::fetcher::{
    BackoffPolicy, FetchOutcome, NetworkSource, RateLimitedFetcher, SourceOperation, SourceRequest,
};
use crate::models::{TokenBalanceDelta, TokenRecord, TransactionRecord};

/// One call observed by [`ScriptedSource`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedCall {
    pub endpoint: String,
    pub operation: SourceOperation,
    pub key: String,
}

/// Network source answering from scripts instead of HTTP.
///
/// Per-endpoint scripts are consumed first, in order. After that the
/// standing answer for `(operation, key)` is returned, and `NotFound` when
/// nothing matches.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    endpoint_scripts: Mutex<HashMap<String, VecDeque<FetchOutcome>>>,
    answers: Mutex<HashMap<(SourceOperation, String), FetchOutcome>>,
    calls: Mutex<Vec<ObservedCall>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(
        self,
        operation: SourceOperation,
        key: impl Into<String>,
        outcome: FetchOutcome,
    ) -> Self {
        self.answers.lock().insert((operation, key.into()), outcome);
        self
    }

    pub fn script_endpoint(self, endpoint: &str, outcomes: Vec<FetchOutcome>) -> Self {
        self.endpoint_scripts
            .lock()
            .insert(endpoint.to_string(), outcomes.into());
        self
    }

    /// Replace the standing answer on a shared source
    pub fn set_answer(&self, operation: SourceOperation, key: &str, outcome: FetchOutcome) {
        self.answers
            .lock()
            .insert((operation, key.to_string()), outcome);
    }

    pub fn calls(&self) -> Vec<ObservedCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, operation: SourceOperation) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }
}

#[async_trait]
impl NetworkSource for ScriptedSource {
    async fn fetch(&self, endpoint: &EndpointState, request: &SourceRequest) -> FetchOutcome {
        self.calls.lock().push(ObservedCall {
            endpoint: endpoint.name.clone(),
            operation: request.operation,
            key: request.key.as_str().to_string(),
        });
        if let Some(outcome) = self
            .endpoint_scripts
            .lock()
            .get_mut(&endpoint.name)
            .and_then(|q| q.pop_front())
        {
            return outcome;
        }
        self.answers
            .lock()
            .get(&(request.operation, request.key.as_str().to_string()))
            .cloned()
            .unwrap_or(FetchOutcome::NotFound)
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Two primary endpoints and one metadata endpoint, unthrottled
pub fn default_endpoints() -> Vec<EndpointConfig> {
    vec![
        EndpointConfig::new("rpc-1", "http://rpc-1", EndpointKind::PrimaryRpc)
            .with_min_interval_ms(0),
        EndpointConfig::new("rpc-2", "http://rpc-2", EndpointKind::PrimaryRpc)
            .with_min_interval_ms(0),
        EndpointConfig::new("meta-1", "http://meta-1", EndpointKind::MetadataApi)
            .with_min_interval_ms(0),
    ]
}

/// Single attempt per endpoint with millisecond backoff
pub fn fast_backoff() -> BackoffPolicy {
    BackoffPolicy {
        max_attempts: 1,
        initial_delay: Duration::from_millis(1),
        multiplier: 2.0,
        max_delay: Duration::from_millis(10),
    }
}

pub fn fetcher_with(
    endpoints: &[EndpointConfig],
    source: Arc<ScriptedSource>,
    backoff: BackoffPolicy,
) -> Arc<RateLimitedFetcher> {
    let pool = EndpointPool::from_config(endpoints, &CircuitBreakerConfig::default())
        .unwrap_or_else(|e| panic!("test endpoint pool: {e}"));
    Arc::new(RateLimitedFetcher::new(Arc::new(pool), source, backoff))
}

pub fn balance(mint: &str, owner: &str, pre: f64, post: f64) -> TokenBalanceDelta {
    TokenBalanceDelta {
        mint: mint.to_string(),
        owner: Some(owner.to_string()),
        pre_amount: pre,
        post_amount: post,
    }
}

/// A successful transaction touching `mints`, signed by `payer`
pub fn sample_transaction(signature: &str, mints: &[&str]) -> TransactionRecord {
    TransactionRecord {
        signature: signature.to_string(),
        slot: 250_000_000,
        block_time: Some(1_700_000_000),
        fee: 5_000,
        success: true,
        account_keys: vec!["payer".to_string(), "counterparty".to_string()],
        instructions: vec![],
        token_balances: mints
            .iter()
            .map(|mint| balance(mint, "payer", 10.0, 4.0))
            .collect(),
    }
}

pub fn named_token(mint: &str, name: &str, symbol: &str) -> TokenRecord {
    TokenRecord::new(mint)
        .with_name(name)
        .with_symbol(symbol)
        .with_decimals(6)
}

/// `Found` outcome carrying a transaction document
pub fn found_transaction(record: &TransactionRecord) -> FetchOutcome {
    FetchOutcome::found(record.to_document())
}

/// `Found` outcome carrying a token document
pub fn found_token(record: &TokenRecord) -> FetchOutcome {
    FetchOutcome::found(record.to_document())
}

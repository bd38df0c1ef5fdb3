//! JSON-RPC node source: transactions, DAS assets and signature history.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

use super::http::{classify_status, sanitize_network_error};
use super::types::{oldest_signature, RpcAsset, RpcResponse, RpcSignatureInfo, RpcTransaction};
use crate::constants::rpc_methods;
use crate::endpoint::EndpointState;
use crate::fetcher::{FetchOutcome, NetworkSource, SourceOperation, SourceRequest};
use crate::models::{TokenRecord, TransactionRecord};

/// Page size for signature history; the oldest entry of the page is taken
/// as the creation event
const SIGNATURE_PAGE_LIMIT: u32 = 1000;

#[derive(Debug, Clone)]
pub struct JsonRpcSource {
    client: Client,
    next_id: std::sync::Arc<AtomicU64>,
}

impl JsonRpcSource {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            next_id: std::sync::Arc::new(AtomicU64::new(1)),
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        endpoint: &EndpointState,
        method: &str,
        params: Value,
    ) -> Result<Option<T>, FetchOutcome> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});
        trace!(endpoint = %endpoint.name, method, id, "sending rpc request");

        let response = self
            .client
            .post(&endpoint.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| sanitize_network_error(&e))?;
        if let Some(outcome) = classify_status(&response) {
            return Err(outcome);
        }
        let envelope: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| sanitize_network_error(&e))?;

        if let Some(error) = envelope.error {
            debug!(endpoint = %endpoint.name, method, code = error.code, "rpc error response");
            return Err(if error.is_rate_limited() {
                FetchOutcome::RateLimited { retry_after: None }
            } else if error.is_not_found() {
                FetchOutcome::NotFound
            } else {
                FetchOutcome::transport(format!("rpc error {}", error.code))
            });
        }
        Ok(envelope.result)
    }

    async fn transaction(&self, endpoint: &EndpointState, signature: &str) -> FetchOutcome {
        let params = json!([signature, {"encoding": "json", "maxSupportedTransactionVersion": 0}]);
        match self
            .call::<RpcTransaction>(endpoint, rpc_methods::GET_TRANSACTION, params)
            .await
        {
            Ok(Some(raw)) => match TransactionRecord::try_from(raw) {
                Ok(record) => FetchOutcome::found(record.to_document()),
                Err(e) => FetchOutcome::transport(format!("malformed transaction: {e}")),
            },
            Ok(None) => FetchOutcome::NotFound,
            Err(outcome) => outcome,
        }
    }

    async fn asset(&self, endpoint: &EndpointState, mint: &str) -> FetchOutcome {
        match self
            .call::<RpcAsset>(endpoint, rpc_methods::GET_ASSET, json!({"id": mint}))
            .await
        {
            Ok(Some(raw)) => match TokenRecord::try_from(raw) {
                Ok(record) => FetchOutcome::found(record.to_document()),
                Err(e) => FetchOutcome::transport(format!("malformed asset: {e}")),
            },
            Ok(None) => FetchOutcome::NotFound,
            Err(outcome) => outcome,
        }
    }

    async fn creation_signature(&self, endpoint: &EndpointState, address: &str) -> FetchOutcome {
        let params = json!([address, {"limit": SIGNATURE_PAGE_LIMIT}]);
        match self
            .call::<Vec<RpcSignatureInfo>>(endpoint, rpc_methods::GET_SIGNATURES_FOR_ADDRESS, params)
            .await
        {
            Ok(Some(page)) => match oldest_signature(&page) {
                Some(info) => FetchOutcome::found(json!({
                    "signature": info.signature,
                    "slot": info.slot,
                    "block_time": info.block_time,
                })),
                None => FetchOutcome::NotFound,
            },
            Ok(None) => FetchOutcome::NotFound,
            Err(outcome) => outcome,
        }
    }
}

#[async_trait]
impl NetworkSource for JsonRpcSource {
    async fn fetch(&self, endpoint: &EndpointState, request: &SourceRequest) -> FetchOutcome {
        let key = request.key.as_str();
        match request.operation {
            SourceOperation::Transaction => self.transaction(endpoint, key).await,
            SourceOperation::TokenAsset => self.asset(endpoint, key).await,
            SourceOperation::CreationSignature => self.creation_signature(endpoint, key).await,
            SourceOperation::TokenMetadata => {
                FetchOutcome::transport("token metadata is not served by rpc endpoints")
            }
        }
    }

    fn name(&self) -> &str {
        "json_rpc"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointConfig;
    use crate::endpoint::EndpointKind;
    use mockito::{Matcher, Server};
    use std::time::Duration;

    fn endpoint(url: String) -> EndpointState {
        EndpointState::from_config(&EndpointConfig::new("rpc", url, EndpointKind::PrimaryRpc))
    }

    fn source() -> JsonRpcSource {
        JsonRpcSource::new(super::super::http::build_client(Duration::from_secs(5)).unwrap())
    }

    #[tokio::test]
    async fn test_get_transaction_found() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .match_body(Matcher::Regex(r#""method"\s*:\s*"getTransaction""#.to_string()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({"jsonrpc": "2.0", "id": 1, "result": {
                    "slot": 9,
                    "transaction": {
                        "signatures": ["sig"],
                        "message": {"accountKeys": ["a"], "instructions": []}
                    },
                    "meta": {"fee": 10, "err": null}
                }})
                .to_string(),
            )
            .create_async()
            .await;

        let outcome = source()
            .fetch(
                &endpoint(server.url()),
                &SourceRequest::new(SourceOperation::Transaction, "sig"),
            )
            .await;
        match outcome {
            FetchOutcome::Found { payload, .. } => {
                assert_eq!(payload["core"]["signature"], "sig");
                assert_eq!(payload["core"]["fee"], 10);
            }
            other => panic!("expected Found, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_null_result_is_not_found() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_body(json!({"jsonrpc": "2.0", "id": 1, "result": null}).to_string())
            .create_async()
            .await;

        let outcome = source()
            .fetch(
                &endpoint(server.url()),
                &SourceRequest::new(SourceOperation::Transaction, "missing"),
            )
            .await;
        assert_eq!(outcome, FetchOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_http_429_is_rate_limited_with_hint() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(429)
            .with_header("retry-after", "3")
            .create_async()
            .await;

        let outcome = source()
            .fetch(
                &endpoint(server.url()),
                &SourceRequest::new(SourceOperation::TokenAsset, "mint"),
            )
            .await;
        assert_eq!(
            outcome,
            FetchOutcome::RateLimited {
                retry_after: Some(Duration::from_secs(3))
            }
        );
    }

    #[tokio::test]
    async fn test_server_error_is_transport_error() {
        let mut server = Server::new_async().await;
        let _mock = server.mock("POST", "/").with_status(503).create_async().await;

        let outcome = source()
            .fetch(
                &endpoint(server.url()),
                &SourceRequest::new(SourceOperation::Transaction, "sig"),
            )
            .await;
        assert_eq!(outcome, FetchOutcome::transport("upstream returned status 503"));
    }

    #[tokio::test]
    async fn test_rpc_error_asset_not_found() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_body(
                json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32000, "message": "Asset Not Found"}})
                    .to_string(),
            )
            .create_async()
            .await;

        let outcome = source()
            .fetch(
                &endpoint(server.url()),
                &SourceRequest::new(SourceOperation::TokenAsset, "mint"),
            )
            .await;
        assert_eq!(outcome, FetchOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_creation_signature_takes_oldest() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .match_body(Matcher::Regex(r#""method"\s*:\s*"getSignaturesForAddress""#.to_string()))
            .with_status(200)
            .with_body(
                json!({"jsonrpc": "2.0", "id": 1, "result": [
                    {"signature": "newest", "slot": 30},
                    {"signature": "middle", "slot": 20},
                    {"signature": "creation", "slot": 10}
                ]})
                .to_string(),
            )
            .create_async()
            .await;

        let outcome = source()
            .fetch(
                &endpoint(server.url()),
                &SourceRequest::new(SourceOperation::CreationSignature, "mint"),
            )
            .await;
        match outcome {
            FetchOutcome::Found { payload, .. } => assert_eq!(payload["signature"], "creation"),
            other => panic!("expected Found, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_sanitized() {
        let outcome = source()
            .fetch(
                &endpoint("http://127.0.0.1:1".to_string()),
                &SourceRequest::new(SourceOperation::Transaction, "sig"),
            )
            .await;
        assert_eq!(outcome.kind(), crate::fetcher::OutcomeKind::TransportError);
        if let FetchOutcome::TransportError(detail) = outcome {
            assert!(!detail.contains("127.0.0.1"));
        }
    }
}

//! Secondary token metadata REST API: `GET {base}/tokens/{mint}`.

use async_trait::async_trait;
use reqwest::Client;
use tracing::trace;

use super::http::{classify_status, sanitize_network_error};
use super::types::MetadataApiToken;
use crate::endpoint::EndpointState;
use crate::fetcher::{FetchOutcome, NetworkSource, SourceOperation, SourceRequest};

#[derive(Debug, Clone)]
pub struct MetadataApiSource {
    client: Client,
}

impl MetadataApiSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn token_url(base: &str, mint: &str) -> String {
        format!("{}/tokens/{}", base.trim_end_matches('/'), mint)
    }
}

#[async_trait]
impl NetworkSource for MetadataApiSource {
    async fn fetch(&self, endpoint: &EndpointState, request: &SourceRequest) -> FetchOutcome {
        if request.operation != SourceOperation::TokenMetadata {
            return FetchOutcome::transport(format!(
                "{} is not served by metadata endpoints",
                request.operation
            ));
        }
        let url = Self::token_url(&endpoint.url, request.key.as_str());
        trace!(endpoint = %endpoint.name, key = %request.key, "requesting token metadata");

        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => return sanitize_network_error(&e),
        };
        if let Some(outcome) = classify_status(&response) {
            return outcome;
        }
        match response.json::<Option<MetadataApiToken>>().await {
            Ok(Some(token)) => {
                FetchOutcome::found(token.into_record(request.key.as_str()).to_document())
            }
            Ok(None) => FetchOutcome::NotFound,
            Err(e) => sanitize_network_error(&e),
        }
    }

    fn name(&self) -> &str {
        "metadata_api"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointConfig;
    use crate::endpoint::EndpointKind;
    use mockito::Server;
    use serde_json::json;
    use std::time::Duration;

    fn endpoint(url: String) -> EndpointState {
        EndpointState::from_config(&EndpointConfig::new("meta", url, EndpointKind::MetadataApi))
    }

    fn source() -> MetadataApiSource {
        MetadataApiSource::new(super::super::http::build_client(Duration::from_secs(5)).unwrap())
    }

    #[tokio::test]
    async fn test_found_token() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/tokens/mintX")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({"name": "Bonk", "symbol": "BONK", "decimals": 5}).to_string())
            .create_async()
            .await;

        let outcome = source()
            .fetch(
                &endpoint(format!("{}/", server.url())),
                &SourceRequest::new(SourceOperation::TokenMetadata, "mintX"),
            )
            .await;
        match outcome {
            FetchOutcome::Found { payload, .. } => {
                assert_eq!(payload["core"]["mint"], "mintX");
                assert_eq!(payload["core"]["symbol"], "BONK");
            }
            other => panic!("expected Found, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_404_is_not_found() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/tokens/nope")
            .with_status(404)
            .create_async()
            .await;

        let outcome = source()
            .fetch(
                &endpoint(server.url()),
                &SourceRequest::new(SourceOperation::TokenMetadata, "nope"),
            )
            .await;
        assert_eq!(outcome, FetchOutcome::NotFound);
    }

    #[tokio::test]
    async fn test_wrong_operation_rejected_without_request() {
        let outcome = source()
            .fetch(
                &endpoint("http://127.0.0.1:1".to_string()),
                &SourceRequest::new(SourceOperation::Transaction, "sig"),
            )
            .await;
        assert!(matches!(outcome, FetchOutcome::TransportError(_)));
    }
}

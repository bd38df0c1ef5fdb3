//! Shared reqwest plumbing for the network sources.

use reqwest::header::RETRY_AFTER;
use reqwest::{Client, ClientBuilder, Response, StatusCode};
use std::time::Duration;

use crate::error::{FetchflowError, Result};
use crate::fetcher::FetchOutcome;

/// Build the HTTP client shared by all endpoints of a source
pub fn build_client(request_timeout: Duration) -> Result<Client> {
    ClientBuilder::new()
        .pool_idle_timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(5))
        .timeout(request_timeout)
        .use_rustls_tls()
        .user_agent(concat!("fetchflow/", env!("CARGO_PKG_VERSION")))
        .tcp_nodelay(true)
        .build()
        .map_err(|e| {
            tracing::error!(error = %e, "failed to build http client");
            FetchflowError::EndpointError(format!("HTTP client build failed: {e}"))
        })
}

/// Classify a non-success status; `None` means the body should be read
pub fn classify_status(response: &Response) -> Option<FetchOutcome> {
    let status = response.status();
    if status.is_success() {
        return None;
    }
    Some(match status {
        StatusCode::TOO_MANY_REQUESTS => FetchOutcome::RateLimited {
            retry_after: retry_after(response),
        },
        StatusCode::NOT_FOUND => FetchOutcome::NotFound,
        other => FetchOutcome::transport(format!("upstream returned status {}", other.as_u16())),
    })
}

fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Map a reqwest failure to a transport outcome without leaking URLs or
/// credentials embedded in them
pub fn sanitize_network_error(error: &reqwest::Error) -> FetchOutcome {
    let detail = if error.is_connect() {
        "connection refused or unreachable"
    } else if error.is_timeout() {
        "connection timed out"
    } else if error.is_request() {
        "request failed"
    } else if error.is_body() {
        "response body error"
    } else if error.is_decode() {
        "response decode error"
    } else if error.is_redirect() {
        "too many redirects"
    } else {
        "network error"
    };
    FetchOutcome::transport(detail)
}

//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use fetchflow_core::config::{FetchflowConfig, MessagingBackend, StaticCredential};
use fetchflow_core::messaging::MessagingProvider;
use fetchflow_core::orchestration::InMemoryPartyRecorder;
use fetchflow_core::runtime::{Collaborators, FetchflowRuntime};
use fetchflow_core::test_helpers::{default_endpoints, ScriptedSource};

pub const BATCH_KEY: &str = "it-batch-key";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("fetchflow_core=debug")
        .with_test_writer()
        .try_init();
}

/// In-memory broker, fast polling, single attempt per endpoint
pub fn test_config() -> FetchflowConfig {
    let mut config = FetchflowConfig::default();
    config.messaging.backend = MessagingBackend::InMemory;
    config.messaging.poll_interval_ms = 5;
    config.messaging.reply_timeout_ms = 5_000;
    config.endpoints = default_endpoints();
    config.retry.max_attempts = 1;
    config.retry.initial_delay_ms = 1;
    config.retry.max_delay_ms = 10;
    config.workers.shutdown_grace_seconds = 5;
    config.batch.credentials = vec![StaticCredential {
        requester: "integration".to_string(),
        key: BATCH_KEY.to_string(),
    }];
    config
}

pub struct Harness {
    pub runtime: FetchflowRuntime,
    pub source: Arc<ScriptedSource>,
    pub parties: Arc<InMemoryPartyRecorder>,
}

/// Runtime without a database, answering from `source`
pub async fn harness(source: ScriptedSource) -> Harness {
    init_tracing();
    let source = Arc::new(source);
    let parties = Arc::new(InMemoryPartyRecorder::new());
    let collaborators = Collaborators {
        parties: parties.clone(),
        ..Collaborators::default()
    };
    let runtime = FetchflowRuntime::assemble(
        test_config(),
        None,
        Arc::new(MessagingProvider::in_memory()),
        source.clone(),
        collaborators,
    )
    .await
    .expect("runtime assembles");
    Harness {
        runtime,
        source,
        parties,
    }
}

/// Poll `condition` until it holds or `within` elapses
pub async fn eventually<F>(within: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + within;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

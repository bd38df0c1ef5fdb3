use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::models::{Document, Provenance};

/// Classified response of a single network call
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Found {
        payload: Document,
        provenance: Provenance,
    },
    /// The endpoint answered but has no record; may be indexing lag
    NotFound,
    RateLimited {
        retry_after: Option<Duration>,
    },
    TransportError(String),
}

impl FetchOutcome {
    pub fn found(payload: Document) -> Self {
        Self::Found {
            payload,
            provenance: Provenance::default(),
        }
    }

    pub fn transport(detail: impl Into<String>) -> Self {
        Self::TransportError(detail.into())
    }

    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::Found { .. } => OutcomeKind::Found,
            Self::NotFound => OutcomeKind::NotFound,
            Self::RateLimited { .. } => OutcomeKind::RateLimited,
            Self::TransportError(_) => OutcomeKind::TransportError,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found { .. })
    }

    /// Worth retrying against the same endpoint after a backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::TransportError(_))
    }
}

/// Payload-free tag of a [`FetchOutcome`], used in traces and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Found,
    NotFound,
    RateLimited,
    TransportError,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Found => write!(f, "found"),
            Self::NotFound => write!(f, "not_found"),
            Self::RateLimited => write!(f, "rate_limited"),
            Self::TransportError => write!(f, "transport_error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_retryable_classification() {
        assert!(FetchOutcome::transport("reset").is_retryable());
        assert!(FetchOutcome::RateLimited { retry_after: None }.is_retryable());
        assert!(!FetchOutcome::NotFound.is_retryable());
        assert!(!FetchOutcome::found(json!({})).is_retryable());
        assert_eq!(FetchOutcome::NotFound.kind().to_string(), "not_found");
    }
}

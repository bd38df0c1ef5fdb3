//! Broker errors.
//!
//! Both providers report through these variants; callers never see pgmq
//! SQL errors or in-memory lookup failures directly.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("Broker database error: {0}")]
    Database(String),

    #[error("Queue {queue} {operation} failed: {message}")]
    QueueOperation {
        queue: String,
        operation: &'static str,
        message: String,
    },

    #[error("Queue not found: {queue}")]
    QueueNotFound { queue: String },

    #[error("Unknown receipt: {receipt}")]
    UnknownReceipt { receipt: String },

    #[error("Message serialization error: {0}")]
    MessageSerialization(String),

    #[error("Message deserialization error: {0}")]
    MessageDeserialization(String),

    #[error("Messaging configuration error: {0}")]
    Configuration(String),

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },
}

impl MessagingError {
    pub fn queue_operation(
        queue: impl Into<String>,
        operation: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::QueueOperation {
            queue: queue.into(),
            operation,
            message: message.into(),
        }
    }

    pub fn queue_not_found(queue: impl Into<String>) -> Self {
        Self::QueueNotFound {
            queue: queue.into(),
        }
    }

    pub fn unknown_receipt(receipt: impl Into<String>) -> Self {
        Self::UnknownReceipt {
            receipt: receipt.into(),
        }
    }

    pub fn message_serialization(message: impl Into<String>) -> Self {
        Self::MessageSerialization(message.into())
    }

    pub fn message_deserialization(message: impl Into<String>) -> Self {
        Self::MessageDeserialization(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }
}

impl From<sqlx::Error> for MessagingError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => MessagingError::timeout("broker connection acquire", 0),
            other => MessagingError::Database(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for MessagingError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_syntax() || err.is_data() || err.is_eof() {
            MessagingError::message_deserialization(err.to_string())
        } else {
            MessagingError::message_serialization(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_operation_names_queue_and_operation() {
        let err = MessagingError::queue_operation("fetchflow_token_tasks", "send", "connection reset");
        assert_eq!(
            err.to_string(),
            "Queue fetchflow_token_tasks send failed: connection reset"
        );
    }

    #[test]
    fn test_json_errors_map_to_deserialization() {
        let err: MessagingError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, MessagingError::MessageDeserialization(_)));
    }
}

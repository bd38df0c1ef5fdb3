use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Wire wrapper for every message published onto a stage queue.
///
/// `reply_to` set means request/reply: the consumer publishes exactly one
/// `ReplyEnvelope` with the same `correlation_id` to that queue. Unset means
/// fire-and-forget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope<T> {
    pub correlation_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    pub priority: u8,
    pub sent_at: DateTime<Utc>,
    pub body: T,
}

impl<T> RequestEnvelope<T> {
    pub fn request(body: T, reply_to: impl Into<String>, priority: u8) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            reply_to: Some(reply_to.into()),
            priority,
            sent_at: Utc::now(),
            body,
        }
    }

    pub fn task(body: T, priority: u8) -> Self {
        Self {
            correlation_id: Uuid::new_v4(),
            reply_to: None,
            priority,
            sent_at: Utc::now(),
            body,
        }
    }

    pub fn expects_reply(&self) -> bool {
        self.reply_to.is_some()
    }

    pub fn reply<R>(&self, body: R) -> ReplyEnvelope<R> {
        ReplyEnvelope {
            correlation_id: self.correlation_id,
            sent_at: Utc::now(),
            body,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyEnvelope<R> {
    pub correlation_id: Uuid,
    pub sent_at: DateTime<Utc>,
    pub body: R,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_has_no_reply_address() {
        let task = RequestEnvelope::task("k", 50);
        assert!(!task.expects_reply());
        let json = serde_json::to_value(&task).unwrap();
        assert!(json.get("reply_to").is_none());
    }

    #[test]
    fn test_reply_carries_correlation_id() {
        let request = RequestEnvelope::request("k", "replies", 200);
        assert!(request.expects_reply());
        let reply = request.reply(42);
        assert_eq!(reply.correlation_id, request.correlation_id);
        assert_eq!(reply.body, 42);
    }
}

//! Broker-neutral identifiers and delivery metadata.
//!
//! Both brokers number their messages, so ids and receipts are carried as
//! the decimal string of that number.

use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

macro_rules! numeric_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id.to_string())
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id.to_string())
            }
        }
    };
}

numeric_handle!(
    /// Broker-assigned id of a sent message
    MessageId
);

numeric_handle!(
    /// Settles one delivery: ack, nack or visibility extension
    ReceiptHandle
);

impl ReceiptHandle {
    /// pgmq addresses messages by `bigint` id
    pub fn as_i64(&self) -> Option<i64> {
        self.0.parse().ok()
    }
}

/// One delivery of a message
#[derive(Debug, Clone)]
pub struct QueuedMessage<T> {
    pub receipt_handle: ReceiptHandle,
    pub message: T,
    /// Deliveries so far, this one included
    pub receive_count: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl<T> QueuedMessage<T> {
    pub fn new(
        receipt_handle: ReceiptHandle,
        message: T,
        receive_count: u32,
        enqueued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            receipt_handle,
            message,
            receive_count,
            enqueued_at,
        }
    }

    pub fn is_redelivery(&self) -> bool {
        self.receive_count > 1
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueStats {
    pub queue_name: String,
    /// Messages stored, visible or not
    pub message_count: u64,
    /// Delivered but not yet settled, when the broker can tell
    pub in_flight_count: Option<u64>,
    pub oldest_message_age: Option<Duration>,
}

impl QueueStats {
    pub fn new(queue_name: impl Into<String>, message_count: u64) -> Self {
        Self {
            queue_name: queue_name.into(),
            message_count,
            in_flight_count: None,
            oldest_message_age: None,
        }
    }

    pub fn with_in_flight_count(mut self, count: u64) -> Self {
        self.in_flight_count = Some(count);
        self
    }

    pub fn with_oldest_message_age(mut self, age: Duration) -> Self {
        self.oldest_message_age = Some(age);
        self
    }
}

/// Which of the stage queues a broker actually has
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueCheck {
    pub present: Vec<String>,
    pub missing: Vec<String>,
}

impl QueueCheck {
    /// Partition `expected` by membership in `existing`
    pub fn of(expected: &[String], existing: impl Fn(&str) -> bool) -> Self {
        let (present, missing): (Vec<String>, Vec<String>) =
            expected.iter().cloned().partition(|name| existing(name));
        Self { present, missing }
    }

    pub fn all_present(&self) -> bool {
        self.missing.is_empty()
    }
}

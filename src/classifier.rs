//! Transaction-type classification contract.
//!
//! The classifier itself is an external black box; this module defines what
//! it receives and how its answer is interpreted.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ClassifierConfig;
use crate::models::{InstructionRecord, TokenBalanceDelta, TransactionRecord};

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationInput {
    pub instructions: Vec<InstructionRecord>,
    pub balance_deltas: Vec<TokenBalanceDelta>,
    pub parties: Vec<String>,
}

impl ClassificationInput {
    pub fn from_record(record: &TransactionRecord, parties: Vec<String>) -> Self {
        Self {
            instructions: record.instructions.clone(),
            balance_deltas: record.token_balances.clone(),
            parties,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub label: String,
    pub confidence: f64,
}

#[async_trait]
pub trait Classifier: Send + Sync + std::fmt::Debug {
    async fn classify(&self, input: &ClassificationInput) -> Classification;
}

/// Turns low-confidence answers into "no label"
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassificationPolicy {
    min_confidence: f64,
}

impl ClassificationPolicy {
    pub fn new(min_confidence: f64) -> Self {
        Self { min_confidence }
    }

    pub fn from_config(config: &ClassifierConfig) -> Self {
        Self::new(config.min_confidence)
    }

    pub fn accept(&self, classification: Classification) -> Option<Classification> {
        let usable = !classification.label.trim().is_empty()
            && classification.confidence.is_finite()
            && classification.confidence >= self.min_confidence;
        usable.then_some(classification)
    }
}

/// Classifier that never recognises anything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopClassifier;

#[async_trait]
impl Classifier for NoopClassifier {
    async fn classify(&self, _input: &ClassificationInput) -> Classification {
        Classification {
            label: String::new(),
            confidence: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(confidence: f64) -> Classification {
        Classification {
            label: "swap".to_string(),
            confidence,
        }
    }

    #[test]
    fn test_low_confidence_is_no_label() {
        let policy = ClassificationPolicy::new(0.6);
        assert_eq!(policy.accept(label(0.9)), Some(label(0.9)));
        assert_eq!(policy.accept(label(0.6)), Some(label(0.6)));
        assert_eq!(policy.accept(label(0.59)), None);
        assert_eq!(policy.accept(label(f64::NAN)), None);
    }

    #[tokio::test]
    async fn test_noop_classifier_is_rejected_by_policy() {
        let input = ClassificationInput {
            instructions: vec![],
            balance_deltas: vec![],
            parties: vec![],
        };
        let answer = NoopClassifier.classify(&input).await;
        assert_eq!(ClassificationPolicy::new(0.0).accept(answer), None);
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{FetchflowError, Result};

/// Lifecycle of a batch submission.
///
/// `Created -> Processing -> (Available | Errored | Stale)`. A batch can also
/// fail or be abandoned before it starts processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    /// Record exists, items being staged
    Created,
    /// Uncached items being driven through the orchestrator
    Processing,
    /// Every item attempted
    Available,
    /// Unrecoverable failure
    Errored,
    /// Cancelled mid-flight
    Stale,
}

impl BatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Available | Self::Errored | Self::Stale)
    }

    pub fn can_transition_to(&self, next: BatchState) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Processing)
                | (Self::Created, Self::Errored)
                | (Self::Created, Self::Stale)
                | (Self::Processing, Self::Available)
                | (Self::Processing, Self::Errored)
                | (Self::Processing, Self::Stale)
        )
    }

    /// Validated transition
    pub fn transition_to(self, next: BatchState) -> Result<BatchState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(FetchflowError::InvalidStateTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Processing => write!(f, "processing"),
            Self::Available => write!(f, "available"),
            Self::Errored => write!(f, "errored"),
            Self::Stale => write!(f, "stale"),
        }
    }
}

impl std::str::FromStr for BatchState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "processing" => Ok(Self::Processing),
            "available" => Ok(Self::Available),
            "errored" => Ok(Self::Errored),
            "stale" => Ok(Self::Stale),
            _ => Err(format!("Invalid batch state: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [BatchState; 5] = [
        BatchState::Created,
        BatchState::Processing,
        BatchState::Available,
        BatchState::Errored,
        BatchState::Stale,
    ];

    #[test]
    fn test_terminal_states_have_no_exits() {
        for from in ALL.iter().filter(|s| s.is_terminal()) {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_available_only_reachable_from_processing() {
        assert!(BatchState::Created.transition_to(BatchState::Available).is_err());
        assert_eq!(
            BatchState::Processing.transition_to(BatchState::Available).unwrap(),
            BatchState::Available
        );
    }

    #[test]
    fn test_invalid_transition_error_names_both_states() {
        let err = BatchState::Stale
            .transition_to(BatchState::Processing)
            .unwrap_err();
        assert!(matches!(
            err,
            FetchflowError::InvalidStateTransition { ref from, ref to }
                if from == "stale" && to == "processing"
        ));
    }

    #[test]
    fn test_string_form_round_trips_through_display() {
        for state in ALL {
            assert_eq!(state.to_string().parse::<BatchState>().unwrap(), state);
        }
        assert!("done".parse::<BatchState>().is_err());
    }
}

//! Stage status enum.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The execution status of a stage within one run.
///
/// Transitions are `NotStarted → Skipped` or
/// `NotStarted → Running → (Done | Failed)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage has not been reached yet (or is deferred and waiting for cleanup).
    #[default]
    NotStarted,
    /// Stage was skipped by configuration.
    Skipped,
    /// Stage body is executing.
    Running,
    /// Stage body completed successfully.
    Done,
    /// Stage body returned an error.
    Failed,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::Skipped => write!(f, "skipped"),
            Self::Running => write!(f, "running"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl StageStatus {
    /// Returns true if the stage body was invoked.
    #[must_use]
    pub fn was_executed(&self) -> bool {
        matches!(self, Self::Running | Self::Done | Self::Failed)
    }

    /// Returns true if moving to `next` is a legal transition.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::NotStarted, Self::Skipped | Self::Running)
                | (Self::Running, Self::Done | Self::Failed)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_status_display() {
        assert_eq!(StageStatus::NotStarted.to_string(), "not_started");
        assert_eq!(StageStatus::Skipped.to_string(), "skipped");
        assert_eq!(StageStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn test_was_executed() {
        assert!(StageStatus::Done.was_executed());
        assert!(StageStatus::Failed.was_executed());
        assert!(!StageStatus::Skipped.was_executed());
        assert!(!StageStatus::NotStarted.was_executed());
    }

    #[test]
    fn test_transitions() {
        assert!(StageStatus::NotStarted.can_transition_to(StageStatus::Skipped));
        assert!(StageStatus::NotStarted.can_transition_to(StageStatus::Running));
        assert!(StageStatus::Running.can_transition_to(StageStatus::Failed));
        assert!(!StageStatus::Skipped.can_transition_to(StageStatus::Running));
        assert!(!StageStatus::Done.can_transition_to(StageStatus::Running));
        assert!(!StageStatus::NotStarted.can_transition_to(StageStatus::Done));
    }

    #[test]
    fn test_stage_status_serialize() {
        let json = serde_json::to_string(&StageStatus::NotStarted).unwrap();
        assert_eq!(json, r#""not_started""#);

        let deserialized: StageStatus = serde_json::from_str(r#""done""#).unwrap();
        assert_eq!(deserialized, StageStatus::Done);
    }
}

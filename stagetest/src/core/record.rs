//! Per-stage records and the run report.

use super::StageStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// What happened to one stage during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    /// Stage name.
    pub name: String,
    /// Current status.
    pub status: StageStatus,
    /// Whether the stage was registered to run during cleanup.
    pub deferred: bool,
    /// When the body started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the stage reached a terminal status.
    pub finished_at: Option<DateTime<Utc>>,
    /// Error message if the body failed.
    pub error: Option<String>,
}

impl StageRecord {
    /// Creates a record for a stage that has not started yet.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: StageStatus::NotStarted,
            deferred: false,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    /// Creates a record for a deferred stage.
    #[must_use]
    pub fn deferred(name: impl Into<String>) -> Self {
        Self {
            deferred: true,
            ..Self::new(name)
        }
    }

    /// Marks the stage as skipped.
    pub fn skip(&mut self) {
        self.status = StageStatus::Skipped;
        self.finished_at = Some(Utc::now());
    }

    /// Marks the stage as running.
    pub fn start(&mut self) {
        self.status = StageStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Marks the stage as done.
    pub fn complete(&mut self) {
        self.status = StageStatus::Done;
        self.finished_at = Some(Utc::now());
    }

    /// Marks the stage as failed with a message.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = StageStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error.into());
    }
}

/// Summary of a finished run, in stage execution order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique identifier for this invocation.
    pub run_id: Uuid,
    /// The test the run belongs to.
    pub test_name: String,
    /// Working directory holding persisted values.
    pub working_dir: PathBuf,
    /// Stage records.
    pub stages: Vec<StageRecord>,
}

impl RunReport {
    /// Returns the record for a stage.
    #[must_use]
    pub fn stage(&self, name: &str) -> Option<&StageRecord> {
        self.stages.iter().find(|r| r.name == name)
    }

    /// Returns the status of a stage, `NotStarted` if it was never seen.
    #[must_use]
    pub fn status_of(&self, name: &str) -> StageStatus {
        self.stage(name).map(|r| r.status).unwrap_or_default()
    }

    /// Returns the names of stages whose body was invoked.
    #[must_use]
    pub fn executed(&self) -> Vec<&str> {
        self.names_where(|r| r.status.was_executed())
    }

    /// Returns the names of skipped stages.
    #[must_use]
    pub fn skipped(&self) -> Vec<&str> {
        self.names_where(|r| r.status == StageStatus::Skipped)
    }

    /// Returns the names of failed stages.
    #[must_use]
    pub fn failed(&self) -> Vec<&str> {
        self.names_where(|r| r.status == StageStatus::Failed)
    }

    /// Returns true if no stage failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.stages.iter().all(|r| r.status != StageStatus::Failed)
    }

    fn names_where(&self, pred: impl Fn(&StageRecord) -> bool) -> Vec<&str> {
        self.stages
            .iter()
            .filter(|r| pred(r))
            .map(|r| r.name.as_str())
            .collect()
    }
}

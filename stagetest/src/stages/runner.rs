//! Sequential stage runner.

use crate::cancellation::CleanupRegistry;
use crate::config::SkipConfig;
use crate::core::{RunReport, StageRecord, StageStatus};
use crate::errors::{CleanupError, HarnessError};
use crate::events::{self, EventSink, LoggingEventSink};
use crate::utils::validate_stage_name;
use crate::workdir::{Key, WorkingDir};
use futures::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Key the run report is persisted under after every run.
pub const RUN_REPORT: Key<RunReport> = Key::new("RunReport");

/// State shared by the runner and its deferred stages.
struct RunState {
    test_name: String,
    run_id: Uuid,
    skip: SkipConfig,
    workdir: WorkingDir,
    events: Arc<dyn EventSink>,
    records: Mutex<Vec<StageRecord>>,
}

impl RunState {
    fn emit(&self, event_type: &str, mut data: serde_json::Value) {
        if let Some(obj) = data.as_object_mut() {
            obj.insert("test".to_string(), self.test_name.clone().into());
            obj.insert("run_id".to_string(), self.run_id.to_string().into());
        }
        self.events.emit(event_type, data);
    }

    /// Claims `name` for a new stage and adds its record.
    fn claim(&self, name: &str, deferred: bool) -> Result<(), HarnessError> {
        validate_stage_name(name)?;
        let mut records = self.records.lock();
        if records.iter().any(|r| r.name == name) {
            return Err(HarnessError::DuplicateStage(name.to_string()));
        }
        records.push(if deferred {
            StageRecord::deferred(name)
        } else {
            StageRecord::new(name)
        });
        Ok(())
    }

    /// Applies `f` to the record of `name`, which must be allowed to move
    /// to `next` from its current status.
    fn transition(
        &self,
        name: &str,
        next: StageStatus,
        f: impl FnOnce(&mut StageRecord),
    ) -> Result<(), HarnessError> {
        let mut records = self.records.lock();
        let record = records
            .iter_mut()
            .find(|r| r.name == name)
            .ok_or_else(|| HarnessError::Internal(format!("No record for stage '{name}'")))?;
        if !record.status.can_transition_to(next) {
            return Err(HarnessError::Internal(format!(
                "Stage '{name}' cannot move from {} to {next}",
                record.status
            )));
        }
        f(record);
        Ok(())
    }

    /// Moves the record of `name` behind every other record.
    fn move_to_end(&self, name: &str) {
        let mut records = self.records.lock();
        if let Some(pos) = records.iter().position(|r| r.name == name) {
            let record = records.remove(pos);
            records.push(record);
        }
    }

    async fn run_claimed<F, Fut>(&self, name: &str, body: F) -> Result<StageStatus, HarnessError>
    where
        F: FnOnce(WorkingDir) -> Fut,
        Fut: Future<Output = Result<(), HarnessError>>,
    {
        if self.skip.should_skip(name) {
            info!(stage = %name, test = %self.test_name, "Skipping stage");
            self.transition(name, StageStatus::Skipped, StageRecord::skip)?;
            self.emit(events::STAGE_SKIPPED, serde_json::json!({ "stage": name }));
            return Ok(StageStatus::Skipped);
        }

        info!(stage = %name, test = %self.test_name, "Running stage");
        self.transition(name, StageStatus::Running, StageRecord::start)?;
        self.emit(events::STAGE_STARTED, serde_json::json!({ "stage": name }));
        let started = Instant::now();

        match body(self.workdir.clone()).await {
            Ok(()) => {
                let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                info!(stage = %name, elapsed_ms, "Stage completed");
                self.transition(name, StageStatus::Done, StageRecord::complete)?;
                self.emit(
                    events::STAGE_COMPLETED,
                    serde_json::json!({ "stage": name, "elapsed_ms": elapsed_ms }),
                );
                Ok(StageStatus::Done)
            }
            Err(err) => {
                error!(stage = %name, error = %err, "Stage failed");
                let message = err.to_string();
                self.transition(name, StageStatus::Failed, |r| r.fail(message.clone()))?;
                self.emit(events::STAGE_FAILED, serde_json::json!({ "stage": name, "error": message }));
                Err(HarnessError::stage_failed(name, err))
            }
        }
    }

    fn report(&self) -> RunReport {
        RunReport {
            run_id: self.run_id,
            test_name: self.test_name.clone(),
            working_dir: self.workdir.path().to_path_buf(),
            stages: self.records.lock().clone(),
        }
    }
}

/// Runs the named stages of one test, in call order.
///
/// Cloning a runner is cheap; clones share the same records, working
/// directory and cleanup registry.
#[derive(Clone)]
pub struct StageRunner {
    state: Arc<RunState>,
    cleanup: Arc<CleanupRegistry>,
}

impl std::fmt::Debug for StageRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageRunner")
            .field("test_name", &self.state.test_name)
            .field("run_id", &self.state.run_id)
            .field("working_dir", &self.state.workdir.path())
            .field("cleanup", &self.cleanup)
            .finish_non_exhaustive()
    }
}

impl StageRunner {
    /// Starts building a runner for `test_name`.
    #[must_use]
    pub fn builder(test_name: impl Into<String>) -> StageRunnerBuilder {
        StageRunnerBuilder::new(test_name)
    }

    /// Returns the test name.
    #[must_use]
    pub fn test_name(&self) -> &str {
        &self.state.test_name
    }

    /// Returns the identifier of this invocation.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.state.run_id
    }

    /// Returns the working directory.
    #[must_use]
    pub fn working_dir(&self) -> &WorkingDir {
        &self.state.workdir
    }

    /// Returns the skip configuration.
    #[must_use]
    pub fn skip_config(&self) -> &SkipConfig {
        &self.state.skip
    }

    /// Returns the registry deferred stages are queued on.
    #[must_use]
    pub fn cleanup(&self) -> &CleanupRegistry {
        &self.cleanup
    }

    /// Runs a stage unless it is configured to be skipped.
    ///
    /// The body receives the run's working directory. A failing body is
    /// reported as [`HarnessError::StageFailed`]; callers normally propagate
    /// it with `?` so later stages do not run.
    ///
    /// # Errors
    ///
    /// Also fails without running anything if the name is invalid or was
    /// already used in this run.
    pub async fn run_stage<F, Fut>(&self, name: &str, body: F) -> Result<StageStatus, HarnessError>
    where
        F: FnOnce(WorkingDir) -> Fut,
        Fut: Future<Output = Result<(), HarnessError>>,
    {
        self.state.claim(name, false)?;
        self.state.run_claimed(name, body).await
    }

    /// Queues a stage to run during cleanup.
    ///
    /// Deferred stages run in reverse registration order once the run
    /// finishes, whether it succeeded or not. The skip configuration is
    /// checked when the stage runs, not when it is deferred. Once it runs,
    /// its record moves to the end of the report.
    pub fn defer_stage<F, Fut>(&self, name: &str, body: F) -> Result<(), HarnessError>
    where
        F: FnOnce(WorkingDir) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), HarnessError>> + Send + 'static,
    {
        self.state.claim(name, true)?;
        info!(stage = %name, "Deferring stage to cleanup");
        self.state.emit(events::STAGE_DEFERRED, serde_json::json!({ "stage": name }));

        let state = self.state.clone();
        let stage = name.to_string();
        self.cleanup.register(name, move || async move {
            state.move_to_end(&stage);
            state.run_claimed(&stage, body).await.map(|_| ())
        });
        Ok(())
    }

    /// Returns a snapshot of the stage records so far.
    #[must_use]
    pub fn report(&self) -> RunReport {
        self.state.report()
    }

    /// Runs all deferred stages and release actions, then settles the run.
    ///
    /// Returns `outcome`'s error if there was one, otherwise the collected
    /// cleanup failures, otherwise the run report. The report is also
    /// persisted to the working directory for post-mortem debugging.
    pub async fn finish(&self, outcome: Result<(), HarnessError>) -> Result<RunReport, HarnessError> {
        if let Err(err) = &outcome {
            warn!(error = %err, "Run failed; running cleanup");
        }

        let failures = self.cleanup.run_all().await;
        let report = self.report();

        if let Err(err) = self.state.workdir.save(&RUN_REPORT, &report).await {
            warn!(error = %err, "Could not persist run report");
        }
        self.state.emit(
            events::RUN_FINISHED,
            serde_json::json!({
                "failed": report.failed(),
                "cleanup_failures": failures.len(),
            }),
        );

        outcome?;
        if !failures.is_empty() {
            return Err(CleanupError::new(failures).into());
        }

        info!(
            test = %report.test_name,
            executed = report.executed().len(),
            skipped = report.skipped().len(),
            "Run finished"
        );
        Ok(report)
    }

    /// Runs `pipeline` and always finishes the run afterwards.
    ///
    /// Deferred stages run even if the pipeline returns an error or panics;
    /// a panic is resumed once cleanup is done.
    pub async fn run<F, Fut>(self, pipeline: F) -> Result<RunReport, HarnessError>
    where
        F: FnOnce(Self) -> Fut,
        Fut: Future<Output = Result<(), HarnessError>>,
    {
        match AssertUnwindSafe(pipeline(self.clone())).catch_unwind().await {
            Ok(outcome) => self.finish(outcome).await,
            Err(panic) => {
                error!(test = %self.state.test_name, "Run panicked; running cleanup");
                let _ = self.finish(Err(HarnessError::Internal("panicked".into()))).await;
                std::panic::resume_unwind(panic)
            }
        }
    }
}

/// Builder for [`StageRunner`].
pub struct StageRunnerBuilder {
    test_name: String,
    workdir: Option<WorkingDir>,
    skip: SkipConfig,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for StageRunnerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageRunnerBuilder")
            .field("test_name", &self.test_name)
            .field("workdir", &self.workdir)
            .field("skip", &self.skip)
            .finish_non_exhaustive()
    }
}

impl StageRunnerBuilder {
    fn new(test_name: impl Into<String>) -> Self {
        Self {
            test_name: test_name.into(),
            workdir: None,
            skip: SkipConfig::default(),
            events: Arc::new(LoggingEventSink),
        }
    }

    /// Sets the working directory. Defaults to `stages/<test name>`.
    #[must_use]
    pub fn working_dir(mut self, workdir: WorkingDir) -> Self {
        self.workdir = Some(workdir);
        self
    }

    /// Sets the skip configuration.
    #[must_use]
    pub fn skip(mut self, skip: SkipConfig) -> Self {
        self.skip = skip;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Creates the working directory and returns the runner.
    pub async fn build(self) -> Result<StageRunner, HarnessError> {
        if self.test_name.trim().is_empty() {
            return Err(HarnessError::config("Test name must not be empty"));
        }
        let workdir = self
            .workdir
            .unwrap_or_else(|| WorkingDir::for_test("stages", &self.test_name));
        workdir.ensure().await?;

        let skipped = self.skip.skipped();
        if !skipped.is_empty() {
            info!(test = %self.test_name, ?skipped, "Stages configured to skip");
        }

        Ok(StageRunner {
            state: Arc::new(RunState {
                test_name: self.test_name,
                run_id: Uuid::new_v4(),
                skip: self.skip,
                workdir,
                events: self.events,
                records: Mutex::new(Vec::new()),
            }),
            cleanup: Arc::new(CleanupRegistry::new()),
        })
    }
}

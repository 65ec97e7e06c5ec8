//! Stage execution.
//!
//! A run is a straight line of named stages. Each stage can be skipped by
//! configuration, reads and writes values through the run's working
//! directory, and may be deferred so it runs during cleanup.
//!
//! ```rust,ignore
//! let runner = StageRunner::builder("TestK8STiller")
//!     .skip(SkipConfig::from_env())
//!     .build()
//!     .await?;
//!
//! runner
//!     .run(|r| async move {
//!         r.run_stage("setup", |wd| async move { wd.save(&ID, &id).await }).await?;
//!         r.defer_stage("cleanup", |wd| async move { teardown(&wd).await })?;
//!         r.run_stage("validate", |wd| async move { check(&wd).await }).await?;
//!         Ok(())
//!     })
//!     .await?;
//! ```

mod runner;

pub use runner::{StageRunner, StageRunnerBuilder, RUN_REPORT};

//! # Stagetest
//!
//! A staged, resumable harness for end-to-end infrastructure tests.
//!
//! A test is a straight line of named stages. Any stage can be skipped by
//! configuration, values are handed between stages through a per-test
//! working directory, and cleanup stages run in reverse order on every exit
//! path. That makes it cheap to iterate on one stage of a slow test:
//! apply once with `SKIP_cleanup=true`, then re-run `validate` alone.
//!
//! - **Stage runner**: [`stages::StageRunner`]
//! - **Working directory**: typed [`workdir::Key`]s persisted as JSON
//! - **Cleanup**: LIFO [`cancellation::CleanupRegistry`]
//! - **Tools**: traits over terraform, kubectl and helm
//! - **Scenario**: [`scenario::TillerScenario`], the Tiller deployment test
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stagetest::prelude::*;
//!
//! let config = HarnessConfig::new().with_env_overrides();
//! let report = TillerScenario::with_cli_tools(config)?
//!     .run("TestK8STiller")
//!     .await?;
//! assert!(report.is_success());
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod scenario;
pub mod stages;
pub mod testing;
pub mod tools;
pub mod utils;
pub mod workdir;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CleanupRegistry;
    pub use crate::config::{HarnessConfig, SkipConfig};
    pub use crate::core::{RunReport, StageRecord, StageStatus};
    pub use crate::errors::{CleanupError, CommandError, HarnessError, MissingValueError};
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink};
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::scenario::TillerScenario;
    pub use crate::stages::StageRunner;
    pub use crate::tools::{
        ClusterAdmin, HelmCli, KubectlCli, KubectlOptions, PackageRequest, PackageTool,
        Provisioner, TerraformCli, TerraformOptions,
    };
    pub use crate::workdir::{Key, WorkingDir};
}

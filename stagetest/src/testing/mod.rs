//! Testing utilities for stagetest scenarios.
//!
//! Recording fakes for the external tools, so a whole scenario can run
//! without terraform, kubectl or helm installed.

mod fakes;

pub use fakes::{CallLog, FakeCluster, FakePackageTool, FakeProvisioner, FakeTools};

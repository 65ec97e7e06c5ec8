//! Core domain model types.
//!
//! - Stage status enum
//! - Per-stage records and the run report

mod record;
mod status;

pub use record::{RunReport, StageRecord};
pub use status::StageStatus;

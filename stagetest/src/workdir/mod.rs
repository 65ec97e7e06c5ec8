//! Persistence of values between stages.
//!
//! This module provides:
//! - `Key<T>`, a typed name for a persisted value
//! - `WorkingDir`, the per-test directory values are stored in

mod keys;
mod store;

pub use keys::Key;
pub use store::{WorkingDir, DATA_DIR};

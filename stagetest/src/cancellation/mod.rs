//! Structured cleanup utilities.
//!
//! `CleanupRegistry` holds named release actions and runs them in LIFO
//! order, so resources are torn down in the reverse order they were acquired.

mod cleanup;

pub use cleanup::{CleanupRegistry, ReleaseAction};

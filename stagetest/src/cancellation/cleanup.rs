//! Cleanup registry for releasing provisioned resources.

use crate::errors::{CleanupFailure, HarnessError};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tracing::{info, warn};

/// A boxed release action.
pub type ReleaseAction = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), HarnessError>> + Send>;

/// Registry for release actions executed in LIFO order.
///
/// Resources are released in the reverse order they were acquired. Every
/// action is attempted even when an earlier one fails or panics.
#[derive(Default)]
pub struct CleanupRegistry {
    actions: Mutex<Vec<(String, ReleaseAction)>>,
}

impl CleanupRegistry {
    /// Creates a new cleanup registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a release action.
    pub fn register<F, Fut>(&self, name: impl Into<String>, action: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), HarnessError>> + Send + 'static,
    {
        let boxed: ReleaseAction = Box::new(move || action().boxed());
        self.actions.lock().push((name.into(), boxed));
    }

    /// Returns the number of pending release actions.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.actions.lock().len()
    }

    /// Returns the pending action names in the order they will run.
    #[must_use]
    pub fn pending_names(&self) -> Vec<String> {
        self.actions
            .lock()
            .iter()
            .rev()
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Drops all registered actions without running them.
    ///
    /// Used once the guarded resources are handed over to someone else.
    pub fn disarm(&self) {
        self.actions.lock().clear();
    }

    /// Runs all release actions in LIFO order and empties the registry.
    ///
    /// Returns the failures in the order the actions ran.
    pub async fn run_all(&self) -> Vec<CleanupFailure> {
        let actions: Vec<_> = {
            let mut lock = self.actions.lock();
            std::mem::take(&mut *lock)
        };

        let mut failures = Vec::new();

        for (name, action) in actions.into_iter().rev() {
            info!(action = %name, "Running cleanup");
            match AssertUnwindSafe(action()).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(action = %name, error = %err, "Cleanup failed");
                    failures.push(CleanupFailure::new(name, err.to_string()));
                }
                Err(panic) => {
                    let msg = panic_message(panic.as_ref());
                    warn!(action = %name, panic = %msg, "Cleanup panicked");
                    failures.push(CleanupFailure::new(name, format!("panicked: {msg}")));
                }
            }
        }

        failures
    }

    /// Releases everything if `result` is an error, otherwise disarms.
    ///
    /// The error is returned unchanged; release failures are only
    /// logged, since the caller is already failing.
    pub async fn rollback_on_error<T>(
        &self,
        result: Result<T, HarnessError>,
    ) -> Result<T, HarnessError> {
        match result {
            Ok(value) => {
                self.disarm();
                Ok(value)
            }
            Err(err) => {
                warn!(error = %err, "Rolling back after failure");
                let failures = self.run_all().await;
                if !failures.is_empty() {
                    warn!(count = failures.len(), "Rollback left resources behind");
                }
                Err(err)
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic>".to_string()
    }
}

impl std::fmt::Debug for CleanupRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupRegistry")
            .field("pending", &self.pending_names())
            .finish()
    }
}

//! Per-run working directory holding values shared between stages.

use super::Key;
use crate::errors::{HarnessError, MissingValueError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Sub-directory holding persisted values.
pub const DATA_DIR: &str = ".test-data";

/// A working directory scoped to one test.
///
/// Values live at `<root>/.test-data/<key>.json` and survive the run, so a
/// later invocation can skip the stages that produced them. The harness never
/// deletes the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingDir {
    root: PathBuf,
}

impl WorkingDir {
    /// Creates a working directory handle rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the working directory for `test_name` under `stages_root`.
    ///
    /// Rust test paths (`module::test`) become `module_test` so each test gets
    /// exactly one directory level.
    #[must_use]
    pub fn for_test(stages_root: impl AsRef<Path>, test_name: &str) -> Self {
        let dir_name: String = test_name
            .replace("::", "_")
            .chars()
            .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
            .collect();
        Self::new(stages_root.as_ref().join(dir_name))
    }

    /// Returns the root path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Returns the file backing `key`.
    #[must_use]
    pub fn data_path<T>(&self, key: &Key<T>) -> PathBuf {
        self.root.join(DATA_DIR).join(format!("{}.json", key.name()))
    }

    /// Creates the directory if needed.
    pub async fn ensure(&self) -> Result<(), HarnessError> {
        tokio::fs::create_dir_all(self.root.join(DATA_DIR)).await?;
        Ok(())
    }

    /// Persists `value` under `key`, overwriting any earlier value.
    pub async fn save<T: Serialize + Sync>(
        &self,
        key: &Key<T>,
        value: &T,
    ) -> Result<(), HarnessError> {
        let path = self.data_path(key);
        let bytes = serde_json::to_vec_pretty(value)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        info!(key = %key, path = %path.display(), "Storing test data");
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }

    /// Loads the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::MissingValue`] if nothing was saved under the
    /// key in this directory.
    pub async fn load<T: DeserializeOwned>(&self, key: &Key<T>) -> Result<T, HarnessError> {
        let path = self.data_path(key);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(MissingValueError::new(key.name(), path).into());
            }
            Err(err) => return Err(err.into()),
        };
        debug!(key = %key, path = %path.display(), "Loaded test data");
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Returns true if a value is stored under `key`.
    pub async fn contains<T>(&self, key: &Key<T>) -> bool {
        tokio::fs::try_exists(self.data_path(key))
            .await
            .unwrap_or(false)
    }
}

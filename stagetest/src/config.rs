//! Harness configuration.
//!
//! Skipping is configured with an explicit [`SkipConfig`] handed to the
//! runner. [`SkipConfig::from_env`] only exists to translate the familiar
//! `SKIP_<stage>=true` variables at the edge of a test binary.

use crate::errors::HarnessError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Prefix of environment variables that skip a stage.
pub const SKIP_ENV_PREFIX: &str = "SKIP_";

/// Environment variable overriding [`HarnessConfig::stages_root`].
pub const STAGES_ROOT_ENV: &str = "STAGETEST_STAGES_ROOT";

/// Which stages to skip, keyed by stage name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SkipConfig {
    stages: BTreeMap<String, bool>,
}

impl SkipConfig {
    /// Creates a configuration that runs every stage.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a stage as skipped.
    #[must_use]
    pub fn skip(mut self, stage: impl Into<String>) -> Self {
        self.stages.insert(stage.into(), true);
        self
    }

    /// Sets the skip flag for a stage.
    pub fn set(&mut self, stage: impl Into<String>, skip: bool) {
        self.stages.insert(stage.into(), skip);
    }

    /// Returns true if the stage should be skipped.
    #[must_use]
    pub fn should_skip(&self, stage: &str) -> bool {
        self.stages.get(stage).copied().unwrap_or(false)
    }

    /// Returns the names of all skipped stages.
    #[must_use]
    pub fn skipped(&self) -> Vec<&str> {
        self.stages
            .iter()
            .filter(|(_, skip)| **skip)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Overlays `other` on top of this configuration.
    #[must_use]
    pub fn merge(mut self, other: &Self) -> Self {
        for (stage, skip) in &other.stages {
            self.stages.insert(stage.clone(), *skip);
        }
        self
    }

    /// Builds a configuration from `SKIP_<stage>` style variables.
    ///
    /// Values `""`, `0`, `false`, `no` and `off` (any case) leave the stage
    /// enabled; anything else skips it.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::new();
        for (key, value) in vars {
            if let Some(stage) = key.as_ref().strip_prefix(SKIP_ENV_PREFIX) {
                if !stage.is_empty() {
                    config.set(stage, parse_flag(value.as_ref()));
                }
            }
        }
        config
    }

    /// Reads `SKIP_<stage>` variables from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_vars(utf8_vars(std::env::vars_os()))
    }
}

/// Keeps the variables whose name and value are both valid UTF-8.
fn utf8_vars(vars: impl IntoIterator<Item = (OsString, OsString)>) -> Vec<(String, String)> {
    vars.into_iter()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
        .collect()
}

fn parse_flag(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "" | "0" | "false" | "no" | "off"
    )
}

/// Names of the external command line tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    /// Infrastructure provisioner binary.
    pub terraform: String,
    /// Cluster administration binary.
    pub kubectl: String,
    /// Package deployment binary.
    pub helm: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            terraform: "terraform".to_string(),
            kubectl: "kubectl".to_string(),
            helm: "helm".to_string(),
        }
    }
}

/// Configuration for a harness run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Parent of the per-test working directories.
    pub stages_root: PathBuf,
    /// Stages to skip.
    pub skip: SkipConfig,
    /// External tool binaries.
    pub tools: ToolPaths,
    /// Helm home; `~/.helm` when unset.
    pub helm_home: Option<PathBuf>,
    /// Repository root copied for each run.
    pub examples_root: PathBuf,
    /// Folder under `examples_root` holding the example modules.
    pub examples_dir: String,
    /// Module folder under `examples_dir` that the run applies.
    pub module_name: String,
    /// Chart installed by the validation stage.
    pub chart: String,
    /// Where example copies are placed; the system temp dir when unset.
    pub temp_root: Option<PathBuf>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            stages_root: PathBuf::from("stages"),
            skip: SkipConfig::default(),
            tools: ToolPaths::default(),
            helm_home: None,
            examples_root: PathBuf::from(".."),
            examples_dir: "examples".to_string(),
            module_name: "k8s-tiller".to_string(),
            chart: "stable/kubernetes-dashboard".to_string(),
            temp_root: None,
        }
    }
}

impl HarnessConfig {
    /// Creates a default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, HarnessError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            HarnessError::config(format!("Cannot read config {}: {e}", path.display()))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            HarnessError::config(format!("Invalid config {}: {e}", path.display()))
        })
    }

    /// Applies `STAGETEST_STAGES_ROOT` and `SKIP_<stage>` variables.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_vars(utf8_vars(std::env::vars_os()))
    }

    /// Applies overrides from an explicit variable list.
    #[must_use]
    pub fn with_vars<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let vars: Vec<(String, String)> = vars
            .into_iter()
            .map(|(k, v)| (k.as_ref().to_string(), v.as_ref().to_string()))
            .collect();

        if let Some((_, root)) = vars.iter().find(|(k, v)| k == STAGES_ROOT_ENV && !v.is_empty()) {
            self.stages_root = PathBuf::from(root);
        }
        self.skip = self.skip.merge(&SkipConfig::from_vars(vars));
        self
    }

    /// Sets the stages root.
    #[must_use]
    pub fn with_stages_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.stages_root = root.into();
        self
    }

    /// Sets the skip configuration.
    #[must_use]
    pub fn with_skip(mut self, skip: SkipConfig) -> Self {
        self.skip = skip;
        self
    }

    /// Sets the repository root that is copied for each run.
    #[must_use]
    pub fn with_examples_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.examples_root = root.into();
        self
    }

    /// Sets the helm home.
    #[must_use]
    pub fn with_helm_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.helm_home = Some(home.into());
        self
    }

    /// Sets the chart installed during validation.
    #[must_use]
    pub fn with_chart(mut self, chart: impl Into<String>) -> Self {
        self.chart = chart.into();
        self
    }

    /// Sets where example copies are placed.
    #[must_use]
    pub fn with_temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(root.into());
        self
    }

    /// Returns the directory example copies are placed in.
    #[must_use]
    pub fn resolved_temp_root(&self) -> PathBuf {
        self.temp_root.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Returns the helm home, defaulting to `~/.helm`.
    pub fn resolved_helm_home(&self) -> Result<PathBuf, HarnessError> {
        if let Some(home) = &self.helm_home {
            return Ok(home.clone());
        }
        let home = dirs::home_dir().ok_or_else(|| {
            HarnessError::config("Cannot determine home directory; configure helm_home")
        })?;
        Ok(home.join(".helm"))
    }
}

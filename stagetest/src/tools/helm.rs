//! Package deployment through Helm.

use super::kubectl::KubectlOptions;
use super::shell::{run_command, shell_quote, ShellCommand};
use crate::errors::HarnessError;
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::info;

/// One invocation of the package tool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageRequest {
    /// Subcommand, e.g. `install`.
    pub subcommand: String,
    /// Package or chart reference.
    pub package: String,
    /// Block until the release's resources are ready.
    pub wait: bool,
    /// Extra arguments appended after the package.
    pub extra_args: Vec<String>,
}

impl PackageRequest {
    /// Creates an `install` request for `chart`.
    #[must_use]
    pub fn install(chart: impl Into<String>) -> Self {
        Self {
            subcommand: "install".to_string(),
            package: chart.into(),
            ..Self::default()
        }
    }

    /// Waits for the release to become ready.
    #[must_use]
    pub fn with_wait(mut self) -> Self {
        self.wait = true;
        self
    }

    /// Appends an extra argument.
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }
}

/// The package deployment tool.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PackageTool: Send + Sync {
    /// Runs `request` against the cluster selected by `options`.
    async fn run(&self, options: &KubectlOptions, request: &PackageRequest) -> Result<String, HarnessError>;
}

/// [`PackageTool`] backed by the `helm` command line.
#[derive(Debug, Clone)]
pub struct HelmCli {
    binary: String,
    helm_home: PathBuf,
}

impl HelmCli {
    /// Creates a client running `binary` with the given helm home.
    #[must_use]
    pub fn new(binary: impl Into<String>, helm_home: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            helm_home: helm_home.into(),
        }
    }

    /// Returns the environment file sourced before each call.
    #[must_use]
    pub fn env_file(&self) -> PathBuf {
        self.helm_home.join("env")
    }

    /// Returns the helm arguments for `request`.
    #[must_use]
    pub fn args(options: &KubectlOptions, request: &PackageRequest) -> Vec<String> {
        let mut args = Vec::new();
        if !options.context_name.is_empty() {
            args.extend(["--kube-context".to_string(), options.context_name.clone()]);
        }
        if !options.config_path.is_empty() {
            args.extend(["--kubeconfig".to_string(), options.config_path.clone()]);
        }
        if !options.namespace.is_empty() {
            args.extend(["--namespace".to_string(), options.namespace.clone()]);
        }
        args.push(request.subcommand.clone());
        args.push(request.package.clone());
        if request.wait {
            args.push("--wait".to_string());
        }
        args.extend(request.extra_args.iter().cloned());
        args
    }

    /// Builds the command, sourcing the helm environment file when it exists.
    pub async fn command(
        &self,
        options: &KubectlOptions,
        request: &PackageRequest,
    ) -> Result<ShellCommand, HarnessError> {
        let args = Self::args(options, request);
        let env_file = self.env_file();
        if !tokio::fs::try_exists(&env_file).await? {
            return Ok(ShellCommand::new(&self.binary).args(args));
        }

        let helm = std::iter::once(self.binary.as_str())
            .chain(args.iter().map(String::as_str))
            .map(shell_quote)
            .collect::<Vec<_>>()
            .join(" ");
        let script = format!(". {} && {helm}", shell_quote(&env_file.to_string_lossy()));
        Ok(ShellCommand::new("sh").args(["-c".to_string(), script]))
    }
}

#[async_trait]
impl PackageTool for HelmCli {
    async fn run(&self, options: &KubectlOptions, request: &PackageRequest) -> Result<String, HarnessError> {
        info!(
            subcommand = %request.subcommand,
            package = %request.package,
            namespace = %options.namespace,
            "Running helm"
        );
        let cmd = self.command(options, request).await?;
        Ok(run_command(&cmd).await?.stdout)
    }
}

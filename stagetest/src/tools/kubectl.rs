//! Cluster administration through kubectl.

use super::shell::{run_command, ShellCommand};
use crate::errors::HarnessError;
use crate::utils::unique_id;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Which cluster, credentials and namespace a call targets.
///
/// Empty fields fall back to kubectl's own defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KubectlOptions {
    /// Kubeconfig context; the current context when empty.
    #[serde(default)]
    pub context_name: String,
    /// Kubeconfig file; `$KUBECONFIG` or `~/.kube/config` when empty.
    #[serde(default)]
    pub config_path: String,
    /// Namespace; the context's namespace when empty.
    #[serde(default)]
    pub namespace: String,
}

impl KubectlOptions {
    /// Creates options for a context and kubeconfig file.
    #[must_use]
    pub fn new(context_name: impl Into<String>, config_path: impl Into<String>) -> Self {
        Self {
            context_name: context_name.into(),
            config_path: config_path.into(),
            namespace: String::new(),
        }
    }

    /// Sets the namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Returns the `--context`, `--kubeconfig` and `--namespace` flags that
    /// are set.
    #[must_use]
    pub fn global_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if !self.context_name.is_empty() {
            args.extend(["--context".to_string(), self.context_name.clone()]);
        }
        if !self.config_path.is_empty() {
            args.extend(["--kubeconfig".to_string(), self.config_path.clone()]);
        }
        if !self.namespace.is_empty() {
            args.extend(["--namespace".to_string(), self.namespace.clone()]);
        }
        args
    }
}

/// The cluster administration interface.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ClusterAdmin: Send + Sync {
    /// Copies the user's kubeconfig to a fresh temp file and returns its path.
    async fn copy_home_kubeconfig_to_temp(&self) -> Result<PathBuf, HarnessError>;

    /// Creates a namespace.
    async fn create_namespace(&self, options: &KubectlOptions, name: &str) -> Result<(), HarnessError>;

    /// Deletes a namespace. Deleting a missing namespace is not an error.
    async fn delete_namespace(&self, options: &KubectlOptions, name: &str) -> Result<(), HarnessError>;

    /// Creates a service account in the options' namespace.
    async fn create_service_account(
        &self,
        options: &KubectlOptions,
        name: &str,
    ) -> Result<(), HarnessError>;

    /// Returns a bearer token for a service account in the options' namespace.
    async fn service_account_token(
        &self,
        options: &KubectlOptions,
        name: &str,
    ) -> Result<String, HarnessError>;

    /// Adds a kubeconfig context that authenticates as a service account,
    /// on the cluster of the options' current context.
    async fn add_service_account_context(
        &self,
        options: &KubectlOptions,
        context_name: &str,
        service_account: &str,
        token: &str,
    ) -> Result<(), HarnessError>;
}

/// [`ClusterAdmin`] backed by the `kubectl` command line.
#[derive(Debug, Clone)]
pub struct KubectlCli {
    binary: String,
    temp_root: PathBuf,
    kubeconfig: Option<PathBuf>,
}

impl Default for KubectlCli {
    fn default() -> Self {
        Self::new("kubectl")
    }
}

impl KubectlCli {
    /// Creates a client running `binary`. Kubeconfig copies go to the
    /// system temp dir.
    #[must_use]
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            temp_root: std::env::temp_dir(),
            kubeconfig: None,
        }
    }

    /// Sets the directory kubeconfig copies are written to.
    #[must_use]
    pub fn with_temp_root(mut self, temp_root: impl Into<PathBuf>) -> Self {
        self.temp_root = temp_root.into();
        self
    }

    /// Copies `path` instead of the user's default kubeconfig.
    #[must_use]
    pub fn with_kubeconfig(mut self, path: impl Into<PathBuf>) -> Self {
        self.kubeconfig = Some(path.into());
        self
    }

    /// Builds a kubectl command with the options' global flags.
    #[must_use]
    pub fn command<I, S>(&self, options: &KubectlOptions, args: I) -> ShellCommand
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ShellCommand::new(&self.binary)
            .args(options.global_args())
            .args(args)
    }

    async fn kubectl<I, S>(
        &self,
        operation: &str,
        options: &KubectlOptions,
        args: I,
    ) -> Result<String, HarnessError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        run_command(&self.command(options, args))
            .await
            .map(|out| out.stdout)
            .map_err(|e| HarnessError::cluster(operation, e))
    }
}

/// Returns the kubeconfig kubectl would use without `--kubeconfig`.
fn home_kubeconfig() -> Result<PathBuf, HarnessError> {
    if let Some(first) = std::env::var_os("KUBECONFIG")
        .as_deref()
        .and_then(|v| std::env::split_paths(v).find(|p| !p.as_os_str().is_empty()))
    {
        return Ok(first);
    }
    let home = dirs::home_dir()
        .ok_or_else(|| HarnessError::config("Cannot determine home directory to locate kubeconfig"))?;
    Ok(home.join(".kube").join("config"))
}

/// Copies `source` to a uniquely named kubeconfig under `temp_root`.
pub(crate) async fn copy_kubeconfig(source: &Path, temp_root: &Path) -> Result<PathBuf, HarnessError> {
    let dest = temp_root.join(format!("{}-kubeconfig", unique_id()));
    tokio::fs::copy(source, &dest).await.map_err(|e| {
        HarnessError::cluster(
            "copy kubeconfig",
            format!("{} -> {}: {e}", source.display(), dest.display()),
        )
    })?;
    info!(from = %source.display(), to = %dest.display(), "Copied kubeconfig");
    Ok(dest)
}

#[async_trait]
impl ClusterAdmin for KubectlCli {
    async fn copy_home_kubeconfig_to_temp(&self) -> Result<PathBuf, HarnessError> {
        let source = match &self.kubeconfig {
            Some(path) => path.clone(),
            None => home_kubeconfig()?,
        };
        copy_kubeconfig(&source, &self.temp_root).await
    }

    async fn create_namespace(&self, options: &KubectlOptions, name: &str) -> Result<(), HarnessError> {
        info!(namespace = %name, "Creating namespace");
        self.kubectl("create namespace", options, ["create", "namespace", name])
            .await
            .map(|_| ())
    }

    async fn delete_namespace(&self, options: &KubectlOptions, name: &str) -> Result<(), HarnessError> {
        info!(namespace = %name, "Deleting namespace");
        self.kubectl(
            "delete namespace",
            options,
            ["delete", "namespace", name, "--ignore-not-found"],
        )
        .await
        .map(|_| ())
    }

    async fn create_service_account(
        &self,
        options: &KubectlOptions,
        name: &str,
    ) -> Result<(), HarnessError> {
        info!(service_account = %name, namespace = %options.namespace, "Creating service account");
        self.kubectl("create serviceaccount", options, ["create", "serviceaccount", name])
            .await
            .map(|_| ())
    }

    async fn service_account_token(
        &self,
        options: &KubectlOptions,
        name: &str,
    ) -> Result<String, HarnessError> {
        let token = self
            .kubectl("create token", options, ["create", "token", name])
            .await?
            .trim()
            .to_string();
        if token.is_empty() {
            return Err(HarnessError::cluster(
                "create token",
                format!("empty token for service account {name}"),
            ));
        }
        debug!(service_account = %name, "Obtained service account token");
        Ok(token)
    }

    async fn add_service_account_context(
        &self,
        options: &KubectlOptions,
        context_name: &str,
        service_account: &str,
        token: &str,
    ) -> Result<(), HarnessError> {
        // The namespace flag does not apply to kubeconfig edits.
        let config_options = KubectlOptions {
            namespace: String::new(),
            ..options.clone()
        };

        let cluster = self
            .kubectl(
                "config view",
                &config_options,
                ["config", "view", "--minify", "-o", "jsonpath={.contexts[0].context.cluster}"],
            )
            .await?
            .trim()
            .to_string();
        if cluster.is_empty() {
            warn!(context = %options.context_name, "No cluster found for current context");
            return Err(HarnessError::cluster(
                "config view",
                "current context has no cluster",
            ));
        }

        self.kubectl(
            "config set-credentials",
            &config_options,
            [
                "config".to_string(),
                "set-credentials".to_string(),
                service_account.to_string(),
                format!("--token={token}"),
            ],
        )
        .await?;
        self.kubectl(
            "config set-context",
            &config_options,
            [
                "config".to_string(),
                "set-context".to_string(),
                context_name.to_string(),
                format!("--cluster={cluster}"),
                format!("--user={service_account}"),
            ],
        )
        .await?;

        info!(context = %context_name, %cluster, "Added service account context");
        Ok(())
    }
}

//! Infrastructure provisioning through Terraform.

use super::shell::{run_command, ShellCommand};
use crate::errors::HarnessError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::info;

/// Everything needed to apply or destroy one Terraform module.
///
/// Persisted between stages, so later stages (and later runs) apply and
/// destroy exactly what an earlier stage configured.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TerraformOptions {
    /// Module directory.
    pub terraform_dir: PathBuf,
    /// Input variables.
    #[serde(default)]
    pub vars: BTreeMap<String, serde_json::Value>,
    /// Environment variables for the terraform process.
    #[serde(default)]
    pub env_vars: BTreeMap<String, String>,
    /// Disable coloured output.
    #[serde(default)]
    pub no_color: bool,
}

impl TerraformOptions {
    /// Creates options for the module at `terraform_dir`.
    #[must_use]
    pub fn new(terraform_dir: impl Into<PathBuf>) -> Self {
        Self {
            terraform_dir: terraform_dir.into(),
            no_color: true,
            ..Self::default()
        }
    }

    /// Sets an input variable.
    #[must_use]
    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    /// Sets an environment variable.
    #[must_use]
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.insert(name.into(), value.into());
        self
    }

    /// Returns a string variable.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Config`] if the variable is missing or not a
    /// string.
    pub fn var_str(&self, name: &str) -> Result<&str, HarnessError> {
        self.vars
            .get(name)
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| {
                HarnessError::config(format!(
                    "Terraform variable '{name}' is missing or not a string"
                ))
            })
    }

    /// Renders the `-var name=value` arguments.
    ///
    /// Strings are passed verbatim; lists, maps, numbers and booleans as JSON,
    /// which Terraform parses as the matching HCL literal.
    #[must_use]
    pub fn var_args(&self) -> Vec<String> {
        self.vars
            .iter()
            .flat_map(|(name, value)| {
                let rendered = match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                ["-var".to_string(), format!("{name}={rendered}")]
            })
            .collect()
    }
}

/// The infrastructure-as-code provisioner.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Initialises the module and applies it, waiting for completion.
    async fn init_and_apply(&self, options: &TerraformOptions) -> Result<String, HarnessError>;

    /// Destroys everything the module created.
    async fn destroy(&self, options: &TerraformOptions) -> Result<String, HarnessError>;

    /// Reads a named output of an applied module.
    async fn output(&self, options: &TerraformOptions, name: &str) -> Result<String, HarnessError>;
}

/// [`Provisioner`] backed by the `terraform` command line.
#[derive(Debug, Clone)]
pub struct TerraformCli {
    binary: String,
}

impl Default for TerraformCli {
    fn default() -> Self {
        Self::new("terraform")
    }
}

impl TerraformCli {
    /// Creates a provisioner running `binary`.
    #[must_use]
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn base(&self, options: &TerraformOptions, subcommand: &str) -> ShellCommand {
        let cmd = ShellCommand::new(&self.binary)
            .arg(subcommand)
            .current_dir(&options.terraform_dir)
            .envs(&options.env_vars);
        if options.no_color {
            cmd.arg("-no-color")
        } else {
            cmd
        }
    }

    /// Builds `terraform init`.
    #[must_use]
    pub fn init_command(&self, options: &TerraformOptions) -> ShellCommand {
        self.base(options, "init").args(["-input=false", "-upgrade=false"])
    }

    /// Builds `terraform apply`.
    #[must_use]
    pub fn apply_command(&self, options: &TerraformOptions) -> ShellCommand {
        self.base(options, "apply")
            .args(["-input=false", "-auto-approve", "-lock=true"])
            .args(options.var_args())
    }

    /// Builds `terraform destroy`.
    #[must_use]
    pub fn destroy_command(&self, options: &TerraformOptions) -> ShellCommand {
        self.base(options, "destroy")
            .args(["-input=false", "-auto-approve"])
            .args(options.var_args())
    }

    /// Builds `terraform output`.
    #[must_use]
    pub fn output_command(&self, options: &TerraformOptions, name: &str) -> ShellCommand {
        self.base(options, "output").args(["-raw", name])
    }
}

#[async_trait]
impl Provisioner for TerraformCli {
    async fn init_and_apply(&self, options: &TerraformOptions) -> Result<String, HarnessError> {
        info!(dir = %options.terraform_dir.display(), "Applying terraform module");
        run_command(&self.init_command(options))
            .await
            .map_err(|e| HarnessError::provisioning("init", e))?;
        let output = run_command(&self.apply_command(options))
            .await
            .map_err(|e| HarnessError::provisioning("apply", e))?;
        Ok(output.stdout)
    }

    async fn destroy(&self, options: &TerraformOptions) -> Result<String, HarnessError> {
        info!(dir = %options.terraform_dir.display(), "Destroying terraform module");
        let output = run_command(&self.destroy_command(options))
            .await
            .map_err(|e| HarnessError::provisioning("destroy", e))?;
        Ok(output.stdout)
    }

    async fn output(&self, options: &TerraformOptions, name: &str) -> Result<String, HarnessError> {
        let output = run_command(&self.output_command(options, name))
            .await
            .map_err(|e| HarnessError::provisioning(format!("output {name}"), e))?;
        Ok(output.stdout.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn options() -> TerraformOptions {
        TerraformOptions::new("/tmp/examples/k8s-tiller")
            .with_var("resource_namespace", "abc-resources")
            .with_var("grant_access_to_rbac_service_accounts", serde_json::json!(["ns/sa"]))
            .with_env("TF_LOG", "INFO")
    }

    #[test]
    fn test_var_str() {
        let opts = options();
        assert_eq!(opts.var_str("resource_namespace").unwrap(), "abc-resources");
        assert!(opts.var_str("grant_access_to_rbac_service_accounts").is_err());
        assert!(opts.var_str("missing").is_err());
    }

    #[test]
    fn test_var_args_render_strings_raw_and_lists_as_json() {
        assert_eq!(
            options().var_args(),
            vec![
                "-var",
                r#"grant_access_to_rbac_service_accounts=["ns/sa"]"#,
                "-var",
                "resource_namespace=abc-resources",
            ]
        );
    }

    #[test]
    fn test_apply_command() {
        let cli = TerraformCli::new("tf");
        let cmd = cli.apply_command(&options());
        assert_eq!(cmd.program, "tf");
        assert_eq!(&cmd.args[..5], &["apply", "-no-color", "-input=false", "-auto-approve", "-lock=true"]);
        assert!(cmd.args.contains(&"resource_namespace=abc-resources".to_string()));
        assert_eq!(cmd.working_dir, Some(PathBuf::from("/tmp/examples/k8s-tiller")));
        assert_eq!(cmd.env.get("TF_LOG").map(String::as_str), Some("INFO"));
    }

    #[test]
    fn test_output_command() {
        let cmd = TerraformCli::default().output_command(&options(), "tiller_namespace");
        assert_eq!(cmd.to_string(), "terraform output -no-color -raw tiller_namespace");
    }

    #[test]
    fn test_options_roundtrip_through_json() {
        let opts = options();
        let json = serde_json::to_string(&opts).unwrap();
        let back: TerraformOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(back, opts);
    }

    #[tokio::test]
    async fn test_failed_apply_is_a_provisioning_error() {
        let tmp = tempfile::tempdir().unwrap();
        let cli = TerraformCli::new("false");
        let err = cli
            .init_and_apply(&TerraformOptions::new(tmp.path()))
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::Provisioning { ref operation, .. } if operation == "init"));
    }
}

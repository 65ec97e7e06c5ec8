//! Adapters for the external systems a run drives.
//!
//! Each system sits behind a trait so scenarios can be exercised with fakes:
//! - [`Provisioner`] / [`TerraformCli`]: infrastructure as code
//! - [`ClusterAdmin`] / [`KubectlCli`]: namespaces, service accounts, contexts
//! - [`PackageTool`] / [`HelmCli`]: chart installs

mod helm;
mod kubectl;
mod shell;
mod terraform;

pub use helm::{HelmCli, PackageRequest, PackageTool};
pub use kubectl::{ClusterAdmin, KubectlCli, KubectlOptions};
pub use shell::{run_command, shell_quote, CommandOutput, ShellCommand};
pub use terraform::{Provisioner, TerraformCli, TerraformOptions};

#[cfg(test)]
pub use helm::MockPackageTool;
#[cfg(test)]
pub use kubectl::MockClusterAdmin;
#[cfg(test)]
pub use terraform::MockProvisioner;

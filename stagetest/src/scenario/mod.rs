//! End-to-end scenarios built on the stage runner.
//!
//! The Tiller scenario provisions a scoped service account, applies the
//! `k8s-tiller` module, and validates it by installing a chart as that
//! account. Its stages can be skipped one by one with `SKIP_<stage>`:
//!
//! ```text
//! SKIP_cleanup=true cargo test -- --ignored        # keep everything up
//! SKIP_create_test_copy_of_examples=true \
//! SKIP_create_test_service_account=true \
//! SKIP_create_terratest_options=true \
//! SKIP_terraform_apply=true cargo test -- --ignored # re-run validate only
//! ```

use crate::tools::TerraformOptions;
use crate::workdir::Key;
use std::path::PathBuf;

mod tiller;

pub use tiller::{terraform_options, TillerScenario};

/// Stage names, in run order.
pub mod stage {
    /// Copies the examples tree to a private temp folder.
    pub const CREATE_TEST_COPY_OF_EXAMPLES: &str = "create_test_copy_of_examples";
    /// Creates the namespaced service account the test logs in as.
    pub const CREATE_TEST_SERVICE_ACCOUNT: &str = "create_test_service_account";
    /// Builds and persists the terraform options.
    pub const CREATE_TERRATEST_OPTIONS: &str = "create_terratest_options";
    /// Applies the module.
    pub const TERRAFORM_APPLY: &str = "terraform_apply";
    /// Installs a chart through the provisioned Tiller.
    pub const VALIDATE: &str = "validate";
    /// Deferred: destroys the module and the service account namespace.
    pub const CLEANUP: &str = "cleanup";

    /// All stages in the order they are declared.
    pub const ALL: [&str; 6] = [
        CREATE_TEST_COPY_OF_EXAMPLES,
        CREATE_TEST_SERVICE_ACCOUNT,
        CREATE_TERRATEST_OPTIONS,
        TERRAFORM_APPLY,
        VALIDATE,
        CLEANUP,
    ];
}

/// Path of the copied `k8s-tiller` module.
pub const MODULE_PATH: Key<PathBuf> = Key::new("k8sTillerTerraformModulePath");
/// Random identifier of the run's cluster resources.
pub const UNIQUE_ID: Key<String> = Key::new("uniqueID");
/// Private kubeconfig holding the service account context.
pub const KUBECONFIG_PATH: Key<PathBuf> = Key::new("tmpKubectlConfigPath");
/// Service account name; also the name of its kubeconfig context.
pub const SERVICE_ACCOUNT_NAME: Key<String> = Key::new("testServiceAccountName");
/// Namespace holding the service account.
pub const SERVICE_ACCOUNT_NAMESPACE: Key<String> = Key::new("testServiceAccountNamespace");
/// Options every terraform call of the run uses.
pub const TERRAFORM_OPTIONS: Key<TerraformOptions> = Key::new("TerraformOptions");

//! Recording fakes for the external tool traits.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use crate::errors::HarnessError;
use crate::tools::{
    ClusterAdmin, KubectlOptions, PackageRequest, PackageTool, Provisioner, TerraformOptions,
};

/// An ordered log of calls, shared by all fakes of one test.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a call.
    pub fn record(&self, call: impl Into<String>) {
        self.calls.lock().push(call.into());
    }

    /// Returns all calls in order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Returns the calls starting with `prefix`.
    #[must_use]
    pub fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Returns the index of the first call starting with `prefix`.
    #[must_use]
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.calls.lock().iter().position(|c| c.starts_with(prefix))
    }

    /// Clears the log.
    pub fn clear(&self) {
        self.calls.lock().clear();
    }
}

/// Operations a fake is told to fail.
#[derive(Debug, Default)]
struct Failures(Mutex<HashSet<String>>);

impl Failures {
    fn add(&self, operation: &str) {
        self.0.lock().insert(operation.to_string());
    }

    fn check(&self, operation: &str, fail: impl FnOnce() -> HarnessError) -> Result<(), HarnessError> {
        if self.0.lock().contains(operation) {
            Err(fail())
        } else {
            Ok(())
        }
    }
}

/// A [`Provisioner`] that records calls instead of running terraform.
///
/// Calls are logged as `terraform <op> <module dir>`.
#[derive(Debug, Default)]
pub struct FakeProvisioner {
    log: CallLog,
    failures: Failures,
}

impl FakeProvisioner {
    /// Creates a fake logging to `log`.
    #[must_use]
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            failures: Failures::default(),
        }
    }

    /// Makes `operation` (`apply`, `destroy` or `output`) fail.
    pub fn fail_on(&self, operation: &str) {
        self.failures.add(operation);
    }
}

#[async_trait]
impl Provisioner for FakeProvisioner {
    async fn init_and_apply(&self, options: &TerraformOptions) -> Result<String, HarnessError> {
        self.log
            .record(format!("terraform apply {}", options.terraform_dir.display()));
        self.failures
            .check("apply", || HarnessError::provisioning("apply", "fake apply failure"))?;
        Ok("Apply complete!".to_string())
    }

    async fn destroy(&self, options: &TerraformOptions) -> Result<String, HarnessError> {
        self.log
            .record(format!("terraform destroy {}", options.terraform_dir.display()));
        self.failures
            .check("destroy", || HarnessError::provisioning("destroy", "fake destroy failure"))?;
        Ok("Destroy complete!".to_string())
    }

    async fn output(&self, options: &TerraformOptions, name: &str) -> Result<String, HarnessError> {
        self.log.record(format!("terraform output {name}"));
        self.failures
            .check("output", || HarnessError::provisioning("output", "fake output failure"))?;
        Ok(options
            .vars
            .get(name)
            .and_then(serde_json::Value::as_str)
            .unwrap_or_default()
            .to_string())
    }
}

/// A [`ClusterAdmin`] that records calls instead of running kubectl.
///
/// The kubeconfig "copy" is an empty file written under the given directory.
#[derive(Debug)]
pub struct FakeCluster {
    log: CallLog,
    failures: Failures,
    temp_dir: PathBuf,
}

impl FakeCluster {
    /// Creates a fake logging to `log` that writes kubeconfigs to `temp_dir`.
    #[must_use]
    pub fn new(log: CallLog, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            log,
            failures: Failures::default(),
            temp_dir: temp_dir.into(),
        }
    }

    /// Makes `operation` fail. Operations are named after the trait methods.
    pub fn fail_on(&self, operation: &str) {
        self.failures.add(operation);
    }

    fn fail(&self, operation: &str) -> Result<(), HarnessError> {
        self.failures
            .check(operation, || HarnessError::cluster(operation, "fake cluster failure"))
    }
}

#[async_trait]
impl ClusterAdmin for FakeCluster {
    async fn copy_home_kubeconfig_to_temp(&self) -> Result<PathBuf, HarnessError> {
        self.log.record("kubectl copy kubeconfig");
        self.fail("copy_home_kubeconfig_to_temp")?;
        let path = self.temp_dir.join("fake-kubeconfig");
        tokio::fs::write(&path, "apiVersion: v1\nkind: Config\n").await?;
        Ok(path)
    }

    async fn create_namespace(&self, _options: &KubectlOptions, name: &str) -> Result<(), HarnessError> {
        self.log.record(format!("kubectl create namespace {name}"));
        self.fail("create_namespace")
    }

    async fn delete_namespace(&self, _options: &KubectlOptions, name: &str) -> Result<(), HarnessError> {
        self.log.record(format!("kubectl delete namespace {name}"));
        self.fail("delete_namespace")
    }

    async fn create_service_account(
        &self,
        options: &KubectlOptions,
        name: &str,
    ) -> Result<(), HarnessError> {
        self.log
            .record(format!("kubectl create serviceaccount {}/{name}", options.namespace));
        self.fail("create_service_account")
    }

    async fn service_account_token(
        &self,
        _options: &KubectlOptions,
        name: &str,
    ) -> Result<String, HarnessError> {
        self.log.record(format!("kubectl create token {name}"));
        self.fail("service_account_token")?;
        Ok(format!("token-for-{name}"))
    }

    async fn add_service_account_context(
        &self,
        _options: &KubectlOptions,
        context_name: &str,
        service_account: &str,
        _token: &str,
    ) -> Result<(), HarnessError> {
        self.log
            .record(format!("kubectl set-context {context_name} --user={service_account}"));
        self.fail("add_service_account_context")
    }
}

/// A [`PackageTool`] that records calls instead of running helm.
///
/// Calls are logged as the helm argument list.
#[derive(Debug, Default)]
pub struct FakePackageTool {
    log: CallLog,
    failures: Failures,
}

impl FakePackageTool {
    /// Creates a fake logging to `log`.
    #[must_use]
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            failures: Failures::default(),
        }
    }

    /// Makes every call with `subcommand` fail.
    pub fn fail_on(&self, subcommand: &str) {
        self.failures.add(subcommand);
    }
}

#[async_trait]
impl PackageTool for FakePackageTool {
    async fn run(&self, options: &KubectlOptions, request: &PackageRequest) -> Result<String, HarnessError> {
        let args = crate::tools::HelmCli::args(options, request);
        self.log.record(format!("helm {}", args.join(" ")));
        self.failures.check(&request.subcommand, || {
            HarnessError::cluster(format!("helm {}", request.subcommand), "fake helm failure")
        })?;
        Ok(String::new())
    }
}

/// One fake of each tool, sharing a call log.
#[derive(Debug, Clone)]
pub struct FakeTools {
    /// The shared call log.
    pub log: CallLog,
    /// Fake provisioner.
    pub provisioner: Arc<FakeProvisioner>,
    /// Fake cluster.
    pub cluster: Arc<FakeCluster>,
    /// Fake package tool.
    pub packages: Arc<FakePackageTool>,
}

impl FakeTools {
    /// Creates the fakes; kubeconfig copies are written under `temp_dir`.
    #[must_use]
    pub fn new(temp_dir: impl Into<PathBuf>) -> Self {
        let log = CallLog::new();
        Self {
            provisioner: Arc::new(FakeProvisioner::new(log.clone())),
            cluster: Arc::new(FakeCluster::new(log.clone(), temp_dir)),
            packages: Arc::new(FakePackageTool::new(log.clone())),
            log,
        }
    }
}

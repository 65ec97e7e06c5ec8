//! The Tiller deployment scenario.

use super::{
    stage, KUBECONFIG_PATH, MODULE_PATH, SERVICE_ACCOUNT_NAME, SERVICE_ACCOUNT_NAMESPACE,
    TERRAFORM_OPTIONS, UNIQUE_ID,
};
use crate::cancellation::CleanupRegistry;
use crate::config::HarnessConfig;
use crate::core::RunReport;
use crate::errors::HarnessError;
use crate::events::{EventSink, LoggingEventSink};
use crate::stages::StageRunner;
use crate::tools::{
    ClusterAdmin, HelmCli, KubectlCli, KubectlOptions, PackageRequest, PackageTool, Provisioner,
    TerraformCli, TerraformOptions,
};
use crate::utils::{copy_folder_to, copy_folder_to_temp, unique_id, validate_dns_label};
use crate::workdir::WorkingDir;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Builds the terraform options for the `k8s-tiller` module.
///
/// All names derive from `unique_id` so parallel runs do not collide, and
/// the test service account is granted access to the deployed Tiller.
#[must_use]
pub fn terraform_options(
    module_path: &Path,
    unique_id: &str,
    service_account_name: &str,
    service_account_namespace: &str,
) -> TerraformOptions {
    let id = unique_id.to_lowercase();
    TerraformOptions::new(module_path)
        .with_var("tiller_namespace", format!("{id}-tiller"))
        .with_var("resource_namespace", format!("{id}-resources"))
        .with_var("service_account_name", format!("{id}-tiller-service-account"))
        .with_var(
            "tls_subject",
            serde_json::json!({
                "common_name": "tiller",
                "org": "Stagetest",
            }),
        )
        .with_var("private_key_algorithm", "ECDSA")
        .with_var("private_key_ecdsa_curve", "P256")
        .with_var(
            "grant_access_to_rbac_service_accounts",
            serde_json::json!([format!("{service_account_namespace}/{service_account_name}")]),
        )
        .with_var("kubectl_config_context_name", "")
        .with_var("kubectl_config_path", "")
}

/// Provisions Tiller with terraform and validates it with a chart install.
///
/// Stages, in order: [`stage::ALL`]. `cleanup` is deferred right after the
/// terraform options exist, so it runs whenever anything later fails.
#[derive(Clone)]
pub struct TillerScenario {
    config: Arc<HarnessConfig>,
    provisioner: Arc<dyn Provisioner>,
    cluster: Arc<dyn ClusterAdmin>,
    packages: Arc<dyn PackageTool>,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for TillerScenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TillerScenario")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TillerScenario {
    /// Creates a scenario over the given tools.
    #[must_use]
    pub fn new(
        config: HarnessConfig,
        provisioner: Arc<dyn Provisioner>,
        cluster: Arc<dyn ClusterAdmin>,
        packages: Arc<dyn PackageTool>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            provisioner,
            cluster,
            packages,
            events: Arc::new(LoggingEventSink),
        }
    }

    /// Creates a scenario running the real command line tools.
    pub fn with_cli_tools(config: HarnessConfig) -> Result<Self, HarnessError> {
        let helm = HelmCli::new(&config.tools.helm, config.resolved_helm_home()?);
        let terraform = TerraformCli::new(&config.tools.terraform);
        let kubectl = KubectlCli::new(&config.tools.kubectl).with_temp_root(config.resolved_temp_root());
        Ok(Self::new(
            config,
            Arc::new(terraform),
            Arc::new(kubectl),
            Arc::new(helm),
        ))
    }

    /// Sets the sink stage events are emitted to.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Runs every stage for `test_name` and cleans up afterwards.
    ///
    /// State is kept in `<stages root>/<test name>`, so a later run with
    /// some stages skipped picks up where an earlier one left off.
    pub async fn run(&self, test_name: &str) -> Result<RunReport, HarnessError> {
        let runner = StageRunner::builder(test_name)
            .working_dir(WorkingDir::for_test(&self.config.stages_root, test_name))
            .skip(self.config.skip.clone())
            .event_sink(self.events.clone())
            .build()
            .await?;

        let scenario = self.clone();
        runner
            .run(|r| async move { scenario.stages(&r).await })
            .await
    }

    async fn stages(&self, r: &StageRunner) -> Result<(), HarnessError> {
        r.run_stage(stage::CREATE_TEST_COPY_OF_EXAMPLES, |wd| async move {
            let root = &self.config.examples_root;
            let folder = match &self.config.temp_root {
                Some(temp_root) => copy_folder_to(root, &self.config.examples_dir, temp_root).await?,
                None => copy_folder_to_temp(root, &self.config.examples_dir).await?,
            };
            info!(path = %folder.display(), "Path to test folder");
            wd.save(&MODULE_PATH, &folder.join(&self.config.module_name)).await
        })
        .await?;

        r.run_stage(stage::CREATE_TEST_SERVICE_ACCOUNT, |wd| async move {
            self.create_test_service_account(&wd).await
        })
        .await?;

        r.run_stage(stage::CREATE_TERRATEST_OPTIONS, |wd| async move {
            let id = wd.load(&UNIQUE_ID).await?;
            let account = wd.load(&SERVICE_ACCOUNT_NAME).await?;
            let namespace = wd.load(&SERVICE_ACCOUNT_NAMESPACE).await?;
            let module = wd.load(&MODULE_PATH).await?;
            let options = terraform_options(&module, &id, &account, &namespace);
            wd.save(&TERRAFORM_OPTIONS, &options).await
        })
        .await?;

        let provisioner = self.provisioner.clone();
        let cluster = self.cluster.clone();
        r.defer_stage(stage::CLEANUP, move |wd| async move {
            let options = wd.load(&TERRAFORM_OPTIONS).await?;
            provisioner.destroy(&options).await?;

            let namespace = wd.load(&SERVICE_ACCOUNT_NAMESPACE).await?;
            cluster
                .delete_namespace(&KubectlOptions::default(), &namespace)
                .await
        })?;

        r.run_stage(stage::TERRAFORM_APPLY, |wd| async move {
            let options = wd.load(&TERRAFORM_OPTIONS).await?;
            self.provisioner.init_and_apply(&options).await.map(|_| ())
        })
        .await?;

        r.run_stage(stage::VALIDATE, |wd| async move {
            let options = wd.load(&TERRAFORM_OPTIONS).await?;
            let resource_namespace = options.var_str("resource_namespace")?;
            let kubeconfig = wd.load(&KUBECONFIG_PATH).await?;
            let account = wd.load(&SERVICE_ACCOUNT_NAME).await?;

            let kubectl = KubectlOptions::new(account, kubeconfig.to_string_lossy())
                .with_namespace(resource_namespace);
            let request = PackageRequest::install(self.config.chart.as_str()).with_wait();
            self.packages.run(&kubectl, &request).await.map(|_| ())
        })
        .await?;

        Ok(())
    }

    /// Creates a service account in its own namespace with a kubeconfig
    /// context to log in as it.
    ///
    /// The namespace is deleted again if any later step fails.
    async fn create_test_service_account(&self, wd: &WorkingDir) -> Result<(), HarnessError> {
        let id = unique_id();
        let lower = id.to_lowercase();
        let account = format!("{lower}-test-account");
        let namespace = format!("{lower}-test-account-namespace");
        validate_dns_label(&namespace)?;

        let kubeconfig = self.cluster.copy_home_kubeconfig_to_temp().await?;
        let options = KubectlOptions::new("", kubeconfig.to_string_lossy());
        self.cluster.create_namespace(&options, &namespace).await?;
        let options = options.with_namespace(&namespace);

        let rollback = CleanupRegistry::new();
        {
            let cluster = self.cluster.clone();
            let options = options.clone();
            let namespace = namespace.clone();
            rollback.register("delete_test_namespace", move || async move {
                cluster.delete_namespace(&options, &namespace).await
            });
        }

        let granted = async {
            self.cluster.create_service_account(&options, &account).await?;
            let token = self.cluster.service_account_token(&options, &account).await?;
            self.cluster
                .add_service_account_context(&options, &account, &account, &token)
                .await
        }
        .await;
        rollback.rollback_on_error(granted).await?;

        wd.save(&UNIQUE_ID, &id).await?;
        wd.save(&KUBECONFIG_PATH, &kubeconfig).await?;
        wd.save(&SERVICE_ACCOUNT_NAME, &account).await?;
        wd.save(&SERVICE_ACCOUNT_NAMESPACE, &namespace).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SkipConfig;
    use crate::core::StageStatus;
    use crate::events::CollectingEventSink;
    use crate::testing::FakeTools;
    use crate::tools::{MockClusterAdmin, MockPackageTool, MockProvisioner};
    use mockall::predicate::eq;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;
    use tempfile::TempDir;

    /// A checkout with `examples/k8s-tiller/main.tf` and a stages root.
    struct Sandbox {
        dir: TempDir,
    }

    impl Sandbox {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let module = dir.path().join("repo/examples/k8s-tiller");
            std::fs::create_dir_all(&module).unwrap();
            std::fs::write(module.join("main.tf"), "# module\n").unwrap();
            std::fs::create_dir_all(dir.path().join("tmp")).unwrap();
            Self { dir }
        }

        fn config(&self) -> HarnessConfig {
            HarnessConfig::new()
                .with_examples_root(self.dir.path().join("repo"))
                .with_stages_root(self.dir.path().join("stages"))
                .with_temp_root(self.dir.path().join("tmp"))
        }

        fn workdir(&self, test_name: &str) -> WorkingDir {
            WorkingDir::for_test(self.dir.path().join("stages"), test_name)
        }

        fn path(&self) -> &Path {
            self.dir.path()
        }
    }

    fn scenario(config: HarnessConfig, tools: &FakeTools) -> TillerScenario {
        TillerScenario::new(
            config,
            tools.provisioner.clone(),
            tools.cluster.clone(),
            tools.packages.clone(),
        )
    }

    #[test]
    fn test_terraform_options_vars() {
        let opts = terraform_options(Path::new("/m"), "AbC123", "abc123-test-account", "abc123-test-account-namespace");
        assert_eq!(opts.terraform_dir, PathBuf::from("/m"));
        assert_eq!(opts.var_str("resource_namespace").unwrap(), "abc123-resources");
        assert_eq!(opts.var_str("tiller_namespace").unwrap(), "abc123-tiller");
        assert_eq!(
            opts.vars["grant_access_to_rbac_service_accounts"],
            serde_json::json!(["abc123-test-account-namespace/abc123-test-account"])
        );
    }

    #[tokio::test]
    async fn test_full_run_orders_tool_calls() {
        let sandbox = Sandbox::new();
        let tools = FakeTools::new(sandbox.path().join("tmp"));
        let sink = Arc::new(CollectingEventSink::new());

        let report = scenario(sandbox.config(), &tools)
            .with_event_sink(sink.clone())
            .run("TestK8STiller")
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(
            report.executed(),
            vec![
                stage::CREATE_TEST_COPY_OF_EXAMPLES,
                stage::CREATE_TEST_SERVICE_ACCOUNT,
                stage::CREATE_TERRATEST_OPTIONS,
                stage::TERRAFORM_APPLY,
                stage::VALIDATE,
                stage::CLEANUP,
            ]
        );

        let log = &tools.log;
        let apply = log.position("terraform apply").unwrap();
        let install = log.position("helm").unwrap();
        let destroy = log.position("terraform destroy").unwrap();
        assert!(log.position("kubectl create namespace").unwrap() < apply);
        assert!(apply < install);
        assert!(install < destroy);

        let wd = sandbox.workdir("TestK8STiller");
        let account = wd.load(&SERVICE_ACCOUNT_NAME).await.unwrap();
        let namespace = wd.load(&SERVICE_ACCOUNT_NAMESPACE).await.unwrap();
        let options = wd.load(&TERRAFORM_OPTIONS).await.unwrap();
        let helm = &log.calls_starting_with("helm")[0];
        assert!(helm.contains(&format!("--kube-context {account}")));
        assert!(helm.contains(&format!(
            "--namespace {} install stable/kubernetes-dashboard --wait",
            options.var_str("resource_namespace").unwrap()
        )));
        assert_eq!(
            log.calls().last().unwrap(),
            &format!("kubectl delete namespace {namespace}")
        );
        assert!(options.terraform_dir.ends_with("examples/k8s-tiller"));
        assert!(options.terraform_dir.join("main.tf").exists());
        assert_eq!(sink.stages_for(crate::events::STAGE_COMPLETED).len(), 6);
    }

    #[tokio::test]
    async fn test_service_account_failure_deletes_namespace() {
        let sandbox = Sandbox::new();
        let tools = FakeTools::new(sandbox.path().join("tmp"));
        tools.cluster.fail_on("create_service_account");

        let err = scenario(sandbox.config(), &tools)
            .run("TestK8STiller")
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Some(stage::CREATE_TEST_SERVICE_ACCOUNT));
        let created = tools.log.calls_starting_with("kubectl create namespace");
        let deleted = tools.log.calls_starting_with("kubectl delete namespace");
        assert_eq!(created.len(), 1);
        assert_eq!(
            deleted,
            vec![created[0].replace("create", "delete")]
        );
        assert!(tools.log.position("terraform").is_none());
        assert!(!sandbox
            .workdir("TestK8STiller")
            .contains(&SERVICE_ACCOUNT_NAMESPACE)
            .await);
    }

    #[tokio::test]
    async fn test_context_failure_also_rolls_back() {
        let sandbox = Sandbox::new();
        let tools = FakeTools::new(sandbox.path().join("tmp"));
        tools.cluster.fail_on("add_service_account_context");

        let err = scenario(sandbox.config(), &tools)
            .run("TestK8STiller")
            .await
            .unwrap_err();

        assert!(matches!(err.root_cause(), HarnessError::Cluster { .. }));
        assert_eq!(tools.log.calls_starting_with("kubectl delete namespace").len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_runs_when_validation_fails() {
        let sandbox = Sandbox::new();
        let tools = FakeTools::new(sandbox.path().join("tmp"));
        tools.packages.fail_on("install");

        let err = scenario(sandbox.config(), &tools)
            .run("TestK8STiller")
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Some(stage::VALIDATE));
        let helm = tools.log.position("helm").unwrap();
        let destroy = tools.log.position("terraform destroy").unwrap();
        assert!(helm < destroy);
        assert_eq!(tools.log.calls_starting_with("kubectl delete namespace").len(), 1);
    }

    #[tokio::test]
    async fn test_validate_alone_reuses_persisted_options() {
        let sandbox = Sandbox::new();
        let tools = FakeTools::new(sandbox.path().join("tmp"));

        // First run keeps everything up.
        let keep = sandbox.config().with_skip(SkipConfig::new().skip(stage::CLEANUP));
        scenario(keep, &tools).run("TestK8STiller").await.unwrap();
        let first = sandbox
            .workdir("TestK8STiller")
            .load(&TERRAFORM_OPTIONS)
            .await
            .unwrap();
        tools.log.clear();

        // Second run only validates.
        let mut skip = SkipConfig::new();
        for name in stage::ALL.iter().filter(|s| **s != stage::VALIDATE) {
            skip.set(*name, true);
        }
        let report = scenario(sandbox.config().with_skip(skip), &tools)
            .run("TestK8STiller")
            .await
            .unwrap();

        assert_eq!(report.executed(), vec![stage::VALIDATE]);
        assert_eq!(report.status_of(stage::TERRAFORM_APPLY), StageStatus::Skipped);
        let calls = tools.log.calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].contains(&format!(
            "--namespace {}",
            first.var_str("resource_namespace").unwrap()
        )));
    }

    #[tokio::test]
    async fn test_validate_without_prior_run_is_missing_value() {
        let sandbox = Sandbox::new();
        let tools = FakeTools::new(sandbox.path().join("tmp"));
        let mut skip = SkipConfig::new();
        for name in stage::ALL.iter().filter(|s| **s != stage::VALIDATE) {
            skip.set(*name, true);
        }

        let err = scenario(sandbox.config().with_skip(skip), &tools)
            .run("TestK8STiller")
            .await
            .unwrap_err();

        assert_eq!(err.stage(), Some(stage::VALIDATE));
        assert!(matches!(err.root_cause(), HarnessError::MissingValue(_)));
        assert!(tools.log.calls().is_empty());
    }

    #[tokio::test]
    async fn test_apply_failure_still_destroys() {
        let sandbox = Sandbox::new();
        let tmp = sandbox.path().join("tmp");
        let kubeconfig = tmp.join("kc");
        std::fs::write(&kubeconfig, "").unwrap();

        let mut cluster = MockClusterAdmin::new();
        cluster
            .expect_copy_home_kubeconfig_to_temp()
            .times(1)
            .return_once(move || Ok(kubeconfig));
        cluster.expect_create_namespace().times(1).returning(|_, _| Ok(()));
        cluster.expect_create_service_account().times(1).returning(|_, _| Ok(()));
        cluster
            .expect_service_account_token()
            .times(1)
            .returning(|_, _| Ok("t0ken".to_string()));
        cluster
            .expect_add_service_account_context()
            .withf(|_, ctx, sa, token| ctx == sa && token == "t0ken")
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        cluster
            .expect_delete_namespace()
            .withf(|opts, ns| opts.namespace.is_empty() && ns.ends_with("-test-account-namespace"))
            .times(1)
            .returning(|_, _| Ok(()));

        let mut provisioner = MockProvisioner::new();
        provisioner
            .expect_init_and_apply()
            .times(1)
            .returning(|_| Err(HarnessError::provisioning("apply", "quota exceeded")));
        provisioner.expect_destroy().times(1).returning(|_| Ok(String::new()));

        let mut packages = MockPackageTool::new();
        packages.expect_run().never();

        let err = TillerScenario::new(
            sandbox.config(),
            Arc::new(provisioner),
            Arc::new(cluster),
            Arc::new(packages),
        )
        .run("TestK8STiller")
        .await
        .unwrap_err();

        assert_eq!(err.stage(), Some(stage::TERRAFORM_APPLY));
        assert!(err.to_string().contains("quota exceeded"));
    }

    #[tokio::test]
    async fn test_chart_comes_from_config() {
        let sandbox = Sandbox::new();
        let tmp = sandbox.path().join("tmp");
        let tools = FakeTools::new(&tmp);

        let mut packages = MockPackageTool::new();
        packages
            .expect_run()
            .with(mockall::predicate::always(), eq(PackageRequest::install("stable/nginx").with_wait()))
            .times(1)
            .returning(|_, _| Ok("deployed".to_string()));

        TillerScenario::new(
            sandbox.config().with_chart("stable/nginx"),
            tools.provisioner.clone(),
            tools.cluster.clone(),
            Arc::new(packages),
        )
        .run("TestK8STillerChart")
        .await
        .unwrap();
    }
}

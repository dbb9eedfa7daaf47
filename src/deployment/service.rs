use super::models::{DeployOptions, Deployment, DeploymentState, EnvironmentConfig};
use super::platform::{extract_deploy_url, DeployPlatform, PlatformTokens, ReachabilityProbe};
use super::runner::{CommandOutput, CommandRunner, CommandSpec};
use crate::error::{AutomationError, AutomationResult, PipelineStageError};
use crate::notifications::{AlertOptions, Channel, NotificationService, NotificationType, Severity};
use crate::run_store::{
    append_typed, bump_counter, recent_typed, set_field, BoundedHistory, RecordKind,
    RunRecordStore,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

const HISTORY_CAPACITY: usize = 50;
const LOG_TAIL_LINES: usize = 20;

#[derive(Debug, Clone, Serialize)]
pub struct AutoDeployOutcome {
    pub environment: String,
    pub deployment_id: Option<String>,
    pub state: Option<DeploymentState>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AutoDeployReport {
    pub branch: String,
    pub deployments: Vec<AutoDeployOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeploymentStatus {
    pub environments: Vec<String>,
    pub recent: usize,
    pub last: Option<DeploymentSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeploymentSummary {
    pub id: String,
    pub environment: String,
    pub state: DeploymentState,
    pub started_at: String,
}

/// Multi-stage deployment pipeline with branch gating.
pub struct DeploymentAutomation {
    environments: BTreeMap<String, EnvironmentConfig>,
    runner: Arc<dyn CommandRunner>,
    probe: Arc<dyn ReachabilityProbe>,
    tokens: PlatformTokens,
    store: Arc<dyn RunRecordStore>,
    notifier: Option<Arc<NotificationService>>,
    history: Mutex<BoundedHistory<Deployment>>,
}

impl DeploymentAutomation {
    pub fn new(
        environments: Vec<EnvironmentConfig>,
        runner: Arc<dyn CommandRunner>,
        probe: Arc<dyn ReachabilityProbe>,
        store: Arc<dyn RunRecordStore>,
    ) -> Self {
        Self {
            environments: environments
                .into_iter()
                .map(|e| (e.name.clone(), e))
                .collect(),
            runner,
            probe,
            tokens: PlatformTokens::default(),
            store,
            notifier: None,
            history: Mutex::new(BoundedHistory::new(HISTORY_CAPACITY)),
        }
    }

    pub fn with_tokens(mut self, tokens: PlatformTokens) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<NotificationService>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn environments(&self) -> impl Iterator<Item = &EnvironmentConfig> {
        self.environments.values()
    }

    /// Run the full pipeline for one environment.
    ///
    /// The returned error is the stage failure; the failed deployment itself
    /// is still recorded in history and persisted.
    pub async fn deploy(
        &self,
        options: DeployOptions,
        triggered_by: &str,
    ) -> AutomationResult<Deployment> {
        let env = self
            .environments
            .get(&options.environment)
            .ok_or_else(|| {
                AutomationError::Validation(format!(
                    "unknown environment '{}'",
                    options.environment
                ))
            })?
            .clone();
        let platform = options
            .platform
            .clone()
            .unwrap_or_else(|| env.platform.clone());

        let mut deployment = Deployment::start(&env.name, &platform, triggered_by);
        info!(
            "Deployment {} to {} on {} started",
            deployment.id, env.name, platform
        );

        let result = self.run_pipeline(&env, &options, &mut deployment).await;
        if let Err(e) = &result {
            if let Err(t) = deployment.fail(e.to_string()) {
                error!("Deployment {}: {}", deployment.id, t);
            }
            error!(
                "Deployment {} to {} failed at {}: {}",
                deployment.id,
                env.name,
                deployment.failed_at.unwrap_or(DeploymentState::Pending),
                e
            );
        } else {
            info!(
                "Deployment {} to {} verified in {} ms",
                deployment.id,
                env.name,
                deployment.duration_ms.unwrap_or_default()
            );
        }

        self.persist(&deployment);
        self.notify(&deployment).await;
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(deployment.clone());

        result.map(|_| deployment)
    }

    async fn run_pipeline(
        &self,
        env: &EnvironmentConfig,
        options: &DeployOptions,
        deployment: &mut Deployment,
    ) -> AutomationResult<()> {
        self.precheck(env, options, deployment).await?;
        self.advance(deployment, DeploymentState::Precheck)?;

        if options.skip_tests {
            deployment.warn("tests skipped on request");
            deployment.log_build("tests skipped");
        } else {
            let spec = CommandSpec::parse(&env.test_command)?;
            let output = self.run_logged(&spec, &env.project_dir, deployment, false).await?;
            if !output.success() {
                return Err(PipelineStageError::TestFailure(failure_summary(&output)).into());
            }
        }
        self.advance(deployment, DeploymentState::Tested)?;

        let spec = CommandSpec::parse(&env.build_command)?;
        let output = self.run_logged(&spec, &env.project_dir, deployment, false).await?;
        if !output.success() {
            return Err(PipelineStageError::BuildFailure(failure_summary(&output)).into());
        }
        self.advance(deployment, DeploymentState::Built)?;

        let platform = DeployPlatform::parse(&deployment.platform)?;
        let spec = platform.deploy_command(env, &self.tokens);
        let output = self.run_logged(&spec, &env.project_dir, deployment, true).await?;
        if !output.success() {
            return Err(PipelineStageError::DeployFailure(failure_summary(&output)).into());
        }
        deployment.url = extract_deploy_url(&output.stdout);
        self.advance(deployment, DeploymentState::Deployed)?;

        self.verify(env, deployment).await;
        self.advance(deployment, DeploymentState::Verified)?;
        Ok(())
    }

    /// Branch, working tree and build entry gates. Only the first two yield to `force`.
    async fn precheck(
        &self,
        env: &EnvironmentConfig,
        options: &DeployOptions,
        deployment: &mut Deployment,
    ) -> AutomationResult<()> {
        let branch = self.current_branch(&env.project_dir).await?;
        let commit = self
            .git(&env.project_dir, &["rev-parse", "HEAD"])
            .await
            .unwrap_or_else(|e| {
                warn!("Could not read commit of {}: {}", env.project_dir.display(), e);
                String::new()
            });
        deployment.branch = branch.clone();
        deployment.commit = commit.clone();
        deployment.log_build(format!("branch {} at {}", branch, short_sha(&commit)));

        if branch != env.branch {
            let mismatch = PipelineStageError::BranchMismatch {
                expected: env.branch.clone(),
                actual: branch,
            };
            if !options.force {
                return Err(mismatch.into());
            }
            let note = format!("{} (forced)", mismatch);
            warn!("Deployment {}: {}", deployment.id, note);
            deployment.log_build(format!("WARNING: {}", note));
            deployment.warn(note);
        }

        let status = self
            .git(&env.project_dir, &["status", "--porcelain"])
            .await?;
        if !status.is_empty() {
            if !options.force {
                return Err(PipelineStageError::DirtyWorkingTree.into());
            }
            let note = "working tree has uncommitted changes (forced)";
            warn!("Deployment {}: {}", deployment.id, note);
            deployment.log_build(format!("WARNING: {}", note));
            deployment.warn(note);
        }

        let entry = env.project_dir.join(&env.build_entry);
        if !entry.exists() {
            return Err(
                PipelineStageError::MissingBuildConfig(entry.display().to_string()).into(),
            );
        }
        deployment.log_build("prechecks passed");
        Ok(())
    }

    async fn verify(&self, env: &EnvironmentConfig, deployment: &mut Deployment) {
        let Some(domain) = &env.domain else {
            deployment.warn("no domain configured, verification skipped");
            return;
        };
        let url = format!("https://{}", domain.trim_start_matches("https://"));
        match self.probe.probe(&url).await {
            Ok(status) if (200..300).contains(&status) => {
                deployment.log_deploy(format!("{} answered {}", url, status));
            }
            Ok(status) => {
                deployment.warn(format!("verification of {} returned {}", url, status));
            }
            Err(e) => {
                deployment.warn(format!("verification of {} failed: {}", url, e));
            }
        }
    }

    fn advance(&self, deployment: &mut Deployment, next: DeploymentState) -> AutomationResult<()> {
        deployment
            .advance(next)
            .map_err(|e| AutomationError::Validation(e.to_string()))?;
        if next == DeploymentState::Deployed || next == DeploymentState::Verified {
            deployment.log_deploy("stage complete");
        } else {
            deployment.log_build("stage complete");
        }
        Ok(())
    }

    async fn run_logged(
        &self,
        spec: &CommandSpec,
        cwd: &Path,
        deployment: &mut Deployment,
        deploy_log: bool,
    ) -> AutomationResult<CommandOutput> {
        let header = format!("$ {}", spec.display());
        if deploy_log {
            deployment.log_deploy(header);
        } else {
            deployment.log_build(header);
        }
        let output = self.runner.run(spec, cwd).await?;
        for line in output.tail(LOG_TAIL_LINES) {
            if deploy_log {
                deployment.log_deploy(line);
            } else {
                deployment.log_build(line);
            }
        }
        Ok(output)
    }

    async fn git(&self, cwd: &Path, args: &[&str]) -> AutomationResult<String> {
        let output = self
            .runner
            .run(&CommandSpec::new("git", args.iter().copied()), cwd)
            .await?;
        if !output.success() {
            return Err(AutomationError::ExternalIo(format!(
                "git {} failed: {}",
                args.join(" "),
                output.stderr.trim()
            )));
        }
        Ok(output.stdout.trim().to_string())
    }

    async fn current_branch(&self, cwd: &Path) -> AutomationResult<String> {
        self.git(cwd, &["rev-parse", "--abbrev-ref", "HEAD"]).await
    }

    /// Deploy every auto-deploy environment whose branch is `branch`
    /// (the current checkout when `None`).
    pub async fn auto_deploy(&self, branch: Option<&str>) -> AutomationResult<AutoDeployReport> {
        let branch = match branch {
            Some(b) => b.to_string(),
            None => {
                let dir = self
                    .environments
                    .values()
                    .next()
                    .map(|e| e.project_dir.clone())
                    .ok_or_else(|| {
                        AutomationError::Config("no deployment environments configured".to_string())
                    })?;
                self.current_branch(&dir).await?
            }
        };

        let targets: Vec<String> = self
            .environments
            .values()
            .filter(|e| e.auto_deploy && e.branch == branch)
            .map(|e| e.name.clone())
            .collect();
        if targets.is_empty() {
            info!("Auto-deploy: no environment tracks branch {}", branch);
        }

        let mut deployments = Vec::new();
        for environment in targets {
            let outcome = match self
                .deploy(DeployOptions::new(&environment), "auto")
                .await
            {
                Ok(d) => AutoDeployOutcome {
                    environment,
                    deployment_id: Some(d.id),
                    state: Some(d.state),
                    error: None,
                },
                Err(e) => AutoDeployOutcome {
                    deployment_id: self.latest_for(&environment).map(|d| d.id),
                    environment,
                    state: Some(DeploymentState::Failed),
                    error: Some(e.to_string()),
                },
            };
            deployments.push(outcome);
        }
        Ok(AutoDeployReport {
            branch,
            deployments,
        })
    }

    pub async fn rollback(&self, deployment_id: &str) -> AutomationResult<Deployment> {
        Err(AutomationError::NotImplemented(format!(
            "rollback of deployment {}",
            deployment_id
        )))
    }

    fn latest_for(&self, environment: &str) -> Option<Deployment> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .newest(HISTORY_CAPACITY)
            .into_iter()
            .find(|d| d.environment == environment)
    }

    /// Newest first, from the in-memory cache.
    pub fn history(&self, limit: usize) -> Vec<Deployment> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .newest(limit)
    }

    /// Newest first, from the persisted records.
    pub fn persisted_history(&self, limit: usize) -> anyhow::Result<Vec<Deployment>> {
        recent_typed(self.store.as_ref(), RecordKind::Deployment, limit)
    }

    pub fn status(&self) -> DeploymentStatus {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        DeploymentStatus {
            environments: self.environments.keys().cloned().collect(),
            recent: history.len(),
            last: history.latest().map(|d| DeploymentSummary {
                id: d.id.clone(),
                environment: d.environment.clone(),
                state: d.state,
                started_at: d.started_at.to_rfc3339(),
            }),
        }
    }

    fn persist(&self, deployment: &Deployment) {
        if let Err(e) = append_typed(self.store.as_ref(), RecordKind::Deployment, deployment) {
            error!("Failed to persist deployment {}: {}", deployment.id, e);
        }
        let state = deployment.state.as_str();
        let result = self.store.update_stats(RecordKind::Deployment, &mut |stats| {
            bump_counter(stats, "total", 1);
            bump_counter(stats, state, 1);
            bump_counter(stats, &format!("{}_{}", deployment.environment, state), 1);
            set_field(
                stats,
                "last_deployment_at",
                Value::from(deployment.started_at.to_rfc3339()),
            );
        });
        if let Err(e) = result {
            warn!("Failed to update deployment stats: {}", e);
        }
    }

    async fn notify(&self, deployment: &Deployment) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        let mut values = HashMap::new();
        values.insert("id".to_string(), deployment.id.clone());
        values.insert("environment".to_string(), deployment.environment.clone());
        values.insert("platform".to_string(), deployment.platform.clone());
        values.insert("branch".to_string(), deployment.branch.clone());
        values.insert("commit".to_string(), short_sha(&deployment.commit).to_string());

        let sent = if deployment.state == DeploymentState::Verified {
            let channels: Vec<Channel> = notifier.configured_channels();
            if channels.is_empty() {
                return;
            }
            notifier
                .send_template(
                    "deployment_succeeded",
                    &values,
                    NotificationType::Success,
                    channels,
                    None,
                )
                .await
        } else {
            values.insert(
                "state".to_string(),
                deployment
                    .failed_at
                    .unwrap_or(deployment.state)
                    .as_str()
                    .to_string(),
            );
            values.insert(
                "error".to_string(),
                deployment.error.clone().unwrap_or_default(),
            );
            let (title, body) = notifier
                .templates()
                .render("deployment_failed", &values)
                .unwrap_or_else(|| {
                    (
                        format!("Deployment to {} failed", deployment.environment),
                        deployment.error.clone().unwrap_or_default(),
                    )
                });
            notifier
                .send_alert(
                    AlertOptions::new(Severity::High, title, body)
                        .with_details(serde_json::json!({ "warnings": deployment.warnings })),
                )
                .await
        };
        if let Err(e) = sent {
            warn!("Failed to send deployment notification: {}", e);
        }
    }
}

fn short_sha(commit: &str) -> &str {
    commit.get(..8).unwrap_or(commit)
}

fn failure_summary(output: &CommandOutput) -> String {
    let tail = output.tail(5).join("\n");
    match output.exit_code {
        Some(code) => format!("exit code {}\n{}", code, tail),
        None => format!("terminated by signal\n{}", tail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run_store::JsonDayStore;
    use async_trait::async_trait;
    use tempfile::TempDir;

    /// Answers git queries from fixed values and records everything else.
    struct ScriptedRunner {
        branch: String,
        dirty: bool,
        fail_program: Option<String>,
    }

    impl ScriptedRunner {
        fn on_branch(branch: &str) -> Self {
            Self {
                branch: branch.to_string(),
                dirty: false,
                fail_program: None,
            }
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, spec: &CommandSpec, _cwd: &Path) -> AutomationResult<CommandOutput> {
            let ok = |stdout: &str| CommandOutput {
                exit_code: Some(0),
                stdout: stdout.to_string(),
                stderr: String::new(),
            };
            if spec.program == "git" {
                return Ok(match spec.args[0].as_str() {
                    "rev-parse" if spec.args[1] == "--abbrev-ref" => ok(&format!("{}\n", self.branch)),
                    "rev-parse" => ok("0123456789abcdef\n"),
                    _ => ok(if self.dirty { " M src/app.ts\n" } else { "" }),
                });
            }
            if self.fail_program.as_deref() == Some(spec.program.as_str()) {
                return Ok(CommandOutput {
                    exit_code: Some(1),
                    stdout: String::new(),
                    stderr: "boom".to_string(),
                });
            }
            Ok(ok("Production: https://app.example.com\n"))
        }
    }

    struct StaticProbe(Result<u16, String>);

    #[async_trait]
    impl ReachabilityProbe for StaticProbe {
        async fn probe(&self, _url: &str) -> Result<u16, String> {
            self.0.clone()
        }
    }

    fn automation(temp_dir: &TempDir, runner: ScriptedRunner, probe: StaticProbe) -> DeploymentAutomation {
        std::fs::write(temp_dir.path().join("package.json"), "{}").unwrap();
        let mut production = EnvironmentConfig::new("production", "main", temp_dir.path());
        production.domain = Some("app.example.com".to_string());
        let store = Arc::new(JsonDayStore::new(temp_dir.path().join("records")).unwrap());
        DeploymentAutomation::new(vec![production], Arc::new(runner), Arc::new(probe), store)
    }

    #[tokio::test]
    async fn test_successful_pipeline_reaches_verified() {
        let temp_dir = TempDir::new().unwrap();
        let automation = automation(&temp_dir, ScriptedRunner::on_branch("main"), StaticProbe(Ok(200)));

        let deployment = automation
            .deploy(DeployOptions::new("production"), "manual")
            .await
            .unwrap();
        assert_eq!(deployment.state, DeploymentState::Verified);
        assert_eq!(deployment.commit, "0123456789abcdef");
        assert_eq!(deployment.url.as_deref(), Some("https://app.example.com"));
        assert!(deployment.warnings.is_empty());
        assert!(deployment.build_log.iter().any(|l| l.contains("$ npm test")));
        assert!(deployment.deploy_log.iter().any(|l| l.contains("$ vercel deploy --yes --prod")));
        assert_eq!(automation.history(10).len(), 1);
        assert_eq!(automation.persisted_history(10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_environment_is_validation_error() {
        let temp_dir = TempDir::new().unwrap();
        let automation = automation(&temp_dir, ScriptedRunner::on_branch("main"), StaticProbe(Ok(200)));
        let err = automation
            .deploy(DeployOptions::new("qa"), "manual")
            .await
            .unwrap_err();
        assert!(matches!(err, AutomationError::Validation(_)));
        assert!(automation.history(10).is_empty());
    }

    #[tokio::test]
    async fn test_dirty_tree_and_missing_build_entry() {
        let temp_dir = TempDir::new().unwrap();
        let mut runner = ScriptedRunner::on_branch("main");
        runner.dirty = true;
        let automation = automation(&temp_dir, runner, StaticProbe(Ok(200)));

        let err = automation
            .deploy(DeployOptions::new("production"), "manual")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AutomationError::Pipeline(PipelineStageError::DirtyWorkingTree)
        ));

        std::fs::remove_file(temp_dir.path().join("package.json")).unwrap();
        let mut forced = DeployOptions::new("production");
        forced.force = true;
        let err = automation.deploy(forced, "manual").await.unwrap_err();
        assert!(matches!(
            err,
            AutomationError::Pipeline(PipelineStageError::MissingBuildConfig(_))
        ));
        let forced_run = &automation.history(1)[0];
        assert!(forced_run
            .build_log
            .iter()
            .any(|l| l.contains("WARNING: working tree has uncommitted changes (forced)")));
    }

    #[tokio::test]
    async fn test_build_failure_stops_before_deploy() {
        let temp_dir = TempDir::new().unwrap();
        let mut runner = ScriptedRunner::on_branch("main");
        runner.fail_program = Some("npm".to_string());
        let automation = automation(&temp_dir, runner, StaticProbe(Ok(200)));

        let mut options = DeployOptions::new("production");
        options.skip_tests = true;
        let err = automation.deploy(options, "manual").await.unwrap_err();
        assert!(matches!(
            err,
            AutomationError::Pipeline(PipelineStageError::BuildFailure(_))
        ));
        let failed = &automation.history(1)[0];
        assert_eq!(failed.failed_at, Some(DeploymentState::Tested));
        assert!(failed.warnings.iter().any(|w| w.contains("tests skipped")));
    }

    #[tokio::test]
    async fn test_unsupported_platform_and_verification_warning() {
        let temp_dir = TempDir::new().unwrap();
        let automation = automation(
            &temp_dir,
            ScriptedRunner::on_branch("main"),
            StaticProbe(Err("connection refused".to_string())),
        );

        let mut options = DeployOptions::new("production");
        options.platform = Some("heroku".to_string());
        let err = automation.deploy(options, "manual").await.unwrap_err();
        assert!(matches!(
            err,
            AutomationError::Pipeline(PipelineStageError::UnsupportedPlatform(_))
        ));

        let deployment = automation
            .deploy(DeployOptions::new("production"), "manual")
            .await
            .unwrap();
        assert_eq!(deployment.state, DeploymentState::Verified);
        assert_eq!(deployment.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_auto_deploy_matches_branch_and_rollback_not_implemented() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("package.json"), "{}").unwrap();
        let store = Arc::new(JsonDayStore::new(temp_dir.path().join("records")).unwrap());
        let mut staging = EnvironmentConfig::new("staging", "develop", temp_dir.path());
        staging.auto_deploy = true;
        let mut production = EnvironmentConfig::new("production", "main", temp_dir.path());
        production.auto_deploy = false;
        let automation = DeploymentAutomation::new(
            vec![staging, production],
            Arc::new(ScriptedRunner::on_branch("develop")),
            Arc::new(StaticProbe(Ok(200))),
            store,
        );

        let report = automation.auto_deploy(None).await.unwrap();
        assert_eq!(report.branch, "develop");
        assert_eq!(report.deployments.len(), 1);
        assert_eq!(report.deployments[0].environment, "staging");
        assert_eq!(report.deployments[0].state, Some(DeploymentState::Verified));

        let none = automation.auto_deploy(Some("feature/x")).await.unwrap();
        assert!(none.deployments.is_empty());

        assert!(matches!(
            automation.rollback("any").await,
            Err(AutomationError::NotImplemented(_))
        ));
    }
}

//! Branch gating of the deployment pipeline.

mod common;

use common::{ScriptedRunner, StaticProbe};
use platform_automation::deployment::{
    DeployOptions, DeploymentAutomation, DeploymentState, EnvironmentConfig,
};
use platform_automation::error::{AutomationError, PipelineStageError};
use platform_automation::run_store::JsonDayStore;
use std::sync::Arc;
use tempfile::TempDir;

fn staging_on(branch: &str, temp_dir: &TempDir) -> DeploymentAutomation {
    let project = temp_dir.path().join("app");
    std::fs::create_dir_all(&project).unwrap();
    std::fs::write(project.join("package.json"), "{}").unwrap();

    let mut staging = EnvironmentConfig::new("staging", "develop", &project);
    staging.domain = Some("staging.example.com".to_string());
    staging.auto_deploy = true;

    let store = Arc::new(JsonDayStore::new(temp_dir.path().join("records")).unwrap());
    DeploymentAutomation::new(
        vec![staging],
        Arc::new(ScriptedRunner {
            branch: branch.to_string(),
        }),
        Arc::new(StaticProbe(200)),
        store,
    )
}

#[tokio::test]
async fn test_branch_mismatch_blocks_unless_forced() {
    let temp_dir = TempDir::new().unwrap();
    let automation = staging_on("feature/login", &temp_dir);

    let err = automation
        .deploy(DeployOptions::new("staging"), "manual")
        .await
        .unwrap_err();
    match err {
        AutomationError::Pipeline(PipelineStageError::BranchMismatch { expected, actual }) => {
            assert_eq!(expected, "develop");
            assert_eq!(actual, "feature/login");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(automation.history(1)[0].state, DeploymentState::Failed);

    let mut forced = DeployOptions::new("staging");
    forced.force = true;
    let deployment = automation.deploy(forced, "manual").await.unwrap();
    assert_eq!(deployment.state, DeploymentState::Verified);
    assert_eq!(deployment.branch, "feature/login");
    assert!(deployment.warnings.iter().any(|w| w.contains("forced")));
    assert!(deployment
        .build_log
        .iter()
        .any(|line| line.contains("WARNING: Branch mismatch") && line.contains("forced")));
    assert_eq!(automation.history(10).len(), 2);
}

#[tokio::test]
async fn test_auto_deploy_only_touches_tracking_environments() {
    let temp_dir = TempDir::new().unwrap();
    let automation = staging_on("develop", &temp_dir);

    let report = automation.auto_deploy(Some("main")).await.unwrap();
    assert!(report.deployments.is_empty());

    let report = automation.auto_deploy(Some("develop")).await.unwrap();
    assert_eq!(report.deployments.len(), 1);
    assert_eq!(report.deployments[0].environment, "staging");
    assert_eq!(report.deployments[0].state, Some(DeploymentState::Verified));
    assert!(report.deployments[0].error.is_none());
}

use super::to_payload;
use crate::background_jobs::{
    context::{JobContext, Trigger},
    job::{bool_param, str_param, BackgroundJob, JobError, ShutdownBehavior},
};
use crate::deployment::{DeployOptions, DeploymentAutomation};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Deploys auto-deploy environments tracking the current branch.
///
/// With an `environment` option it deploys that single environment instead,
/// honouring `force`, `skip_tests` and `platform`. `branch` overrides the
/// detected branch for the auto-deploy match.
pub struct AutoDeployJob {
    deployment: Arc<DeploymentAutomation>,
}

impl AutoDeployJob {
    pub fn new(deployment: Arc<DeploymentAutomation>) -> Self {
        Self { deployment }
    }
}

fn deploy_options(params: &Option<JsonValue>) -> Result<Option<DeployOptions>, JobError> {
    let Some(environment) = str_param(params, "environment")? else {
        return Ok(None);
    };
    Ok(Some(DeployOptions {
        environment,
        force: bool_param(params, "force")?.unwrap_or(false),
        skip_tests: bool_param(params, "skip_tests")?.unwrap_or(false),
        platform: str_param(params, "platform")?,
    }))
}

#[async_trait]
impl BackgroundJob for AutoDeployJob {
    fn description(&self) -> &'static str {
        "Runs the deployment pipeline for environments tracking the current branch"
    }

    fn shutdown_behavior(&self) -> ShutdownBehavior {
        ShutdownBehavior::WaitForCompletion
    }

    async fn execute(
        &self,
        ctx: &JobContext,
        params: Option<JsonValue>,
    ) -> Result<JsonValue, JobError> {
        if let Some(options) = deploy_options(&params)? {
            let deployment = self
                .deployment
                .deploy(options, ctx.trigger.as_str())
                .await?;
            return to_payload(&deployment);
        }

        let branch = str_param(&params, "branch")?;
        let report = self.deployment.auto_deploy(branch.as_deref()).await?;
        let failed: Vec<String> = report
            .deployments
            .iter()
            .filter_map(|d| d.error.as_ref().map(|e| format!("{}: {}", d.environment, e)))
            .collect();
        if !failed.is_empty() && ctx.trigger == Trigger::Schedule {
            return Err(JobError::ExecutionFailed(failed.join("; ")));
        }
        to_payload(&report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deploy_options_from_params() {
        assert_eq!(deploy_options(&None).unwrap(), None);
        let options = deploy_options(&Some(json!({
            "environment": "staging",
            "skip_tests": true,
            "platform": "netlify"
        })))
        .unwrap()
        .unwrap();
        assert_eq!(options.environment, "staging");
        assert!(options.skip_tests);
        assert!(!options.force);
        assert_eq!(options.platform.as_deref(), Some("netlify"));
        assert!(deploy_options(&Some(json!({"environment": "x", "force": "yes"}))).is_err());
    }
}

use crate::run_store::new_record_id;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Pipeline states in order. `Failed` is reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    Pending,
    Precheck,
    Tested,
    Built,
    Deployed,
    Verified,
    Failed,
}

impl DeploymentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentState::Pending => "pending",
            DeploymentState::Precheck => "precheck",
            DeploymentState::Tested => "tested",
            DeploymentState::Built => "built",
            DeploymentState::Deployed => "deployed",
            DeploymentState::Verified => "verified",
            DeploymentState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DeploymentState::Verified | DeploymentState::Failed)
    }

    fn successor(&self) -> Option<DeploymentState> {
        match self {
            DeploymentState::Pending => Some(DeploymentState::Precheck),
            DeploymentState::Precheck => Some(DeploymentState::Tested),
            DeploymentState::Tested => Some(DeploymentState::Built),
            DeploymentState::Built => Some(DeploymentState::Deployed),
            DeploymentState::Deployed => Some(DeploymentState::Verified),
            DeploymentState::Verified | DeploymentState::Failed => None,
        }
    }
}

impl fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid deployment transition {from} -> {to}")]
pub struct InvalidStateTransition {
    pub from: DeploymentState,
    pub to: DeploymentState,
}

/// Per-environment pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub name: String,
    /// Branch that must be checked out to deploy here.
    pub branch: String,
    pub platform: String,
    pub domain: Option<String>,
    pub auto_deploy: bool,
    pub project_dir: PathBuf,
    /// Path relative to `project_dir` that must exist before building.
    pub build_entry: PathBuf,
    pub test_command: String,
    pub build_command: String,
    /// Directory published by platforms that upload a build folder.
    pub output_dir: PathBuf,
    pub production: bool,
}

impl EnvironmentConfig {
    pub fn new(name: &str, branch: &str, project_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            branch: branch.to_string(),
            platform: "vercel".to_string(),
            domain: None,
            auto_deploy: false,
            project_dir: project_dir.into(),
            build_entry: PathBuf::from("package.json"),
            test_command: "npm test".to_string(),
            build_command: "npm run build".to_string(),
            output_dir: PathBuf::from("dist"),
            production: name == "production",
        }
    }
}

/// Options of a single deployment request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeployOptions {
    pub environment: String,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub skip_tests: bool,
    /// Overrides the environment's platform.
    #[serde(default)]
    pub platform: Option<String>,
}

impl DeployOptions {
    pub fn new(environment: &str) -> Self {
        Self {
            environment: environment.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    pub environment: String,
    pub platform: String,
    pub branch: String,
    pub commit: String,
    pub state: DeploymentState,
    pub triggered_by: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub url: Option<String>,
    pub build_log: Vec<String>,
    pub deploy_log: Vec<String>,
    pub warnings: Vec<String>,
    /// State the pipeline was in when it failed.
    pub failed_at: Option<DeploymentState>,
    pub error: Option<String>,
}

impl Deployment {
    pub fn start(environment: &str, platform: &str, triggered_by: &str) -> Self {
        Self {
            id: new_record_id(),
            environment: environment.to_string(),
            platform: platform.to_string(),
            branch: String::new(),
            commit: String::new(),
            state: DeploymentState::Pending,
            triggered_by: triggered_by.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: None,
            url: None,
            build_log: Vec::new(),
            deploy_log: Vec::new(),
            warnings: Vec::new(),
            failed_at: None,
            error: None,
        }
    }

    /// Move to the next pipeline state. Only the immediate successor is accepted.
    pub fn advance(&mut self, next: DeploymentState) -> Result<(), InvalidStateTransition> {
        if self.state.successor() != Some(next) {
            return Err(InvalidStateTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        if next.is_terminal() {
            self.finish();
        }
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), InvalidStateTransition> {
        if self.state.is_terminal() {
            return Err(InvalidStateTransition {
                from: self.state,
                to: DeploymentState::Failed,
            });
        }
        self.failed_at = Some(self.state);
        self.state = DeploymentState::Failed;
        self.error = Some(error.into());
        self.finish();
        Ok(())
    }

    fn finish(&mut self) {
        let now = Utc::now();
        self.finished_at = Some(now);
        self.duration_ms = Some((now - self.started_at).num_milliseconds());
    }

    pub fn log_build(&mut self, line: impl Into<String>) {
        self.build_log.push(format!("[{}] {}", self.state, line.into()));
    }

    pub fn log_deploy(&mut self, line: impl Into<String>) {
        self.deploy_log.push(format!("[{}] {}", self.state, line.into()));
    }

    pub fn warn(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine_order() {
        let mut d = Deployment::start("staging", "vercel", "manual");
        assert!(d.advance(DeploymentState::Tested).is_err());
        for next in [
            DeploymentState::Precheck,
            DeploymentState::Tested,
            DeploymentState::Built,
            DeploymentState::Deployed,
            DeploymentState::Verified,
        ] {
            d.advance(next).unwrap();
        }
        assert!(d.finished_at.is_some());
        assert!(d.fail("late").is_err());
        assert_eq!(d.state, DeploymentState::Verified);
    }

    #[test]
    fn test_fail_records_stage() {
        let mut d = Deployment::start("staging", "vercel", "manual");
        d.advance(DeploymentState::Precheck).unwrap();
        d.fail("tests failed").unwrap();
        assert_eq!(d.state, DeploymentState::Failed);
        assert_eq!(d.failed_at, Some(DeploymentState::Precheck));
        assert!(d.advance(DeploymentState::Tested).is_err());
    }

    #[test]
    fn test_deploy_options_from_json() {
        let options: DeployOptions =
            serde_json::from_value(serde_json::json!({"environment": "production", "force": true}))
                .unwrap();
        assert!(options.force);
        assert!(!options.skip_tests);
        assert_eq!(options.platform, None);
    }
}

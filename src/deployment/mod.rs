//! Deployment pipeline: prechecks, test, build, deploy and verification.

mod models;
mod platform;
mod runner;
mod service;

pub use models::{
    DeployOptions, Deployment, DeploymentState, EnvironmentConfig, InvalidStateTransition,
};
pub use platform::{
    extract_deploy_url, DeployPlatform, HttpReachabilityProbe, PlatformTokens, ReachabilityProbe,
};
pub use runner::{CommandOutput, CommandRunner, CommandSpec, ProcessRunner, DEFAULT_COMMAND_TIMEOUT};
pub use service::{
    AutoDeployOutcome, AutoDeployReport, DeploymentAutomation, DeploymentStatus, DeploymentSummary,
};

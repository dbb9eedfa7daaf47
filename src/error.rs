//! Error taxonomy shared by every automation module.

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the automation services.
#[derive(Debug, Error)]
pub enum AutomationError {
    /// Bad schedule or catalogue definition. Fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Bad manual-task input. Reported to the caller, nothing is executed.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A network, cloud, filesystem or datastore call failed.
    #[error("External I/O error: {0}")]
    ExternalIo(String),

    /// Channel-local rate limit hit.
    #[error("Rate limited on channel '{channel}', retry after {retry_after:?}")]
    RateLimited {
        channel: String,
        retry_after: Duration,
    },

    #[error(transparent)]
    Pipeline(#[from] PipelineStageError),

    #[error("Not implemented: {0}")]
    NotImplemented(String),
}

impl AutomationError {
    pub fn external<E: std::fmt::Display>(context: &str, err: E) -> Self {
        AutomationError::ExternalIo(format!("{}: {}", context, err))
    }
}

impl From<std::io::Error> for AutomationError {
    fn from(err: std::io::Error) -> Self {
        AutomationError::ExternalIo(err.to_string())
    }
}

impl From<anyhow::Error> for AutomationError {
    fn from(err: anyhow::Error) -> Self {
        AutomationError::ExternalIo(format!("{:#}", err))
    }
}

impl From<serde_json::Error> for AutomationError {
    fn from(err: serde_json::Error) -> Self {
        AutomationError::ExternalIo(format!("JSON error: {}", err))
    }
}

/// Deployment stage failures. Each one halts the pipeline at the failing stage.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineStageError {
    #[error("Branch mismatch: environment requires '{expected}', current branch is '{actual}'")]
    BranchMismatch { expected: String, actual: String },

    #[error("Working tree has uncommitted changes")]
    DirtyWorkingTree,

    #[error("Build configuration not found: {0}")]
    MissingBuildConfig(String),

    #[error("Tests failed: {0}")]
    TestFailure(String),

    #[error("Build failed: {0}")]
    BuildFailure(String),

    #[error("Deploy failed: {0}")]
    DeployFailure(String),

    #[error("Unsupported platform: {0}")]
    UnsupportedPlatform(String),
}

pub type AutomationResult<T> = Result<T, AutomationError>;

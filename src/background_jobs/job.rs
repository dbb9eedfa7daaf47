use super::context::JobContext;
use crate::error::AutomationError;
use async_trait::async_trait;
use serde_json::Value as JsonValue;

/// How a job should be handled during shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShutdownBehavior {
    /// Job can be cancelled immediately
    #[default]
    Cancellable,
    /// Wait for job to complete (up to the grace period) before shutdown
    WaitForCompletion,
}

/// Errors that can occur during job execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    NotFound,
    AlreadyRunning,
    Validation(String),
    ExecutionFailed(String),
    Cancelled,
    Panicked(String),
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobError::NotFound => write!(f, "Job not found"),
            JobError::AlreadyRunning => write!(f, "Job is already running"),
            JobError::Validation(msg) => write!(f, "Invalid job options: {}", msg),
            JobError::ExecutionFailed(msg) => write!(f, "Execution failed: {}", msg),
            JobError::Cancelled => write!(f, "Job was cancelled"),
            JobError::Panicked(msg) => write!(f, "Job panicked: {}", msg),
        }
    }
}

impl std::error::Error for JobError {}

impl From<AutomationError> for JobError {
    fn from(err: AutomationError) -> Self {
        match err {
            AutomationError::Validation(msg) => JobError::Validation(msg),
            other => JobError::ExecutionFailed(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for JobError {
    fn from(err: anyhow::Error) -> Self {
        JobError::ExecutionFailed(format!("{:#}", err))
    }
}

/// Trait for schedulable automation jobs.
///
/// The cron binding lives in the scheduler, not on the job, so the same job
/// type can be registered under several names with different schedules.
#[async_trait]
pub trait BackgroundJob: Send + Sync {
    /// Human-readable description of what this job does.
    fn description(&self) -> &'static str;

    /// How this job should be handled during shutdown.
    fn shutdown_behavior(&self) -> ShutdownBehavior {
        ShutdownBehavior::Cancellable
    }

    /// Execute the job. `params` is the JSON object passed to a manual run,
    /// `None` for scheduled runs. The returned value becomes the run's result
    /// payload.
    ///
    /// Long-running implementations should check `ctx.is_cancelled()` and
    /// return `JobError::Cancelled` when set.
    async fn execute(&self, ctx: &JobContext, params: Option<JsonValue>)
        -> Result<JsonValue, JobError>;
}

/// Read an optional boolean option from job params.
pub fn bool_param(params: &Option<JsonValue>, key: &str) -> Result<Option<bool>, JobError> {
    match params.as_ref().and_then(|p| p.get(key)) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::Bool(b)) => Ok(Some(*b)),
        Some(other) => Err(JobError::Validation(format!(
            "option '{}' must be a boolean, got {}",
            key, other
        ))),
    }
}

/// Read an optional string option from job params.
pub fn str_param(params: &Option<JsonValue>, key: &str) -> Result<Option<String>, JobError> {
    match params.as_ref().and_then(|p| p.get(key)) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(JobError::Validation(format!(
            "option '{}' must be a string, got {}",
            key, other
        ))),
    }
}

/// Read an optional unsigned integer option from job params.
pub fn u64_param(params: &Option<JsonValue>, key: &str) -> Result<Option<u64>, JobError> {
    match params.as_ref().and_then(|p| p.get(key)) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(v) => v.as_u64().map(Some).ok_or_else(|| {
            JobError::Validation(format!(
                "option '{}' must be a non-negative integer, got {}",
                key, v
            ))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_param_helpers() {
        let params = Some(json!({"dry_run": true, "env": "staging", "days": 7, "bad": "x"}));
        assert_eq!(bool_param(&params, "dry_run").unwrap(), Some(true));
        assert_eq!(str_param(&params, "env").unwrap(), Some("staging".to_string()));
        assert_eq!(u64_param(&params, "days").unwrap(), Some(7));
        assert_eq!(bool_param(&params, "missing").unwrap(), None);
        assert!(matches!(bool_param(&params, "bad"), Err(JobError::Validation(_))));
        assert!(matches!(u64_param(&params, "env"), Err(JobError::Validation(_))));
        assert_eq!(bool_param(&None, "dry_run").unwrap(), None);
    }

    #[test]
    fn test_automation_error_conversion() {
        let e: JobError = AutomationError::Validation("bad".into()).into();
        assert_eq!(e, JobError::Validation("bad".into()));
        let e: JobError = AutomationError::NotImplemented("rollback".into()).into();
        assert!(matches!(e, JobError::ExecutionFailed(msg) if msg.contains("rollback")));
    }
}

use super::to_payload;
use crate::background_jobs::{
    context::JobContext,
    job::{bool_param, BackgroundJob, JobError},
};
use crate::cleanup::CleanupService;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Applies the retention rule table.
///
/// Options: `dry_run` (report only) and `rules` (array of rule names to limit
/// the run to).
pub struct CleanupJob {
    cleanup: Arc<CleanupService>,
}

impl CleanupJob {
    pub fn new(cleanup: Arc<CleanupService>) -> Self {
        Self { cleanup }
    }
}

fn rule_filter(params: &Option<JsonValue>) -> Result<Option<Vec<String>>, JobError> {
    let Some(value) = params.as_ref().and_then(|p| p.get("rules")) else {
        return Ok(None);
    };
    let names = value
        .as_array()
        .and_then(|items| {
            items
                .iter()
                .map(|i| i.as_str().map(str::to_string))
                .collect::<Option<Vec<_>>>()
        })
        .ok_or_else(|| JobError::Validation("option 'rules' must be an array of strings".into()))?;
    Ok(Some(names))
}

#[async_trait]
impl BackgroundJob for CleanupJob {
    fn description(&self) -> &'static str {
        "Deletes files and datastore records older than their retention window"
    }

    async fn execute(
        &self,
        ctx: &JobContext,
        params: Option<JsonValue>,
    ) -> Result<JsonValue, JobError> {
        let dry_run = bool_param(&params, "dry_run")?.unwrap_or(false);
        let only = rule_filter(&params)?;
        if let Some(names) = &only {
            if let Some(unknown) = names
                .iter()
                .find(|n| !self.cleanup.rules().iter().any(|r| r.name == **n))
            {
                return Err(JobError::Validation(format!(
                    "unknown cleanup rule '{}'",
                    unknown
                )));
            }
        }
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        let report = self.cleanup.perform_cleanup(dry_run, only.as_deref()).await;
        to_payload(&report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rule_filter() {
        assert_eq!(rule_filter(&None).unwrap(), None);
        assert_eq!(
            rule_filter(&Some(json!({"rules": ["logs", "temp"]}))).unwrap(),
            Some(vec!["logs".to_string(), "temp".to_string()])
        );
        assert!(rule_filter(&Some(json!({"rules": "logs"}))).is_err());
        assert!(rule_filter(&Some(json!({"rules": [1]}))).is_err());
    }
}

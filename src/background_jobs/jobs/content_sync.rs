use super::to_payload;
use crate::background_jobs::{
    context::JobContext,
    job::{bool_param, BackgroundJob, JobError},
};
use crate::content::ContentAutomation;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// Mirrors changed content files. Option `force` re-syncs an unchanged commit.
pub struct ContentSyncJob {
    content: Arc<ContentAutomation>,
}

impl ContentSyncJob {
    pub fn new(content: Arc<ContentAutomation>) -> Self {
        Self { content }
    }
}

#[async_trait]
impl BackgroundJob for ContentSyncJob {
    fn description(&self) -> &'static str {
        "Syncs the content mirror with the source repository and rebuilds the index"
    }

    async fn execute(
        &self,
        _ctx: &JobContext,
        params: Option<JsonValue>,
    ) -> Result<JsonValue, JobError> {
        let force = bool_param(&params, "force")?.unwrap_or(false);
        let report = self.content.sync(force).await?;
        if !report.errors.is_empty() {
            return Err(JobError::ExecutionFailed(format!(
                "{} file(s) failed to sync: {}",
                report.errors.len(),
                report.errors.join("; ")
            )));
        }
        to_payload(&report)
    }
}

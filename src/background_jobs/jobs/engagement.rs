use super::to_payload;
use crate::background_jobs::{
    context::JobContext,
    job::{u64_param, BackgroundJob, JobError},
};
use crate::engagement::UserEngagementService;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::info;

/// Sends one reminder per inactivity period. Option `days` overrides the threshold.
pub struct InactivityCheckJob {
    engagement: Arc<UserEngagementService>,
    days: u64,
}

impl InactivityCheckJob {
    pub fn new(engagement: Arc<UserEngagementService>, days: u64) -> Self {
        Self { engagement, days }
    }
}

#[async_trait]
impl BackgroundJob for InactivityCheckJob {
    fn description(&self) -> &'static str {
        "Reminds users who have been inactive longer than the threshold"
    }

    async fn execute(
        &self,
        _ctx: &JobContext,
        params: Option<JsonValue>,
    ) -> Result<JsonValue, JobError> {
        let days = u64_param(&params, "days")?.unwrap_or(self.days);
        let days = i64::try_from(days)
            .map_err(|_| JobError::Validation(format!("days out of range: {}", days)))?;
        let report = self.engagement.detect_inactivity(days).await?;
        info!(
            "Inactivity check reminded {} user(s) inactive for {} days",
            report.reminded.len(),
            days
        );
        to_payload(&report)
    }
}

pub struct WeeklySummaryJob {
    engagement: Arc<UserEngagementService>,
}

impl WeeklySummaryJob {
    pub fn new(engagement: Arc<UserEngagementService>) -> Self {
        Self { engagement }
    }
}

#[async_trait]
impl BackgroundJob for WeeklySummaryJob {
    fn description(&self) -> &'static str {
        "Sends each active user a summary of their week"
    }

    async fn execute(
        &self,
        _ctx: &JobContext,
        _params: Option<JsonValue>,
    ) -> Result<JsonValue, JobError> {
        let report = self.engagement.send_weekly_summary().await?;
        to_payload(&report)
    }
}

use super::to_payload;
use crate::background_jobs::{
    context::JobContext,
    job::{BackgroundJob, JobError},
};
use crate::health::{HealthMonitor, HealthStatus};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::warn;

pub struct HealthCheckJob {
    monitor: Arc<HealthMonitor>,
}

impl HealthCheckJob {
    pub fn new(monitor: Arc<HealthMonitor>) -> Self {
        Self { monitor }
    }
}

#[async_trait]
impl BackgroundJob for HealthCheckJob {
    fn description(&self) -> &'static str {
        "Runs every health probe and alerts on threshold breaches"
    }

    /// An unhealthy system is a successful check; the monitor raises the alerts.
    async fn execute(
        &self,
        _ctx: &JobContext,
        _params: Option<JsonValue>,
    ) -> Result<JsonValue, JobError> {
        let report = self.monitor.check_health().await;
        if report.overall >= HealthStatus::Unhealthy {
            warn!(
                "Health check finished with overall status {}",
                report.overall.as_str()
            );
        }
        to_payload(&report)
    }
}

//! Job implementations of the fixed automation catalogue.
//!
//! Each job is a thin adapter: it reads its options, calls the owning
//! service and returns the service's report as the run's result payload.

mod content_sync;
mod database_backup;
mod deployment;
mod engagement;
mod health_check;
mod report;
mod retention_cleanup;

pub use content_sync::ContentSyncJob;
pub use database_backup::DatabaseBackupJob;
pub use deployment::AutoDeployJob;
pub use engagement::{InactivityCheckJob, WeeklySummaryJob};
pub use health_check::HealthCheckJob;
pub use report::ReportJob;
pub use retention_cleanup::CleanupJob;

use super::job::JobError;
use serde::Serialize;
use serde_json::Value as JsonValue;

fn to_payload<T: Serialize>(report: &T) -> Result<JsonValue, JobError> {
    serde_json::to_value(report)
        .map_err(|e| JobError::ExecutionFailed(format!("Failed to serialize result: {}", e)))
}

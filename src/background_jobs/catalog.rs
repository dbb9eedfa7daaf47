//! The fixed job catalogue and its registration.

use super::handle::SchedulerHandle;
use super::job::BackgroundJob;
use super::jobs::{
    AutoDeployJob, CleanupJob, ContentSyncJob, DatabaseBackupJob, HealthCheckJob,
    InactivityCheckJob, ReportJob, WeeklySummaryJob,
};
use super::scheduler::JobScheduler;
use crate::backup::DatabaseBackup;
use crate::cleanup::CleanupService;
use crate::config::SchedulerSettings;
use crate::content::ContentAutomation;
use crate::deployment::DeploymentAutomation;
use crate::engagement::UserEngagementService;
use crate::error::{AutomationError, AutomationResult};
use crate::health::HealthMonitor;
use crate::reports::{ReportFormat, ReportGenerator, ReportKind};
use std::sync::Arc;
use tracing::info;

/// A catalogue job with its default trigger.
#[derive(Debug, Clone, Copy)]
pub struct CatalogEntry {
    pub name: &'static str,
    pub cron: &'static str,
    pub enabled: bool,
}

const fn entry(name: &'static str, cron: &'static str, enabled: bool) -> CatalogEntry {
    CatalogEntry {
        name,
        cron,
        enabled,
    }
}

pub const JOB_CATALOG: &[CatalogEntry] = &[
    entry("database-backup", "0 2 * * *", true),
    entry("health-check", "*/5 * * * *", true),
    entry("cleanup", "0 3 * * *", true),
    entry("content-sync", "*/30 * * * *", true),
    entry("inactivity-check", "0 10 * * *", true),
    entry("weekly-summary", "0 9 * * MON", true),
    entry("auto-deploy", "*/15 * * * *", false),
    entry("daily-report", "0 8 * * *", true),
    entry("weekly-report", "0 8 * * MON", true),
];

/// Services the catalogue jobs delegate to.
pub struct JobServices {
    pub backup: Arc<DatabaseBackup>,
    pub health: Arc<HealthMonitor>,
    pub cleanup: Arc<CleanupService>,
    pub content: Option<Arc<ContentAutomation>>,
    pub engagement: Arc<UserEngagementService>,
    pub deployment: Arc<DeploymentAutomation>,
    pub reports: Arc<ReportGenerator>,
    pub inactivity_days: u64,
    pub report_format: ReportFormat,
}

impl JobServices {
    fn job_for(&self, name: &str) -> Option<Arc<dyn BackgroundJob>> {
        let job: Arc<dyn BackgroundJob> = match name {
            "database-backup" => Arc::new(DatabaseBackupJob::new(self.backup.clone())),
            "health-check" => Arc::new(HealthCheckJob::new(self.health.clone())),
            "cleanup" => Arc::new(CleanupJob::new(self.cleanup.clone())),
            "content-sync" => Arc::new(ContentSyncJob::new(self.content.clone()?)),
            "inactivity-check" => Arc::new(InactivityCheckJob::new(
                self.engagement.clone(),
                self.inactivity_days,
            )),
            "weekly-summary" => Arc::new(WeeklySummaryJob::new(self.engagement.clone())),
            "auto-deploy" => Arc::new(AutoDeployJob::new(self.deployment.clone())),
            "daily-report" => Arc::new(ReportJob::new(
                self.reports.clone(),
                ReportKind::Daily,
                self.report_format,
            )),
            "weekly-report" => Arc::new(ReportJob::new(
                self.reports.clone(),
                ReportKind::Weekly,
                self.report_format,
            )),
            _ => return None,
        };
        Some(job)
    }
}

/// Register every catalogue job, applying cron and enabled overrides.
///
/// Jobs whose service is not configured (content sync without a source
/// repository) are left out. Returns the registered names.
pub async fn register_catalog(
    scheduler: &mut JobScheduler,
    handle: &SchedulerHandle,
    services: &JobServices,
    settings: &SchedulerSettings,
) -> AutomationResult<Vec<String>> {
    let mut registered = Vec::new();
    for entry in JOB_CATALOG {
        let Some(job) = services.job_for(entry.name) else {
            info!("Job {} is not configured, skipping", entry.name);
            continue;
        };
        let overrides = settings.override_for(entry.name);
        let cron = overrides.cron.as_deref().unwrap_or(entry.cron);
        scheduler.register_job(entry.name, cron, job).await?;
        if !overrides.enabled.unwrap_or(entry.enabled) {
            handle.set_enabled(entry.name, false).await.map_err(|e| {
                AutomationError::Config(format!("cannot disable {}: {}", entry.name, e))
            })?;
        }
        registered.push(entry.name.to_string());
    }
    Ok(registered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::background_jobs::CronSchedule;
    use std::collections::HashSet;

    #[test]
    fn test_catalog_entries_are_valid() {
        let names: HashSet<&str> = JOB_CATALOG.iter().map(|e| e.name).collect();
        assert_eq!(names.len(), JOB_CATALOG.len());
        for entry in JOB_CATALOG {
            assert!(
                CronSchedule::parse(entry.cron).is_ok(),
                "bad cron for {}",
                entry.name
            );
        }
        assert!(!JOB_CATALOG.iter().find(|e| e.name == "auto-deploy").unwrap().enabled);
    }
}

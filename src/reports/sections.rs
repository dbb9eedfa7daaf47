use crate::datastore::UserRepository;
use crate::error::{AutomationError, AutomationResult};
use crate::health::HealthMonitor;
use crate::run_store::{recent_typed, RecordKind, RunRecord, RunRecordStore, RunStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

const RECENT_SCAN_LIMIT: usize = 500;

/// Period a report covers.
#[derive(Debug, Clone, Copy)]
pub struct ReportPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ReportPeriod {
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.start && t <= self.end
    }
}

/// One independently collected part of a report.
#[async_trait]
pub trait ReportSection: Send + Sync {
    fn name(&self) -> &'static str;

    async fn collect(&self, period: &ReportPeriod) -> AutomationResult<Value>;
}

pub struct SystemSection {
    monitor: Arc<HealthMonitor>,
}

impl SystemSection {
    pub fn new(monitor: Arc<HealthMonitor>) -> Self {
        Self { monitor }
    }
}

#[async_trait]
impl ReportSection for SystemSection {
    fn name(&self) -> &'static str {
        "system"
    }

    async fn collect(&self, _period: &ReportPeriod) -> AutomationResult<Value> {
        Ok(serde_json::to_value(self.monitor.summary())?)
    }
}

pub struct UsersSection {
    users: Arc<dyn UserRepository>,
}

impl UsersSection {
    pub fn new(users: Arc<dyn UserRepository>) -> Self {
        Self { users }
    }
}

#[async_trait]
impl ReportSection for UsersSection {
    fn name(&self) -> &'static str {
        "users"
    }

    async fn collect(&self, period: &ReportPeriod) -> AutomationResult<Value> {
        let users = self.users.clone();
        let end = period.end;
        let stats = tokio::task::spawn_blocking(move || users.user_stats(end))
            .await
            .map_err(|e| AutomationError::external("user stats task", e))??;
        Ok(serde_json::to_value(stats)?)
    }
}

fn runs_in_period(store: &dyn RunRecordStore, period: &ReportPeriod) -> AutomationResult<Vec<RunRecord>> {
    let records: Vec<RunRecord> = recent_typed(store, RecordKind::Job, RECENT_SCAN_LIMIT)?;
    Ok(records
        .into_iter()
        .filter(|r| period.contains(r.started_at))
        .collect())
}

/// Per-job run counts in the period plus cumulative job stats.
pub struct JobsSection {
    store: Arc<dyn RunRecordStore>,
}

impl JobsSection {
    pub fn new(store: Arc<dyn RunRecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ReportSection for JobsSection {
    fn name(&self) -> &'static str {
        "jobs"
    }

    async fn collect(&self, period: &ReportPeriod) -> AutomationResult<Value> {
        let runs = runs_in_period(self.store.as_ref(), period)?;
        let mut per_job: BTreeMap<String, (u64, u64)> = BTreeMap::new();
        for run in &runs {
            let entry = per_job.entry(run.job_name.clone()).or_default();
            match run.status {
                RunStatus::Success => entry.0 += 1,
                RunStatus::Failed => entry.1 += 1,
                RunStatus::Pending => {}
            }
        }
        let per_job: BTreeMap<String, Value> = per_job
            .into_iter()
            .map(|(name, (ok, failed))| (name, json!({ "success": ok, "failed": failed })))
            .collect();
        let successful = runs.iter().filter(|r| r.status == RunStatus::Success).count();
        let failed = runs.iter().filter(|r| r.status == RunStatus::Failed).count();
        Ok(json!({
            "runs": runs.len(),
            "successful": successful,
            "failed": failed,
            "per_job": per_job,
            "cumulative": self.store.read_stats(RecordKind::Job)?,
        }))
    }
}

/// Failed runs in the period, newest first.
pub struct ErrorsSection {
    store: Arc<dyn RunRecordStore>,
}

impl ErrorsSection {
    pub fn new(store: Arc<dyn RunRecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ReportSection for ErrorsSection {
    fn name(&self) -> &'static str {
        "errors"
    }

    async fn collect(&self, period: &ReportPeriod) -> AutomationResult<Value> {
        let failures: Vec<Value> = runs_in_period(self.store.as_ref(), period)?
            .into_iter()
            .filter(|r| r.status == RunStatus::Failed)
            .map(|r| {
                json!({
                    "job": r.job_name,
                    "at": r.started_at.to_rfc3339(),
                    "error": r.error_message,
                })
            })
            .collect();
        Ok(json!({ "count": failures.len(), "failures": failures }))
    }
}

/// Cumulative stats of a record kind.
pub struct StatsSection {
    name: &'static str,
    kind: RecordKind,
    store: Arc<dyn RunRecordStore>,
}

impl StatsSection {
    pub fn backups(store: Arc<dyn RunRecordStore>) -> Self {
        Self {
            name: "backups",
            kind: RecordKind::Backup,
            store,
        }
    }

    pub fn deployments(store: Arc<dyn RunRecordStore>) -> Self {
        Self {
            name: "deployments",
            kind: RecordKind::Deployment,
            store,
        }
    }
}

#[async_trait]
impl ReportSection for StatsSection {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn collect(&self, _period: &ReportPeriod) -> AutomationResult<Value> {
        Ok(self.store.read_stats(self.kind)?)
    }
}

pub struct RecommendationsSection;

#[async_trait]
impl ReportSection for RecommendationsSection {
    fn name(&self) -> &'static str {
        "recommendations"
    }

    async fn collect(&self, _period: &ReportPeriod) -> AutomationResult<Value> {
        Err(AutomationError::NotImplemented(
            "report recommendations".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run_store::{append_typed, JsonDayStore};
    use chrono::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_jobs_and_errors_sections_count_period_runs() {
        let temp_dir = TempDir::new().unwrap();
        let store: Arc<dyn RunRecordStore> = Arc::new(JsonDayStore::new(temp_dir.path()).unwrap());

        let mut ok = RunRecord::start("cleanup", "schedule");
        ok.succeed(json!({})).unwrap();
        let mut failed = RunRecord::start("database-backup", "manual");
        failed.fail("disk full").unwrap();
        let mut old = RunRecord::start("cleanup", "schedule");
        old.started_at = Utc::now() - Duration::days(3);
        old.fail("ancient").unwrap();
        for record in [&old, &ok, &failed] {
            append_typed(store.as_ref(), RecordKind::Job, record).unwrap();
        }

        let period = ReportPeriod {
            start: Utc::now() - Duration::days(1),
            end: Utc::now() + Duration::minutes(1),
        };
        let jobs = JobsSection::new(store.clone()).collect(&period).await.unwrap();
        assert_eq!(jobs["runs"], 2);
        assert_eq!(jobs["failed"], 1);
        assert_eq!(jobs["per_job"]["cleanup"]["success"], 1);

        let errors = ErrorsSection::new(store).collect(&period).await.unwrap();
        assert_eq!(errors["count"], 1);
        assert_eq!(errors["failures"][0]["error"], "disk full");
    }
}

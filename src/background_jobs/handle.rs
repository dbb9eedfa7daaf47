use super::context::Trigger;
use super::cron_schedule::CronSchedule;
use super::executor::JobExecutor;
use super::job::{BackgroundJob, JobError};
use crate::run_store::{recent_typed, RecordKind, RunRecord, RunRecordStore};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How far back `history()` looks in the run store.
const HISTORY_SCAN_LIMIT: usize = 1000;

/// Information about a registered job for status output.
#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub name: String,
    pub description: String,
    pub cron: String,
    pub enabled: bool,
    pub is_running: bool,
    pub last_run: Option<JobRunInfo>,
    pub next_run_at: Option<String>,
}

/// Serializable job run summary.
#[derive(Debug, Clone, Serialize)]
pub struct JobRunInfo {
    pub started_at: String,
    pub finished_at: Option<String>,
    pub status: String,
    pub duration_ms: Option<i64>,
    pub error_message: Option<String>,
    pub triggered_by: String,
}

impl From<&RunRecord> for JobRunInfo {
    fn from(run: &RunRecord) -> Self {
        JobRunInfo {
            started_at: run.started_at.to_rfc3339(),
            finished_at: run.finished_at.map(|dt| dt.to_rfc3339()),
            status: run.status.as_str().to_string(),
            duration_ms: run.duration_ms,
            error_message: run.error_message.clone(),
            triggered_by: run.triggered_by.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub active_jobs: Vec<String>,
    pub jobs: Vec<JobInfo>,
}

/// Command sent to the scheduler loop.
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Job table changed; recompute the next wake-up.
    Reschedule,
}

/// A job bound to its cron trigger.
pub struct RegisteredJob {
    pub job: Arc<dyn BackgroundJob>,
    pub schedule: CronSchedule,
    pub enabled: bool,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<RunRecord>,
    /// Serializes scheduled and manual executions of this job.
    pub run_lock: Arc<Mutex<()>>,
}

/// Shared state between scheduler, executor and handle.
#[derive(Default)]
pub struct SharedJobState {
    pub jobs: HashMap<String, RegisteredJob>,
    /// Currently running job names
    pub running_jobs: HashSet<String>,
    /// Cancellation tokens of running jobs
    pub cancel_tokens: HashMap<String, CancellationToken>,
    /// Abort handles of running job tasks, used once the grace period is over
    pub abort_handles: HashMap<String, AbortHandle>,
    /// Whether the trigger loop is running
    pub loop_active: bool,
}

impl SharedJobState {
    fn job_info(&self, name: &str, entry: &RegisteredJob) -> JobInfo {
        JobInfo {
            name: name.to_string(),
            description: entry.job.description().to_string(),
            cron: entry.schedule.expression().to_string(),
            enabled: entry.enabled,
            is_running: self.running_jobs.contains(name),
            last_run: entry.last_run.as_ref().map(JobRunInfo::from),
            next_run_at: if entry.enabled {
                entry.next_run.map(|dt| dt.to_rfc3339())
            } else {
                None
            },
        }
    }
}

/// Handle to interact with the job scheduler from the CLI.
#[derive(Clone)]
pub struct SchedulerHandle {
    command_tx: mpsc::Sender<SchedulerCommand>,
    shared_state: Arc<RwLock<SharedJobState>>,
    executor: Arc<JobExecutor>,
    store: Arc<dyn RunRecordStore>,
}

impl SchedulerHandle {
    pub fn new(
        command_tx: mpsc::Sender<SchedulerCommand>,
        shared_state: Arc<RwLock<SharedJobState>>,
        executor: Arc<JobExecutor>,
        store: Arc<dyn RunRecordStore>,
    ) -> Self {
        Self {
            command_tx,
            shared_state,
            executor,
            store,
        }
    }

    /// Information about all registered jobs, sorted by name.
    pub async fn list_jobs(&self) -> Vec<JobInfo> {
        let state = self.shared_state.read().await;
        let mut jobs: Vec<JobInfo> = state
            .jobs
            .iter()
            .map(|(name, entry)| state.job_info(name, entry))
            .collect();
        jobs.sort_by(|a, b| a.name.cmp(&b.name));
        jobs
    }

    pub async fn get_job(&self, name: &str) -> Option<JobInfo> {
        let state = self.shared_state.read().await;
        state.jobs.get(name).map(|entry| state.job_info(name, entry))
    }

    pub async fn job_exists(&self, name: &str) -> bool {
        self.shared_state.read().await.jobs.contains_key(name)
    }

    pub async fn is_job_running(&self, name: &str) -> bool {
        self.shared_state.read().await.running_jobs.contains(name)
    }

    pub async fn running_jobs(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .shared_state
            .read()
            .await
            .running_jobs
            .iter()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Run a job immediately and wait for it to finish.
    ///
    /// Waits behind any in-flight run of the same job. The failure is
    /// recorded and alerted on before it is returned.
    pub async fn run_now(
        &self,
        name: &str,
        options: Option<JsonValue>,
    ) -> Result<RunRecord, JobError> {
        if !self.job_exists(name).await {
            return Err(JobError::Validation(format!("unknown job '{}'", name)));
        }
        self.executor.execute(name, Trigger::Manual, options).await
    }

    /// Enable or disable the cron trigger of a job. Disabled jobs can still run manually.
    pub async fn set_enabled(&self, name: &str, enabled: bool) -> Result<(), JobError> {
        {
            let mut state = self.shared_state.write().await;
            let entry = state.jobs.get_mut(name).ok_or(JobError::NotFound)?;
            entry.enabled = enabled;
            if enabled {
                entry.next_run = entry.schedule.next_after(Utc::now());
            }
        }
        match self.command_tx.try_send(SchedulerCommand::Reschedule) {
            Ok(()) => {}
            // A reschedule is already queued; the loop will see the new state.
            Err(TrySendError::Full(_)) => {
                warn!("Scheduler command queue full, reschedule for {} coalesced", name)
            }
            // No loop running (one-shot CLI use).
            Err(TrySendError::Closed(_)) => {
                debug!("Scheduler loop not running, {} updated in place", name)
            }
        }
        Ok(())
    }

    /// Most recent runs of `name`, newest first.
    pub fn history(&self, name: &str, limit: usize) -> Result<Vec<RunRecord>> {
        let records: Vec<RunRecord> =
            recent_typed(self.store.as_ref(), RecordKind::Job, HISTORY_SCAN_LIMIT)?;
        Ok(records
            .into_iter()
            .filter(|r| r.job_name == name)
            .take(limit)
            .collect())
    }

    pub async fn status(&self) -> SchedulerStatus {
        let running = self.shared_state.read().await.loop_active;
        SchedulerStatus {
            running,
            active_jobs: self.running_jobs().await,
            jobs: self.list_jobs().await,
        }
    }
}

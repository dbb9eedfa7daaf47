use super::context::{JobContext, Trigger};
use super::handle::SharedJobState;
use super::job::JobError;
use crate::metrics;
use crate::notifications::{AlertOptions, NotificationService, Severity};
use crate::run_store::{append_typed, bump_counter, set_field, RecordKind, RunRecord, RunRecordStore};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Runs one job execution end to end: locking, timing, error and panic
/// capture, persistence, metrics and failure alerting.
pub struct JobExecutor {
    shared_state: Arc<RwLock<SharedJobState>>,
    store: Arc<dyn RunRecordStore>,
    notifier: Option<Arc<NotificationService>>,
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl JobExecutor {
    pub fn new(
        shared_state: Arc<RwLock<SharedJobState>>,
        store: Arc<dyn RunRecordStore>,
        notifier: Option<Arc<NotificationService>>,
    ) -> Self {
        Self {
            shared_state,
            store,
            notifier,
        }
    }

    /// Execute `name` once.
    ///
    /// Scheduled runs give up with `AlreadyRunning` if the job is busy;
    /// manual runs wait for the in-flight run to finish.
    pub async fn execute(
        &self,
        name: &str,
        trigger: Trigger,
        params: Option<JsonValue>,
    ) -> Result<RunRecord, JobError> {
        if let Some(p) = &params {
            if !p.is_object() {
                return Err(JobError::Validation(
                    "options must be a JSON object".to_string(),
                ));
            }
        }

        let (job, run_lock) = {
            let state = self.shared_state.read().await;
            let entry = state.jobs.get(name).ok_or(JobError::NotFound)?;
            (Arc::clone(&entry.job), Arc::clone(&entry.run_lock))
        };

        let _guard = match trigger {
            Trigger::Schedule => match run_lock.try_lock_owned() {
                Ok(guard) => guard,
                Err(_) => {
                    info!(
                        "Skipping scheduled run of {}: previous run still in progress",
                        name
                    );
                    metrics::record_job_skipped(name);
                    return Err(JobError::AlreadyRunning);
                }
            },
            Trigger::Manual => run_lock.lock_owned().await,
        };

        let mut record = RunRecord::start(name, trigger.as_str());
        let cancel_token = CancellationToken::new();
        {
            let mut state = self.shared_state.write().await;
            state.running_jobs.insert(name.to_string());
            state
                .cancel_tokens
                .insert(name.to_string(), cancel_token.clone());
        }
        metrics::set_job_running(name, true);
        info!(
            "Starting job {} (run {}, {})",
            name,
            record.id,
            trigger.as_str()
        );

        let ctx = JobContext::new(cancel_token, record.id.clone(), trigger);
        let start = Instant::now();
        let task_job = Arc::clone(&job);
        let task = tokio::spawn(async move { task_job.execute(&ctx, params).await });
        self.shared_state
            .write()
            .await
            .abort_handles
            .insert(name.to_string(), task.abort_handle());
        let outcome = task.await;
        let elapsed = start.elapsed();

        let result = match outcome {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(JobError::Panicked(panic_message(e.into_panic()))),
            Err(_) => Err(JobError::Cancelled),
        };

        let finalized = match &result {
            Ok(value) => record.succeed(value.clone()),
            Err(e) => record.fail(e.to_string()),
        };
        if let Err(e) = finalized {
            error!("Run {} of {} could not be finalized: {}", record.id, name, e);
        }

        let status_label = record.status.as_str();
        match &result {
            Ok(_) => info!("Job {} completed successfully in {:?}", name, elapsed),
            Err(e) => error!("Job {} failed after {:?}: {}", name, elapsed, e),
        }
        metrics::record_job_execution(name, status_label, elapsed);
        metrics::set_job_running(name, false);

        self.persist(&record);

        {
            let mut state = self.shared_state.write().await;
            state.running_jobs.remove(name);
            state.cancel_tokens.remove(name);
            state.abort_handles.remove(name);
            if let Some(entry) = state.jobs.get_mut(name) {
                entry.last_run = Some(record.clone());
            }
        }

        if let Err(e) = &result {
            self.alert_failure(&record, e).await;
        }

        result.map(|_| record)
    }

    fn persist(&self, record: &RunRecord) {
        if let Err(e) = append_typed(self.store.as_ref(), RecordKind::Job, record) {
            error!("Failed to persist run {} of {}: {}", record.id, record.job_name, e);
        }
        let status = record.status.as_str();
        let result = self.store.update_stats(RecordKind::Job, &mut |stats| {
            bump_counter(stats, "total", 1);
            bump_counter(stats, status, 1);
            bump_counter(stats, &format!("{}_{}", record.job_name, status), 1);
            set_field(
                stats,
                "last_run_at",
                JsonValue::from(record.started_at.to_rfc3339()),
            );
        });
        if let Err(e) = result {
            warn!("Failed to update job stats: {}", e);
        }
    }

    async fn alert_failure(&self, record: &RunRecord, error: &JobError) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        let mut values = HashMap::new();
        values.insert("job".to_string(), record.job_name.clone());
        values.insert(
            "duration_ms".to_string(),
            record.duration_ms.unwrap_or_default().to_string(),
        );
        values.insert("trigger".to_string(), record.triggered_by.clone());
        values.insert("error".to_string(), error.to_string());

        let (title, body) = notifier
            .templates()
            .render("job_failed", &values)
            .unwrap_or_else(|| {
                (
                    format!("Job failed: {}", record.job_name),
                    error.to_string(),
                )
            });
        let alert = AlertOptions::new(Severity::High, title, body)
            .with_details(serde_json::json!({ "run_id": record.id }));
        if let Err(e) = notifier.send_alert(alert).await {
            warn!("Failed to send failure alert for {}: {}", record.job_name, e);
        }
    }
}

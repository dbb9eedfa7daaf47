use super::context::Trigger;
use super::cron_schedule::CronSchedule;
use super::executor::JobExecutor;
use super::handle::{RegisteredJob, SchedulerCommand, SchedulerHandle, SharedJobState};
use super::job::{BackgroundJob, ShutdownBehavior};
use crate::error::AutomationError;
use crate::notifications::NotificationService;
use crate::run_store::RunRecordStore;
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Upper bound on how long the loop sleeps before re-checking the job table.
const MAX_SLEEP: Duration = Duration::from_secs(60);

/// How long aborted runs get to record their cancellation during shutdown.
const ABORT_SETTLE: Duration = Duration::from_secs(5);

/// Owns the cron trigger table and fires due jobs.
pub struct JobScheduler {
    /// Shared state accessible by SchedulerHandle
    shared_state: Arc<RwLock<SharedJobState>>,

    executor: Arc<JobExecutor>,

    /// Scheduled runs spawned by this loop (manual runs are awaited by their caller)
    running_handles: Vec<(String, JoinHandle<()>)>,

    /// Receiver for commands from SchedulerHandle
    command_receiver: mpsc::Receiver<SchedulerCommand>,

    /// Token to signal scheduler shutdown.
    shutdown_token: CancellationToken,

    /// How long shutdown waits for in-flight runs.
    grace_period: Duration,
}

impl JobScheduler {
    pub fn new(
        shared_state: Arc<RwLock<SharedJobState>>,
        executor: Arc<JobExecutor>,
        command_receiver: mpsc::Receiver<SchedulerCommand>,
        shutdown_token: CancellationToken,
        grace_period: Duration,
    ) -> Self {
        Self {
            shared_state,
            executor,
            running_handles: Vec::new(),
            command_receiver,
            shutdown_token,
            grace_period,
        }
    }

    /// Bind `job` to `cron_expr` under `name`.
    ///
    /// Fails with `AutomationError::Config` when the name is taken or the
    /// expression does not parse.
    pub async fn register_job(
        &mut self,
        name: &str,
        cron_expr: &str,
        job: Arc<dyn BackgroundJob>,
    ) -> Result<(), AutomationError> {
        let schedule = CronSchedule::parse(cron_expr)?;
        let mut state = self.shared_state.write().await;
        if state.jobs.contains_key(name) {
            return Err(AutomationError::Config(format!(
                "job '{}' is already registered",
                name
            )));
        }
        info!(
            "Registering job: {} [{}] - {}",
            name,
            schedule.expression(),
            job.description()
        );
        let next_run = schedule.next_after(Utc::now());
        state.jobs.insert(
            name.to_string(),
            RegisteredJob {
                job,
                schedule,
                enabled: true,
                next_run,
                last_run: None,
                run_lock: Arc::new(Mutex::new(())),
            },
        );
        Ok(())
    }

    /// Get the number of registered jobs.
    pub async fn job_count(&self) -> usize {
        self.shared_state.read().await.jobs.len()
    }

    /// Main scheduler loop. Returns after shutdown completes.
    pub async fn run(&mut self) {
        let job_count = self.job_count().await;
        info!("Starting job scheduler with {} registered jobs", job_count);
        self.shared_state.write().await.loop_active = true;

        loop {
            self.cleanup_completed_jobs();

            let sleep_duration = self.time_until_next_scheduled_job().await;
            debug!(
                "Scheduler sleeping for {:?} until next scheduled job",
                sleep_duration
            );

            tokio::select! {
                _ = tokio::time::sleep(sleep_duration) => {
                    self.run_due_jobs().await;
                }
                Some(cmd) = self.command_receiver.recv() => {
                    debug!("Received scheduler command: {:?}", cmd);
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Scheduler received shutdown signal");
                    self.shutdown().await;
                    break;
                }
            }
        }

        info!("Job scheduler stopped");
    }

    /// Time until the earliest enabled job is due, capped at [`MAX_SLEEP`].
    async fn time_until_next_scheduled_job(&self) -> Duration {
        let now = Utc::now();
        let state = self.shared_state.read().await;
        state
            .jobs
            .values()
            .filter(|entry| entry.enabled)
            .filter_map(|entry| entry.next_run)
            .map(|next| (next - now).to_std().unwrap_or(Duration::ZERO))
            .min()
            .unwrap_or(MAX_SLEEP)
            .min(MAX_SLEEP)
    }

    /// Spawn every enabled job whose fire time has passed and advance its trigger.
    async fn run_due_jobs(&mut self) {
        let now = Utc::now();
        let due: Vec<String> = {
            let mut state = self.shared_state.write().await;
            let mut due = Vec::new();
            for (name, entry) in state.jobs.iter_mut() {
                if !entry.enabled {
                    continue;
                }
                if matches!(entry.next_run, Some(next) if next <= now) {
                    entry.next_run = entry.schedule.next_after(now);
                    due.push(name.clone());
                }
            }
            due
        };

        for name in due {
            let executor = Arc::clone(&self.executor);
            let job_name = name.clone();
            let handle = tokio::spawn(async move {
                // Failures are already recorded and alerted by the executor.
                let _ = executor.execute(&job_name, Trigger::Schedule, None).await;
            });
            self.running_handles.push((name, handle));
        }
    }

    /// Abort every job task still in flight and return their names.
    async fn abort_running_jobs(&self) -> Vec<String> {
        let state = self.shared_state.read().await;
        let mut names: Vec<String> = state
            .abort_handles
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(name, handle)| {
                handle.abort();
                name.clone()
            })
            .collect();
        names.sort();
        names
    }

    fn cleanup_completed_jobs(&mut self) {
        self.running_handles.retain(|(_, handle)| !handle.is_finished());
    }

    /// Stop triggering, cancel cancellable jobs and wait for in-flight runs
    /// up to the grace period. Runs still going after that are aborted.
    async fn shutdown(&mut self) {
        info!("Shutting down scheduler...");

        {
            let mut state = self.shared_state.write().await;
            state.loop_active = false;
            for (name, token) in &state.cancel_tokens {
                let behavior = state
                    .jobs
                    .get(name)
                    .map(|entry| entry.job.shutdown_behavior())
                    .unwrap_or_default();
                if behavior == ShutdownBehavior::Cancellable {
                    debug!("Cancelling job: {}", name);
                    token.cancel();
                } else {
                    info!("Waiting for job {} to complete...", name);
                }
            }
        }

        let handles: Vec<JoinHandle<()>> = self.running_handles.drain(..).map(|(_, h)| h).collect();
        if !handles.is_empty() {
            let pending = join_all(handles);
            tokio::pin!(pending);
            if tokio::time::timeout(self.grace_period, &mut pending)
                .await
                .is_err()
            {
                let cut_off = self.abort_running_jobs().await;
                warn!(
                    "Grace period of {:?} elapsed, aborted job(s): {}",
                    self.grace_period,
                    cut_off.join(", ")
                );
                // Aborted runs still record their cancellation.
                if tokio::time::timeout(ABORT_SETTLE, pending).await.is_err() {
                    warn!("Aborted jobs did not settle within {:?}", ABORT_SETTLE);
                }
            }
        }

        info!("Scheduler shutdown complete");
    }
}

/// Create a scheduler and its handle.
pub fn create_scheduler(
    store: Arc<dyn RunRecordStore>,
    notifier: Option<Arc<NotificationService>>,
    shutdown_token: CancellationToken,
    grace_period: Duration,
) -> (JobScheduler, SchedulerHandle) {
    let (command_tx, command_rx) = mpsc::channel(100);
    let shared_state = Arc::new(RwLock::new(SharedJobState::default()));
    let executor = Arc::new(JobExecutor::new(
        Arc::clone(&shared_state),
        Arc::clone(&store),
        notifier,
    ));

    let scheduler = JobScheduler::new(
        Arc::clone(&shared_state),
        Arc::clone(&executor),
        command_rx,
        shutdown_token,
        grace_period,
    );
    let handle = SchedulerHandle::new(command_tx, shared_state, executor, store);

    (scheduler, handle)
}

//! Background job scheduling and execution system.
//!
//! This module provides the cron-driven scheduler that runs the automation
//! catalogue (backups, health checks, cleanup, sync, engagement, deployment
//! and reports), plus manual runs through [`SchedulerHandle`].

mod catalog;
mod context;
mod cron_schedule;
mod executor;
mod handle;
mod job;
pub mod jobs;
mod scheduler;

pub use catalog::{register_catalog, CatalogEntry, JobServices, JOB_CATALOG};
pub use context::{JobContext, Trigger};
pub use cron_schedule::CronSchedule;
pub use executor::JobExecutor;
pub use handle::{JobInfo, JobRunInfo, SchedulerHandle, SchedulerStatus};
pub use job::{bool_param, str_param, u64_param, BackgroundJob, JobError, ShutdownBehavior};
pub use scheduler::{create_scheduler, JobScheduler};

//! Platform operations automation.
//!
//! This library exposes the services, scheduler and persistence layer for
//! the `automation` binary and for integration tests.

pub mod app;
pub mod background_jobs;
pub mod backup;
pub mod cleanup;
pub mod cli_style;
pub mod config;
pub mod content;
pub mod datastore;
pub mod deployment;
pub mod engagement;
pub mod error;
pub mod health;
pub mod interactive;
pub mod metrics;
pub mod notifications;
pub mod reports;
pub mod run_store;

// Re-export commonly used types for convenience
pub use app::{Automation, AutomationStatus};
pub use config::AppConfig;
pub use error::{AutomationError, AutomationResult};
pub use run_store::{JsonDayStore, RunRecord, RunRecordStore};

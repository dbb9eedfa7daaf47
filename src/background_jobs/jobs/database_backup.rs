use super::to_payload;
use crate::background_jobs::{
    context::JobContext,
    job::{bool_param, str_param, BackgroundJob, JobError, ShutdownBehavior},
};
use crate::backup::{BackupOptions, DatabaseBackup, RestoreOptions};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Exports the datastore, archives it and uploads the archive.
///
/// Options: `local_only` skips cloud targets. Passing `restore` with an
/// archive path restores that archive instead (requires `confirm: true`,
/// `drop_existing` truncates collections first).
pub struct DatabaseBackupJob {
    backup: Arc<DatabaseBackup>,
}

impl DatabaseBackupJob {
    pub fn new(backup: Arc<DatabaseBackup>) -> Self {
        Self { backup }
    }
}

#[async_trait]
impl BackgroundJob for DatabaseBackupJob {
    fn description(&self) -> &'static str {
        "Exports every datastore collection to a zip archive and uploads it"
    }

    fn shutdown_behavior(&self) -> ShutdownBehavior {
        ShutdownBehavior::WaitForCompletion
    }

    async fn execute(
        &self,
        _ctx: &JobContext,
        params: Option<JsonValue>,
    ) -> Result<JsonValue, JobError> {
        if let Some(archive) = str_param(&params, "restore")? {
            let options = RestoreOptions {
                confirm: bool_param(&params, "confirm")?.unwrap_or(false),
                drop_existing: bool_param(&params, "drop_existing")?.unwrap_or(false),
            };
            info!("Restoring backup {}", archive);
            let report = self
                .backup
                .restore_backup(&PathBuf::from(archive), options)
                .await?;
            return to_payload(&report);
        }

        let options = BackupOptions {
            local_only: bool_param(&params, "local_only")?.unwrap_or(false),
        };
        let record = self.backup.perform_backup(options).await?;
        to_payload(&record)
    }
}

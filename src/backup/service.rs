use super::archive::{pack_dir, read_json_entries, sha256_file};
use super::uploader::CloudUploader;
use crate::datastore::CollectionStore;
use crate::error::{AutomationError, AutomationResult};
use crate::metrics;
use crate::run_store::{
    append_typed, bump_counter, recent_typed, set_field, RecordKind, RunRecordStore, RunStatus,
};
use anyhow::Context;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use tracing::{debug, error, info, warn};

pub const DEFAULT_LOCAL_RETENTION_DAYS: i64 = 7;
const ARCHIVE_PREFIX: &str = "backup-";
const ARCHIVE_SUFFIX: &str = ".zip";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UploadStatus {
    Uploaded { location: String },
    Failed { error: String },
}

fn succeeded() -> RunStatus {
    RunStatus::Success
}

/// One backup attempt. Failed attempts carry `error` and no archive data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    pub name: String,
    #[serde(default = "succeeded")]
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub archive_path: PathBuf,
    pub size_bytes: u64,
    pub sha256: String,
    pub duration_ms: i64,
    pub collections: BTreeMap<String, usize>,
    pub uploads: BTreeMap<String, UploadStatus>,
    pub delete_after: DateTime<Utc>,
    #[serde(default)]
    pub pruned: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackupOptions {
    /// Skip cloud targets for this run.
    #[serde(default)]
    pub local_only: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RestoreOptions {
    #[serde(default)]
    pub confirm: bool,
    #[serde(default)]
    pub drop_existing: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RestoreReport {
    pub archive_path: PathBuf,
    pub succeeded: BTreeMap<String, usize>,
    pub failed: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackupStatus {
    pub backup_dir: PathBuf,
    pub cloud_targets: Vec<String>,
    pub retention_days: i64,
    pub stats: Value,
}

/// Exports the datastore into zipped archives and restores them.
pub struct DatabaseBackup {
    datastore: Arc<dyn CollectionStore>,
    store: Arc<dyn RunRecordStore>,
    backup_dir: PathBuf,
    uploaders: Vec<Arc<dyn CloudUploader>>,
    retention_days: i64,
}

impl DatabaseBackup {
    pub fn new(
        datastore: Arc<dyn CollectionStore>,
        store: Arc<dyn RunRecordStore>,
        backup_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            datastore,
            store,
            backup_dir: backup_dir.into(),
            uploaders: Vec::new(),
            retention_days: DEFAULT_LOCAL_RETENTION_DAYS,
        }
    }

    pub fn with_uploader(mut self, uploader: Arc<dyn CloudUploader>) -> Self {
        self.uploaders.push(uploader);
        self
    }

    pub fn with_retention_days(mut self, days: i64) -> Self {
        self.retention_days = days;
        self
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Export, archive, upload, then prune expired local archives.
    ///
    /// Upload failures are recorded per target. Only a failure to produce the
    /// archive fails the backup.
    pub async fn perform_backup(&self, options: BackupOptions) -> AutomationResult<BackupRecord> {
        let start = Instant::now();
        let created_at = Utc::now();
        let name = format!(
            "{}{}",
            ARCHIVE_PREFIX,
            created_at.format("%Y%m%d-%H%M%S-%3f")
        );
        let archive_path = self.backup_dir.join(format!("{}{}", name, ARCHIVE_SUFFIX));

        let (collections, size_bytes, sha256) = match self.build(&archive_path).await {
            Ok(built) => built,
            Err(e) => {
                let _ = tokio::fs::remove_file(&archive_path).await;
                self.record_failure(BackupRecord {
                    name,
                    status: RunStatus::Failed,
                    error: Some(e.to_string()),
                    created_at,
                    archive_path,
                    size_bytes: 0,
                    sha256: String::new(),
                    duration_ms: start.elapsed().as_millis() as i64,
                    collections: BTreeMap::new(),
                    uploads: BTreeMap::new(),
                    delete_after: created_at,
                    pruned: Vec::new(),
                });
                return Err(e);
            }
        };
        info!(
            "Backup {} archived {} collections ({:#})",
            name,
            collections.len(),
            byte_unit::Byte::from(size_bytes)
        );

        let mut uploads = BTreeMap::new();
        if !options.local_only {
            let object_name = format!("{}{}", name, ARCHIVE_SUFFIX);
            for uploader in &self.uploaders {
                let status = match uploader.upload(&archive_path, &object_name).await {
                    Ok(location) => {
                        info!("Backup {} uploaded to {}", name, location);
                        UploadStatus::Uploaded { location }
                    }
                    Err(e) => {
                        warn!("Backup {} upload via {} failed: {}", name, uploader.name(), e);
                        UploadStatus::Failed {
                            error: e.to_string(),
                        }
                    }
                };
                uploads.insert(uploader.name().to_string(), status);
            }
        }

        let pruned = self.prune_expired(SystemTime::now()).await;

        let record = BackupRecord {
            name,
            status: RunStatus::Success,
            error: None,
            created_at,
            archive_path,
            size_bytes,
            sha256,
            duration_ms: start.elapsed().as_millis() as i64,
            collections,
            uploads,
            delete_after: created_at + ChronoDuration::days(self.retention_days),
            pruned,
        };
        self.record_success(&record);
        Ok(record)
    }

    async fn build(
        &self,
        archive_path: &Path,
    ) -> AutomationResult<(BTreeMap<String, usize>, u64, String)> {
        tokio::fs::create_dir_all(&self.backup_dir).await?;
        let datastore = Arc::clone(&self.datastore);
        let target = archive_path.to_path_buf();
        let built = tokio::task::spawn_blocking(move || build_archive(datastore.as_ref(), &target))
            .await
            .map_err(|e| AutomationError::ExternalIo(format!("backup task aborted: {}", e)))?;
        Ok(built?)
    }

    /// Delete local archives whose modification time is older than the
    /// retention window. Returns the deleted file names.
    pub async fn prune_expired(&self, now: SystemTime) -> Vec<String> {
        let Some(cutoff) = now.checked_sub(std::time::Duration::from_secs(
            self.retention_days.max(0) as u64 * 24 * 3600,
        )) else {
            return Vec::new();
        };
        let mut pruned = Vec::new();
        for (path, modified) in self.local_archives().await {
            if modified >= cutoff {
                continue;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    debug!("Pruned expired backup {}", path.display());
                    if let Some(file_name) = path.file_name().and_then(|n| n.to_str()) {
                        pruned.push(file_name.to_string());
                    }
                }
                Err(e) => warn!("Failed to prune backup {}: {}", path.display(), e),
            }
        }
        pruned
    }

    async fn local_archives(&self) -> Vec<(PathBuf, SystemTime)> {
        let mut archives = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir(&self.backup_dir).await else {
            return archives;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let is_archive = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(ARCHIVE_PREFIX) && n.ends_with(ARCHIVE_SUFFIX));
            if !is_archive {
                continue;
            }
            if let Ok(modified) = entry.metadata().await.and_then(|m| m.modified()) {
                archives.push((path, modified));
            }
        }
        archives.sort();
        archives
    }

    /// Local archive paths, oldest first.
    pub async fn list_backups(&self) -> Vec<PathBuf> {
        self.local_archives()
            .await
            .into_iter()
            .map(|(path, _)| path)
            .collect()
    }

    /// Import every collection file of `archive_path`.
    ///
    /// Requires `options.confirm`. Each collection succeeds or fails on its own.
    pub async fn restore_backup(
        &self,
        archive_path: &Path,
        options: RestoreOptions,
    ) -> AutomationResult<RestoreReport> {
        if !options.confirm {
            return Err(AutomationError::Validation(
                "restore overwrites live data; pass confirm=true to proceed".to_string(),
            ));
        }
        if !archive_path.is_file() {
            return Err(AutomationError::Validation(format!(
                "backup archive {} does not exist",
                archive_path.display()
            )));
        }

        let datastore = Arc::clone(&self.datastore);
        let path = archive_path.to_path_buf();
        let drop_existing = options.drop_existing;
        let report = tokio::task::spawn_blocking(move || {
            restore_archive(datastore.as_ref(), &path, drop_existing)
        })
        .await
        .map_err(|e| AutomationError::ExternalIo(format!("restore task aborted: {}", e)))??;

        info!(
            "Restored {} collections from {} ({} failed)",
            report.succeeded.len(),
            archive_path.display(),
            report.failed.len()
        );
        Ok(report)
    }

    pub fn recent(&self, limit: usize) -> anyhow::Result<Vec<BackupRecord>> {
        recent_typed(self.store.as_ref(), RecordKind::Backup, limit)
    }

    pub fn status(&self) -> BackupStatus {
        BackupStatus {
            backup_dir: self.backup_dir.clone(),
            cloud_targets: self.uploaders.iter().map(|u| u.name().to_string()).collect(),
            retention_days: self.retention_days,
            stats: self.store.read_stats(RecordKind::Backup).unwrap_or_default(),
        }
    }

    fn record_success(&self, record: &BackupRecord) {
        if let Err(e) = append_typed(self.store.as_ref(), RecordKind::Backup, record) {
            error!("Failed to persist backup record {}: {}", record.name, e);
        }
        let result = self.store.update_stats(RecordKind::Backup, &mut |stats| {
            bump_counter(stats, "total", 1);
            bump_counter(stats, "successful", 1);
            bump_counter(stats, "total_bytes", record.size_bytes as i64);
            set_field(stats, "last_backup", Value::from(record.name.clone()));
            set_field(
                stats,
                "last_backup_at",
                Value::from(record.created_at.to_rfc3339()),
            );
            set_field(stats, "last_backup_size", Value::from(record.size_bytes));
        });
        if let Err(e) = result {
            warn!("Failed to update backup stats: {}", e);
        }
        metrics::set_last_backup_size(record.size_bytes);
    }

    fn record_failure(&self, record: BackupRecord) {
        let message = record.error.clone().unwrap_or_default();
        error!("Backup {} failed: {}", record.name, message);
        if let Err(e) = append_typed(self.store.as_ref(), RecordKind::Backup, &record) {
            error!("Failed to persist backup record {}: {}", record.name, e);
        }
        let result = self.store.update_stats(RecordKind::Backup, &mut |stats| {
            bump_counter(stats, "total", 1);
            bump_counter(stats, "failed", 1);
            set_field(stats, "last_error", Value::from(message.as_str()));
        });
        if let Err(e) = result {
            warn!("Failed to update backup stats: {}", e);
        }
    }
}

/// Export every collection into a staging dir and zip it. The staging dir is
/// removed when this returns.
fn build_archive(
    datastore: &dyn CollectionStore,
    archive_path: &Path,
) -> anyhow::Result<(BTreeMap<String, usize>, u64, String)> {
    let staging = tempfile::TempDir::new().context("Failed to create staging dir")?;
    let mut counts = BTreeMap::new();
    for collection in datastore.collections() {
        let records = datastore
            .export_collection(collection)
            .with_context(|| format!("Failed to export {}", collection))?;
        let file = std::fs::File::create(staging.path().join(format!("{}.json", collection)))?;
        serde_json::to_writer(std::io::BufWriter::new(file), &records)?;
        counts.insert(collection.to_string(), records.len());
    }
    let size = pack_dir(staging.path(), archive_path)?;
    let sha256 = sha256_file(archive_path)?;
    Ok((counts, size, sha256))
}

fn restore_archive(
    datastore: &dyn CollectionStore,
    archive_path: &Path,
    drop_existing: bool,
) -> AutomationResult<RestoreReport> {
    let entries = read_json_entries(archive_path)?;
    let mut report = RestoreReport {
        archive_path: archive_path.to_path_buf(),
        ..Default::default()
    };
    for (collection, content) in entries {
        let records: Vec<Value> = match serde_json::from_slice(&content) {
            Ok(records) => records,
            Err(e) => {
                report
                    .failed
                    .insert(collection, format!("invalid collection file: {}", e));
                continue;
            }
        };
        match datastore.import_collection(&collection, &records, drop_existing) {
            Ok(n) => {
                report.succeeded.insert(collection, n);
            }
            Err(e) => {
                warn!("Failed to restore collection {}: {:#}", collection, e);
                report.failed.insert(collection, format!("{:#}", e));
            }
        }
    }
    Ok(report)
}

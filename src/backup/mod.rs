//! Datastore backup to zip archives, cloud upload, pruning and restore.

mod archive;
mod service;
mod uploader;

pub use service::{
    BackupOptions, BackupRecord, BackupStatus, DatabaseBackup, RestoreOptions, RestoreReport,
    UploadStatus, DEFAULT_LOCAL_RETENTION_DAYS,
};
pub use uploader::{CloudUploader, DirectoryMirrorUploader, HttpPutUploader};

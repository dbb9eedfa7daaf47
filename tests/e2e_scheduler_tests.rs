//! Custom jobs registered on a fresh scheduler.

mod common;

use common::write_aged_file;
use platform_automation::background_jobs::jobs::CleanupJob;
use platform_automation::background_jobs::create_scheduler;
use platform_automation::cleanup::{days, CleanupRule, CleanupService};
use platform_automation::error::AutomationError;
use platform_automation::run_store::{JsonDayStore, RunRecordStore, RunStatus};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_cleanup_logs_deletes_only_expired_file() {
    let temp_dir = TempDir::new().unwrap();
    let logs = temp_dir.path().join("logs");
    let old = logs.join("app-old.log");
    let fresh = logs.join("app-new.log");
    write_aged_file(&old, 1234, Duration::from_secs(2 * 24 * 3600));
    write_aged_file(&fresh, 99, Duration::from_secs(3600));

    let store: Arc<dyn RunRecordStore> =
        Arc::new(JsonDayStore::new(temp_dir.path().join("records")).unwrap());
    let rule = CleanupRule::files("logs", vec![logs.clone()], "*.log", false, days(1));
    let cleanup = Arc::new(CleanupService::new(store.clone(), vec![rule]));

    let (mut scheduler, handle) = create_scheduler(
        store,
        None,
        CancellationToken::new(),
        Duration::from_secs(1),
    );
    scheduler
        .register_job("cleanup-logs", "0 4 * * *", Arc::new(CleanupJob::new(cleanup)))
        .await
        .unwrap();

    let record = handle.run_now("cleanup-logs", None).await.unwrap();
    assert_eq!(record.status, RunStatus::Success);
    let result = &record.result["results"][0];
    assert_eq!(result["items_deleted"], 1);
    assert_eq!(result["bytes_freed"], 1234);
    assert!(!old.exists());
    assert!(fresh.exists());

    let info = handle.get_job("cleanup-logs").await.unwrap();
    assert_eq!(info.last_run.unwrap().status, "success");
    assert!(info.next_run_at.is_some());
}

#[tokio::test]
async fn test_duplicate_and_invalid_registrations_are_config_errors() {
    let temp_dir = TempDir::new().unwrap();
    let store: Arc<dyn RunRecordStore> = Arc::new(JsonDayStore::new(temp_dir.path()).unwrap());
    let cleanup = Arc::new(CleanupService::new(store.clone(), Vec::new()));
    let (mut scheduler, handle) =
        create_scheduler(store, None, CancellationToken::new(), Duration::from_secs(1));

    scheduler
        .register_job("cleanup", "*/5 * * * *", Arc::new(CleanupJob::new(cleanup.clone())))
        .await
        .unwrap();
    let duplicate = scheduler
        .register_job("cleanup", "*/5 * * * *", Arc::new(CleanupJob::new(cleanup.clone())))
        .await;
    assert!(matches!(duplicate, Err(AutomationError::Config(_))));
    let invalid = scheduler
        .register_job("other", "every tuesday", Arc::new(CleanupJob::new(cleanup)))
        .await;
    assert!(matches!(invalid, Err(AutomationError::Config(_))));

    let record = handle
        .run_now("cleanup", Some(json!({"dry_run": true})))
        .await
        .unwrap();
    assert_eq!(record.result["dry_run"], true);
    assert_eq!(handle.list_jobs().await.len(), 1);
}

//! End-to-end tests running catalogue jobs through the initialized automation.

mod common;

use common::{seed_users, write_aged_file, TestAutomation};
use platform_automation::background_jobs::JobError;
use platform_automation::datastore::CollectionStore;
use platform_automation::run_store::{recent_typed, RecordKind, RunRecord, RunStatus};
use serde_json::json;
use std::time::Duration;

const HOUR: Duration = Duration::from_secs(3600);

#[tokio::test]
async fn test_catalog_is_registered_and_auto_deploy_disabled() {
    let harness = TestAutomation::spawn().await;
    let status = harness.automation.status().await;

    let names: Vec<&str> = status.scheduler.jobs.iter().map(|j| j.name.as_str()).collect();
    assert!(names.contains(&"database-backup"));
    assert!(names.contains(&"weekly-report"));
    // No content repository configured.
    assert!(!names.contains(&"content-sync"));

    let auto_deploy = status
        .scheduler
        .jobs
        .iter()
        .find(|j| j.name == "auto-deploy")
        .unwrap();
    assert!(!auto_deploy.enabled);
    assert!(auto_deploy.next_run_at.is_none());
    assert!(!status.scheduler.running);

    let as_json = serde_json::to_value(&status).unwrap();
    assert!(as_json.get("jobs").is_some());
    assert!(as_json.get("modules").is_some());
}

#[tokio::test]
async fn test_unknown_task_and_bad_options_are_rejected() {
    let harness = TestAutomation::spawn().await;

    let err = harness
        .automation
        .run_task("does-not-exist", None)
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::Validation(_)));

    let err = harness
        .automation
        .run_task("cleanup", Some(json!(["dry_run"])))
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::Validation(_)));

    let err = harness
        .automation
        .run_task("cleanup", Some(json!({"rules": ["no-such-rule"]})))
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::Validation(_)));
}

#[tokio::test]
async fn test_temp_cleanup_dry_run_then_delete() {
    let harness = TestAutomation::spawn().await;
    let tmp = harness.data_dir.join("tmp");
    let old = tmp.join("upload-old.part");
    let fresh = tmp.join("upload-new.part");
    write_aged_file(&old, 10, 48 * HOUR);
    write_aged_file(&fresh, 20, HOUR);

    let dry = harness
        .automation
        .run_task("cleanup", Some(json!({"dry_run": true, "rules": ["temp"]})))
        .await
        .unwrap();
    assert_eq!(dry.status, RunStatus::Success);
    let dry_result = &dry.result["results"][0];
    assert_eq!(dry_result["rule"], "temp");
    assert_eq!(dry_result["items_examined"], 2);
    assert_eq!(dry_result["items_deleted"], 1);
    assert_eq!(dry_result["bytes_freed"], 10);
    assert!(old.exists());

    let real = harness
        .automation
        .run_task("cleanup", Some(json!({"rules": ["temp"]})))
        .await
        .unwrap();
    let real_result = &real.result["results"][0];
    assert_eq!(real_result["items_deleted"], dry_result["items_deleted"]);
    assert_eq!(real_result["bytes_freed"], 10);
    assert!(!old.exists());
    assert!(fresh.exists());

    let history = harness.automation.handle.history("cleanup", 10).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, real.id);
}

#[tokio::test]
async fn test_backup_then_restore_brings_back_counts() {
    let harness = TestAutomation::spawn().await;
    let datastore = harness.automation.datastore.clone();
    seed_users(datastore.as_ref(), 3);

    let backup = harness
        .automation
        .run_task("database-backup", Some(json!({"local_only": true})))
        .await
        .unwrap();
    assert_eq!(backup.status, RunStatus::Success);
    assert_eq!(backup.result["collections"]["users"], 3);
    let archive = backup.result["archive_path"].as_str().unwrap().to_string();
    assert!(std::path::Path::new(&archive).is_file());

    seed_users(datastore.as_ref(), 2);
    assert_eq!(datastore.count("users").unwrap(), 5);

    let err = harness
        .automation
        .run_task("database-backup", Some(json!({"restore": archive})))
        .await
        .unwrap_err();
    assert!(matches!(err, JobError::Validation(_)));
    assert_eq!(datastore.count("users").unwrap(), 5);

    let restore = harness
        .automation
        .run_task(
            "database-backup",
            Some(json!({"restore": archive, "confirm": true, "drop_existing": true})),
        )
        .await
        .unwrap();
    assert_eq!(restore.result["succeeded"]["users"], 3);
    assert_eq!(datastore.count("users").unwrap(), 3);
}

#[tokio::test]
async fn test_runs_are_persisted_to_day_partitions() {
    let harness = TestAutomation::spawn().await;
    harness
        .automation
        .run_task("cleanup", Some(json!({"dry_run": true})))
        .await
        .unwrap();

    let records: Vec<RunRecord> =
        recent_typed(harness.automation.store.as_ref(), RecordKind::Job, 10).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].job_name, "cleanup");
    assert_eq!(records[0].triggered_by, "manual");

    let day_file = harness.data_dir.join("records").join("job").join(format!(
        "job-{}.json",
        chrono::Utc::now().format("%Y-%m-%d")
    ));
    assert!(day_file.is_file(), "missing {}", day_file.display());
}

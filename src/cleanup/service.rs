use super::rules::{file_pattern, CleanupRule, CleanupTarget};
use crate::datastore::CollectionStore;
use crate::run_store::{append_typed, bump_counter, set_field, RecordKind, RunRecordStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanupResult {
    pub rule: String,
    pub items_examined: usize,
    /// Deleted items, or items that would be deleted in a dry run.
    pub items_deleted: usize,
    pub bytes_freed: u64,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupReport {
    pub started_at: DateTime<Utc>,
    pub dry_run: bool,
    pub duration_ms: i64,
    pub results: Vec<CleanupResult>,
}

impl CleanupReport {
    pub fn total_deleted(&self) -> usize {
        self.results.iter().map(|r| r.items_deleted).sum()
    }

    pub fn total_bytes_freed(&self) -> u64 {
        self.results.iter().map(|r| r.bytes_freed).sum()
    }

    pub fn error_count(&self) -> usize {
        self.results.iter().map(|r| r.errors.len()).sum()
    }
}

/// Applies retention rules to files and datastore collections.
pub struct CleanupService {
    rules: Vec<CleanupRule>,
    datastore: Option<Arc<dyn CollectionStore>>,
    store: Arc<dyn RunRecordStore>,
}

impl CleanupService {
    pub fn new(store: Arc<dyn RunRecordStore>, rules: Vec<CleanupRule>) -> Self {
        Self {
            rules,
            datastore: None,
            store,
        }
    }

    pub fn with_datastore(mut self, datastore: Arc<dyn CollectionStore>) -> Self {
        self.datastore = Some(datastore);
        self
    }

    pub fn rules(&self) -> &[CleanupRule] {
        &self.rules
    }

    /// Run the configured rules, optionally restricted to `only` (rule names).
    pub async fn perform_cleanup(&self, dry_run: bool, only: Option<&[String]>) -> CleanupReport {
        let rules: Vec<CleanupRule> = self
            .rules
            .iter()
            .filter(|r| only.map_or(true, |names| names.iter().any(|n| n == &r.name)))
            .cloned()
            .collect();
        self.apply_rules(&rules, dry_run).await
    }

    /// Apply `rules` against the clock. A failing target is recorded in its
    /// result and never stops the remaining targets or rules.
    pub async fn apply_rules(&self, rules: &[CleanupRule], dry_run: bool) -> CleanupReport {
        let started_at = Utc::now();
        let start = Instant::now();
        let now = SystemTime::now();

        let mut results = Vec::with_capacity(rules.len());
        for rule in rules {
            let result = match &rule.target {
                CleanupTarget::Files { .. } => {
                    let rule = rule.clone();
                    tokio::task::spawn_blocking(move || clean_files(&rule, now, dry_run))
                        .await
                        .unwrap_or_else(|e| CleanupResult {
                            errors: vec![format!("cleanup task aborted: {}", e)],
                            ..Default::default()
                        })
                }
                CleanupTarget::Datastore { collection } => {
                    self.clean_collection(rule, collection, started_at, dry_run)
                }
            };
            let result = CleanupResult {
                rule: rule.name.clone(),
                ..result
            };
            if result.items_deleted > 0 || !result.errors.is_empty() {
                info!(
                    "Cleanup rule {}: {} {} of {} items ({} bytes, {} errors)",
                    rule.name,
                    if dry_run { "would delete" } else { "deleted" },
                    result.items_deleted,
                    result.items_examined,
                    result.bytes_freed,
                    result.errors.len()
                );
            } else {
                debug!("Cleanup rule {}: nothing to do", rule.name);
            }
            results.push(result);
        }

        let report = CleanupReport {
            started_at,
            dry_run,
            duration_ms: start.elapsed().as_millis() as i64,
            results,
        };
        self.persist(&report);
        report
    }

    fn clean_collection(
        &self,
        rule: &CleanupRule,
        collection: &str,
        now: DateTime<Utc>,
        dry_run: bool,
    ) -> CleanupResult {
        let mut result = CleanupResult::default();
        let Some(datastore) = &self.datastore else {
            result.errors.push("no datastore configured".to_string());
            return result;
        };
        let retention = match chrono::Duration::from_std(rule.retention) {
            Ok(r) => r,
            Err(e) => {
                result.errors.push(format!("invalid retention: {}", e));
                return result;
            }
        };
        match datastore.count(collection) {
            Ok(n) => result.items_examined = n,
            Err(e) => {
                result.errors.push(format!("{}: {:#}", collection, e));
                return result;
            }
        }
        match datastore.purge_older_than(collection, now - retention, dry_run) {
            Ok(n) => result.items_deleted = n,
            Err(e) => result.errors.push(format!("{}: {:#}", collection, e)),
        }
        result
    }

    fn persist(&self, report: &CleanupReport) {
        if let Err(e) = append_typed(self.store.as_ref(), RecordKind::Cleanup, report) {
            warn!("Failed to persist cleanup report: {}", e);
        }
        if report.dry_run {
            return;
        }
        let result = self.store.update_stats(RecordKind::Cleanup, &mut |stats| {
            bump_counter(stats, "runs", 1);
            bump_counter(stats, "items_deleted", report.total_deleted() as i64);
            bump_counter(stats, "bytes_freed", report.total_bytes_freed() as i64);
            bump_counter(stats, "errors", report.error_count() as i64);
            set_field(
                stats,
                "last_run_at",
                Value::from(report.started_at.to_rfc3339()),
            );
        });
        if let Err(e) = result {
            warn!("Failed to update cleanup stats: {}", e);
        }
    }
}

fn clean_files(rule: &CleanupRule, now: SystemTime, dry_run: bool) -> CleanupResult {
    let mut result = CleanupResult::default();
    let CleanupTarget::Files {
        dirs,
        pattern,
        recursive,
    } = &rule.target
    else {
        return result;
    };
    let matcher = match file_pattern(pattern) {
        Ok(m) => m,
        Err(e) => {
            result.errors.push(format!("invalid pattern '{}': {}", pattern, e));
            return result;
        }
    };
    let Some(cutoff) = now.checked_sub(rule.retention) else {
        return result;
    };

    for dir in dirs {
        if !dir.is_dir() {
            debug!("Cleanup rule {}: {} does not exist", rule.name, dir.display());
            continue;
        }
        let walker = WalkDir::new(dir)
            .min_depth(1)
            .max_depth(if *recursive { usize::MAX } else { 1 });
        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    result.errors.push(e.to_string());
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let matches = entry.file_name().to_str().is_some_and(|n| matcher.matches(n));
            if !matches {
                continue;
            }
            result.items_examined += 1;
            if let Err(e) = expire_file(entry.path(), cutoff, dry_run, &mut result) {
                result
                    .errors
                    .push(format!("{}: {}", entry.path().display(), e));
            }
        }
    }
    result
}

fn expire_file(
    path: &Path,
    cutoff: SystemTime,
    dry_run: bool,
    result: &mut CleanupResult,
) -> std::io::Result<()> {
    let metadata = std::fs::metadata(path)?;
    if metadata.modified()? >= cutoff {
        return Ok(());
    }
    if !dry_run {
        std::fs::remove_file(path)?;
    }
    result.items_deleted += 1;
    result.bytes_freed += metadata.len();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleanup::rules::{days, default_rules};
    use crate::datastore::{SessionRepository, SqliteDatastore};
    use crate::run_store::JsonDayStore;
    use std::time::Duration;
    use tempfile::TempDir;

    fn age_file(path: &Path, age: Duration) {
        std::fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(SystemTime::now() - age)
            .unwrap();
    }

    fn service(temp_dir: &TempDir) -> CleanupService {
        let store = Arc::new(JsonDayStore::new(temp_dir.path().join("records")).unwrap());
        CleanupService::new(store, vec![])
    }

    #[tokio::test]
    async fn test_non_recursive_rule_ignores_subdirs() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("logs");
        std::fs::create_dir_all(dir.join("nested")).unwrap();
        for p in [dir.join("a.log"), dir.join("nested").join("b.log")] {
            std::fs::write(&p, b"12345").unwrap();
            age_file(&p, days(3));
        }

        let rule = CleanupRule::files("logs", vec![dir.clone()], "*.log", false, days(1));
        let report = service(&temp_dir).apply_rules(&[rule], false).await;
        assert_eq!(report.results[0].items_deleted, 1);
        assert!(!dir.join("a.log").exists());
        assert!(dir.join("nested").join("b.log").exists());
    }

    #[tokio::test]
    async fn test_missing_dir_and_bad_target_do_not_stop_other_rules() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("tmp");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("x"), b"1").unwrap();
        age_file(&dir.join("x"), days(2));

        let rules = vec![
            CleanupRule::files("missing", vec![temp_dir.path().join("nope")], "*", true, days(1)),
            CleanupRule::datastore("sessions", "sessions", days(30)),
            CleanupRule::files("temp", vec![dir.clone()], "*", true, days(1)),
        ];
        let report = service(&temp_dir).apply_rules(&rules, false).await;
        assert!(report.results[0].errors.is_empty());
        assert_eq!(report.results[1].errors.len(), 1);
        assert_eq!(report.results[2].items_deleted, 1);
    }

    #[tokio::test]
    async fn test_default_rules_expire_content_snapshots() {
        let temp_dir = TempDir::new().unwrap();
        let snapshot = temp_dir
            .path()
            .join("content-snapshots")
            .join("snapshot-20240101-000000");
        std::fs::create_dir_all(&snapshot).unwrap();
        let old = snapshot.join("intro.md");
        let fresh = temp_dir.path().join("content-snapshots").join("fresh.md");
        std::fs::write(&old, b"# old").unwrap();
        std::fs::write(&fresh, b"# new").unwrap();
        age_file(&old, days(15));

        let rules: Vec<CleanupRule> = default_rules(temp_dir.path())
            .into_iter()
            .filter(|r| r.name == "snapshots")
            .collect();
        let report = service(&temp_dir).apply_rules(&rules, false).await;
        assert_eq!(report.results[0].items_examined, 2);
        assert_eq!(report.results[0].items_deleted, 1);
        assert!(!old.exists());
        assert!(fresh.exists());
    }

    #[tokio::test]
    async fn test_bracket_pattern_matches_character_class() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("logs");
        std::fs::create_dir_all(&dir).unwrap();
        for name in ["log1.txt", "logx.txt"] {
            std::fs::write(dir.join(name), b"12345").unwrap();
            age_file(&dir.join(name), days(3));
        }

        let rule = CleanupRule::files("logs", vec![dir.clone()], "log[0-9].txt", false, days(1));
        let report = service(&temp_dir).apply_rules(&[rule], false).await;
        assert_eq!(report.results[0].items_deleted, 1);
        assert!(!dir.join("log1.txt").exists());
        assert!(dir.join("logx.txt").exists());
    }

    #[tokio::test]
    async fn test_datastore_rule_counts_and_stats() {
        let temp_dir = TempDir::new().unwrap();
        let datastore = Arc::new(SqliteDatastore::in_memory().unwrap());
        datastore
            .create_session("u1", Utc::now() + chrono::Duration::days(1))
            .unwrap();
        let service = service(&temp_dir).with_datastore(datastore);

        let rule = CleanupRule::datastore("sessions", "sessions", days(30));
        let report = service.apply_rules(&[rule], false).await;
        assert_eq!(report.results[0].items_examined, 1);
        assert_eq!(report.results[0].items_deleted, 0);

        let stats = service.store.read_stats(RecordKind::Cleanup).unwrap();
        assert_eq!(stats["runs"], 1);
    }
}

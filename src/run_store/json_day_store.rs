use super::{RecordKind, RunRecordStore};
use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Oldest day file `recent()` will look at.
const MAX_SCAN_DAYS: usize = 60;

/// JSON-file implementation of [`RunRecordStore`].
///
/// Layout under `root`:
/// - `<kind>/<kind>-YYYY-MM-DD.json`: ordered array of that day's records
/// - `<kind>-stats.json`: cumulative stats object
///
/// All writes go through one mutex and land via temp file + rename so a
/// reader never observes a half-written file.
pub struct JsonDayStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonDayStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create record directory {:?}", root))?;
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn kind_dir(&self, kind: RecordKind) -> PathBuf {
        self.root.join(kind.as_str())
    }

    fn day_file(&self, kind: RecordKind, date: NaiveDate) -> PathBuf {
        self.kind_dir(kind)
            .join(format!("{}-{}.json", kind.as_str(), date.format("%Y-%m-%d")))
    }

    fn stats_file(&self, kind: RecordKind) -> PathBuf {
        self.root.join(format!("{}-stats.json", kind.as_str()))
    }

    fn read_json(path: &Path) -> Result<Option<Value>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        if raw.trim().is_empty() {
            return Ok(None);
        }
        let value =
            serde_json::from_str(&raw).with_context(|| format!("Corrupt JSON in {:?}", path))?;
        Ok(Some(value))
    }

    fn write_atomic(path: &Path, value: &Value) -> Result<()> {
        let dir = path
            .parent()
            .with_context(|| format!("Record path {:?} has no parent", path))?;
        fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temp file in {:?}", dir))?;
        let body = serde_json::to_vec_pretty(value)?;
        tmp.write_all(&body)?;
        tmp.flush()?;
        tmp.persist(path)
            .with_context(|| format!("Failed to move temp file onto {:?}", path))?;
        Ok(())
    }

    fn read_day(&self, kind: RecordKind, date: NaiveDate) -> Result<Vec<Value>> {
        let path = self.day_file(kind, date);
        match Self::read_json(&path)? {
            Some(Value::Array(items)) => Ok(items),
            Some(_) => {
                warn!("Day file {:?} is not an array, treating as empty", path);
                Ok(Vec::new())
            }
            None => Ok(Vec::new()),
        }
    }

    /// Dates with a partition file for `kind`, newest first.
    fn partition_dates(&self, kind: RecordKind) -> Result<Vec<NaiveDate>> {
        let dir = self.kind_dir(kind);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let prefix = format!("{}-", kind.as_str());
        let mut dates = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(stem) = name
                .strip_prefix(&prefix)
                .and_then(|s| s.strip_suffix(".json"))
            else {
                continue;
            };
            if let Ok(date) = NaiveDate::parse_from_str(stem, "%Y-%m-%d") {
                dates.push(date);
            }
        }
        dates.sort_unstable_by(|a, b| b.cmp(a));
        Ok(dates)
    }
}

impl RunRecordStore for JsonDayStore {
    fn append(&self, kind: RecordKind, record: &Value) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("record store lock poisoned"))?;
        let today = Utc::now().date_naive();
        let mut items = self.read_day(kind, today)?;
        items.push(record.clone());
        let path = self.day_file(kind, today);
        Self::write_atomic(&path, &Value::Array(items))?;
        debug!("Appended {} record to {:?}", kind, path);
        Ok(())
    }

    fn list_day(&self, kind: RecordKind, date: NaiveDate) -> Result<Vec<Value>> {
        self.read_day(kind, date)
    }

    fn recent(&self, kind: RecordKind, limit: usize) -> Result<Vec<Value>> {
        let mut out = Vec::new();
        for date in self.partition_dates(kind)?.into_iter().take(MAX_SCAN_DAYS) {
            let items = self.read_day(kind, date)?;
            for item in items.into_iter().rev() {
                if out.len() >= limit {
                    return Ok(out);
                }
                out.push(item);
            }
        }
        Ok(out)
    }

    fn update_stats(&self, kind: RecordKind, update: &mut dyn FnMut(&mut Value)) -> Result<Value> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("record store lock poisoned"))?;
        let path = self.stats_file(kind);
        let mut stats = Self::read_json(&path)?.unwrap_or_else(|| Value::Object(Default::default()));
        update(&mut stats);
        Self::write_atomic(&path, &stats)?;
        Ok(stats)
    }

    fn read_stats(&self, kind: RecordKind) -> Result<Value> {
        Ok(Self::read_json(&self.stats_file(kind))?
            .unwrap_or_else(|| Value::Object(Default::default())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run_store::bump_counter;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn create_store() -> (JsonDayStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonDayStore::new(temp_dir.path().join("records")).unwrap();
        (store, temp_dir)
    }

    #[test]
    fn test_append_writes_day_partition() {
        let (store, _temp_dir) = create_store();
        store.append(RecordKind::Job, &json!({"n": 1})).unwrap();
        store.append(RecordKind::Job, &json!({"n": 2})).unwrap();

        let today = Utc::now().date_naive();
        let expected = store.root().join("job").join(format!(
            "job-{}.json",
            today.format("%Y-%m-%d")
        ));
        assert!(expected.exists());

        let items = store.list_day(RecordKind::Job, today).unwrap();
        assert_eq!(items, vec![json!({"n": 1}), json!({"n": 2})]);
    }

    #[test]
    fn test_kinds_are_partitioned_separately() {
        let (store, _temp_dir) = create_store();
        store.append(RecordKind::Job, &json!({"a": 1})).unwrap();
        store.append(RecordKind::Backup, &json!({"b": 1})).unwrap();

        assert_eq!(store.recent(RecordKind::Job, 10).unwrap().len(), 1);
        assert_eq!(store.recent(RecordKind::Backup, 10).unwrap().len(), 1);
        assert!(store.recent(RecordKind::Health, 10).unwrap().is_empty());
    }

    #[test]
    fn test_recent_is_newest_first_across_days() {
        let (store, _temp_dir) = create_store();
        let old_day = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let old_path = store.day_file(RecordKind::Job, old_day);
        JsonDayStore::write_atomic(&old_path, &json!([{"n": "old1"}, {"n": "old2"}])).unwrap();
        store.append(RecordKind::Job, &json!({"n": "today"})).unwrap();

        let recent = store.recent(RecordKind::Job, 2).unwrap();
        assert_eq!(recent, vec![json!({"n": "today"}), json!({"n": "old2"})]);
    }

    #[test]
    fn test_stats_read_modify_write() {
        let (store, _temp_dir) = create_store();
        assert_eq!(store.read_stats(RecordKind::Backup).unwrap(), json!({}));

        store
            .update_stats(RecordKind::Backup, &mut |s| bump_counter(s, "total", 1))
            .unwrap();
        let stats = store
            .update_stats(RecordKind::Backup, &mut |s| bump_counter(s, "total", 1))
            .unwrap();
        assert_eq!(stats["total"], 2);
        assert!(store.root().join("backup-stats.json").exists());
    }

    #[test]
    fn test_concurrent_stats_updates_are_not_lost() {
        let (store, _temp_dir) = create_store();
        let store = Arc::new(store);
        let mut threads = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            threads.push(std::thread::spawn(move || {
                for _ in 0..10 {
                    store
                        .update_stats(RecordKind::Notification, &mut |s| {
                            bump_counter(s, "total", 1)
                        })
                        .unwrap();
                }
            }));
        }
        for t in threads {
            t.join().unwrap();
        }
        let stats = store.read_stats(RecordKind::Notification).unwrap();
        assert_eq!(stats["total"], 80);
    }
}

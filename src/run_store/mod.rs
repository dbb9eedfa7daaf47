mod history;
mod json_day_store;
mod models;

pub use history::BoundedHistory;
pub use json_day_store::JsonDayStore;
pub use models::*;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Append-only, day-partitioned record store plus per-kind cumulative stats.
pub trait RunRecordStore: Send + Sync {
    /// Append a record to today's partition of `kind`.
    fn append(&self, kind: RecordKind, record: &Value) -> Result<()>;

    /// All records of `kind` written on `date`, in insertion order.
    fn list_day(&self, kind: RecordKind, date: NaiveDate) -> Result<Vec<Value>>;

    /// Most recent records of `kind`, newest first, scanning back through day files.
    fn recent(&self, kind: RecordKind, limit: usize) -> Result<Vec<Value>>;

    /// Atomically read-modify-write the stats object of `kind`. Returns the new stats.
    fn update_stats(&self, kind: RecordKind, update: &mut dyn FnMut(&mut Value)) -> Result<Value>;

    /// Current stats object of `kind` (empty object when never written).
    fn read_stats(&self, kind: RecordKind) -> Result<Value>;
}

/// Serialize and append a typed record.
pub fn append_typed<T: Serialize>(
    store: &dyn RunRecordStore,
    kind: RecordKind,
    record: &T,
) -> Result<()> {
    let value = serde_json::to_value(record)
        .with_context(|| format!("Failed to serialize {} record", kind))?;
    store.append(kind, &value)
}

/// Recent records of `kind` deserialized into `T`. Rows that fail to parse are skipped.
pub fn recent_typed<T: DeserializeOwned>(
    store: &dyn RunRecordStore,
    kind: RecordKind,
    limit: usize,
) -> Result<Vec<T>> {
    Ok(store
        .recent(kind, limit)?
        .into_iter()
        .filter_map(|v| serde_json::from_value(v).ok())
        .collect())
}

/// Increment an integer counter field inside a stats object.
pub fn bump_counter(stats: &mut Value, key: &str, by: i64) {
    if !stats.is_object() {
        *stats = Value::Object(Default::default());
    }
    if let Some(map) = stats.as_object_mut() {
        let current = map.get(key).and_then(|v| v.as_i64()).unwrap_or(0);
        map.insert(key.to_string(), Value::from(current + by));
    }
}

/// Set a field inside a stats object.
pub fn set_field(stats: &mut Value, key: &str, value: Value) {
    if !stats.is_object() {
        *stats = Value::Object(Default::default());
    }
    if let Some(map) = stats.as_object_mut() {
        map.insert(key.to_string(), value);
    }
}

use super::models::{
    Activity, ActivityKind, ContentItem, NewUser, Session, StoredNotification, User, UserStats,
};
use super::schema::{table, BASE_DB_VERSION, DATASTORE_SCHEMAS};
use super::{
    ActivityRepository, CollectionStore, ContentRepository, NotificationRepository,
    SessionRepository, UserRepository, COLLECTIONS,
};
use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::info;

/// SQLite-backed implementation of every datastore repository.
#[derive(Clone)]
pub struct SqliteDatastore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDatastore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let path = db_path.as_ref();
        let is_new_db = !path.exists();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let mut conn = Connection::open(path).context("Failed to open datastore database")?;
        let latest = DATASTORE_SCHEMAS
            .last()
            .ok_or_else(|| anyhow!("No datastore schema defined"))?;

        if is_new_db {
            info!("Creating new datastore at {:?}", path);
            latest.create(&conn)?;
        } else {
            let raw_version: i64 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
            let db_version = raw_version - BASE_DB_VERSION as i64;
            if db_version < 1 {
                bail!(
                    "Datastore version {} is invalid (expected >= 1)",
                    db_version
                );
            }
            let schema = DATASTORE_SCHEMAS
                .iter()
                .find(|s| s.version == db_version as usize)
                .with_context(|| format!("Unknown datastore version {}", db_version))?;
            schema
                .validate(&conn)
                .with_context(|| format!("Datastore schema validation failed for version {}", db_version))?;
            if (db_version as usize) < latest.version {
                Self::migrate(&mut conn, db_version as usize)?;
            }
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory datastore at the latest schema.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        DATASTORE_SCHEMAS
            .last()
            .ok_or_else(|| anyhow!("No datastore schema defined"))?
            .create(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn migrate(conn: &mut Connection, from_version: usize) -> Result<()> {
        let tx = conn.transaction()?;
        let mut current = from_version;
        for schema in DATASTORE_SCHEMAS.iter().filter(|s| s.version > from_version) {
            info!(
                "Running datastore migration from version {} to {}",
                current, schema.version
            );
            if let Some(migration) = schema.migration {
                migration(&tx)
                    .with_context(|| format!("Failed to migrate datastore to version {}", schema.version))?;
            }
            current = schema.version;
        }
        tx.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + current),
            [],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("datastore connection lock poisoned"))
    }

    fn format_datetime(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    fn parse_datetime(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }

    fn parse_opt_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
        s.and_then(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
        })
    }

    fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
        let created_at: String = row.get("created_at")?;
        Ok(User {
            id: row.get("id")?,
            email: row.get("email")?,
            name: row.get("name")?,
            created_at: Self::parse_datetime(&created_at),
            last_active_at: Self::parse_opt_datetime(row.get("last_active_at")?),
            last_reminded_at: Self::parse_opt_datetime(row.get("last_reminded_at")?),
        })
    }

    fn row_to_activity(row: &rusqlite::Row) -> rusqlite::Result<Activity> {
        let kind: String = row.get("kind")?;
        let created_at: String = row.get("created_at")?;
        Ok(Activity {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            kind: ActivityKind::parse(&kind).unwrap_or(ActivityKind::Login),
            detail: row.get("detail")?,
            created_at: Self::parse_datetime(&created_at),
        })
    }

    fn known_table(collection: &str) -> Result<&'static super::schema::Table> {
        if !COLLECTIONS.contains(&collection) {
            bail!("Unknown collection '{}'", collection);
        }
        table(collection).with_context(|| format!("No table for collection '{}'", collection))
    }

    fn json_to_sql(value: Option<&Value>) -> SqlValue {
        match value {
            None | Some(Value::Null) => SqlValue::Null,
            Some(Value::Bool(b)) => SqlValue::Integer(*b as i64),
            Some(Value::Number(n)) => match n.as_i64() {
                Some(i) => SqlValue::Integer(i),
                None => SqlValue::Real(n.as_f64().unwrap_or_default()),
            },
            Some(Value::String(s)) => SqlValue::Text(s.clone()),
            Some(other) => SqlValue::Text(other.to_string()),
        }
    }

    fn sql_to_json(value: SqlValue) -> Value {
        match value {
            SqlValue::Null => Value::Null,
            SqlValue::Integer(i) => Value::from(i),
            SqlValue::Real(f) => Value::from(f),
            SqlValue::Text(s) => Value::from(s),
            SqlValue::Blob(b) => Value::from(b),
        }
    }
}

impl UserRepository for SqliteDatastore {
    fn create_user(&self, new_user: &NewUser) -> Result<User> {
        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            email: new_user.email.clone(),
            name: new_user.name.clone(),
            created_at: Utc::now(),
            last_active_at: None,
            last_reminded_at: None,
        };
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO users (id, email, name, created_at, last_active_at, last_reminded_at)
             VALUES (?1, ?2, ?3, ?4, NULL, NULL)",
            params![
                user.id,
                user.email,
                user.name,
                Self::format_datetime(&user.created_at)
            ],
        )?;
        Ok(user)
    }

    fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        let conn = self.lock()?;
        let user = conn
            .query_row(
                "SELECT * FROM users WHERE id = ?1",
                params![user_id],
                Self::row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    fn list_users(&self) -> Result<Vec<User>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT * FROM users ORDER BY created_at")?;
        let users = stmt
            .query_map([], Self::row_to_user)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    }

    fn touch_user(&self, user_id: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE users SET last_active_at = ?1 WHERE id = ?2",
            params![Self::format_datetime(&at), user_id],
        )?;
        Ok(())
    }

    fn users_needing_reminder(&self, cutoff: DateTime<Utc>) -> Result<Vec<User>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM users
             WHERE COALESCE(last_active_at, created_at) < ?1
               AND (last_reminded_at IS NULL
                    OR last_reminded_at < COALESCE(last_active_at, created_at))",
        )?;
        let users = stmt
            .query_map(params![Self::format_datetime(&cutoff)], Self::row_to_user)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    }

    fn mark_reminded(&self, user_id: &str, at: DateTime<Utc>) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE users SET last_reminded_at = ?1 WHERE id = ?2",
            params![Self::format_datetime(&at), user_id],
        )?;
        Ok(())
    }

    fn user_stats(&self, now: DateTime<Utc>) -> Result<UserStats> {
        let week_ago = Self::format_datetime(&(now - Duration::days(7)));
        let conn = self.lock()?;
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?;
        let active: i64 = conn.query_row(
            "SELECT COUNT(*) FROM users WHERE last_active_at >= ?1",
            params![week_ago],
            |r| r.get(0),
        )?;
        let new: i64 = conn.query_row(
            "SELECT COUNT(*) FROM users WHERE created_at >= ?1",
            params![week_ago],
            |r| r.get(0),
        )?;
        Ok(UserStats {
            total: total as usize,
            active_last_7_days: active as usize,
            new_last_7_days: new as usize,
        })
    }
}

impl SessionRepository for SqliteDatastore {
    fn create_session(&self, user_id: &str, expires_at: DateTime<Utc>) -> Result<Session> {
        let session = Session {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            created_at: Utc::now(),
            expires_at,
        };
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sessions (id, user_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                session.id,
                session.user_id,
                Self::format_datetime(&session.created_at),
                Self::format_datetime(&session.expires_at)
            ],
        )?;
        Ok(session)
    }

    fn count_sessions(&self) -> Result<usize> {
        self.count("sessions")
    }
}

impl NotificationRepository for SqliteDatastore {
    fn store_notification(&self, n: &StoredNotification) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO notifications (id, user_id, kind, title, body, created_at, read)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                n.id,
                n.user_id,
                n.kind,
                n.title,
                n.body,
                Self::format_datetime(&n.created_at),
                n.read as i64
            ],
        )?;
        Ok(())
    }

    fn notifications_for_user(&self, user_id: &str, limit: usize) -> Result<Vec<StoredNotification>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, kind, title, body, created_at, read FROM notifications
             WHERE user_id = ?1 ORDER BY created_at DESC LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![user_id, limit as i64], |row| {
                let created_at: String = row.get(5)?;
                Ok(StoredNotification {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    kind: row.get(2)?,
                    title: row.get(3)?,
                    body: row.get(4)?,
                    created_at: Self::parse_datetime(&created_at),
                    read: row.get::<_, i64>(6)? != 0,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

impl ActivityRepository for SqliteDatastore {
    fn record_activity(
        &self,
        user_id: &str,
        kind: ActivityKind,
        detail: Option<&str>,
    ) -> Result<Activity> {
        let now = Utc::now();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO activities (user_id, kind, detail, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![user_id, kind.as_str(), detail, Self::format_datetime(&now)],
        )?;
        Ok(Activity {
            id: conn.last_insert_rowid(),
            user_id: user_id.to_string(),
            kind,
            detail: detail.map(|s| s.to_string()),
            created_at: now,
        })
    }

    fn count_activities(&self, user_id: &str, kind: ActivityKind) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM activities WHERE user_id = ?1 AND kind = ?2",
            params![user_id, kind.as_str()],
            |r| r.get(0),
        )?;
        Ok(count as usize)
    }

    fn activities_since(&self, user_id: &str, since: DateTime<Utc>) -> Result<Vec<Activity>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM activities WHERE user_id = ?1 AND created_at >= ?2 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(
                params![user_id, Self::format_datetime(&since)],
                Self::row_to_activity,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn unlock_milestone(&self, user_id: &str, milestone: &str, at: DateTime<Utc>) -> Result<bool> {
        let conn = self.lock()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO milestones (id, user_id, milestone, unlocked_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                format!("{}:{}", user_id, milestone),
                user_id,
                milestone,
                Self::format_datetime(&at)
            ],
        )?;
        Ok(inserted == 1)
    }
}

impl ContentRepository for SqliteDatastore {
    fn upsert_content(&self, item: &ContentItem) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO content (id, title, category, path, sha, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title, category = excluded.category,
                path = excluded.path, sha = excluded.sha, updated_at = excluded.updated_at",
            params![
                item.id,
                item.title,
                item.category,
                item.path,
                item.sha,
                Self::format_datetime(&item.updated_at)
            ],
        )?;
        Ok(())
    }

    fn list_content(&self) -> Result<Vec<ContentItem>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, title, category, path, sha, updated_at FROM content ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let updated_at: String = row.get(5)?;
                Ok(ContentItem {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    category: row.get(2)?,
                    path: row.get(3)?,
                    sha: row.get(4)?,
                    updated_at: Self::parse_datetime(&updated_at),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}

impl CollectionStore for SqliteDatastore {
    fn ping(&self) -> Result<()> {
        let conn = self.lock()?;
        let _: i64 = conn.query_row("SELECT 1", [], |r| r.get(0))?;
        Ok(())
    }

    fn collections(&self) -> Vec<&'static str> {
        COLLECTIONS.to_vec()
    }

    fn count(&self, collection: &str) -> Result<usize> {
        let table = Self::known_table(collection)?;
        let conn = self.lock()?;
        let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table.name), [], |r| {
            r.get(0)
        })?;
        Ok(count as usize)
    }

    fn export_collection(&self, collection: &str) -> Result<Vec<Value>> {
        let table = Self::known_table(collection)?;
        let columns = table.column_names();
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM {}",
            columns.join(", "),
            table.name
        ))?;
        let rows = stmt
            .query_map([], |row| {
                let mut map = Map::new();
                for (i, name) in columns.iter().enumerate() {
                    let value: SqlValue = row.get(i)?;
                    map.insert(name.to_string(), Self::sql_to_json(value));
                }
                Ok(Value::Object(map))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn import_collection(
        &self,
        collection: &str,
        records: &[Value],
        drop_existing: bool,
    ) -> Result<usize> {
        let table = Self::known_table(collection)?;
        let columns = table.column_names();
        let placeholders = (1..=columns.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
            table.name,
            columns.join(", "),
            placeholders
        );

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        if drop_existing {
            tx.execute(&format!("DELETE FROM {}", table.name), [])?;
        }
        let mut written = 0;
        {
            let mut stmt = tx.prepare(&sql)?;
            for record in records {
                let obj = record
                    .as_object()
                    .with_context(|| format!("Record in '{}' is not an object", collection))?;
                let values = columns.iter().map(|c| Self::json_to_sql(obj.get(*c)));
                stmt.execute(params_from_iter(values))?;
                written += 1;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    fn purge_older_than(
        &self,
        collection: &str,
        cutoff: DateTime<Utc>,
        dry_run: bool,
    ) -> Result<usize> {
        let table = Self::known_table(collection)?;
        let cutoff = Self::format_datetime(&cutoff);
        let conn = self.lock()?;
        let affected = if dry_run {
            let count: i64 = conn.query_row(
                &format!(
                    "SELECT COUNT(*) FROM {} WHERE {} < ?1",
                    table.name, table.timestamp_column
                ),
                params![cutoff],
                |r| r.get(0),
            )?;
            count as usize
        } else {
            conn.execute(
                &format!(
                    "DELETE FROM {} WHERE {} < ?1",
                    table.name, table.timestamp_column
                ),
                params![cutoff],
            )?
        };
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn new_user(store: &SqliteDatastore, name: &str) -> User {
        store
            .create_user(&NewUser {
                email: format!("{}@example.com", name),
                name: name.to_string(),
            })
            .unwrap()
    }

    #[test]
    fn test_reopen_existing_database() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("app.db");
        {
            let store = SqliteDatastore::new(&path).unwrap();
            new_user(&store, "ada");
        }
        let store = SqliteDatastore::new(&path).unwrap();
        assert_eq!(store.list_users().unwrap().len(), 1);
    }

    #[test]
    fn test_migrates_v1_database() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("app.db");
        {
            let conn = Connection::open(&path).unwrap();
            DATASTORE_SCHEMAS[0].create(&conn).unwrap();
        }
        let store = SqliteDatastore::new(&path).unwrap();
        assert_eq!(store.count("content").unwrap(), 0);
        assert_eq!(store.count("milestones").unwrap(), 0);
    }

    #[test]
    fn test_export_import_roundtrip_counts() {
        let source = SqliteDatastore::in_memory().unwrap();
        let user = new_user(&source, "ada");
        new_user(&source, "bo");
        source
            .record_activity(&user.id, ActivityKind::LessonCompleted, Some("lesson-1"))
            .unwrap();

        let target = SqliteDatastore::in_memory().unwrap();
        for collection in COLLECTIONS {
            let records = source.export_collection(collection).unwrap();
            target.import_collection(collection, &records, true).unwrap();
            assert_eq!(
                source.count(collection).unwrap(),
                target.count(collection).unwrap()
            );
        }
        let restored = target.get_user(&user.id).unwrap().unwrap();
        assert_eq!(restored.email, "ada@example.com");
    }

    #[test]
    fn test_import_without_drop_keeps_existing() {
        let store = SqliteDatastore::in_memory().unwrap();
        new_user(&store, "ada");
        let other = SqliteDatastore::in_memory().unwrap();
        new_user(&other, "bo");
        let records = other.export_collection("users").unwrap();
        store.import_collection("users", &records, false).unwrap();
        assert_eq!(store.count("users").unwrap(), 2);
    }

    #[test]
    fn test_unknown_collection_is_rejected() {
        let store = SqliteDatastore::in_memory().unwrap();
        assert!(store.export_collection("sqlite_master").is_err());
        assert!(store.count("nope").is_err());
    }

    #[test]
    fn test_purge_dry_run_matches_delete() {
        let store = SqliteDatastore::in_memory().unwrap();
        let user = new_user(&store, "ada");
        store
            .create_session(&user.id, Utc::now() + Duration::days(1))
            .unwrap();
        let future_cutoff = Utc::now() + Duration::minutes(1);

        let would = store.purge_older_than("sessions", future_cutoff, true).unwrap();
        assert_eq!(store.count_sessions().unwrap(), 1);
        let deleted = store.purge_older_than("sessions", future_cutoff, false).unwrap();
        assert_eq!(would, 1);
        assert_eq!(deleted, 1);
        assert_eq!(store.count_sessions().unwrap(), 0);
    }

    #[test]
    fn test_users_needing_reminder_once_per_period() {
        let store = SqliteDatastore::in_memory().unwrap();
        let user = new_user(&store, "ada");
        let long_ago = Utc::now() - Duration::days(30);
        store.touch_user(&user.id, long_ago).unwrap();

        let cutoff = Utc::now() - Duration::days(7);
        assert_eq!(store.users_needing_reminder(cutoff).unwrap().len(), 1);

        store.mark_reminded(&user.id, Utc::now()).unwrap();
        assert!(store.users_needing_reminder(cutoff).unwrap().is_empty());

        store
            .touch_user(&user.id, Utc::now() - Duration::days(10))
            .unwrap();
        store
            .mark_reminded(&user.id, Utc::now() - Duration::days(20))
            .unwrap();
        assert_eq!(store.users_needing_reminder(cutoff).unwrap().len(), 1);
    }

    #[test]
    fn test_activity_counts() {
        let store = SqliteDatastore::in_memory().unwrap();
        let user = new_user(&store, "ada");
        for _ in 0..3 {
            store
                .record_activity(&user.id, ActivityKind::LessonCompleted, None)
                .unwrap();
        }
        assert_eq!(
            store
                .count_activities(&user.id, ActivityKind::LessonCompleted)
                .unwrap(),
            3
        );
        let since = Utc::now() - Duration::minutes(5);
        assert_eq!(store.activities_since(&user.id, since).unwrap().len(), 3);
    }

    #[test]
    fn test_unlock_milestone_survives_activity_purge() {
        let store = SqliteDatastore::in_memory().unwrap();
        let user = new_user(&store, "ada");
        assert!(store.unlock_milestone(&user.id, "5 lessons", Utc::now()).unwrap());
        store
            .purge_older_than("activities", Utc::now() + Duration::seconds(1), false)
            .unwrap();
        assert!(!store.unlock_milestone(&user.id, "5 lessons", Utc::now()).unwrap());
        assert!(store.unlock_milestone(&user.id, "10 lessons", Utc::now()).unwrap());
        assert_eq!(store.count("milestones").unwrap(), 2);
    }

    #[test]
    fn test_content_upsert() {
        let store = SqliteDatastore::in_memory().unwrap();
        let mut item = ContentItem {
            id: "intro".to_string(),
            title: "Intro".to_string(),
            category: "basics".to_string(),
            path: "basics/intro.md".to_string(),
            sha: "a1".to_string(),
            updated_at: Utc::now(),
        };
        store.upsert_content(&item).unwrap();
        item.sha = "b2".to_string();
        store.upsert_content(&item).unwrap();
        let all = store.list_content().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].sha, "b2");
    }
}

//! Application datastore: typed repositories plus a collection-level
//! interface used by backup, cleanup and health checks.

mod models;
mod schema;
mod sqlite_datastore;

pub use models::*;
pub use schema::{BASE_DB_VERSION, DATASTORE_SCHEMAS};
pub use sqlite_datastore::SqliteDatastore;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Collections exposed for export/import, in dependency order.
pub const COLLECTIONS: &[&str] = &[
    "users",
    "sessions",
    "notifications",
    "activities",
    "content",
    "milestones",
];

pub trait UserRepository: Send + Sync {
    fn create_user(&self, new_user: &NewUser) -> Result<User>;
    fn get_user(&self, user_id: &str) -> Result<Option<User>>;
    fn list_users(&self) -> Result<Vec<User>>;
    fn touch_user(&self, user_id: &str, at: DateTime<Utc>) -> Result<()>;
    /// Users whose last activity is older than `cutoff` and who have not been
    /// reminded since they went inactive.
    fn users_needing_reminder(&self, cutoff: DateTime<Utc>) -> Result<Vec<User>>;
    fn mark_reminded(&self, user_id: &str, at: DateTime<Utc>) -> Result<()>;
    fn user_stats(&self, now: DateTime<Utc>) -> Result<UserStats>;
}

pub trait SessionRepository: Send + Sync {
    fn create_session(&self, user_id: &str, expires_at: DateTime<Utc>) -> Result<Session>;
    fn count_sessions(&self) -> Result<usize>;
}

pub trait NotificationRepository: Send + Sync {
    fn store_notification(&self, notification: &StoredNotification) -> Result<()>;
    fn notifications_for_user(&self, user_id: &str, limit: usize) -> Result<Vec<StoredNotification>>;
}

pub trait ActivityRepository: Send + Sync {
    fn record_activity(
        &self,
        user_id: &str,
        kind: ActivityKind,
        detail: Option<&str>,
    ) -> Result<Activity>;
    fn count_activities(&self, user_id: &str, kind: ActivityKind) -> Result<usize>;
    fn activities_since(&self, user_id: &str, since: DateTime<Utc>) -> Result<Vec<Activity>>;
    /// Mark `milestone` unlocked for `user_id`. Returns false when it already
    /// was. The marker outlives activity retention.
    fn unlock_milestone(&self, user_id: &str, milestone: &str, at: DateTime<Utc>) -> Result<bool>;
}

pub trait ContentRepository: Send + Sync {
    fn upsert_content(&self, item: &ContentItem) -> Result<()>;
    fn list_content(&self) -> Result<Vec<ContentItem>>;
}

/// Untyped, collection-level access for whole-store operations.
pub trait CollectionStore: Send + Sync {
    fn ping(&self) -> Result<()>;
    fn collections(&self) -> Vec<&'static str>;
    fn count(&self, collection: &str) -> Result<usize>;
    fn export_collection(&self, collection: &str) -> Result<Vec<Value>>;
    /// Insert or replace `records`. With `drop_existing` the collection is
    /// emptied first. Returns the number of records written.
    fn import_collection(&self, collection: &str, records: &[Value], drop_existing: bool)
        -> Result<usize>;
    /// Delete (or with `dry_run` only count) records older than `cutoff`.
    fn purge_older_than(&self, collection: &str, cutoff: DateTime<Utc>, dry_run: bool)
        -> Result<usize>;
}

pub trait Datastore:
    UserRepository
    + SessionRepository
    + NotificationRepository
    + ActivityRepository
    + ContentRepository
    + CollectionStore
{
}

impl<
        T: UserRepository
            + SessionRepository
            + NotificationRepository
            + ActivityRepository
            + ContentRepository
            + CollectionStore,
    > Datastore for T
{
}

//! Versioned SQLite schema for the application datastore.
//!
//! `PRAGMA user_version` holds `BASE_DB_VERSION + schema version`. Fresh
//! databases are created at the latest version; older ones are validated and
//! migrated forward one step at a time.

use anyhow::{bail, Result};
use rusqlite::{params, Connection};

pub const BASE_DB_VERSION: usize = 7000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Text,
    Integer,
}

impl SqlType {
    fn as_sql(&self) -> &'static str {
        match self {
            SqlType::Text => "TEXT",
            SqlType::Integer => "INTEGER",
        }
    }
}

pub struct Column {
    pub name: &'static str,
    pub sql_type: SqlType,
    pub primary_key: bool,
    pub non_null: bool,
}

const fn col(name: &'static str, sql_type: SqlType, non_null: bool) -> Column {
    Column {
        name,
        sql_type,
        primary_key: false,
        non_null,
    }
}

const fn pk(name: &'static str, sql_type: SqlType) -> Column {
    Column {
        name,
        sql_type,
        primary_key: true,
        non_null: false,
    }
}

pub struct Table {
    pub name: &'static str,
    pub columns: &'static [Column],
    pub indices: &'static [(&'static str, &'static str)],
    /// Column holding the row's age, used by retention purges.
    pub timestamp_column: &'static str,
}

impl Table {
    pub fn create(&self, conn: &Connection) -> Result<()> {
        let columns = self
            .columns
            .iter()
            .map(|c| {
                let mut def = format!("{} {}", c.name, c.sql_type.as_sql());
                if c.primary_key {
                    def.push_str(" PRIMARY KEY");
                }
                if c.non_null {
                    def.push_str(" NOT NULL");
                }
                def
            })
            .collect::<Vec<_>>()
            .join(", ");
        conn.execute(&format!("CREATE TABLE {} ({});", self.name, columns), params![])?;
        for (index_name, index_columns) in self.indices {
            conn.execute(
                &format!("CREATE INDEX {} ON {}({});", index_name, self.name, index_columns),
                params![],
            )?;
        }
        Ok(())
    }

    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.name).collect()
    }

    fn validate(&self, conn: &Connection) -> Result<()> {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({});", self.name))?;
        let actual: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<rusqlite::Result<_>>()?;
        let expected = self.column_names();
        if actual != expected {
            bail!(
                "Table {} columns mismatch: expected [{}], found [{}]",
                self.name,
                expected.join(", "),
                actual.join(", ")
            );
        }
        Ok(())
    }
}

pub struct VersionedSchema {
    pub version: usize,
    pub tables: &'static [Table],
    pub migration: Option<fn(&Connection) -> Result<()>>,
}

impl VersionedSchema {
    pub fn create(&self, conn: &Connection) -> Result<()> {
        for table in self.tables {
            table.create(conn)?;
        }
        conn.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + self.version),
            [],
        )?;
        Ok(())
    }

    pub fn validate(&self, conn: &Connection) -> Result<()> {
        for table in self.tables {
            table.validate(conn)?;
        }
        Ok(())
    }
}

// =============================================================================
// Version 1 - users, sessions, notifications, activities
// =============================================================================

const USERS_TABLE: Table = Table {
    name: "users",
    columns: &[
        pk("id", SqlType::Text),
        col("email", SqlType::Text, true),
        col("name", SqlType::Text, true),
        col("created_at", SqlType::Text, true),
        col("last_active_at", SqlType::Text, false),
        col("last_reminded_at", SqlType::Text, false),
    ],
    indices: &[("idx_users_last_active", "last_active_at")],
    timestamp_column: "created_at",
};

const SESSIONS_TABLE: Table = Table {
    name: "sessions",
    columns: &[
        pk("id", SqlType::Text),
        col("user_id", SqlType::Text, true),
        col("created_at", SqlType::Text, true),
        col("expires_at", SqlType::Text, true),
    ],
    indices: &[("idx_sessions_created", "created_at")],
    timestamp_column: "created_at",
};

const NOTIFICATIONS_TABLE: Table = Table {
    name: "notifications",
    columns: &[
        pk("id", SqlType::Text),
        col("user_id", SqlType::Text, true),
        col("kind", SqlType::Text, true),
        col("title", SqlType::Text, true),
        col("body", SqlType::Text, true),
        col("created_at", SqlType::Text, true),
        col("read", SqlType::Integer, true),
    ],
    indices: &[("idx_notifications_user", "user_id, created_at DESC")],
    timestamp_column: "created_at",
};

const ACTIVITIES_TABLE: Table = Table {
    name: "activities",
    columns: &[
        pk("id", SqlType::Integer),
        col("user_id", SqlType::Text, true),
        col("kind", SqlType::Text, true),
        col("detail", SqlType::Text, false),
        col("created_at", SqlType::Text, true),
    ],
    indices: &[("idx_activities_user_kind", "user_id, kind")],
    timestamp_column: "created_at",
};

// =============================================================================
// Version 2 - content mirror
// =============================================================================

const CONTENT_TABLE: Table = Table {
    name: "content",
    columns: &[
        pk("id", SqlType::Text),
        col("title", SqlType::Text, true),
        col("category", SqlType::Text, true),
        col("path", SqlType::Text, true),
        col("sha", SqlType::Text, true),
        col("updated_at", SqlType::Text, true),
    ],
    indices: &[],
    timestamp_column: "updated_at",
};

fn migrate_v1_to_v2(conn: &Connection) -> Result<()> {
    CONTENT_TABLE.create(conn)
}

// =============================================================================
// Version 3 - unlocked milestones, kept apart from purgeable activities
// =============================================================================

const MILESTONES_TABLE: Table = Table {
    name: "milestones",
    columns: &[
        pk("id", SqlType::Text),
        col("user_id", SqlType::Text, true),
        col("milestone", SqlType::Text, true),
        col("unlocked_at", SqlType::Text, true),
    ],
    indices: &[("idx_milestones_user", "user_id")],
    timestamp_column: "unlocked_at",
};

fn migrate_v2_to_v3(conn: &Connection) -> Result<()> {
    MILESTONES_TABLE.create(conn)?;
    // Backfill from activity rows that survived retention so far.
    conn.execute(
        "INSERT OR IGNORE INTO milestones (id, user_id, milestone, unlocked_at)
         SELECT user_id || ':' || detail, user_id, detail, MIN(created_at)
         FROM activities
         WHERE kind = 'milestone_unlocked' AND detail IS NOT NULL
         GROUP BY user_id, detail",
        params![],
    )?;
    Ok(())
}

pub const DATASTORE_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 1,
        tables: &[USERS_TABLE, SESSIONS_TABLE, NOTIFICATIONS_TABLE, ACTIVITIES_TABLE],
        migration: None,
    },
    VersionedSchema {
        version: 2,
        tables: &[
            USERS_TABLE,
            SESSIONS_TABLE,
            NOTIFICATIONS_TABLE,
            ACTIVITIES_TABLE,
            CONTENT_TABLE,
        ],
        migration: Some(migrate_v1_to_v2),
    },
    VersionedSchema {
        version: 3,
        tables: &[
            USERS_TABLE,
            SESSIONS_TABLE,
            NOTIFICATIONS_TABLE,
            ACTIVITIES_TABLE,
            CONTENT_TABLE,
            MILESTONES_TABLE,
        ],
        migration: Some(migrate_v2_to_v3),
    },
];

/// Latest schema table definition by name.
pub fn table(name: &str) -> Option<&'static Table> {
    DATASTORE_SCHEMAS
        .last()
        .and_then(|schema| schema.tables.iter().find(|t| t.name == name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_validate_latest() {
        let conn = Connection::open_in_memory().unwrap();
        let latest = DATASTORE_SCHEMAS.last().unwrap();
        latest.create(&conn).unwrap();
        latest.validate(&conn).unwrap();

        let version: i64 = conn
            .query_row("PRAGMA user_version;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version as usize, BASE_DB_VERSION + 3);
    }

    #[test]
    fn test_v1_fails_latest_validation() {
        let conn = Connection::open_in_memory().unwrap();
        DATASTORE_SCHEMAS[0].create(&conn).unwrap();
        assert!(DATASTORE_SCHEMAS[1].validate(&conn).is_err());
    }

    #[test]
    fn test_v2_migration_backfills_milestones() {
        let conn = Connection::open_in_memory().unwrap();
        DATASTORE_SCHEMAS[1].create(&conn).unwrap();
        for detail in ["1 lessons", "1 lessons", "5 lessons"] {
            conn.execute(
                "INSERT INTO activities (user_id, kind, detail, created_at)
                 VALUES ('u1', 'milestone_unlocked', ?1, '2024-01-01T00:00:00.000Z')",
                params![detail],
            )
            .unwrap();
        }
        migrate_v2_to_v3(&conn).unwrap();
        DATASTORE_SCHEMAS[2].validate(&conn).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM milestones", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_table_lookup() {
        assert_eq!(table("content").unwrap().timestamp_column, "updated_at");
        assert!(table("nope").is_none());
    }
}

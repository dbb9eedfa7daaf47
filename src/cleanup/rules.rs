use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const DAY: u64 = 24 * 3600;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CleanupTarget {
    Files {
        dirs: Vec<PathBuf>,
        /// Glob over file names, e.g. `*.log*` or `log[0-9].txt`.
        pattern: String,
        recursive: bool,
    },
    Datastore {
        collection: String,
    },
}

/// Items of `target` older than `retention` are removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupRule {
    pub name: String,
    pub target: CleanupTarget,
    #[serde(with = "retention_secs")]
    pub retention: Duration,
}

impl CleanupRule {
    pub fn files(name: &str, dirs: Vec<PathBuf>, pattern: &str, recursive: bool, retention: Duration) -> Self {
        Self {
            name: name.to_string(),
            target: CleanupTarget::Files {
                dirs,
                pattern: pattern.to_string(),
                recursive,
            },
            retention,
        }
    }

    pub fn datastore(name: &str, collection: &str, retention: Duration) -> Self {
        Self {
            name: name.to_string(),
            target: CleanupTarget::Datastore {
                collection: collection.to_string(),
            },
            retention,
        }
    }
}

pub fn days(n: u64) -> Duration {
    Duration::from_secs(n * DAY)
}

/// Retention table applied by the scheduled cleanup job.
pub fn default_rules(data_dir: &Path) -> Vec<CleanupRule> {
    vec![
        CleanupRule::files("logs", vec![data_dir.join("logs")], "*.log*", true, days(7)),
        CleanupRule::files("temp", vec![data_dir.join("tmp")], "*", true, days(1)),
        CleanupRule::files("backups", vec![data_dir.join("backups")], "backup-*.zip", false, days(30)),
        CleanupRule::files("reports", vec![data_dir.join("reports")], "report-*", false, days(90)),
        CleanupRule::files(
            "records",
            vec![data_dir.join("records")],
            "*-????-??-??.json",
            true,
            days(30),
        ),
        CleanupRule::files(
            "snapshots",
            vec![data_dir.join("content-snapshots")],
            "*",
            true,
            days(14),
        ),
        CleanupRule::datastore("sessions", "sessions", days(30)),
        CleanupRule::datastore("notifications", "notifications", days(90)),
        CleanupRule::datastore("activities", "activities", days(180)),
    ]
}

/// Compile a rule's file-name pattern.
pub fn file_pattern(pattern: &str) -> Result<glob::Pattern, glob::PatternError> {
    glob::Pattern::new(pattern)
}

mod retention_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_pattern() {
        let pattern = file_pattern("*.log").unwrap();
        assert!(pattern.matches("app.log"));
        assert!(!pattern.matches("app.log.1"));
        assert!(!pattern.matches("applog"));

        let pattern = file_pattern("job-????-??-??.json").unwrap();
        assert!(pattern.matches("job-2024-05-01.json"));
        assert!(!pattern.matches("job-stats.json"));

        let pattern = file_pattern("log[0-9].txt").unwrap();
        assert!(pattern.matches("log1.txt"));
        assert!(!pattern.matches("logx.txt"));

        let pattern = file_pattern("a+b(*).txt").unwrap();
        assert!(pattern.matches("a+b(1).txt"));

        assert!(file_pattern("log[").is_err());
    }

    #[test]
    fn test_default_rules() {
        let rules = default_rules(Path::new("/data"));
        let names: Vec<&str> = rules.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            [
                "logs",
                "temp",
                "backups",
                "reports",
                "records",
                "snapshots",
                "sessions",
                "notifications",
                "activities"
            ]
        );
        assert_eq!(rules[0].retention, days(7));
        assert_eq!(rules[5].retention, days(14));
        assert_eq!(rules[8].retention, days(180));
    }
}

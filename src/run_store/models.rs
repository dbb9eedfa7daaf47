use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Kind of record persisted in the run store. Each kind gets its own
/// day-partitioned files and its own stats file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Job,
    Backup,
    Deployment,
    Notification,
    Cleanup,
    Health,
    Report,
    Content,
    Engagement,
}

impl RecordKind {
    pub const ALL: [RecordKind; 9] = [
        RecordKind::Job,
        RecordKind::Backup,
        RecordKind::Deployment,
        RecordKind::Notification,
        RecordKind::Cleanup,
        RecordKind::Health,
        RecordKind::Report,
        RecordKind::Content,
        RecordKind::Engagement,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Job => "job",
            RecordKind::Backup => "backup",
            RecordKind::Deployment => "deployment",
            RecordKind::Notification => "notification",
            RecordKind::Cleanup => "cleanup",
            RecordKind::Health => "health",
            RecordKind::Report => "report",
            RecordKind::Content => "content",
            RecordKind::Engagement => "engagement",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        RecordKind::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of a run. Moves forward only: `Pending` to one terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Pending)
    }

    /// Validate a status change. Terminal states never change again.
    pub fn transition(self, next: RunStatus) -> Result<RunStatus, InvalidTransition> {
        match (self, next) {
            (RunStatus::Pending, RunStatus::Success) | (RunStatus::Pending, RunStatus::Failed) => {
                Ok(next)
            }
            _ => Err(InvalidTransition {
                from: self,
                to: next,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid run status transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: RunStatus,
    pub to: RunStatus,
}

/// Opaque run id: millisecond timestamp plus a random suffix.
pub fn new_record_id() -> String {
    let suffix: u32 = rand::rng().random();
    format!("{}-{:08x}", Utc::now().timestamp_millis(), suffix)
}

/// Persisted outcome of one job execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub job_name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub status: RunStatus,
    pub triggered_by: String,
    #[serde(default)]
    pub result: serde_json::Value,
    pub error_message: Option<String>,
}

impl RunRecord {
    pub fn start(job_name: &str, triggered_by: &str) -> Self {
        Self {
            id: new_record_id(),
            job_name: job_name.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            duration_ms: None,
            status: RunStatus::Pending,
            triggered_by: triggered_by.to_string(),
            result: serde_json::Value::Null,
            error_message: None,
        }
    }

    pub fn succeed(&mut self, result: serde_json::Value) -> Result<(), InvalidTransition> {
        self.status = self.status.transition(RunStatus::Success)?;
        self.result = result;
        self.stamp_finish();
        Ok(())
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), InvalidTransition> {
        self.status = self.status.transition(RunStatus::Failed)?;
        self.error_message = Some(error.into());
        self.stamp_finish();
        Ok(())
    }

    fn stamp_finish(&mut self) {
        let now = Utc::now();
        self.duration_ms = Some((now - self.started_at).num_milliseconds());
        self.finished_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_moves_forward_only() {
        assert_eq!(
            RunStatus::Pending.transition(RunStatus::Success),
            Ok(RunStatus::Success)
        );
        assert_eq!(
            RunStatus::Pending.transition(RunStatus::Failed),
            Ok(RunStatus::Failed)
        );
        assert!(RunStatus::Success.transition(RunStatus::Failed).is_err());
        assert!(RunStatus::Failed.transition(RunStatus::Pending).is_err());
        assert!(RunStatus::Success.transition(RunStatus::Success).is_err());
    }

    #[test]
    fn test_finalized_record_is_not_resurrected() {
        let mut record = RunRecord::start("backup", "manual");
        record.fail("disk full").unwrap();
        assert!(record.succeed(serde_json::json!({})).is_err());
        assert_eq!(record.status, RunStatus::Failed);
        assert_eq!(record.error_message.as_deref(), Some("disk full"));
        assert!(record.finished_at.is_some());
    }

    #[test]
    fn test_record_kind_roundtrip_names() {
        for kind in RecordKind::ALL {
            assert_eq!(RecordKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(RecordKind::parse("nope"), None);
    }

    #[test]
    fn test_record_ids_are_unique() {
        let a = new_record_id();
        let b = new_record_id();
        assert_ne!(a, b);
    }
}

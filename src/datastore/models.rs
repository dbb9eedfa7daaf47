use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub last_active_at: Option<DateTime<Utc>>,
    /// When the last inactivity reminder went out; at most one per inactivity period.
    pub last_reminded_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// A user-facing notification kept in the datastore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredNotification {
    pub id: String,
    pub user_id: String,
    pub kind: String,
    pub title: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub read: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Registration,
    LessonCompleted,
    Login,
    InactivityDetected,
    MilestoneUnlocked,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Registration => "registration",
            ActivityKind::LessonCompleted => "lesson_completed",
            ActivityKind::Login => "login",
            ActivityKind::InactivityDetected => "inactivity_detected",
            ActivityKind::MilestoneUnlocked => "milestone_unlocked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "registration" => Some(ActivityKind::Registration),
            "lesson_completed" => Some(ActivityKind::LessonCompleted),
            "login" => Some(ActivityKind::Login),
            "inactivity_detected" => Some(ActivityKind::InactivityDetected),
            "milestone_unlocked" => Some(ActivityKind::MilestoneUnlocked),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: i64,
    pub user_id: String,
    pub kind: ActivityKind,
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: String,
    pub title: String,
    pub category: String,
    pub path: String,
    pub sha: String,
    pub updated_at: DateTime<Utc>,
}

/// Aggregate user counts for reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserStats {
    pub total: usize,
    pub active_last_7_days: usize,
    pub new_last_7_days: usize,
}

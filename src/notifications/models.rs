use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Delivery channel for outbound notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Telegram,
    Discord,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Email, Channel::Telegram, Channel::Discord];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Telegram => "telegram",
            Channel::Discord => "discord",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Channel::ALL.into_iter().find(|c| c.as_str() == s)
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    Info,
    Success,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Critical,
}

/// Alert severity. `High` and `Critical` escalate to every configured channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn escalates(&self) -> bool {
        matches!(self, Severity::High | Severity::Critical)
    }

    pub fn notification_type(&self) -> NotificationType {
        match self {
            Severity::Low => NotificationType::Info,
            Severity::Medium => NotificationType::Warning,
            Severity::High => NotificationType::Error,
            Severity::Critical => NotificationType::Critical,
        }
    }

    pub fn priority(&self) -> Priority {
        match self {
            Severity::Low => Priority::Low,
            Severity::Medium => Priority::Normal,
            Severity::High => Priority::High,
            Severity::Critical => Priority::Critical,
        }
    }
}

/// A notification before dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    pub channels: Vec<Channel>,
    pub priority: Priority,
    pub recipient: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        notification_type: NotificationType,
        title: impl Into<String>,
        message: impl Into<String>,
        channels: Vec<Channel>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            notification_type,
            title: title.into(),
            message: message.into(),
            channels,
            priority: Priority::Normal,
            recipient: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_recipient(mut self, recipient: impl Into<String>) -> Self {
        self.recipient = Some(recipient.into());
        self
    }
}

/// Outcome of one channel attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChannelOutcome {
    Delivered,
    RateLimited { retry_after_ms: u64 },
    Failed { error: String },
}

impl ChannelOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, ChannelOutcome::Delivered)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ChannelOutcome::Delivered => "sent",
            ChannelOutcome::RateLimited { .. } => "rate_limited",
            ChannelOutcome::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Partial,
    Failed,
}

impl DeliveryStatus {
    /// `Sent` when every attempted channel delivered, `Failed` when none did.
    pub fn from_outcomes<'a>(outcomes: impl IntoIterator<Item = &'a ChannelOutcome>) -> Self {
        let mut total = 0usize;
        let mut delivered = 0usize;
        for outcome in outcomes {
            total += 1;
            if outcome.is_delivered() {
                delivered += 1;
            }
        }
        if total > 0 && delivered == total {
            DeliveryStatus::Sent
        } else if delivered > 0 {
            DeliveryStatus::Partial
        } else {
            DeliveryStatus::Failed
        }
    }
}

/// An immutable record of a dispatched notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchedNotification {
    #[serde(flatten)]
    pub notification: Notification,
    pub results: BTreeMap<Channel, ChannelOutcome>,
    pub status: DeliveryStatus,
    pub dispatched_at: DateTime<Utc>,
}

/// Parameters for [`super::NotificationService::send_alert`].
#[derive(Debug, Clone)]
pub struct AlertOptions {
    pub title: String,
    pub message: String,
    pub severity: Severity,
    pub details: Option<serde_json::Value>,
}

impl AlertOptions {
    pub fn new(severity: Severity, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            severity,
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overall_status() {
        let ok = ChannelOutcome::Delivered;
        let limited = ChannelOutcome::RateLimited { retry_after_ms: 10 };
        let failed = ChannelOutcome::Failed {
            error: "boom".into(),
        };

        assert_eq!(DeliveryStatus::from_outcomes([&ok, &ok]), DeliveryStatus::Sent);
        assert_eq!(DeliveryStatus::from_outcomes([&ok, &limited]), DeliveryStatus::Partial);
        assert_eq!(DeliveryStatus::from_outcomes([&failed, &limited]), DeliveryStatus::Failed);
        assert_eq!(DeliveryStatus::from_outcomes([]), DeliveryStatus::Failed);
    }

    #[test]
    fn test_severity_escalation() {
        assert!(!Severity::Low.escalates());
        assert!(!Severity::Medium.escalates());
        assert!(Severity::High.escalates());
        assert!(Severity::Critical.escalates());
    }
}

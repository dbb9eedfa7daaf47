//! User engagement: activity triggers, inactivity reminders and weekly summaries.

mod service;
mod triggers;

pub use service::{
    ActivityOutcome, FiredTrigger, InactivityReport, UserEngagementService, WeeklySummaryReport,
};
pub use triggers::{default_triggers, EngagementTrigger, TriggerCondition, LESSON_MILESTONES};

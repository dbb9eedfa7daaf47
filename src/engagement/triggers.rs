use crate::datastore::ActivityKind;
use crate::notifications::{Channel, NotificationType};
use serde::{Deserialize, Serialize};

/// Lesson counts that unlock a milestone.
pub const LESSON_MILESTONES: &[usize] = &[1, 5, 10, 25, 50, 100];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerCondition {
    Always,
    /// The user's count of this event, including the current one, equals `n`.
    CountEquals { n: usize },
}

impl TriggerCondition {
    pub fn is_satisfied(&self, count: usize) -> bool {
        match self {
            TriggerCondition::Always => true,
            TriggerCondition::CountEquals { n } => count == *n,
        }
    }
}

/// Maps an event plus condition to a template and channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementTrigger {
    pub name: String,
    pub event: ActivityKind,
    pub condition: TriggerCondition,
    pub template: String,
    pub notification_type: NotificationType,
    pub channels: Vec<Channel>,
    /// Set for milestone triggers; recorded as a `milestone_unlocked` activity.
    pub milestone: Option<String>,
}

impl EngagementTrigger {
    pub fn new(name: &str, event: ActivityKind, template: &str) -> Self {
        Self {
            name: name.to_string(),
            event,
            condition: TriggerCondition::Always,
            template: template.to_string(),
            notification_type: NotificationType::Info,
            channels: vec![Channel::Email],
            milestone: None,
        }
    }

    pub fn when(mut self, condition: TriggerCondition) -> Self {
        self.condition = condition;
        self
    }

    pub fn of_type(mut self, notification_type: NotificationType) -> Self {
        self.notification_type = notification_type;
        self
    }

    pub fn milestone(mut self, label: String) -> Self {
        self.milestone = Some(label);
        self
    }
}

pub fn default_triggers() -> Vec<EngagementTrigger> {
    let mut triggers = vec![
        EngagementTrigger::new("welcome", ActivityKind::Registration, "welcome")
            .of_type(NotificationType::Success),
        EngagementTrigger::new(
            "lesson_completed",
            ActivityKind::LessonCompleted,
            "lesson_completed",
        )
        .of_type(NotificationType::Success),
        EngagementTrigger::new(
            "inactivity_reminder",
            ActivityKind::InactivityDetected,
            "inactivity_reminder",
        ),
    ];
    for n in LESSON_MILESTONES {
        let label = if *n == 1 {
            "your first lesson".to_string()
        } else {
            format!("{} lessons", n)
        };
        triggers.push(
            EngagementTrigger::new(
                &format!("milestone_{}_lessons", n),
                ActivityKind::LessonCompleted,
                "milestone",
            )
            .when(TriggerCondition::CountEquals { n: *n })
            .of_type(NotificationType::Success)
            .milestone(label),
        );
    }
    triggers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_milestones_match_exact_counts() {
        let triggers = default_triggers();
        let fired_at = |count: usize| -> Vec<String> {
            triggers
                .iter()
                .filter(|t| t.event == ActivityKind::LessonCompleted)
                .filter(|t| t.condition.is_satisfied(count))
                .map(|t| t.name.clone())
                .collect()
        };
        assert_eq!(fired_at(5), vec!["lesson_completed", "milestone_5_lessons"]);
        assert_eq!(fired_at(6), vec!["lesson_completed"]);
        assert_eq!(fired_at(1), vec!["lesson_completed", "milestone_1_lessons"]);
    }
}

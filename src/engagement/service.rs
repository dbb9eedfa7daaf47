use super::triggers::{default_triggers, EngagementTrigger};
use crate::datastore::{
    Activity, ActivityKind, ActivityRepository, Datastore, NotificationRepository,
    StoredNotification, User, UserRepository,
};
use crate::error::{AutomationError, AutomationResult};
use crate::notifications::{DeliveryStatus, NotificationService};
use crate::run_store::{bump_counter, set_field, RecordKind, RunRecordStore};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiredTrigger {
    pub trigger: String,
    pub status: Option<DeliveryStatus>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityOutcome {
    pub activity: Activity,
    pub count: usize,
    pub fired: Vec<FiredTrigger>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InactivityReport {
    pub days: i64,
    pub checked_at: Option<DateTime<Utc>>,
    pub reminded: Vec<String>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WeeklySummaryReport {
    pub users: usize,
    pub sent: usize,
    pub skipped_inactive: usize,
    pub errors: Vec<String>,
}

/// Event-driven user messaging.
pub struct UserEngagementService {
    datastore: Arc<dyn Datastore>,
    notifier: Arc<NotificationService>,
    store: Arc<dyn RunRecordStore>,
    triggers: Vec<EngagementTrigger>,
}

impl UserEngagementService {
    pub fn new(
        datastore: Arc<dyn Datastore>,
        notifier: Arc<NotificationService>,
        store: Arc<dyn RunRecordStore>,
    ) -> Self {
        Self {
            datastore,
            notifier,
            store,
            triggers: default_triggers(),
        }
    }

    pub fn with_triggers(mut self, triggers: Vec<EngagementTrigger>) -> Self {
        self.triggers = triggers;
        self
    }

    pub fn triggers(&self) -> &[EngagementTrigger] {
        &self.triggers
    }

    async fn with_datastore<T, F>(&self, f: F) -> AutomationResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Datastore) -> AutomationResult<T> + Send + 'static,
    {
        let datastore = self.datastore.clone();
        tokio::task::spawn_blocking(move || f(datastore.as_ref()))
            .await
            .map_err(|e| AutomationError::external("datastore task aborted", e))?
    }

    /// Record `kind` for `user_id` and fire every trigger it satisfies.
    ///
    /// A milestone trigger fires only the first time its milestone is
    /// unlocked, even if purged activities bring the count back to it.
    pub async fn track_activity(
        &self,
        user_id: &str,
        kind: ActivityKind,
        detail: Option<&str>,
    ) -> AutomationResult<ActivityOutcome> {
        let candidates: Vec<EngagementTrigger> = self
            .triggers
            .iter()
            .filter(|t| t.event == kind)
            .cloned()
            .collect();
        let owned_user_id = user_id.to_string();
        let owned_detail = detail.map(str::to_string);
        let (user, activity, count, matching) = self
            .with_datastore(move |ds| {
                let user_id = owned_user_id.as_str();
                let user = ds.get_user(user_id)?.ok_or_else(|| {
                    AutomationError::Validation(format!("unknown user '{}'", user_id))
                })?;
                let activity = ds.record_activity(user_id, kind, owned_detail.as_deref())?;
                if kind != ActivityKind::InactivityDetected {
                    ds.touch_user(user_id, activity.created_at)?;
                }
                let count = ds.count_activities(user_id, kind)?;

                let mut matching = Vec::new();
                for trigger in candidates {
                    if !trigger.condition.is_satisfied(count) {
                        continue;
                    }
                    if let Some(milestone) = &trigger.milestone {
                        if !ds.unlock_milestone(user_id, milestone, activity.created_at)? {
                            debug!("Milestone {} already unlocked for {}", milestone, user_id);
                            continue;
                        }
                        ds.record_activity(
                            user_id,
                            ActivityKind::MilestoneUnlocked,
                            Some(milestone),
                        )?;
                    }
                    matching.push(trigger);
                }
                Ok((user, activity, count, matching))
            })
            .await?;

        let mut fired = Vec::new();
        for trigger in &matching {
            let mut values = base_values(&user);
            values.insert("count".to_string(), count.to_string());
            if let Some(d) = detail {
                values.insert("lesson".to_string(), d.to_string());
                values.insert("days".to_string(), d.to_string());
            }
            if let Some(milestone) = &trigger.milestone {
                values.insert("milestone".to_string(), milestone.clone());
            }
            fired.push(self.fire(trigger, &user, &values).await);
        }

        let outcome = ActivityOutcome {
            activity,
            count,
            fired,
        };
        debug!(
            "Activity {} for {} fired {} triggers",
            kind.as_str(),
            user_id,
            outcome.fired.len()
        );
        self.persist("activity", &outcome);
        Ok(outcome)
    }

    async fn fire(
        &self,
        trigger: &EngagementTrigger,
        user: &User,
        values: &HashMap<String, String>,
    ) -> FiredTrigger {
        let sent = self
            .notifier
            .send_template(
                &trigger.template,
                values,
                trigger.notification_type,
                trigger.channels.clone(),
                Some(user.email.clone()),
            )
            .await;
        match sent {
            Ok(dispatched) => {
                let stored = StoredNotification {
                    id: dispatched.notification.id.clone(),
                    user_id: user.id.clone(),
                    kind: trigger.name.clone(),
                    title: dispatched.notification.title.clone(),
                    body: dispatched.notification.message.clone(),
                    created_at: dispatched.dispatched_at,
                    read: false,
                };
                let stored_result = self
                    .with_datastore(move |ds| Ok(ds.store_notification(&stored)?))
                    .await;
                if let Err(e) = stored_result {
                    warn!("Failed to store in-app notification for {}: {}", user.id, e);
                }
                FiredTrigger {
                    trigger: trigger.name.clone(),
                    status: Some(dispatched.status),
                    error: None,
                }
            }
            Err(e) => {
                warn!("Trigger {} for {} failed: {}", trigger.name, user.id, e);
                FiredTrigger {
                    trigger: trigger.name.clone(),
                    status: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    pub async fn detect_inactivity(&self, days: i64) -> AutomationResult<InactivityReport> {
        self.detect_inactivity_at(days, Utc::now()).await
    }

    /// Remind every user inactive for `days`. A user gets one reminder per
    /// inactivity period: activity after the reminder re-arms it.
    pub async fn detect_inactivity_at(
        &self,
        days: i64,
        now: DateTime<Utc>,
    ) -> AutomationResult<InactivityReport> {
        if days <= 0 {
            return Err(AutomationError::Validation(
                "inactivity threshold must be at least one day".to_string(),
            ));
        }
        let cutoff = now - Duration::days(days);
        let users = self
            .with_datastore(move |ds| Ok(ds.users_needing_reminder(cutoff)?))
            .await?;
        let mut report = InactivityReport {
            days,
            checked_at: Some(now),
            ..Default::default()
        };
        for user in users {
            let days_label = days.to_string();
            match self
                .track_activity(&user.id, ActivityKind::InactivityDetected, Some(&days_label))
                .await
            {
                Ok(_) => {
                    let reminded_id = user.id.clone();
                    let marked = self
                        .with_datastore(move |ds| Ok(ds.mark_reminded(&reminded_id, now)?))
                        .await;
                    if let Err(e) = marked {
                        report.errors.push(format!("{}: {}", user.id, e));
                        continue;
                    }
                    report.reminded.push(user.id);
                }
                Err(e) => report.errors.push(format!("{}: {}", user.id, e)),
            }
        }
        info!(
            "Inactivity scan ({} days): {} reminded, {} errors",
            days,
            report.reminded.len(),
            report.errors.len()
        );
        self.persist("inactivity", &report);
        Ok(report)
    }

    pub async fn send_weekly_summary(&self) -> AutomationResult<WeeklySummaryReport> {
        self.send_weekly_summary_at(Utc::now()).await
    }

    /// Email each user who was active in the past week a summary of it.
    pub async fn send_weekly_summary_at(
        &self,
        now: DateTime<Utc>,
    ) -> AutomationResult<WeeklySummaryReport> {
        let since = now - Duration::days(7);
        let users = self.with_datastore(|ds| Ok(ds.list_users()?)).await?;
        let mut report = WeeklySummaryReport {
            users: users.len(),
            ..Default::default()
        };
        for user in users {
            let active_id = user.id.clone();
            let activities = match self
                .with_datastore(move |ds| Ok(ds.activities_since(&active_id, since)?))
                .await
            {
                Ok(a) => a,
                Err(e) => {
                    report.errors.push(format!("{}: {}", user.id, e));
                    continue;
                }
            };
            let lessons = activities
                .iter()
                .filter(|a| a.kind == ActivityKind::LessonCompleted)
                .count();
            let active_days: BTreeSet<NaiveDate> = activities
                .iter()
                .filter(|a| a.kind != ActivityKind::InactivityDetected)
                .map(|a| a.created_at.date_naive())
                .collect();
            if active_days.is_empty() {
                report.skipped_inactive += 1;
                continue;
            }
            let mut values = base_values(&user);
            values.insert("lessons".to_string(), lessons.to_string());
            values.insert("active_days".to_string(), active_days.len().to_string());
            let summary = EngagementTrigger::new(
                "weekly_summary",
                ActivityKind::Login,
                "weekly_summary",
            );
            let fired = self.fire(&summary, &user, &values).await;
            match fired.error {
                None => report.sent += 1,
                Some(e) => report.errors.push(format!("{}: {}", user.id, e)),
            }
        }
        info!(
            "Weekly summary: {} sent, {} inactive, {} errors",
            report.sent,
            report.skipped_inactive,
            report.errors.len()
        );
        self.persist("weekly_summary", &report);
        Ok(report)
    }

    fn persist<T: Serialize>(&self, event: &str, record: &T) {
        let mut value = match serde_json::to_value(record) {
            Ok(v) => v,
            Err(e) => {
                warn!("Failed to serialize engagement record: {}", e);
                return;
            }
        };
        set_field(&mut value, "event", Value::from(event));
        if let Err(e) = self.store.append(RecordKind::Engagement, &value) {
            warn!("Failed to persist engagement record: {}", e);
        }
        let result = self.store.update_stats(RecordKind::Engagement, &mut |stats| {
            bump_counter(stats, event, 1);
            set_field(stats, "last_event_at", Value::from(Utc::now().to_rfc3339()));
        });
        if let Err(e) = result {
            warn!("Failed to update engagement stats: {}", e);
        }
    }
}

fn base_values(user: &User) -> HashMap<String, String> {
    let mut values = HashMap::new();
    values.insert("name".to_string(), user.name.clone());
    values.insert("email".to_string(), user.email.clone());
    values
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::{CollectionStore, NewUser, SqliteDatastore};
    use crate::notifications::{
        default_rate_limits, Channel, ChannelError, Notification, NotificationChannel,
    };
    use crate::run_store::JsonDayStore;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Outbox {
        sent: Mutex<Vec<(String, Option<String>)>>,
    }

    #[async_trait]
    impl NotificationChannel for Outbox {
        fn kind(&self) -> Channel {
            Channel::Email
        }

        async fn deliver(&self, notification: &Notification) -> Result<(), ChannelError> {
            self.sent
                .lock()
                .unwrap()
                .push((notification.title.clone(), notification.recipient.clone()));
            Ok(())
        }
    }

    struct Fixture {
        _temp_dir: TempDir,
        datastore: Arc<SqliteDatastore>,
        outbox: Arc<Outbox>,
        service: UserEngagementService,
    }

    fn fixture() -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let store: Arc<dyn RunRecordStore> = Arc::new(JsonDayStore::new(temp_dir.path()).unwrap());
        let datastore = Arc::new(SqliteDatastore::in_memory().unwrap());
        let outbox = Arc::new(Outbox::default());
        let notifier = Arc::new(
            NotificationService::new(store.clone(), default_rate_limits()).with_channel(outbox.clone()),
        );
        let service = UserEngagementService::new(datastore.clone(), notifier, store);
        Fixture {
            _temp_dir: temp_dir,
            datastore,
            outbox,
            service,
        }
    }

    fn user(datastore: &SqliteDatastore, name: &str) -> User {
        datastore
            .create_user(&NewUser {
                email: format!("{}@example.com", name),
                name: name.to_string(),
            })
            .unwrap()
    }

    #[tokio::test]
    async fn test_registration_sends_welcome() {
        let f = fixture();
        let ada = user(&f.datastore, "ada");
        let outcome = f
            .service
            .track_activity(&ada.id, ActivityKind::Registration, None)
            .await
            .unwrap();
        assert_eq!(outcome.fired.len(), 1);
        assert_eq!(outcome.fired[0].status, Some(DeliveryStatus::Sent));

        let sent = f.outbox.sent.lock().unwrap().clone();
        assert_eq!(sent, vec![("Welcome, ada!".to_string(), Some("ada@example.com".to_string()))]);
        assert_eq!(f.datastore.notifications_for_user(&ada.id, 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_milestone_fires_once_at_exact_count() {
        let f = fixture();
        let ada = user(&f.datastore, "ada");
        let mut milestone_fires = Vec::new();
        for i in 1..=6 {
            let outcome = f
                .service
                .track_activity(&ada.id, ActivityKind::LessonCompleted, Some(&format!("lesson {}", i)))
                .await
                .unwrap();
            for fired in outcome.fired {
                if fired.trigger.starts_with("milestone_") {
                    milestone_fires.push((outcome.count, fired.trigger));
                }
            }
        }
        assert_eq!(
            milestone_fires,
            vec![
                (1, "milestone_1_lessons".to_string()),
                (5, "milestone_5_lessons".to_string())
            ]
        );
        assert_eq!(
            f.datastore
                .count_activities(&ada.id, ActivityKind::MilestoneUnlocked)
                .unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn test_milestones_do_not_refire_after_activity_purge() {
        let f = fixture();
        let ada = user(&f.datastore, "ada");
        let mut milestone_fires = Vec::new();
        for round in 0..2 {
            for i in 1..=5 {
                let outcome = f
                    .service
                    .track_activity(&ada.id, ActivityKind::LessonCompleted, Some(&format!("lesson {}", i)))
                    .await
                    .unwrap();
                milestone_fires.extend(
                    outcome
                        .fired
                        .into_iter()
                        .map(|fired| fired.trigger)
                        .filter(|name| name.starts_with("milestone_")),
                );
            }
            if round == 0 {
                let purged = f
                    .datastore
                    .purge_older_than("activities", Utc::now() + Duration::seconds(1), false)
                    .unwrap();
                assert_eq!(purged, 7);
            }
        }
        assert_eq!(
            milestone_fires,
            vec!["milestone_1_lessons".to_string(), "milestone_5_lessons".to_string()]
        );
        assert_eq!(f.datastore.count("milestones").unwrap(), 2);
    }

    #[tokio::test]
    async fn test_unknown_user_is_rejected() {
        let f = fixture();
        let err = f
            .service
            .track_activity("ghost", ActivityKind::Login, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AutomationError::Validation(_)));
    }

    #[tokio::test]
    async fn test_inactivity_reminder_once_per_period() {
        let f = fixture();
        let ada = user(&f.datastore, "ada");
        let now = Utc::now() + Duration::days(10);

        let first = f.service.detect_inactivity_at(7, now).await.unwrap();
        assert_eq!(first.reminded, vec![ada.id.clone()]);

        let second = f
            .service
            .detect_inactivity_at(7, now + Duration::days(1))
            .await
            .unwrap();
        assert!(second.reminded.is_empty());
        assert!(f.service.detect_inactivity_at(0, now).await.is_err());
    }

    #[tokio::test]
    async fn test_weekly_summary_skips_inactive_users() {
        let f = fixture();
        let ada = user(&f.datastore, "ada");
        user(&f.datastore, "bob");
        f.datastore
            .record_activity(&ada.id, ActivityKind::LessonCompleted, Some("intro"))
            .unwrap();

        let report = f.service.send_weekly_summary().await.unwrap();
        assert_eq!(report.users, 2);
        assert_eq!(report.sent, 1);
        assert_eq!(report.skipped_inactive, 1);
    }
}

//! Notification service: rate-limited multi-channel fan-out.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, warn};

use super::channels::NotificationChannel;
use super::models::{
    AlertOptions, Channel, ChannelOutcome, DeliveryStatus, DispatchedNotification, Notification,
    NotificationType,
};
use super::rate_limiter::{FixedWindowRateLimiter, RateLimit, RateLimitSnapshot};
use super::templates::TemplateRegistry;
use crate::error::{AutomationError, AutomationResult};
use crate::metrics;
use crate::run_store::{append_typed, bump_counter, set_field, BoundedHistory, RecordKind, RunRecordStore};

const HISTORY_CAPACITY: usize = 100;

/// Default per-minute limits: email 10, telegram 20, discord 30.
pub fn default_rate_limits() -> HashMap<String, RateLimit> {
    let mut limits = HashMap::new();
    limits.insert(Channel::Email.as_str().to_string(), RateLimit::per_minute(10));
    limits.insert(Channel::Telegram.as_str().to_string(), RateLimit::per_minute(20));
    limits.insert(Channel::Discord.as_str().to_string(), RateLimit::per_minute(30));
    limits
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationServiceStatus {
    pub configured_channels: Vec<Channel>,
    pub rate_limits: Vec<RateLimitSnapshot>,
    pub recent_count: usize,
    pub last_status: Option<DeliveryStatus>,
}

/// Formats and dispatches notifications across the configured channels.
pub struct NotificationService {
    channels: BTreeMap<Channel, Arc<dyn NotificationChannel>>,
    rate_limiter: FixedWindowRateLimiter,
    templates: TemplateRegistry,
    store: Arc<dyn RunRecordStore>,
    history: Mutex<BoundedHistory<DispatchedNotification>>,
}

impl NotificationService {
    pub fn new(store: Arc<dyn RunRecordStore>, limits: HashMap<String, RateLimit>) -> Self {
        Self {
            channels: BTreeMap::new(),
            rate_limiter: FixedWindowRateLimiter::new(limits),
            templates: TemplateRegistry::with_builtin(),
            store,
            history: Mutex::new(BoundedHistory::new(HISTORY_CAPACITY)),
        }
    }

    pub fn with_channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.channels.insert(channel.kind(), channel);
        self
    }

    pub fn with_templates(mut self, templates: TemplateRegistry) -> Self {
        self.templates = templates;
        self
    }

    pub fn configured_channels(&self) -> Vec<Channel> {
        self.channels.keys().copied().collect()
    }

    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    /// Dispatch to every channel in `notification.channels`.
    ///
    /// Each channel is checked against its rate limit first; a limited or
    /// unconfigured channel is recorded and skipped while the others are still
    /// attempted. Only an empty channel set is an error.
    pub async fn send(&self, notification: Notification) -> AutomationResult<DispatchedNotification> {
        if notification.channels.is_empty() {
            return Err(AutomationError::Validation(
                "notification has no channels".to_string(),
            ));
        }

        let mut results: BTreeMap<Channel, ChannelOutcome> = BTreeMap::new();
        let mut to_deliver: Vec<Arc<dyn NotificationChannel>> = Vec::new();

        for channel in &notification.channels {
            if results.contains_key(channel) {
                continue;
            }
            let Some(target) = self.channels.get(channel) else {
                results.insert(
                    *channel,
                    ChannelOutcome::Failed {
                        error: format!("channel '{}' is not configured", channel),
                    },
                );
                continue;
            };
            match self.rate_limiter.try_acquire(channel.as_str()) {
                Ok(()) => to_deliver.push(Arc::clone(target)),
                Err(retry_after) => {
                    let err = AutomationError::RateLimited {
                        channel: channel.to_string(),
                        retry_after,
                    };
                    warn!("Skipping notification '{}': {}", notification.title, err);
                    results.insert(
                        *channel,
                        ChannelOutcome::RateLimited {
                            retry_after_ms: retry_after.as_millis() as u64,
                        },
                    );
                }
            }
        }

        let deliveries = join_all(to_deliver.iter().map(|target| {
            let n = &notification;
            async move { (target.kind(), target.deliver(n).await) }
        }))
        .await;

        for (kind, result) in deliveries {
            let outcome = match result {
                Ok(()) => ChannelOutcome::Delivered,
                Err(e) => {
                    warn!("Notification '{}' failed on {}: {}", notification.title, kind, e);
                    ChannelOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            };
            results.insert(kind, outcome);
        }

        for (channel, outcome) in &results {
            metrics::record_notification(channel.as_str(), outcome.label());
        }

        let status = DeliveryStatus::from_outcomes(results.values());
        let dispatched = DispatchedNotification {
            notification,
            results,
            status,
            dispatched_at: Utc::now(),
        };
        debug!(
            "Notification '{}' dispatched with status {:?}",
            dispatched.notification.title, status
        );

        self.persist(&dispatched);
        match self.history.lock() {
            Ok(mut history) => history.push(dispatched.clone()),
            Err(poisoned) => poisoned.into_inner().push(dispatched.clone()),
        }

        Ok(dispatched)
    }

    /// Send an operational alert. Email is always attempted; `High` and
    /// `Critical` severities add every other configured channel.
    pub async fn send_alert(&self, options: AlertOptions) -> AutomationResult<DispatchedNotification> {
        let mut channels = vec![Channel::Email];
        if options.severity.escalates() {
            channels.extend(
                self.channels
                    .keys()
                    .copied()
                    .filter(|c| *c != Channel::Email),
            );
        }

        let mut message = options.message;
        if let Some(details) = &options.details {
            let pretty = serde_json::to_string_pretty(details).unwrap_or_default();
            message = format!("{}\n\n{}", message, pretty);
        }

        let notification = Notification::new(
            options.severity.notification_type(),
            options.title,
            message,
            channels,
        )
        .with_priority(options.severity.priority());
        self.send(notification).await
    }

    /// Render a named template and send it.
    pub async fn send_template(
        &self,
        template: &str,
        values: &HashMap<String, String>,
        notification_type: NotificationType,
        channels: Vec<Channel>,
        recipient: Option<String>,
    ) -> AutomationResult<DispatchedNotification> {
        let (title, body) = self
            .templates
            .render(template, values)
            .ok_or_else(|| AutomationError::Validation(format!("unknown template '{}'", template)))?;
        let mut notification = Notification::new(notification_type, title, body, channels);
        if let Some(r) = recipient {
            notification = notification.with_recipient(r);
        }
        self.send(notification).await
    }

    pub fn recent(&self, limit: usize) -> Vec<DispatchedNotification> {
        match self.history.lock() {
            Ok(history) => history.newest(limit),
            Err(poisoned) => poisoned.into_inner().newest(limit),
        }
    }

    pub fn status(&self) -> NotificationServiceStatus {
        let (recent_count, last_status) = match self.history.lock() {
            Ok(h) => (h.len(), h.latest().map(|d| d.status)),
            Err(p) => {
                let h = p.into_inner();
                (h.len(), h.latest().map(|d| d.status))
            }
        };
        NotificationServiceStatus {
            configured_channels: self.configured_channels(),
            rate_limits: self.rate_limiter.snapshot(),
            recent_count,
            last_status,
        }
    }

    fn persist(&self, dispatched: &DispatchedNotification) {
        if let Err(e) = append_typed(self.store.as_ref(), RecordKind::Notification, dispatched) {
            warn!("Failed to persist notification {}: {}", dispatched.notification.id, e);
        }
        let status_key = match dispatched.status {
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Partial => "partial",
            DeliveryStatus::Failed => "failed",
        };
        let result = self
            .store
            .update_stats(RecordKind::Notification, &mut |stats| {
                bump_counter(stats, "total", 1);
                bump_counter(stats, status_key, 1);
                for (channel, outcome) in &dispatched.results {
                    bump_counter(stats, &format!("{}_{}", channel, outcome.label()), 1);
                }
                set_field(
                    stats,
                    "last_sent_at",
                    serde_json::Value::from(dispatched.dispatched_at.to_rfc3339()),
                );
            });
        if let Err(e) = result {
            warn!("Failed to update notification stats: {}", e);
        }
    }
}

use super::models::{
    CheckResult, HealthReport, HealthStatus, HealthSummary, HealthThresholds, RaisedAlert,
};
use super::probes::HealthProbe;
use crate::metrics;
use crate::notifications::{AlertOptions, NotificationService, Severity};
use crate::run_store::{
    append_typed, bump_counter, set_field, BoundedHistory, RecordKind, RunRecordStore,
};
use chrono::Utc;
use futures::future::join_all;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const WINDOW_CAPACITY: usize = 100;
const PROBE_DEADLINE: Duration = Duration::from_secs(30);

pub const DEFAULT_ALERT_COOLDOWN: Duration = Duration::from_secs(5 * 60);

/// Runs all probes, aggregates them and raises cooldown-filtered alerts.
pub struct HealthMonitor {
    probes: Vec<Arc<dyn HealthProbe>>,
    thresholds: HealthThresholds,
    cooldown: Duration,
    store: Arc<dyn RunRecordStore>,
    notifier: Option<Arc<NotificationService>>,
    last_alerted: Mutex<HashMap<String, Instant>>,
    window: Mutex<BoundedHistory<HealthReport>>,
}

impl HealthMonitor {
    pub fn new(store: Arc<dyn RunRecordStore>, thresholds: HealthThresholds) -> Self {
        Self {
            probes: Vec::new(),
            thresholds,
            cooldown: DEFAULT_ALERT_COOLDOWN,
            store,
            notifier: None,
            last_alerted: Mutex::new(HashMap::new()),
            window: Mutex::new(BoundedHistory::new(WINDOW_CAPACITY)),
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probes.push(probe);
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<NotificationService>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn thresholds(&self) -> &HealthThresholds {
        &self.thresholds
    }

    pub async fn check_health(&self) -> HealthReport {
        self.check_health_at(Instant::now()).await
    }

    /// Same as [`check_health`](Self::check_health) with an explicit clock
    /// for the cooldown bookkeeping.
    pub async fn check_health_at(&self, now: Instant) -> HealthReport {
        let thresholds = self.thresholds;
        let results = join_all(self.probes.iter().map(|probe| async move {
            let result = match tokio::time::timeout(PROBE_DEADLINE, probe.check(&thresholds)).await
            {
                Ok(result) => result,
                Err(_) => CheckResult::error(format!("probe timed out after {:?}", PROBE_DEADLINE)),
            };
            (probe.name().to_string(), result)
        }))
        .await;

        let checks: BTreeMap<String, CheckResult> = results.into_iter().collect();
        let overall = HealthStatus::worst(checks.values().map(|c| c.status));
        for (name, check) in &checks {
            metrics::set_health_status(name, check.status.level());
        }
        metrics::set_health_status("overall", overall.level());

        let (alerts, suppressed) = self.filter_alerts(&checks, now);
        let report = HealthReport {
            timestamp: Utc::now(),
            overall,
            checks,
            alerts,
            suppressed,
        };

        if overall == HealthStatus::Healthy {
            debug!("Health check: all {} checks healthy", report.checks.len());
        } else {
            info!(
                "Health check: overall {} ({} alerts, {} suppressed)",
                overall.as_str(),
                report.alerts.len(),
                report.suppressed.len()
            );
        }

        self.persist(&report);
        self.send_alerts(&report).await;
        self.window
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(report.clone());
        report
    }

    /// Alert candidates are every threshold breach plus every check that is
    /// unhealthy or erroring without one. A key alerts at most once per cooldown.
    fn filter_alerts(
        &self,
        checks: &BTreeMap<String, CheckResult>,
        now: Instant,
    ) -> (Vec<RaisedAlert>, Vec<String>) {
        let mut candidates = Vec::new();
        for (name, check) in checks {
            for breach in &check.breaches {
                candidates.push(RaisedAlert {
                    key: breach.key.clone(),
                    check: name.clone(),
                    value: breach.value,
                    threshold: breach.threshold,
                });
            }
            if check.breaches.is_empty() && check.status >= HealthStatus::Unhealthy {
                candidates.push(RaisedAlert {
                    key: format!("{}_{}", name, check.status.as_str()),
                    check: name.clone(),
                    value: check.status.level() as f64,
                    threshold: HealthStatus::Warning.level() as f64,
                });
            }
        }

        let mut last_alerted = self.last_alerted.lock().unwrap_or_else(|e| e.into_inner());
        let mut raised = Vec::new();
        let mut suppressed = Vec::new();
        for candidate in candidates {
            let cooling = last_alerted
                .get(&candidate.key)
                .is_some_and(|at| now.saturating_duration_since(*at) < self.cooldown);
            if cooling {
                metrics::record_health_alert_suppressed(&candidate.key);
                suppressed.push(candidate.key);
            } else {
                last_alerted.insert(candidate.key.clone(), now);
                raised.push(candidate);
            }
        }
        (raised, suppressed)
    }

    async fn send_alerts(&self, report: &HealthReport) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        let severity = if report.overall >= HealthStatus::Unhealthy {
            Severity::Critical
        } else {
            Severity::Medium
        };
        for alert in &report.alerts {
            let mut values = HashMap::new();
            values.insert("check".to_string(), alert.key.clone());
            values.insert("value".to_string(), format!("{:.2}", alert.value));
            values.insert("threshold".to_string(), format!("{:.2}", alert.threshold));
            let (title, body) = notifier
                .templates()
                .render("health_breach", &values)
                .unwrap_or_else(|| (format!("Health alert: {}", alert.key), String::new()));
            let message = match report.checks.get(&alert.check).and_then(|c| c.message.as_ref()) {
                Some(detail) => format!("{}\n\n{}", body, detail),
                None => body,
            };
            let options = AlertOptions::new(severity, title, message)
                .with_details(serde_json::json!({ "check": alert.check }));
            if let Err(e) = notifier.send_alert(options).await {
                warn!("Failed to send health alert {}: {}", alert.key, e);
            }
        }
    }

    fn persist(&self, report: &HealthReport) {
        if let Err(e) = append_typed(self.store.as_ref(), RecordKind::Health, report) {
            warn!("Failed to persist health report: {}", e);
        }
        let result = self.store.update_stats(RecordKind::Health, &mut |stats| {
            bump_counter(stats, "total", 1);
            bump_counter(stats, report.overall.as_str(), 1);
            bump_counter(stats, "alerts", report.alerts.len() as i64);
            set_field(stats, "last_status", Value::from(report.overall.as_str()));
            set_field(
                stats,
                "last_checked_at",
                Value::from(report.timestamp.to_rfc3339()),
            );
        });
        if let Err(e) = result {
            warn!("Failed to update health stats: {}", e);
        }
    }

    /// Aggregate over the in-memory window. Healthy and warning reports count as up.
    pub fn summary(&self) -> HealthSummary {
        let window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        if window.is_empty() {
            return HealthSummary::default();
        }
        let mut status_counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut up = 0usize;
        let mut latencies = Vec::new();
        for report in window.iter() {
            *status_counts
                .entry(report.overall.as_str().to_string())
                .or_default() += 1;
            if report.overall <= HealthStatus::Warning {
                up += 1;
            }
            latencies.extend(report.checks.values().filter_map(|c| c.latency_ms));
        }
        let latest = window.latest();
        HealthSummary {
            reports: window.len(),
            uptime_percent: up as f64 / window.len() as f64 * 100.0,
            average_latency_ms: if latencies.is_empty() {
                None
            } else {
                Some(latencies.iter().sum::<f64>() / latencies.len() as f64)
            },
            status_counts,
            last_status: latest.map(|r| r.overall),
            last_checked_at: latest.map(|r| r.timestamp),
        }
    }

    pub fn recent(&self, limit: usize) -> Vec<HealthReport> {
        self.window
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .newest(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run_store::JsonDayStore;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct FixedProbe {
        name: &'static str,
        result: CheckResult,
    }

    #[async_trait]
    impl HealthProbe for FixedProbe {
        fn name(&self) -> &str {
            self.name
        }

        async fn check(&self, _thresholds: &HealthThresholds) -> CheckResult {
            self.result.clone()
        }
    }

    fn monitor(temp_dir: &TempDir, probes: Vec<FixedProbe>) -> HealthMonitor {
        let store = Arc::new(JsonDayStore::new(temp_dir.path()).unwrap());
        let mut monitor = HealthMonitor::new(store, HealthThresholds::default());
        for probe in probes {
            monitor = monitor.with_probe(Arc::new(probe));
        }
        monitor
    }

    #[tokio::test]
    async fn test_overall_is_worst_status() {
        let temp_dir = TempDir::new().unwrap();
        let monitor = monitor(
            &temp_dir,
            vec![
                FixedProbe {
                    name: "system",
                    result: CheckResult::healthy(),
                },
                FixedProbe {
                    name: "disk",
                    result: CheckResult::new(HealthStatus::Warning),
                },
                FixedProbe {
                    name: "database",
                    result: CheckResult::new(HealthStatus::Unhealthy),
                },
            ],
        );
        let report = monitor.check_health().await;
        assert_eq!(report.overall, HealthStatus::Unhealthy);
        assert_eq!(report.checks.len(), 3);
        assert_eq!(report.alerts.len(), 1);
        assert_eq!(report.alerts[0].key, "database_unhealthy");
    }

    #[tokio::test]
    async fn test_breach_alert_respects_cooldown() {
        let temp_dir = TempDir::new().unwrap();
        let monitor = monitor(
            &temp_dir,
            vec![FixedProbe {
                name: "memory",
                result: CheckResult::healthy().check_threshold(
                    "memory",
                    95.0,
                    85.0,
                    HealthStatus::Warning,
                ),
            }],
        );
        let t0 = Instant::now();

        let first = monitor.check_health_at(t0).await;
        assert_eq!(first.alerts.len(), 1);

        let second = monitor.check_health_at(t0 + Duration::from_secs(60)).await;
        assert!(second.alerts.is_empty());
        assert_eq!(second.suppressed, vec!["memory".to_string()]);

        let third = monitor
            .check_health_at(t0 + DEFAULT_ALERT_COOLDOWN + Duration::from_secs(1))
            .await;
        assert_eq!(third.alerts.len(), 1);
    }

    #[tokio::test]
    async fn test_summary_and_persistence() {
        let temp_dir = TempDir::new().unwrap();
        let monitor = monitor(
            &temp_dir,
            vec![FixedProbe {
                name: "database",
                result: CheckResult::healthy().with_latency(10.0),
            }],
        );
        assert_eq!(monitor.summary().reports, 0);

        monitor.check_health().await;
        monitor.check_health().await;

        let summary = monitor.summary();
        assert_eq!(summary.reports, 2);
        assert_eq!(summary.uptime_percent, 100.0);
        assert_eq!(summary.average_latency_ms, Some(10.0));
        assert_eq!(summary.status_counts["healthy"], 2);

        let stats = monitor.store.read_stats(RecordKind::Health).unwrap();
        assert_eq!(stats["total"], 2);
        assert_eq!(stats["last_status"], "healthy");
        assert_eq!(monitor.store.recent(RecordKind::Health, 10).unwrap().len(), 2);
    }
}

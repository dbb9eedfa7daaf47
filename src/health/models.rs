use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Health of one check, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Unhealthy,
    Error,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Warning => "warning",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Error => "error",
        }
    }

    pub fn level(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Warning => 1,
            HealthStatus::Unhealthy => 2,
            HealthStatus::Error => 3,
        }
    }

    /// Worst status of `statuses`, `Healthy` when empty.
    pub fn worst<I: IntoIterator<Item = HealthStatus>>(statuses: I) -> HealthStatus {
        statuses.into_iter().max().unwrap_or(HealthStatus::Healthy)
    }
}

/// Configurable alert thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthThresholds {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
    pub response_time_ms: f64,
    pub error_rate_percent: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            cpu_percent: 80.0,
            memory_percent: 85.0,
            disk_percent: 90.0,
            response_time_ms: 2000.0,
            error_rate_percent: 5.0,
        }
    }
}

/// A threshold crossed by a check. `key` identifies the condition for cooldown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breach {
    pub key: String,
    pub value: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub status: HealthStatus,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    pub message: Option<String>,
    pub latency_ms: Option<f64>,
    #[serde(default)]
    pub breaches: Vec<Breach>,
}

impl CheckResult {
    pub fn new(status: HealthStatus) -> Self {
        Self {
            status,
            metrics: BTreeMap::new(),
            message: None,
            latency_ms: None,
            breaches: Vec::new(),
        }
    }

    pub fn healthy() -> Self {
        Self::new(HealthStatus::Healthy)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(HealthStatus::Error).with_message(message)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_metric(mut self, name: &str, value: f64) -> Self {
        self.metrics.insert(name.to_string(), value);
        self
    }

    pub fn with_latency(mut self, latency_ms: f64) -> Self {
        self.latency_ms = Some(latency_ms);
        self
    }

    /// Record a breach when `value` exceeds `threshold`; raises status to at least `status`.
    pub fn check_threshold(mut self, key: &str, value: f64, threshold: f64, status: HealthStatus) -> Self {
        if value > threshold {
            self.breaches.push(Breach {
                key: key.to_string(),
                value,
                threshold,
            });
            self.status = self.status.max(status);
        }
        self
    }
}

/// An alert that passed the cooldown filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaisedAlert {
    pub key: String,
    pub check: String,
    pub value: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub timestamp: DateTime<Utc>,
    pub overall: HealthStatus,
    pub checks: BTreeMap<String, CheckResult>,
    pub alerts: Vec<RaisedAlert>,
    /// Breach keys suppressed by cooldown in this run.
    #[serde(default)]
    pub suppressed: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthSummary {
    pub reports: usize,
    pub uptime_percent: f64,
    pub average_latency_ms: Option<f64>,
    pub status_counts: BTreeMap<String, usize>,
    pub last_status: Option<HealthStatus>,
    pub last_checked_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_ordering() {
        assert!(HealthStatus::Healthy < HealthStatus::Warning);
        assert!(HealthStatus::Warning < HealthStatus::Unhealthy);
        assert!(HealthStatus::Unhealthy < HealthStatus::Error);
        assert_eq!(
            HealthStatus::worst([HealthStatus::Warning, HealthStatus::Healthy, HealthStatus::Unhealthy]),
            HealthStatus::Unhealthy
        );
        assert_eq!(HealthStatus::worst([]), HealthStatus::Healthy);
    }

    #[test]
    fn test_check_threshold() {
        let result = CheckResult::healthy()
            .check_threshold("cpu", 50.0, 80.0, HealthStatus::Warning)
            .check_threshold("memory", 95.0, 85.0, HealthStatus::Warning);
        assert_eq!(result.status, HealthStatus::Warning);
        assert_eq!(result.breaches.len(), 1);
        assert_eq!(result.breaches[0].key, "memory");

        let worse = CheckResult::new(HealthStatus::Unhealthy)
            .check_threshold("disk", 99.0, 90.0, HealthStatus::Warning);
        assert_eq!(worse.status, HealthStatus::Unhealthy);
    }
}

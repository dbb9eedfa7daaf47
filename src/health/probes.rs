//! Concrete health probes.

use super::models::{CheckResult, HealthStatus, HealthThresholds};
use crate::datastore::CollectionStore;
use crate::run_store::{recent_typed, RecordKind, RunRecord, RunRecordStore, RunStatus};
use async_trait::async_trait;
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// One health sub-check.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    fn name(&self) -> &str;

    async fn check(&self, thresholds: &HealthThresholds) -> CheckResult;
}

/// 1-minute load average from `/proc/loadavg` contents.
pub fn parse_loadavg(contents: &str) -> Option<f64> {
    contents.split_whitespace().next()?.parse().ok()
}

/// `(total_kb, available_kb)` from `/proc/meminfo` contents.
pub fn parse_meminfo(contents: &str) -> Option<(u64, u64)> {
    let mut total = None;
    let mut available = None;
    for line in contents.lines() {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("MemTotal:") => total = parts.next().and_then(|v| v.parse().ok()),
            Some("MemAvailable:") => available = parts.next().and_then(|v| v.parse().ok()),
            _ => {}
        }
    }
    Some((total?, available?))
}

/// `(used_kb, available_kb)` from POSIX `df -Pk` output for a single path.
pub fn parse_df(output: &str) -> Option<(u64, u64)> {
    let line = output.lines().nth(1)?;
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 6 {
        return None;
    }
    Some((fields[2].parse().ok()?, fields[3].parse().ok()?))
}

/// CPU pressure: load average relative to the CPU count.
pub struct SystemLoadProbe {
    loadavg_path: PathBuf,
}

impl SystemLoadProbe {
    pub fn new() -> Self {
        Self {
            loadavg_path: PathBuf::from("/proc/loadavg"),
        }
    }
}

impl Default for SystemLoadProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HealthProbe for SystemLoadProbe {
    fn name(&self) -> &str {
        "system"
    }

    async fn check(&self, thresholds: &HealthThresholds) -> CheckResult {
        let contents = match tokio::fs::read_to_string(&self.loadavg_path).await {
            Ok(c) => c,
            Err(e) => {
                return CheckResult::new(HealthStatus::Warning)
                    .with_message(format!("load average unavailable: {}", e))
            }
        };
        let Some(load) = parse_loadavg(&contents) else {
            return CheckResult::new(HealthStatus::Warning).with_message("unparseable load average");
        };
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1) as f64;
        let cpu_percent = (load / cpus * 100.0).min(100.0);
        CheckResult::healthy()
            .with_metric("load_1m", load)
            .with_metric("cpus", cpus)
            .with_metric("cpu_percent", cpu_percent)
            .check_threshold("cpu", cpu_percent, thresholds.cpu_percent, HealthStatus::Warning)
    }
}

pub struct MemoryProbe {
    meminfo_path: PathBuf,
}

impl MemoryProbe {
    pub fn new() -> Self {
        Self {
            meminfo_path: PathBuf::from("/proc/meminfo"),
        }
    }
}

impl Default for MemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HealthProbe for MemoryProbe {
    fn name(&self) -> &str {
        "memory"
    }

    async fn check(&self, thresholds: &HealthThresholds) -> CheckResult {
        let contents = match tokio::fs::read_to_string(&self.meminfo_path).await {
            Ok(c) => c,
            Err(e) => {
                return CheckResult::new(HealthStatus::Warning)
                    .with_message(format!("meminfo unavailable: {}", e))
            }
        };
        let Some((total, available)) = parse_meminfo(&contents) else {
            return CheckResult::new(HealthStatus::Warning).with_message("unparseable meminfo");
        };
        let used_percent = if total == 0 {
            0.0
        } else {
            (total.saturating_sub(available)) as f64 / total as f64 * 100.0
        };
        CheckResult::healthy()
            .with_metric("total_kb", total as f64)
            .with_metric("available_kb", available as f64)
            .with_metric("used_percent", used_percent)
            .check_threshold("memory", used_percent, thresholds.memory_percent, HealthStatus::Warning)
    }
}

/// Disk usage of a path via `df -Pk`.
pub struct DiskProbe {
    path: PathBuf,
}

impl DiskProbe {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl HealthProbe for DiskProbe {
    fn name(&self) -> &str {
        "disk"
    }

    async fn check(&self, thresholds: &HealthThresholds) -> CheckResult {
        let output = tokio::time::timeout(
            PROBE_TIMEOUT,
            tokio::process::Command::new("df")
                .arg("-Pk")
                .arg(&self.path)
                .output(),
        )
        .await;
        let output = match output {
            Ok(Ok(o)) if o.status.success() => o,
            Ok(Ok(o)) => {
                return CheckResult::error(format!(
                    "df exited with {}: {}",
                    o.status,
                    String::from_utf8_lossy(&o.stderr).trim()
                ))
            }
            Ok(Err(e)) => return CheckResult::error(format!("failed to run df: {}", e)),
            Err(_) => return CheckResult::error("df timed out"),
        };
        let stdout = String::from_utf8_lossy(&output.stdout);
        let Some((used, available)) = parse_df(&stdout) else {
            return CheckResult::error("unparseable df output");
        };
        let total = used + available;
        let used_percent = if total == 0 {
            0.0
        } else {
            used as f64 / total as f64 * 100.0
        };
        CheckResult::healthy()
            .with_metric("used_kb", used as f64)
            .with_metric("available_kb", available as f64)
            .with_metric("used_percent", used_percent)
            .check_threshold("disk", used_percent, thresholds.disk_percent, HealthStatus::Unhealthy)
    }
}

/// Datastore reachability and round-trip latency.
pub struct DatastoreProbe {
    store: Arc<dyn CollectionStore>,
}

impl DatastoreProbe {
    pub fn new(store: Arc<dyn CollectionStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl HealthProbe for DatastoreProbe {
    fn name(&self) -> &str {
        "database"
    }

    async fn check(&self, thresholds: &HealthThresholds) -> CheckResult {
        let store = Arc::clone(&self.store);
        let start = Instant::now();
        let result = tokio::task::spawn_blocking(move || store.ping()).await;
        let latency = start.elapsed().as_secs_f64() * 1000.0;
        match result {
            Ok(Ok(())) => CheckResult::healthy().with_latency(latency).check_threshold(
                "database_latency",
                latency,
                thresholds.response_time_ms,
                HealthStatus::Warning,
            ),
            Ok(Err(e)) => CheckResult::error(format!("datastore unreachable: {:#}", e)),
            Err(e) => CheckResult::error(format!("datastore probe aborted: {}", e)),
        }
    }
}

/// GET a URL and grade the response.
async fn probe_url(client: &reqwest::Client, url: &str) -> Result<(u16, f64), String> {
    let start = Instant::now();
    let resp = client
        .get(url)
        .timeout(PROBE_TIMEOUT)
        .send()
        .await
        .map_err(|e| e.to_string())?;
    Ok((resp.status().as_u16(), start.elapsed().as_secs_f64() * 1000.0))
}

/// Application liveness via `<app_url>/health`.
pub struct ApplicationProbe {
    client: reqwest::Client,
    health_url: String,
}

impl ApplicationProbe {
    pub fn new(app_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            health_url: format!("{}/health", app_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl HealthProbe for ApplicationProbe {
    fn name(&self) -> &str {
        "application"
    }

    async fn check(&self, thresholds: &HealthThresholds) -> CheckResult {
        match probe_url(&self.client, &self.health_url).await {
            Ok((status, latency)) if (200..300).contains(&status) => CheckResult::healthy()
                .with_latency(latency)
                .with_metric("status_code", status as f64)
                .check_threshold(
                    "application_response_time",
                    latency,
                    thresholds.response_time_ms,
                    HealthStatus::Warning,
                ),
            Ok((status, latency)) => CheckResult::new(HealthStatus::Unhealthy)
                .with_latency(latency)
                .with_metric("status_code", status as f64)
                .with_message(format!("{} returned {}", self.health_url, status)),
            Err(e) => CheckResult::error(format!("{} unreachable: {}", self.health_url, e)),
        }
    }
}

/// Outbound connectivity to a list of endpoints.
pub struct NetworkProbe {
    client: reqwest::Client,
    endpoints: Vec<String>,
}

impl NetworkProbe {
    pub fn new(endpoints: Vec<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoints,
        }
    }
}

#[async_trait]
impl HealthProbe for NetworkProbe {
    fn name(&self) -> &str {
        "network"
    }

    async fn check(&self, _thresholds: &HealthThresholds) -> CheckResult {
        if self.endpoints.is_empty() {
            return CheckResult::healthy().with_message("no endpoints configured");
        }
        let results = join_all(self.endpoints.iter().map(|e| probe_url(&self.client, e))).await;
        let reachable: Vec<f64> = results
            .iter()
            .filter_map(|r| r.as_ref().ok().map(|(_, latency)| *latency))
            .collect();
        let total = self.endpoints.len();
        let status = match reachable.len() {
            n if n == total => HealthStatus::Healthy,
            0 => HealthStatus::Unhealthy,
            _ => HealthStatus::Warning,
        };
        let mut result = CheckResult::new(status)
            .with_metric("reachable", reachable.len() as f64)
            .with_metric("endpoints", total as f64);
        if !reachable.is_empty() {
            result = result.with_latency(reachable.iter().sum::<f64>() / reachable.len() as f64);
        }
        if reachable.len() < total {
            let failed: Vec<&str> = self
                .endpoints
                .iter()
                .zip(results.iter())
                .filter(|(_, r)| r.is_err())
                .map(|(e, _)| e.as_str())
                .collect();
            result = result.with_message(format!("unreachable: {}", failed.join(", ")));
        }
        result
    }
}

/// Share of failed job runs among the most recent runs.
pub struct JobErrorRateProbe {
    store: Arc<dyn RunRecordStore>,
    window: usize,
}

impl JobErrorRateProbe {
    pub fn new(store: Arc<dyn RunRecordStore>, window: usize) -> Self {
        Self { store, window }
    }
}

#[async_trait]
impl HealthProbe for JobErrorRateProbe {
    fn name(&self) -> &str {
        "jobs"
    }

    async fn check(&self, thresholds: &HealthThresholds) -> CheckResult {
        let runs: Vec<RunRecord> =
            match recent_typed(self.store.as_ref(), RecordKind::Job, self.window) {
                Ok(r) => r,
                Err(e) => return CheckResult::error(format!("run store unreadable: {:#}", e)),
            };
        if runs.is_empty() {
            return CheckResult::healthy().with_metric("runs", 0.0);
        }
        let failed = runs.iter().filter(|r| r.status == RunStatus::Failed).count();
        let rate = failed as f64 / runs.len() as f64 * 100.0;
        CheckResult::healthy()
            .with_metric("runs", runs.len() as f64)
            .with_metric("failed", failed as f64)
            .with_metric("error_rate_percent", rate)
            .check_threshold("error_rate", rate, thresholds.error_rate_percent, HealthStatus::Warning)
    }
}

use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all automation metrics
const PREFIX: &str = "automation";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Job metrics
    pub static ref JOB_EXECUTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_job_executions_total"), "Total job executions"),
        &["job", "status"]
    ).expect("Failed to create job_executions_total metric");

    pub static ref JOB_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_job_duration_seconds"),
            "Job execution duration in seconds"
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0, 900.0]),
        &["job"]
    ).expect("Failed to create job_duration_seconds metric");

    pub static ref JOB_RUNNING: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_job_running"), "Whether a job is currently running"),
        &["job"]
    ).expect("Failed to create job_running metric");

    pub static ref JOB_SKIPPED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_job_skipped_total"), "Scheduled fires skipped because the job was busy"),
        &["job"]
    ).expect("Failed to create job_skipped_total metric");

    // Notification metrics
    pub static ref NOTIFICATIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_notifications_total"), "Notification delivery attempts"),
        &["channel", "status"]
    ).expect("Failed to create notifications_total metric");

    // Health metrics
    pub static ref HEALTH_STATUS: GaugeVec = GaugeVec::new(
        Opts::new(
            format!("{PREFIX}_health_status"),
            "Health status per check (0 healthy, 1 warning, 2 unhealthy, 3 error)"
        ),
        &["check"]
    ).expect("Failed to create health_status metric");

    pub static ref HEALTH_ALERTS_SUPPRESSED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_health_alerts_suppressed_total"), "Health alerts suppressed by cooldown"),
        &["key"]
    ).expect("Failed to create health_alerts_suppressed_total metric");

    // Backup metrics
    pub static ref LAST_BACKUP_SIZE_BYTES: Gauge = Gauge::new(
        format!("{PREFIX}_last_backup_size_bytes"),
        "Size of the most recent backup archive"
    ).expect("Failed to create last_backup_size_bytes metric");
}

/// Register all metrics with the registry. Safe to call more than once.
pub fn init_metrics() {
    let _ = REGISTRY.register(Box::new(JOB_EXECUTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(JOB_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(JOB_RUNNING.clone()));
    let _ = REGISTRY.register(Box::new(JOB_SKIPPED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(NOTIFICATIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HEALTH_STATUS.clone()));
    let _ = REGISTRY.register(Box::new(HEALTH_ALERTS_SUPPRESSED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(LAST_BACKUP_SIZE_BYTES.clone()));
}

pub fn record_job_execution(job: &str, status: &str, duration: Duration) {
    JOB_EXECUTIONS_TOTAL.with_label_values(&[job, status]).inc();
    JOB_DURATION_SECONDS
        .with_label_values(&[job])
        .observe(duration.as_secs_f64());
}

pub fn set_job_running(job: &str, running: bool) {
    JOB_RUNNING
        .with_label_values(&[job])
        .set(if running { 1.0 } else { 0.0 });
}

pub fn record_job_skipped(job: &str) {
    JOB_SKIPPED_TOTAL.with_label_values(&[job]).inc();
}

pub fn record_notification(channel: &str, status: &str) {
    NOTIFICATIONS_TOTAL
        .with_label_values(&[channel, status])
        .inc();
}

pub fn set_health_status(check: &str, level: u8) {
    HEALTH_STATUS.with_label_values(&[check]).set(level as f64);
}

pub fn record_health_alert_suppressed(key: &str) {
    HEALTH_ALERTS_SUPPRESSED_TOTAL.with_label_values(&[key]).inc();
}

pub fn set_last_backup_size(bytes: u64) {
    LAST_BACKUP_SIZE_BYTES.set(bytes as f64);
}

/// Render the registry in Prometheus text format.
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => String::from_utf8(buffer).unwrap_or_default(),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_includes_recorded_job() {
        init_metrics();
        record_job_execution("metrics_test_job", "success", Duration::from_millis(20));
        let text = render();
        assert!(text.contains("automation_job_executions_total"));
        assert!(text.contains("metrics_test_job"));
    }
}

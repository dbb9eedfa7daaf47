use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings
    pub data_dir: Option<String>,
    pub database_url: Option<String>,
    pub app_url: Option<String>,

    // Module configs
    pub notifications: Option<NotificationsConfig>,
    pub health: Option<HealthConfig>,
    pub backup: Option<BackupConfig>,
    pub cleanup: Option<CleanupConfig>,
    pub content: Option<ContentConfig>,
    pub deployment: Option<DeploymentConfig>,
    pub engagement: Option<EngagementConfig>,
    pub reports: Option<ReportsConfig>,
    pub scheduler: Option<SchedulerConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct NotificationsConfig {
    pub email_per_minute: Option<u32>,
    pub telegram_per_minute: Option<u32>,
    pub discord_per_minute: Option<u32>,
    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub mail_from: Option<String>,
    pub alert_email: Option<String>,
    pub telegram_chat_id: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct HealthConfig {
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
    pub disk_percent: Option<f64>,
    pub response_time_ms: Option<f64>,
    pub error_rate_percent: Option<f64>,
    pub alert_cooldown_secs: Option<u64>,
    pub disk_path: Option<String>,
    pub network_endpoints: Option<Vec<String>>,
    /// Number of recent job runs the error rate is computed over.
    pub error_rate_window: Option<usize>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct BackupConfig {
    pub retention_days: Option<i64>,
    pub upload_url: Option<String>,
    pub upload_folder: Option<String>,
    pub mirror_dir: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct CleanupConfig {
    /// Retention override in days, keyed by rule name.
    pub retention_days: Option<HashMap<String, u64>>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ContentConfig {
    pub repo: Option<String>,
    pub branch: Option<String>,
    /// Directory inside the repository that holds the content.
    pub root: Option<String>,
    pub snapshots: Option<bool>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct DeploymentConfig {
    pub project_dir: Option<String>,
    pub command_timeout_secs: Option<u64>,
    pub environments: Option<Vec<EnvironmentFileConfig>>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct EnvironmentFileConfig {
    pub name: String,
    pub branch: Option<String>,
    pub platform: Option<String>,
    pub domain: Option<String>,
    pub auto_deploy: Option<bool>,
    pub project_dir: Option<String>,
    pub build_entry: Option<String>,
    pub test_command: Option<String>,
    pub build_command: Option<String>,
    pub output_dir: Option<String>,
    pub production: Option<bool>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct EngagementConfig {
    pub inactivity_days: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ReportsConfig {
    /// "json" or "markdown"
    pub format: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct SchedulerConfig {
    pub grace_period_secs: Option<u64>,
    /// Per-job overrides keyed by catalogue name.
    pub jobs: Option<BTreeMap<String, JobFileConfig>>,
}

#[derive(Debug, Deserialize, Default, Clone, PartialEq)]
#[serde(default)]
pub struct JobFileConfig {
    pub cron: Option<String>,
    pub enabled: Option<bool>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_file() {
        let config: FileConfig = toml::from_str(
            r#"
            data_dir = "/var/lib/automation"
            app_url = "https://app.example.com"

            [notifications]
            email_per_minute = 5

            [health]
            cpu_percent = 70.0
            network_endpoints = ["https://example.com"]

            [cleanup.retention_days]
            logs = 14

            [[deployment.environments]]
            name = "staging"
            branch = "develop"
            auto_deploy = true

            [scheduler.jobs.cleanup]
            cron = "30 4 * * *"
            "#,
        )
        .unwrap();

        assert_eq!(config.data_dir.as_deref(), Some("/var/lib/automation"));
        assert_eq!(config.notifications.unwrap().email_per_minute, Some(5));
        assert_eq!(config.health.unwrap().cpu_percent, Some(70.0));
        assert_eq!(
            config.cleanup.unwrap().retention_days.unwrap().get("logs"),
            Some(&14)
        );
        let envs = config.deployment.unwrap().environments.unwrap();
        assert_eq!(envs[0].name, "staging");
        assert_eq!(envs[0].auto_deploy, Some(true));
        let jobs = config.scheduler.unwrap().jobs.unwrap();
        assert_eq!(jobs["cleanup"].cron.as_deref(), Some("30 4 * * *"));
        assert_eq!(jobs["cleanup"].enabled, None);
    }

    #[test]
    fn test_unknown_file_is_error() {
        let err = FileConfig::load(Path::new("/nonexistent/automation.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}

mod file_config;

pub use file_config::{
    BackupConfig, CleanupConfig, ContentConfig, DeploymentConfig, EngagementConfig,
    EnvironmentFileConfig, FileConfig, HealthConfig, JobFileConfig, NotificationsConfig,
    ReportsConfig, SchedulerConfig,
};

use crate::background_jobs::JOB_CATALOG;
use crate::background_jobs::CronSchedule;
use crate::deployment::{EnvironmentConfig, PlatformTokens, DEFAULT_COMMAND_TIMEOUT};
use crate::health::{HealthThresholds, DEFAULT_ALERT_COOLDOWN};
use crate::notifications::{Channel, RateLimit, SmtpSettings};
use crate::reports::ReportFormat;
use anyhow::{bail, Result};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variables consulted during resolution.
pub type EnvVars = HashMap<String, String>;

/// Snapshot of the process environment (after `.env` has been loaded).
pub fn process_env() -> EnvVars {
    std::env::vars().collect()
}

/// CLI flags that take part in config resolution. They win over file and environment.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub database_path: PathBuf,
    pub app_url: Option<String>,

    pub notifications: NotificationSettings,
    pub health: HealthSettings,
    pub backup: BackupSettings,
    pub cleanup: CleanupSettings,
    pub content: Option<ContentSettings>,
    pub deployment: DeploymentSettings,
    pub engagement: EngagementSettings,
    pub reports: ReportSettings,
    pub scheduler: SchedulerSettings,
}

#[derive(Debug, Clone)]
pub struct NotificationSettings {
    pub rate_limits: HashMap<String, RateLimit>,
    pub smtp: Option<SmtpSettings>,
    pub telegram: Option<TelegramSettings>,
    pub discord_webhook_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TelegramSettings {
    pub bot_token: String,
    pub chat_id: String,
}

#[derive(Debug, Clone)]
pub struct HealthSettings {
    pub thresholds: HealthThresholds,
    pub alert_cooldown: Duration,
    pub disk_path: PathBuf,
    pub network_endpoints: Vec<String>,
    pub error_rate_window: usize,
}

#[derive(Debug, Clone)]
pub struct BackupSettings {
    pub backup_dir: PathBuf,
    pub retention_days: i64,
    pub http_upload: Option<HttpUploadSettings>,
    pub mirror_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct HttpUploadSettings {
    pub url: String,
    pub token: String,
    pub folder: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CleanupSettings {
    pub retention_overrides: HashMap<String, u64>,
}

#[derive(Debug, Clone)]
pub struct ContentSettings {
    pub repo: String,
    pub branch: String,
    pub root: String,
    pub token: Option<String>,
    pub mirror_dir: PathBuf,
    pub snapshot_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct DeploymentSettings {
    pub environments: Vec<EnvironmentConfig>,
    pub tokens: PlatformTokens,
    pub command_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct EngagementSettings {
    pub inactivity_days: u64,
}

#[derive(Debug, Clone)]
pub struct ReportSettings {
    pub reports_dir: PathBuf,
    pub format: ReportFormat,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobOverride {
    pub cron: Option<String>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub grace_period: Duration,
    pub jobs: BTreeMap<String, JobOverride>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(30),
            jobs: BTreeMap::new(),
        }
    }
}

impl SchedulerSettings {
    pub fn override_for(&self, job: &str) -> JobOverride {
        self.jobs.get(job).cloned().unwrap_or_default()
    }
}

fn env_value(env: &EnvVars, key: &str) -> Option<String> {
    env.get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn check_percent(name: &str, value: f64) -> Result<f64> {
    if !(0.0..=100.0).contains(&value) {
        bail!("{} must be between 0 and 100, got {}", name, value);
    }
    Ok(value)
}

/// `sqlite://path` and plain paths are both accepted.
fn parse_database_url(url: &str) -> PathBuf {
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url);
    PathBuf::from(path)
}

impl AppConfig {
    /// Resolve configuration. Precedence: CLI flags, then environment, then
    /// the TOML file, then defaults.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>, env: &EnvVars) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let data_dir = cli
            .data_dir
            .clone()
            .or_else(|| file.data_dir.as_ref().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("data"));
        if data_dir.exists() && !data_dir.is_dir() {
            bail!("data_dir is not a directory: {:?}", data_dir);
        }

        let database_path = env_value(env, "DATABASE_URL")
            .or(file.database_url.clone())
            .map(|url| parse_database_url(&url))
            .unwrap_or_else(|| data_dir.join("automation.db"));

        let app_url = env_value(env, "APP_URL")
            .or(file.app_url.clone())
            .map(|u| u.trim_end_matches('/').to_string());

        let notifications = resolve_notifications(file.notifications.unwrap_or_default(), env)?;
        let health = resolve_health(file.health.unwrap_or_default())?;

        let backup_file = file.backup.unwrap_or_default();
        let retention_days = backup_file.retention_days.unwrap_or(7);
        if retention_days < 1 {
            bail!("backup.retention_days must be at least 1, got {}", retention_days);
        }
        let http_upload = match (
            env_value(env, "BACKUP_UPLOAD_URL").or(backup_file.upload_url),
            env_value(env, "BACKUP_UPLOAD_TOKEN"),
        ) {
            (Some(url), Some(token)) => Some(HttpUploadSettings {
                url,
                token,
                folder: env_value(env, "BACKUP_UPLOAD_FOLDER").or(backup_file.upload_folder),
            }),
            (Some(_), None) => bail!("BACKUP_UPLOAD_URL is set but BACKUP_UPLOAD_TOKEN is missing"),
            _ => None,
        };
        let backup = BackupSettings {
            backup_dir: data_dir.join("backups"),
            retention_days,
            http_upload,
            mirror_dir: env_value(env, "BACKUP_MIRROR_DIR")
                .or(backup_file.mirror_dir)
                .map(PathBuf::from),
        };

        let cleanup = CleanupSettings {
            retention_overrides: file
                .cleanup
                .and_then(|c| c.retention_days)
                .unwrap_or_default(),
        };

        let content_file = file.content.unwrap_or_default();
        let content = env_value(env, "CONTENT_REPO")
            .or(content_file.repo)
            .map(|repo| -> Result<ContentSettings> {
                if repo.split('/').filter(|p| !p.is_empty()).count() != 2 {
                    bail!("CONTENT_REPO must be 'owner/name', got '{}'", repo);
                }
                Ok(ContentSettings {
                    repo,
                    branch: env_value(env, "CONTENT_BRANCH")
                        .or(content_file.branch)
                        .unwrap_or_else(|| "main".to_string()),
                    root: content_file.root.unwrap_or_default(),
                    token: env_value(env, "GITHUB_TOKEN"),
                    mirror_dir: data_dir.join("content"),
                    snapshot_dir: content_file
                        .snapshots
                        .unwrap_or(true)
                        .then(|| data_dir.join("content-snapshots")),
                })
            })
            .transpose()?;

        let deployment = resolve_deployment(file.deployment.unwrap_or_default(), env)?;

        let engagement = EngagementSettings {
            inactivity_days: file
                .engagement
                .and_then(|e| e.inactivity_days)
                .unwrap_or(7),
        };
        if engagement.inactivity_days == 0 {
            bail!("engagement.inactivity_days must be positive");
        }

        let format = match file.reports.and_then(|r| r.format) {
            Some(f) => match ReportFormat::parse(&f) {
                Some(format) => format,
                None => bail!("Unknown report format: {}", f),
            },
            None => ReportFormat::Markdown,
        };
        let reports = ReportSettings {
            reports_dir: data_dir.join("reports"),
            format,
        };

        let scheduler = resolve_scheduler(file.scheduler.unwrap_or_default())?;

        Ok(Self {
            data_dir,
            database_path,
            app_url,
            notifications,
            health,
            backup,
            cleanup,
            content,
            deployment,
            engagement,
            reports,
            scheduler,
        })
    }

    pub fn records_dir(&self) -> PathBuf {
        self.data_dir.join("records")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.data_dir.join("tmp")
    }
}

fn resolve_notifications(file: NotificationsConfig, env: &EnvVars) -> Result<NotificationSettings> {
    let mut rate_limits = HashMap::new();
    for (channel, per_minute, default) in [
        (Channel::Email, file.email_per_minute, 10),
        (Channel::Telegram, file.telegram_per_minute, 20),
        (Channel::Discord, file.discord_per_minute, 30),
    ] {
        let limit = per_minute.unwrap_or(default);
        if limit == 0 {
            bail!("{} rate limit must be positive", channel);
        }
        rate_limits.insert(channel.as_str().to_string(), RateLimit::per_minute(limit));
    }

    let smtp = match env_value(env, "SMTP_HOST").or(file.smtp_host) {
        Some(host) => {
            let port = match env_value(env, "SMTP_PORT") {
                Some(p) => match p.parse::<u16>() {
                    Ok(port) => port,
                    Err(_) => bail!("Invalid SMTP_PORT: {}", p),
                },
                None => file.smtp_port.unwrap_or(587),
            };
            let Some(default_recipient) = env_value(env, "ALERT_EMAIL").or(file.alert_email)
            else {
                bail!("SMTP_HOST is set but ALERT_EMAIL is missing");
            };
            let from = env_value(env, "MAIL_FROM")
                .or(file.mail_from)
                .unwrap_or_else(|| default_recipient.clone());
            Some(SmtpSettings {
                host,
                port,
                username: env_value(env, "SMTP_USER"),
                password: env_value(env, "SMTP_PASS"),
                from,
                default_recipient,
            })
        }
        None => None,
    };

    let telegram = match (
        env_value(env, "TELEGRAM_BOT_TOKEN"),
        env_value(env, "TELEGRAM_CHAT_ID").or(file.telegram_chat_id),
    ) {
        (Some(bot_token), Some(chat_id)) => Some(TelegramSettings { bot_token, chat_id }),
        (Some(_), None) => bail!("TELEGRAM_BOT_TOKEN is set but TELEGRAM_CHAT_ID is missing"),
        _ => None,
    };

    Ok(NotificationSettings {
        rate_limits,
        smtp,
        telegram,
        discord_webhook_url: env_value(env, "DISCORD_WEBHOOK_URL"),
    })
}

fn resolve_health(file: HealthConfig) -> Result<HealthSettings> {
    let defaults = HealthThresholds::default();
    let thresholds = HealthThresholds {
        cpu_percent: check_percent("health.cpu_percent", file.cpu_percent.unwrap_or(defaults.cpu_percent))?,
        memory_percent: check_percent(
            "health.memory_percent",
            file.memory_percent.unwrap_or(defaults.memory_percent),
        )?,
        disk_percent: check_percent("health.disk_percent", file.disk_percent.unwrap_or(defaults.disk_percent))?,
        response_time_ms: file.response_time_ms.unwrap_or(defaults.response_time_ms),
        error_rate_percent: check_percent(
            "health.error_rate_percent",
            file.error_rate_percent.unwrap_or(defaults.error_rate_percent),
        )?,
    };
    if thresholds.response_time_ms <= 0.0 {
        bail!("health.response_time_ms must be positive");
    }
    Ok(HealthSettings {
        thresholds,
        alert_cooldown: file
            .alert_cooldown_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_ALERT_COOLDOWN),
        disk_path: PathBuf::from(file.disk_path.unwrap_or_else(|| "/".to_string())),
        network_endpoints: file.network_endpoints.unwrap_or_else(|| {
            vec![
                "https://www.google.com".to_string(),
                "https://api.github.com".to_string(),
            ]
        }),
        error_rate_window: file.error_rate_window.unwrap_or(50),
    })
}

fn default_environments() -> Vec<EnvironmentFileConfig> {
    vec![
        EnvironmentFileConfig {
            name: "staging".to_string(),
            branch: Some("develop".to_string()),
            auto_deploy: Some(true),
            ..Default::default()
        },
        EnvironmentFileConfig {
            name: "production".to_string(),
            branch: Some("main".to_string()),
            ..Default::default()
        },
    ]
}

fn resolve_deployment(file: DeploymentConfig, env: &EnvVars) -> Result<DeploymentSettings> {
    let project_dir = PathBuf::from(file.project_dir.unwrap_or_else(|| ".".to_string()));
    let mut environments: Vec<EnvironmentConfig> = Vec::new();
    for e in file.environments.unwrap_or_else(default_environments) {
        if e.name.trim().is_empty() {
            bail!("Deployment environment without a name");
        }
        if environments.iter().any(|existing| existing.name == e.name) {
            bail!("Duplicate deployment environment: {}", e.name);
        }
        let mut config = EnvironmentConfig::new(
            &e.name,
            e.branch.as_deref().unwrap_or("main"),
            e.project_dir.map(PathBuf::from).unwrap_or_else(|| project_dir.clone()),
        );
        let domain_key = format!("DEPLOY_DOMAIN_{}", e.name.to_ascii_uppercase().replace('-', "_"));
        config.domain = env_value(env, &domain_key).or(e.domain);
        config.auto_deploy = e.auto_deploy.unwrap_or(false);
        if let Some(platform) = e.platform {
            config.platform = platform;
        }
        if let Some(entry) = e.build_entry {
            config.build_entry = PathBuf::from(entry);
        }
        if let Some(cmd) = e.test_command {
            config.test_command = cmd;
        }
        if let Some(cmd) = e.build_command {
            config.build_command = cmd;
        }
        if let Some(dir) = e.output_dir {
            config.output_dir = PathBuf::from(dir);
        }
        if let Some(production) = e.production {
            config.production = production;
        }
        environments.push(config);
    }

    Ok(DeploymentSettings {
        environments,
        tokens: PlatformTokens {
            vercel: env_value(env, "VERCEL_TOKEN"),
            netlify: env_value(env, "NETLIFY_AUTH_TOKEN"),
        },
        command_timeout: file
            .command_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_COMMAND_TIMEOUT),
    })
}

fn resolve_scheduler(file: SchedulerConfig) -> Result<SchedulerSettings> {
    let mut jobs = BTreeMap::new();
    for (name, job) in file.jobs.unwrap_or_default() {
        if !JOB_CATALOG.iter().any(|entry| entry.name == name) {
            bail!("Unknown job in scheduler config: {}", name);
        }
        if let Some(cron) = &job.cron {
            if let Err(e) = CronSchedule::parse(cron) {
                bail!("Invalid cron for job {}: {}", name, e);
            }
        }
        jobs.insert(
            name,
            JobOverride {
                cron: job.cron,
                enabled: job.enabled,
            },
        );
    }
    Ok(SchedulerSettings {
        grace_period: Duration::from_secs(file.grace_period_secs.unwrap_or(30)),
        jobs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> EnvVars {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_resolve_defaults() {
        let config = AppConfig::resolve(&CliConfig::default(), None, &EnvVars::new()).unwrap();

        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert_eq!(config.database_path, PathBuf::from("data/automation.db"));
        assert_eq!(config.records_dir(), PathBuf::from("data/records"));
        assert_eq!(config.notifications.rate_limits["email"].max_requests, 10);
        assert_eq!(config.notifications.rate_limits["discord"].max_requests, 30);
        assert!(config.notifications.smtp.is_none());
        assert_eq!(config.health.alert_cooldown, DEFAULT_ALERT_COOLDOWN);
        assert_eq!(config.backup.retention_days, 7);
        assert!(config.content.is_none());
        assert_eq!(config.deployment.environments.len(), 2);
        assert!(config.deployment.environments[0].auto_deploy);
        assert!(config.deployment.environments[1].production);
        assert_eq!(config.scheduler.grace_period, Duration::from_secs(30));
        assert_eq!(config.reports.format, ReportFormat::Markdown);
    }

    #[test]
    fn test_precedence_cli_env_file() {
        let temp_dir = TempDir::new().unwrap();
        let file = FileConfig {
            data_dir: Some("/from/file".to_string()),
            database_url: Some("/from/file/db.sqlite".to_string()),
            app_url: Some("https://file.example.com".to_string()),
            ..Default::default()
        };
        let cli = CliConfig {
            data_dir: Some(temp_dir.path().to_path_buf()),
        };
        let vars = env(&[
            ("DATABASE_URL", "sqlite:///srv/env.db"),
            ("DEPLOY_DOMAIN_PRODUCTION", "app.example.com"),
            ("VERCEL_TOKEN", "vt"),
        ]);

        let config = AppConfig::resolve(&cli, Some(file), &vars).unwrap();

        assert_eq!(config.data_dir, temp_dir.path());
        assert_eq!(config.database_path, PathBuf::from("/srv/env.db"));
        assert_eq!(config.app_url.as_deref(), Some("https://file.example.com"));
        let production = config
            .deployment
            .environments
            .iter()
            .find(|e| e.name == "production")
            .unwrap();
        assert_eq!(production.domain.as_deref(), Some("app.example.com"));
        assert_eq!(config.deployment.tokens.vercel.as_deref(), Some("vt"));
    }

    #[test]
    fn test_smtp_requires_alert_email() {
        let result = AppConfig::resolve(
            &CliConfig::default(),
            None,
            &env(&[("SMTP_HOST", "smtp.example.com")]),
        );
        assert!(result.unwrap_err().to_string().contains("ALERT_EMAIL"));

        let config = AppConfig::resolve(
            &CliConfig::default(),
            None,
            &env(&[
                ("SMTP_HOST", "smtp.example.com"),
                ("SMTP_PORT", "2525"),
                ("ALERT_EMAIL", "ops@example.com"),
            ]),
        )
        .unwrap();
        let smtp = config.notifications.smtp.unwrap();
        assert_eq!(smtp.port, 2525);
        assert_eq!(smtp.from, "ops@example.com");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let file = FileConfig {
            health: Some(HealthConfig {
                cpu_percent: Some(120.0),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(AppConfig::resolve(&CliConfig::default(), Some(file), &EnvVars::new()).is_err());

        let mut jobs = BTreeMap::new();
        jobs.insert(
            "nightly-dance".to_string(),
            JobFileConfig {
                cron: None,
                enabled: Some(false),
            },
        );
        let file = FileConfig {
            scheduler: Some(SchedulerConfig {
                grace_period_secs: None,
                jobs: Some(jobs),
            }),
            ..Default::default()
        };
        let err = AppConfig::resolve(&CliConfig::default(), Some(file), &EnvVars::new()).unwrap_err();
        assert!(err.to_string().contains("Unknown job"));

        assert!(AppConfig::resolve(
            &CliConfig::default(),
            None,
            &env(&[("CONTENT_REPO", "not-a-repo")])
        )
        .is_err());
    }

    #[test]
    fn test_job_override_lookup() {
        let mut jobs = BTreeMap::new();
        jobs.insert(
            "cleanup".to_string(),
            JobFileConfig {
                cron: Some("30 4 * * *".to_string()),
                enabled: None,
            },
        );
        let settings = resolve_scheduler(SchedulerConfig {
            grace_period_secs: Some(5),
            jobs: Some(jobs),
        })
        .unwrap();
        assert_eq!(settings.override_for("cleanup").cron.as_deref(), Some("30 4 * * *"));
        assert_eq!(settings.override_for("health-check"), JobOverride::default());
        assert_eq!(settings.grace_period, Duration::from_secs(5));
    }
}

//! Wires configuration into services and the scheduler.

use crate::background_jobs::{
    create_scheduler, register_catalog, JobError, JobScheduler, JobServices, SchedulerHandle,
    SchedulerStatus,
};
use crate::backup::{BackupStatus, DatabaseBackup, DirectoryMirrorUploader, HttpPutUploader};
use crate::cleanup::{default_rules, days, CleanupService};
use crate::config::AppConfig;
use crate::content::{ContentAutomation, GithubContentSource, SyncState};
use crate::datastore::SqliteDatastore;
use crate::deployment::{
    DeploymentAutomation, DeploymentStatus, HttpReachabilityProbe, ProcessRunner,
};
use crate::engagement::UserEngagementService;
use crate::health::{
    ApplicationProbe, DatastoreProbe, DiskProbe, HealthMonitor, HealthSummary, JobErrorRateProbe,
    MemoryProbe, NetworkProbe, SystemLoadProbe,
};
use crate::notifications::{
    DiscordChannel, EmailChannel, NotificationService, NotificationServiceStatus, TelegramChannel,
};
use crate::reports::{
    ErrorsSection, JobsSection, RecommendationsSection, ReportGenerator, StatsSection,
    SystemSection, UsersSection,
};
use crate::run_store::{JsonDayStore, RunRecord, RunRecordStore};
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct ModuleStatus {
    pub notifications: NotificationServiceStatus,
    pub health: HealthSummary,
    pub backup: BackupStatus,
    pub deployment: DeploymentStatus,
    pub content: Option<SyncState>,
    pub cleanup_rules: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AutomationStatus {
    #[serde(flatten)]
    pub scheduler: SchedulerStatus,
    pub modules: ModuleStatus,
}

/// The initialized automation core: every service plus the scheduler.
pub struct Automation {
    pub config: AppConfig,
    pub store: Arc<dyn RunRecordStore>,
    pub datastore: Arc<SqliteDatastore>,
    pub notifications: Arc<NotificationService>,
    pub health: Arc<HealthMonitor>,
    pub backup: Arc<DatabaseBackup>,
    pub cleanup: Arc<CleanupService>,
    pub content: Option<Arc<ContentAutomation>>,
    pub engagement: Arc<UserEngagementService>,
    pub deployment: Arc<DeploymentAutomation>,
    pub reports: Arc<ReportGenerator>,
    pub handle: SchedulerHandle,
    scheduler: Option<JobScheduler>,
    shutdown: CancellationToken,
}

fn notification_service(config: &AppConfig, store: Arc<dyn RunRecordStore>) -> Result<NotificationService> {
    let settings = &config.notifications;
    let mut service = NotificationService::new(store, settings.rate_limits.clone());
    if let Some(smtp) = &settings.smtp {
        let channel = EmailChannel::new(smtp)
            .map_err(|e| anyhow::anyhow!("Failed to configure email channel: {}", e))?;
        info!("Email notifications via {}:{}", smtp.host, smtp.port);
        service = service.with_channel(Arc::new(channel));
    }
    if let Some(telegram) = &settings.telegram {
        info!("Telegram notifications enabled");
        service = service.with_channel(Arc::new(TelegramChannel::new(
            &telegram.bot_token,
            &telegram.chat_id,
        )));
    }
    if let Some(url) = &settings.discord_webhook_url {
        info!("Discord notifications enabled");
        service = service.with_channel(Arc::new(DiscordChannel::new(url)));
    }
    if service.configured_channels().is_empty() {
        warn!("No notification channel configured, alerts will only be recorded");
    }
    Ok(service)
}

impl Automation {
    pub async fn initialize(config: AppConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("Failed to create data dir {:?}", config.data_dir))?;
        for dir in [config.logs_dir(), config.temp_dir()] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {:?}", dir))?;
        }

        info!("Opening run store at {:?}...", config.records_dir());
        let store: Arc<dyn RunRecordStore> = Arc::new(JsonDayStore::new(config.records_dir())?);

        info!("Opening datastore at {:?}...", config.database_path);
        let datastore = Arc::new(SqliteDatastore::new(&config.database_path)?);

        crate::metrics::init_metrics();

        let notifications = Arc::new(notification_service(&config, store.clone())?);

        let health_settings = &config.health;
        let mut health = HealthMonitor::new(store.clone(), health_settings.thresholds)
            .with_cooldown(health_settings.alert_cooldown)
            .with_notifier(notifications.clone())
            .with_probe(Arc::new(SystemLoadProbe::new()))
            .with_probe(Arc::new(MemoryProbe::new()))
            .with_probe(Arc::new(DiskProbe::new(&health_settings.disk_path)))
            .with_probe(Arc::new(DatastoreProbe::new(datastore.clone())))
            .with_probe(Arc::new(JobErrorRateProbe::new(
                store.clone(),
                health_settings.error_rate_window,
            )));
        if !health_settings.network_endpoints.is_empty() {
            health = health.with_probe(Arc::new(NetworkProbe::new(
                health_settings.network_endpoints.clone(),
            )));
        }
        if let Some(app_url) = &config.app_url {
            health = health.with_probe(Arc::new(ApplicationProbe::new(app_url)));
        }
        let health = Arc::new(health);

        let backup_settings = &config.backup;
        let mut backup = DatabaseBackup::new(
            datastore.clone(),
            store.clone(),
            &backup_settings.backup_dir,
        )
        .with_retention_days(backup_settings.retention_days);
        if let Some(http) = &backup_settings.http_upload {
            info!("Backups upload to {}", http.url);
            backup = backup.with_uploader(Arc::new(HttpPutUploader::new(
                &http.url,
                &http.token,
                http.folder.clone(),
            )));
        }
        if let Some(dir) = &backup_settings.mirror_dir {
            info!("Backups mirrored to {:?}", dir);
            backup = backup.with_uploader(Arc::new(DirectoryMirrorUploader::new(dir)));
        }
        let backup = Arc::new(backup);

        let mut rules = default_rules(&config.data_dir);
        for rule in rules.iter_mut() {
            if let Some(d) = config.cleanup.retention_overrides.get(&rule.name) {
                rule.retention = days(*d);
            }
        }
        let cleanup = Arc::new(
            CleanupService::new(store.clone(), rules).with_datastore(datastore.clone()),
        );

        let content = config.content.as_ref().map(|settings| {
            info!("Content source: {}@{}", settings.repo, settings.branch);
            let source = Arc::new(GithubContentSource::new(
                &settings.repo,
                &settings.branch,
                &settings.root,
                settings.token.clone(),
            ));
            let mut content = ContentAutomation::new(source, &settings.mirror_dir, store.clone())
                .with_repository(datastore.clone());
            if let Some(dir) = &settings.snapshot_dir {
                content = content.with_snapshots(dir);
            }
            Arc::new(content)
        });

        let engagement = Arc::new(UserEngagementService::new(
            datastore.clone(),
            notifications.clone(),
            store.clone(),
        ));

        let deployment_settings = &config.deployment;
        let deployment = Arc::new(
            DeploymentAutomation::new(
                deployment_settings.environments.clone(),
                Arc::new(ProcessRunner::new(deployment_settings.command_timeout)),
                Arc::new(HttpReachabilityProbe::new()),
                store.clone(),
            )
            .with_tokens(deployment_settings.tokens.clone())
            .with_notifier(notifications.clone()),
        );

        let reports = Arc::new(
            ReportGenerator::new(store.clone(), &config.reports.reports_dir)
                .with_section(Arc::new(SystemSection::new(health.clone())))
                .with_section(Arc::new(UsersSection::new(datastore.clone())))
                .with_section(Arc::new(JobsSection::new(store.clone())))
                .with_section(Arc::new(ErrorsSection::new(store.clone())))
                .with_section(Arc::new(StatsSection::backups(store.clone())))
                .with_section(Arc::new(StatsSection::deployments(store.clone())))
                .with_section(Arc::new(RecommendationsSection)),
        );

        let shutdown = CancellationToken::new();
        let (mut scheduler, handle) = create_scheduler(
            store.clone(),
            Some(notifications.clone()),
            shutdown.clone(),
            config.scheduler.grace_period,
        );
        let services = JobServices {
            backup: backup.clone(),
            health: health.clone(),
            cleanup: cleanup.clone(),
            content: content.clone(),
            engagement: engagement.clone(),
            deployment: deployment.clone(),
            reports: reports.clone(),
            inactivity_days: config.engagement.inactivity_days,
            report_format: config.reports.format,
        };
        let registered = register_catalog(&mut scheduler, &handle, &services, &config.scheduler)
            .await
            .context("Failed to register job catalogue")?;
        info!("Registered {} jobs", registered.len());

        Ok(Self {
            config,
            store,
            datastore,
            notifications,
            health,
            backup,
            cleanup,
            content,
            engagement,
            deployment,
            reports,
            handle,
            scheduler: Some(scheduler),
            shutdown,
        })
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Start the trigger loop in the background. Only the first call starts it.
    pub fn spawn_scheduler(&mut self) -> Option<JoinHandle<()>> {
        let mut scheduler = self.scheduler.take()?;
        Some(tokio::spawn(async move {
            scheduler.run().await;
        }))
    }

    /// Run one catalogue job now and wait for its record.
    pub async fn run_task(&self, name: &str, options: Option<Value>) -> Result<RunRecord, JobError> {
        if let Some(options) = &options {
            if !options.is_object() {
                return Err(JobError::Validation(
                    "options must be a JSON object".to_string(),
                ));
            }
        }
        self.handle.run_now(name, options).await
    }

    pub async fn status(&self) -> AutomationStatus {
        AutomationStatus {
            scheduler: self.handle.status().await,
            modules: ModuleStatus {
                notifications: self.notifications.status(),
                health: self.health.summary(),
                backup: self.backup.status(),
                deployment: self.deployment.status(),
                content: self.content.as_ref().map(|c| c.state()),
                cleanup_rules: self.cleanup.rules().iter().map(|r| r.name.clone()).collect(),
            },
        }
    }
}

use platform_automation::app::Automation;
use platform_automation::config::{AppConfig, CliConfig, EnvVars, FileConfig};
use std::path::PathBuf;
use tempfile::TempDir;

/// Health probes that would reach the network are disabled.
const TEST_CONFIG: &str = r#"
[health]
network_endpoints = []

[scheduler]
grace_period_secs = 1
"#;

/// A fully initialized [`Automation`] rooted in a temporary directory.
pub struct TestAutomation {
    pub automation: Automation,
    pub data_dir: PathBuf,
    _temp_dir: TempDir,
}

impl TestAutomation {
    pub async fn spawn() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_path = temp_dir.path().join("automation.toml");
        std::fs::write(&config_path, TEST_CONFIG).expect("Failed to write test config");
        let file_config = FileConfig::load(&config_path).expect("Failed to load test config");

        let data_dir = temp_dir.path().join("data");
        let cli = CliConfig {
            data_dir: Some(data_dir.clone()),
        };
        let config = AppConfig::resolve(&cli, Some(file_config), &EnvVars::new())
            .expect("Failed to resolve test config");
        let automation = Automation::initialize(config)
            .await
            .expect("Failed to initialize automation");

        Self {
            automation,
            data_dir,
            _temp_dir: temp_dir,
        }
    }
}

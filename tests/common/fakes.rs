use async_trait::async_trait;
use platform_automation::deployment::{CommandOutput, CommandRunner, CommandSpec, ReachabilityProbe};
use platform_automation::error::AutomationResult;
use platform_automation::notifications::{Channel, ChannelError, Notification, NotificationChannel};
use std::path::Path;
use std::sync::Mutex;

/// Channel that accepts everything and keeps the titles it was given.
#[allow(dead_code)]
pub struct RecordingChannel {
    kind: Channel,
    pub delivered: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl RecordingChannel {
    pub fn new(kind: Channel) -> Self {
        Self {
            kind,
            delivered: Mutex::new(Vec::new()),
        }
    }

    pub fn count(&self) -> usize {
        self.delivered.lock().unwrap().len()
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    fn kind(&self) -> Channel {
        self.kind
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), ChannelError> {
        self.delivered
            .lock()
            .unwrap()
            .push(notification.title.clone());
        Ok(())
    }
}

/// Answers git with a fixed branch and a clean tree; every other command succeeds.
#[allow(dead_code)]
pub struct ScriptedRunner {
    pub branch: String,
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec, _cwd: &Path) -> AutomationResult<CommandOutput> {
        let stdout = match (spec.program.as_str(), spec.args.first().map(String::as_str)) {
            ("git", Some("rev-parse")) if spec.args.get(1).map(String::as_str) == Some("--abbrev-ref") => {
                format!("{}\n", self.branch)
            }
            ("git", Some("rev-parse")) => "feedc0dedeadbeef\n".to_string(),
            ("git", _) => String::new(),
            _ => "Production: https://staging.example.com\n".to_string(),
        };
        Ok(CommandOutput {
            exit_code: Some(0),
            stdout,
            stderr: String::new(),
        })
    }
}

#[allow(dead_code)]
pub struct StaticProbe(pub u16);

#[async_trait]
impl ReachabilityProbe for StaticProbe {
    async fn probe(&self, _url: &str) -> Result<u16, String> {
        Ok(self.0)
    }
}

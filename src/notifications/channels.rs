//! Outbound delivery channels.

use super::models::{Channel, Notification, NotificationType, Priority};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Channel misconfigured: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// A single delivery target. Implementations only deliver; rate limiting,
/// fan-out and persistence happen in the service.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn kind(&self) -> Channel;

    async fn deliver(&self, notification: &Notification) -> Result<(), ChannelError>;
}

fn type_prefix(t: NotificationType) -> &'static str {
    match t {
        NotificationType::Info => "[INFO]",
        NotificationType::Success => "[OK]",
        NotificationType::Warning => "[WARN]",
        NotificationType::Error => "[ERROR]",
        NotificationType::Critical => "[CRITICAL]",
    }
}

/// SMTP mail channel.
pub struct EmailChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
    default_recipient: String,
}

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
    pub default_recipient: String,
}

impl EmailChannel {
    pub fn new(settings: &SmtpSettings) -> Result<Self, ChannelError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
            .map_err(|e| ChannelError::Config(format!("SMTP relay {}: {}", settings.host, e)))?
            .port(settings.port)
            .timeout(Some(Duration::from_secs(30)));
        if let (Some(user), Some(pass)) = (&settings.username, &settings.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }
        Ok(Self {
            transport: builder.build(),
            from: settings.from.clone(),
            default_recipient: settings.default_recipient.clone(),
        })
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn kind(&self) -> Channel {
        Channel::Email
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), ChannelError> {
        let to = notification
            .recipient
            .as_deref()
            .unwrap_or(&self.default_recipient);
        let subject = format!(
            "{} {}",
            type_prefix(notification.notification_type),
            notification.title
        );
        let message = Message::builder()
            .from(
                self.from
                    .parse()
                    .map_err(|e| ChannelError::Config(format!("Invalid from address: {}", e)))?,
            )
            .to(to
                .parse()
                .map_err(|e| ChannelError::Config(format!("Invalid recipient {}: {}", to, e)))?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(notification.message.clone())
            .map_err(|e| ChannelError::Config(format!("Failed to build message: {}", e)))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| ChannelError::Transport(format!("SMTP send failed: {}", e)))?;
        info!("Email notification sent: {}", notification.title);
        Ok(())
    }
}

/// Telegram Bot API `sendMessage` channel.
pub struct TelegramChannel {
    client: reqwest::Client,
    api_base: String,
    bot_token: String,
    chat_id: String,
}

impl TelegramChannel {
    pub fn new(bot_token: &str, chat_id: &str) -> Self {
        Self::with_api_base("https://api.telegram.org", bot_token, chat_id)
    }

    pub fn with_api_base(api_base: &str, bot_token: &str, chat_id: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            bot_token: bot_token.to_string(),
            chat_id: chat_id.to_string(),
        }
    }
}

/// Escape Telegram Markdown V1 special characters.
fn escape_markdown(s: &str) -> String {
    s.replace('_', "\\_")
        .replace('*', "\\*")
        .replace('[', "\\[")
        .replace('`', "\\`")
}

#[async_trait]
impl NotificationChannel for TelegramChannel {
    fn kind(&self) -> Channel {
        Channel::Telegram
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), ChannelError> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, self.bot_token);
        let text = format!(
            "{} *{}*\n\n{}\n\n_{}_",
            type_prefix(notification.notification_type),
            escape_markdown(&notification.title),
            escape_markdown(&notification.message),
            notification.created_at.format("%Y-%m-%d %H:%M:%S UTC")
        );

        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": self.chat_id,
                "text": text,
                "parse_mode": "Markdown",
            }))
            .timeout(HTTP_TIMEOUT)
            .send()
            .await
            .map_err(|e| ChannelError::Transport(format!("Telegram send failed: {}", e)))?;

        if resp.status().is_success() {
            info!("Telegram notification sent: {}", notification.title);
            Ok(())
        } else {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            Err(ChannelError::Rejected { status, body })
        }
    }
}

/// Discord webhook channel.
pub struct DiscordChannel {
    client: reqwest::Client,
    webhook_url: String,
}

impl DiscordChannel {
    pub fn new(webhook_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url: webhook_url.to_string(),
        }
    }
}

fn embed_color(priority: Priority) -> u32 {
    match priority {
        Priority::Critical => 0xFF0000,
        Priority::High => 0xFF8800,
        Priority::Normal => 0x00AAFF,
        Priority::Low => 0x888888,
    }
}

#[async_trait]
impl NotificationChannel for DiscordChannel {
    fn kind(&self) -> Channel {
        Channel::Discord
    }

    async fn deliver(&self, notification: &Notification) -> Result<(), ChannelError> {
        let resp = self
            .client
            .post(&self.webhook_url)
            .json(&serde_json::json!({
                "embeds": [{
                    "title": format!("{} {}", type_prefix(notification.notification_type), notification.title),
                    "description": notification.message,
                    "color": embed_color(notification.priority),
                    "timestamp": notification.created_at.to_rfc3339(),
                }]
            }))
            .timeout(HTTP_TIMEOUT)
            .send()
            .await
            .map_err(|e| ChannelError::Transport(format!("Discord send failed: {}", e)))?;

        if resp.status().is_success() {
            info!("Discord notification sent: {}", notification.title);
            Ok(())
        } else {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            Err(ChannelError::Rejected { status, body })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_markdown() {
        assert_eq!(escape_markdown("a_b*c[d`e"), "a\\_b\\*c\\[d\\`e");
    }

    #[tokio::test]
    async fn test_email_channel_rejects_bad_from_address() {
        let settings = SmtpSettings {
            host: "localhost".to_string(),
            port: 2525,
            username: None,
            password: None,
            from: "not an address".to_string(),
            default_recipient: "ops@example.com".to_string(),
        };
        let channel = EmailChannel::new(&settings).unwrap();
        let notification = Notification::new(NotificationType::Info, "t", "m", vec![Channel::Email]);
        let err = channel.deliver(&notification).await.unwrap_err();
        assert!(matches!(err, ChannelError::Config(_)));
    }
}

//! Multi-channel notifications with rate limiting and templates.

pub mod channels;
mod models;
pub mod rate_limiter;
mod service;
pub mod templates;

pub use channels::{
    ChannelError, DiscordChannel, EmailChannel, NotificationChannel, SmtpSettings, TelegramChannel,
};
pub use models::*;
pub use rate_limiter::{FixedWindowRateLimiter, RateLimit};
pub use service::{default_rate_limits, NotificationService, NotificationServiceStatus};
pub use templates::{MessageTemplate, TemplateRegistry};

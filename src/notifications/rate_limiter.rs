//! Fixed-window rate limiting per notification channel.
//!
//! Each channel has a counter that resets to zero when its window elapses.
//! A burst right after a reset is allowed up to the full limit.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Limit for one channel: at most `max_requests` per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub max_requests: u32,
    pub window: Duration,
}

impl RateLimit {
    pub fn per_minute(max_requests: u32) -> Self {
        Self {
            max_requests,
            window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct WindowState {
    started_at: Instant,
    count: u32,
}

/// Snapshot of a channel's current window, for status output.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RateLimitSnapshot {
    pub channel: String,
    pub limit: u32,
    pub window_secs: u64,
    pub used: u32,
}

pub struct FixedWindowRateLimiter {
    limits: HashMap<String, RateLimit>,
    windows: Mutex<HashMap<String, WindowState>>,
}

impl FixedWindowRateLimiter {
    pub fn new(limits: HashMap<String, RateLimit>) -> Self {
        Self {
            limits,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Try to consume one slot on `channel`. Returns `Err(retry_after)` at the limit.
    /// Channels without a configured limit are never limited.
    pub fn try_acquire(&self, channel: &str) -> Result<(), Duration> {
        self.try_acquire_at(channel, Instant::now())
    }

    pub fn try_acquire_at(&self, channel: &str, now: Instant) -> Result<(), Duration> {
        let Some(limit) = self.limits.get(channel).copied() else {
            return Ok(());
        };

        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let state = windows.entry(channel.to_string()).or_insert(WindowState {
            started_at: now,
            count: 0,
        });

        let elapsed = now.saturating_duration_since(state.started_at);
        if elapsed >= limit.window {
            state.started_at = now;
            state.count = 0;
        }

        if state.count >= limit.max_requests {
            let retry_after = limit
                .window
                .saturating_sub(now.saturating_duration_since(state.started_at));
            return Err(retry_after);
        }

        state.count += 1;
        Ok(())
    }

    pub fn snapshot(&self) -> Vec<RateLimitSnapshot> {
        let windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();
        let mut out: Vec<RateLimitSnapshot> = self
            .limits
            .iter()
            .map(|(channel, limit)| {
                let used = windows
                    .get(channel)
                    .filter(|w| now.saturating_duration_since(w.started_at) < limit.window)
                    .map(|w| w.count)
                    .unwrap_or(0);
                RateLimitSnapshot {
                    channel: channel.clone(),
                    limit: limit.max_requests,
                    window_secs: limit.window.as_secs(),
                    used,
                }
            })
            .collect();
        out.sort_by(|a, b| a.channel.cmp(&b.channel));
        out
    }
}

use crate::error::AutomationError;
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;

/// A parsed cron trigger.
///
/// Accepts classic five-field expressions (minute first) by prefixing a zero
/// seconds field; six- and seven-field expressions are passed through.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: Schedule,
}

impl CronSchedule {
    pub fn parse(expr: &str) -> Result<Self, AutomationError> {
        let trimmed = expr.trim();
        let fields = trimmed.split_whitespace().count();
        let normalized = match fields {
            5 => format!("0 {}", trimmed),
            6 | 7 => trimmed.to_string(),
            n => {
                return Err(AutomationError::Config(format!(
                    "cron expression '{}' has {} fields, expected 5, 6 or 7",
                    expr, n
                )))
            }
        };
        let schedule = Schedule::from_str(&normalized).map_err(|e| {
            AutomationError::Config(format!("invalid cron expression '{}': {}", expr, e))
        })?;
        Ok(Self {
            expression: trimmed.to_string(),
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_five_field_is_normalized() {
        let schedule = CronSchedule::parse("30 2 * * *").unwrap();
        let base = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let next = schedule.next_after(base).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 1, 2, 30, 0).unwrap());
        assert_eq!(schedule.expression(), "30 2 * * *");
    }

    #[test]
    fn test_six_field_passes_through() {
        let schedule = CronSchedule::parse("*/10 * * * * *").unwrap();
        let base = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 1).unwrap();
        assert_eq!(
            schedule.next_after(base).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 10).unwrap()
        );
    }

    #[test]
    fn test_every_five_minutes() {
        let schedule = CronSchedule::parse("*/5 * * * *").unwrap();
        let base = Utc.with_ymd_and_hms(2024, 3, 1, 10, 2, 0).unwrap();
        assert_eq!(
            schedule.next_after(base).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 5, 0).unwrap()
        );
    }

    #[test]
    fn test_invalid_expressions() {
        assert!(matches!(
            CronSchedule::parse("* *"),
            Err(AutomationError::Config(_))
        ));
        assert!(matches!(
            CronSchedule::parse("99 * * * *"),
            Err(AutomationError::Config(_))
        ));
        assert!(CronSchedule::parse("").is_err());
    }
}

//! Schedule expressions.
//!
//! Two forms are accepted:
//!
//! - an interval: `30s`, `15m`, `@every 2h`, `every 500ms`
//! - a cron expression: five fields (minute resolution), six or seven
//!   fields (seconds first), or an alias such as `@hourly`

use crate::errors::ScheduleError;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

#[allow(clippy::expect_used)]
fn duration_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^(\d+)\s*(ms|s|m|h|d)$").expect("valid duration pattern"))
}

/// A parsed recurrence.
#[derive(Debug, Clone)]
pub enum Schedule {
    /// Fires every fixed period.
    Interval(Duration),
    /// Fires at the times matched by a cron expression (UTC).
    Cron(Box<cron::Schedule>),
}

impl Schedule {
    /// Parses an interval or cron expression.
    ///
    /// # Errors
    ///
    /// Returns `ScheduleError` naming the expression when it is neither.
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let expr = expression.trim();
        if expr.is_empty() {
            return Err(ScheduleError::new(expression, "expression is empty"));
        }

        if let Some(rest) = expr
            .strip_prefix("@every ")
            .or_else(|| expr.strip_prefix("every "))
        {
            return parse_duration(rest.trim())
                .map(Self::Interval)
                .map_err(|reason| ScheduleError::new(expression, reason));
        }

        if duration_pattern().is_match(expr) {
            return parse_duration(expr)
                .map(Self::Interval)
                .map_err(|reason| ScheduleError::new(expression, reason));
        }

        let normalized = if expr.starts_with('@') {
            expr.to_string()
        } else {
            match expr.split_whitespace().count() {
                5 => format!("0 {expr}"),
                6 | 7 => expr.to_string(),
                n => {
                    return Err(ScheduleError::new(
                        expression,
                        format!("expected a duration or a 5 to 7 field cron expression, got {n} fields"),
                    ))
                }
            }
        };

        cron::Schedule::from_str(&normalized)
            .map(|s| Self::Cron(Box::new(s)))
            .map_err(|e| ScheduleError::new(expression, e.to_string()))
    }

    /// Creates an interval schedule from milliseconds.
    ///
    /// # Errors
    ///
    /// Returns `ScheduleError` for a zero interval.
    pub fn from_interval_ms(ms: u64) -> Result<Self, ScheduleError> {
        if ms == 0 {
            return Err(ScheduleError::new("0", "interval must be greater than zero"));
        }
        Ok(Self::Interval(Duration::from_millis(ms)))
    }

    /// Time to wait from `now` until the next firing.
    ///
    /// Returns `None` when a cron expression has no future occurrence.
    #[must_use]
    pub fn next_delay(&self, now: DateTime<Utc>) -> Option<Duration> {
        match self {
            Self::Interval(period) => Some(*period),
            Self::Cron(schedule) => {
                let next = schedule.after(&now).next()?;
                Some((next - now).to_std().unwrap_or(Duration::ZERO))
            }
        }
    }
}

fn parse_duration(text: &str) -> Result<Duration, String> {
    let caps = duration_pattern()
        .captures(text)
        .ok_or_else(|| format!("'{text}' is not a duration such as 30s or 5m"))?;
    let value: u64 = caps[1]
        .parse()
        .map_err(|_| format!("'{}' is out of range", &caps[1]))?;
    if value == 0 {
        return Err("interval must be greater than zero".to_string());
    }
    let unit_ms: u64 = match &caps[2] {
        "ms" => 1,
        "s" => 1000,
        "m" => 60_000,
        "h" => 3_600_000,
        _ => 86_400_000,
    };
    value
        .checked_mul(unit_ms)
        .map(Duration::from_millis)
        .ok_or_else(|| format!("'{text}' is out of range"))
}

//! Schedule expressions for the domain monitor jobs
//!
//! Supports the predefined descriptors understood by most cron
//! implementations plus fixed intervals:
//!
//! | expression | fires |
//! |---|---|
//! | `@yearly`, `@annually` | 00:00 UTC on January 1st |
//! | `@monthly` | 00:00 UTC on the first day of the month |
//! | `@weekly` | 00:00 UTC on Sunday |
//! | `@daily`, `@midnight` | 00:00 UTC every day |
//! | `@hourly` | at the top of every hour |
//! | `@every 1h30m` | every fixed interval, counted from the previous run |
//! | `0 */6 * * *` | standard five-field cron expression, evaluated in UTC |

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveDate, TimeDelta, Utc};
use croner::Cron;
use thiserror::Error;

const SECONDS_PER_HOUR: i64 = 3600;
const SECONDS_PER_DAY: i64 = 86_400;

/// Errors produced while parsing a schedule expression
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("schedule expression is empty")]
    Empty,

    #[error("unsupported schedule expression '{0}' (expected @hourly, @daily, @weekly, @monthly, @yearly, @every <duration> or a cron expression)")]
    Unsupported(String),

    #[error("invalid cron expression '{expression}': {message}")]
    InvalidCron { expression: String, message: String },

    #[error("invalid duration '{0}' (expected e.g. 30m, 1h30m, 45s)")]
    InvalidDuration(String),
}

/// A parsed five-field cron expression
#[derive(Clone)]
pub struct CronSchedule {
    expression: String,
    cron: Arc<Cron>,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, ScheduleError> {
        let expression = expression.split_whitespace().collect::<Vec<_>>().join(" ");
        let cron = Cron::new(&expression)
            .parse()
            .map_err(|e| ScheduleError::InvalidCron {
                expression: expression.clone(),
                message: e.to_string(),
            })?;

        Ok(Self {
            expression,
            cron: Arc::new(cron),
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        // An expression that never matches again (e.g. `0 0 30 2 *`) never fires
        self.cron
            .find_next_occurrence(&now, false)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl PartialEq for CronSchedule {
    fn eq(&self, other: &Self) -> bool {
        self.expression == other.expression
    }
}

impl Eq for CronSchedule {}

impl fmt::Debug for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CronSchedule").field(&self.expression).finish()
    }
}

/// A recurring schedule shared by every monitored domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    /// Fixed interval between runs
    Every(Duration),
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
    Cron(CronSchedule),
}

impl Schedule {
    /// Compute the next firing strictly after `now`
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let ts = now.timestamp();
        match self {
            Schedule::Every(interval) => {
                let step = TimeDelta::from_std(*interval).unwrap_or(TimeDelta::MAX);
                now.checked_add_signed(step).unwrap_or(DateTime::<Utc>::MAX_UTC)
            }
            Schedule::Hourly => at_timestamp((ts.div_euclid(SECONDS_PER_HOUR) + 1) * SECONDS_PER_HOUR),
            Schedule::Daily => at_timestamp((ts.div_euclid(SECONDS_PER_DAY) + 1) * SECONDS_PER_DAY),
            Schedule::Weekly => {
                let day = ts.div_euclid(SECONDS_PER_DAY);
                // 1970-01-01 was a Thursday; Sunday is weekday 0
                let weekday = (day + 4).rem_euclid(7);
                at_timestamp((day + 7 - weekday) * SECONDS_PER_DAY)
            }
            Schedule::Monthly => {
                let (year, month) = if now.month() == 12 {
                    (now.year() + 1, 1)
                } else {
                    (now.year(), now.month() + 1)
                };
                midnight(year, month, 1)
            }
            Schedule::Yearly => midnight(now.year() + 1, 1, 1),
            Schedule::Cron(cron) => cron.next_after(now),
        }
    }

    /// Time to wait from `now` until the next firing
    pub fn delay_from(&self, now: DateTime<Utc>) -> Duration {
        (self.next_after(now) - now).to_std().unwrap_or(Duration::ZERO)
    }
}

fn at_timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn midnight(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

impl FromStr for Schedule {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let expr = s.trim();
        if expr.is_empty() {
            return Err(ScheduleError::Empty);
        }

        if let Some(rest) = expr.strip_prefix("@every") {
            let rest = rest.trim();
            if rest.is_empty() {
                return Err(ScheduleError::InvalidDuration(rest.to_string()));
            }
            return parse_duration(rest).map(Schedule::Every);
        }

        match expr.to_ascii_lowercase().as_str() {
            "@hourly" => Ok(Schedule::Hourly),
            "@daily" | "@midnight" => Ok(Schedule::Daily),
            "@weekly" => Ok(Schedule::Weekly),
            "@monthly" => Ok(Schedule::Monthly),
            "@yearly" | "@annually" => Ok(Schedule::Yearly),
            descriptor if descriptor.starts_with('@') => {
                Err(ScheduleError::Unsupported(expr.to_string()))
            }
            _ => CronSchedule::parse(expr).map(Schedule::Cron),
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Every(interval) => write!(f, "@every {}", format_duration(*interval)),
            Schedule::Hourly => f.write_str("@hourly"),
            Schedule::Daily => f.write_str("@daily"),
            Schedule::Weekly => f.write_str("@weekly"),
            Schedule::Monthly => f.write_str("@monthly"),
            Schedule::Yearly => f.write_str("@yearly"),
            Schedule::Cron(cron) => f.write_str(cron.expression()),
        }
    }
}

/// Parse durations like `1h30m`, `90s` or `2h`
///
/// Only whole numbers with `h`, `m` and `s` units are accepted, and the
/// total must be at least one second.
pub fn parse_duration(input: &str) -> Result<Duration, ScheduleError> {
    let invalid = || ScheduleError::InvalidDuration(input.to_string());

    let mut total: u64 = 0;
    let mut digits = String::new();
    let mut saw_unit = false;

    for c in input.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }

        let multiplier = match c {
            'h' => 3600,
            'm' => 60,
            's' => 1,
            _ => return Err(invalid()),
        };
        if digits.is_empty() {
            return Err(invalid());
        }
        let value: u64 = digits.parse().map_err(|_| invalid())?;
        total = value
            .checked_mul(multiplier)
            .and_then(|secs| total.checked_add(secs))
            .ok_or_else(invalid)?;
        digits.clear();
        saw_unit = true;
    }

    if !digits.is_empty() || !saw_unit || total == 0 {
        return Err(invalid());
    }

    Ok(Duration::from_secs(total))
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    let mut out = String::new();
    if h > 0 {
        out.push_str(&format!("{}h", h));
    }
    if m > 0 {
        out.push_str(&format!("{}m", m));
    }
    if s > 0 || out.is_empty() {
        out.push_str(&format!("{}s", s));
    }
    out
}

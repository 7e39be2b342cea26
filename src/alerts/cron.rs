//! Minute-granularity cron due-checks for alert schedules.

use std::str::FromStr;

use chrono::{DateTime, Duration, DurationRound, Utc};
use cron::Schedule;

/// Cron evaluation errors
#[derive(Debug, thiserror::Error)]
pub enum CronError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },
}

impl CronError {
    fn invalid(expression: &str, reason: impl Into<String>) -> Self {
        CronError::InvalidExpression {
            expression: expression.to_string(),
            reason: reason.into(),
        }
    }
}

/// Check whether `expression` matches the minute containing `now`.
///
/// Five-field expressions (`min hour dom month dow`) use standard cron
/// day-of-week numbering, where both 0 and 7 mean Sunday. Six and seven
/// field expressions and `@hourly`-style macros are passed to the `cron`
/// crate untouched.
pub fn is_due(expression: &str, now: DateTime<Utc>) -> Result<bool, CronError> {
    let schedule = parse(expression)?;
    let minute = now
        .duration_trunc(Duration::minutes(1))
        .map_err(|e| CronError::invalid(expression, e.to_string()))?;

    // `after` is exclusive, so start one second before the minute boundary.
    let probe = minute - Duration::seconds(1);
    Ok(schedule
        .after(&probe)
        .next()
        .map(|fire| fire == minute)
        .unwrap_or(false))
}

/// Parse an expression without evaluating it.
pub fn validate(expression: &str) -> Result<(), CronError> {
    parse(expression).map(|_| ())
}

fn parse(expression: &str) -> Result<Schedule, CronError> {
    let normalized = normalize(expression)?;
    Schedule::from_str(&normalized).map_err(|e| CronError::invalid(expression, e.to_string()))
}

/// Convert a standard 5-field expression into the 6-field form the `cron`
/// crate expects (seconds first, Sunday = 1).
fn normalize(expression: &str) -> Result<String, CronError> {
    let trimmed = expression.trim();
    if trimmed.is_empty() {
        return Err(CronError::invalid(expression, "empty expression"));
    }
    if trimmed.starts_with('@') {
        return Ok(trimmed.to_string());
    }

    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    if fields.len() != 5 {
        return Ok(trimmed.to_string());
    }

    let day_of_week = normalize_day_of_week(fields[4])
        .ok_or_else(|| CronError::invalid(expression, "invalid day-of-week field"))?;

    Ok(format!(
        "0 {} {} {} {} {}",
        fields[0], fields[1], fields[2], fields[3], day_of_week
    ))
}

fn normalize_day_of_week(field: &str) -> Option<String> {
    let mut parts = Vec::new();
    for element in field.split(',') {
        let (range, step) = match element.split_once('/') {
            Some((range, step)) => (range, Some(step)),
            None => (element, None),
        };
        let with_step = |r: String| match step {
            Some(s) => format!("{}/{}", r, s),
            None => r,
        };

        match range.split_once('-') {
            Some((start, end)) => match (start.parse::<u32>(), end.parse::<u32>()) {
                (Ok(start), Ok(end)) => {
                    let (from, to) = (shift_weekday(start)?, shift_weekday(end)?);
                    if from <= to {
                        parts.push(with_step(format!("{}-{}", from, to)));
                    } else if step.is_none() {
                        // Ranges ending on Sunday (e.g. 5-7) wrap past Saturday.
                        parts.push(format!("{}-7", from));
                        parts.push(format!("1-{}", to));
                    } else {
                        return None;
                    }
                }
                (Err(_), Err(_)) => parts.push(element.to_string()),
                _ => return None,
            },
            None => match range.parse::<u32>() {
                Ok(day) => parts.push(with_step(shift_weekday(day)?.to_string())),
                Err(_) => parts.push(element.to_string()),
            },
        }
    }
    Some(parts.join(","))
}

fn shift_weekday(day: u32) -> Option<u32> {
    (day <= 7).then_some(day % 7 + 1)
}

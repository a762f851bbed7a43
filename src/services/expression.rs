use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use crate::errors::{HarvestError, HarvestResult};

/// Parse a cron expression into a schedule.
///
/// Five fields are standard crontab (`min hour dom month dow`, Sunday is 0
/// or 7). Six or seven fields are taken as-is with leading seconds.
pub fn parse_schedule(expression: &str) -> HarvestResult<Schedule> {
    let normalized = normalize_expression(expression)?;
    Schedule::from_str(&normalized)
        .map_err(|e| HarvestError::InvalidSchedule(format!("{}: {e}", expression.trim())))
}

pub fn next_run_for(expression: &str, from: DateTime<Utc>) -> HarvestResult<DateTime<Utc>> {
    let schedule = parse_schedule(expression)?;
    next_after(&schedule, from).ok_or_else(|| {
        HarvestError::InvalidSchedule(format!("{}: no future occurrence", expression.trim()))
    })
}

pub fn next_after(schedule: &Schedule, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    schedule.after(&from).next()
}

fn normalize_expression(expression: &str) -> HarvestResult<String> {
    let expression = expression.trim();
    let fields: Vec<&str> = expression.split_whitespace().collect();

    match fields.len() {
        5 => {
            let day_of_week = translate_day_of_week(fields[4])
                .map_err(|e| HarvestError::InvalidSchedule(format!("{expression}: {e}")))?;
            Ok(format!(
                "0 {} {} {} {} {}",
                fields[0], fields[1], fields[2], fields[3], day_of_week
            ))
        }
        6 | 7 => Ok(expression.to_string()),
        count => Err(HarvestError::InvalidSchedule(format!(
            "{expression} (expected 5, 6, or 7 fields, got {count})"
        ))),
    }
}

/// Crontab counts weekdays 0-7 from Sunday; the cron crate counts 1-7.
fn translate_day_of_week(field: &str) -> Result<String, String> {
    if field == "*" || field == "?" || field.chars().any(|c| c.is_ascii_alphabetic()) {
        return Ok(field.to_string());
    }

    let mut days = BTreeSet::new();
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("invalid day-of-week step '{step}'"))?;
                if step == 0 {
                    return Err("day-of-week step must be positive".to_string());
                }
                (range, step)
            }
            None => (part, 1),
        };

        let (start, end) = match range {
            "*" => (0, 6),
            _ => match range.split_once('-') {
                Some((a, b)) => (parse_day(a)?, parse_day(b)?),
                None => {
                    let day = parse_day(range)?;
                    (day, if step > 1 { 6 } else { day })
                }
            },
        };
        if start > end {
            return Err(format!("invalid day-of-week range '{range}'"));
        }

        for day in (start..=end).step_by(step as usize) {
            days.insert(day % 7 + 1);
        }
    }

    Ok(days
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(","))
}

fn parse_day(raw: &str) -> Result<u32, String> {
    match raw.parse::<u32>() {
        Ok(day) if day <= 7 => Ok(day),
        _ => Err(format!("invalid day of week '{raw}'")),
    }
}

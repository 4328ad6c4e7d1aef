//! Pure calendar arithmetic for recurrence rules.
//!
//! Everything in this module is a function of its arguments alone: no clock,
//! no I/O. The generator injects "today" explicitly where a floor is needed,
//! so re-running any computation with the same inputs reproduces the same
//! occurrence set.

use chrono::{Datelike, Duration, Months, NaiveDate};
use std::collections::HashSet;

use crate::error::CoreError;
use crate::models::{Frequency, RecurrenceRule};

/// Configuration for instance-buffer maintenance.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// Always keep at least this many not-yet-past occurrences materialized.
    pub min_buffer: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self { min_buffer: 12 }
    }
}

/// Validates that a rule is internally coherent before it is persisted.
///
/// Weekly rules need a weekday set, monthly rules need a day of month, and
/// daily/yearly rules must carry neither.
pub fn validate_rule(rule: &RecurrenceRule) -> Result<(), CoreError> {
    if rule.interval < 1 {
        return Err(CoreError::InvalidInput(
            "Recurrence interval must be at least 1".to_string(),
        ));
    }
    if let Some(end) = rule.end_date {
        if end < rule.start_date {
            return Err(CoreError::InvalidInput(format!(
                "Recurrence end date {} precedes start date {}",
                end, rule.start_date
            )));
        }
    }
    match rule.frequency {
        Frequency::Weekly => {
            if rule.days_of_week.is_empty() {
                return Err(CoreError::InvalidInput(
                    "Weekly recurrence requires at least one day of week".to_string(),
                ));
            }
            if let Some(&day) = rule.days_of_week.iter().find(|&&d| d > 6) {
                return Err(CoreError::InvalidInput(format!(
                    "Invalid day of week {day}: expected 0 (Sunday) through 6 (Saturday)"
                )));
            }
            if rule.day_of_month.is_some() {
                return Err(CoreError::InvalidInput(
                    "day_of_month is only valid for monthly recurrence".to_string(),
                ));
            }
        }
        Frequency::Monthly => {
            match rule.day_of_month {
                Some(day) if (1..=31).contains(&day) => {}
                Some(day) => {
                    return Err(CoreError::InvalidInput(format!(
                        "Invalid day of month {day}: expected 1 through 31"
                    )));
                }
                None => {
                    return Err(CoreError::InvalidInput(
                        "Monthly recurrence requires a day of month".to_string(),
                    ));
                }
            }
            if !rule.days_of_week.is_empty() {
                return Err(CoreError::InvalidInput(
                    "days_of_week is only valid for weekly recurrence".to_string(),
                ));
            }
        }
        Frequency::Daily | Frequency::Yearly => {
            if !rule.days_of_week.is_empty() || rule.day_of_month.is_some() {
                return Err(CoreError::InvalidInput(format!(
                    "{} recurrence must not set days_of_week or day_of_month",
                    rule.frequency
                )));
            }
        }
    }
    Ok(())
}

/// Does `date` itself satisfy the rule's shape, ignoring interval stepping?
///
/// Empty/unset weekday and day-of-month constraints fall back to `true` so
/// that a rule degraded by bad data still advances instead of matching
/// nothing.
pub fn matches_pattern(rule: &RecurrenceRule, date: NaiveDate) -> bool {
    match rule.frequency {
        Frequency::Daily | Frequency::Yearly => true,
        Frequency::Weekly => {
            if rule.days_of_week.is_empty() {
                true
            } else {
                rule.days_of_week
                    .contains(&(date.weekday().num_days_from_sunday() as u8))
            }
        }
        Frequency::Monthly => match rule.day_of_month {
            Some(day) => date.day() == day,
            None => true,
        },
    }
}

/// Advances from `from` to the next valid occurrence date, respecting the
/// rule's interval.
///
/// Monthly rules clamp to the target month's length: requesting day 31 in a
/// 30-day month yields day 30, never a roll-over into the following month.
/// Weekly cycles are anchored to the rule's start date so that "every 2 weeks
/// on Mon/Wed" keeps a stable global cadence no matter when generation runs.
pub fn next_occurrence(rule: &RecurrenceRule, from: NaiveDate) -> NaiveDate {
    match rule.frequency {
        Frequency::Daily => from + Duration::days(i64::from(rule.interval)),
        Frequency::Yearly => from
            .checked_add_months(Months::new(12 * rule.interval))
            .unwrap_or(from),
        Frequency::Monthly => {
            let shifted = from
                .checked_add_months(Months::new(rule.interval))
                .unwrap_or(from);
            match rule.day_of_month {
                Some(day) => {
                    let clamped = day.min(days_in_month(shifted.year(), shifted.month()));
                    shifted.with_day(clamped).unwrap_or(shifted)
                }
                None => shifted,
            }
        }
        Frequency::Weekly => next_weekly_occurrence(rule, from),
    }
}

fn next_weekly_occurrence(rule: &RecurrenceRule, from: NaiveDate) -> NaiveDate {
    if rule.days_of_week.is_empty() {
        // Degraded rule: keep the same weekday, step whole cycles.
        return from + Duration::days(7 * i64::from(rule.interval));
    }
    let mut days = rule.days_of_week.clone();
    days.sort_unstable();
    days.dedup();

    // A zero interval would stall the cycle arithmetic below; the iteration
    // cap in calculate_occurrences handles the daily/monthly equivalents.
    let interval = i64::from(rule.interval.max(1));
    let from_dow = from.weekday().num_days_from_sunday() as u8;

    // Later matching weekday inside the same calendar week and cycle.
    if let Some(&day) = days.iter().find(|&&d| d > from_dow) {
        let candidate = from + Duration::days(i64::from(day - from_dow));
        if cycle_index(rule.start_date, candidate, interval)
            == cycle_index(rule.start_date, from, interval)
        {
            return candidate;
        }
    }

    // First matching weekday of the next cycle week, with week boundaries
    // aligned to the rule's start date.
    let next_cycle = cycle_index(rule.start_date, from, interval) + 1;
    let week_start = rule.start_date + Duration::days(next_cycle * interval * 7);
    let week_start_dow = i64::from(week_start.weekday().num_days_from_sunday());
    let offset = days
        .first()
        .map(|&d| (i64::from(d) - week_start_dow).rem_euclid(7))
        .unwrap_or(0);
    week_start + Duration::days(offset)
}

/// Index of the interval-aligned block of weeks containing `date`, anchored
/// to `start`.
fn cycle_index(start: NaiveDate, date: NaiveDate, interval_weeks: i64) -> i64 {
    let weeks = date.signed_duration_since(start).num_days().div_euclid(7);
    weeks.div_euclid(interval_weeks)
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    first_of_next
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

/// Computes up to `count` new occurrence dates for a rule.
///
/// Starts at the rule's start date, includes it when it matches the pattern,
/// then steps forward with [`next_occurrence`]. Dates already present in
/// `existing` are skipped without consuming the budget; dates past the rule's
/// end date stop the scan. `not_before` is an optional floor (injected
/// "today") used by the buffer and reactivation paths so dormant periods are
/// never backfilled.
///
/// A safety cap of `count * 100` iterations guards against corrupted rules
/// that can never advance; hitting it simply yields fewer dates than asked.
pub fn calculate_occurrences(
    rule: &RecurrenceRule,
    count: usize,
    existing: &HashSet<NaiveDate>,
    not_before: Option<NaiveDate>,
) -> Vec<NaiveDate> {
    let mut dates = Vec::with_capacity(count);
    if count == 0 {
        return dates;
    }

    let mut seen = existing.clone();
    let within_end = |d: NaiveDate| rule.end_date.map_or(true, |end| d <= end);
    let within_floor = |d: NaiveDate| not_before.map_or(true, |floor| d >= floor);

    let mut current = rule.start_date;
    if matches_pattern(rule, current)
        && within_end(current)
        && within_floor(current)
        && seen.insert(current)
    {
        dates.push(current);
    }

    let cap = count.saturating_mul(100);
    let mut iterations = 0;
    while dates.len() < count && iterations < cap {
        iterations += 1;
        let next = next_occurrence(rule, current);
        if !within_end(next) {
            break;
        }
        if within_floor(next) && seen.insert(next) {
            dates.push(next);
        }
        current = next;
    }

    dates
}

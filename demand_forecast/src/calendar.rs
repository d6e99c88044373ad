//! Weekly calendar helpers
//!
//! Weeks are identified by their Monday. All aggregation snaps dates onto
//! that grid first.

use crate::error::{DemandError, Result};
use chrono::{Datelike, Duration, NaiveDate};
use std::f64::consts::PI;

/// Monday of the week containing `date`
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

/// ISO week number (1..=53)
pub fn week_of_year(date: NaiveDate) -> u32 {
    date.iso_week().week()
}

/// Contiguous Monday grid covering `[start, end]`
pub fn weekly_grid(start: NaiveDate, end: NaiveDate) -> Result<Vec<NaiveDate>> {
    let first = week_start(start);
    if end < first {
        return Err(DemandError::ValidationError(format!(
            "Calendar end {} precedes start {}",
            end, start
        )));
    }
    let mut weeks = Vec::new();
    let mut current = first;
    while current <= end {
        weeks.push(current);
        current += Duration::weeks(1);
    }
    Ok(weeks)
}

/// `horizon` Mondays following `last_week`
pub fn future_weeks(last_week: NaiveDate, horizon: usize) -> Vec<NaiveDate> {
    let mut current = week_start(last_week);
    (0..horizon)
        .map(|_| {
            current += Duration::weeks(1);
            current
        })
        .collect()
}

/// Whole weeks from `from` to `to` (negative when `to` is earlier)
pub fn weeks_between(from: NaiveDate, to: NaiveDate) -> i64 {
    (to - from).num_days().div_euclid(7)
}

/// Parse a date cell, accepting `YYYY-MM-DD` with an optional time suffix
pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    let trimmed = raw.trim();
    let date_part = trimmed.get(..10).unwrap_or(trimmed);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .map_err(|e| DemandError::DataError(format!("Cannot parse date '{}': {}", raw, e)))
}

/// Calendar features of one week, in [`CALENDAR_COLUMNS`] order
pub fn calendar_features(week: NaiveDate) -> [f64; 5] {
    let woy = week_of_year(week) as f64;
    [
        week.year() as f64,
        woy,
        week.month() as f64,
        (2.0 * PI * woy / 52.0).sin(),
        (2.0 * PI * woy / 52.0).cos(),
    ]
}

/// Column names matching [`calendar_features`]
pub const CALENDAR_COLUMNS: [&str; 5] = ["year", "weekofyear", "month", "sin_week", "cos_week"];

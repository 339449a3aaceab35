//! Reporting periods processed by a run
//!
//! A run always covers three months: the one in progress and the two before it.
//! Everything here is pure so the calendar logic can be tested without a browser.

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Month codes used in artifact names, independent of the host locale.
const MONTH_CODES: [&str; 12] = [
    "JAN", "FEV", "MAR", "ABR", "MAI", "JUN", "JUL", "AGO", "SET", "OUT", "NOV", "DEZ",
];

/// Number of months covered by one run.
pub const PERIODS_PER_RUN: usize = 3;

/// A month to request a report for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReportingPeriod {
    /// Day 1 of the month for past months, the run date for the current month.
    pub reference_date: NaiveDate,
    pub is_current_month: bool,
}

impl ReportingPeriod {
    pub fn current(now: NaiveDate) -> Self {
        Self {
            reference_date: now,
            is_current_month: true,
        }
    }

    pub fn past(date: NaiveDate) -> Self {
        Self {
            reference_date: month_start(date),
            is_current_month: false,
        }
    }

    /// First day of the reference month.
    pub fn month_start(&self) -> NaiveDate {
        month_start(self.reference_date)
    }

    /// The period immediately before this one.
    pub fn previous(&self) -> Self {
        Self::past(self.month_start() - Duration::days(1))
    }

    /// Human readable month for log lines, e.g. `March/2024`.
    pub fn display_name(&self) -> String {
        self.reference_date.format("%B/%Y").to_string()
    }
}

impl fmt::Display for ReportingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", format_label(self))
    }
}

/// Inclusive start/end used to parameterize a report request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// The current month followed by the two previous months.
pub fn compute_periods(now: NaiveDate) -> [ReportingPeriod; PERIODS_PER_RUN] {
    let current = ReportingPeriod::current(now);
    let previous = current.previous();
    let before_previous = previous.previous();
    [current, previous, before_previous]
}

/// Ends at `now` for the current month, otherwise at the month's last day.
pub fn derive_range(period: &ReportingPeriod, now: NaiveDate) -> DateRange {
    let start = period.month_start();
    let end = if period.is_current_month {
        now
    } else {
        last_day_of_month(start)
    };
    DateRange { start, end }
}

/// `DEZ2024` style label used as the artifact base name.
pub fn format_label(period: &ReportingPeriod) -> String {
    let date = period.reference_date;
    format!("{}{:04}", MONTH_CODES[date.month0() as usize], date.year())
}

/// Six digit `DDMMYY` date as typed into the report form.
pub fn format_form_date(date: NaiveDate) -> String {
    date.format("%d%m%y").to_string()
}

fn month_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.day0()))
}

fn last_day_of_month(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|next| next.pred_opt())
        .unwrap_or(date)
}

//! Loan date policy: parsing, ordering, duration and overdue rules.
//!
//! Dates are calendar dates without a timezone. Durations are inclusive:
//! a tool lent and returned on the same day was out for one day.

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{TrackerError, TrackerResult};

/// An open loan older than this many days is overdue.
pub const OVERDUE_AFTER_DAYS: i64 = 30;

/// Wire format for loan dates.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Inclusive day count of a loan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanDuration {
    pub days: i64,
    /// `true` when the loan is still open and `days` was measured
    /// against today.
    pub ongoing: bool,
}

/// The current local calendar date.
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Parse a caller-supplied `YYYY-MM-DD` date.
pub fn parse_date(raw: &str) -> TrackerResult<NaiveDate> {
    let trimmed = raw.trim();
    NaiveDate::parse_from_str(trimmed, DATE_FORMAT)
        .map_err(|e| TrackerError::invalid_date(format!("'{trimmed}' is not a valid date: {e}")))
}

/// Parse an optional date, falling back to today.
pub fn parse_date_or_today(raw: Option<&str>) -> TrackerResult<NaiveDate> {
    match raw {
        Some(raw) => parse_date(raw),
        None => Ok(today()),
    }
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// `lent_on` must not come after `returned_on`.
pub fn check_order(lent_on: NaiveDate, returned_on: Option<NaiveDate>) -> TrackerResult<()> {
    match returned_on {
        Some(returned_on) if returned_on < lent_on => Err(TrackerError::invalid_date(format!(
            "returned on {returned_on} is before lent on {lent_on}"
        ))),
        _ => Ok(()),
    }
}

pub fn duration(
    lent_on: NaiveDate,
    returned_on: Option<NaiveDate>,
    today: NaiveDate,
) -> LoanDuration {
    let end = returned_on.unwrap_or(today);
    LoanDuration {
        days: (end - lent_on).num_days() + 1,
        ongoing: returned_on.is_none(),
    }
}

pub fn is_overdue(lent_on: NaiveDate, returned_on: Option<NaiveDate>, today: NaiveDate) -> bool {
    returned_on.is_none() && (today - lent_on).num_days() > OVERDUE_AFTER_DAYS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(raw: &str) -> NaiveDate {
        parse_date(raw).unwrap()
    }

    #[test]
    fn same_day_loan_lasts_one_day() {
        let dur = duration(d("2024-01-01"), Some(d("2024-01-01")), d("2024-06-01"));
        assert_eq!(dur, LoanDuration { days: 1, ongoing: false });
    }

    #[test]
    fn closed_loan_counts_both_ends() {
        let dur = duration(d("2024-01-01"), Some(d("2024-01-03")), d("2024-06-01"));
        assert_eq!(dur.days, 3);
        assert!(!dur.ongoing);
    }

    #[test]
    fn open_loan_is_measured_against_today() {
        let dur = duration(d("2024-02-27"), None, d("2024-03-01"));
        // 2024 is a leap year: 27, 28, 29 Feb and 1 Mar.
        assert_eq!(dur, LoanDuration { days: 4, ongoing: true });
    }

    #[test]
    fn overdue_only_after_thirty_full_days() {
        let lent = d("2024-01-01");
        assert!(!is_overdue(lent, None, d("2024-01-31")));
        assert!(is_overdue(lent, None, d("2024-02-01")));
        assert!(!is_overdue(lent, Some(d("2024-03-01")), d("2024-06-01")));
    }

    #[test]
    fn rejects_malformed_dates() {
        for raw in ["2024-02-30", "2024-13-01", "01/02/2024", "", "yesterday"] {
            assert!(
                matches!(parse_date(raw), Err(TrackerError::InvalidDate { .. })),
                "{raw:?} should be rejected"
            );
        }
        assert_eq!(d(" 2024-02-29 "), NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
    }

    #[test]
    fn return_before_lend_is_invalid() {
        assert!(check_order(d("2024-01-02"), Some(d("2024-01-01"))).is_err());
        assert!(check_order(d("2024-01-02"), Some(d("2024-01-02"))).is_ok());
        assert!(check_order(d("2024-01-02"), None).is_ok());
    }

    #[test]
    fn format_round_trips_through_parse() {
        let date = d("2023-11-05");
        assert_eq!(format_date(date), "2023-11-05");
    }
}

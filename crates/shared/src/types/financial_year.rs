//! Financial year keys.
//!
//! The institution's financial year runs from 1 April to 31 March and is
//! written as `"YYYY-YYYY"` (e.g. `"2024-2025"`).

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// First month of the financial year (April).
const FIRST_MONTH: u32 = 4;

/// Earliest supported start year; both years must print as four digits.
pub const MIN_START_YEAR: i32 = 1000;
/// Latest supported start year.
pub const MAX_START_YEAR: i32 = 9998;

/// Error returned when parsing a financial year string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FinancialYearError {
    /// Input is not of the form `YYYY-YYYY`.
    #[error("Financial year must be in format YYYY-YYYY, got '{0}'")]
    Format(String),

    /// The two years are not consecutive.
    #[error("Financial year {start}-{end} does not span consecutive years")]
    NotConsecutive {
        /// First year in the input.
        start: i32,
        /// Second year in the input.
        end: i32,
    },

    /// The start year does not fit the `YYYY-YYYY` form.
    #[error("Financial year starting {0} is outside 1000..=9998")]
    OutOfRange(i32),
}

/// A financial year, identified by the calendar year in which it starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FinancialYear {
    start_year: i32,
}

impl FinancialYear {
    /// Creates the financial year starting in April of `start_year`.
    ///
    /// The year is not range-checked; use [`FinancialYear::try_starting`]
    /// for untrusted input.
    #[must_use]
    pub const fn starting(start_year: i32) -> Self {
        Self { start_year }
    }

    /// Creates the financial year starting in `start_year`, if it can be
    /// written as `YYYY-YYYY`.
    pub const fn try_starting(start_year: i32) -> Result<Self, FinancialYearError> {
        if start_year < MIN_START_YEAR || start_year > MAX_START_YEAR {
            return Err(FinancialYearError::OutOfRange(start_year));
        }
        Ok(Self { start_year })
    }

    /// Returns the financial year a date falls into.
    pub fn containing(date: NaiveDate) -> Result<Self, FinancialYearError> {
        let year = date.year();
        if date.month() >= FIRST_MONTH {
            Self::try_starting(year)
        } else {
            Self::try_starting(year - 1)
        }
    }

    /// Calendar year in which this financial year starts.
    #[must_use]
    pub const fn start_year(self) -> i32 {
        self.start_year
    }

    /// Calendar year in which this financial year ends.
    #[must_use]
    pub const fn end_year(self) -> i32 {
        self.start_year + 1
    }
}

impl fmt::Display for FinancialYear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:04}", self.start_year, self.end_year())
    }
}

impl FromStr for FinancialYear {
    type Err = FinancialYearError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let format_err = || FinancialYearError::Format(s.to_string());

        let (start, end) = s.trim().split_once('-').ok_or_else(format_err)?;
        let is_year = |part: &str| part.len() == 4 && part.bytes().all(|b| b.is_ascii_digit());
        if !is_year(start) || !is_year(end) {
            return Err(format_err());
        }
        let start: i32 = start.parse().map_err(|_| format_err())?;
        let end: i32 = end.parse().map_err(|_| format_err())?;

        if end != start + 1 {
            return Err(FinancialYearError::NotConsecutive { start, end });
        }

        Self::try_starting(start)
    }
}

impl TryFrom<String> for FinancialYear {
    type Error = FinancialYearError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FinancialYear> for String {
    fn from(value: FinancialYear) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(2024, 4, 1, "2024-2025")]
    #[case(2024, 12, 31, "2024-2025")]
    #[case(2025, 3, 31, "2024-2025")]
    #[case(2025, 1, 15, "2024-2025")]
    #[case(2025, 4, 1, "2025-2026")]
    fn test_containing_date(
        #[case] year: i32,
        #[case] month: u32,
        #[case] day: u32,
        #[case] expected: &str,
    ) {
        let date = NaiveDate::from_ymd_opt(year, month, day).unwrap();
        assert_eq!(FinancialYear::containing(date).unwrap().to_string(), expected);
    }

    #[test]
    fn test_containing_rejects_years_past_four_digits() {
        let date = NaiveDate::from_ymd_opt(9999, 6, 1).unwrap();
        assert_eq!(
            FinancialYear::containing(date),
            Err(FinancialYearError::OutOfRange(9999))
        );

        let last = NaiveDate::from_ymd_opt(9999, 3, 31).unwrap();
        let fy = FinancialYear::containing(last).unwrap();
        assert_eq!(fy.to_string().parse::<FinancialYear>(), Ok(fy));

        let early = NaiveDate::from_ymd_opt(999, 12, 1).unwrap();
        assert!(FinancialYear::containing(early).is_err());
    }

    #[test]
    fn test_parse_valid() {
        let fy: FinancialYear = "2024-2025".parse().unwrap();
        assert_eq!(fy.start_year(), 2024);
        assert_eq!(fy.end_year(), 2025);
    }

    #[rstest]
    #[case("2024")]
    #[case("24-25")]
    #[case("2024-25")]
    #[case("abcd-efgh")]
    #[case("+123-0124")]
    #[case("-123-0124")]
    #[case(" 123-0124")]
    #[case("2024-+025")]
    #[case("")]
    fn test_parse_bad_format(#[case] input: &str) {
        assert!(matches!(
            input.parse::<FinancialYear>(),
            Err(FinancialYearError::Format(_))
        ));
    }

    #[test]
    fn test_parse_not_consecutive() {
        assert_eq!(
            "2024-2026".parse::<FinancialYear>(),
            Err(FinancialYearError::NotConsecutive {
                start: 2024,
                end: 2026
            })
        );
    }

    #[test]
    fn test_serde_as_string() {
        let fy = FinancialYear::starting(2023);
        let json = serde_json::to_string(&fy).unwrap();
        assert_eq!(json, "\"2023-2024\"");

        let back: FinancialYear = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fy);
        assert!(serde_json::from_str::<FinancialYear>("\"2023-2025\"").is_err());
    }
}

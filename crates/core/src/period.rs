use chrono::{Datelike, Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Inclusive calendar date interval. Ordered by start date, then end date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.start, self.end)
    }
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        DateRange { start, end }
    }

    pub fn day(date: NaiveDate) -> Self {
        DateRange::new(date, date)
    }

    pub fn contains(self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DateFilterError {
    #[error("Invalid date expression: '{0}'")]
    Invalid(String),
    #[error("Date range ends before it starts: '{0}'")]
    Reversed(String),
}

/// Parses `YYYY`, `YYYY/MM` or `YYYY/MM/DD` (`-` also accepted as separator)
/// into the range of days it covers.
fn parse_partial_date(s: &str) -> Result<DateRange, DateFilterError> {
    let invalid = || DateFilterError::Invalid(s.to_string());
    let parts = s
        .trim()
        .split(['/', '-'])
        .map(|p| p.parse::<u32>().map_err(|_| invalid()))
        .collect::<Result<Vec<_>, _>>()?;

    match parts.as_slice() {
        [year] => {
            let start = NaiveDate::from_ymd_opt(*year as i32, 1, 1).ok_or_else(invalid)?;
            Ok(Period::Yearly.bucket(start))
        }
        [year, month] => {
            let start = NaiveDate::from_ymd_opt(*year as i32, *month, 1).ok_or_else(invalid)?;
            Ok(Period::Monthly.bucket(start))
        }
        [year, month, day] => {
            let date = NaiveDate::from_ymd_opt(*year as i32, *month, *day).ok_or_else(invalid)?;
            Ok(DateRange::day(date))
        }
        _ => Err(invalid()),
    }
}

impl FromStr for DateRange {
    type Err = DateFilterError;

    /// `2021/03` covers March 2021; `2021/01..2021/03` covers January 1st
    /// through March 31st.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once("..") {
            Some((lower, upper)) => {
                let start = parse_partial_date(lower)?.start;
                let end = parse_partial_date(upper)?.end;
                if end < start {
                    return Err(DateFilterError::Reversed(s.to_string()));
                }
                Ok(DateRange::new(start, end))
            }
            None => parse_partial_date(s),
        }
    }
}

/// Date constraint used by record filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateFilter {
    /// Within the last N days of the latest date present, inclusive.
    LastDays(u32),
    Range(DateRange),
}

impl DateFilter {
    pub fn matches(self, date: NaiveDate, latest: NaiveDate) -> bool {
        match self {
            DateFilter::LastDays(days) => (latest - date).num_days() <= i64::from(days),
            DateFilter::Range(range) => range.contains(date),
        }
    }
}

/// Calendar bucket width. Weeks start on Monday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Period::Daily => write!(f, "daily"),
            Period::Weekly => write!(f, "weekly"),
            Period::Monthly => write!(f, "monthly"),
            Period::Yearly => write!(f, "yearly"),
        }
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "daily" | "day" => Ok(Period::Daily),
            "weekly" | "week" => Ok(Period::Weekly),
            "monthly" | "month" => Ok(Period::Monthly),
            "yearly" | "year" => Ok(Period::Yearly),
            other => Err(format!("Unknown period: '{other}'")),
        }
    }
}

impl Period {
    /// The bucket containing `date`.
    pub fn bucket(self, date: NaiveDate) -> DateRange {
        let start = match self {
            Period::Daily => date,
            Period::Weekly => date - Days::new(u64::from(date.weekday().num_days_from_monday())),
            Period::Monthly => date - Days::new(u64::from(date.day0())),
            Period::Yearly => date - Days::new(u64::from(date.ordinal0())),
        };
        let next = match self {
            Period::Daily => start.checked_add_days(Days::new(1)),
            Period::Weekly => start.checked_add_days(Days::new(7)),
            Period::Monthly => start.checked_add_months(Months::new(1)),
            Period::Yearly => start.checked_add_months(Months::new(12)),
        };
        let end = next
            .and_then(|n| n.pred_opt())
            .unwrap_or(NaiveDate::MAX);
        DateRange::new(start, end)
    }

    /// Every bucket from the one holding `first` through the one holding
    /// `last`, including buckets no record falls into.
    pub fn buckets(self, first: NaiveDate, last: NaiveDate) -> Vec<DateRange> {
        let mut out = Vec::new();
        let mut current = self.bucket(first);
        loop {
            out.push(current);
            if current.end >= last {
                break;
            }
            match current.end.succ_opt() {
                Some(next) => current = self.bucket(next),
                None => break,
            }
        }
        out
    }
}

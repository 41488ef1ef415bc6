//! ISO-8601 recurrence periods
//!
//! A calendar-aware subset of ISO-8601 durations: years, months, days and
//! hours. Weeks are normalised to days on construction (`P2W` parses but
//! renders as `P14D`), matching how provider recurrence units are mapped.

use crate::{Result, TypesError};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Days used when approximating a month or year as a fixed duration.
/// Kept as plain integers so the approximation is deterministic.
const DAYS_PER_MONTH: i64 = 30;
const DAYS_PER_YEAR: i64 = 365;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Period {
    years: u32,
    months: u32,
    days: u32,
    hours: u32,
}

impl Period {
    pub fn ymd(years: u32, months: u32, days: u32) -> Self {
        Self { years, months, days, hours: 0 }
    }

    pub fn hours(hours: u32) -> Self {
        Self { years: 0, months: 0, days: 0, hours }
    }

    pub fn days(days: u32) -> Self {
        Self::ymd(0, 0, days)
    }

    pub fn weeks(weeks: u32) -> Self {
        Self::ymd(0, 0, 7 * weeks)
    }

    pub fn months(months: u32) -> Self {
        Self::ymd(0, months, 0)
    }

    pub fn years(years: u32) -> Self {
        Self::ymd(years, 0, 0)
    }

    /// One month, the default series frequency
    pub fn monthly() -> Self {
        Self::months(1)
    }

    /// Fixed-length approximation used for stagnation checks
    pub fn approx_duration(&self) -> Duration {
        Duration::hours(self.hours as i64)
            + Duration::days(
                self.days as i64
                    + self.months as i64 * DAYS_PER_MONTH
                    + self.years as i64 * DAYS_PER_YEAR,
            )
    }

    pub fn is_zero(&self) -> bool {
        self.years == 0 && self.months == 0 && self.days == 0 && self.hours == 0
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return write!(f, "P0D");
        }
        write!(f, "P")?;
        if self.years > 0 {
            write!(f, "{}Y", self.years)?;
        }
        if self.months > 0 {
            write!(f, "{}M", self.months)?;
        }
        if self.days > 0 {
            write!(f, "{}D", self.days)?;
        }
        if self.hours > 0 {
            write!(f, "T{}H", self.hours)?;
        }
        Ok(())
    }
}

impl FromStr for Period {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || TypesError::InvalidPeriod(s.to_string());

        let rest = s.strip_prefix('P').ok_or_else(invalid)?;
        let (date_part, time_part) = match rest.split_once('T') {
            Some((d, t)) => (d, Some(t)),
            None => (rest, None),
        };

        let mut period = Period::ymd(0, 0, 0);
        let mut seen_any = false;

        let mut number = String::new();
        for c in date_part.chars() {
            if c.is_ascii_digit() {
                number.push(c);
                continue;
            }
            let n: u32 = number.parse().map_err(|_| invalid())?;
            number.clear();
            seen_any = true;
            match c {
                'Y' => period.years = n,
                'M' => period.months = n,
                'W' => period.days += 7 * n,
                'D' => period.days += n,
                _ => return Err(invalid()),
            }
        }
        if !number.is_empty() {
            return Err(invalid());
        }

        if let Some(time_part) = time_part {
            for c in time_part.chars() {
                if c.is_ascii_digit() {
                    number.push(c);
                    continue;
                }
                let n: u32 = number.parse().map_err(|_| invalid())?;
                number.clear();
                seen_any = true;
                match c {
                    'H' => period.hours = n,
                    _ => return Err(invalid()),
                }
            }
            if !number.is_empty() {
                return Err(invalid());
            }
        }

        // "P0D" is fine, a bare "P" is not
        if !seen_any {
            return Err(invalid());
        }

        Ok(period)
    }
}

impl TryFrom<String> for Period {
    type Error = TypesError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Period> for String {
    fn from(period: Period) -> Self {
        period.to_string()
    }
}

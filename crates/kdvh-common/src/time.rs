//! Time handling for dumped observations and calendar offsets.

use chrono::{DateTime, Datelike, Days, Duration, Months, NaiveDateTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{MigrationError, MigrationResult};

/// Timestamp layout used in dump files, e.g. `2020-01-01_00:00:00`.
pub const DUMP_TIME_FORMAT: &str = "%Y-%m-%d_%H:%M:%S";

/// Format a timestamp the way dump files store it.
pub fn format_dump_time(time: &DateTime<Utc>) -> String {
    time.format(DUMP_TIME_FORMAT).to_string()
}

/// Parse a dump file timestamp (always UTC).
pub fn parse_dump_time(s: &str) -> MigrationResult<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s.trim(), DUMP_TIME_FORMAT)
        .map(|ndt| Utc.from_utc_datetime(&ndt))
        .map_err(|_| MigrationError::InvalidTimestamp(s.to_string()))
}

/// Signed ISO-8601 period (`PnYnMnWnDTnHnMnS`).
///
/// Unlike [`chrono::Duration`] the calendar components are kept apart, so
/// adding `P1M` to the 31st of January lands on the last day of February
/// instead of drifting by a fixed number of seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Period {
    pub years: i64,
    pub months: i64,
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
}

impl Period {
    pub const ZERO: Period = Period {
        years: 0,
        months: 0,
        days: 0,
        hours: 0,
        minutes: 0,
        seconds: 0,
    };

    pub fn hours(hours: i64) -> Self {
        Self { hours, ..Self::ZERO }
    }

    pub fn days(days: i64) -> Self {
        Self { days, ..Self::ZERO }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Parse an ISO-8601 period such as `P1D`, `-PT6H` or `P1Y2M3DT4H5M6S`.
    ///
    /// A leading sign applies to every component; individual components may
    /// also carry their own sign (`P-1DT6H`).
    pub fn parse(s: &str) -> MigrationResult<Self> {
        let invalid = || MigrationError::InvalidPeriod(s.to_string());
        let trimmed = s.trim();

        let (negate, rest) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
        };
        let body = rest
            .strip_prefix('P')
            .or_else(|| rest.strip_prefix('p'))
            .ok_or_else(invalid)?;
        if body.is_empty() {
            return Err(invalid());
        }

        let mut period = Period::ZERO;
        let mut in_time = false;
        let mut number = String::new();
        let mut seen_component = false;

        for c in body.chars() {
            match c {
                'T' | 't' => {
                    if in_time || !number.is_empty() {
                        return Err(invalid());
                    }
                    in_time = true;
                }
                '-' | '+' | '0'..='9' => number.push(c),
                _ => {
                    let value: i64 = number.parse().map_err(|_| invalid())?;
                    number.clear();
                    seen_component = true;
                    match (c.to_ascii_uppercase(), in_time) {
                        ('Y', false) => period.years += value,
                        ('M', false) => period.months += value,
                        ('W', false) => {
                            period.days += value.checked_mul(7).ok_or_else(invalid)?
                        }
                        ('D', false) => period.days += value,
                        ('H', true) => period.hours += value,
                        ('M', true) => period.minutes += value,
                        ('S', true) => period.seconds += value,
                        _ => return Err(invalid()),
                    }
                }
            }
        }

        if !number.is_empty() || !seen_component {
            return Err(invalid());
        }

        Ok(if negate { period.negated() } else { period })
    }

    pub fn negated(&self) -> Self {
        Self {
            years: -self.years,
            months: -self.months,
            days: -self.days,
            hours: -self.hours,
            minutes: -self.minutes,
            seconds: -self.seconds,
        }
    }

    /// Component-wise sum of two periods. `None` on overflow.
    pub fn checked_add(&self, other: &Period) -> Option<Period> {
        Some(Period {
            years: self.years.checked_add(other.years)?,
            months: self.months.checked_add(other.months)?,
            days: self.days.checked_add(other.days)?,
            hours: self.hours.checked_add(other.hours)?,
            minutes: self.minutes.checked_add(other.minutes)?,
            seconds: self.seconds.checked_add(other.seconds)?,
        })
    }

    /// Calendar-aware addition: months (and years) first, then days, then
    /// the clock components.
    pub fn add_to(&self, time: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let months = self.years.checked_mul(12)?.checked_add(self.months)?;
        let magnitude = u32::try_from(months.unsigned_abs()).ok()?;
        let time = if months >= 0 {
            time.checked_add_months(Months::new(magnitude))?
        } else {
            time.checked_sub_months(Months::new(magnitude))?
        };

        let days = Days::new(self.days.unsigned_abs());
        let time = if self.days >= 0 {
            time.checked_add_days(days)?
        } else {
            time.checked_sub_days(days)?
        };

        let clock = Duration::try_hours(self.hours)?
            .checked_add(&Duration::try_minutes(self.minutes)?)?
            .checked_add(&Duration::try_seconds(self.seconds)?)?;
        time.checked_add_signed(clock)
    }
}

impl FromStr for Period {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Period::parse(s)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return write!(f, "P0D");
        }
        write!(f, "P")?;
        for (value, unit) in [(self.years, 'Y'), (self.months, 'M'), (self.days, 'D')] {
            if value != 0 {
                write!(f, "{}{}", value, unit)?;
            }
        }
        if self.hours != 0 || self.minutes != 0 || self.seconds != 0 {
            write!(f, "T")?;
            for (value, unit) in [(self.hours, 'H'), (self.minutes, 'M'), (self.seconds, 'S')] {
                if value != 0 {
                    write!(f, "{}{}", value, unit)?;
                }
            }
        }
        Ok(())
    }
}

/// Hour of day helper used by the hour-sensitive flag family.
pub fn hour_of_day(time: &DateTime<Utc>) -> u32 {
    time.hour()
}

/// Calendar year of an observation, compared against table cutoffs.
pub fn year_of(time: &DateTime<Utc>) -> i32 {
    time.year()
}

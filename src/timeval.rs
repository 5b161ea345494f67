// This file is part of the pcapslice package.
//
// For the full copyright and license information, please view the LICENSE
// file that was distributed with this source code.
// spell-checker:ignore (vars) usec usecs mday

//! Record timestamps and the calendar arithmetic behind the time grammar.

use chrono::{DateTime, Datelike, Local, Timelike};
use std::fmt;
use std::ops::{Add, Sub};

use crate::error::SliceError;

/// A capture timestamp: seconds since the epoch plus microseconds.
///
/// The derived ordering is lexicographic on `(sec, usec)`, which is the
/// chronological order as long as `usec` stays normalized to
/// `[0, 999_999]`. The arithmetic below maintains that invariant, carrying
/// and borrowing at one million; deltas with a negative seconds part still
/// keep a normalized, non-negative `usec`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timeval {
    pub sec: i64,
    pub usec: u32,
}

pub const MICROS_PER_SEC: u32 = 1_000_000;

impl Timeval {
    pub const fn new(sec: i64, usec: u32) -> Self {
        Self { sec, usec }
    }

    /// `self - earlier` in seconds, as a float. Used for position
    /// interpolation, where microsecond exactness does not matter.
    pub fn diff_seconds(self, earlier: Timeval) -> f64 {
        (self.sec - earlier.sec) as f64
            + (f64::from(self.usec) - f64::from(earlier.usec)) / f64::from(MICROS_PER_SEC)
    }
}

impl Add for Timeval {
    type Output = Timeval;

    fn add(self, rhs: Timeval) -> Timeval {
        let mut sec = self.sec + rhs.sec;
        let mut usec = self.usec + rhs.usec;
        if usec >= MICROS_PER_SEC {
            usec -= MICROS_PER_SEC;
            sec += 1;
        }
        Timeval { sec, usec }
    }
}

impl Sub for Timeval {
    type Output = Timeval;

    fn sub(self, rhs: Timeval) -> Timeval {
        let mut sec = self.sec - rhs.sec;
        let usec = if self.usec < rhs.usec {
            sec -= 1;
            self.usec + MICROS_PER_SEC - rhs.usec
        } else {
            self.usec - rhs.usec
        };
        Timeval { sec, usec }
    }
}

impl fmt::Display for Timeval {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{:06}", self.sec, self.usec)
    }
}

/// Broken-down calendar time. `month` and `day` are 1-based.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CalendarTime {
    pub year: i64,
    pub month: i64,
    pub day: i64,
    pub hour: i64,
    pub minute: i64,
    pub second: i64,
}

const DAYS_IN_MONTH: [i64; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

fn is_leap_year(year: i64) -> bool {
    year % 4 == 0 && (year % 100 != 0 || year % 400 == 0)
}

impl CalendarTime {
    /// The local-time breakdown of `tv`.
    pub fn from_local(tv: Timeval) -> Self {
        let t = local_datetime(tv.sec);
        Self {
            year: i64::from(t.year()),
            month: i64::from(t.month()),
            day: i64::from(t.day()),
            hour: i64::from(t.hour()),
            minute: i64::from(t.minute()),
            second: i64::from(t.second()),
        }
    }

    /// Checks every field against its calendar range, reporting the first
    /// offender. Years outside [1970, 2069] are not representable in the
    /// supported capture window.
    pub fn validate(&self) -> Result<(), SliceError> {
        let checks: [(&'static str, i64, i64, i64); 6] = [
            ("year", self.year, 1970, 2069),
            ("month", self.month, 1, 12),
            ("day", self.day, 1, 31),
            ("hour", self.hour, 0, 23),
            ("minute", self.minute, 0, 59),
            ("second", self.second, 0, 59),
        ];
        for (field, value, lo, hi) in checks {
            if value < lo || value > hi {
                return Err(SliceError::TimeFieldRange { field, value });
            }
        }
        Ok(())
    }

    /// Folds the fields, taken as UTC, into seconds since the epoch by
    /// accumulating whole years and months since 1970-01-01.
    ///
    /// Callers must validate first; the month indexes a fixed table.
    pub fn unix_seconds(&self) -> i64 {
        let mut days: i64 = 0;
        for year in 1970..self.year {
            days += if is_leap_year(year) { 366 } else { 365 };
        }
        for month in 1..self.month {
            days += DAYS_IN_MONTH[(month - 1) as usize];
        }
        if is_leap_year(self.year) && self.month > 2 {
            days += 1;
        }
        days += self.day - 1;
        days * 86_400 + self.hour * 3_600 + self.minute * 60 + self.second
    }
}

fn local_datetime(sec: i64) -> DateTime<Local> {
    DateTime::from_timestamp(sec, 0)
        .unwrap_or_default()
        .with_timezone(&Local)
}

/// Seconds to add to UTC to get local time at the given instant.
pub fn local_utc_offset(sec: i64) -> i64 {
    i64::from(local_datetime(sec).offset().local_minus_utc())
}

/// Style in which to print timestamps. `Raw` is `secs.usecs`; `Readable`
/// is ala the Unix `date` tool; `Parseable` is a custom format designed to
/// be accepted back by the time grammar.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimestampStyle {
    Raw,
    Readable,
    Parseable,
}

pub fn timestamp_to_string(tv: Timeval, style: TimestampStyle) -> String {
    match style {
        TimestampStyle::Raw => tv.to_string(),
        TimestampStyle::Readable => local_datetime(tv.sec)
            .format("%a %b %e %H:%M:%S %Y")
            .to_string(),
        TimestampStyle::Parseable => {
            let t = local_datetime(tv.sec);
            format!(
                "{:04}y{:02}m{:02}d{:02}h{:02}m{:02}s{:06}u",
                t.year(),
                t.month(),
                t.day(),
                t.hour(),
                t.minute(),
                t.second(),
                tv.usec
            )
        }
    }
}

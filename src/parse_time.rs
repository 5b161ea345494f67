// This file is part of the pcapslice package.
//
// For the full copyright and license information, please view the LICENSE
// file that was distributed with this source code.
// spell-checker:ignore (vars) usec usecs

//! The time grammar: raw `secs.usecs` stamps and structured
//! `<amount><unit>` expressions, both absolute and relative to a base time.

use crate::error::SliceError;
use crate::timeval::{local_utc_offset, CalendarTime, Timeval, MICROS_PER_SEC};

/// Units of the structured grammar, ordered by magnitude.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Unit {
    Micro,
    Second,
    Minute,
    Hour,
    Day,
    Month,
    Year,
}

#[derive(Clone, Copy, Debug)]
struct Token {
    amount: i64,
    unit: Unit,
    /// Byte offset of the token in the expression, for diagnostics.
    at: usize,
}

/// One token per unit at most.
const MAX_TOKENS: usize = 7;

fn bad_format(spec: &str, at: &str) -> SliceError {
    SliceError::BadTimeFormat {
        spec: spec.to_string(),
        at: at.to_string(),
    }
}

/// Returns true if `spec` is a well-formed time expression: the leading
/// positional arguments that pass this test are taken as the time window,
/// everything else is a filename.
pub fn is_time_spec(spec: &str) -> bool {
    let (_, body) = split_delta(spec);
    if body.is_empty() {
        return false;
    }
    if is_raw_timestamp(body) {
        parse_raw(spec, body).is_ok()
    } else {
        scan_tokens(spec, body).is_ok()
    }
}

/// Interprets `spec` against `base`, which supplies both the reference
/// point for `+` deltas and the defaults for fields a structured
/// expression leaves out.
pub fn parse_time(spec: &str, base: Timeval) -> Result<Timeval, SliceError> {
    let (is_delta, body) = split_delta(spec);
    if body.is_empty() {
        return Err(bad_format(spec, spec));
    }

    if is_raw_timestamp(body) {
        let tv = parse_raw(spec, body)?;
        return Ok(if is_delta { tv + base } else { tv });
    }

    let tokens = scan_tokens(spec, body)?;
    let (cal, micro) = if is_delta {
        let (mut cal, micro) = apply_delta(&tokens, base);
        // Added month counts may run past December; carry them into the
        // year so the fold stays within its table.
        cal.year += (cal.month - 1).div_euclid(12);
        cal.month = (cal.month - 1).rem_euclid(12) + 1;
        (cal, micro)
    } else {
        let (cal, micro) = resolve_absolute(&tokens, base)?;
        cal.validate()?;
        (cal, micro)
    };

    let mut sec = cal.unix_seconds();
    sec -= local_utc_offset(sec);
    sec += micro / i64::from(MICROS_PER_SEC);
    let usec = (micro % i64::from(MICROS_PER_SEC)) as u32;
    Ok(Timeval::new(sec, usec))
}

fn split_delta(spec: &str) -> (bool, &str) {
    match spec.strip_prefix('+') {
        Some(rest) => (true, rest),
        None => (false, spec),
    }
}

fn is_raw_timestamp(body: &str) -> bool {
    body.chars().all(|c| c.is_ascii_digit() || c == '.')
}

/// `digits` or `digits.digits`: seconds bounded by 2³¹−1, at most six
/// fraction digits, right-padded to microseconds.
fn parse_raw(spec: &str, body: &str) -> Result<Timeval, SliceError> {
    let (int_part, frac_part) = match body.split_once('.') {
        None => (body, None),
        Some((int_part, frac_part)) => {
            if frac_part.contains('.') {
                return Err(bad_format(spec, body));
            }
            (int_part, Some(frac_part))
        }
    };
    if int_part.is_empty() {
        return Err(bad_format(spec, body));
    }
    let sec: i64 = int_part.parse().map_err(|_| bad_format(spec, body))?;
    if sec > i64::from(i32::MAX) {
        return Err(bad_format(spec, body));
    }
    let usec = match frac_part {
        None => 0,
        Some(frac) => {
            if frac.is_empty() || frac.len() > 6 {
                return Err(bad_format(spec, body));
            }
            let digits: u32 = frac.parse().map_err(|_| bad_format(spec, body))?;
            digits * 10u32.pow(6 - frac.len() as u32)
        }
    };
    Ok(Timeval::new(sec, usec))
}

/// Lexes `<amount><unit>` tokens and checks the grammar: known units,
/// strictly decreasing magnitude (which also rules out repeats), at most
/// seven tokens. The unit letter `m` reads as months only when a day
/// token follows later in the expression, otherwise as minutes.
fn scan_tokens(spec: &str, body: &str) -> Result<Vec<Token>, SliceError> {
    let bytes = body.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i == start {
            return Err(bad_format(spec, &body[start..]));
        }
        let amount: i64 = body[start..i]
            .parse()
            .map_err(|_| bad_format(spec, &body[start..]))?;
        if amount > i64::from(i32::MAX) {
            return Err(bad_format(spec, &body[start..]));
        }
        let Some(&unit_byte) = bytes.get(i) else {
            return Err(bad_format(spec, &body[start..]));
        };
        i += 1;
        let unit = match unit_byte.to_ascii_lowercase() {
            b'y' => Unit::Year,
            b'm' => {
                if body[i..].contains(['d', 'D']) {
                    Unit::Month
                } else {
                    Unit::Minute
                }
            }
            b'd' => Unit::Day,
            b'h' => Unit::Hour,
            b's' => Unit::Second,
            b'u' => Unit::Micro,
            _ => return Err(bad_format(spec, &body[start..])),
        };
        tokens.push(Token { amount, unit, at: start });
    }
    if tokens.is_empty() || tokens.len() > MAX_TOKENS {
        return Err(bad_format(spec, body));
    }
    for pair in tokens.windows(2) {
        if pair[1].unit >= pair[0].unit {
            return Err(bad_format(spec, &body[pair[1].at..]));
        }
    }
    Ok(tokens)
}

/// Two-digit years land in the supported century: 0–69 means the 2000s,
/// 70–99 the 1900s. Three-digit years and years before 1970 have no
/// representation in a capture timestamp.
fn resolve_year(amount: i64) -> Result<i64, SliceError> {
    if (100..1970).contains(&amount) {
        return Err(SliceError::TimeFieldRange {
            field: "year",
            value: amount,
        });
    }
    Ok(match amount {
        0..=69 => 2000 + amount,
        70..=99 => 1900 + amount,
        _ => amount,
    })
}

/// Absolute interpretation: explicit fields win; unset fields above the
/// most significant explicit field come from the local breakdown of the
/// base time, unset fields below it start the period (month and day 1,
/// the clock fields 0).
fn resolve_absolute(tokens: &[Token], base: Timeval) -> Result<(CalendarTime, i64), SliceError> {
    let mut year = None;
    let mut month = None;
    let mut day = None;
    let mut hour = None;
    let mut minute = None;
    let mut second = None;
    let mut micro = None;

    for tok in tokens {
        match tok.unit {
            Unit::Year => year = Some(resolve_year(tok.amount)?),
            Unit::Month => month = Some(tok.amount),
            Unit::Day => day = Some(tok.amount),
            Unit::Hour => hour = Some(tok.amount),
            Unit::Minute => minute = Some(tok.amount),
            Unit::Second => second = Some(tok.amount),
            Unit::Micro => micro = Some(tok.amount),
        }
    }

    let bt = CalendarTime::from_local(base);
    // Fill from the base until the first explicit field; everything
    // below that comes out as the start of its period.
    let mut filling = year.is_none();
    let year = year.unwrap_or(bt.year);
    let mut resolve = |explicit: Option<i64>, base_value: i64, default: i64| match explicit {
        Some(v) => {
            filling = false;
            v
        }
        None => {
            if filling {
                base_value
            } else {
                default
            }
        }
    };
    let month = resolve(month, bt.month, 1);
    let day = resolve(day, bt.day, 1);
    let hour = resolve(hour, bt.hour, 0);
    let minute = resolve(minute, bt.minute, 0);
    let second = resolve(second, bt.second, 0);

    Ok((
        CalendarTime {
            year,
            month,
            day,
            hour,
            minute,
            second,
        },
        micro.unwrap_or(0),
    ))
}

/// Relative interpretation: start from the local breakdown of the base
/// time (microseconds included) and add every token to its field.
fn apply_delta(tokens: &[Token], base: Timeval) -> (CalendarTime, i64) {
    let mut cal = CalendarTime::from_local(base);
    let mut micro = i64::from(base.usec);
    for tok in tokens {
        match tok.unit {
            Unit::Year => cal.year += tok.amount,
            Unit::Month => cal.month += tok.amount,
            Unit::Day => cal.day += tok.amount,
            Unit::Hour => cal.hour += tok.amount,
            Unit::Minute => cal.minute += tok.amount,
            Unit::Second => cal.second += tok.amount,
            Unit::Micro => micro += tok.amount,
        }
    }
    (cal, micro)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeval::{timestamp_to_string, TimestampStyle};
    use chrono::{Local, TimeZone};

    fn local_ts(year: i32, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> i64 {
        Local
            .with_ymd_and_hms(year, month, day, hour, minute, second)
            .unwrap()
            .timestamp()
    }

    #[test]
    fn test_is_time_spec() {
        for good in ["15", "15.5", "+0", "+10.25", "5m", "5m2d", "2020y6m15d12h", "12H30M"] {
            assert!(is_time_spec(good), "{good} should read as a time");
        }
        for bad in ["", "+", "trace.pcap", "15.", "1.2.3", "5x", "1.1234567", "2d5y", "m5"] {
            assert!(!is_time_spec(bad), "{bad} should not read as a time");
        }
    }

    #[test]
    fn test_raw_timestamps() {
        let base = Timeval::new(0, 0);
        assert_eq!(parse_time("15", base).unwrap(), Timeval::new(15, 0));
        assert_eq!(parse_time("15.5", base).unwrap(), Timeval::new(15, 500_000));
        assert_eq!(
            parse_time("0.123456", base).unwrap(),
            Timeval::new(0, 123_456)
        );
        assert_eq!(
            parse_time("2147483647", base).unwrap(),
            Timeval::new(2_147_483_647, 0)
        );
    }

    #[test]
    fn test_raw_timestamp_bounds() {
        let base = Timeval::new(0, 0);
        assert!(matches!(
            parse_time("2147483648", base),
            Err(SliceError::BadTimeFormat { .. })
        ));
        assert!(matches!(
            parse_time("1.1234567", base),
            Err(SliceError::BadTimeFormat { .. })
        ));
        assert!(matches!(
            parse_time("1.2.3", base),
            Err(SliceError::BadTimeFormat { .. })
        ));
    }

    #[test]
    fn test_raw_delta_adds_base() {
        let base = Timeval::new(100, 250_000);
        assert_eq!(
            parse_time("+10.5", base).unwrap(),
            Timeval::new(110, 750_000)
        );
        assert_eq!(
            parse_time("+0.900000", base).unwrap(),
            Timeval::new(101, 150_000)
        );
    }

    #[test]
    fn test_structured_all_fields() {
        let base = Timeval::new(local_ts(2020, 1, 1, 0, 0, 0), 0);
        let parsed = parse_time("2020y6m15d12h", base).unwrap();
        assert_eq!(parsed.sec, local_ts(2020, 6, 15, 12, 0, 0));
        assert_eq!(parsed.usec, 0);
    }

    #[test]
    fn test_month_versus_minute() {
        let base = Timeval::new(local_ts(2020, 3, 10, 15, 30, 0), 0);
        // a later day token makes `m` mean months
        let months = parse_time("5m2d", base).unwrap();
        assert_eq!(months.sec, local_ts(2020, 5, 2, 0, 0, 0));
        // on its own it means minutes
        let minutes = parse_time("5m", base).unwrap();
        assert_eq!(minutes.sec, local_ts(2020, 3, 10, 15, 5, 0));
    }

    #[test]
    fn test_fields_between_explicit_ones_default() {
        let base = Timeval::new(local_ts(2020, 7, 20, 8, 0, 0), 0);
        // the month between an explicit year and day starts the period
        let parsed = parse_time("1y2d", base).unwrap();
        assert_eq!(parsed.sec, local_ts(2001, 1, 2, 0, 0, 0));
    }

    #[test]
    fn test_two_digit_years() {
        let base = Timeval::new(local_ts(2020, 1, 1, 0, 0, 0), 0);
        assert_eq!(
            parse_time("69y", base).unwrap().sec,
            local_ts(2069, 1, 1, 0, 0, 0)
        );
        assert_eq!(
            parse_time("70y", base).unwrap().sec,
            local_ts(1970, 1, 1, 0, 0, 0)
        );
        assert!(matches!(
            parse_time("150y", base),
            Err(SliceError::TimeFieldRange { field: "year", .. })
        ));
    }

    #[test]
    fn test_structured_delta() {
        let base = Timeval::new(local_ts(2020, 3, 10, 15, 30, 0), 123_456);
        let parsed = parse_time("+30m", base).unwrap();
        assert_eq!(parsed, base + Timeval::new(1800, 0));
        // second-level deltas may overflow their field
        let parsed = parse_time("+90s", base).unwrap();
        assert_eq!(parsed, base + Timeval::new(90, 0));
    }

    #[test]
    fn test_grammar_violations() {
        let base = Timeval::new(0, 0);
        for bad in ["2d1y", "5h4h", "5q", "y", "5m2x"] {
            assert!(
                matches!(parse_time(bad, base), Err(SliceError::BadTimeFormat { .. })),
                "{bad} should fail the grammar"
            );
        }
    }

    #[test]
    fn test_out_of_range_fields() {
        let base = Timeval::new(local_ts(2020, 1, 1, 0, 0, 0), 0);
        assert!(matches!(
            parse_time("13m2d", base),
            Err(SliceError::TimeFieldRange { field: "month", .. })
        ));
        assert!(matches!(
            parse_time("32d", base),
            Err(SliceError::TimeFieldRange { field: "day", .. })
        ));
        assert!(matches!(
            parse_time("25h", base),
            Err(SliceError::TimeFieldRange { field: "hour", .. })
        ));
    }

    #[test]
    fn test_parseable_round_trip() {
        let original = Timeval::new(local_ts(2020, 6, 15, 12, 34, 56), 123_456);
        let rendered = timestamp_to_string(original, TimestampStyle::Parseable);
        // every field is explicit, so the base cannot influence the result
        let parsed = parse_time(&rendered, Timeval::new(0, 0)).unwrap();
        assert_eq!(parsed, original);
    }
}

//! Relative time expressions such as `-1d@d` (yesterday at midnight)
//!
//! An expression is a sequence of offsets (`-2h`, `+1mon`, `-d`) and snaps
//! (`@d`, `@w1`) applied left to right to an anchor instant. Day and larger
//! offsets move the wall clock of the anchor's zone; snaps truncate to the
//! start of the unit in that zone.

use crate::error::{Result, WebError};
use chrono::format::{Item, StrftimeItems};
use chrono::{
    DateTime, Datelike, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime, TimeZone,
    Timelike, Utc,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::str::FromStr;

/// Sentinel format that renders seconds since the Unix epoch
pub const EPOCH_FORMAT: &str = "as_epoch";

/// Default rendering: ISO-8601-like with microseconds and a `Z` suffix
pub const DEFAULT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S.%fZ";

const MAX_AMOUNT: i64 = 1_000_000;

/// A parameter value computed from a relative time expression
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelativeTimeSpec {
    /// The expression, e.g. `-1d@d`
    pub relatime: String,
    /// Target timezone for rendering (IANA name, default UTC)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    /// strftime-style format or `as_epoch`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl Unit {
    fn parse(name: &str) -> Option<Unit> {
        let unit = match name {
            "s" | "sec" | "secs" | "second" | "seconds" => Unit::Second,
            "m" | "min" | "mins" | "minute" | "minutes" => Unit::Minute,
            "h" | "hr" | "hrs" | "hour" | "hours" => Unit::Hour,
            "d" | "day" | "days" => Unit::Day,
            "w" | "week" | "weeks" => Unit::Week,
            "mon" | "month" | "months" => Unit::Month,
            "q" | "qtr" | "quarter" | "quarters" => Unit::Quarter,
            "y" | "yr" | "year" | "years" => Unit::Year,
            _ => return None,
        };
        Some(unit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Offset(i64, Unit),
    Snap(Unit),
    /// Most recent given weekday, 0 = Sunday
    SnapWeekday(u32),
}

/// A parsed relative time expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelativeTime {
    steps: Vec<Step>,
}

impl FromStr for RelativeTime {
    type Err = WebError;

    fn from_str(expr: &str) -> Result<Self> {
        let invalid = |why: &str| {
            WebError::Configuration(format!("invalid relative time '{}': {}", expr, why))
        };

        let lowered = expr.trim().to_ascii_lowercase();
        let mut rest = lowered.strip_prefix("now").unwrap_or(&lowered);
        if rest.is_empty() && lowered.is_empty() {
            return Err(invalid("empty expression"));
        }

        let mut steps = Vec::new();
        while let Some(first) = rest.chars().next() {
            match first {
                '+' | '-' => {
                    let body = &rest[1..];
                    let digits_len = body.chars().take_while(|c| c.is_ascii_digit()).count();
                    let amount = if digits_len == 0 {
                        1
                    } else {
                        body[..digits_len]
                            .parse::<i64>()
                            .ok()
                            .filter(|n| *n <= MAX_AMOUNT)
                            .ok_or_else(|| invalid("amount out of range"))?
                    };
                    let after = &body[digits_len..];
                    let unit_len = after
                        .chars()
                        .take_while(|c| c.is_ascii_alphabetic())
                        .count();
                    let unit =
                        Unit::parse(&after[..unit_len]).ok_or_else(|| invalid("unknown unit"))?;
                    let signed = if first == '-' { -amount } else { amount };
                    steps.push(Step::Offset(signed, unit));
                    rest = &after[unit_len..];
                }
                '@' => {
                    let body = &rest[1..];
                    let unit_len = body.chars().take_while(|c| c.is_ascii_alphabetic()).count();
                    let unit =
                        Unit::parse(&body[..unit_len]).ok_or_else(|| invalid("unknown snap unit"))?;
                    let after = &body[unit_len..];
                    let digits_len = after.chars().take_while(|c| c.is_ascii_digit()).count();
                    if digits_len > 0 {
                        if unit != Unit::Week || digits_len != 1 {
                            return Err(invalid("only @w0..@w6 take a number"));
                        }
                        let day: u32 = after[..1]
                            .parse()
                            .map_err(|_| invalid("bad weekday"))?;
                        if day > 6 {
                            return Err(invalid("weekday must be 0..6"));
                        }
                        steps.push(Step::SnapWeekday(day));
                    } else {
                        steps.push(Step::Snap(unit));
                    }
                    rest = &after[digits_len..];
                }
                c if c.is_whitespace() => rest = &rest[c.len_utf8()..],
                _ => return Err(invalid("expected '+', '-' or '@'")),
            }
        }

        Ok(RelativeTime { steps })
    }
}

impl RelativeTime {
    /// Apply the expression to `anchor`, staying in the anchor's zone
    pub fn resolve<Z: TimeZone>(&self, anchor: DateTime<Z>) -> Result<DateTime<Z>> {
        let tz = anchor.timezone();
        let mut current = anchor;

        for step in &self.steps {
            current = match *step {
                Step::Offset(n, Unit::Second) => shift(current, Duration::seconds(n))?,
                Step::Offset(n, Unit::Minute) => shift(current, Duration::minutes(n))?,
                Step::Offset(n, Unit::Hour) => shift(current, Duration::hours(n))?,
                Step::Offset(n, Unit::Day) => {
                    localize(&tz, shift_naive(current.naive_local(), Duration::days(n))?)?
                }
                Step::Offset(n, Unit::Week) => {
                    localize(&tz, shift_naive(current.naive_local(), Duration::weeks(n))?)?
                }
                Step::Offset(n, Unit::Month) => localize(&tz, add_months(current.naive_local(), n)?)?,
                Step::Offset(n, Unit::Quarter) => {
                    localize(&tz, add_months(current.naive_local(), n * 3)?)?
                }
                Step::Offset(n, Unit::Year) => {
                    localize(&tz, add_months(current.naive_local(), n * 12)?)?
                }
                Step::Snap(unit) => localize(&tz, snap(current.naive_local(), unit)?)?,
                Step::SnapWeekday(day) => {
                    let naive = current.naive_local();
                    let back = (naive.weekday().num_days_from_sunday() + 7 - day) % 7;
                    let date = back_days(naive.date(), back as i64)?;
                    localize(&tz, date.and_time(NaiveTime::MIN))?
                }
            };
        }

        Ok(current)
    }
}

fn out_of_range() -> WebError {
    WebError::Configuration("relative time out of range".to_string())
}

fn shift<Z: TimeZone>(instant: DateTime<Z>, delta: Duration) -> Result<DateTime<Z>> {
    instant.checked_add_signed(delta).ok_or_else(out_of_range)
}

fn shift_naive(naive: NaiveDateTime, delta: Duration) -> Result<NaiveDateTime> {
    naive.checked_add_signed(delta).ok_or_else(out_of_range)
}

fn back_days(date: NaiveDate, days: i64) -> Result<NaiveDate> {
    date.checked_sub_signed(Duration::days(days))
        .ok_or_else(out_of_range)
}

fn add_months(naive: NaiveDateTime, n: i64) -> Result<NaiveDateTime> {
    let months = Months::new(n.unsigned_abs().min(u32::MAX as u64) as u32);
    let shifted = if n >= 0 {
        naive.checked_add_months(months)
    } else {
        naive.checked_sub_months(months)
    };
    shifted.ok_or_else(out_of_range)
}

fn snap(naive: NaiveDateTime, unit: Unit) -> Result<NaiveDateTime> {
    let date = naive.date();
    let midnight = |d: NaiveDate| d.and_time(NaiveTime::MIN);
    let first_of = |year: i32, month: u32| {
        NaiveDate::from_ymd_opt(year, month, 1)
            .map(midnight)
            .ok_or_else(out_of_range)
    };

    match unit {
        Unit::Second => Ok(naive.with_nanosecond(0).unwrap_or(naive)),
        Unit::Minute => Ok(date.and_hms_opt(naive.hour(), naive.minute(), 0).unwrap_or(naive)),
        Unit::Hour => Ok(date.and_hms_opt(naive.hour(), 0, 0).unwrap_or(naive)),
        Unit::Day => Ok(midnight(date)),
        Unit::Week => {
            let back = date.weekday().num_days_from_sunday() as i64;
            Ok(midnight(back_days(date, back)?))
        }
        Unit::Month => first_of(date.year(), date.month()),
        Unit::Quarter => first_of(date.year(), (date.month0() / 3) * 3 + 1),
        Unit::Year => first_of(date.year(), 1),
    }
}

/// Map a wall-clock time back into `tz`, stepping over DST gaps
fn localize<Z: TimeZone>(tz: &Z, naive: NaiveDateTime) -> Result<DateTime<Z>> {
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| {
            naive
                .checked_add_signed(Duration::hours(1))
                .and_then(|later| tz.from_local_datetime(&later).earliest())
        })
        .ok_or_else(|| WebError::Configuration(format!("no such local time: {}", naive)))
}

/// Parse an IANA timezone name
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|e| WebError::Configuration(format!("unknown timezone '{}': {}", name, e)))
}

/// Translate Python-style `%f` (microseconds) into chrono's `%6f`
fn chrono_format(format: &str) -> String {
    let mut out = String::with_capacity(format.len() + 4);
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('f') => out.push_str("%6f"),
            Some(next) => {
                out.push('%');
                out.push(next);
            }
            None => out.push('%'),
        }
    }
    out
}

/// Render `instant` in `zone` with a strftime-style format or `as_epoch`
pub fn render(instant: DateTime<Utc>, zone: Tz, format: &str) -> Result<String> {
    if format.eq_ignore_ascii_case(EPOCH_FORMAT) {
        return Ok(instant.timestamp().to_string());
    }

    let translated = chrono_format(format);
    let items: Vec<Item<'_>> = StrftimeItems::new(&translated).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(WebError::Configuration(format!(
            "invalid time format '{}'",
            format
        )));
    }

    let mut out = String::new();
    write!(
        out,
        "{}",
        instant.with_timezone(&zone).format_with_items(items.into_iter())
    )
    .map_err(|_| WebError::Configuration(format!("cannot render time format '{}'", format)))?;
    Ok(out)
}

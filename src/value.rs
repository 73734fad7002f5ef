use std::fmt::Write as _;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde_json as json;

/// A column value as handed over by the driver, before any planning.
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Null,
    Bool(bool),
    Long(i64),
    /// Unsigned 64-bit integers, e.g. ClickHouse `UInt64`.
    ULong(u64),
    Double(f64),
    /// Exact decimal in plain (non-scientific) text form.
    Decimal(String),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    DateTimeTz(DateTime<FixedOffset>),
    Array(Vec<RawValue>),
    Tuple(Vec<RawValue>),
    /// Key-value pairs, e.g. PostgreSQL `hstore` or ClickHouse `Map`.
    Map(Vec<(String, RawValue)>),
}

impl RawValue {
    pub fn is_null(&self) -> bool {
        matches!(self, RawValue::Null)
    }

    /// Render the value as text. Temporal values go through `format`, with
    /// zone-less values read as local time in `zone`.
    pub fn render(&self, format: &str, zone: FixedOffset) -> String {
        match self {
            RawValue::Null => "NULL".to_owned(),
            RawValue::Bool(b) => b.to_string(),
            RawValue::Long(n) => n.to_string(),
            RawValue::ULong(n) => n.to_string(),
            RawValue::Double(f) => f.to_string(),
            RawValue::Decimal(s) | RawValue::Text(s) => s.clone(),
            RawValue::Bytes(bytes) => match std::str::from_utf8(bytes) {
                Ok(text) => text.to_owned(),
                Err(_) => hex_escape(bytes),
            },
            RawValue::Date(date) => render_local(date_at_midnight(*date), format, zone),
            RawValue::Time(time) => render_local(time_on_epoch_day(*time), format, zone),
            RawValue::DateTime(naive) => render_local(*naive, format, zone),
            RawValue::DateTimeTz(dt) => format_datetime(dt, format),
            RawValue::Array(items) => {
                format!("[{}]", render_items(items, format, zone))
            }
            RawValue::Tuple(items) => {
                format!("({})", render_items(items, format, zone))
            }
            RawValue::Map(entries) => entries
                .iter()
                .map(|(key, value)| match value {
                    RawValue::Null => format!("{:?}=>NULL", key),
                    value => format!("{:?}=>{:?}", key, value.render(format, zone)),
                })
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

fn render_items(items: &[RawValue], format: &str, zone: FixedOffset) -> String {
    items
        .iter()
        .map(|item| item.render(format, zone))
        .collect::<Vec<_>>()
        .join(",")
}

fn render_local(naive: NaiveDateTime, format: &str, zone: FixedOffset) -> String {
    match zone.from_local_datetime(&naive).single() {
        Some(dt) => format_datetime(&dt, format),
        None => naive.to_string(),
    }
}

fn hex_escape(bytes: &[u8]) -> String {
    let mut text = String::with_capacity(2 + bytes.len() * 2);
    text.push_str("\\x");
    for b in bytes {
        let _ = write!(text, "{:02x}", b);
    }
    text
}

pub(crate) fn date_at_midnight(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::default())
}

pub(crate) fn time_on_epoch_day(time: NaiveTime) -> NaiveDateTime {
    NaiveDate::default().and_time(time)
}

/// Format `dt` with a `strftime`-style pattern.
///
/// Patterns chrono cannot apply (unknown specifiers) fall back to RFC 3339
/// instead of panicking inside `Display`.
pub fn format_datetime(dt: &DateTime<FixedOffset>, format: &str) -> String {
    let mut text = String::new();
    match write!(text, "{}", dt.format(format)) {
        Ok(()) => text,
        Err(_) => dt.to_rfc3339(),
    }
}

const ZONED_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f %z",
];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

const TIME_FORMATS: &[&str] = &["%H:%M:%S%.f", "%H:%M"];

/// Parse the textual timestamp shapes drivers commonly hand out.
///
/// Values without an offset are read as local time in `zone`. Time-only
/// values land on 1970-01-01.
pub fn parse_datetime_text(text: &str, zone: FixedOffset) -> Option<DateTime<FixedOffset>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt);
    }
    for format in ZONED_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(text, format) {
            return Some(dt);
        }
    }
    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .map(date_at_midnight)
        })
        .or_else(|| {
            TIME_FORMATS
                .iter()
                .find_map(|format| NaiveTime::parse_from_str(text, format).ok())
                .map(time_on_epoch_day)
        })?;
    zone.from_local_datetime(&naive).single()
}

/// An instant with nanosecond precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    pub epoch_second: i64,
    pub nano: u32,
}

impl Timestamp {
    pub fn from_datetime<Tz: TimeZone>(dt: &DateTime<Tz>) -> Self {
        Timestamp {
            epoch_second: dt.timestamp(),
            nano: dt.timestamp_subsec_nanos(),
        }
    }

    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.epoch_second, self.nano).single()
    }

    /// Render in `zone` through a `strftime`-style pattern.
    pub fn format(self, format: &str, zone: FixedOffset) -> String {
        match self.to_datetime() {
            Some(dt) => format_datetime(&dt.with_timezone(&zone), format),
            None => format!("{}.{:09}", self.epoch_second, self.nano),
        }
    }
}

/// A converted value, ready for a [`RecordWriter`](crate::RecordWriter).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Boolean(bool),
    Long(i64),
    Double(f64),
    String(String),
    Timestamp(Timestamp),
    Json(json::Value),
}

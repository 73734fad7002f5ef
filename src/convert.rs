use std::{convert::TryFrom, num::IntErrorKind};

use chrono::{FixedOffset, NaiveDateTime, TimeZone};
use serde_json as json;
use tracing::warn;

use crate::{
    value::{date_at_midnight, parse_datetime_text, time_on_epoch_day},
    ColumnPlan, Error, OutputKind, RawValue, Result, Timestamp, Value,
};

/// Convert a driver value into the planned output kind.
///
/// `Ok(None)` is a SQL NULL. Text that fails to parse as the planned kind is
/// also read as NULL, with a warning; everything else that cannot be
/// represented is an error.
pub fn convert(raw: &RawValue, plan: &ColumnPlan) -> Result<Option<Value>> {
    if raw.is_null() {
        return Ok(None);
    }
    match plan.kind {
        OutputKind::Boolean => to_boolean(raw, plan),
        OutputKind::Integer => to_long(raw, plan).map(|n| n.map(Value::Long)),
        OutputKind::Float => to_double(raw, plan).map(|f| f.map(Value::Double)),
        OutputKind::String => Ok(Some(Value::String(render(raw, plan)))),
        OutputKind::Timestamp => to_timestamp(raw, plan).map(|ts| ts.map(Value::Timestamp)),
        OutputKind::Json => Ok(Some(to_json(raw, plan))),
    }
}

fn render(raw: &RawValue, plan: &ColumnPlan) -> String {
    raw.render(plan.display_format(), plan.zone)
}

fn incompatible(raw: &RawValue, plan: &ColumnPlan) -> Error {
    Error::conversion(
        plan.name(),
        format!("a {} value cannot be read as {}", raw_type(raw), plan.kind),
    )
}

fn raw_type(raw: &RawValue) -> &'static str {
    match raw {
        RawValue::Null => "null",
        RawValue::Bool(_) => "boolean",
        RawValue::Long(_) => "integer",
        RawValue::ULong(_) => "unsigned integer",
        RawValue::Double(_) => "floating-point",
        RawValue::Decimal(_) => "decimal",
        RawValue::Text(_) => "text",
        RawValue::Bytes(_) => "binary",
        RawValue::Date(_) => "date",
        RawValue::Time(_) => "time",
        RawValue::DateTime(_) => "datetime",
        RawValue::DateTimeTz(_) => "zoned datetime",
        RawValue::Array(_) => "array",
        RawValue::Tuple(_) => "tuple",
        RawValue::Map(_) => "map",
    }
}

fn unparseable<T>(text: &str, plan: &ColumnPlan) -> Result<Option<T>> {
    warn!(
        column = %plan.name(),
        value = %text,
        kind = %plan.kind,
        "unparseable value, writing null"
    );
    Ok(None)
}

#[derive(Debug, PartialEq)]
enum DecimalError {
    Invalid,
    Overflow,
}

/// Integer part of a plain decimal string, truncated toward zero.
fn decimal_to_i64(text: &str) -> std::result::Result<i64, DecimalError> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (int_part, frac_part) = match digits.split_once('.') {
        Some((int_part, frac_part)) => (int_part, frac_part),
        None => (digits, ""),
    };
    let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if (int_part.is_empty() && frac_part.is_empty())
        || !all_digits(int_part)
        || !all_digits(frac_part)
    {
        return Err(DecimalError::Invalid);
    }
    if int_part.is_empty() {
        return Ok(0);
    }
    let signed = if negative {
        format!("-{}", int_part)
    } else {
        int_part.to_owned()
    };
    signed.parse::<i64>().map_err(|e| match e.kind() {
        IntErrorKind::PosOverflow | IntErrorKind::NegOverflow => DecimalError::Overflow,
        _ => DecimalError::Invalid,
    })
}

fn double_to_i64(f: f64) -> Option<i64> {
    // 2^63 is exactly representable; i64::MAX is not.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    let t = f.trunc();
    if t.is_finite() && t >= -LIMIT && t < LIMIT {
        Some(t as i64)
    } else {
        None
    }
}

fn to_long(raw: &RawValue, plan: &ColumnPlan) -> Result<Option<i64>> {
    let n = match raw {
        RawValue::Bool(b) => i64::from(*b),
        RawValue::Long(n) => *n,
        RawValue::ULong(n) => i64::try_from(*n).map_err(|_| Error::overflow(plan.name(), n))?,
        RawValue::Double(f) => double_to_i64(*f).ok_or_else(|| Error::overflow(plan.name(), f))?,
        RawValue::Decimal(s) => match decimal_to_i64(s) {
            Ok(n) => n,
            Err(DecimalError::Overflow) => return Err(Error::overflow(plan.name(), s)),
            Err(DecimalError::Invalid) => {
                return Err(Error::conversion(
                    plan.name(),
                    format!("{:?} is not a plain decimal", s),
                ))
            }
        },
        RawValue::Text(s) => match decimal_to_i64(s.trim()) {
            Ok(n) => n,
            Err(DecimalError::Overflow) => return Err(Error::overflow(plan.name(), s)),
            Err(DecimalError::Invalid) => return unparseable(s, plan),
        },
        other => return Err(incompatible(other, plan)),
    };
    Ok(Some(n))
}

fn to_double(raw: &RawValue, plan: &ColumnPlan) -> Result<Option<f64>> {
    let f = match raw {
        RawValue::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        RawValue::Long(n) => *n as f64,
        RawValue::ULong(n) => *n as f64,
        RawValue::Double(f) => *f,
        // Out-of-range decimals parse to infinity.
        RawValue::Decimal(s) => s.parse::<f64>().map_err(|_| {
            Error::conversion(plan.name(), format!("{:?} is not a plain decimal", s))
        })?,
        RawValue::Text(s) => match s.trim().parse::<f64>() {
            Ok(f) => f,
            Err(_) => return unparseable(s, plan),
        },
        other => return Err(incompatible(other, plan)),
    };
    Ok(Some(f))
}

fn to_boolean(raw: &RawValue, plan: &ColumnPlan) -> Result<Option<Value>> {
    let b = match raw {
        RawValue::Bool(b) => *b,
        RawValue::Long(n) => *n != 0,
        RawValue::ULong(n) => *n != 0,
        RawValue::Double(f) => *f != 0.0,
        RawValue::Decimal(_) => to_double(raw, plan)?.map_or(false, |f| f != 0.0),
        RawValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "on" | "1" => true,
            "false" | "f" | "no" | "n" | "off" | "0" => false,
            _ => return unparseable(s, plan),
        },
        other => return Err(incompatible(other, plan)),
    };
    Ok(Some(Value::Boolean(b)))
}

fn local_instant(naive: NaiveDateTime, zone: FixedOffset, plan: &ColumnPlan) -> Result<Timestamp> {
    zone.from_local_datetime(&naive)
        .single()
        .map(|dt| Timestamp::from_datetime(&dt))
        .ok_or_else(|| Error::conversion(plan.name(), format!("{} is out of range", naive)))
}

fn to_timestamp(raw: &RawValue, plan: &ColumnPlan) -> Result<Option<Timestamp>> {
    let zone = plan.zone;
    let ts = match raw {
        RawValue::Date(date) => local_instant(date_at_midnight(*date), zone, plan)?,
        RawValue::Time(time) => local_instant(time_on_epoch_day(*time), zone, plan)?,
        RawValue::DateTime(naive) => local_instant(*naive, zone, plan)?,
        RawValue::DateTimeTz(dt) => Timestamp::from_datetime(dt),
        RawValue::Long(secs) => Timestamp {
            epoch_second: *secs,
            nano: 0,
        },
        RawValue::Double(secs) => {
            let whole = secs.floor();
            let nano = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
            match double_to_i64(whole) {
                Some(epoch_second) => Timestamp { epoch_second, nano },
                None => return Err(Error::overflow(plan.name(), secs)),
            }
        }
        RawValue::Text(s) => match parse_datetime_text(s, zone) {
            Some(dt) => Timestamp::from_datetime(&dt),
            None => return unparseable(s, plan),
        },
        other => return Err(incompatible(other, plan)),
    };
    if ts.to_datetime().is_none() {
        return Err(Error::conversion(
            plan.name(),
            format!("epoch second {} is out of range", ts.epoch_second),
        ));
    }
    Ok(Some(ts))
}

fn to_json(raw: &RawValue, plan: &ColumnPlan) -> Value {
    let converted = match raw {
        // Only top-level text is parsed; text inside structures stays a string.
        RawValue::Text(s) => json::from_str(s).map_err(|e| e.to_string()),
        other => json_value(other, plan),
    };
    match converted {
        Ok(value) => Value::Json(value),
        Err(reason) => {
            warn!(
                column = %plan.name(),
                %reason,
                "cannot convert value to JSON, writing it as a string"
            );
            Value::String(render(raw, plan))
        }
    }
}

fn json_value(raw: &RawValue, plan: &ColumnPlan) -> std::result::Result<json::Value, String> {
    let value = match raw {
        RawValue::Null => json::Value::Null,
        RawValue::Bool(b) => json::Value::Bool(*b),
        RawValue::Long(n) => json::Value::from(*n),
        RawValue::ULong(n) => json::Value::from(*n),
        RawValue::Double(f) => json::Number::from_f64(*f)
            .map(json::Value::Number)
            .ok_or_else(|| format!("{} has no JSON representation", f))?,
        RawValue::Decimal(s) => match exact_json_number(s) {
            Some(n) => json::Value::Number(n),
            // Wider than a JSON number can carry: keep every digit.
            None => json::Value::String(s.clone()),
        },
        RawValue::Text(s) => json::Value::String(s.clone()),
        RawValue::Bytes(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => json::Value::String(text.to_owned()),
            Err(_) => return Err("binary data is not valid UTF-8".to_owned()),
        },
        RawValue::Date(_) | RawValue::Time(_) | RawValue::DateTime(_) | RawValue::DateTimeTz(_) => {
            json::Value::String(render(raw, plan))
        }
        RawValue::Array(items) | RawValue::Tuple(items) => json::Value::Array(
            items
                .iter()
                .map(|item| json_value(item, plan))
                .collect::<std::result::Result<_, _>>()?,
        ),
        RawValue::Map(entries) => {
            let mut object = json::Map::with_capacity(entries.len());
            for (key, value) in entries {
                object.insert(key.clone(), json_value(value, plan)?);
            }
            json::Value::Object(object)
        }
    };
    Ok(value)
}

/// `text` as a JSON number, if the number prints back to the same value.
fn exact_json_number(text: &str) -> Option<json::Number> {
    let canonical = match text.split_once('.') {
        Some((int_part, frac_part)) => match frac_part.trim_end_matches('0') {
            "" => int_part.to_owned(),
            frac_part => format!("{}.{}", int_part, frac_part),
        },
        None => text.to_owned(),
    };
    let number = canonical.parse::<json::Number>().ok()?;
    if number.to_string() == canonical {
        Some(number)
    } else {
        None
    }
}

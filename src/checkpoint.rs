//! Checkpoints for resumable, incremental runs.
//!
//! At the end of a run the incremental columns of the last row are encoded
//! into JSON scalars. The next run decodes them into bound parameters of the
//! `WHERE` predicate, so it only reads rows past that point.

use std::{fs, io, path::Path};

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json as json;

use crate::{query::Comparison, ColumnPlan, Error, OutputKind, Result, TemporalFlavor, Value};

/// Zone-less timestamps, nine fractional digits so nanoseconds survive.
const LOCAL_PATTERN: &str = "%Y-%m-%dT%H:%M:%S%.9f";
/// Timestamps normalized to UTC.
const UTC_PATTERN: &str = "%Y-%m-%dT%H:%M:%S%.9fZ";

/// The last value seen in one incremental column.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckpointValue {
    Long(i64),
    Text(String),
    /// Wall-clock time as the database reports it.
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
}

/// How the checkpoint of one incremental column is written and read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncrementalCodec {
    Long,
    Text,
    Timestamp,
    /// Values arrive shifted into the connection's session zone; the
    /// checkpoint stores them as UTC.
    SessionTimestamp(FixedOffset),
    TimestampTz,
}

impl IncrementalCodec {
    pub fn for_plan(plan: &ColumnPlan, session_zone: Option<FixedOffset>) -> Result<Self> {
        match (plan.kind, plan.flavor) {
            (OutputKind::Integer, _) => Ok(IncrementalCodec::Long),
            (OutputKind::String, _) => Ok(IncrementalCodec::Text),
            (OutputKind::Timestamp, Some(TemporalFlavor::DateTimeTz)) => {
                Ok(IncrementalCodec::TimestampTz)
            }
            (OutputKind::Timestamp, _) => Ok(match session_zone {
                Some(zone) => IncrementalCodec::SessionTimestamp(zone),
                None => IncrementalCodec::Timestamp,
            }),
            (kind, _) => Err(Error::config(format!(
                "column {:?} of type {} cannot be an incremental column; \
                 use an integer, string or timestamp column",
                plan.name(),
                kind
            ))),
        }
    }

    /// Take the checkpoint value from a converted row value.
    pub fn capture(&self, value: &Value, plan: &ColumnPlan) -> Result<CheckpointValue> {
        match (self, value) {
            (IncrementalCodec::Long, Value::Long(n)) => Ok(CheckpointValue::Long(*n)),
            (IncrementalCodec::Text, Value::String(s)) => Ok(CheckpointValue::Text(s.clone())),
            (IncrementalCodec::TimestampTz, Value::Timestamp(ts)) => ts
                .to_datetime()
                .map(CheckpointValue::TimestampTz)
                .ok_or_else(|| out_of_range(plan)),
            (IncrementalCodec::Timestamp, Value::Timestamp(ts))
            | (IncrementalCodec::SessionTimestamp(_), Value::Timestamp(ts)) => {
                let zone = self.local_zone(plan);
                ts.to_datetime()
                    .map(|dt| CheckpointValue::Timestamp(dt.with_timezone(&zone).naive_local()))
                    .ok_or_else(|| out_of_range(plan))
            }
            (_, value) => Err(Error::conversion(
                plan.name(),
                format!("cannot track {:?} as an incremental value", value),
            )),
        }
    }

    /// Zone a naive checkpoint of this column is wall-clock time in.
    fn local_zone(&self, plan: &ColumnPlan) -> FixedOffset {
        match self {
            IncrementalCodec::SessionTimestamp(zone) => *zone,
            _ => plan.zone,
        }
    }

    /// How the column is compared with its checkpoint in the resume query.
    pub fn comparison(&self, plan: &ColumnPlan) -> Comparison {
        match self {
            IncrementalCodec::Long | IncrementalCodec::Text => Comparison::Value,
            _ => Comparison::Instant(plan.zone),
        }
    }

    /// The value bound against [`IncrementalCodec::comparison`]: timestamps
    /// become UTC instants, everything else is bound as it is.
    pub fn bind_value(&self, value: &CheckpointValue, plan: &ColumnPlan) -> Result<CheckpointValue> {
        match value {
            CheckpointValue::Timestamp(local) => self
                .local_zone(plan)
                .from_local_datetime(local)
                .single()
                .map(|dt| CheckpointValue::TimestampTz(dt.with_timezone(&Utc)))
                .ok_or_else(|| out_of_range(plan)),
            other => Ok(other.clone()),
        }
    }

    pub fn encode(&self, column: &str, value: &CheckpointValue) -> Result<json::Value> {
        let encoded = match (self, value) {
            (_, CheckpointValue::Long(n)) => json::Value::from(*n),
            (_, CheckpointValue::Text(s)) => json::Value::String(s.clone()),
            (IncrementalCodec::SessionTimestamp(zone), CheckpointValue::Timestamp(local)) => {
                let utc = zone
                    .from_local_datetime(local)
                    .single()
                    .ok_or_else(|| {
                        Error::conversion(column, format!("{} is out of range", local))
                    })?
                    .naive_utc();
                json::Value::String(utc.format(UTC_PATTERN).to_string())
            }
            (_, CheckpointValue::Timestamp(local)) => {
                json::Value::String(local.format(LOCAL_PATTERN).to_string())
            }
            (_, CheckpointValue::TimestampTz(utc)) => {
                json::Value::String(utc.naive_utc().format(UTC_PATTERN).to_string())
            }
        };
        Ok(encoded)
    }

    pub fn decode(&self, column: &str, encoded: &json::Value) -> Result<CheckpointValue> {
        let malformed = |reason: String| Error::MalformedCheckpoint {
            column: column.to_owned(),
            value: encoded.to_string(),
            reason,
        };
        match self {
            IncrementalCodec::Long => encoded
                .as_i64()
                .map(CheckpointValue::Long)
                .ok_or_else(|| malformed("expected an integer".to_owned())),
            IncrementalCodec::Text => encoded
                .as_str()
                .map(|s| CheckpointValue::Text(s.to_owned()))
                .ok_or_else(|| malformed("expected a string".to_owned())),
            IncrementalCodec::Timestamp => {
                let text = encoded
                    .as_str()
                    .ok_or_else(|| malformed("expected a string".to_owned()))?;
                NaiveDateTime::parse_from_str(text, LOCAL_PATTERN)
                    .map(CheckpointValue::Timestamp)
                    .map_err(|e| malformed(format!("expected {}: {}", LOCAL_PATTERN, e)))
            }
            IncrementalCodec::SessionTimestamp(zone) => {
                let text = encoded
                    .as_str()
                    .ok_or_else(|| malformed("expected a string".to_owned()))?;
                let utc = NaiveDateTime::parse_from_str(text, UTC_PATTERN)
                    .map_err(|e| malformed(format!("expected {}: {}", UTC_PATTERN, e)))?;
                Ok(CheckpointValue::Timestamp(
                    zone.from_utc_datetime(&utc).naive_local(),
                ))
            }
            IncrementalCodec::TimestampTz => {
                let text = encoded
                    .as_str()
                    .ok_or_else(|| malformed("expected a string".to_owned()))?;
                let utc = NaiveDateTime::parse_from_str(text, UTC_PATTERN)
                    .map_err(|e| malformed(format!("expected {}: {}", UTC_PATTERN, e)))?;
                Ok(CheckpointValue::TimestampTz(Utc.from_utc_datetime(&utc)))
            }
        }
    }
}

fn out_of_range(plan: &ColumnPlan) -> Error {
    Error::conversion(plan.name(), "timestamp is out of range")
}

/// The encoded value of one incremental column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub column_index: usize,
    pub encoded_value: json::Value,
}

/// What is persisted between runs: one encoded value per incremental
/// column, in the order the columns were configured.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState {
    pub last_record: Vec<json::Value>,
}

impl CheckpointState {
    /// Read a state file. A missing file is a first run, not an error.
    pub fn load(path: impl AsRef<Path>) -> Result<Option<Self>> {
        match fs::read(path.as_ref()) {
            Ok(bytes) => Ok(Some(json::from_slice(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        // Replaced atomically; a partial write never lands on `path`.
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json::to_vec_pretty(self)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{sql_type, ColumnDescriptor, Timestamp};

    fn naive(text: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f").unwrap()
    }

    #[test]
    fn local_timestamp_encoding_is_fixed_width() {
        let value = CheckpointValue::Timestamp(naive("2024-01-02 03:04:05.5"));
        let encoded = IncrementalCodec::Timestamp.encode("ts", &value).unwrap();
        assert_eq!(encoded, json::json!("2024-01-02T03:04:05.500000000"));
    }

    #[test]
    fn session_timestamp_is_stored_as_utc() {
        let zone = FixedOffset::east_opt(9 * 3600).unwrap();
        let codec = IncrementalCodec::SessionTimestamp(zone);
        let value = CheckpointValue::Timestamp(naive("2024-01-02 08:00:00.123456789"));
        let encoded = codec.encode("ts", &value).unwrap();
        assert_eq!(encoded, json::json!("2024-01-01T23:00:00.123456789Z"));
        assert_eq!(codec.decode("ts", &encoded).unwrap(), value);
    }

    #[test]
    fn decode_rejects_other_patterns() {
        let err = IncrementalCodec::Timestamp
            .decode("ts", &json::json!("2024-01-02 03:04:05"))
            .unwrap_err();
        assert!(matches!(err, Error::MalformedCheckpoint { .. }));
        let err = IncrementalCodec::Long
            .decode("id", &json::json!("12"))
            .unwrap_err();
        assert!(matches!(err, Error::MalformedCheckpoint { .. }));
    }

    #[test]
    fn codec_follows_plan() {
        let mut plan = ColumnPlan {
            descriptor: ColumnDescriptor::new("v", "DOUBLE", sql_type::DOUBLE),
            kind: OutputKind::Float,
            format: None,
            flavor: None,
            zone: FixedOffset::east_opt(0).unwrap(),
        };
        assert!(matches!(
            IncrementalCodec::for_plan(&plan, None),
            Err(Error::Config { .. })
        ));
        plan.kind = OutputKind::Timestamp;
        plan.flavor = Some(TemporalFlavor::DateTimeTz);
        assert_eq!(
            IncrementalCodec::for_plan(&plan, None).unwrap(),
            IncrementalCodec::TimestampTz
        );
    }

    #[test]
    fn capture_reads_wall_clock_in_plan_zone() {
        let plan = ColumnPlan {
            descriptor: ColumnDescriptor::new("ts", "DATETIME", sql_type::TIMESTAMP),
            kind: OutputKind::Timestamp,
            format: None,
            flavor: Some(TemporalFlavor::DateTime),
            zone: FixedOffset::west_opt(5 * 3600).unwrap(),
        };
        // 1970-01-01T05:00:00Z is midnight at -05:00.
        let value = Value::Timestamp(Timestamp {
            epoch_second: 5 * 3600,
            nano: 7,
        });
        let captured = IncrementalCodec::Timestamp.capture(&value, &plan).unwrap();
        assert_eq!(
            captured,
            CheckpointValue::Timestamp(naive("1970-01-01 00:00:00.000000007"))
        );
    }

    #[test]
    fn resume_binds_instants() {
        let plan = ColumnPlan {
            descriptor: ColumnDescriptor::new("ts", "DATETIME", sql_type::TIMESTAMP),
            kind: OutputKind::Timestamp,
            format: None,
            flavor: Some(TemporalFlavor::DateTime),
            zone: FixedOffset::east_opt(3600).unwrap(),
        };
        let local = CheckpointValue::Timestamp(naive("2024-01-02 08:00:00.5"));
        let utc = Utc.from_utc_datetime(&naive("2024-01-02 07:00:00.5"));
        assert_eq!(
            IncrementalCodec::Timestamp.bind_value(&local, &plan).unwrap(),
            CheckpointValue::TimestampTz(utc)
        );
        let session = IncrementalCodec::SessionTimestamp(FixedOffset::east_opt(2 * 3600).unwrap());
        assert_eq!(
            session.bind_value(&local, &plan).unwrap(),
            CheckpointValue::TimestampTz(utc - chrono::Duration::hours(1))
        );
        assert_eq!(
            IncrementalCodec::Timestamp.comparison(&plan),
            Comparison::Instant(plan.zone)
        );
        assert_eq!(
            IncrementalCodec::Long.bind_value(&CheckpointValue::Long(3), &plan).unwrap(),
            CheckpointValue::Long(3)
        );
    }

    #[test]
    fn state_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        assert_eq!(CheckpointState::load(&path).unwrap(), None);
        let state = CheckpointState {
            last_record: vec![json::json!(42), json::json!("2024-01-01T00:00:00.000000000")],
        };
        state.save(&path).unwrap();
        assert_eq!(CheckpointState::load(&path).unwrap(), Some(state));
    }
}

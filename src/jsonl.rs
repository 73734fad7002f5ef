use std::io::{self, Write};

use serde_json as json;

use crate::{ColumnPlan, RecordWriter, Sink, Timestamp};

/// Writes records as JSON lines, one array per record.
#[derive(Debug)]
pub struct JsonLinesSink<W> {
    out: Option<W>,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        JsonLinesSink { out: Some(out) }
    }

    /// The underlying writer; `None` while records are open.
    pub fn into_inner(self) -> Option<W> {
        self.out
    }
}

impl<W: Write> Sink for JsonLinesSink<W> {
    type Records = JsonLinesWriter<W>;

    fn open(&mut self, plans: &[ColumnPlan]) -> io::Result<JsonLinesWriter<W>> {
        let out = self
            .out
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "sink is already open"))?;
        Ok(JsonLinesWriter {
            out,
            plans: plans.to_vec(),
            row: vec![json::Value::Null; plans.len()],
        })
    }

    fn close(&mut self, mut records: JsonLinesWriter<W>) -> io::Result<()> {
        records.out.flush()?;
        self.out = Some(records.out);
        Ok(())
    }
}

#[derive(Debug)]
pub struct JsonLinesWriter<W> {
    out: W,
    plans: Vec<ColumnPlan>,
    row: Vec<json::Value>,
}

impl<W: Write> RecordWriter for JsonLinesWriter<W> {
    fn set_null(&mut self, column: usize) {
        self.row[column] = json::Value::Null;
    }

    fn set_boolean(&mut self, column: usize, value: bool) {
        self.row[column] = json::Value::Bool(value);
    }

    fn set_long(&mut self, column: usize, value: i64) {
        self.row[column] = json::Value::from(value);
    }

    fn set_double(&mut self, column: usize, value: f64) {
        // JSON has no literal for these.
        self.row[column] = match json::Number::from_f64(value) {
            Some(n) => json::Value::Number(n),
            None if value.is_nan() => json::Value::from("NaN"),
            None if value > 0.0 => json::Value::from("Infinity"),
            None => json::Value::from("-Infinity"),
        };
    }

    fn set_string(&mut self, column: usize, value: String) {
        self.row[column] = json::Value::String(value);
    }

    fn set_timestamp(&mut self, column: usize, value: Timestamp) {
        let plan = &self.plans[column];
        self.row[column] = json::Value::String(value.format(plan.display_format(), plan.zone));
    }

    fn set_json(&mut self, column: usize, value: json::Value) {
        self.row[column] = value;
    }

    fn add_record(&mut self) -> io::Result<()> {
        json::to_writer(&mut self.out, &self.row)?;
        self.out.write_all(b"\n")?;
        for value in &mut self.row {
            *value = json::Value::Null;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::FixedOffset;

    use super::*;
    use crate::{sql_type, ColumnDescriptor, OutputKind, TemporalFlavor, Value};

    fn plan(name: &str, kind: OutputKind, flavor: Option<TemporalFlavor>) -> ColumnPlan {
        ColumnPlan {
            descriptor: ColumnDescriptor::new(name, "", sql_type::OTHER),
            kind,
            format: None,
            flavor,
            zone: FixedOffset::east_opt(9 * 3600).unwrap(),
        }
    }

    #[test]
    fn writes_one_array_per_record() {
        let plans = vec![
            plan("id", OutputKind::Integer, None),
            plan("at", OutputKind::Timestamp, Some(TemporalFlavor::DateTime)),
            plan("ratio", OutputKind::Float, None),
            plan("doc", OutputKind::Json, None),
        ];
        let mut sink = JsonLinesSink::new(Vec::new());
        let mut records = sink.open(&plans).unwrap();
        records.set_value(0, Some(Value::Long(1)));
        records.set_value(
            1,
            Some(Value::Timestamp(Timestamp {
                epoch_second: 0,
                nano: 0,
            })),
        );
        records.set_value(2, Some(Value::Double(f64::INFINITY)));
        records.set_value(3, Some(Value::Json(json::json!({"a": [1]}))));
        records.add_record().unwrap();
        records.set_long(0, 2);
        records.add_record().unwrap();
        sink.close(records).unwrap();

        let out = String::from_utf8(sink.into_inner().unwrap()).unwrap();
        assert_eq!(
            out,
            "[1,\"1970-01-01 09:00:00\",\"Infinity\",{\"a\":[1]}]\n[2,null,null,null]\n"
        );
    }

    #[test]
    fn cannot_open_twice() {
        let mut sink = JsonLinesSink::new(Vec::new());
        let _records = sink.open(&[]).unwrap();
        assert!(sink.open(&[]).is_err());
    }
}

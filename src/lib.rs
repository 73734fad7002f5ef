use std::io;

use serde_json as json;

mod checkpoint;
mod config;
mod convert;
mod error;
mod input;
mod jsonl;
mod query;
mod registry;
mod sqlite;
mod types;
mod value;

pub use checkpoint::{Checkpoint, CheckpointState, CheckpointValue, IncrementalCodec};
pub use config::{parse_zone, ColumnOption, InputConfig};
pub use convert::convert;
pub use error::{Error, Result};
pub use input::{InputTask, TaskReport};
pub use jsonl::{JsonLinesSink, JsonLinesWriter};
pub use query::{build as build_query, Comparison, Resume, SelectQuery};
pub use registry::{TypeRegistry, Vendor};
pub use sqlite::{quote_identifier, Cursor, Db, TableReader};
pub use types::{sql_type, ColumnDescriptor, ColumnPlan, OutputKind, TemporalFlavor};
pub use value::{RawValue, Timestamp, Value};

/// Destination of a run's records.
pub trait Sink {
    type Records: RecordWriter;
    fn open(&mut self, plans: &[ColumnPlan]) -> io::Result<Self::Records>;
    fn close(&mut self, records: Self::Records) -> io::Result<()>;
}

/// Builds one record at a time. Columns are addressed by their index in the
/// plan list the sink was opened with; a column left unset is null.
pub trait RecordWriter {
    fn set_null(&mut self, column: usize);
    fn set_boolean(&mut self, column: usize, value: bool);
    fn set_long(&mut self, column: usize, value: i64);
    fn set_double(&mut self, column: usize, value: f64);
    fn set_string(&mut self, column: usize, value: String);
    fn set_timestamp(&mut self, column: usize, value: Timestamp);
    fn set_json(&mut self, column: usize, value: json::Value);
    /// Commit the current record and start a new, all-null one.
    fn add_record(&mut self) -> io::Result<()>;

    fn set_value(&mut self, column: usize, value: Option<Value>) {
        match value {
            None => self.set_null(column),
            Some(Value::Boolean(b)) => self.set_boolean(column, b),
            Some(Value::Long(n)) => self.set_long(column, n),
            Some(Value::Double(f)) => self.set_double(column, f),
            Some(Value::String(s)) => self.set_string(column, s),
            Some(Value::Timestamp(ts)) => self.set_timestamp(column, ts),
            Some(Value::Json(v)) => self.set_json(column, v),
        }
    }
}

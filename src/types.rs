use std::fmt;

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

/// Driver type codes, numbered as in `java.sql.Types`.
///
/// Every driver binding reports column types with these codes so that the
/// generic half of [`TypeRegistry`](crate::TypeRegistry) is shared between
/// vendors.
pub mod sql_type {
    pub const BIT: i32 = -7;
    pub const TINYINT: i32 = -6;
    pub const SMALLINT: i32 = 5;
    pub const INTEGER: i32 = 4;
    pub const BIGINT: i32 = -5;
    pub const FLOAT: i32 = 6;
    pub const REAL: i32 = 7;
    pub const DOUBLE: i32 = 8;
    pub const NUMERIC: i32 = 2;
    pub const DECIMAL: i32 = 3;
    pub const CHAR: i32 = 1;
    pub const VARCHAR: i32 = 12;
    pub const LONGVARCHAR: i32 = -1;
    pub const DATE: i32 = 91;
    pub const TIME: i32 = 92;
    pub const TIMESTAMP: i32 = 93;
    pub const BINARY: i32 = -2;
    pub const VARBINARY: i32 = -3;
    pub const LONGVARBINARY: i32 = -4;
    pub const NULL: i32 = 0;
    pub const OTHER: i32 = 1111;
    pub const STRUCT: i32 = 2002;
    pub const ARRAY: i32 = 2003;
    pub const BLOB: i32 = 2004;
    pub const CLOB: i32 = 2005;
    pub const SQLXML: i32 = 2009;
    pub const NCLOB: i32 = 2011;
    pub const BOOLEAN: i32 = 16;
    pub const NCHAR: i32 = -15;
    pub const NVARCHAR: i32 = -9;
    pub const LONGNVARCHAR: i32 = -16;
    pub const TIME_WITH_TIMEZONE: i32 = 2013;
    pub const TIMESTAMP_WITH_TIMEZONE: i32 = 2014;
}

/// Result-set metadata for one output column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub type_name: String,
    pub type_code: i32,
    pub precision: i32,
    pub scale: i32,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>, type_code: i32) -> Self {
        ColumnDescriptor {
            name: name.into(),
            type_name: type_name.into(),
            type_code,
            precision: 0,
            scale: 0,
        }
    }

    pub fn with_precision(mut self, precision: i32, scale: i32) -> Self {
        self.precision = precision;
        self.scale = scale;
        self
    }
}

/// The closed set of value kinds a record column can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    Boolean,
    #[serde(rename = "long", alias = "integer")]
    Integer,
    #[serde(rename = "double", alias = "float")]
    Float,
    String,
    Timestamp,
    Json,
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            OutputKind::Boolean => "boolean",
            OutputKind::Integer => "long",
            OutputKind::Float => "double",
            OutputKind::String => "string",
            OutputKind::Timestamp => "timestamp",
            OutputKind::Json => "json",
        };
        f.write_str(name)
    }
}

/// Sub-type of a temporal column. Picks the default display format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalFlavor {
    Date,
    Time,
    DateTime,
    DateTimeTz,
}

impl TemporalFlavor {
    pub fn default_format(self) -> &'static str {
        match self {
            TemporalFlavor::Date => "%Y-%m-%d",
            TemporalFlavor::Time => "%H:%M:%S",
            TemporalFlavor::DateTime => "%Y-%m-%d %H:%M:%S",
            TemporalFlavor::DateTimeTz => "%Y-%m-%d %H:%M:%S%:z",
        }
    }
}

/// How one column is read for the whole run.
#[derive(Debug, Clone, Serialize)]
pub struct ColumnPlan {
    pub descriptor: ColumnDescriptor,
    pub kind: OutputKind,
    /// Display format for temporal values, in `strftime` syntax.
    pub format: Option<String>,
    pub flavor: Option<TemporalFlavor>,
    /// Zone in which zone-less temporal values are interpreted.
    #[serde(skip)]
    pub zone: FixedOffset,
}

impl ColumnPlan {
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// The format used when a temporal value is rendered as text.
    pub fn display_format(&self) -> &str {
        match (&self.format, self.flavor) {
            (Some(format), _) => format,
            (None, Some(flavor)) => flavor.default_format(),
            (None, None) => TemporalFlavor::DateTime.default_format(),
        }
    }
}

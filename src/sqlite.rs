use std::path::Path;

use chrono::FixedOffset;
use rusqlite::{
    types::{ToSqlOutput, ValueRef},
    Connection, OpenFlags, ToSql,
};
use tracing::debug;

use crate::{sql_type, CheckpointValue, ColumnDescriptor, RawValue, Result};

#[derive(Debug)]
pub struct Db {
    conn: Connection,
}

impl Db {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Ok(Db { conn })
    }

    pub fn from_connection(conn: Connection) -> Self {
        Db { conn }
    }

    pub fn prepare(&self, sql: &str) -> Result<TableReader> {
        debug!(%sql, "preparing query");
        Ok(TableReader {
            stmt: self.conn.prepare(sql)?,
        })
    }

    /// Primary-key columns of `table`, in key order.
    pub fn primary_key(&self, table: &str) -> Result<Vec<String>> {
        let pragma = match table.rsplit_once('.') {
            Some((schema, name)) => format!(
                "PRAGMA {}.table_info({})",
                quote_identifier(schema),
                quote_identifier(name)
            ),
            None => format!("PRAGMA table_info({})", quote_identifier(table)),
        };
        let mut tbl_info = self.conn.prepare(&pragma)?;
        let mut columns = tbl_info
            .query_map([], |row| Ok((row.get::<_, i64>(5)?, row.get::<_, String>(1)?)))?
            .filter(|entry| !matches!(entry, Ok((0, _))))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        columns.sort_by_key(|(position, _)| *position);
        Ok(columns.into_iter().map(|(_, name)| name).collect())
    }
}

/// Quote a possibly schema-qualified identifier.
pub fn quote_identifier(name: &str) -> String {
    name.split('.')
        .map(|part| format!("\"{}\"", part.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(".")
}

/// Bound parameter counterpart of [`instant_key`].
pub const INSTANT_PARAM: &str = "julianday(?)";

/// An expression ordering `column` by the instant it holds, whatever its
/// storage class: numbers are epoch seconds, text with an offset or `Z` is
/// absolute, zone-less text is wall-clock time at `zone` and time-only text
/// falls on 1970-01-01. Compare it against [`INSTANT_PARAM`] bound to a
/// UTC timestamp.
///
/// SQLite's date functions resolve to milliseconds, so instants within the
/// same millisecond compare equal.
pub fn instant_key(column: &str, zone: FixedOffset) -> String {
    let c = quote_identifier(column);
    let text = format!(
        "CASE WHEN {c} GLOB '[0-9][0-9]:*' THEN '1970-01-01 ' || {c} ELSE {c} END",
        c = c
    );
    let shift = match zone.local_minus_utc() {
        0 => String::new(),
        offset => format!(", '{:+} seconds'", -offset),
    };
    format!(
        "(CASE WHEN typeof({c}) IN ('integer', 'real') THEN julianday({c}, 'unixepoch') \
         WHEN {c} GLOB '*[+-][0-9][0-9]:[0-9][0-9]' OR {c} GLOB '*[Zz]' THEN julianday({text}) \
         ELSE julianday({text}{shift}) END)",
        c = c,
        text = text,
        shift = shift
    )
}

#[derive(Debug)]
pub struct TableReader<'conn> {
    stmt: rusqlite::Statement<'conn>,
}

impl<'conn> TableReader<'conn> {
    pub fn column_count(&self) -> usize {
        self.stmt.column_count()
    }

    /// Result-set metadata, available before the statement runs.
    pub fn describe(&self) -> Vec<ColumnDescriptor> {
        self.stmt
            .columns()
            .iter()
            .map(|column| describe_column(column.name(), column.decl_type()))
            .collect()
    }

    pub fn query(&mut self, params: &[CheckpointValue]) -> Result<Cursor> {
        let column_count = self.stmt.column_count();
        let rows = self.stmt.query(rusqlite::params_from_iter(params.iter()))?;
        Ok(Cursor { rows, column_count })
    }
}

/// An open result cursor. Dropping it resets the statement.
pub struct Cursor<'stmt> {
    rows: rusqlite::Rows<'stmt>,
    column_count: usize,
}

impl<'stmt> Cursor<'stmt> {
    pub fn next_row(&mut self) -> Result<Option<Vec<RawValue>>> {
        let row = match self.rows.next()? {
            Some(row) => row,
            None => return Ok(None),
        };
        let values = (0..self.column_count)
            .map(|i| row.get_ref(i).map(raw_value))
            .collect::<rusqlite::Result<_>>()?;
        Ok(Some(values))
    }
}

fn raw_value(value: ValueRef) -> RawValue {
    match value {
        ValueRef::Null => RawValue::Null,
        ValueRef::Integer(n) => RawValue::Long(n),
        ValueRef::Real(f) => RawValue::Double(f),
        ValueRef::Text(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => RawValue::Text(text.to_owned()),
            Err(_) => RawValue::Bytes(bytes.to_vec()),
        },
        ValueRef::Blob(bytes) => RawValue::Bytes(bytes.to_vec()),
    }
}

/// Map a declared column type onto a type code.
///
/// Well-known type names map directly; anything else follows SQLite's
/// column affinity rules. Expression columns have no declared type and
/// report `NULL`.
fn describe_column(name: &str, decl_type: Option<&str>) -> ColumnDescriptor {
    let decl = decl_type.unwrap_or("").trim();
    let (base, params) = match decl.find('(') {
        Some(pos) => (&decl[..pos], &decl[pos + 1..]),
        None => (decl, ""),
    };
    let base = base.trim().to_ascii_uppercase();
    let type_code = match base.as_str() {
        "" => sql_type::NULL,
        "BOOLEAN" | "BOOL" => sql_type::BOOLEAN,
        "BIT" => sql_type::BIT,
        "TINYINT" => sql_type::TINYINT,
        "SMALLINT" | "INT2" => sql_type::SMALLINT,
        "INT" | "INTEGER" | "MEDIUMINT" | "INT4" => sql_type::INTEGER,
        "BIGINT" | "INT8" | "UNSIGNED BIG INT" => sql_type::BIGINT,
        "REAL" => sql_type::REAL,
        "FLOAT" => sql_type::FLOAT,
        "DOUBLE" | "DOUBLE PRECISION" => sql_type::DOUBLE,
        "NUMERIC" => sql_type::NUMERIC,
        "DECIMAL" => sql_type::DECIMAL,
        "CHAR" | "CHARACTER" => sql_type::CHAR,
        "VARCHAR" | "VARYING CHARACTER" | "TEXT" => sql_type::VARCHAR,
        "NCHAR" | "NATIVE CHARACTER" => sql_type::NCHAR,
        "NVARCHAR" => sql_type::NVARCHAR,
        "CLOB" => sql_type::CLOB,
        "BLOB" => sql_type::BLOB,
        "DATE" => sql_type::DATE,
        "TIME" => sql_type::TIME,
        "DATETIME" | "TIMESTAMP" => sql_type::TIMESTAMP,
        other if other.contains("INT") => sql_type::BIGINT,
        other if other.contains("CHAR") || other.contains("CLOB") || other.contains("TEXT") => {
            sql_type::VARCHAR
        }
        other if other.contains("BLOB") => sql_type::BLOB,
        other if other.contains("REAL") || other.contains("FLOA") || other.contains("DOUB") => {
            sql_type::DOUBLE
        }
        _ => sql_type::OTHER,
    };
    let mut numbers = params
        .trim_end_matches(')')
        .split(',')
        .map(|n| n.trim().parse::<i32>().unwrap_or(0));
    let precision = numbers.next().unwrap_or(0);
    let scale = numbers.next().unwrap_or(0);
    ColumnDescriptor::new(name, decl, type_code).with_precision(precision, scale)
}

impl ToSql for CheckpointValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            CheckpointValue::Long(n) => ToSqlOutput::from(*n),
            CheckpointValue::Text(s) => ToSqlOutput::from(s.as_str()),
            CheckpointValue::Timestamp(naive) => {
                ToSqlOutput::from(naive.format("%Y-%m-%d %H:%M:%S%.f").to_string())
            }
            CheckpointValue::TimestampTz(utc) => ToSqlOutput::from(
                utc.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true),
            ),
        })
    }
}

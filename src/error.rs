use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while planning, converting or checkpointing a query.
///
/// None of these are transient: each one points at a mismatch between the
/// schema, the data and the task configuration, so callers should surface
/// them rather than retry.
#[derive(Error, Debug)]
pub enum Error {
    #[error(
        "unsupported type {type_name:?} (type code {type_code}) of column {column:?}; \
         exclude the column or set an explicit type in column_options"
    )]
    UnsupportedType {
        column: String,
        type_name: String,
        type_code: i32,
    },

    #[error("value {value} of column {column:?} does not fit in a 64-bit signed integer")]
    Overflow { column: String, value: String },

    #[error("malformed checkpoint value {value} for column {column:?}: {reason}")]
    MalformedCheckpoint {
        column: String,
        value: String,
        reason: String,
    },

    #[error("cannot convert column {column:?}: {message}")]
    Conversion { column: String, message: String },

    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
        }
    }

    pub fn conversion(column: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Conversion {
            column: column.into(),
            message: message.into(),
        }
    }

    pub fn overflow(column: impl Into<String>, value: impl ToString) -> Self {
        Error::Overflow {
            column: column.into(),
            value: value.to_string(),
        }
    }
}

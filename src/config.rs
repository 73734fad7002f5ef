use std::{collections::HashMap, fs, path::Path, path::PathBuf};

use chrono::{FixedOffset, Offset, Utc};
use serde::Deserialize;
use serde_json as json;

use crate::{Error, OutputKind, Result, Vendor};

/// Per-column settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ColumnOption {
    /// Output kind, overriding whatever the column type resolves to.
    #[serde(rename = "type")]
    pub kind: Option<OutputKind>,
    pub timestamp_format: Option<String>,
    pub timezone: Option<String>,
}

/// A task description, usually read from a JSON file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InputConfig {
    pub database: Option<PathBuf>,
    pub vendor: Vendor,
    pub table: Option<String>,
    pub select: Option<String>,
    #[serde(rename = "where")]
    pub where_clause: Option<String>,
    pub order_by: Option<String>,
    pub query: Option<String>,
    pub incremental: bool,
    /// Defaults to the table's primary key.
    pub incremental_columns: Vec<String>,
    pub last_record: Option<Vec<json::Value>>,
    pub default_time_zone: Option<String>,
    /// Zone the connection reports zone-less timestamps in; checkpoints of
    /// such columns are then stored as UTC.
    pub session_time_zone: Option<String>,
    pub column_options: HashMap<String, ColumnOption>,
}

impl Default for InputConfig {
    fn default() -> Self {
        InputConfig {
            database: None,
            vendor: Vendor::Sqlite,
            table: None,
            select: None,
            where_clause: None,
            order_by: None,
            query: None,
            incremental: false,
            incremental_columns: Vec::new(),
            last_record: None,
            default_time_zone: None,
            session_time_zone: None,
            column_options: HashMap::new(),
        }
    }
}

impl InputConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        let config: InputConfig = json::from_slice(&bytes).map_err(|e| {
            Error::config(format!("cannot parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        match (&self.table, &self.query) {
            (Some(_), Some(_)) => return Err(Error::config("`table` and `query` are exclusive")),
            (None, None) => return Err(Error::config("either `table` or `query` is required")),
            _ => {}
        }
        if self.query.is_some() {
            for (key, set) in &[
                ("select", self.select.is_some()),
                ("where", self.where_clause.is_some()),
                ("order_by", self.order_by.is_some()),
            ] {
                if *set {
                    return Err(Error::config(format!("`{}` cannot be used with `query`", key)));
                }
            }
        }
        if !self.incremental && !self.incremental_columns.is_empty() {
            return Err(Error::config(
                "`incremental_columns` is set but `incremental` is false",
            ));
        }
        self.default_zone()?;
        self.session_zone()?;
        Ok(())
    }

    pub fn default_zone(&self) -> Result<FixedOffset> {
        match &self.default_time_zone {
            Some(zone) => parse_zone(zone),
            None => Ok(utc()),
        }
    }

    pub fn session_zone(&self) -> Result<Option<FixedOffset>> {
        self.session_time_zone.as_deref().map(parse_zone).transpose()
    }
}

fn utc() -> FixedOffset {
    Utc.fix()
}

/// Parse `UTC`, `Z` or a fixed offset such as `+09:00`, `-0530` or `+9`.
pub fn parse_zone(text: &str) -> Result<FixedOffset> {
    let invalid = || Error::config(format!("invalid time zone {:?}", text));
    let text = text.trim();
    if text.eq_ignore_ascii_case("utc") || text.eq_ignore_ascii_case("z") {
        return Ok(utc());
    }
    let offset = text
        .strip_prefix("UTC")
        .or_else(|| text.strip_prefix("GMT"))
        .unwrap_or(text);
    let (sign, rest) = match offset.as_bytes().first() {
        Some(b'+') => (1, &offset[1..]),
        Some(b'-') => (-1, &offset[1..]),
        _ => return Err(invalid()),
    };
    let (hours, minutes) = match rest.split_once(':') {
        Some((h, m)) => (h, m),
        None if rest.len() == 4 && rest.bytes().all(|b| b.is_ascii_digit()) => rest.split_at(2),
        None => (rest, "0"),
    };
    let hours: i32 = hours.parse().map_err(|_| invalid())?;
    let minutes: i32 = minutes.parse().map_err(|_| invalid())?;
    if hours > 23 || minutes > 59 {
        return Err(invalid());
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}

use std::collections::HashMap;

use chrono::FixedOffset;
use once_cell::sync::Lazy;
use serde::Deserialize;
use tracing::debug;

use crate::{
    config::{parse_zone, ColumnOption},
    ColumnDescriptor, ColumnPlan, Error, OutputKind, Result, TemporalFlavor,
};

/// Database engine whose type-name quirks apply on top of the generic table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vendor {
    Generic,
    Sqlite,
    #[serde(alias = "mariadb")]
    MySql,
    #[serde(alias = "postgres")]
    PostgreSql,
    Redshift,
    ClickHouse,
    Oracle,
    #[serde(alias = "mssql")]
    SqlServer,
    Db2,
    Cache,
}

#[derive(Debug, Clone, Copy)]
struct Override {
    kind: OutputKind,
    flavor: Option<TemporalFlavor>,
}

const fn kind(kind: OutputKind) -> Override {
    Override { kind, flavor: None }
}

const fn temporal(flavor: TemporalFlavor) -> Override {
    Override {
        kind: OutputKind::Timestamp,
        flavor: Some(flavor),
    }
}

type OverrideTable = HashMap<&'static str, Override>;

static POSTGRESQL: Lazy<OverrideTable> = Lazy::new(|| {
    vec![
        ("json", kind(OutputKind::Json)),
        ("jsonb", kind(OutputKind::Json)),
        ("hstore", kind(OutputKind::Json)),
        ("bool", kind(OutputKind::Boolean)),
        ("uuid", kind(OutputKind::String)),
        ("inet", kind(OutputKind::String)),
        ("cidr", kind(OutputKind::String)),
        ("interval", kind(OutputKind::String)),
        ("money", kind(OutputKind::Float)),
        ("timestamptz", temporal(TemporalFlavor::DateTimeTz)),
        ("timetz", temporal(TemporalFlavor::Time)),
    ]
    .into_iter()
    .collect()
});

static MYSQL: Lazy<OverrideTable> = Lazy::new(|| {
    vec![
        ("json", kind(OutputKind::Json)),
        ("year", kind(OutputKind::Integer)),
        ("bigint unsigned", kind(OutputKind::String)),
        ("bit", kind(OutputKind::Boolean)),
        ("enum", kind(OutputKind::String)),
        ("set", kind(OutputKind::String)),
        ("datetime", temporal(TemporalFlavor::DateTime)),
    ]
    .into_iter()
    .collect()
});

static CLICKHOUSE: Lazy<OverrideTable> = Lazy::new(|| {
    let mut table: OverrideTable = vec![
        ("uint64", kind(OutputKind::String)),
        ("int128", kind(OutputKind::String)),
        ("uint128", kind(OutputKind::String)),
        ("int256", kind(OutputKind::String)),
        ("uint256", kind(OutputKind::String)),
        ("float32", kind(OutputKind::Float)),
        ("float64", kind(OutputKind::Float)),
        ("array", kind(OutputKind::Json)),
        ("tuple", kind(OutputKind::Json)),
        ("map", kind(OutputKind::Json)),
        ("nested", kind(OutputKind::Json)),
        ("date", temporal(TemporalFlavor::Date)),
        ("date32", temporal(TemporalFlavor::Date)),
        ("datetime", temporal(TemporalFlavor::DateTime)),
        ("datetime64", temporal(TemporalFlavor::DateTime)),
        ("uuid", kind(OutputKind::String)),
        ("enum8", kind(OutputKind::String)),
        ("enum16", kind(OutputKind::String)),
        ("ipv4", kind(OutputKind::String)),
        ("ipv6", kind(OutputKind::String)),
        ("bool", kind(OutputKind::Boolean)),
        ("string", kind(OutputKind::String)),
        ("fixedstring", kind(OutputKind::String)),
    ]
    .into_iter()
    .collect();
    for name in &["uint8", "uint16", "uint32", "int8", "int16", "int32", "int64"] {
        table.insert(*name, kind(OutputKind::Integer));
    }
    for name in &["decimal", "decimal32", "decimal64", "decimal128", "decimal256"] {
        table.insert(*name, kind(OutputKind::Float));
    }
    table
});

static ORACLE: Lazy<OverrideTable> = Lazy::new(|| {
    vec![
        // Oracle DATE carries a time of day.
        ("date", temporal(TemporalFlavor::DateTime)),
        ("number", kind(OutputKind::Float)),
        ("binary_float", kind(OutputKind::Float)),
        ("binary_double", kind(OutputKind::Float)),
        (
            "timestamp with time zone",
            temporal(TemporalFlavor::DateTimeTz),
        ),
        (
            "timestamp with local time zone",
            temporal(TemporalFlavor::DateTimeTz),
        ),
        ("rowid", kind(OutputKind::String)),
    ]
    .into_iter()
    .collect()
});

static SQLSERVER: Lazy<OverrideTable> = Lazy::new(|| {
    vec![
        ("datetimeoffset", temporal(TemporalFlavor::DateTimeTz)),
        ("uniqueidentifier", kind(OutputKind::String)),
        ("xml", kind(OutputKind::String)),
        ("smalldatetime", temporal(TemporalFlavor::DateTime)),
        ("datetime2", temporal(TemporalFlavor::DateTime)),
        ("money", kind(OutputKind::Float)),
        ("smallmoney", kind(OutputKind::Float)),
    ]
    .into_iter()
    .collect()
});

static DB2: Lazy<OverrideTable> = Lazy::new(|| {
    vec![
        ("decfloat", kind(OutputKind::Float)),
        ("xml", kind(OutputKind::String)),
    ]
    .into_iter()
    .collect()
});

static CACHE: Lazy<OverrideTable> = Lazy::new(|| {
    vec![
        ("bit", kind(OutputKind::Boolean)),
        ("posixtime", temporal(TemporalFlavor::DateTime)),
        ("longvarchar", kind(OutputKind::String)),
    ]
    .into_iter()
    .collect()
});

static SQLITE: Lazy<OverrideTable> = Lazy::new(|| {
    vec![
        ("json", kind(OutputKind::Json)),
        ("datetime", temporal(TemporalFlavor::DateTime)),
        ("boolean", kind(OutputKind::Boolean)),
    ]
    .into_iter()
    .collect()
});

static EMPTY: Lazy<OverrideTable> = Lazy::new(HashMap::new);

impl Vendor {
    fn overrides(self) -> &'static OverrideTable {
        match self {
            Vendor::Generic => &EMPTY,
            Vendor::Sqlite => &SQLITE,
            Vendor::MySql => &MYSQL,
            Vendor::PostgreSql | Vendor::Redshift => &POSTGRESQL,
            Vendor::ClickHouse => &CLICKHOUSE,
            Vendor::Oracle => &ORACLE,
            Vendor::SqlServer => &SQLSERVER,
            Vendor::Db2 => &DB2,
            Vendor::Cache => &CACHE,
        }
    }

    fn lookup(self, type_name: &str) -> Option<Override> {
        let name = normalize_type_name(type_name);
        if let Some(found) = self.overrides().get(name.as_str()) {
            return Some(*found);
        }
        match self {
            // Array types are reported as the element type prefixed with `_`.
            Vendor::PostgreSql | Vendor::Redshift if name.starts_with('_') => {
                Some(kind(OutputKind::Json))
            }
            _ => None,
        }
    }
}

/// Lowercase base name of a driver type: wrappers such as `Nullable(..)` are
/// peeled off and any parameter list is dropped.
fn normalize_type_name(type_name: &str) -> String {
    let mut name = type_name.trim();
    loop {
        let lower = name.to_ascii_lowercase();
        let inner = ["nullable(", "lowcardinality("]
            .iter()
            .find(|wrapper| lower.starts_with(*wrapper) && lower.ends_with(')'))
            .map(|wrapper| &name[wrapper.len()..name.len() - 1]);
        match inner {
            Some(inner) => name = inner.trim(),
            None => break,
        }
    }
    let base = match name.find('(') {
        Some(pos) => &name[..pos],
        None => name,
    };
    base.trim().to_ascii_lowercase()
}

fn generic_kind(type_code: i32) -> Option<OutputKind> {
    use crate::types::sql_type::*;
    let kind = match type_code {
        BIT | BOOLEAN => OutputKind::Boolean,
        TINYINT | SMALLINT | INTEGER | BIGINT => OutputKind::Integer,
        FLOAT | REAL | DOUBLE | NUMERIC | DECIMAL => OutputKind::Float,
        CHAR | VARCHAR | LONGVARCHAR | CLOB | NCHAR | NVARCHAR | LONGNVARCHAR | NCLOB
        | SQLXML => OutputKind::String,
        DATE | TIME | TIMESTAMP | TIME_WITH_TIMEZONE | TIMESTAMP_WITH_TIMEZONE => {
            OutputKind::Timestamp
        }
        _ => return None,
    };
    Some(kind)
}

fn generic_flavor(type_code: i32) -> Option<TemporalFlavor> {
    use crate::types::sql_type::*;
    match type_code {
        DATE => Some(TemporalFlavor::Date),
        TIME | TIME_WITH_TIMEZONE => Some(TemporalFlavor::Time),
        TIMESTAMP => Some(TemporalFlavor::DateTime),
        TIMESTAMP_WITH_TIMEZONE => Some(TemporalFlavor::DateTimeTz),
        _ => None,
    }
}

/// Maps driver column types onto output kinds.
///
/// Lookup order is: the vendor's type-name overrides, then the generic
/// table keyed by type code. Explicit per-column options, applied in
/// [`TypeRegistry::plan`], win over both.
#[derive(Debug, Clone, Copy)]
pub struct TypeRegistry {
    vendor: Vendor,
}

impl TypeRegistry {
    pub fn new(vendor: Vendor) -> Self {
        TypeRegistry { vendor }
    }

    pub fn vendor(&self) -> Vendor {
        self.vendor
    }

    pub fn resolve(&self, descriptor: &ColumnDescriptor) -> Result<OutputKind> {
        if let Some(found) = self.vendor.lookup(&descriptor.type_name) {
            return Ok(found.kind);
        }
        generic_kind(descriptor.type_code).ok_or_else(|| Error::UnsupportedType {
            column: descriptor.name.clone(),
            type_name: descriptor.type_name.clone(),
            type_code: descriptor.type_code,
        })
    }

    fn flavor(&self, descriptor: &ColumnDescriptor) -> Option<TemporalFlavor> {
        match self.vendor.lookup(&descriptor.type_name) {
            Some(found) if found.kind == OutputKind::Timestamp => found.flavor,
            Some(_) => None,
            None => generic_flavor(descriptor.type_code),
        }
    }

    /// Build the plan for one column.
    pub fn plan(
        &self,
        descriptor: &ColumnDescriptor,
        option: Option<&ColumnOption>,
        default_zone: FixedOffset,
    ) -> Result<ColumnPlan> {
        let kind = match option.and_then(|option| option.kind) {
            Some(kind) => kind,
            None => self.resolve(descriptor)?,
        };
        let flavor = match (self.flavor(descriptor), kind) {
            (Some(flavor), _) => Some(flavor),
            (None, OutputKind::Timestamp) => Some(TemporalFlavor::DateTime),
            (None, _) => None,
        };
        let zone = match option.and_then(|option| option.timezone.as_deref()) {
            Some(zone) => parse_zone(zone)?,
            None => default_zone,
        };
        let plan = ColumnPlan {
            descriptor: descriptor.clone(),
            kind,
            format: option.and_then(|option| option.timestamp_format.clone()),
            flavor,
            zone,
        };
        debug!(
            column = %plan.descriptor.name,
            type_name = %plan.descriptor.type_name,
            type_code = plan.descriptor.type_code,
            kind = %plan.kind,
            "resolved column"
        );
        Ok(plan)
    }

    /// Plan every column of a result set. Column options are matched by
    /// name, case-insensitively.
    pub fn plan_all(
        &self,
        descriptors: &[ColumnDescriptor],
        options: &HashMap<String, ColumnOption>,
        default_zone: FixedOffset,
    ) -> Result<Vec<ColumnPlan>> {
        for name in options.keys() {
            if !descriptors
                .iter()
                .any(|d| d.name.eq_ignore_ascii_case(name))
            {
                return Err(Error::config(format!(
                    "column_options refers to unknown column {:?}",
                    name
                )));
            }
        }
        descriptors
            .iter()
            .map(|descriptor| {
                let option = options
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(&descriptor.name))
                    .map(|(_, option)| option);
                self.plan(descriptor, option, default_zone)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql_type;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    #[test]
    fn normalizes_wrapped_and_parameterized_names() {
        assert_eq!(normalize_type_name("Nullable(UInt64)"), "uint64");
        assert_eq!(
            normalize_type_name("LowCardinality(Nullable(String))"),
            "string"
        );
        assert_eq!(normalize_type_name("Array(Tuple(UInt8, String))"), "array");
        assert_eq!(normalize_type_name(" DECIMAL(10,2) "), "decimal");
        assert_eq!(normalize_type_name("BIGINT UNSIGNED"), "bigint unsigned");
    }

    #[test]
    fn generic_table() {
        let registry = TypeRegistry::new(Vendor::Generic);
        let cases = [
            (sql_type::SMALLINT, OutputKind::Integer),
            (sql_type::BIGINT, OutputKind::Integer),
            (sql_type::REAL, OutputKind::Float),
            (sql_type::DECIMAL, OutputKind::Float),
            (sql_type::CLOB, OutputKind::String),
            (sql_type::NVARCHAR, OutputKind::String),
            (sql_type::TIME, OutputKind::Timestamp),
            (sql_type::BIT, OutputKind::Boolean),
        ];
        for (code, expected) in &cases {
            let descriptor = ColumnDescriptor::new("c", "whatever", *code);
            assert_eq!(registry.resolve(&descriptor).unwrap(), *expected);
        }
    }

    #[test]
    fn vendor_overrides_take_precedence() {
        let pg = TypeRegistry::new(Vendor::PostgreSql);
        // PostgreSQL reports `bool` with the BIT code and json as OTHER.
        let bool_col = ColumnDescriptor::new("b", "bool", sql_type::BIT);
        assert_eq!(pg.resolve(&bool_col).unwrap(), OutputKind::Boolean);
        let json_col = ColumnDescriptor::new("j", "jsonb", sql_type::OTHER);
        assert_eq!(pg.resolve(&json_col).unwrap(), OutputKind::Json);
        let array_col = ColumnDescriptor::new("a", "_int4", sql_type::ARRAY);
        assert_eq!(pg.resolve(&array_col).unwrap(), OutputKind::Json);

        let ch = TypeRegistry::new(Vendor::ClickHouse);
        let big = ColumnDescriptor::new("n", "Nullable(UInt64)", sql_type::BIGINT);
        assert_eq!(ch.resolve(&big).unwrap(), OutputKind::String);
        assert_eq!(
            TypeRegistry::new(Vendor::Generic).resolve(&big).unwrap(),
            OutputKind::Integer
        );
    }

    #[test]
    fn oracle_date_is_full_datetime() {
        let registry = TypeRegistry::new(Vendor::Oracle);
        let descriptor = ColumnDescriptor::new("created", "DATE", sql_type::DATE);
        let plan = registry.plan(&descriptor, None, utc()).unwrap();
        assert_eq!(plan.kind, OutputKind::Timestamp);
        assert_eq!(plan.flavor, Some(TemporalFlavor::DateTime));
        assert_eq!(plan.display_format(), "%Y-%m-%d %H:%M:%S");

        let generic = TypeRegistry::new(Vendor::Generic)
            .plan(&descriptor, None, utc())
            .unwrap();
        assert_eq!(generic.flavor, Some(TemporalFlavor::Date));
    }

    #[test]
    fn unknown_type_is_unsupported() {
        let registry = TypeRegistry::new(Vendor::MySql);
        let descriptor = ColumnDescriptor::new("shape", "GEOMETRY", sql_type::BINARY);
        match registry.resolve(&descriptor) {
            Err(Error::UnsupportedType {
                column, type_name, ..
            }) => {
                assert_eq!(column, "shape");
                assert_eq!(type_name, "GEOMETRY");
            }
            other => panic!("expected UnsupportedType, got {:?}", other),
        }
    }

    #[test]
    fn column_option_rescues_unsupported_type() {
        let registry = TypeRegistry::new(Vendor::Generic);
        let descriptor = ColumnDescriptor::new("blob", "BLOB", sql_type::BLOB);
        let option = ColumnOption {
            kind: Some(OutputKind::String),
            ..Default::default()
        };
        let plan = registry.plan(&descriptor, Some(&option), utc()).unwrap();
        assert_eq!(plan.kind, OutputKind::String);
    }

    #[test]
    fn column_option_for_missing_column_is_rejected() {
        let registry = TypeRegistry::new(Vendor::Generic);
        let descriptors = vec![ColumnDescriptor::new("id", "INTEGER", sql_type::INTEGER)];
        let mut options = HashMap::new();
        options.insert("nope".to_owned(), ColumnOption::default());
        assert!(matches!(
            registry.plan_all(&descriptors, &options, utc()),
            Err(Error::Config { .. })
        ));
    }
}

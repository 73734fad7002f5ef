use chrono::FixedOffset;

use crate::{
    sqlite::{instant_key, quote_identifier, INSTANT_PARAM},
    CheckpointValue, Error, InputConfig, Result,
};

/// SQL text plus the values bound to its `?` placeholders.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    pub sql: String,
    pub params: Vec<CheckpointValue>,
}

/// How an incremental column is compared with its checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// Stored values against the bound value, as they are.
    Value,
    /// Instants, whatever form the column stores them in; zone-less text is
    /// read at the given offset. The bound value must be a UTC timestamp.
    Instant(FixedOffset),
}

impl Comparison {
    fn key(self, column: &str) -> String {
        match self {
            Comparison::Value => quote_identifier(column),
            Comparison::Instant(zone) => instant_key(column, zone),
        }
    }

    fn param(self) -> &'static str {
        match self {
            Comparison::Value => "?",
            Comparison::Instant(_) => INSTANT_PARAM,
        }
    }
}

/// Where an incremental run resumes from.
#[derive(Debug, Clone, Copy)]
pub struct Resume<'a> {
    pub columns: &'a [String],
    /// One per column.
    pub comparisons: &'a [Comparison],
    /// Checkpoint values from the previous run, one per column; `None` on
    /// the first run.
    pub last_record: Option<&'a [CheckpointValue]>,
}

/// Assemble the SELECT for a task.
///
/// With `resume`, rows are ordered by the incremental columns and, when a
/// previous checkpoint exists, restricted to rows strictly after it in that
/// order.
pub fn build(config: &InputConfig, resume: Option<Resume<'_>>) -> Result<SelectQuery> {
    if let Some(query) = &config.query {
        if resume.is_some() {
            return Err(Error::config(
                "incremental loading requires `table`; it cannot be used with `query`",
            ));
        }
        return Ok(SelectQuery {
            sql: query.clone(),
            params: Vec::new(),
        });
    }
    let table = config
        .table
        .as_deref()
        .ok_or_else(|| Error::config("either `table` or `query` is required"))?;

    let mut sql = format!(
        "SELECT {} FROM {}",
        config.select.as_deref().unwrap_or("*"),
        quote_identifier(table)
    );
    let mut params = Vec::new();
    let mut predicates = Vec::new();
    if let Some(where_clause) = &config.where_clause {
        if has_placeholder(where_clause) {
            return Err(Error::config(
                "`where` cannot contain `?` parameters; write the values inline",
            ));
        }
        predicates.push(format!("({})", where_clause));
    }
    if let Some(resume) = resume {
        if resume.comparisons.len() != resume.columns.len() {
            return Err(Error::config(format!(
                "{} incremental columns but {} comparisons",
                resume.columns.len(),
                resume.comparisons.len()
            )));
        }
    }
    if let Some(Resume {
        columns,
        comparisons,
        last_record: Some(values),
    }) = resume
    {
        if columns.len() != values.len() {
            return Err(Error::config(format!(
                "{} incremental columns but {} checkpoint values",
                columns.len(),
                values.len()
            )));
        }
        predicates.push(format!(
            "({})",
            incremental_predicate(columns, comparisons)
        ));
        params = incremental_params(values);
    }
    if !predicates.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&predicates.join(" AND "));
    }

    match (resume, &config.order_by) {
        (Some(_), Some(_)) => {
            return Err(Error::config(
                "`order_by` cannot be combined with incremental loading",
            ))
        }
        (
            Some(Resume {
                columns,
                comparisons,
                ..
            }),
            None,
        ) => {
            let order = columns
                .iter()
                .zip(comparisons)
                .map(|(c, comparison)| comparison.key(c))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(" ORDER BY ");
            sql.push_str(&order);
        }
        (None, Some(order_by)) => {
            sql.push_str(" ORDER BY ");
            sql.push_str(order_by);
        }
        (None, None) => {}
    }
    Ok(SelectQuery { sql, params })
}

/// `c1 > ? OR (c1 = ? AND c2 > ?) OR ...`, the rows after a checkpoint in
/// lexicographic order.
fn incremental_predicate(columns: &[String], comparisons: &[Comparison]) -> String {
    let keys: Vec<_> = columns
        .iter()
        .zip(comparisons)
        .map(|(c, comparison)| (comparison.key(c), comparison.param()))
        .collect();
    (0..keys.len())
        .map(|i| {
            let mut terms: Vec<String> = keys[..i]
                .iter()
                .map(|(key, param)| format!("{} = {}", key, param))
                .collect();
            terms.push(format!("{} > {}", keys[i].0, keys[i].1));
            if terms.len() == 1 {
                terms.remove(0)
            } else {
                format!("({})", terms.join(" AND "))
            }
        })
        .collect::<Vec<_>>()
        .join(" OR ")
}

fn incremental_params(values: &[CheckpointValue]) -> Vec<CheckpointValue> {
    (0..values.len())
        .flat_map(|i| values[..=i].iter().cloned())
        .collect()
}

/// Whether `sql` holds a `?` outside of quoted literals and identifiers.
fn has_placeholder(sql: &str) -> bool {
    let mut quote = None;
    for c in sql.chars() {
        match (quote, c) {
            (None, '\'') | (None, '"') => quote = Some(c),
            (None, '?') => return true,
            // A doubled quote reopens the literal right away.
            (Some(q), c) if c == q => quote = None,
            _ => {}
        }
    }
    false
}

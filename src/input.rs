use serde_json as json;
use tracing::{debug, info};

use crate::{
    convert,
    query::{self, Comparison},
    Checkpoint, CheckpointValue, ColumnPlan, Db, Error, IncrementalCodec,
    InputConfig, RecordWriter, Resume, Result, Sink, TypeRegistry, Value,
};

/// One configured read of a database into a [`Sink`].
#[derive(Debug)]
pub struct InputTask {
    config: InputConfig,
    registry: TypeRegistry,
}

/// Outcome of [`InputTask::run`].
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub rows: u64,
    pub plans: Vec<ColumnPlan>,
    pub checkpoints: Vec<Checkpoint>,
    /// State for the next run; `None` unless the task is incremental and
    /// some run has seen a row.
    pub last_record: Option<Vec<json::Value>>,
}

/// Incremental columns resolved against the result set.
struct Tracking {
    columns: Vec<String>,
    indexes: Vec<usize>,
    codecs: Vec<IncrementalCodec>,
    comparisons: Vec<Comparison>,
}

impl Tracking {
    fn bind_values(
        &self,
        values: &[CheckpointValue],
        plans: &[ColumnPlan],
    ) -> Result<Vec<CheckpointValue>> {
        self.indexes
            .iter()
            .zip(&self.codecs)
            .zip(values)
            .map(|((&index, codec), value)| codec.bind_value(value, &plans[index]))
            .collect()
    }
}

impl InputTask {
    pub fn new(config: InputConfig) -> Result<Self> {
        config.validate()?;
        let registry = TypeRegistry::new(config.vendor);
        Ok(InputTask { config, registry })
    }

    pub fn config(&self) -> &InputConfig {
        &self.config
    }

    pub fn run(&self, db: &Db, sink: &mut impl Sink) -> Result<TaskReport> {
        let columns = self.incremental_columns(db)?;

        // Result-set metadata is the same with or without the resume clauses.
        let base = query::build(&self.config, None)?;
        let mut reader = db.prepare(&base.sql)?;
        let plans = self.registry.plan_all(
            &reader.describe(),
            &self.config.column_options,
            self.config.default_zone()?,
        )?;

        let tracking = match columns {
            Some(columns) => Some(self.track(columns, &plans)?),
            None => None,
        };
        let resume_from = match &tracking {
            Some(tracking) => self.decode_last_record(tracking)?,
            None => None,
        };
        let params = match &tracking {
            Some(tracking) => {
                let bound = match &resume_from {
                    Some(values) => Some(tracking.bind_values(values, &plans)?),
                    None => None,
                };
                let resumed = query::build(
                    &self.config,
                    Some(Resume {
                        columns: &tracking.columns,
                        comparisons: &tracking.comparisons,
                        last_record: bound.as_deref(),
                    }),
                )?;
                reader = db.prepare(&resumed.sql)?;
                resumed.params
            }
            None => base.params,
        };

        let mut records = sink.open(&plans)?;
        let mut cursor = reader.query(&params)?;
        let mut rows = 0u64;
        let mut last_tracked: Option<Vec<Option<Value>>> = None;
        while let Some(raw) = cursor.next_row()? {
            let values = raw
                .iter()
                .zip(&plans)
                .map(|(raw, plan)| convert(raw, plan))
                .collect::<Result<Vec<_>>>()?;
            if let Some(tracking) = &tracking {
                last_tracked = Some(tracking.indexes.iter().map(|&i| values[i].clone()).collect());
            }
            for (column, value) in values.into_iter().enumerate() {
                records.set_value(column, value);
            }
            records.add_record()?;
            rows += 1;
        }
        drop(cursor);
        sink.close(records)?;

        let checkpoints = match (&tracking, last_tracked) {
            (Some(tracking), Some(values)) => self.capture(tracking, &plans, values)?,
            // No new rows: the previous checkpoint still stands.
            (Some(tracking), None) => tracking
                .indexes
                .iter()
                .zip(self.config.last_record.iter().flatten())
                .map(|(&column_index, value)| Checkpoint {
                    column_index,
                    encoded_value: value.clone(),
                })
                .collect(),
            (None, _) => Vec::new(),
        };
        let last_record = if checkpoints.is_empty() {
            None
        } else {
            Some(checkpoints.iter().map(|c| c.encoded_value.clone()).collect())
        };
        info!(
            rows,
            columns = plans.len(),
            resumed = resume_from.is_some(),
            last_record = ?last_record,
            "input finished"
        );
        Ok(TaskReport {
            rows,
            plans,
            checkpoints,
            last_record,
        })
    }

    /// `None` for a non-incremental task. An empty column list falls back to
    /// the table's primary key.
    fn incremental_columns(&self, db: &Db) -> Result<Option<Vec<String>>> {
        if !self.config.incremental {
            return Ok(None);
        }
        if !self.config.incremental_columns.is_empty() {
            return Ok(Some(self.config.incremental_columns.clone()));
        }
        let table = self
            .config
            .table
            .as_deref()
            .ok_or_else(|| Error::config("incremental loading requires `table`"))?;
        let key = db.primary_key(table)?;
        if key.is_empty() {
            return Err(Error::config(format!(
                "table {:?} has no primary key; set `incremental_columns`",
                table
            )));
        }
        debug!(?key, "incremental columns default to the primary key");
        Ok(Some(key))
    }

    fn track(&self, columns: Vec<String>, plans: &[ColumnPlan]) -> Result<Tracking> {
        let session_zone = self.config.session_zone()?;
        let mut indexes = Vec::with_capacity(columns.len());
        let mut codecs = Vec::with_capacity(columns.len());
        let mut comparisons = Vec::with_capacity(columns.len());
        for column in &columns {
            let index = plans
                .iter()
                .position(|plan| plan.name().eq_ignore_ascii_case(column))
                .ok_or_else(|| {
                    Error::config(format!(
                        "incremental column {:?} is not in the result set",
                        column
                    ))
                })?;
            let codec = IncrementalCodec::for_plan(&plans[index], session_zone)?;
            comparisons.push(codec.comparison(&plans[index]));
            codecs.push(codec);
            indexes.push(index);
        }
        Ok(Tracking {
            columns,
            indexes,
            codecs,
            comparisons,
        })
    }

    fn decode_last_record(&self, tracking: &Tracking) -> Result<Option<Vec<CheckpointValue>>> {
        let encoded = match &self.config.last_record {
            Some(encoded) => encoded,
            None => return Ok(None),
        };
        if encoded.len() != tracking.columns.len() {
            return Err(Error::MalformedCheckpoint {
                column: tracking.columns.join(", "),
                value: json::Value::from(encoded.clone()).to_string(),
                reason: format!(
                    "expected {} values, one per incremental column",
                    tracking.columns.len()
                ),
            });
        }
        tracking
            .columns
            .iter()
            .zip(&tracking.codecs)
            .zip(encoded)
            .map(|((column, codec), value)| codec.decode(column, value))
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }

    fn capture(
        &self,
        tracking: &Tracking,
        plans: &[ColumnPlan],
        values: Vec<Option<Value>>,
    ) -> Result<Vec<Checkpoint>> {
        tracking
            .indexes
            .iter()
            .zip(&tracking.codecs)
            .zip(values)
            .map(|((&column_index, codec), value)| {
                let plan = &plans[column_index];
                let value = value.ok_or_else(|| {
                    Error::conversion(plan.name(), "incremental column is null in the last row")
                })?;
                let captured = codec.capture(&value, plan)?;
                Ok(Checkpoint {
                    column_index,
                    encoded_value: codec.encode(plan.name(), &captured)?,
                })
            })
            .collect()
    }
}

use std::{
    fs::{self, File},
    io,
    path::PathBuf,
};

use anyhow::{format_err, Context as _};
use serde_json as json;
use structopt::StructOpt;
use tracing_subscriber::EnvFilter;

use sqlinput::{CheckpointState, Db, InputConfig, InputTask, JsonLinesSink, TaskReport};

/// Read a table or query of an SQLite database as JSON-lines records.
#[derive(StructOpt)]
struct Opt {
    /// Task configuration file (JSON).
    #[structopt(long = "config", short = "c")]
    config: PathBuf,
    /// Database to read from, overriding `database` in the task file.
    #[structopt(long = "database")]
    database: Option<PathBuf>,
    /// Where to write records; defaults to standard output.
    #[structopt(long = "output", short = "o")]
    output: Option<PathBuf>,
    /// Checkpoint state file.
    ///
    /// Read at start to resume an incremental task, and rewritten when the
    /// run succeeds.
    #[structopt(long = "state")]
    state: Option<PathBuf>,
    /// Write the resolved column plans to this file.
    #[structopt(long = "schema-out")]
    schema_out: Option<PathBuf>,
}

fn load_config(opt: &Opt) -> anyhow::Result<InputConfig> {
    let mut config = InputConfig::load(&opt.config)
        .with_context(|| format!("could not load task file {}", opt.config.display()))?;
    if let Some(database) = &opt.database {
        config.database = Some(database.clone());
    }
    if let Some(path) = &opt.state {
        let state = CheckpointState::load(path)
            .with_context(|| format!("could not read state file {}", path.display()))?;
        if let Some(state) = state {
            config.last_record = Some(state.last_record);
        }
    }
    Ok(config)
}

fn fill_output(task: &InputTask, db: &Db, opt: &Opt) -> anyhow::Result<TaskReport> {
    let report = match &opt.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("could not create {}", path.display()))?;
            let mut sink = JsonLinesSink::new(io::BufWriter::new(file));
            task.run(db, &mut sink)?
        }
        None => {
            let stdout = io::stdout();
            let mut sink = JsonLinesSink::new(io::BufWriter::new(stdout.lock()));
            task.run(db, &mut sink)?
        }
    };
    Ok(report)
}

fn run(opt: &Opt) -> anyhow::Result<()> {
    let config = load_config(opt)?;
    let db_path = config
        .database
        .clone()
        .ok_or_else(|| format_err!("no database given; set `database` or pass --database"))?;
    let db = Db::open(&db_path)
        .with_context(|| format!("could not open database {}", db_path.display()))?;
    let task = InputTask::new(config)?;
    let report = fill_output(&task, &db, opt).context("input task failed")?;

    if let Some(path) = &opt.schema_out {
        fs::write(path, json::to_vec_pretty(&report.plans)?)
            .with_context(|| format!("could not write schema to {}", path.display()))?;
    }
    if let (Some(path), Some(last_record)) = (&opt.state, report.last_record) {
        CheckpointState { last_record }
            .save(path)
            .with_context(|| format!("could not write state file {}", path.display()))?;
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(io::stderr)
        .init();
    let opt = Opt::from_args();
    let rc = match run(&opt) {
        Ok(()) => 0,
        Err(e) => {
            for (i, e) in e.chain().enumerate() {
                if i == 0 {
                    eprintln!("{}", e);
                } else {
                    eprintln!("caused by: {}", e);
                }
            }
            1
        }
    };
    std::process::exit(rc);
}

use std::path::Path;

use rusqlite::Connection;
use serde_json as json;

use sqlinput::{
    CheckpointState, Db, Error, InputConfig, InputTask, JsonLinesSink, OutputKind, TaskReport,
};

fn run(path: &Path, config: InputConfig) -> sqlinput::Result<(TaskReport, Vec<String>)> {
    let db = Db::open(path)?;
    let task = InputTask::new(config)?;
    let mut sink = JsonLinesSink::new(Vec::new());
    let report = task.run(&db, &mut sink)?;
    let out = String::from_utf8(sink.into_inner().unwrap()).unwrap();
    Ok((report, out.lines().map(ToOwned::to_owned).collect()))
}

fn events_db(dir: &Path) -> (std::path::PathBuf, Connection) {
    let path = dir.join("events.sqlite");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE events (id INTEGER PRIMARY KEY, name TEXT, updated_at DATETIME);
         INSERT INTO events VALUES (1, 'a', '2024-01-02 03:04:05');
         INSERT INTO events VALUES (2, 'b', '2024-01-02 03:04:06');
         INSERT INTO events VALUES (3, NULL, NULL);",
    )
    .unwrap();
    (path, conn)
}

fn incremental_config() -> InputConfig {
    InputConfig {
        table: Some("events".into()),
        incremental: true,
        ..Default::default()
    }
}

#[test]
fn resumes_after_the_last_primary_key() {
    let dir = tempfile::tempdir().unwrap();
    let (path, conn) = events_db(dir.path());

    let (report, lines) = run(&path, incremental_config()).unwrap();
    assert_eq!(report.rows, 3);
    assert_eq!(
        lines,
        vec![
            r#"[1,"a","2024-01-02 03:04:05"]"#,
            r#"[2,"b","2024-01-02 03:04:06"]"#,
            r#"[3,null,null]"#,
        ]
    );
    let kinds: Vec<_> = report.plans.iter().map(|plan| plan.kind).collect();
    assert_eq!(
        kinds,
        vec![OutputKind::Integer, OutputKind::String, OutputKind::Timestamp]
    );
    assert_eq!(report.last_record, Some(vec![json::json!(3)]));

    conn.execute_batch(
        "INSERT INTO events VALUES (4, 'd', NULL);
         INSERT INTO events VALUES (5, 'e', NULL);",
    )
    .unwrap();
    let state_path = dir.path().join("state.json");
    CheckpointState {
        last_record: report.last_record.unwrap(),
    }
    .save(&state_path)
    .unwrap();

    let mut config = incremental_config();
    config.last_record = CheckpointState::load(&state_path)
        .unwrap()
        .map(|state| state.last_record);
    let (report, lines) = run(&path, config).unwrap();
    assert_eq!(report.rows, 2);
    assert_eq!(lines, vec![r#"[4,"d",null]"#, r#"[5,"e",null]"#]);
    assert_eq!(report.last_record, Some(vec![json::json!(5)]));

    let mut config = incremental_config();
    config.last_record = report.last_record;
    let (report, lines) = run(&path, config).unwrap();
    assert_eq!(report.rows, 0);
    assert!(lines.is_empty());
    assert_eq!(report.last_record, Some(vec![json::json!(5)]));
}

#[test]
fn session_zone_timestamps_checkpoint_as_utc() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("log.sqlite");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE log (id INTEGER PRIMARY KEY, at DATETIME);
         INSERT INTO log VALUES (1, '2024-01-02 08:59:59');
         INSERT INTO log VALUES (2, '2024-01-02 09:00:00.123456789');",
    )
    .unwrap();
    let config = || InputConfig {
        table: Some("log".into()),
        incremental: true,
        incremental_columns: vec!["at".into()],
        default_time_zone: Some("+09:00".into()),
        session_time_zone: Some("+09:00".into()),
        ..Default::default()
    };

    let (report, lines) = run(&path, config()).unwrap();
    assert_eq!(report.rows, 2);
    assert_eq!(lines[1], r#"[2,"2024-01-02 09:00:00"]"#);
    assert_eq!(
        report.last_record,
        Some(vec![json::json!("2024-01-02T00:00:00.123456789Z")])
    );
    assert_eq!(report.checkpoints[0].column_index, 1);

    conn.execute("INSERT INTO log VALUES (3, '2024-01-02 10:00:00')", [])
        .unwrap();
    let mut resumed = config();
    resumed.last_record = report.last_record;
    let (report, lines) = run(&path, resumed).unwrap();
    assert_eq!(lines, vec![r#"[3,"2024-01-02 10:00:00"]"#]);
    assert_eq!(
        report.last_record,
        Some(vec![json::json!("2024-01-02T01:00:00.000000000Z")])
    );
}

fn timestamp_table(dir: &Path, rows: &str) -> (std::path::PathBuf, Connection) {
    let path = dir.join("t.sqlite");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("CREATE TABLE t (id INTEGER, at DATETIME);")
        .unwrap();
    conn.execute_batch(rows).unwrap();
    (path, conn)
}

fn on_timestamp(last_record: Option<Vec<json::Value>>) -> InputConfig {
    InputConfig {
        table: Some("t".into()),
        incremental: true,
        incremental_columns: vec!["at".into()],
        last_record,
        ..Default::default()
    }
}

#[test]
fn iso_text_with_separators_and_offsets_resumes_exactly() {
    let dir = tempfile::tempdir().unwrap();
    let (path, conn) = timestamp_table(
        dir.path(),
        "INSERT INTO t VALUES (1, '2024-01-01T00:00:00');
         INSERT INTO t VALUES (2, '2024-01-02T00:00:00');",
    );

    let (report, _) = run(&path, on_timestamp(None)).unwrap();
    assert_eq!(report.rows, 2);
    assert_eq!(
        report.last_record,
        Some(vec![json::json!("2024-01-02T00:00:00.000000000")])
    );

    let (again, lines) = run(&path, on_timestamp(report.last_record.clone())).unwrap();
    assert_eq!(again.rows, 0, "re-read {:?}", lines);
    assert_eq!(again.last_record, report.last_record);

    // Earlier text, later instant.
    conn.execute("INSERT INTO t VALUES (3, '2024-01-02 23:30:00+01:00')", [])
        .unwrap();
    conn.execute("INSERT INTO t VALUES (4, '2024-01-01 12:00:00')", [])
        .unwrap();
    let (report, lines) = run(&path, on_timestamp(again.last_record)).unwrap();
    assert_eq!(lines, vec![r#"[3,"2024-01-02 22:30:00"]"#]);
    assert_eq!(
        report.last_record,
        Some(vec![json::json!("2024-01-02T22:30:00.000000000")])
    );
}

#[test]
fn epoch_seconds_resume_after_the_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let (path, conn) = timestamp_table(dir.path(), "INSERT INTO t VALUES (1, 1704067200);");

    let (report, lines) = run(&path, on_timestamp(None)).unwrap();
    assert_eq!(lines, vec![r#"[1,"2024-01-01 00:00:00"]"#]);
    assert_eq!(
        report.last_record,
        Some(vec![json::json!("2024-01-01T00:00:00.000000000")])
    );

    conn.execute("INSERT INTO t VALUES (2, 1893456000)", [])
        .unwrap();
    let (report, lines) = run(&path, on_timestamp(report.last_record)).unwrap();
    assert_eq!(lines, vec![r#"[2,"2030-01-01 00:00:00"]"#]);
    assert_eq!(
        report.last_record,
        Some(vec![json::json!("2030-01-01T00:00:00.000000000")])
    );
}

#[test]
fn malformed_checkpoints_stop_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let (path, _conn) = events_db(dir.path());

    let mut config = incremental_config();
    config.incremental_columns = vec!["updated_at".into()];
    config.last_record = Some(vec![json::json!("2024-01-02 03:04:05")]);
    assert!(matches!(
        run(&path, config),
        Err(Error::MalformedCheckpoint { .. })
    ));

    let mut config = incremental_config();
    config.last_record = Some(vec![json::json!(1), json::json!(2)]);
    assert!(matches!(
        run(&path, config),
        Err(Error::MalformedCheckpoint { .. })
    ));
}

#[test]
fn column_options_override_resolution() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("misc.sqlite");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch(
        "CREATE TABLE misc (id INTEGER PRIMARY KEY, doc JSON, shape GEOMETRY);
         INSERT INTO misc VALUES (1, '{\"a\": [1, 2]}', 'POINT(1 2)');",
    )
    .unwrap();
    drop(conn);

    let config = InputConfig {
        table: Some("misc".into()),
        ..Default::default()
    };
    match run(&path, config.clone()) {
        Err(Error::UnsupportedType { column, .. }) => assert_eq!(column, "shape"),
        other => panic!("expected unsupported type, got {:?}", other.map(|(_, l)| l)),
    }

    let config: InputConfig = json::from_value(json::json!({
        "table": "misc",
        "column_options": {"shape": {"type": "string"}}
    }))
    .unwrap();
    let (_, lines) = run(&path, config).unwrap();
    assert_eq!(lines, vec![r#"[1,{"a":[1,2]},"POINT(1 2)"]"#]);
}

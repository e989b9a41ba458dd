use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, params};
use rust_decimal::Decimal;

use fpl_scrape::extract::extract_player_stats;
use fpl_scrape::model::Manager;
use fpl_scrape::statement::{RunContext, Statement, manager_upsert, player_stats_upsert};
use fpl_scrape::store::{BatchWriter, CommitOutcome, LogPaths, init_schema};

static NEXT_LOG: AtomicUsize = AtomicUsize::new(0);

fn read_fixture(name: &str) -> String {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("tests");
    path.push("fixtures");
    path.push(name);
    fs::read_to_string(path).expect("fixture file should be readable")
}

fn temp_logs() -> LogPaths {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let dir = std::env::temp_dir().join(format!(
        "fpl_scrape_store_{}_{}_{}",
        std::process::id(),
        nanos,
        NEXT_LOG.fetch_add(1, Ordering::SeqCst)
    ));
    LogPaths {
        execution: dir.join("Execution_log.sql"),
        exceptions: dir.join("Exceptions.txt"),
    }
}

fn writer() -> BatchWriter {
    let conn = Connection::open_in_memory().unwrap();
    init_schema(&conn).unwrap();
    BatchWriter::new(conn, "memory", temp_logs())
}

fn writer_with_logs() -> (BatchWriter, LogPaths) {
    let logs = temp_logs();
    let conn = Connection::open_in_memory().unwrap();
    init_schema(&conn).unwrap();
    (BatchWriter::new(conn, "memory", logs.clone()), logs)
}

fn ctx() -> RunContext {
    RunContext {
        game_week: 7,
        season: 1415,
    }
}

fn manager(name: &str) -> Manager {
    Manager {
        id: 1001,
        name: name.to_string(),
        club: "Chelsea".to_string(),
        country: "None".to_string(),
        team_name: "Blue Is The Colour".to_string(),
    }
}

fn count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        .unwrap()
}

#[test]
fn manager_insert_keeps_first_write() {
    let mut w = writer();
    w.queue(manager_upsert(&manager("Sean O'Brien"), ctx()));
    assert_eq!(w.commit().unwrap(), CommitOutcome::Committed(1));

    w.queue(manager_upsert(&manager("Renamed Later"), ctx()));
    assert_eq!(w.commit().unwrap(), CommitOutcome::Committed(1));

    assert_eq!(count(w.connection(), "Manager"), 1);
    let name: String = w
        .connection()
        .query_row(
            "SELECT name FROM Manager WHERE managerID = ?1 AND season = ?2",
            params![1001, 1415],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(name, "Sean O'Brien");

    let next_season = RunContext {
        game_week: 1,
        season: 1516,
    };
    w.queue(manager_upsert(&manager("New Season"), next_season));
    w.commit().unwrap();
    assert_eq!(count(w.connection(), "Manager"), 2);
}

#[test]
fn player_stats_upsert_overwrites_every_column() {
    let mut w = writer();
    let first = extract_player_stats(&read_fixture("element.json")).unwrap();
    w.queue(player_stats_upsert(&first, ctx()));
    w.commit().unwrap();

    let changed = read_fixture("element.json")
        .replace(r#""total_points": 48"#, r#""total_points": 54"#)
        .replace(r#""selected_by_percent": "42.5""#, r#""selected_by_percent": "44.1""#)
        .replace(r#""news": """#, r#""news": "Knock - 75% chance of playing""#)
        .replace(r#""is_dreamteam": true"#, r#""is_dreamteam": false"#);
    let second = extract_player_stats(&changed).unwrap();
    w.queue(player_stats_upsert(&second, ctx()));
    assert_eq!(w.commit().unwrap(), CommitOutcome::Committed(1));

    assert_eq!(count(w.connection(), "Player"), 1);
    let (points, percent, news, dream): (i64, String, Option<String>, i64) = w
        .connection()
        .query_row(
            "SELECT total_points, selected_by_percent, news, is_dreamteam FROM Player \
             WHERE id = 1 AND game_week = 7 AND season = 1415",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )
        .unwrap();
    assert_eq!(points, 54);
    assert_eq!(
        Decimal::from_str(&percent).unwrap(),
        Decimal::from_str("44.1").unwrap()
    );
    assert_eq!(news.as_deref(), Some("Knock - 75% chance of playing"));
    assert_eq!(dream, 0);
}

#[test]
fn selected_by_percent_is_stored_as_decimal() {
    let mut w = writer();
    let stats = extract_player_stats(&read_fixture("element.json")).unwrap();
    w.queue(player_stats_upsert(&stats, ctx()));
    w.commit().unwrap();

    let stored: String = w
        .connection()
        .query_row("SELECT selected_by_percent FROM Player", [], |row| row.get(0))
        .unwrap();
    assert_eq!(Decimal::from_str(&stored).unwrap(), Decimal::new(425, 1));
}

#[test]
fn quoted_names_round_trip_through_binding_and_rendered_sql() {
    let mut w = writer();
    let stmt = manager_upsert(&manager("O'Brien"), ctx());
    let rendered = stmt.render();
    assert!(rendered.contains("'O''Brien'"));

    w.queue(stmt);
    w.commit().unwrap();
    let bound: String = w
        .connection()
        .query_row("SELECT name FROM Manager", [], |row| row.get(0))
        .unwrap();
    assert_eq!(bound, "O'Brien");

    let conn = Connection::open_in_memory().unwrap();
    init_schema(&conn).unwrap();
    conn.execute_batch(&rendered).unwrap();
    let replayed: String = conn
        .query_row("SELECT name FROM Manager", [], |row| row.get(0))
        .unwrap();
    assert_eq!(replayed, "O'Brien");
}

#[test]
fn commit_appends_batch_to_execution_log() {
    let (mut w, logs) = writer_with_logs();
    w.queue(manager_upsert(&manager("Sean O'Brien"), ctx()));
    w.commit().unwrap();
    w.queue(manager_upsert(&manager("Sean O'Brien"), ctx()));
    w.commit().unwrap();

    let log = fs::read_to_string(&logs.execution).unwrap();
    assert_eq!(log.lines().count(), 2);
    assert!(log.lines().all(|l| l.contains("'Sean O''Brien'") && l.ends_with(';')));
    assert!(!logs.exceptions.exists());
    assert_eq!(w.commit().unwrap(), CommitOutcome::Empty);
}

#[test]
fn rejected_batch_is_logged_and_rolled_back() {
    let (mut w, logs) = writer_with_logs();
    w.queue(manager_upsert(&manager("Sean O'Brien"), ctx()));
    w.queue(Statement {
        table: "Missing",
        sql: "INSERT INTO NoSuchTable (x) VALUES (?1)".to_string(),
        params: vec![1i64.into()],
    });
    assert_eq!(w.commit().unwrap(), CommitOutcome::Failed(2));
    assert!(w.pending().is_empty());
    assert_eq!(count(w.connection(), "Manager"), 0);

    let exceptions = fs::read_to_string(&logs.exceptions).unwrap();
    assert!(exceptions.contains("------------------Error---------------------"));
    assert!(exceptions.contains("NoSuchTable"));
    assert!(exceptions.contains("'Sean O''Brien'"));

    // The writer keeps going after a rejected batch.
    w.queue(manager_upsert(&manager("Sean O'Brien"), ctx()));
    assert_eq!(w.commit().unwrap(), CommitOutcome::Committed(1));
    assert_eq!(count(w.connection(), "Manager"), 1);
}

#[test]
fn unwritable_execution_log_keeps_the_batch_queued() {
    let (mut w, logs) = writer_with_logs();
    // A directory where the log file should be makes the append fail.
    fs::create_dir_all(&logs.execution).unwrap();
    w.queue(manager_upsert(&manager("Sean O'Brien"), ctx()));

    assert!(w.commit().is_err());
    assert_eq!(w.pending().len(), 1);
    assert_eq!(count(w.connection(), "Manager"), 0);

    fs::remove_dir(&logs.execution).unwrap();
    assert_eq!(w.commit().unwrap(), CommitOutcome::Committed(1));
    assert_eq!(count(w.connection(), "Manager"), 1);
}

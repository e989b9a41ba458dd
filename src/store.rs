use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{Connection, params_from_iter};
use tracing::{debug, warn};

use crate::statement::Statement;

const EXCEPTION_SEPARATOR: &str = "------------------Error---------------------";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogPaths {
    pub execution: PathBuf,
    pub exceptions: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Empty,
    Committed(usize),
    Failed(usize),
}

/// Opens an existing store. Tables are expected to exist already; see
/// `init_schema` for a bootstrap.
pub fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).ok();
    }
    Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS Manager (
            managerID INTEGER NOT NULL,
            name TEXT NOT NULL,
            club TEXT NOT NULL,
            team_name TEXT NOT NULL,
            country TEXT NOT NULL,
            season INTEGER NOT NULL,
            PRIMARY KEY (managerID, season)
        );

        CREATE TABLE IF NOT EXISTS Finance (
            game_week INTEGER NOT NULL,
            total_transfers INTEGER NOT NULL,
            week_transfers INTEGER NOT NULL,
            wildcard_available INTEGER NOT NULL,
            worth TEXT NOT NULL,
            bank TEXT NOT NULL,
            managerID INTEGER NOT NULL,
            season INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_finance_manager ON Finance(managerID, game_week, season);

        CREATE TABLE IF NOT EXISTS GameWeekTeam (
            gameWeekTeamID TEXT NOT NULL,
            game_week INTEGER NOT NULL,
            overall_points INTEGER NOT NULL,
            overall_rank INTEGER NOT NULL,
            game_week_points INTEGER NOT NULL,
            captainID INTEGER NOT NULL,
            vice_captainID INTEGER NOT NULL,
            managerID INTEGER NOT NULL,
            season INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_gwteam_id ON GameWeekTeam(gameWeekTeamID);

        CREATE TABLE IF NOT EXISTS Position (
            id INTEGER NOT NULL,
            gameWeekTeamID TEXT NOT NULL,
            started INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_position_team ON Position(gameWeekTeamID);

        CREATE TABLE IF NOT EXISTS Player (
            id INTEGER NOT NULL,
            web_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            second_name TEXT NOT NULL,
            team_name TEXT NULL,
            team_id INTEGER NULL,
            type_name TEXT NULL,
            news TEXT NULL,
            now_cost INTEGER NOT NULL,
            original_cost INTEGER NOT NULL,
            total_points INTEGER NOT NULL,
            event_total INTEGER NOT NULL,
            minutes INTEGER NOT NULL,
            goals_scored INTEGER NOT NULL,
            assists INTEGER NOT NULL,
            clean_sheets INTEGER NOT NULL,
            goals_conceded INTEGER NOT NULL,
            own_goals INTEGER NOT NULL,
            penalties_saved INTEGER NOT NULL,
            penalties_missed INTEGER NOT NULL,
            yellow_cards INTEGER NOT NULL,
            red_cards INTEGER NOT NULL,
            saves INTEGER NOT NULL,
            bonus INTEGER NOT NULL,
            bps INTEGER NOT NULL,
            ea_index INTEGER NOT NULL,
            dreamteam_count INTEGER NOT NULL,
            transfers_in INTEGER NOT NULL,
            transfers_out INTEGER NOT NULL,
            chance_of_playing_this_round INTEGER NULL,
            chance_of_playing_next_round INTEGER NULL,
            is_dreamteam INTEGER NOT NULL,
            in_dreamteam INTEGER NOT NULL,
            selected_by TEXT NOT NULL,
            selected_by_percent TEXT NOT NULL,
            form TEXT NOT NULL,
            points_per_game TEXT NOT NULL,
            value_form TEXT NOT NULL,
            value_season TEXT NOT NULL,
            game_week INTEGER NOT NULL,
            season INTEGER NOT NULL,
            PRIMARY KEY (id, game_week, season)
        );
        "#,
    )
    .context("create sqlite schema")?;
    Ok(())
}

/// Buffers the statements of one page and flushes them together.
pub struct BatchWriter {
    conn: Connection,
    label: String,
    logs: LogPaths,
    pending: Vec<Statement>,
}

impl BatchWriter {
    pub fn new(conn: Connection, label: impl Into<String>, logs: LogPaths) -> Self {
        Self {
            conn,
            label: label.into(),
            logs,
            pending: Vec::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn pending(&self) -> &[Statement] {
        &self.pending
    }

    pub fn queue(&mut self, stmt: Statement) {
        self.pending.push(stmt);
    }

    pub fn queue_all(&mut self, stmts: impl IntoIterator<Item = Statement>) {
        self.pending.extend(stmts);
    }

    pub fn take_pending(&mut self) -> Vec<Statement> {
        std::mem::take(&mut self.pending)
    }

    /// Logs the batch to the execution log, then runs it in one transaction.
    ///
    /// A rejected batch is rolled back and written to the exceptions log; that
    /// is reported as `CommitOutcome::Failed`, not as an error. Errors are
    /// only returned when a log file cannot be written. If the execution log
    /// cannot be written the batch stays queued; otherwise the buffer is empty
    /// afterwards.
    pub fn commit(&mut self) -> Result<CommitOutcome> {
        if self.pending.is_empty() {
            return Ok(CommitOutcome::Empty);
        }
        append_to(&self.logs.execution, &render_batch(&self.pending))?;
        let batch = self.take_pending();

        match execute_batch(&mut self.conn, &batch) {
            Ok(()) => {
                debug!(store = %self.label, statements = batch.len(), "batch committed");
                Ok(CommitOutcome::Committed(batch.len()))
            }
            Err(err) => {
                warn!(
                    store = %self.label,
                    statements = batch.len(),
                    error = %format!("{err:#}"),
                    "batch rejected"
                );
                append_to(&self.logs.exceptions, &exception_entry(&err, &batch))?;
                Ok(CommitOutcome::Failed(batch.len()))
            }
        }
    }
}

fn execute_batch(conn: &mut Connection, batch: &[Statement]) -> Result<()> {
    let tx = conn.transaction().context("begin batch transaction")?;
    for stmt in batch {
        tx.execute(&stmt.sql, params_from_iter(stmt.params.iter()))
            .with_context(|| format!("{} statement failed", stmt.table))?;
    }
    tx.commit().context("commit batch transaction")?;
    Ok(())
}

pub fn render_batch(batch: &[Statement]) -> String {
    let mut out = String::new();
    for stmt in batch {
        out.push_str(&stmt.to_string());
        out.push('\n');
    }
    out
}

fn exception_entry(err: &anyhow::Error, batch: &[Statement]) -> String {
    format!(
        "\n\n\n{EXCEPTION_SEPARATOR}\n\n{} {err:#}\n\n{}",
        Utc::now().to_rfc3339(),
        render_batch(batch)
    )
}

fn append_to(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).ok();
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open log {}", path.display()))?;
    file.write_all(text.as_bytes())
        .with_context(|| format!("append log {}", path.display()))?;
    Ok(())
}

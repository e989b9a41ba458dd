//! Storage operations built from domain entities.
//!
//! Values are bound as parameters when executed. `Statement::render` inlines
//! them as SQL literals for the execution and exceptions logs only.

use std::fmt;

use rusqlite::ToSql;
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rust_decimal::Decimal;

use crate::extract::EntryRecord;
use crate::model::{Finance, GameWeekTeam, Manager, Player, PlayerStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunContext {
    pub game_week: u32,
    pub season: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Text(String),
    Decimal(Decimal),
    Bool(bool),
}

impl SqlValue {
    pub fn literal(&self) -> String {
        match self {
            Self::Null => "NULL".to_string(),
            Self::Integer(n) => n.to_string(),
            Self::Text(s) => quote_text(s),
            Self::Decimal(d) => d.to_string(),
            Self::Bool(b) => i64::from(*b).to_string(),
        }
    }
}

/// Single-quoted SQL string literal with embedded quotes doubled.
pub fn quote_text(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', "''"))
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Owned(Value::Null),
            Self::Integer(n) => ToSqlOutput::Owned(Value::Integer(*n)),
            Self::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Self::Decimal(d) => ToSqlOutput::Owned(Value::Text(d.to_string())),
            Self::Bool(b) => ToSqlOutput::Owned(Value::Integer(i64::from(*b))),
        })
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<u32> for SqlValue {
    fn from(v: u32) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<u8> for SqlValue {
    fn from(v: u8) -> Self {
        Self::Integer(i64::from(v))
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<Decimal> for SqlValue {
    fn from(v: Decimal) -> Self {
        Self::Decimal(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub table: &'static str,
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Statement {
    /// SQL text with every `?N` placeholder replaced by its literal.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(self.sql.len() + 16 * self.params.len());
        let mut chars = self.sql.chars().peekable();
        while let Some(ch) = chars.next() {
            if ch != '?' {
                out.push(ch);
                continue;
            }
            let mut digits = String::new();
            while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                digits.push(d);
                chars.next();
            }
            let param = digits
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|idx| self.params.get(idx));
            match param {
                Some(value) => out.push_str(&value.literal()),
                None => {
                    out.push('?');
                    out.push_str(&digits);
                }
            }
        }
        out
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{};", self.render())
    }
}

pub fn game_week_team_id(manager_id: u32, game_week: u32) -> String {
    format!("{manager_id}-{game_week}")
}

fn placeholders(n: usize) -> String {
    (1..=n).map(|i| format!("?{i}")).collect::<Vec<_>>().join(", ")
}

/// First write wins: an existing (managerID, season) row is left untouched.
pub fn manager_upsert(manager: &Manager, ctx: RunContext) -> Statement {
    Statement {
        table: "Manager",
        sql: "INSERT INTO Manager (managerID, name, club, team_name, country, season) \
              SELECT ?1, ?2, ?3, ?4, ?5, ?6 \
              WHERE NOT EXISTS (SELECT 1 FROM Manager WHERE managerID = ?1 AND season = ?6)"
            .to_string(),
        params: vec![
            manager.id.into(),
            manager.name.as_str().into(),
            manager.club.as_str().into(),
            manager.team_name.as_str().into(),
            manager.country.as_str().into(),
            ctx.season.into(),
        ],
    }
}

pub fn finance_insert(finance: &Finance, manager_id: u32, ctx: RunContext) -> Statement {
    Statement {
        table: "Finance",
        sql: format!(
            "INSERT INTO Finance (game_week, total_transfers, week_transfers, wildcard_available, \
             worth, bank, managerID, season) VALUES ({})",
            placeholders(8)
        ),
        params: vec![
            ctx.game_week.into(),
            finance.total_transfers.into(),
            finance.week_transfers.into(),
            finance.wildcard_available.into(),
            finance.worth.into(),
            finance.bank.into(),
            manager_id.into(),
            ctx.season.into(),
        ],
    }
}

pub fn game_week_team_insert(team: &GameWeekTeam, manager_id: u32, ctx: RunContext) -> Statement {
    Statement {
        table: "GameWeekTeam",
        sql: format!(
            "INSERT INTO GameWeekTeam (gameWeekTeamID, game_week, overall_points, overall_rank, \
             game_week_points, captainID, vice_captainID, managerID, season) VALUES ({})",
            placeholders(9)
        ),
        params: vec![
            game_week_team_id(manager_id, ctx.game_week).into(),
            ctx.game_week.into(),
            team.overall_points.into(),
            team.overall_rank.into(),
            team.game_week_points.into(),
            team.captain().id.into(),
            team.vice_captain().id.into(),
            manager_id.into(),
            ctx.season.into(),
        ],
    }
}

pub fn position_insert(player: &Player, manager_id: u32, ctx: RunContext) -> Statement {
    Statement {
        table: "Position",
        sql: "INSERT INTO Position (id, gameWeekTeamID, started) VALUES (?1, ?2, ?3)".to_string(),
        params: vec![
            player.id.into(),
            game_week_team_id(manager_id, ctx.game_week).into(),
            player.started.into(),
        ],
    }
}

/// Every statement one entry page produces, in storage order.
pub fn entry_statements(record: &EntryRecord, ctx: RunContext) -> Vec<Statement> {
    let manager_id = record.manager.id;
    let mut out = Vec::with_capacity(3 + record.team.players().len());
    out.push(manager_upsert(&record.manager, ctx));
    out.push(finance_insert(&record.summary.finance, manager_id, ctx));
    out.push(game_week_team_insert(&record.team, manager_id, ctx));
    for player in record.team.players() {
        out.push(position_insert(player, manager_id, ctx));
    }
    out
}

/// Column name and value for every persisted statistic, in table order.
pub fn player_stats_columns(stats: &PlayerStats) -> Vec<(&'static str, SqlValue)> {
    vec![
        ("id", stats.id.into()),
        ("web_name", stats.web_name.as_str().into()),
        ("first_name", stats.first_name.as_str().into()),
        ("second_name", stats.second_name.as_str().into()),
        ("team_name", stats.team_name.clone().into()),
        ("team_id", stats.team_id.into()),
        ("type_name", stats.type_name.clone().into()),
        ("news", stats.news.clone().filter(|n| !n.is_empty()).into()),
        ("now_cost", stats.now_cost.into()),
        ("original_cost", stats.original_cost.into()),
        ("total_points", stats.total_points.into()),
        ("event_total", stats.event_total.into()),
        ("minutes", stats.minutes.into()),
        ("goals_scored", stats.goals_scored.into()),
        ("assists", stats.assists.into()),
        ("clean_sheets", stats.clean_sheets.into()),
        ("goals_conceded", stats.goals_conceded.into()),
        ("own_goals", stats.own_goals.into()),
        ("penalties_saved", stats.penalties_saved.into()),
        ("penalties_missed", stats.penalties_missed.into()),
        ("yellow_cards", stats.yellow_cards.into()),
        ("red_cards", stats.red_cards.into()),
        ("saves", stats.saves.into()),
        ("bonus", stats.bonus.into()),
        ("bps", stats.bps.into()),
        ("ea_index", stats.ea_index.into()),
        ("dreamteam_count", stats.dreamteam_count.into()),
        ("transfers_in", stats.transfers_in.into()),
        ("transfers_out", stats.transfers_out.into()),
        (
            "chance_of_playing_this_round",
            stats.chance_of_playing_this_round.into(),
        ),
        (
            "chance_of_playing_next_round",
            stats.chance_of_playing_next_round.into(),
        ),
        ("is_dreamteam", stats.is_dreamteam.into()),
        ("in_dreamteam", stats.in_dreamteam.into()),
        ("selected_by", stats.selected_by.into()),
        ("selected_by_percent", stats.selected_by_percent.into()),
        ("form", stats.form.into()),
        ("points_per_game", stats.points_per_game.into()),
        ("value_form", stats.value_form.into()),
        ("value_season", stats.value_season.into()),
    ]
}

const PLAYER_KEY_COLUMNS: [&str; 3] = ["id", "game_week", "season"];

/// Insert, or overwrite every column of the existing (id, game_week, season) row.
pub fn player_stats_upsert(stats: &PlayerStats, ctx: RunContext) -> Statement {
    let mut columns = player_stats_columns(stats);
    columns.push(("game_week", ctx.game_week.into()));
    columns.push(("season", ctx.season.into()));

    let names = columns.iter().map(|(name, _)| *name).collect::<Vec<_>>();
    let updates = names
        .iter()
        .filter(|name| !PLAYER_KEY_COLUMNS.contains(*name))
        .map(|name| format!("{name} = excluded.{name}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT INTO Player ({}) VALUES ({}) ON CONFLICT({}) DO UPDATE SET {}",
        names.join(", "),
        placeholders(names.len()),
        PLAYER_KEY_COLUMNS.join(", "),
        updates
    );

    Statement {
        table: "Player",
        sql,
        params: columns.into_iter().map(|(_, value)| value).collect(),
    }
}

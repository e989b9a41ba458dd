use std::collections::HashSet;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Deserialize;
use serde::de::{self, Deserializer};
use serde_json::Value;
use thiserror::Error;

/// Currency amounts (team value, bank) are stored in millions with one decimal.
pub const CURRENCY_SCALE: u32 = 1;

pub const MISSING_SENTINEL: &str = "None";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("squad has {actual} players, expected {expected}")]
    SquadSize { expected: usize, actual: usize },
    #[error("squad columns disagree: {ids} ids, {names} names, {positions} positions")]
    SquadColumns {
        ids: usize,
        names: usize,
        positions: usize,
    },
    #[error("player {0} appears twice in one squad")]
    DuplicatePlayer(u32),
    #[error("{role} index {index} is outside the squad")]
    SelectionOutOfRange { role: &'static str, index: usize },
    #[error("captain and vice-captain are the same player (index {0})")]
    SameCaptains(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manager {
    pub id: u32,
    pub name: String,
    pub club: String,
    pub country: String,
    pub team_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finance {
    pub total_transfers: u32,
    pub week_transfers: u32,
    pub wildcard_available: bool,
    pub worth: Decimal,
    pub bank: Decimal,
}

impl Default for Finance {
    fn default() -> Self {
        Self {
            total_transfers: 0,
            week_transfers: 0,
            wildcard_available: false,
            worth: currency(Decimal::from(100)),
            bank: currency(Decimal::ZERO),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub id: u32,
    pub name: String,
    pub position: u8,
    pub started: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameWeekTeam {
    pub overall_points: i64,
    pub overall_rank: i64,
    pub game_week_points: i64,
    players: Vec<Player>,
    captain: usize,
    vice_captain: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct TeamScores {
    pub overall_points: i64,
    pub overall_rank: i64,
    pub game_week_points: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct SquadShape {
    pub squad_size: usize,
    pub starting_size: usize,
}

impl GameWeekTeam {
    /// Zips the per-player columns into a squad. The first `starting_size`
    /// players are the starters.
    pub fn from_columns(
        scores: TeamScores,
        ids: Vec<u32>,
        names: Vec<String>,
        positions: Vec<u8>,
        captain: usize,
        vice_captain: usize,
        shape: SquadShape,
    ) -> Result<Self, ModelError> {
        if ids.len() != names.len() || ids.len() != positions.len() {
            return Err(ModelError::SquadColumns {
                ids: ids.len(),
                names: names.len(),
                positions: positions.len(),
            });
        }
        if ids.len() != shape.squad_size {
            return Err(ModelError::SquadSize {
                expected: shape.squad_size,
                actual: ids.len(),
            });
        }

        let mut seen = HashSet::new();
        for id in &ids {
            if !seen.insert(*id) {
                return Err(ModelError::DuplicatePlayer(*id));
            }
        }

        if captain >= ids.len() {
            return Err(ModelError::SelectionOutOfRange {
                role: "captain",
                index: captain,
            });
        }
        if vice_captain >= ids.len() {
            return Err(ModelError::SelectionOutOfRange {
                role: "vice-captain",
                index: vice_captain,
            });
        }
        if captain == vice_captain {
            return Err(ModelError::SameCaptains(captain));
        }

        let players = ids
            .into_iter()
            .zip(names)
            .zip(positions)
            .enumerate()
            .map(|(idx, ((id, name), position))| Player {
                id,
                name,
                position,
                started: idx < shape.starting_size,
            })
            .collect();

        Ok(Self {
            overall_points: scores.overall_points,
            overall_rank: scores.overall_rank,
            game_week_points: scores.game_week_points,
            players,
            captain,
            vice_captain,
        })
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn captain_index(&self) -> usize {
        self.captain
    }

    pub fn vice_captain_index(&self) -> usize {
        self.vice_captain
    }

    pub fn captain(&self) -> &Player {
        &self.players[self.captain]
    }

    pub fn vice_captain(&self) -> &Player {
        &self.players[self.vice_captain]
    }
}

/// One player's season-to-date statistics as served by the elements API.
///
/// Only the fields below are kept; anything else in the payload is dropped
/// when deserializing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlayerStats {
    pub id: u32,
    pub web_name: String,
    pub first_name: String,
    pub second_name: String,
    #[serde(default)]
    pub team_name: Option<String>,
    #[serde(default)]
    pub team_id: Option<i64>,
    #[serde(default)]
    pub type_name: Option<String>,
    #[serde(default)]
    pub news: Option<String>,
    #[serde(default)]
    pub now_cost: i64,
    #[serde(default)]
    pub original_cost: i64,
    #[serde(default)]
    pub total_points: i64,
    #[serde(default)]
    pub event_total: i64,
    #[serde(default)]
    pub minutes: i64,
    #[serde(default)]
    pub goals_scored: i64,
    #[serde(default)]
    pub assists: i64,
    #[serde(default)]
    pub clean_sheets: i64,
    #[serde(default)]
    pub goals_conceded: i64,
    #[serde(default)]
    pub own_goals: i64,
    #[serde(default)]
    pub penalties_saved: i64,
    #[serde(default)]
    pub penalties_missed: i64,
    #[serde(default)]
    pub yellow_cards: i64,
    #[serde(default)]
    pub red_cards: i64,
    #[serde(default)]
    pub saves: i64,
    #[serde(default)]
    pub bonus: i64,
    #[serde(default)]
    pub bps: i64,
    #[serde(default)]
    pub ea_index: i64,
    #[serde(default)]
    pub dreamteam_count: i64,
    #[serde(default)]
    pub transfers_in: i64,
    #[serde(default)]
    pub transfers_out: i64,
    #[serde(default)]
    pub chance_of_playing_this_round: Option<i64>,
    #[serde(default)]
    pub chance_of_playing_next_round: Option<i64>,
    #[serde(default)]
    pub is_dreamteam: bool,
    #[serde(default)]
    pub in_dreamteam: bool,
    #[serde(deserialize_with = "lenient_decimal")]
    pub selected_by: Decimal,
    #[serde(deserialize_with = "lenient_decimal")]
    pub selected_by_percent: Decimal,
    #[serde(deserialize_with = "lenient_decimal")]
    pub form: Decimal,
    #[serde(deserialize_with = "lenient_decimal")]
    pub points_per_game: Decimal,
    #[serde(deserialize_with = "lenient_decimal")]
    pub value_form: Decimal,
    #[serde(deserialize_with = "lenient_decimal")]
    pub value_season: Decimal,
}

fn lenient_decimal<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Decimal, D::Error> {
    let value = Value::deserialize(deserializer)?;
    let raw = match &value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        other => return Err(de::Error::custom(format!("expected decimal, got {other}"))),
    };
    Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .map_err(|err| de::Error::custom(format!("invalid decimal {raw:?}: {err}")))
}

pub fn currency(value: Decimal) -> Decimal {
    let mut out = value.round_dp(CURRENCY_SCALE);
    out.rescale(CURRENCY_SCALE);
    out
}

/// "1,234,567" -> 1234567
pub fn parse_count(raw: &str) -> Option<i64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| *c != ',' && !c.is_whitespace())
        .collect();
    cleaned.parse::<i64>().ok()
}

/// "£101.3m" -> 101.3
pub fn parse_currency(raw: &str) -> Option<Decimal> {
    let cleaned = raw.trim().trim_matches(|c: char| c == '£' || c == 'm').trim();
    Decimal::from_str(cleaned).ok().map(currency)
}

pub fn or_sentinel(value: Option<String>) -> String {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| MISSING_SENTINEL.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape() -> SquadShape {
        SquadShape {
            squad_size: 15,
            starting_size: 11,
        }
    }

    fn scores() -> TeamScores {
        TeamScores {
            overall_points: 100,
            overall_rank: 5,
            game_week_points: 40,
        }
    }

    fn squad_columns() -> (Vec<u32>, Vec<String>, Vec<u8>) {
        let ids = (1..=15).map(|n| n * 10).collect();
        let names = (1..=15).map(|n| format!("P{n}")).collect();
        let positions = (0..15).map(|n| (n % 4 + 1) as u8).collect();
        (ids, names, positions)
    }

    #[test]
    fn first_eleven_start() {
        let (ids, names, positions) = squad_columns();
        let team =
            GameWeekTeam::from_columns(scores(), ids, names, positions, 3, 7, shape()).unwrap();
        let started = team.players().iter().filter(|p| p.started).count();
        assert_eq!(started, 11);
        assert!(team.players()[10].started);
        assert!(!team.players()[11].started);
        assert_eq!(team.captain().id, 40);
        assert_eq!(team.vice_captain().id, 80);
    }

    #[test]
    fn rejects_same_captain_and_vice() {
        let (ids, names, positions) = squad_columns();
        let err = GameWeekTeam::from_columns(scores(), ids, names, positions, 2, 2, shape())
            .unwrap_err();
        assert_eq!(err, ModelError::SameCaptains(2));
    }

    #[test]
    fn rejects_out_of_range_selection_and_short_squads() {
        let (ids, names, positions) = squad_columns();
        let err = GameWeekTeam::from_columns(
            scores(),
            ids.clone(),
            names.clone(),
            positions.clone(),
            0,
            15,
            shape(),
        )
        .unwrap_err();
        assert!(matches!(err, ModelError::SelectionOutOfRange { index: 15, .. }));

        let err = GameWeekTeam::from_columns(
            scores(),
            ids[..14].to_vec(),
            names[..14].to_vec(),
            positions[..14].to_vec(),
            0,
            1,
            shape(),
        )
        .unwrap_err();
        assert!(matches!(err, ModelError::SquadSize { actual: 14, .. }));
    }

    #[test]
    fn rejects_duplicate_player_ids() {
        let (mut ids, names, positions) = squad_columns();
        ids[14] = ids[0];
        let err = GameWeekTeam::from_columns(scores(), ids, names, positions, 0, 1, shape())
            .unwrap_err();
        assert_eq!(err, ModelError::DuplicatePlayer(10));
    }

    #[test]
    fn normalises_counts_and_currency() {
        assert_eq!(parse_count("1,234,567"), Some(1_234_567));
        assert_eq!(parse_count(" 12 "), Some(12));
        assert_eq!(parse_count("n/a"), None);
        assert_eq!(
            parse_currency("£101.3m"),
            Some(Decimal::from_str("101.3").unwrap())
        );
        assert_eq!(parse_currency("£0m").unwrap().to_string(), "0.0");
        assert_eq!(Finance::default().worth.to_string(), "100.0");
    }

    #[test]
    fn sentinel_for_missing_decorations() {
        assert_eq!(or_sentinel(None), "None");
        assert_eq!(or_sentinel(Some("  ".to_string())), "None");
        assert_eq!(or_sentinel(Some("Arsenal".to_string())), "Arsenal");
    }
}

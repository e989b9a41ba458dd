use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use thiserror::Error;

use crate::model::{
    Finance, GameWeekTeam, Manager, ModelError, PlayerStats, SquadShape, TeamScores, or_sentinel,
    parse_count, parse_currency,
};
use crate::page_schema::{PageSchema, token_from_end};

/// Historical or internal element fields that are never persisted.
pub const DENYLISTED_FIELDS: &[&str] = &[
    "photo",
    "event_explain",
    "fixture_history",
    "season_history",
    "fixtures",
    "loans_in",
    "loans_out",
    "loaned_in",
    "loaned_out",
    "current_fixture",
    "next_fixture",
    "status",
    "code",
    "cost_change_start",
    "cost_change_event",
    "cost_change_start_fall",
    "cost_change_event_fall",
    "transfers_out_event",
    "transfers_in_event",
    "event_points",
    "ep_this",
    "ep_next",
    "special",
];

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("invalid selector {selector:?}: {message}")]
    Selector {
        selector: &'static str,
        message: String,
    },
    #[error("missing {0}")]
    Missing(&'static str),
    #[error("malformed {field}: {value:?}")]
    Malformed { field: &'static str, value: String },
    #[error("no {0} flagged in squad")]
    NoSelection(&'static str),
    #[error("invalid player json: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Model(#[from] ModelError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerSummary {
    pub overall_points: i64,
    pub overall_rank: i64,
    pub total_players: i64,
    pub game_week_points: i64,
    pub finance: Finance,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRecord {
    pub manager: Manager,
    pub summary: ManagerSummary,
    pub team: GameWeekTeam,
}

fn selector(raw: &'static str) -> Result<Selector, ExtractionError> {
    Selector::parse(raw).map_err(|err| ExtractionError::Selector {
        selector: raw,
        message: err.to_string(),
    })
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn numeric_tokens(raw: &str) -> Vec<&str> {
    raw.split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .collect()
}

pub fn extract_links(markup: &str, schema: &PageSchema) -> Result<Vec<String>, ExtractionError> {
    let doc = Html::parse_document(markup);
    let sel = selector(schema.standings_link)?;
    Ok(doc
        .select(&sel)
        .filter_map(|a| a.value().attr("href"))
        .map(|href| href.trim().to_string())
        .filter(|href| !href.is_empty())
        .collect())
}

/// `/entry/1234/event-history/7/` -> 1234
pub fn manager_id_from_link(link: &str) -> Result<u32, ExtractionError> {
    numeric_tokens(link)
        .first()
        .and_then(|s| s.parse::<u32>().ok())
        .filter(|id| *id > 0)
        .ok_or_else(|| ExtractionError::Malformed {
            field: "manager link",
            value: link.to_string(),
        })
}

/// `/entry/1234/event-history/7/` -> 7
pub fn game_week_from_link(link: &str) -> Result<u32, ExtractionError> {
    numeric_tokens(link)
        .get(1)
        .and_then(|s| s.parse::<u32>().ok())
        .ok_or_else(|| ExtractionError::Malformed {
            field: "game week link",
            value: link.to_string(),
        })
}

pub fn extract_entry(
    markup: &str,
    link: &str,
    schema: &PageSchema,
) -> Result<EntryRecord, ExtractionError> {
    let doc = Html::parse_document(markup);
    let manager = manager_from_doc(&doc, link, schema)?;
    let summary = summary_from_doc(&doc, schema)?;
    let team = team_from_doc(&doc, &summary, schema)?;
    Ok(EntryRecord {
        manager,
        summary,
        team,
    })
}

pub fn extract_manager(
    markup: &str,
    link: &str,
    schema: &PageSchema,
) -> Result<Manager, ExtractionError> {
    manager_from_doc(&Html::parse_document(markup), link, schema)
}

pub fn extract_manager_summary(
    markup: &str,
    schema: &PageSchema,
) -> Result<ManagerSummary, ExtractionError> {
    summary_from_doc(&Html::parse_document(markup), schema)
}

pub fn extract_team(markup: &str, schema: &PageSchema) -> Result<GameWeekTeam, ExtractionError> {
    let doc = Html::parse_document(markup);
    let summary = summary_from_doc(&doc, schema)?;
    team_from_doc(&doc, &summary, schema)
}

fn manager_from_doc(
    doc: &Html,
    link: &str,
    schema: &PageSchema,
) -> Result<Manager, ExtractionError> {
    let name_sel = selector(schema.manager_name)?;
    let name = doc
        .select(&name_sel)
        .next()
        .map(element_text)
        .ok_or(ExtractionError::Missing("manager name"))?;

    let team_sel = selector(schema.team_name)?;
    let team_name = doc
        .select(&team_sel)
        .next()
        .map(element_text)
        .ok_or(ExtractionError::Missing("team name"))?;

    Ok(Manager {
        id: manager_id_from_link(link)?,
        name,
        club: or_sentinel(image_alt(doc, schema.club_badge)?),
        country: or_sentinel(image_alt(doc, schema.nationality)?),
        team_name,
    })
}

fn image_alt(doc: &Html, raw: &'static str) -> Result<Option<String>, ExtractionError> {
    let sel = selector(raw)?;
    Ok(doc
        .select(&sel)
        .next()
        .and_then(|img| img.value().attr("alt"))
        .map(str::to_string))
}

fn summary_from_doc(doc: &Html, schema: &PageSchema) -> Result<ManagerSummary, ExtractionError> {
    let sel = selector(schema.summary_values)?;
    let values = doc.select(&sel).map(element_text).collect::<Vec<_>>();
    if values.len() <= schema.summary.max_index() {
        return Err(ExtractionError::Missing("manager summary values"));
    }

    let idx = schema.summary;
    let count = |index: usize, field: &'static str| {
        parse_count(&values[index]).ok_or_else(|| ExtractionError::Malformed {
            field,
            value: values[index].clone(),
        })
    };
    let transfers = |index: usize, field: &'static str| {
        let n = count(index, field)?;
        u32::try_from(n).map_err(|_| ExtractionError::Malformed {
            field,
            value: values[index].clone(),
        })
    };
    let money = |index: usize, field: &'static str| {
        parse_currency(&values[index]).ok_or_else(|| ExtractionError::Malformed {
            field,
            value: values[index].clone(),
        })
    };

    let finance = Finance {
        total_transfers: transfers(idx.total_transfers, "total transfers")?,
        week_transfers: transfers(idx.game_week_transfers, "game week transfers")?,
        wildcard_available: values[idx.wildcard].contains(schema.wildcard_available_marker),
        worth: money(idx.team_value, "team value")?,
        bank: money(idx.bank, "bank")?,
    };

    Ok(ManagerSummary {
        overall_points: count(idx.overall_points, "overall points")?,
        overall_rank: count(idx.overall_rank, "overall rank")?,
        total_players: count(idx.total_players, "total players")?,
        game_week_points: count(idx.game_week_points, "game week points")?,
        finance,
    })
}

fn team_from_doc(
    doc: &Html,
    summary: &ManagerSummary,
    schema: &PageSchema,
) -> Result<GameWeekTeam, ExtractionError> {
    let pitch_sel = selector(schema.pitch_element)?;
    let class_lists = doc
        .select(&pitch_sel)
        .map(|el| el.value().attr("class").unwrap_or_default().to_string())
        .collect::<Vec<_>>();
    if class_lists.is_empty() {
        return Err(ExtractionError::Missing("pitch elements"));
    }

    let mut positions = Vec::with_capacity(class_lists.len());
    let mut captain = None;
    let mut vice_captain = None;
    for (idx, classes) in class_lists.iter().enumerate() {
        let tokens = classes.split_whitespace().collect::<Vec<_>>();
        let flag = |offset: usize, field: &'static str| {
            token_from_end(&tokens, offset)
                .map(|t| t.trim_matches(',') == "true")
                .ok_or_else(|| ExtractionError::Malformed {
                    field,
                    value: classes.clone(),
                })
        };
        if flag(schema.captain_offset, "captain flag")? && captain.is_none() {
            captain = Some(idx);
        }
        if flag(schema.vice_captain_offset, "vice-captain flag")? && vice_captain.is_none() {
            vice_captain = Some(idx);
        }
        let position = token_from_end(&tokens, schema.position_offset)
            .and_then(|t| t.trim_matches(',').parse::<u8>().ok())
            .ok_or_else(|| ExtractionError::Malformed {
                field: "position code",
                value: classes.clone(),
            })?;
        positions.push(position);
    }

    let name_sel = selector(schema.pitch_name)?;
    let names = doc.select(&name_sel).map(element_text).collect::<Vec<_>>();

    let link_sel = selector(schema.player_link)?;
    let ids = doc
        .select(&link_sel)
        .map(|a| {
            let href = a.value().attr("href").unwrap_or_default();
            numeric_tokens(href)
                .first()
                .and_then(|s| s.parse::<u32>().ok())
                .ok_or_else(|| ExtractionError::Malformed {
                    field: "player link",
                    value: href.to_string(),
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let team = GameWeekTeam::from_columns(
        TeamScores {
            overall_points: summary.overall_points,
            overall_rank: summary.overall_rank,
            game_week_points: summary.game_week_points,
        },
        ids,
        names,
        positions,
        captain.ok_or(ExtractionError::NoSelection("captain"))?,
        vice_captain.ok_or(ExtractionError::NoSelection("vice-captain"))?,
        SquadShape {
            squad_size: schema.squad_size,
            starting_size: schema.starting_size,
        },
    )?;
    Ok(team)
}

pub fn extract_player_stats(json_text: &str) -> Result<PlayerStats, ExtractionError> {
    let mut value: Value = serde_json::from_str(json_text.trim())?;
    let Some(map) = value.as_object_mut() else {
        return Err(ExtractionError::Malformed {
            field: "player stats",
            value: "expected a json object".to_string(),
        });
    };
    for key in DENYLISTED_FIELDS {
        map.remove(*key);
    }
    Ok(serde_json::from_value(value)?)
}

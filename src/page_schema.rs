//! Selectors and fixed positions for the fantasy site's page layout.
//!
//! Every index or offset the extractor relies on lives here, so a layout
//! change is edited in one place. Negative offsets count back from the end of
//! a pitch element's whitespace separated class list.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SummaryIndices {
    pub overall_points: usize,
    pub overall_rank: usize,
    pub total_players: usize,
    pub game_week_points: usize,
    pub total_transfers: usize,
    pub game_week_transfers: usize,
    pub wildcard: usize,
    pub team_value: usize,
    pub bank: usize,
}

impl SummaryIndices {
    pub fn max_index(&self) -> usize {
        [
            self.overall_points,
            self.overall_rank,
            self.total_players,
            self.game_week_points,
            self.total_transfers,
            self.game_week_transfers,
            self.wildcard,
            self.team_value,
            self.bank,
        ]
        .into_iter()
        .max()
        .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSchema {
    pub version: &'static str,
    pub standings_link: &'static str,
    pub pitch_element: &'static str,
    pub pitch_name: &'static str,
    pub player_link: &'static str,
    pub summary_values: &'static str,
    pub manager_name: &'static str,
    pub team_name: &'static str,
    pub club_badge: &'static str,
    pub nationality: &'static str,
    pub captain_offset: usize,
    pub vice_captain_offset: usize,
    pub position_offset: usize,
    pub summary: SummaryIndices,
    /// Text marking the wildcard as still available ("Not played").
    pub wildcard_available_marker: &'static str,
    pub squad_size: usize,
    pub starting_size: usize,
}

pub const ENTRY_PAGE_2014: PageSchema = PageSchema {
    version: "2014-15",
    standings_link: "table.ismStandingsTable tr td a[href]",
    pitch_element: "div.ismPitchElement",
    pitch_name: "div.ismPitchElement dt",
    player_link: "span.JS_ISM_INFO a",
    summary_values: "dl.ismDefList.ismRHSDefList dd",
    manager_name: "h1.ismSection2.ismWrapText",
    team_name: "h2.ismSection3",
    club_badge: "img.ismRHSBadge",
    nationality: "img.ismRHSNat",
    captain_offset: 10,
    vice_captain_offset: 6,
    position_offset: 4,
    summary: SummaryIndices {
        overall_points: 0,
        overall_rank: 1,
        total_players: 2,
        game_week_points: 3,
        total_transfers: 4,
        game_week_transfers: 5,
        wildcard: 6,
        team_value: 7,
        bank: 8,
    },
    wildcard_available_marker: "Not",
    squad_size: 15,
    starting_size: 11,
};

impl Default for PageSchema {
    fn default() -> Self {
        ENTRY_PAGE_2014
    }
}

/// Picks the token `offset` places from the end, e.g. offset 4 is `list[-4]`.
pub fn token_from_end<'a>(tokens: &[&'a str], offset: usize) -> Option<&'a str> {
    if offset == 0 || offset > tokens.len() {
        return None;
    }
    tokens.get(tokens.len() - offset).copied()
}

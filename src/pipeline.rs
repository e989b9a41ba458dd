use std::ops::RangeInclusive;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing::{info, warn};

use crate::extract::{extract_entry, extract_links, extract_player_stats, game_week_from_link};
use crate::fetch::{PageFetcher, Sleeper, Transport, save_page};
use crate::page_schema::PageSchema;
use crate::statement::{RunContext, Statement, entry_statements, player_stats_upsert};
use crate::store::{BatchWriter, CommitOutcome};

pub const STANDINGS_PAGE_SIZE: u32 = 50;

/// Ranks are 1-based; ranks 1..=50 are page 1, 51..=100 page 2, and so on.
pub fn page_of(rank: u32) -> u32 {
    rank.saturating_sub(1) / STANDINGS_PAGE_SIZE + 1
}

/// Rows listed across the inclusive page range; wide enough for any `u32` range.
pub fn record_count(pages: &RangeInclusive<u32>) -> u64 {
    let span = u64::from(*pages.end()) - u64::from(*pages.start()) + 1;
    span * u64::from(STANDINGS_PAGE_SIZE)
}

/// Standings pages covering the inclusive rank range.
pub fn page_range(starting_rank: u32, finishing_rank: u32) -> Result<RangeInclusive<u32>> {
    if starting_rank == 0 || finishing_rank < starting_rank {
        return Err(anyhow!(
            "invalid rank range {starting_rank}..={finishing_rank}"
        ));
    }
    Ok(page_of(starting_rank)..=page_of(finishing_rank))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    origin: String,
    league_id: u32,
}

impl Endpoints {
    pub fn new(origin: &str, league_id: u32) -> Self {
        Self {
            origin: origin.trim_end_matches('/').to_string(),
            league_id,
        }
    }

    pub fn standings(&self, page: u32) -> String {
        format!(
            "{}/my-leagues/{}/standings/?ls-page={page}",
            self.origin, self.league_id
        )
    }

    pub fn entry(&self, link: &str) -> String {
        if link.starts_with("http://") || link.starts_with("https://") {
            return link.to_string();
        }
        format!("{}/{}", self.origin, link.trim_start_matches('/'))
    }

    pub fn element(&self, player_id: u32) -> String {
        format!("{}/web/api/elements/{player_id}/", self.origin)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlayerStatsSummary {
    pub players_stored: usize,
    pub batches_failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManagerStatsSummary {
    pub pages: usize,
    pub managers: usize,
    pub batches_failed: usize,
    pub total_players: Option<i64>,
}

/// Reads the current game week from the first entry link on standings page 1.
pub fn discover_game_week<T: Transport, S: Sleeper>(
    fetcher: &PageFetcher<T, S>,
    endpoints: &Endpoints,
    schema: &PageSchema,
    save_pages: Option<&Path>,
) -> Result<u32> {
    let url = endpoints.standings(1);
    let body = fetcher
        .fetch(&url)
        .with_context(|| format!("fetch standings page 1 ({url})"))?;
    if let Some(dir) = save_pages {
        save_page(&dir.join("standings_1.html"), &body)?;
    }
    let links = extract_links(&body, schema).context("extract standings links")?;
    let first = links
        .first()
        .ok_or_else(|| anyhow!("standings page 1 has no entry links"))?;
    let game_week = game_week_from_link(first)?;
    info!(game_week, layout = schema.version, "current game week");
    Ok(game_week)
}

pub struct Pipeline<T, S> {
    fetcher: PageFetcher<T, S>,
    endpoints: Endpoints,
    schema: PageSchema,
    writers: Vec<BatchWriter>,
    ctx: RunContext,
}

impl<T: Transport, S: Sleeper> Pipeline<T, S> {
    pub fn new(
        fetcher: PageFetcher<T, S>,
        endpoints: Endpoints,
        schema: PageSchema,
        writers: Vec<BatchWriter>,
        ctx: RunContext,
    ) -> Self {
        Self {
            fetcher,
            endpoints,
            schema,
            writers,
            ctx,
        }
    }

    /// Discovers the game week, then builds the pipeline around it.
    pub fn start(
        fetcher: PageFetcher<T, S>,
        endpoints: Endpoints,
        schema: PageSchema,
        writers: Vec<BatchWriter>,
        season: u32,
        save_pages: Option<&Path>,
    ) -> Result<Self> {
        let game_week = discover_game_week(&fetcher, &endpoints, &schema, save_pages)?;
        Ok(Self::new(
            fetcher,
            endpoints,
            schema,
            writers,
            RunContext { game_week, season },
        ))
    }

    pub fn context(&self) -> RunContext {
        self.ctx
    }

    pub fn writers(&self) -> &[BatchWriter] {
        &self.writers
    }

    /// Walks element ids from 1 until the site answers not-found, then
    /// commits everything in one batch.
    pub fn download_player_stats(&mut self) -> Result<PlayerStatsSummary> {
        let mut summary = PlayerStatsSummary::default();
        let mut player_id = 1u32;

        let stopped = loop {
            let url = self.endpoints.element(player_id);
            let body = match self.fetcher.fetch(&url) {
                Ok(body) => body,
                Err(err) if err.is_not_found() => {
                    info!(last_id = player_id - 1, "Completed");
                    break Ok(());
                }
                Err(err) => {
                    let err = anyhow::Error::new(err).context(format!("fetch player {player_id}"));
                    break Err(err);
                }
            };
            let stats = match extract_player_stats(&body) {
                Ok(stats) => stats,
                Err(err) => {
                    break Err(anyhow::Error::new(err).context(format!("player {player_id}")));
                }
            };
            self.queue(&[player_stats_upsert(&stats, self.ctx)]);
            info!("added {} : {}", stats.id, stats.second_name);
            summary.players_stored += 1;
            player_id += 1;
        };

        summary.batches_failed = self.commit_all()?;
        stopped?;
        Ok(summary)
    }

    /// Scrapes every manager on the standings pages covering the rank range,
    /// committing once per page.
    pub fn download_manager_stats(
        &mut self,
        starting_rank: u32,
        finishing_rank: u32,
    ) -> Result<ManagerStatsSummary> {
        let pages = page_range(starting_rank, finishing_rank)?;
        let (first, last) = (*pages.start(), *pages.end());
        info!(
            "Processing pages {first} through {last} for a total of {} records.",
            record_count(&pages)
        );

        let mut summary = ManagerStatsSummary::default();
        for page in pages {
            info!("Processing page {page}.");
            if let Err(err) = self.process_standings_page(page, &mut summary) {
                self.discard_pending();
                return Err(err);
            }
            summary.batches_failed += self.commit_all()?;
            summary.pages += 1;
            match summary.total_players {
                Some(total) => info!("Page {page} added. {total} managers in game."),
                None => info!("Page {page} added."),
            }
        }
        Ok(summary)
    }

    fn process_standings_page(
        &mut self,
        page: u32,
        summary: &mut ManagerStatsSummary,
    ) -> Result<()> {
        let url = self.endpoints.standings(page);
        let body = self
            .fetcher
            .fetch(&url)
            .with_context(|| format!("fetch standings page {page}"))?;
        let links = extract_links(&body, &self.schema)
            .with_context(|| format!("extract links from standings page {page}"))?;

        for link in &links {
            let url = self.endpoints.entry(link);
            let body = self
                .fetcher
                .fetch(&url)
                .with_context(|| format!("fetch entry {link}"))?;
            let record = extract_entry(&body, link, &self.schema)
                .with_context(|| format!("extract entry {link}"))?;
            self.queue(&entry_statements(&record, self.ctx));
            summary.managers += 1;
            summary.total_players = Some(record.summary.total_players);
        }
        Ok(())
    }

    fn queue(&mut self, stmts: &[Statement]) {
        for writer in &mut self.writers {
            writer.queue_all(stmts.iter().cloned());
        }
    }

    fn discard_pending(&mut self) {
        for writer in &mut self.writers {
            let dropped = writer.pending().len();
            if dropped > 0 {
                warn!(store = writer.label(), dropped, "discarding unfinished page");
            }
            let _ = writer.take_pending();
        }
    }

    /// Flushes every writer; returns how many rejected their batch. A writer
    /// that cannot log its batch does not stop the others; the first such
    /// error is returned once all have been tried.
    fn commit_all(&mut self) -> Result<usize> {
        let mut failed = 0;
        let mut first_err = None;
        for writer in &mut self.writers {
            match writer.commit() {
                Ok(CommitOutcome::Failed(_)) => failed += 1,
                Ok(_) => {}
                Err(err) => {
                    warn!(store = writer.label(), error = %format!("{err:#}"), "commit aborted");
                    first_err.get_or_insert(err);
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(failed),
        }
    }
}

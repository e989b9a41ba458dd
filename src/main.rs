use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use fpl_scrape::config::RunConfig;
use fpl_scrape::fetch::{HttpTransport, PageFetcher, ThreadSleeper};
use fpl_scrape::page_schema::ENTRY_PAGE_2014;
use fpl_scrape::pipeline::{Endpoints, Pipeline};
use fpl_scrape::store::{self, BatchWriter};

fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = RunConfig::from_env_and_args().context("read run configuration")?;

    let mut writers = Vec::with_capacity(cfg.db_paths.len());
    for path in &cfg.db_paths {
        let conn = store::open_db(path)?;
        if cfg.init_schema {
            store::init_schema(&conn)?;
        }
        writers.push(BatchWriter::new(
            conn,
            path.display().to_string(),
            cfg.logs.clone(),
        ));
    }

    let fetcher = PageFetcher::new(HttpTransport::new()?, ThreadSleeper, cfg.backoff);
    let endpoints = Endpoints::new(&cfg.origin, cfg.league_id);
    let mut pipeline = Pipeline::start(
        fetcher,
        endpoints,
        ENTRY_PAGE_2014,
        writers,
        cfg.season,
        cfg.save_pages.as_deref(),
    )?;

    let ctx = pipeline.context();
    println!(
        "League {} season {} game week {}",
        cfg.league_id, ctx.season, ctx.game_week
    );

    if !cfg.skip_players {
        let summary = pipeline.download_player_stats()?;
        println!("Players stored: {}", summary.players_stored);
        if summary.batches_failed > 0 {
            println!(
                "Player batches rejected: {} (see {})",
                summary.batches_failed,
                cfg.logs.exceptions.display()
            );
        }
    }

    if !cfg.skip_managers {
        let summary = pipeline.download_manager_stats(cfg.starting_rank, cfg.finishing_rank)?;
        println!("Pages processed: {}", summary.pages);
        println!("Managers stored: {}", summary.managers);
        if let Some(total) = summary.total_players {
            println!("Managers in game: {total}");
        }
        if summary.batches_failed > 0 {
            println!(
                "Manager batches rejected: {} (see {})",
                summary.batches_failed,
                cfg.logs.exceptions.display()
            );
        }
    }

    Ok(())
}

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};

use crate::fetch::{BackoffPolicy, DEFAULT_RETRY_DELAY};
use crate::store::LogPaths;

pub const DEFAULT_LEAGUE_ID: u32 = 313;
pub const DEFAULT_SEASON: u32 = 1415;
pub const DEFAULT_ORIGIN: &str = "http://fantasy.premierleague.com";
const DEFAULT_DB: &str = "fpl.sqlite";
const DEFAULT_EXECUTION_LOG: &str = "Execution_log.sql";
const DEFAULT_EXCEPTIONS_LOG: &str = "Exceptions.txt";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub league_id: u32,
    pub season: u32,
    pub starting_rank: u32,
    pub finishing_rank: u32,
    pub origin: String,
    pub db_paths: Vec<PathBuf>,
    pub logs: LogPaths,
    pub backoff: BackoffPolicy,
    pub init_schema: bool,
    pub skip_players: bool,
    pub skip_managers: bool,
    pub save_pages: Option<PathBuf>,
}

impl RunConfig {
    pub fn from_env_and_args() -> Result<Self> {
        let args = std::env::args().skip(1).collect::<Vec<_>>();
        Self::from_sources(|key| std::env::var(key).ok(), &args)
    }

    /// Flags win over environment variables, which win over defaults.
    pub fn from_sources(env: impl Fn(&str) -> Option<String>, args: &[String]) -> Result<Self> {
        let setting = |flag: &str, key: &str| {
            arg_value(args, flag).or_else(|| env(key).filter(|v| !v.trim().is_empty()))
        };

        let league_id = parse_or(
            setting("--league-id", "FPL_LEAGUE_ID"),
            "league id",
            DEFAULT_LEAGUE_ID,
        )?;
        let season = parse_or(setting("--season", "FPL_SEASON"), "season", DEFAULT_SEASON)?;
        let starting_rank = parse_or(
            setting("--starting-rank", "FPL_STARTING_RANK"),
            "starting rank",
            1,
        )?;
        let finishing_rank = parse_or(
            setting("--finishing-rank", "FPL_FINISHING_RANK"),
            "finishing rank",
            10_000,
        )?;
        if starting_rank == 0 || finishing_rank < starting_rank {
            return Err(anyhow!(
                "invalid rank range {starting_rank}..={finishing_rank}"
            ));
        }

        let origin = setting("--origin", "FPL_ORIGIN")
            .unwrap_or_else(|| DEFAULT_ORIGIN.to_string())
            .trim_end_matches('/')
            .to_string();

        let mut db_paths = arg_values(args, "--db")
            .into_iter()
            .map(PathBuf::from)
            .collect::<Vec<_>>();
        if db_paths.is_empty() {
            db_paths = env("FPL_DB")
                .map(|raw| {
                    raw.split([',', ';'])
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(PathBuf::from)
                        .collect()
                })
                .unwrap_or_default();
        }
        if db_paths.is_empty() {
            db_paths.push(PathBuf::from(DEFAULT_DB));
        }

        let logs = LogPaths {
            execution: setting("--execution-log", "FPL_EXECUTION_LOG")
                .map_or_else(|| PathBuf::from(DEFAULT_EXECUTION_LOG), PathBuf::from),
            exceptions: setting("--exceptions-log", "FPL_EXCEPTIONS_LOG")
                .map_or_else(|| PathBuf::from(DEFAULT_EXCEPTIONS_LOG), PathBuf::from),
        };

        let delay = match setting("--retry-delay-secs", "FPL_RETRY_DELAY_SECS") {
            Some(raw) => Duration::from_secs(parse_num(&raw, "retry delay")?),
            None => DEFAULT_RETRY_DELAY,
        };
        let backoff = match setting("--retry-limit", "FPL_RETRY_LIMIT") {
            Some(raw) => BackoffPolicy::bounded(delay, parse_num(&raw, "retry limit")?),
            None => BackoffPolicy::unbounded(delay),
        };

        Ok(Self {
            league_id,
            season,
            starting_rank,
            finishing_rank,
            origin,
            db_paths,
            logs,
            backoff,
            init_schema: has_flag(args, "--init-schema"),
            skip_players: has_flag(args, "--skip-players"),
            skip_managers: has_flag(args, "--skip-managers"),
            save_pages: arg_value(args, "--save-pages").map(PathBuf::from),
        })
    }
}

fn parse_num<T: FromStr>(raw: &str, what: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse::<T>()
        .with_context(|| format!("invalid {what}: {raw:?}"))
}

fn parse_or<T: FromStr>(raw: Option<String>, what: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match raw {
        Some(raw) => parse_num(&raw, what),
        None => Ok(default),
    }
}

fn arg_value(args: &[String], flag: &str) -> Option<String> {
    arg_values(args, flag).into_iter().next()
}

/// Every value given for `flag`, as `--flag=value` or `--flag value`.
fn arg_values(args: &[String], flag: &str) -> Vec<String> {
    let prefix = format!("{flag}=");
    let mut out = Vec::new();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(raw) = arg.strip_prefix(&prefix) {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                out.push(trimmed.to_string());
            }
            continue;
        }
        if arg == flag
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
            && !next.starts_with("--")
        {
            out.push(next.trim().to_string());
        }
    }
    out
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|arg| arg == flag)
}

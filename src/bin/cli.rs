//! trail-matcher CLI - operator tool for the activity backlog
//!
//! Usage:
//!   trail-matcher match <ID>
//!   trail-matcher backlog [--limit N]
//!   trail-matcher reset [--athlete ID]
//!   trail-matcher refresh --base-url <URL> [--url NAME=URL...]
//!
//! Every command prints a JSON document on stdout. Logs go to stderr and
//! follow `RUST_LOG` (default `info`).

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use trail_matcher::{
    ActivityStore, BacklogRequest, DirectoryTrailSource, ErrorReport, InlineDispatcher,
    MatchConfig, Orchestrator, SqliteActivityStore, TrailLoader, TrailMatchError, TrailMatcher,
    DEFAULT_PRECISION, DEFAULT_TOLERANCE_METERS,
};

#[derive(Parser)]
#[command(name = "trail-matcher")]
#[command(about = "Match GPS activities against a trail network", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// SQLite database holding the activities
    #[arg(long, env = "TRAIL_MATCHER_DB", default_value = "activities.db", global = true)]
    db: PathBuf,

    /// Directory holding `<name>.geojson` trail datasets
    #[arg(long, env = "TRAIL_DATA_DIR", default_value = "trails", global = true)]
    trail_dir: PathBuf,

    /// On-trail tolerance in meters
    #[arg(long, env = "TRAIL_TOLERANCE_METERS", default_value_t = DEFAULT_TOLERANCE_METERS, global = true)]
    tolerance: f64,

    /// Trail datasets to match against (comma separated)
    #[arg(long = "dataset", env = "TRAIL_DATASETS", value_delimiter = ',', global = true)]
    datasets: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Match a single activity
    Match {
        /// Activity id
        id: i64,
    },

    /// Dispatch one batch of unmatched activities
    Backlog {
        /// Maximum activities to process
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Put matched activities back into the backlog
    Reset {
        /// Only reset this athlete's activities
        #[arg(short, long)]
        athlete: Option<i64>,
    },

    /// Download trail datasets into the trail directory
    #[cfg(feature = "http")]
    Refresh {
        /// Base URL serving `<name>.geojson`
        #[arg(long)]
        base_url: Option<String>,

        /// Explicit dataset URL, as NAME=URL (repeatable)
        #[arg(long = "url", value_parser = parse_dataset_url)]
        urls: Vec<(String, String)>,
    },
}

#[cfg(feature = "http")]
fn parse_dataset_url(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, url)) if !name.is_empty() && !url.is_empty() => {
            Ok((name.to_string(), url.to_string()))
        }
        _ => Err(format!("expected NAME=URL, got '{}'", s)),
    }
}

fn main() {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| writeln!(buf, "[{:5}] {}", record.level(), record.args()))
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        print_json(&ErrorReport::from(&e));
        process::exit(1);
    }
}

fn run(cli: Cli) -> trail_matcher::Result<()> {
    let config = MatchConfig {
        tolerance_meters: cli.tolerance,
        precision: DEFAULT_PRECISION,
        datasets: if cli.datasets.is_empty() {
            MatchConfig::default().datasets
        } else {
            cli.datasets.clone()
        },
    };

    match cli.command {
        Commands::Match { id } => {
            let matcher = build_matcher(&cli.db, &cli.trail_dir, config)?;
            let result = matcher.match_activity(id)?;
            print_json(&result);
        }
        Commands::Backlog { limit } => {
            let matcher = Arc::new(build_matcher(&cli.db, &cli.trail_dir, config)?);
            let datasets = matcher.config().datasets.clone();
            let orchestrator = Orchestrator::new(
                Arc::clone(&matcher),
                Box::new(InlineDispatcher::new(matcher)),
            );
            let summary = orchestrator.run(&BacklogRequest {
                batch_limit: limit,
                dataset_names: datasets,
            })?;
            print_json(&summary);
        }
        Commands::Reset { athlete } => {
            let store = open_store(&cli.db)?;
            let reset = store.reset_matches(athlete)?;
            print_json(&ResetOutput {
                athlete_id: athlete,
                reset,
            });
        }
        #[cfg(feature = "http")]
        Commands::Refresh { base_url, urls } => {
            let mut upstream = match base_url {
                Some(base) => trail_matcher::HttpTrailSource::new(&base)?,
                None => trail_matcher::HttpTrailSource::without_base()?,
            };
            for (name, url) in &urls {
                upstream = upstream.with_dataset_url(name.clone(), url.clone());
            }

            let target = DirectoryTrailSource::new(&cli.trail_dir);
            let statuses = trail_matcher::refresh_datasets(&upstream, &target, &config.datasets);
            let failed = statuses.iter().any(|s| !s.success);
            print_json(&statuses);
            if failed {
                process::exit(2);
            }
        }
    }

    Ok(())
}

#[derive(Serialize)]
struct ResetOutput {
    athlete_id: Option<i64>,
    reset: usize,
}

fn open_store(db: &Path) -> trail_matcher::Result<SqliteActivityStore> {
    let path = db.to_str().ok_or_else(|| TrailMatchError::Config {
        message: format!("database path is not valid UTF-8: {}", db.display()),
    })?;
    SqliteActivityStore::open(path)
}

fn build_matcher(
    db: &Path,
    trail_dir: &Path,
    config: MatchConfig,
) -> trail_matcher::Result<TrailMatcher> {
    let store = Arc::new(open_store(db)?);
    let trails = Arc::new(TrailLoader::new(Arc::new(DirectoryTrailSource::new(trail_dir))));
    TrailMatcher::new(store, trails, config)
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to serialize output: {}", e),
    }
}

//! CLI commands for pitwall-api.
//!
//! Supports API server mode, store maintenance, and viewing predictions.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::config::AppConfig;
use crate::storage::{RaceRepository, RaceStore};
use crate::types::Race;
use crate::view::{FetchStatus, HttpPredictionSource, PredictionView, TOP_N};

#[derive(Parser)]
#[command(name = "pitwall-api")]
#[command(version, about = "Pitwall: race listing API and prediction viewer", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the API server
    Serve {
        /// Host to bind to
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to bind to
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Create the database schema
    InitDb,

    /// Import races from a JSON file
    Import {
        /// Path to a JSON array of races
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },

    /// List races in API order
    Races {
        /// Output format (json, table)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// Show the top predictions for a race
    Predictions {
        /// Race identifier
        #[arg(value_name = "RACE_ID")]
        race_id: String,

        /// Prediction service base URL override
        #[arg(short, long)]
        url: Option<String>,

        /// Output format (json, table)
        #[arg(short, long, default_value = "table")]
        format: String,
    },
}

fn open_repository(config: &AppConfig) -> anyhow::Result<RaceRepository> {
    eprintln!("Opening database: {}", config.database.path);
    RaceRepository::new(Path::new(&config.database.path))
}

/// Create the schema at the configured path.
pub fn run_init_db() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    let repo = open_repository(&config)?;
    eprintln!("Schema ready ({} races)", repo.race_count()?);
    Ok(())
}

/// Upsert races from a JSON file.
pub fn run_import(input: PathBuf) -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    let repo = open_repository(&config)?;

    let json = std::fs::read_to_string(&input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let races: Vec<Race> = serde_json::from_str(&json).context("Failed to parse races")?;

    for race in &races {
        repo.insert_race(race)?;
    }

    eprintln!("Imported {} races ({} total)", races.len(), repo.race_count()?);
    Ok(())
}

/// Print races in the same order as `GET /api/races`.
pub fn run_races(format: String) -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    let repo = open_repository(&config)?;
    let races = repo.list_races()?;

    match format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&races)?),
        "table" => print_races(&races),
        _ => {
            eprintln!("Unknown format: {}. Using table.", format);
            print_races(&races);
        }
    }

    Ok(())
}

fn print_races(races: &[Race]) {
    println!(
        "{:>6}  {:>6}  {:>5}  {:<10}  {:<16}  {}",
        "ID", "SEASON", "ROUND", "DATE", "COUNTRY", "NAME"
    );
    for race in races {
        println!(
            "{:>6}  {:>6}  {:>5}  {:<10}  {:<16}  {}",
            race.id, race.season, race.round, race.date, race.country, race.name
        );
    }
}

/// Fetch predictions for a race and print the top of the list.
pub async fn run_predictions(
    race_id: String,
    url: Option<String>,
    format: String,
) -> anyhow::Result<()> {
    let mut config = AppConfig::load()?;

    if let Some(u) = url {
        config.predict.url = u;
    }

    eprintln!("Fetching predictions from: {}", config.predict.url);
    let source = HttpPredictionSource::new(&config.predict.url, config.predict.timeout())?;
    let mut view = PredictionView::new(source);

    view.set_race_id(race_id.as_str());
    let state = view.settled().await;

    if let FetchStatus::Failed(message) = &state.status {
        anyhow::bail!("Failed to fetch predictions for {}: {}", race_id, message);
    }

    match format.as_str() {
        "json" => {
            let top: Vec<_> = state.rows.iter().take(TOP_N).collect();
            println!("{}", serde_json::to_string_pretty(&top)?);
        }
        other => {
            if other != "table" {
                eprintln!("Unknown format: {}. Using table.", other);
            }
            println!("Race: {}", race_id);
            println!();
            for row in state.render() {
                println!("{}", row);
            }
        }
    }

    Ok(())
}

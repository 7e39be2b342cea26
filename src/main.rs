//! Sifa server and operator commands
//!
//! Run with: cargo run
//!
//! Configuration is read from the environment (and `.env`), see
//! [`sifa::config`]. `RUST_LOG` sets the log level (default: info).

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use sifa::alerts::{Target, TargetsFile};
use sifa::api::run_server;
use sifa::{Config, MuteTokens};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "sifa", version, about = "Dead man's switch for jobs and services")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server and the alert scheduler (default)
    Serve,
    /// Run a single evaluation cycle and exit
    Check,
    /// Print the mute link for a target
    MuteLink {
        /// Target id
        id: String,
    },
    /// Read a JSON array of targets from stdin and upsert them
    Ingest {
        /// Targets file to update
        #[arg(long, env = "SIFA_TARGETS", default_value = "config.json")]
        targets: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sifa=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Make .env values visible to clap's env fallbacks
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => run_server(Config::from_env()?).await,
        Command::Check => check().await,
        Command::MuteLink { id } => mute_link(&id),
        Command::Ingest { targets } => ingest(&targets),
    }
}

async fn check() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let targets = Arc::new(TargetsFile::load(&config.targets_path)?);
    let store = config.open_store()?;
    let scheduler = config.build_scheduler(targets, store)?;

    let report = scheduler.run_cycle(Utc::now()).await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if !report.errors.is_empty() {
        anyhow::bail!("{} target(s) failed evaluation", report.errors.len());
    }
    Ok(())
}

fn mute_link(id: &str) -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let targets = TargetsFile::load(&config.targets_path)?;
    if targets.get(id).is_none() {
        anyhow::bail!("unknown target '{}'", id);
    }

    let tokens = MuteTokens::new(&config.mute_secret);
    match &config.public_url {
        Some(base) => println!("{}", tokens.mute_url(base, id)),
        // Without SIFA_URL only the token can be printed
        None => println!("{}", tokens.generate(id)),
    }
    Ok(())
}

fn ingest(path: &Path) -> anyhow::Result<()> {
    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("failed to read targets from stdin")?;
    let incoming: Vec<Target> =
        serde_json::from_str(&input).context("stdin must be a JSON array of targets")?;

    let mut file = TargetsFile::load_or_default(path)?;
    let written = file.upsert(incoming);
    file.validate()?;
    file.save(path)?;

    tracing::info!(path = %path.display(), written, "Targets file updated");
    println!("ingested {} targets", written);
    Ok(())
}

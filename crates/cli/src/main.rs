//! ecomlens CLI - Run analytics passes and write the result tables.
//!
//! # Usage
//!
//! ```bash
//! # Run against the PostgreSQL-backed stores (ENTITY_DATABASE_URL, SESSION_DATABASE_URL)
//! ecomlens pg --out-dir output
//!
//! # Run against JSON-lines fixture files
//! ecomlens files --data-dir data --out-dir output
//!
//! # Override configuration from the command line
//! ecomlens files --data-dir data --sample-size 1000 --seed 7 --strategy earliest
//! ```
//!
//! # Commands
//!
//! - `pg` - Read both stores from `PostgreSQL`
//! - `files` - Read both stores from fixture files
//!
//! Configuration comes from `ECOMLENS_*` environment variables (and `.env`);
//! flags take precedence. Each result table is written to
//! `<out-dir>/<table>.json`.

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "ecomlens")]
#[command(author, version, about = "Cross-store e-commerce analytics")]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run against the PostgreSQL-backed entity and session stores
    Pg {
        #[command(flatten)]
        run: RunArgs,
    },
    /// Run against JSON-lines fixture files
    Files {
        /// Directory holding users.json, categories.json, products.json,
        /// transactions.json, sessions.json and optionally product_metrics.json
        #[arg(short, long)]
        data_dir: PathBuf,

        #[command(flatten)]
        run: RunArgs,
    },
}

/// Options shared by every run command. Unset options fall back to the
/// environment.
#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Directory the result tables are written to
    #[arg(short, long, default_value = "output")]
    pub out_dir: PathBuf,

    /// Target number of sampled session rows
    #[arg(long)]
    pub sample_size: Option<usize>,

    /// Sampler seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Sampling strategy inside each user stratum (`uniform`, `earliest`)
    #[arg(long)]
    pub strategy: Option<String>,

    /// Upper bound on session rows read by the sampler
    #[arg(long)]
    pub max_scan_records: Option<usize>,

    /// First session row key to sample (inclusive)
    #[arg(long)]
    pub range_start: Option<String>,

    /// Last session row key to sample (exclusive)
    #[arg(long)]
    pub range_end: Option<String>,

    /// Number of rows in the top products table
    #[arg(long)]
    pub top_k: Option<usize>,

    /// Funnel trajectory window in seconds
    #[arg(long)]
    pub funnel_window_secs: Option<i64>,

    /// CLV weight of normalized revenue
    #[arg(long)]
    pub revenue_weight: Option<f64>,

    /// CLV weight of normalized engagement
    #[arg(long)]
    pub engagement_weight: Option<f64>,
}

fn init_tracing(json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Pg { run } => commands::run::postgres(&run).await?,
        Commands::Files { data_dir, run } => commands::run::files(&data_dir, &run).await?,
    }
    Ok(())
}

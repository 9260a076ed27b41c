//! marketindex CLI — inspect and manage NFT marketplace indexer state.
//!
//! Usage:
//! ```bash
//! marketindex info
//! marketindex config [market.json]
//! marketindex decode logs.json [--json]
//! marketindex status ./market.db
//! marketindex rollback ./market.db 19000000
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};

use marketindex_core::event::EventKind;
use marketindex_core::indexer::IndexerConfig;

mod cmd_decode;
mod cmd_store;
mod logging;

#[derive(Parser)]
#[command(
    name = "marketindex",
    about = "Reorg-safe NFT marketplace event indexer",
    version
)]
struct Cli {
    /// Log level (overridden by RUST_LOG)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit JSON structured logs
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show supported events and defaults
    Info,

    /// Print version
    Version,

    /// Print the default config, or validate a JSON config file
    Config {
        /// Path to a JSON config file
        file: Option<String>,
    },

    /// Decode eth_getLogs log objects (one object or an array) into entities
    Decode {
        /// Path to the JSON file
        file: String,
        /// Output entities as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the checkpoint and entity counts of a SQLite store
    Status {
        /// Path to the SQLite database
        db: String,
    },

    /// Roll a SQLite store back to a committed block
    Rollback {
        /// Path to the SQLite database
        db: String,
        /// Block number to keep as the new checkpoint
        block: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_tracing(&logging::LogConfig {
        level: cli.log_level.clone(),
        json: cli.json_logs,
    });

    match cli.command {
        Commands::Info => cmd_info(),
        Commands::Version => println!("marketindex {}", env!("CARGO_PKG_VERSION")),
        Commands::Config { file } => cmd_config(file.as_deref())?,
        Commands::Decode { file, json } => cmd_decode::run(&file, json)?,
        Commands::Status { db } => cmd_store::status(&db).await?,
        Commands::Rollback { db, block } => cmd_store::rollback(&db, block).await?,
    }
    Ok(())
}

fn cmd_info() {
    let defaults = IndexerConfig::default();
    println!("MarketIndex v{}", env!("CARGO_PKG_VERSION"));
    println!("  Events:");
    for kind in EventKind::ALL {
        println!("    {:<40} {}", kind.signature(), kind.topic0());
    }
    println!("  Default poll interval: {} ms", defaults.poll_interval_ms);
    println!(
        "  Default retry backoff: {} ms → {} ms (×{})",
        defaults.retry.initial_backoff_ms, defaults.retry.max_backoff_ms, defaults.retry.multiplier
    );
    println!("  Storage backends: memory, SQLite (feature: sqlite)");
}

fn cmd_config(file: Option<&str>) -> Result<()> {
    let config = match file {
        Some(path) => {
            let config = IndexerConfig::from_json_file(path)?;
            eprintln!("✓ {path} is valid");
            config
        }
        None => IndexerConfig::default(),
    };
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

#![warn(missing_docs)]

//! Admin CLI for a tiervault durable store.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tiervault::{EngineConfig, StorageEngine};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "tiervault")]
#[command(about = "Inspect and maintain a tiervault store", long_about = None)]
struct Cli {
    /// Engine config (.toml or .json). Defaults are used if the file does not exist.
    #[arg(short, long, env = "TIERVAULT_CONFIG", default_value = "tiervault.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Usage against the configured ceiling.
    Quota,
    /// Sweep expired and undecodable entries.
    Cleanup,
    /// Persisted operation metrics.
    Metrics {
        /// Print name/value pairs instead of JSON.
        #[arg(long)]
        plain: bool,
    },
    /// List stored keys.
    Keys,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = if cli.config.exists() {
        EngineConfig::from_file(&cli.config)?
    } else {
        tracing::warn!("Config file not found, using defaults: {}", cli.config.display());
        EngineConfig::default()
    };
    let namespace = config.namespace.clone();
    let engine = StorageEngine::open(config).await?;

    match cli.command {
        Command::Quota => {
            println!("{}", serde_json::to_string_pretty(&engine.quota().await?)?);
        }
        Command::Cleanup => {
            let report = engine.cleanup().await?;
            engine.flush_metrics().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Metrics { plain } => {
            let metrics = engine.metrics();
            if plain {
                for m in metrics.collect(&namespace) {
                    println!("{} {:?}", m.name, m.value);
                }
            } else {
                println!("{}", serde_json::to_string_pretty(&metrics)?);
            }
        }
        Command::Keys => {
            // Only the durable store outlives this process.
            for (backend, key) in engine.keys().await? {
                println!("{}\t{}", backend, key);
            }
        }
    }
    Ok(())
}

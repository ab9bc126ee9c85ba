//! Inference dispatch runner - Main entry point.

mod commands;
mod config;
mod error;

use crate::commands::{batch, build_client, chat, costs, report_cost, require_ledger, stats};
use crate::config::{Config, LogFormat};
use crate::error::AppResult;
use anyhow::Context;
use clap::{Parser, Subcommand};
use inference_client::Journal;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Dispatch prompts to an OpenAI-compatible endpoint and track their cost.
#[derive(Parser, Debug)]
#[command(name = "dispatch-runner", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send a single prompt and print the answer.
    Chat(chat::ChatArgs),
    /// Dispatch a JSON array of prompts and print the results in order.
    Batch(batch::BatchArgs),
    /// Report the success rate recorded in the request journal.
    Stats {
        /// Journal file; defaults to the configured journal path
        #[arg(long)]
        journal: Option<PathBuf>,
    },
    /// Print the task's cost ledger and per-label totals.
    Costs,
}

#[tokio::main]
async fn main() -> AppResult<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_logging(&config.runner.log_level, config.runner.log_format);

    match &cli.command {
        Commands::Chat(args) => {
            let (client, ledger) = build_client(&config).await?;
            chat::run(args, &client).await?;
            report_cost(ledger.as_deref()).await;
        }
        Commands::Batch(args) => {
            let (client, ledger) = build_client(&config).await?;
            batch::run(args, &client).await?;
            report_cost(ledger.as_deref()).await;
        }
        Commands::Stats { journal } => {
            let path = journal
                .clone()
                .unwrap_or_else(|| config.inference.journal_path.clone());
            stats::run(&Journal::new(path)).await?;
        }
        Commands::Costs => {
            let ledger = require_ledger(&config.ledger).await?;
            costs::run(&ledger).await?;
        }
    }

    info!("Done");
    Ok(())
}

fn init_logging(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries command output
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

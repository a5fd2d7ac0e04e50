//! mcp-eval
//!
//! Runs a corpus of prompts against a model that can call the tools of an
//! MCP server, saves one JSON record per prompt and renders an HTML report.
//!
//! Commands:
//! - `run`: evaluate prompts and write `results/<YYYY-MM-DD_HH-MM>/`
//! - `report`: re-render `report.html` from a results folder

mod config;
mod prompts;
mod report;
mod results;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use eval_core::{EvalError, EvalSession, ModelGateway};
use eval_runtime::{AnthropicClient, StdioTransport};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{EvalConfig, RunArgs};

#[derive(Parser)]
#[command(name = "mcp-eval", about = "MCP evaluation tool", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(
        long,
        env = "DEBUG",
        global = true,
        value_parser = clap::builder::FalseyValueParser::new()
    )]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the prompts and write results and a report
    Run(Box<RunArgs>),

    /// Re-render report.html from a results folder
    Report {
        /// Results folder containing <slug>.json files
        folder: std::path::PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment before clap reads it
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Run(args) => run(EvalConfig::try_from(*args)?).await,
        Commands::Report { folder } => render_folder(&folder),
    }
}

async fn run(config: EvalConfig) -> anyhow::Result<()> {
    tracing::info!(
        prompts = config.prompts.len(),
        model = %config.orchestrator.model.model,
        "Starting MCP eval"
    );

    let run_dir = results::create_run_dir(&config.results_dir, Utc::now())?;
    tracing::info!(folder = %run_dir.display(), "Saving results");

    let client = AnthropicClient::new(config.anthropic.clone())?;
    let transport = StdioTransport::connect(&config.server)
        .await
        .context("Failed to connect to MCP server")?;
    tracing::info!(
        version = %transport.server_info().version,
        "MCP server ready"
    );

    let session = EvalSession::new(
        Arc::new(transport),
        ModelGateway::with_defaults(Arc::new(client)),
        config.orchestrator.clone(),
    );

    let outcome = session
        .run_all(&config.prompts, |artifact| {
            results::save_artifact(&run_dir, artifact)
                .map(|_| ())
                .map_err(EvalError::from)
        })
        .await;

    match outcome {
        Ok(artifacts) => {
            let html = report::render(&artifacts)?;
            results::save_report(&run_dir, &html)?;
            Ok(())
        }
        Err(err) => {
            tracing::error!(error = %err, "Run failed, rendering report for completed prompts");
            if let Err(report_err) = render_folder(&run_dir) {
                tracing::warn!(error = %report_err, "No partial report written");
            }
            Err(err.into())
        }
    }
}

fn render_folder(folder: &Path) -> anyhow::Result<()> {
    let artifacts = results::load_artifacts(folder)?;
    if artifacts.is_empty() {
        bail!("No results found in {}", folder.display());
    }
    tracing::info!(count = artifacts.len(), folder = %folder.display(), "Rendering report");
    let html = report::render(&artifacts)?;
    results::save_report(folder, &html)?;
    Ok(())
}

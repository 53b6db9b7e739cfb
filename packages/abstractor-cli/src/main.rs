//! Terminal host for the abstractor controller.
//!
//! Submits an article, prints progress as it arrives, and saves the
//! generated slide deck.

mod config;

use std::path::{Path, PathBuf};

use abstractor::types::log_export_filename;
use abstractor::{
    ControllerError, ControllerState, DirectorySink, ErrorDetail, ExtractionController,
    ExtractionInput, ExtractionResult, LogEntry, LogLevel, Phase, Resolution,
};
use abstractor_client::{FileUpload, JobId};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

#[derive(Parser)]
#[command(name = "abstractor")]
#[command(about = "Turn journal articles into VA abstract slide decks")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit an article and download the generated deck
    Extract {
        /// Article URL
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        url: Option<String>,

        /// Local PDF to upload
        #[arg(long)]
        file: Option<PathBuf>,

        #[command(flatten)]
        output: OutputArgs,

        /// Retry a failed job this many times
        #[arg(long, default_value_t = 0)]
        retries: u32,
    },

    /// Follow a job that was already submitted
    Follow {
        job_id: String,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Check that the service is reachable
    Health,
}

#[derive(clap::Args)]
struct OutputArgs {
    /// Where to save the deck (defaults to ABSTRACTOR_OUTPUT_DIR)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Write the processing log to this file or directory
    #[arg(long)]
    export_logs: Option<PathBuf>,

    /// Delete the job on the server after downloading
    #[arg(long)]
    delete_after: bool,

    /// Print the final state as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,abstractor=info,abstractor_client=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::debug!(base_url = %config.api_base_url, "Configuration loaded");

    match cli.command {
        Commands::Extract {
            url,
            file,
            output,
            retries,
        } => {
            let input = read_input(url, file).await?;
            let controller = build_controller(&config, &output);
            let state = run_with_retries(&controller, input, retries).await?;
            finish(&config, &controller, state, &output).await
        }
        Commands::Follow { job_id, output } => {
            let controller = build_controller(&config, &output);
            controller.subscribe(JobId::new(job_id)).await;
            let state = follow(&controller).await;
            finish(&config, &controller, state, &output).await
        }
        Commands::Health => health(&config).await,
    }
}

fn build_controller(config: &Config, output: &OutputArgs) -> ExtractionController {
    let dir = output
        .output_dir
        .clone()
        .unwrap_or_else(|| config.output_dir.clone());
    ExtractionController::builder(config.client(), DirectorySink::new(dir))
        .with_config(config.controller_config())
        .build()
}

async fn read_input(url: Option<String>, file: Option<PathBuf>) -> Result<ExtractionInput> {
    match (url, file) {
        (Some(url), None) => Ok(ExtractionInput::url(url)),
        (None, Some(path)) => {
            let bytes = tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .context("File path has no file name")?;
            Ok(ExtractionInput::file(FileUpload::new(filename, bytes)))
        }
        _ => bail!("Pass exactly one of --url or --file"),
    }
}

async fn run_with_retries(
    controller: &ExtractionController,
    input: ExtractionInput,
    retries: u32,
) -> Result<ControllerState> {
    let mut attempt = 0;
    let mut started = controller.start(input).await.map(|_| ());

    loop {
        if let Err(ControllerError::InvalidInput(reason)) = &started {
            print_error(controller.snapshot().error.as_ref());
            bail!("Invalid input: {}", reason);
        }

        let state = follow(controller).await;
        if state.phase != Phase::Failed || attempt >= retries {
            return Ok(state);
        }

        attempt += 1;
        println!(
            "{}",
            format!("↻ Retrying ({}/{})...", attempt, retries).bright_yellow()
        );
        started = controller.retry().await.map(|_| ());
    }
}

/// Print log lines as they arrive until nothing is in flight.
async fn follow(controller: &ExtractionController) -> ControllerState {
    let mut rx = controller.watch();
    let mut printed = 0;

    loop {
        let state = rx.borrow_and_update().clone();
        for entry in state.logs.iter().skip(printed) {
            print_log(entry);
        }
        printed = state.logs.len();

        if !state.phase.is_active() {
            return state;
        }
        if rx.changed().await.is_err() {
            return controller.snapshot();
        }
    }
}

async fn finish(
    config: &Config,
    controller: &ExtractionController,
    state: ControllerState,
    output: &OutputArgs,
) -> Result<()> {
    let outcome = match state.resolution() {
        Resolution::Completed(result) => {
            print_result(result);
            save_deck(config, controller, &result.artifact.job_id, output.delete_after).await
        }
        Resolution::Failed(detail) => {
            print_error(Some(detail));
            Err(anyhow::anyhow!("Extraction failed: {}", detail.code))
        }
        Resolution::InProgress(_) | Resolution::Idle => {
            Err(anyhow::anyhow!("Extraction ended without a result"))
        }
    };

    if let Some(path) = &output.export_logs {
        let written = export_logs(controller, path).await?;
        println!("{} {}", "Logs written to".dimmed(), written.display());
    }
    if output.json {
        println!("{}", serde_json::to_string_pretty(&controller.snapshot())?);
    }

    outcome
}

async fn save_deck(
    config: &Config,
    controller: &ExtractionController,
    job_id: &JobId,
    delete_after: bool,
) -> Result<()> {
    let path = controller
        .download(job_id)
        .await
        .context("Failed to download slide deck")?;
    println!("{} {}", "✓ Saved".bright_green().bold(), path.display());

    if delete_after {
        if let Err(e) = config.client().delete_job(job_id).await {
            tracing::warn!(job_id = %job_id, error = %e, "Failed to delete job");
        }
    }
    Ok(())
}

async fn export_logs(controller: &ExtractionController, path: &Path) -> Result<PathBuf> {
    let target = if path.is_dir() {
        path.join(log_export_filename(chrono::Local::now().date_naive()))
    } else {
        path.to_path_buf()
    };
    tokio::fs::write(&target, controller.export_logs())
        .await
        .with_context(|| format!("Failed to write logs to {}", target.display()))?;
    Ok(target)
}

async fn health(config: &Config) -> Result<()> {
    let status = config
        .client()
        .health_check()
        .await
        .with_context(|| format!("Service at {} is unreachable", config.api_base_url))?;

    println!(
        "{} {} ({})",
        "✓".bright_green(),
        config.api_base_url,
        status.status
    );
    if let Some(message) = status.message {
        println!("  {}", message);
    }
    if let Some(version) = status.version {
        println!("  version {}", version);
    }
    Ok(())
}

fn print_log(entry: &LogEntry) {
    let prefix = format!(
        "[{}] {}",
        entry.timestamp.format("%H:%M:%S"),
        entry.step.to_uppercase()
    );
    let line = match entry.level {
        LogLevel::Info => entry.message.normal(),
        LogLevel::Warning => entry.message.bright_yellow(),
        LogLevel::Error => entry.message.bright_red(),
        LogLevel::Success => entry.message.bright_green(),
    };
    println!("{} {}", prefix.dimmed(), line);
    if let Some(duration) = entry.duration_ms {
        println!("{}", format!("    took {}ms", duration).dimmed());
    }
}

fn print_result(result: &ExtractionResult) {
    println!();
    println!(
        "{} {}",
        result.classification.emoji(),
        result.title().unwrap_or("Untitled article").bold()
    );
    for (name, value) in result.fields.iter().filter(|(name, _)| *name != "title") {
        println!("  {} {}", format!("{}:", name.replace('_', " ")).bright_cyan(), value);
    }
    if let Some(score) = result.quality_score {
        println!("  {} {:.2}", "quality:".bright_cyan(), score);
    }
    println!();
}

fn print_error(detail: Option<&ErrorDetail>) {
    let Some(detail) = detail else {
        return;
    };
    println!();
    println!(
        "{} {} ({})",
        "✗".bright_red().bold(),
        detail.message.bright_red(),
        detail.code
    );
    println!("  {}", detail.reason);
    println!("  {}", "What you can do:".bold());
    for action in &detail.recovery_actions {
        println!("    • {}", action);
    }
    for link in &detail.related_links {
        println!("    {} {}", link.title, link.url.underline());
    }
}

//! Escalation CLI - run the escalation engine against a static catalog.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use escalation::{
    Catalog, EngineConfig, EscalationError, EscalationScheduler, EventStore, FileStateStore,
    MemoryStore, SchedulerDeps, TargetResolver,
};
use notify::{AttemptStore, MemoryAttemptStore, NotificationDispatcher, SystemClock, TracingSink};

/// Escalation CLI - drive alerts through escalation policies.
#[derive(Parser)]
#[command(name = "escalation")]
#[command(about = "Alert escalation engine")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate provider configuration
    Validate {
        /// Engine configuration file
        #[arg(long, env = "ESCALATION_CONFIG")]
        config: PathBuf,
    },

    /// Run the engine, reading JSON-lines commands from stdin
    Run {
        /// Engine configuration file
        #[arg(long, env = "ESCALATION_CONFIG")]
        config: PathBuf,

        /// Catalog of policies, alerts, users, teams and schedules
        #[arg(long)]
        catalog: PathBuf,

        /// Exit when stdin closes instead of waiting for Ctrl-C
        #[arg(long)]
        exit_on_eof: bool,
    },
}

/// One stdin command.
#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
enum EngineCommand {
    Trigger { alert_id: String, policy_id: String },
    Acknowledge { alert_id: String },
    Close { alert_id: String },
    Stop { alert_id: String },
    Status { alert_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    match cli.command {
        Commands::Validate { config } => run_validate(&config),
        Commands::Run {
            config,
            catalog,
            exit_on_eof,
        } => {
            tracing::info!(
                config = %config.display(),
                catalog = %catalog.display(),
                "Starting escalation engine"
            );
            run_engine(&config, &catalog, exit_on_eof).await
        }
    }
}

fn init_tracing(verbose: bool, format: LogFormat) {
    let default = if verbose {
        "escalation=debug,notify=debug,info"
    } else {
        "escalation=info,notify=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // stdout carries command results, logs go to stderr.
    let (text, json) = match format {
        LogFormat::Text => (Some(fmt::layer().with_writer(std::io::stderr)), None),
        LogFormat::Json => (
            None,
            Some(fmt::layer().json().with_writer(std::io::stderr)),
        ),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(json)
        .init();
}

fn run_validate(path: &Path) -> Result<()> {
    let config = EngineConfig::load(path)?;
    let registry = config.build_registry()?;

    let mut channels: Vec<_> = registry.channels().iter().map(ToString::to_string).collect();
    channels.sort();
    println!(
        "✓ {} provider entries valid ({} enabled: {})",
        config.providers.len(),
        channels.len(),
        channels.join(", ")
    );
    Ok(())
}

async fn run_engine(config_path: &Path, catalog_path: &Path, exit_on_eof: bool) -> Result<()> {
    let config = EngineConfig::load(config_path)?;
    let registry = Arc::new(config.build_registry()?);
    if registry.is_empty() {
        tracing::warn!("No notification providers enabled, escalations will not deliver");
    }

    let catalog = Catalog::load(catalog_path)
        .await
        .with_context(|| format!("Failed to load catalog {}", catalog_path.display()))?;
    let directory = Arc::new(MemoryStore::from_catalog(catalog));

    let (events, attempts): (Arc<dyn EventStore>, Arc<dyn AttemptStore>) = match &config.state_dir
    {
        Some(dir) => {
            let state = Arc::new(
                FileStateStore::open(dir)
                    .await
                    .with_context(|| format!("Failed to open state directory {}", dir.display()))?
                    .with_retention(config.state_retention()),
            );
            let events: Arc<dyn EventStore> = state.clone();
            let attempts: Arc<dyn AttemptStore> = state;
            (events, attempts)
        }
        None => {
            let events: Arc<dyn EventStore> = directory.clone();
            let attempts: Arc<dyn AttemptStore> = Arc::new(MemoryAttemptStore::new());
            (events, attempts)
        }
    };

    let metrics = Arc::new(TracingSink);
    let clock = Arc::new(SystemClock);
    let dispatcher = NotificationDispatcher::new(registry, attempts, metrics.clone(), clock.clone());
    let deps = SchedulerDeps {
        policies: directory.clone(),
        alerts: directory.clone(),
        events,
        resolver: Arc::new(TargetResolver::new(
            directory.clone(),
            directory.clone(),
            directory,
        )),
        dispatcher,
        metrics,
        clock,
    };

    let (scheduler, task) =
        EscalationScheduler::spawn(deps, config.scheduler.scheduler_config());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => {
                match line.context("Failed to read stdin")? {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => println!("{}", execute(&scheduler, &line).await),
                    None if exit_on_eof => break,
                    None => {
                        tracing::info!("stdin closed, serving timers until interrupted");
                        stdin_open = false;
                    }
                }
            }
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl-C")?;
                tracing::info!("Interrupted, shutting down");
                break;
            }
        }
    }

    scheduler.shutdown().await?;
    task.await.context("Scheduler task panicked")?;
    Ok(())
}

async fn execute(scheduler: &EscalationScheduler, line: &str) -> serde_json::Value {
    let command: EngineCommand = match serde_json::from_str(line) {
        Ok(command) => command,
        Err(e) => return json!({ "ok": false, "error": format!("Invalid command: {e}") }),
    };
    tracing::debug!(command = ?command, "Executing command");

    let result = match command {
        EngineCommand::Trigger {
            alert_id,
            policy_id,
        } => scheduler.trigger(&alert_id, &policy_id).await.map(Some),
        EngineCommand::Acknowledge { alert_id } => scheduler.acknowledge(&alert_id).await,
        EngineCommand::Close { alert_id } => scheduler.close(&alert_id).await,
        EngineCommand::Stop { alert_id } => scheduler.stop(&alert_id).await,
        EngineCommand::Status { alert_id } => scheduler.event(&alert_id).await,
    };

    match result {
        Ok(event) => json!({ "ok": true, "event": event }),
        Err(e @ EscalationError::SchedulerClosed) => {
            tracing::error!(error = %e, "Scheduler is not running");
            json!({ "ok": false, "error": e.to_string() })
        }
        Err(e) => json!({ "ok": false, "error": e.to_string() }),
    }
}

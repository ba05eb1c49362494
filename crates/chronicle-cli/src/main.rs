//! chronicle - run analysis cycles and inspect their ledger

use anyhow::{Context, Result};
use chronicle_cycle::{CommandPhase, CycleScheduler, FeedbackLoop, HistoryLogProvider};
use chronicle_exec::ExecPool;
use chronicle_ledger::{Ledger, VerifyReport};
use clap::{Parser, Subcommand};
use config::ChronicleConfig;
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod config;

/// chronicle - tamper-evident cycle recording
#[derive(Parser, Debug)]
#[command(name = "chronicle")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to ./chronicle.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the ledger directory
    #[arg(long, global = true)]
    ledger_dir: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run cycles on the configured period until Ctrl-C
    Run {
        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
    },

    /// Check entry hashes and the cycle chain
    Verify {
        /// Recompute every hash and keep going after the first finding
        #[arg(long)]
        deep: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the most recent entry
    Head,

    /// Show the most recent cycle summary
    LastCycle,

    /// Show the Merkle snapshot over all entries
    Snapshot,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = ChronicleConfig::load(cli.config.as_deref())?;
    if let Some(dir) = cli.ledger_dir {
        config.ledger_dir = dir;
    }

    match cli.command {
        Commands::Run { once } => run(config, once).await,
        Commands::Verify { deep, json } => verify(&config, deep, json).await,
        Commands::Head => {
            let ledger = open_ledger(&config).await?;
            print_json(&ledger.head().await?)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::LastCycle => {
            let ledger = open_ledger(&config).await?;
            print_json(&ledger.last_cycle().await)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Snapshot => {
            let ledger = open_ledger(&config).await?;
            print_json(&ledger.snapshot().await?)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn open_ledger(config: &ChronicleConfig) -> Result<Arc<Ledger>> {
    let dir = config.ledger_path();
    let ledger = Ledger::open(&dir, config.ledger_config())
        .await
        .with_context(|| format!("failed to open ledger at {}", dir.display()))?;
    Ok(Arc::new(ledger))
}

async fn run(config: ChronicleConfig, once: bool) -> Result<ExitCode> {
    if config.phases.is_empty() {
        anyhow::bail!("no phases configured");
    }

    let ledger = open_ledger(&config).await?;
    let pool = Arc::new(ExecPool::new(config.pool.clone()));

    let history = config.history_path();
    let mut context = HistoryLogProvider::open(&history)
        .await
        .with_context(|| format!("failed to open history {}", history.display()))?;
    if let Some(limit) = config.history_limit {
        context = context.with_limit(limit);
    }

    let mut builder = CycleScheduler::builder(ledger.clone(), Arc::new(context))
        .workspace(&config.workspace)
        .config(config.scheduler.clone());
    for spec in &config.phases {
        builder = builder.phase(CommandPhase::new(&spec.name, spec.request(), pool.clone()));
    }
    if let Some(feedback) = config.feedback.clone() {
        builder = builder.feedback(FeedbackLoop::open(ledger.dir(), feedback).await?);
    }
    let scheduler = builder.build()?;

    if once {
        let outcome = scheduler.trigger().await;
        scheduler.shutdown().await?;
        pool.close();
        return match outcome.report() {
            Some(report) => {
                print_json(report)?;
                Ok(if report.success {
                    ExitCode::SUCCESS
                } else {
                    ExitCode::FAILURE
                })
            }
            None => {
                info!(outcome = ?outcome, "No cycle executed");
                Ok(ExitCode::SUCCESS)
            }
        };
    }

    scheduler.start_default().await;
    info!(
        workspace = %config.workspace.display(),
        phases = config.phases.len(),
        "Chronicle running, Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("Shutting down");
    scheduler.shutdown().await?;
    pool.close();

    let status = scheduler.status();
    info!(
        completed = status.completed_cycles,
        skipped = status.skipped_cycles,
        restarts = status.watchdog_restarts,
        "Stopped"
    );
    Ok(ExitCode::SUCCESS)
}

async fn verify(config: &ChronicleConfig, deep: bool, json: bool) -> Result<ExitCode> {
    let ledger = open_ledger(config).await?;
    let report = ledger.verify_with(deep).await?;

    if json {
        print_json(&report)?;
    } else {
        print_report(&report);
    }
    Ok(if report.valid {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn print_report(report: &VerifyReport) {
    println!(
        "{} entries, {} cycles checked",
        report.entries_checked, report.cycles_checked
    );
    if report.valid {
        println!("ledger is intact");
        return;
    }
    for discrepancy in &report.discrepancies {
        println!("  {discrepancy}");
    }
    println!("{} discrepancies found", report.discrepancies.len());
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

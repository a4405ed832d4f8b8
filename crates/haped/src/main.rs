//! haped — the hape reconciliation daemon.
//!
//! Watches the target store and drives every worker's final-target
//! towards what operators asked for:
//! - Target store (shared filesystem or redb)
//! - Worker runtime (shell command templates)
//! - Event processor + handler chain
//!
//! # Usage
//!
//! ```text
//! haped --config /etc/hape/hape.toml run
//! haped --root /var/lib/hape/targets tick --worker d1/searcher/searcher-0
//! haped init-config --root /var/lib/hape/targets > hape.toml
//! ```

mod daemon;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use hape_core::{HapeConfig, WorkerKey};
use hape_reconcile::EventProcessor;
use hape_runtime::ShellRuntime;
use tokio::sync::watch;
use tracing::info;

use crate::daemon::Daemon;

#[derive(Parser)]
#[command(name = "haped", about = "hape target reconciliation daemon")]
struct Cli {
    /// Path to hape.toml. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override `[store].root`.
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Log output format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Reconcile continuously until Ctrl-C.
    Run,
    /// Run a single pass, or a single worker, and exit.
    Tick {
        /// Only this worker, as `domain/role/worker`.
        #[arg(long)]
        worker: Option<WorkerKey>,
    },
    /// Print a starting hape.toml.
    InitConfig,
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,haped=debug,hape=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<HapeConfig> {
    let mut config = match &cli.config {
        Some(path) => HapeConfig::from_file(path)?,
        None => HapeConfig::default(),
    };
    if let Some(root) = &cli.root {
        config.store.root = root.clone();
    }
    Ok(config)
}

fn build_daemon(config: &HapeConfig) -> anyhow::Result<Daemon> {
    let store = hape_target::open(&config.store)?;
    info!(backend = ?config.store.backend, root = ?config.store.root, "target store opened");

    let runtime = Arc::new(ShellRuntime::new(config.runtime.clone()));
    info!(kind = ?config.runtime.kind, "worker runtime initialized");

    let processor = EventProcessor::from_config(config, store, runtime);
    Ok(Daemon::new(
        processor,
        config.reconcile.tick_interval(),
        config.reconcile.max_parallel_workers,
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let config = load_config(&cli)?;

    match cli.command {
        Command::Run => run(&config).await,
        Command::Tick { worker } => tick(&config, worker).await,
        Command::InitConfig => {
            let root = cli.root.unwrap_or_else(|| config.store.root.clone());
            print!("{}", HapeConfig::scaffold(&root).to_toml_string()?);
            Ok(())
        }
    }
}

async fn run(config: &HapeConfig) -> anyhow::Result<()> {
    info!("hape daemon starting");
    let daemon = Arc::new(build_daemon(config)?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let loop_handle = tokio::spawn({
        let daemon = daemon.clone();
        async move { daemon.run(shutdown_rx).await }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    let _ = loop_handle.await;

    info!("hape daemon stopped");
    Ok(())
}

async fn tick(config: &HapeConfig, worker: Option<WorkerKey>) -> anyhow::Result<()> {
    let daemon = build_daemon(config)?;
    match worker {
        Some(worker) => {
            let report = daemon.tick_worker(worker).await?;
            for (handler, outcome) in &report.outcomes {
                println!("{:<18} {outcome}", handler);
            }
        }
        None => {
            let summary = daemon.pass().await?;
            println!(
                "{} workers, {} applied, {} failed",
                summary.workers, summary.applied, summary.failed
            );
        }
    }
    Ok(())
}

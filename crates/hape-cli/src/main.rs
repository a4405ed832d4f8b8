use std::path::PathBuf;

use clap::{Parser, Subcommand};
use hape_core::{HapeConfig, TargetKind, WorkerKey};

mod commands;

use commands::submit::PlanArgs;

#[derive(Parser)]
#[command(
    name = "hape",
    about = "hape — submit commands to workers and inspect their targets",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Path to hape.toml. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override `[store].root`.
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a worker with the given placement
    Start {
        /// Worker as `domain/role/worker`
        worker: WorkerKey,
        #[command(flatten)]
        plan: PlanArgs,
        /// Host parameter passed to the runtime, as `key=value` (repeatable)
        #[arg(long = "host-init", value_name = "KEY=VALUE")]
        host_init: Vec<String>,
    },
    /// Stop a worker, keeping its documents
    Stop {
        worker: WorkerKey,
    },
    /// Remove a worker and all of its documents
    Remove {
        worker: WorkerKey,
    },
    /// Point a worker at a new business configuration
    Upc {
        worker: WorkerKey,
        /// New config path
        #[arg(long)]
        config_path: String,
    },
    /// Deploy packages to a worker
    Dp {
        worker: WorkerKey,
        /// Package to deploy (repeatable, replaces the current list)
        #[arg(long = "package", required = true)]
        packages: Vec<String>,
    },
    /// Switch a searcher to new full indexes
    Upf {
        worker: WorkerKey,
        /// New index location as `name=path` (repeatable)
        #[arg(long = "index", value_name = "NAME=PATH", required = true)]
        indexes: Vec<String>,
    },
    /// Print a worker's documents
    Show {
        worker: WorkerKey,
        /// Only this document (user-target, final-target or heartbeat)
        #[arg(short, long)]
        kind: Option<TargetKind>,
    },
    /// List known workers
    List {
        /// Only this domain
        #[arg(short, long)]
        domain: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("hape=info".parse()?)
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => HapeConfig::from_file(path)?,
        None => HapeConfig::default(),
    };
    if let Some(root) = cli.root {
        config.store.root = root;
    }
    let store = commands::open_store(&config.store)?;

    match cli.command {
        Commands::Start { worker, plan, host_init } => {
            commands::submit::start(store.as_ref(), &worker, &plan, &host_init)
        }
        Commands::Stop { worker } => commands::submit::stop(store.as_ref(), &worker),
        Commands::Remove { worker } => commands::submit::remove(store.as_ref(), &worker),
        Commands::Upc { worker, config_path } => {
            commands::submit::upc(store.as_ref(), &worker, &config_path)
        }
        Commands::Dp { worker, packages } => {
            commands::submit::dp(store.as_ref(), &worker, &packages)
        }
        Commands::Upf { worker, indexes } => {
            commands::submit::upf(store.as_ref(), &worker, &indexes)
        }
        Commands::Show { worker, kind } => commands::inspect::show(store.as_ref(), &worker, kind),
        Commands::List { domain } => commands::inspect::list(store.as_ref(), domain.as_deref()),
    }
}

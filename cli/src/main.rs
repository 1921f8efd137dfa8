//! fleetstrap CLI: provision, install and bootstrap a test network.
//!
//! # Usage
//!
//! ```text
//! fleetstrap prepare-infra
//! fleetstrap install go
//! fleetstrap install celestia-app --version v3.4.2-mammoth-v0.7.0
//! fleetstrap bootstrap-network test-chain --seed 42
//! fleetstrap status
//! fleetstrap delete-all
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fleetstrap_core::config::FleetConfig;
use fleetstrap_core::install::{Component, InstallReport, Outcome};
use fleetstrap_core::state::default_state_path;
use fleetstrap_core::{Fleet, FleetStatus};
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_FILE: &str = "fleet.yaml";

/// fleetstrap - fleet provisioning and network bootstrap
#[derive(Parser, Debug)]
#[command(name = "fleetstrap")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Fleet configuration file (defaults to ./fleet.yaml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// State file (defaults to $FLEETSTRAP_STATE or ~/.fleetstrap/state.json)
    #[arg(long)]
    state: Option<PathBuf>,

    /// Log filter (trace, debug, info, warn, error); RUST_LOG wins when set
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create missing user, project and instances; wait until ready
    PrepareInfra,

    /// Install a component (go, celestia-app, celestia-node) on the fleet
    Install {
        component: Component,

        /// Version to install instead of the configured one
        #[arg(long)]
        version: Option<String>,
    },

    /// Generate keys and genesis and distribute them to every validator
    BootstrapNetwork {
        #[arg(default_value = "test-chain")]
        chain_id: String,

        /// Key generator seed instead of the configured one
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Prepare infrastructure, then install every component in order
    Up,

    /// Delete every recorded instance
    DeleteAll,

    /// Show recorded instances against the configured fleet
    Status,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let config = load_config(cli.config.as_deref())?;
    let state_path = resolve_state_path(cli.state);
    let fleet = Fleet::from_config(config, &state_path);

    match cli.command {
        Commands::PrepareInfra => prepare(&fleet),
        Commands::Install { component, version } => {
            let report = runtime()?.block_on(fleet.install(component, version.as_deref()))?;
            print_report(&report);
            Ok(())
        }
        Commands::BootstrapNetwork { chain_id, seed } => {
            let outcome = fleet
                .bootstrap_network(&chain_id, seed)
                .with_context(|| format!("bootstrapping network '{}'", chain_id))?;
            println!("chain {} bootstrapped with {} validators", chain_id, outcome.nodes.len());
            for node in &outcome.nodes {
                println!("  {:<16} {}", node.name, node.peer);
            }
            Ok(())
        }
        Commands::Up => {
            prepare(&fleet)?;
            let rt = runtime()?;
            for component in Component::ALL {
                let report = rt.block_on(fleet.install(component, None))?;
                print_report(&report);
            }
            Ok(())
        }
        Commands::DeleteAll => {
            let deleted = fleet.delete_all().context("deleting instances")?;
            println!("deleted {} instances", deleted);
            Ok(())
        }
        Commands::Status => {
            print_status(&fleet.status()?);
            Ok(())
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")
}

/// Explicit path must exist; the implicit `./fleet.yaml` is optional.
fn load_config(explicit: Option<&Path>) -> Result<FleetConfig> {
    if let Some(path) = explicit {
        return FleetConfig::load(path).with_context(|| format!("loading {}", path.display()));
    }
    let implicit = Path::new(DEFAULT_CONFIG_FILE);
    if implicit.exists() {
        return FleetConfig::load(implicit).with_context(|| format!("loading {}", DEFAULT_CONFIG_FILE));
    }
    warn!("no {} found; using built-in defaults", DEFAULT_CONFIG_FILE);
    Ok(FleetConfig::default())
}

fn resolve_state_path(flag: Option<PathBuf>) -> PathBuf {
    flag.unwrap_or_else(default_state_path)
}

fn prepare(fleet: &Fleet) -> Result<()> {
    let summary = fleet.prepare_infra().context("preparing infrastructure")?;
    info!(created = summary.created.len(), "prepare-infra complete");
    for name in &summary.orphaned {
        println!("warning: {} is recorded but no longer configured", name);
    }
    for record in &summary.instances {
        println!("{:<16} {:>8}  {}", record.name, record.id, record.public_ip);
    }
    Ok(())
}

fn print_report(report: &InstallReport) {
    println!(
        "{}: {} installed, {} already present, {} skipped",
        report.action.label(),
        report.count(Outcome::Installed),
        report.count(Outcome::AlreadyPresent),
        report.count(Outcome::SkippedNoAddress),
    );
}

fn print_status(status: &FleetStatus) {
    let id = |v: Option<u64>| v.map_or_else(|| "-".to_string(), |id| id.to_string());
    println!("project {} (id {}, user {})", status.project, id(status.project_id), id(status.user_id));
    for record in &status.instances {
        let ip = if record.public_ip.is_empty() { "(pending)" } else { record.public_ip.as_str() };
        println!("  {:<16} {:>8}  {}", record.name, record.id, ip);
    }
    if !status.missing.is_empty() {
        println!("  not created: {}", status.missing.join(", "));
    }
    if !status.orphaned.is_empty() {
        println!("  no longer configured: {}", status.orphaned.join(", "));
    }
}

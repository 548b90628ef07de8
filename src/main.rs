//! tokenledger - session usage sync
//!
//! Reads coding-assistant session logs, prices every request, and upserts one
//! row per session into a remote store.
//!
//! ## Usage
//!
//! ```bash
//! # Upload every session not yet synced
//! tokenledger
//!
//! # Print per-session costs without writing anything
//! tokenledger --dry-run
//!
//! # Refresh the remote pricing table from the public dataset
//! tokenledger sync-pricing
//!
//! # Show ledger size and pending sessions
//! tokenledger status
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokenledger_core::{LogGuard, SyncConfig, TokenLedgerError, init_logging};
use tokenledger_cost::{
    CostError, IngestDriver, PricingTable, RestStore, Sink, SyncLedger, discover_sessions,
    load_pricing_table, sync_remote_pricing,
};
use tracing::{error, info};

/// Machine id recorded in dry-run output when none is configured.
const DRY_RUN_MACHINE_ID: &str = "local";

/// Sync coding-assistant session usage to a remote store
#[derive(Parser, Debug)]
#[command(name = "tokenledger")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging (increases log level)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Directory for log files (defaults to ~/.tokenledger/logs/)
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Configuration file (defaults to ~/.tokenledger/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Root of the session log tree (defaults to ~/.claude/projects)
    #[arg(long, global = true)]
    projects_dir: Option<PathBuf>,

    /// Print what would be uploaded; never write the ledger or the store
    #[arg(long)]
    dry_run: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// Upload sessions not yet synced (default)
    Sync,
    /// Refresh the remote pricing table from the public dataset
    SyncPricing,
    /// Show ledger size and pending sessions
    Status,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let _guard = match setup_logging(&cli) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return ExitCode::from(1);
        }
    };

    let result = match load_config(&cli) {
        Ok(config) => match cli.command.unwrap_or(Command::Sync) {
            Command::Sync => run_sync(&config).await,
            Command::SyncPricing => run_sync_pricing(&config).await,
            Command::Status => run_status(&config),
        },
        Err(e) => Err(e.into()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("tokenledger failed: {:#}", e);
            eprintln!("Error: {:#}", e);
            if let Some(guidance) = e
                .downcast_ref::<TokenLedgerError>()
                .and_then(TokenLedgerError::guidance)
            {
                eprintln!("  {}", guidance);
            } else if let Some(cost_error) = e.downcast_ref::<CostError>() {
                eprintln!("  {}", cost_error.friendly_message());
            }
            ExitCode::from(1)
        }
    }
}

/// Set up logging based on CLI arguments.
fn setup_logging(cli: &Cli) -> tokenledger_core::Result<LogGuard> {
    init_logging(cli.log_dir.clone(), cli.verbose > 0)
}

/// Config file and environment, then command-line flags on top.
fn load_config(cli: &Cli) -> tokenledger_core::Result<SyncConfig> {
    let mut config = SyncConfig::load(cli.config.as_deref())?;
    if let Some(dir) = &cli.projects_dir {
        config.projects_dir = Some(dir.clone());
    }
    if cli.dry_run {
        config.dry_run = true;
    }
    Ok(config)
}

async fn run_sync(config: &SyncConfig) -> anyhow::Result<()> {
    let projects_dir = config.projects_dir()?;
    let ledger_path = config.ledger_path()?;

    if config.dry_run {
        // Reading remote pricing is allowed; nothing is written.
        let pricing = match (config.store.url.as_deref(), config.store.key.as_deref()) {
            (Some(url), Some(key)) if config.has_store() => {
                let store = RestStore::new(url, key, config.store.timeout_secs)?;
                load_pricing_table(&store).await
            }
            _ => PricingTable::builtin(),
        };
        let machine_id = config.machine_id.as_deref().unwrap_or(DRY_RUN_MACHINE_ID);

        info!(projects = %projects_dir.display(), "dry run");
        let mut ledger = SyncLedger::load(&ledger_path);
        let mut stdout = std::io::stdout();
        let summary = IngestDriver::new(&projects_dir, machine_id, &pricing, &mut ledger)
            .run(Sink::DryRun(&mut stdout))
            .await?;

        println!();
        println!(
            "Dry run: {} sessions, {} already synced, {} would upload, {} empty, {} failed",
            summary.scanned, summary.skipped_synced, summary.reported, summary.empty, summary.failed
        );
        println!("Estimated cost: ${:.6}", summary.total_cost_usd);
        return Ok(());
    }

    let creds = config.validate_for_upload()?;
    let store = RestStore::new(&creds.store_url, &creds.store_key, config.store.timeout_secs)?;
    let pricing = load_pricing_table(&store).await;

    info!(projects = %projects_dir.display(), machine_id = %creds.machine_id, "starting sync");
    let mut ledger = SyncLedger::load(&ledger_path);
    let summary = IngestDriver::new(&projects_dir, &creds.machine_id, &pricing, &mut ledger)
        .run(Sink::Remote(&store))
        .await?;

    println!(
        "Synced {} sessions (${:.6}); {} already synced, {} empty, {} failed",
        summary.uploaded,
        summary.total_cost_usd,
        summary.skipped_synced,
        summary.empty,
        summary.failed
    );
    if summary.failed > 0 {
        println!("Failed sessions stay pending and are retried on the next run.");
    }
    Ok(())
}

async fn run_sync_pricing(config: &SyncConfig) -> anyhow::Result<()> {
    let creds = config.validate_for_upload()?;
    let store = RestStore::new(&creds.store_url, &creds.store_key, config.store.timeout_secs)?;

    let count = sync_remote_pricing(&config.pricing.dataset_url, config.store.timeout_secs, &store)
        .await
        .with_context(|| format!("syncing pricing from {}", config.pricing.dataset_url))?;

    println!("Upserted {} model pricing rows", count);
    Ok(())
}

fn run_status(config: &SyncConfig) -> anyhow::Result<()> {
    let projects_dir = config.projects_dir()?;
    let ledger = SyncLedger::load(config.ledger_path()?);
    let sessions = discover_sessions(&projects_dir)
        .with_context(|| format!("scanning {}", projects_dir.display()))?;
    let pending = sessions
        .iter()
        .filter(|s| !ledger.is_synced(&s.session_id))
        .count();

    println!("Ledger:   {} ({} sessions)", ledger.path().display(), ledger.len());
    println!("Projects: {}", projects_dir.display());
    println!("Sessions: {} found, {} pending", sessions.len(), pending);
    println!(
        "Store:    {}",
        if config.has_store() { "configured" } else { "not configured" }
    );
    Ok(())
}

//! Reconciliation sweep CLI.
//!
//! Runs one sweep against the configured database and prints a summary.
//! Batch-level failures are logged and reflected in the report but do not
//! fail the process; only an unusable configuration or connection does.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use bazaar_api::{
    config::{init_tracing, load_config},
    db::{establish_connection_from_app_config, run_migrations},
    events::{process_events, EventSender},
    services::reconciliation::{ReconciliationService, SweepMode, SweepOptions},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ModeArg {
    /// Fill snapshots that were never set
    Missing,
    /// Alias of missing
    Scan,
    /// Correct snapshots that diverged from item availability
    Stale,
    /// Rewrite every snapshot unconditionally
    Force,
    /// Reserve every item referenced by a cart, then re-sync snapshots
    ReserveFromCarts,
    /// Release unavailable items no cart references
    ReleaseOrphanItems,
}

impl From<ModeArg> for SweepMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Missing | ModeArg::Scan => SweepMode::Missing,
            ModeArg::Stale => SweepMode::Stale,
            ModeArg::Force => SweepMode::Force,
            ModeArg::ReserveFromCarts => SweepMode::ReserveFromCarts,
            ModeArg::ReleaseOrphanItems => SweepMode::ReleaseOrphanItems,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "bazaar-reconcile", about = "Reconcile cart availability snapshots")]
struct Cli {
    /// Sweep mode
    #[arg(long, value_enum, default_value = "stale")]
    mode: ModeArg,

    /// Report what would change without writing
    #[arg(long)]
    dry: bool,

    /// Entries per batch (defaults to the configured sweep batch size)
    #[arg(long)]
    batch_size: Option<u64>,

    /// Restrict the sweep to one user's cart
    #[arg(long)]
    user_id: Option<String>,

    /// Print the full report as JSON instead of a summary line
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config().context("Failed to load configuration")?;
    init_tracing(&config.log_level, config.log_json);

    let db = Arc::new(
        establish_connection_from_app_config(&config)
            .await
            .context("Failed to connect to the database")?,
    );

    if config.auto_migrate {
        run_migrations(&db)
            .await
            .context("Failed to run database migrations")?;
    }

    let (tx, rx) = mpsc::channel(256);
    let event_sender = EventSender::new(tx);
    let event_worker = tokio::spawn(process_events(rx));

    let service = ReconciliationService::new(db, event_sender);
    let options = SweepOptions {
        mode: cli.mode.into(),
        dry_run: cli.dry,
        batch_size: cli.batch_size.unwrap_or(config.sweep_batch_size),
        user_id: cli.user_id,
    };

    info!(mode = options.mode.as_str(), dry_run = options.dry_run, "Starting sweep");
    let report = service.run(options).await.context("Sweep failed")?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "mode={} dry_run={} scanned={} updated={} skipped={} reserved={} already_reserved={} missing_items={} released={} failed={} failed_batches={}",
            report.mode,
            report.dry_run,
            report.scanned,
            report.updated,
            report.skipped,
            report.reserved,
            report.already_reserved,
            report.missing_items,
            report.released,
            report.failed,
            report.failed_batches,
        );
    }

    event_worker.abort();
    Ok(())
}

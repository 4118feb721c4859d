//! SkyMerge Reconciler
//!
//! Finds targets that describe the same object and merges them:
//! 1. Lists the selected targets and cone-searches around each
//! 2. Picks the earliest-created member of every group as primary
//! 3. Merges attributes and moves data, aliases and memberships in one transaction per group
//! 4. Optionally deletes the absorbed shells after a typed confirmation
//! 5. Prints a `primary <- absorbed` summary, and writes it as JSON on request,
//!    also when the pass stops early

mod confirm;
mod errors;
mod policy;
mod registry;
mod report;
mod scanner;
mod transfer;

use clap::Parser;
use scanner::{DuplicateScanner, ScanOptions};
use skymerge_common::config::{AppConfig, ObservabilityConfig};
use skymerge_common::db::{DbPool, TargetFilter};
use skymerge_common::metrics::register_metrics;
use skymerge_common::{Angle, SeaOrmStore, TargetStore, VERSION};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use transfer::ProvenanceRules;

#[derive(Parser, Debug)]
#[command(name = "reconcile")]
#[command(about = "Merge duplicate targets in the catalog")]
#[command(version)]
struct Args {
    /// Name substring selecting the targets to scan, or `all`
    target: String,

    /// Match radius in arcseconds (defaults to matching.default_radius_arcsec)
    #[arg(long)]
    radius: Option<f64>,

    /// Delete absorbed targets after merging (asks for confirmation)
    #[arg(long)]
    delete_duplicates: bool,

    /// Delete time-series points that conflict on transfer instead of failing the group
    #[arg(long)]
    remove_invalid_data: bool,

    /// Plan and report the merges without writing anything
    #[arg(long)]
    dry_run: bool,

    /// Configuration file; otherwise config/ and APP__ variables are used
    #[arg(long, env = "SKYMERGE_CONFIG")]
    config: Option<String>,

    /// Also write the report as JSON
    #[arg(long)]
    report: Option<PathBuf>,
}

fn init_tracing(observability: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&observability.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    if observability.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let mut config = match args.config {
        Some(ref path) => AppConfig::from_file(path)?,
        None => AppConfig::load()?,
    };
    if let Some(radius) = args.radius {
        config.matching.default_radius_arcsec = radius;
    }
    config.validate()?;

    init_tracing(&config.observability);
    register_metrics();

    info!("Starting SkyMerge Reconciler v{}", VERSION);

    let mut options = ScanOptions::new(Angle::from_arcsec(config.matching.default_radius_arcsec));
    options.coordinate_decimals = config.matching.coordinate_decimals;
    options.excluded = config.excluded_targets();
    options.remove_invalid_data = args.remove_invalid_data;
    options.dry_run = args.dry_run;
    options.delete_duplicates = args.delete_duplicates;

    if args.delete_duplicates && !args.dry_run {
        let stdin = std::io::stdin();
        let confirmed =
            confirm::confirm_deletion(&mut stdin.lock(), &mut std::io::stdout(), &args.target)?;
        if !confirmed {
            warn!("Deletion not confirmed; running as a dry run");
            options.dry_run = true;
        }
    }

    if options.remove_invalid_data && !options.dry_run {
        warn!("Conflicting time-series points will be deleted during transfer");
    }

    let db = DbPool::new(&config.database).await?;
    db.run_migrations().await?;

    let store = SeaOrmStore::new(db);
    store.ping().await?;

    let rules = ProvenanceRules::new(&config.reconcile.provenance);
    let scanner = DuplicateScanner::new(Arc::new(store), rules, options);

    let cancel = scanner.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; finishing the current group");
            cancel.store(true, Ordering::SeqCst);
        }
    });

    let (report, failure) = match scanner.run(&TargetFilter::parse(&args.target)).await {
        Ok(report) => (report, None),
        Err(aborted) => (*aborted.report, Some(aborted.source)),
    };

    print!("{}", report.render_text());
    if let Some(ref path) = args.report {
        report.write_json(path)?;
        info!(path = %path.display(), "Report written");
    }

    if let Some(err) = failure {
        return Err(anyhow::Error::new(err).context("Reconciliation pass aborted"));
    }

    info!("Reconciler finished");
    Ok(())
}

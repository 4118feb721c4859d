//! SkyMerge Ingestion
//!
//! Resolves a batch of survey candidates against the target catalog:
//! 1. Loads candidates from a JSON file
//! 2. Validates each candidate
//! 3. Matches it by name, alias or position, creating targets and aliases
//! 4. Prints a JSON summary of the outcomes

mod errors;
mod processor;
mod resolver;

use clap::Parser;
use processor::IngestionProcessor;
use resolver::IdentityResolver;
use skymerge_common::config::{AppConfig, ObservabilityConfig};
use skymerge_common::db::DbPool;
use skymerge_common::metrics::register_metrics;
use skymerge_common::{Angle, SeaOrmStore, TargetStore, VERSION};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ingest")]
#[command(about = "Resolve survey candidates against the target catalog")]
#[command(version)]
struct Args {
    /// JSON array of {name, ra, dec} candidates
    #[arg(long)]
    candidates: PathBuf,

    /// Match radius in arcseconds (defaults to matching.default_radius_arcsec)
    #[arg(long)]
    radius: Option<f64>,

    /// Configuration file; otherwise config/ and APP__ variables are used
    #[arg(long, env = "SKYMERGE_CONFIG")]
    config: Option<String>,
}

fn init_tracing(observability: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&observability.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
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

    info!("Starting SkyMerge Ingestion v{}", VERSION);

    let candidates = IngestionProcessor::load_candidates(&args.candidates)?;
    info!(count = candidates.len(), path = %args.candidates.display(), "Candidates loaded");

    let db = DbPool::new(&config.database).await?;
    db.run_migrations().await?;

    let store = SeaOrmStore::new(db);
    store.ping().await?;

    let radius = Angle::from_arcsec(config.matching.default_radius_arcsec);
    let resolver = IdentityResolver::new(Arc::new(store), radius);
    let processor = IngestionProcessor::new(resolver);

    let summary = processor.process_batch(candidates).await?;

    println!("{}", serde_json::to_string_pretty(&summary)?);

    info!("Ingestion finished");
    Ok(())
}

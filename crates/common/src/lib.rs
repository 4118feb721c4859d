//! SkyMerge Common Library
//!
//! Shared code for the SkyMerge batch jobs including:
//! - Sky geometry and cone searches
//! - Database models, the target store seam and its implementations
//! - Error types and handling
//! - Configuration management
//! - Metrics

pub mod config;
pub mod db;
pub mod errors;
pub mod metrics;
pub mod sky;

// Re-export commonly used types
pub use config::AppConfig;
pub use db::{InMemoryStore, MergeTransaction, SeaOrmStore, TargetStore};
pub use errors::{AppError, Result};
pub use sky::{Angle, SkyPosition};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Match radius used when the configuration sets none
pub const DEFAULT_MATCH_RADIUS_ARCSEC: f64 = 2.0;

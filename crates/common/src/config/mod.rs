//! Configuration management for SkyMerge jobs
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default.toml, config/{APP_ENV}.toml, config/local.toml)
//! - Default values

use crate::errors::{AppError, Result};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Database configuration
    pub database: DatabaseConfig,

    /// Identity matching configuration
    #[serde(default)]
    pub matching: MatchingConfig,

    /// Duplicate reconciliation configuration
    #[serde(default)]
    pub reconcile: ReconcileConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL (for writes)
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MatchingConfig {
    /// Cone-search radius used when the caller gives none
    #[serde(default = "default_radius_arcsec")]
    pub default_radius_arcsec: f64,

    /// Decimal places scan positions are rounded to before the cone search
    #[serde(default = "default_coordinate_decimals")]
    pub coordinate_decimals: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReconcileConfig {
    /// Display names held back for manual review; never scanned or absorbed
    #[serde(default)]
    pub excluded_targets: Vec<String>,

    /// Known time-series provenances
    #[serde(default)]
    pub provenance: ProvenanceConfig,
}

/// Allow-lists of time-series source labels, one per transfer category.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProvenanceConfig {
    /// Surveys whose own pipeline produced the object; data always moves
    #[serde(default = "default_unique_per_object")]
    pub unique_per_object: Vec<String>,

    /// Catalogs queried by sky position; nearby entities get identical output
    #[serde(default = "default_coordinate_query")]
    pub coordinate_query: Vec<String>,

    /// Labels generated at a local facility; relabelled on transfer
    #[serde(default = "default_site_specific")]
    pub site_specific: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_max_connections() -> u32 { 10 }
fn default_min_connections() -> u32 { 1 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_radius_arcsec() -> f64 { crate::DEFAULT_MATCH_RADIUS_ARCSEC }
fn default_coordinate_decimals() -> u32 { 6 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { false }
fn default_service_name() -> String { "skymerge".to_string() }

fn labels(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn default_unique_per_object() -> Vec<String> {
    labels(&["OGLE", "MOA", "KMTNet", "Gaia", "OMEGA", "ASAS-SN", "Swift"])
}

fn default_coordinate_query() -> Vec<String> {
    labels(&[
        "ZTF",
        "ZTFDR3",
        "IRSA",
        "ATLAS",
        "Gaia_DR3",
        "GSC_query_results",
        "AOFT_table",
        "Interferometry_predictor",
        "2MASS",
        "VPHAS+",
        "DECaPS",
    ])
}

fn default_site_specific() -> Vec<String> {
    labels(&["LCO", "MOP", "ESO"])
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            default_radius_arcsec: default_radius_arcsec(),
            coordinate_decimals: default_coordinate_decimals(),
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            excluded_targets: Vec::new(),
            provenance: ProvenanceConfig::default(),
        }
    }
}

impl Default for ProvenanceConfig {
    fn default() -> Self {
        Self {
            unique_per_object: default_unique_per_object(),
            coordinate_query: default_coordinate_query(),
            site_specific: default_site_specific(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            service_name: default_service_name(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with defaults
            .set_default("database.url", "postgres://localhost/skymerge")?

            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__MATCHING__DEFAULT_RADIUS_ARCSEC=3.0
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> std::result::Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }

    /// Reject configurations the matching and merge logic cannot run with
    pub fn validate(&self) -> Result<()> {
        let radius = self.matching.default_radius_arcsec;
        if !radius.is_finite() || radius <= 0.0 {
            return Err(AppError::Configuration {
                message: format!("matching.default_radius_arcsec must be positive, got {}", radius),
            });
        }

        self.reconcile.provenance.validate()
    }

    /// Get connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.database.connect_timeout_secs)
    }

    /// Get the read database URL (falls back to primary)
    pub fn read_database_url(&self) -> &str {
        self.database.read_url.as_deref().unwrap_or(&self.database.url)
    }

    /// Exclusion list as a set for lookups
    pub fn excluded_targets(&self) -> HashSet<String> {
        self.reconcile.excluded_targets.iter().cloned().collect()
    }
}

impl ProvenanceConfig {
    fn validate(&self) -> Result<()> {
        let lists = [
            ("unique_per_object", &self.unique_per_object),
            ("coordinate_query", &self.coordinate_query),
            ("site_specific", &self.site_specific),
        ];

        let mut seen: HashSet<&str> = HashSet::new();
        for (list_name, list) in lists {
            if list.is_empty() {
                return Err(AppError::Configuration {
                    message: format!("reconcile.provenance.{} must not be empty", list_name),
                });
            }
            for label in list {
                if !seen.insert(label.as_str()) {
                    return Err(AppError::Configuration {
                        message: format!("provenance label '{}' listed in more than one category", label),
                    });
                }
            }
        }

        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgres://localhost/skymerge".to_string(),
                read_url: None,
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout(),
                idle_timeout_secs: default_idle_timeout(),
            },
            matching: MatchingConfig::default(),
            reconcile: ReconcileConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

//! Database layer for SkyMerge
//!
//! Provides:
//! - SeaORM entity models for targets and their dependent records
//! - The `TargetStore` / `MergeTransaction` seam
//! - Postgres and in-memory implementations of that seam
//! - Connection pool management and migrations

mod memory;
pub mod models;
mod repository;
mod store;

pub use memory::InMemoryStore;
pub use repository::{SeaOrmMergeTransaction, SeaOrmStore};
pub use store::{creation_order, MergeTransaction, TargetFilter, TargetSnapshot, TargetStore};

use crate::config::DatabaseConfig;
use crate::errors::{AppError, Result};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::time::Duration;
use tracing::info;

/// Primary and optional replica connections
#[derive(Clone)]
pub struct DbPool {
    /// Primary connection (merge transactions, inserts, deletes)
    pub primary: DatabaseConnection,

    /// Read replica connection (optional)
    pub replica: Option<DatabaseConnection>,
}

impl DbPool {
    /// Connect to the primary and, if configured, the read replica
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let primary = connect(config, &config.url, "primary").await?;

        let replica = match config.read_url {
            Some(ref read_url) => Some(connect(config, read_url, "replica").await?),
            None => None,
        };

        info!(replica = replica.is_some(), "Database connections established");

        Ok(Self { primary, replica })
    }

    /// Get the connection for reads (replica if available, otherwise primary)
    pub fn read(&self) -> &DatabaseConnection {
        self.replica.as_ref().unwrap_or(&self.primary)
    }
    
    /// Get the connection for writes (always primary)
    pub fn write(&self) -> &DatabaseConnection {
        &self.primary
    }
    
    /// Apply pending schema migrations on the primary
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Applying database migrations...");

        sqlx::migrate!()
            .run(self.primary.get_postgres_connection_pool())
            .await?;

        info!("Database schema up to date");
        Ok(())
    }

    /// Ping the database to check connectivity
    pub async fn ping(&self) -> Result<()> {
        use sea_orm::ConnectionTrait;
        
        self.primary
            .execute_unprepared("SELECT 1")
            .await
            .map_err(|e| AppError::DatabaseConnection {
                message: format!("Primary ping failed: {}", e),
            })?;
        
        if let Some(ref replica) = self.replica {
            replica
                .execute_unprepared("SELECT 1")
                .await
                .map_err(|e| AppError::DatabaseConnection {
                    message: format!("Replica ping failed: {}", e),
                })?;
        }
        
        Ok(())
    }
}

async fn connect(config: &DatabaseConfig, url: &str, role: &str) -> Result<DatabaseConnection> {
    info!(role, "Connecting to database...");

    let mut opts = ConnectOptions::new(url);
    opts.max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
        .sqlx_logging(false);

    Database::connect(opts)
        .await
        .map_err(|e| AppError::DatabaseConnection {
            message: format!("Failed to connect to {}: {}", role, e),
        })
}

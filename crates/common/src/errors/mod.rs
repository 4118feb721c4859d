//! Error types for SkyMerge services
//!
//! Provides a single error enum shared by the ingestion and reconciliation jobs with:
//! - Distinct variants for each failure mode of identity resolution and merging
//! - Stable machine-readable error codes for reports
//! - Classification of which failures are confined to one merge group

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    MalformedPosition,

    // Resource errors (4xxx)
    NotFound,

    // Conflict errors (5xxx)
    Conflict,
    PersistenceConflict,
    TargetLocked,

    // Data provenance errors (6xxx)
    UnknownProvenance,

    // Database errors (7xxx)
    DatabaseError,
    ConnectionError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            // Validation (1xxx)
            ErrorCode::MalformedPosition => 1002,

            // Resources (4xxx)
            ErrorCode::NotFound => 4001,

            // Conflicts (5xxx)
            ErrorCode::Conflict => 5001,
            ErrorCode::PersistenceConflict => 5002,
            ErrorCode::TargetLocked => 5003,

            // Provenance (6xxx)
            ErrorCode::UnknownProvenance => 6001,

            // Database (7xxx)
            ErrorCode::DatabaseError => 7001,
            ErrorCode::ConnectionError => 7002,

            // Internal (9xxx)
            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Malformed position for {target}: ra={ra}, dec={dec}")]
    MalformedPosition { target: String, ra: f64, dec: f64 },

    // Resource errors
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound { resource_type: String, id: String },

    // Conflict errors
    #[error("Duplicate resource: {message}")]
    Duplicate { message: String },

    #[error("Persistence conflict on {entity} {id}: {message}")]
    PersistenceConflict {
        entity: String,
        id: Uuid,
        message: String,
    },

    #[error("Target {target} is locked by another process")]
    TargetLocked { target: String },

    // Provenance errors
    #[error("Unknown provenance '{source_name}' on datum {datum_id} of target {target}")]
    UnknownProvenance {
        target: String,
        datum_id: Uuid,
        source_name: String,
    },

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::MalformedPosition { .. } => ErrorCode::MalformedPosition,
            AppError::NotFound { .. } => ErrorCode::NotFound,
            AppError::Duplicate { .. } => ErrorCode::Conflict,
            AppError::PersistenceConflict { .. } => ErrorCode::PersistenceConflict,
            AppError::TargetLocked { .. } => ErrorCode::TargetLocked,
            AppError::UnknownProvenance { .. } => ErrorCode::UnknownProvenance,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::Migration(_) => ErrorCode::DatabaseError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Whether this failure is confined to a single merge group.
    ///
    /// Group-scoped failures are logged and listed in the pass report while the
    /// scan continues; anything else ends the run.
    pub fn is_group_scoped(&self) -> bool {
        match self {
            AppError::UnknownProvenance { .. }
            | AppError::PersistenceConflict { .. }
            | AppError::TargetLocked { .. }
            | AppError::MalformedPosition { .. }
            | AppError::Duplicate { .. }
            | AppError::NotFound { .. } => true,
            // A statement-level failure rolls back the group's transaction but
            // leaves the connection usable.
            AppError::Database(err) => err.sql_err().is_some(),
            _ => false,
        }
    }

    /// Build a persistence conflict from a database error, if it is one.
    ///
    /// Unique and foreign-key violations are conflicts; everything else is
    /// returned unchanged as a database error.
    pub fn from_write(entity: &str, id: Uuid, err: sea_orm::DbErr) -> Self {
        use sea_orm::SqlErr;

        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(message))
            | Some(SqlErr::ForeignKeyConstraintViolation(message)) => {
                AppError::PersistenceConflict {
                    entity: entity.to_string(),
                    id,
                    message,
                }
            }
            _ => AppError::Database(err),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

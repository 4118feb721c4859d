//! Ingestion error types

use skymerge_common::errors::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("Cannot read candidate file {path}: {message}")]
    CandidateFile { path: String, message: String },

    #[error("Candidate file is not a JSON array of {{name, ra, dec}}: {0}")]
    CandidateFormat(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] AppError),
}

impl IngestionError {
    /// Whether the batch can continue past this failure
    pub fn is_candidate_scoped(&self) -> bool {
        match self {
            IngestionError::Store(err) => err.is_group_scoped(),
            _ => false,
        }
    }
}

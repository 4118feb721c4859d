//! Reconciler error types

use crate::report::ReconciliationReport;
use skymerge_common::errors::AppError;
use thiserror::Error;

/// A pass stopped by a failure outside any single group.
///
/// Groups committed before the failure stay committed; `report` lists them.
#[derive(Error, Debug)]
#[error("Reconciliation pass aborted: {source}")]
pub struct PassAborted {
    pub report: Box<ReconciliationReport>,
    #[source]
    pub source: AppError,
}

//! Ingestion processor
//!
//! Validates survey candidates and runs each through identity resolution.
//! A bad or conflicting candidate is logged and counted; it never stops the
//! rest of the batch.

use crate::errors::IngestionError;
use crate::resolver::{IdentityResolver, ResolveOutcome};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{error, info, instrument, warn};
use validator::Validate;

/// One `(name, ra, dec)` report from a survey feed
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Candidate {
    #[validate(length(min = 1, max = 200))]
    pub name: String,

    #[validate(range(min = 0.0, max = 360.0))]
    pub ra: f64,

    #[validate(range(min = -90.0, max = 90.0))]
    pub dec: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutcomeCounts {
    pub new_target: usize,
    pub existing_exact_name: usize,
    pub existing_alias: usize,
    pub existing_new_alias: usize,
}

impl OutcomeCounts {
    fn record(&mut self, outcome: ResolveOutcome) {
        match outcome {
            ResolveOutcome::NewTarget => self.new_target += 1,
            ResolveOutcome::ExistingExactName => self.existing_exact_name += 1,
            ResolveOutcome::ExistingAlias => self.existing_alias += 1,
            ResolveOutcome::ExistingNewAlias => self.existing_new_alias += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.new_target + self.existing_exact_name + self.existing_alias + self.existing_new_alias
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedCandidate {
    pub name: String,
    pub reason: String,
}

/// Result of one ingestion batch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestionSummary {
    pub outcomes: OutcomeCounts,

    /// New targets awaiting catalog cross-match
    pub queued_for_crossmatch: Vec<String>,

    /// Candidates that failed validation
    pub rejected: Vec<RejectedCandidate>,

    /// Valid candidates the catalog refused, e.g. a concurrent insert of the same name
    pub failed: Vec<RejectedCandidate>,
}

/// Ingestion processor
pub struct IngestionProcessor {
    resolver: IdentityResolver,
}

impl IngestionProcessor {
    pub fn new(resolver: IdentityResolver) -> Self {
        Self { resolver }
    }

    /// Read a JSON array of candidates
    pub fn load_candidates(path: &Path) -> Result<Vec<Candidate>, IngestionError> {
        let raw = std::fs::read_to_string(path).map_err(|e| IngestionError::CandidateFile {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

        Ok(serde_json::from_str(&raw)?)
    }

    /// Resolve every candidate in order
    #[instrument(skip(self, candidates), fields(count = candidates.len()))]
    pub async fn process_batch(
        &self,
        candidates: Vec<Candidate>,
    ) -> Result<IngestionSummary, IngestionError> {
        info!("Processing candidate batch");

        let mut summary = IngestionSummary::default();

        for candidate in candidates {
            let name = candidate.name.trim().to_string();

            if let Err(e) = candidate.validate() {
                warn!(candidate = %candidate.name, error = %e, "Rejecting invalid candidate");
                summary.rejected.push(RejectedCandidate {
                    name: candidate.name.clone(),
                    reason: e.to_string(),
                });
                continue;
            }

            if name.is_empty() {
                warn!("Rejecting candidate with blank name");
                summary.rejected.push(RejectedCandidate {
                    name: candidate.name.clone(),
                    reason: "name is blank".to_string(),
                });
                continue;
            }

            match self.resolver.resolve(&name, candidate.ra, candidate.dec).await {
                Ok(resolution) => {
                    summary.outcomes.record(resolution.outcome);
                    if resolution.outcome == ResolveOutcome::NewTarget {
                        summary.queued_for_crossmatch.push(resolution.target.name);
                    }
                }
                Err(e) => {
                    let err = IngestionError::from(e);
                    if !err.is_candidate_scoped() {
                        return Err(err);
                    }
                    error!(candidate = %name, error = %err, "Candidate could not be resolved");
                    summary.failed.push(RejectedCandidate {
                        name,
                        reason: err.to_string(),
                    });
                }
            }
        }

        info!(
            resolved = summary.outcomes.total(),
            new_targets = summary.outcomes.new_target,
            rejected = summary.rejected.len(),
            failed = summary.failed.len(),
            "Candidate batch complete"
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skymerge_common::{Angle, InMemoryStore, TargetStore};
    use std::sync::Arc;

    fn candidate(name: &str, ra: f64, dec: f64) -> Candidate {
        Candidate {
            name: name.to_string(),
            ra,
            dec,
        }
    }

    fn processor(store: &InMemoryStore) -> IngestionProcessor {
        let resolver = IdentityResolver::new(Arc::new(store.clone()), Angle::from_arcsec(2.0));
        IngestionProcessor::new(resolver)
    }

    #[tokio::test]
    async fn test_batch_counts_each_outcome() {
        let store = InMemoryStore::new();
        let batch = vec![
            candidate("OGLE-2023-BLG-0363", 270.771375, -29.738278),
            candidate("MOA-2023-BLG-123", 270.771375, -29.738278),
            candidate("OGLE-2023-BLG-0363", 270.771375, -29.738278),
            candidate("MOA-2023-BLG-123", 270.771375, -29.738278),
            candidate("Gaia23aiy", 120.0, 10.0),
        ];

        let summary = processor(&store).process_batch(batch).await.unwrap();

        assert_eq!(summary.outcomes.new_target, 2);
        assert_eq!(summary.outcomes.existing_new_alias, 1);
        assert_eq!(summary.outcomes.existing_exact_name, 1);
        assert_eq!(summary.outcomes.existing_alias, 1);
        assert_eq!(summary.queued_for_crossmatch, vec!["OGLE-2023-BLG-0363", "Gaia23aiy"]);
        assert_eq!(store.list_targets(&skymerge_common::db::TargetFilter::All).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_candidates_do_not_abort() {
        let store = InMemoryStore::new();
        let batch = vec![
            candidate("", 10.0, 10.0),
            candidate("   ", 10.0, 10.0),
            candidate("bad-dec", 10.0, -95.0),
            candidate("bad-ra", 361.0, 0.0),
            candidate("ok", 10.0, 10.0),
        ];

        let summary = processor(&store).process_batch(batch).await.unwrap();

        assert_eq!(summary.rejected.len(), 4);
        assert_eq!(summary.outcomes.total(), 1);
        assert!(summary.failed.is_empty());
    }

    #[test]
    fn test_candidate_file_parse() {
        let path = std::env::temp_dir().join(format!("skymerge-candidates-{}.json", std::process::id()));
        std::fs::write(
            &path,
            r#"[{"name": "KMT-2023-BLG-0501", "ra": 268.5057, "dec": -28.44886}]"#,
        )
        .unwrap();

        let candidates = IngestionProcessor::load_candidates(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].name, "KMT-2023-BLG-0501");
    }

    #[test]
    fn test_missing_candidate_file() {
        let err = tokio_test::assert_err!(IngestionProcessor::load_candidates(Path::new(
            "/nonexistent/candidates.json"
        )));
        assert!(matches!(err, IngestionError::CandidateFile { .. }));
    }
}

//! Identity resolution for incoming survey candidates
//!
//! A candidate `(name, ra, dec)` is checked against the catalog three ways:
//! by display name, by alias, and by position. The first two are exact
//! lookups; the third is a cone search with the configured match radius.

use serde::{Deserialize, Serialize};
use skymerge_common::db::models::Target;
use skymerge_common::errors::Result;
use skymerge_common::metrics::record_resolution;
use skymerge_common::{Angle, SkyPosition, TargetStore};
use std::fmt;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// How a candidate was matched to the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveOutcome {
    /// Nothing matched; a target was created
    NewTarget,
    /// A target already has this display name
    ExistingExactName,
    /// A target already carries this name as an alias
    ExistingAlias,
    /// A target sits at this position; the name was added as its alias
    ExistingNewAlias,
}

impl ResolveOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolveOutcome::NewTarget => "new_target",
            ResolveOutcome::ExistingExactName => "existing_exact_name",
            ResolveOutcome::ExistingAlias => "existing_alias",
            ResolveOutcome::ExistingNewAlias => "existing_new_alias",
        }
    }
}

impl fmt::Display for ResolveOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub target: Target,
    pub outcome: ResolveOutcome,
}

/// Ingestion-time identity check
#[derive(Clone)]
pub struct IdentityResolver {
    store: Arc<dyn TargetStore>,
    radius: Angle,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn TargetStore>, radius: Angle) -> Self {
        Self { store, radius }
    }

    /// Resolve a candidate with the configured match radius
    pub async fn resolve(&self, name: &str, ra: f64, dec: f64) -> Result<Resolution> {
        self.resolve_within(name, ra, dec, self.radius).await
    }

    /// Resolve a candidate, creating a target or alias when needed.
    ///
    /// A display-name match wins over everything else. An alias match comes
    /// next. Only a candidate unknown by name is matched by position, and
    /// then the earliest-created target in the cone receives the name as an
    /// alias.
    #[instrument(skip(self), fields(radius_arcsec = radius.arcsec()))]
    pub async fn resolve_within(
        &self,
        name: &str,
        ra: f64,
        dec: f64,
        radius: Angle,
    ) -> Result<Resolution> {
        let position = SkyPosition::named(name, ra, dec)?;

        let by_name = self.store.find_by_name(name).await?;
        let by_alias = self.store.find_by_alias(name).await?;
        let nearby = self.store.cone_search(&position, radius).await?;

        let resolution = match (by_name, by_alias) {
            (Some(target), _) => {
                let others: Vec<&str> = nearby
                    .iter()
                    .filter(|t| t.id != target.id)
                    .map(|t| t.name.as_str())
                    .collect();
                if !others.is_empty() {
                    warn!(
                        candidate = name,
                        nearby = ?others,
                        "Name matches an existing target but other targets share the position"
                    );
                }
                Resolution {
                    target,
                    outcome: ResolveOutcome::ExistingExactName,
                }
            }
            (None, Some(target)) => Resolution {
                target,
                outcome: ResolveOutcome::ExistingAlias,
            },
            (None, None) => match nearby.first() {
                None => {
                    let created_at = chrono::Utc::now().into();
                    let target = self
                        .store
                        .create_target(Target::new(name, position, created_at))
                        .await?;
                    Resolution {
                        target,
                        outcome: ResolveOutcome::NewTarget,
                    }
                }
                Some(first) => {
                    if nearby.len() > 1 {
                        let candidates: Vec<&str> =
                            nearby.iter().map(|t| t.name.as_str()).collect();
                        warn!(
                            candidate = name,
                            chosen = %first.name,
                            candidates = ?candidates,
                            "Several targets within match radius; using the earliest"
                        );
                    }
                    self.store.create_alias(first.id, name).await?;
                    Resolution {
                        target: first.clone(),
                        outcome: ResolveOutcome::ExistingNewAlias,
                    }
                }
            },
        };

        record_resolution(resolution.outcome.as_str());
        info!(
            candidate = name,
            target = %resolution.target.name,
            target_id = %resolution.target.id,
            outcome = %resolution.outcome,
            "Candidate resolved"
        );

        Ok(resolution)
    }
}

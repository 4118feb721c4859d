//! Storage seam for identity resolution and merging
//!
//! The resolver and the reconciler only talk to the catalog through these
//! traits, so the merge logic runs unchanged against Postgres or the
//! in-memory store used by the tests.

use crate::db::models::*;
use crate::errors::Result;
use crate::sky::{cone_filter, Angle, SkyPosition};
use async_trait::async_trait;
use std::collections::BTreeSet;
use uuid::Uuid;

/// Selects which active targets a scan visits
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetFilter {
    All,
    NameContains(String),
}

impl TargetFilter {
    /// Parse a command-line selector: the literal `all`, or a name substring
    pub fn parse(selector: &str) -> Self {
        if selector.eq_ignore_ascii_case("all") {
            TargetFilter::All
        } else {
            TargetFilter::NameContains(selector.to_string())
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            TargetFilter::All => true,
            TargetFilter::NameContains(part) => name.contains(part.as_str()),
        }
    }
}

/// A target together with every record it owns
#[derive(Debug, Clone)]
pub struct TargetSnapshot {
    pub target: Target,
    pub aliases: Vec<TargetName>,
    pub datums: Vec<ReducedDatum>,
    pub data_products: Vec<DataProduct>,
    pub observations: Vec<ObservationRecord>,
    pub comments: Vec<Comment>,
    pub group_ids: Vec<Uuid>,
}

impl TargetSnapshot {
    pub fn empty(target: Target) -> Self {
        Self {
            target,
            aliases: Vec::new(),
            datums: Vec::new(),
            data_products: Vec::new(),
            observations: Vec::new(),
            comments: Vec::new(),
            group_ids: Vec::new(),
        }
    }

    /// Distinct source labels across this target's time series
    pub fn source_labels(&self) -> BTreeSet<String> {
        self.datums.iter().map(|d| d.source_name.clone()).collect()
    }

    /// Number of dependent records of any kind
    pub fn dependent_count(&self) -> usize {
        self.aliases.len()
            + self.datums.len()
            + self.data_products.len()
            + self.observations.len()
            + self.comments.len()
    }
}

/// Read and create access to the target catalog.
///
/// Absorbed shells (`merged_into` set) are invisible to name lookups, cone
/// searches and listings. Listings and cone searches return targets in
/// creation order, ties broken by id.
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// Active target with this display name
    async fn find_by_name(&self, name: &str) -> Result<Option<Target>>;

    /// Target owning this alias
    async fn find_by_alias(&self, alias: &str) -> Result<Option<Target>>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Target>>;

    /// Active targets within `radius` of `center`
    async fn cone_search(&self, center: &SkyPosition, radius: Angle) -> Result<Vec<Target>>;

    async fn create_target(&self, target: Target) -> Result<Target>;

    async fn create_alias(&self, target_id: Uuid, name: &str) -> Result<TargetName>;

    async fn list_targets(&self, filter: &TargetFilter) -> Result<Vec<Target>>;

    async fn load_snapshot(&self, target: &Target) -> Result<TargetSnapshot>;

    /// Open the transaction one merge group runs in
    async fn begin_merge(&self) -> Result<Box<dyn MergeTransaction>>;

    async fn ping(&self) -> Result<()>;
}

/// Mutations of a single merge group.
///
/// Nothing is visible to other readers until `commit`. Dropping the
/// transaction without committing discards every change.
#[async_trait]
pub trait MergeTransaction: Send {
    /// Lock the given targets for update, skipping rows another process holds.
    ///
    /// Fails with `TargetLocked` unless every requested target was locked and
    /// is still active.
    async fn lock_targets(&mut self, ids: &[Uuid]) -> Result<Vec<Target>>;

    /// Read a target and everything it owns as this transaction sees it
    async fn load_snapshot(&mut self, target: &Target) -> Result<TargetSnapshot>;

    /// Write the `MERGED_COLUMNS` of `merged`; every other column keeps its stored value
    async fn update_merged_columns(&mut self, merged: &Target) -> Result<()>;

    async fn reassign_data_product(&mut self, product_id: Uuid, to: Uuid) -> Result<()>;

    /// Persist a datum's owner, source label and payload.
    ///
    /// Runs in its own savepoint; a uniqueness violation is returned as
    /// `PersistenceConflict` and leaves the rest of the transaction intact.
    async fn reassign_datum(&mut self, datum: &ReducedDatum) -> Result<()>;

    async fn delete_datum(&mut self, datum_id: Uuid) -> Result<()>;

    async fn reassign_observation(&mut self, observation_id: Uuid, to: Uuid) -> Result<()>;

    async fn reassign_comment(&mut self, comment_id: Uuid, to: Uuid) -> Result<()>;

    /// Add a membership; returns false when it already existed
    async fn add_group_member(&mut self, group_id: Uuid, target_id: Uuid) -> Result<bool>;

    async fn find_alias(&mut self, name: &str) -> Result<Option<TargetName>>;

    async fn insert_alias(&mut self, target_id: Uuid, name: &str) -> Result<TargetName>;

    async fn repoint_alias(&mut self, alias_id: Uuid, to: Uuid) -> Result<()>;

    /// Turn `id` into an inert shell pointing at `into`
    async fn mark_absorbed(&mut self, id: Uuid, into: Uuid) -> Result<()>;

    /// Delete a target row and everything still attached to it
    async fn delete_target(&mut self, id: Uuid) -> Result<bool>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Sort targets into store order
pub fn creation_order(targets: &mut [Target]) {
    targets.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
}

/// Keep the targets inside the cone, dropping rows whose stored position is malformed
pub(crate) fn within_cone(center: &SkyPosition, radius: Angle, targets: Vec<Target>) -> Vec<Target> {
    let located = targets
        .into_iter()
        .filter_map(|t| t.position().ok().map(|p| (t, p)));

    cone_filter(center, radius, located, |(_, p)| *p)
        .into_iter()
        .map(|(t, _)| t)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_parse() {
        assert_eq!(TargetFilter::parse("all"), TargetFilter::All);
        assert_eq!(TargetFilter::parse("ALL"), TargetFilter::All);

        let filter = TargetFilter::parse("BLG");
        assert!(filter.matches("OGLE-2023-BLG-0363"));
        assert!(!filter.matches("Gaia21ccu"));
    }
}

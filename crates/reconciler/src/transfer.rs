//! Ownership transfer from absorbed targets to the primary
//!
//! Planning is pure: `plan_transfer` checks provenance and decides, record
//! by record, what moves and how. `save_merge_group` locks the group, plans
//! from the rows as the transaction sees them and applies the plan in the
//! same transaction, so a group is merged completely or not at all.

use crate::registry::{merge_attributes, FieldChange};
use serde::{Deserialize, Serialize};
use skymerge_common::config::ProvenanceConfig;
use skymerge_common::db::models::{ReducedDatum, Target};
use skymerge_common::db::{MergeTransaction, TargetSnapshot};
use skymerge_common::errors::{AppError, Result};
use skymerge_common::metrics::{record_datums, record_deleted};
use skymerge_common::TargetStore;
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// How time-series points from one provenance are handled on transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvenanceClass {
    /// Produced by the survey's own pipeline for this object; always moves
    UniquePerObject,
    /// Queried from a catalog by position; moves only if the primary lacks it
    CoordinateQuery,
    /// Generated locally; moves under a label suffixed with the absorbed name
    SiteSpecific,
}

/// Known source labels by class
#[derive(Debug, Clone)]
pub struct ProvenanceRules {
    known: Vec<(String, ProvenanceClass)>,
}

impl ProvenanceRules {
    pub fn new(config: &ProvenanceConfig) -> Self {
        let classes = [
            (&config.unique_per_object, ProvenanceClass::UniquePerObject),
            (&config.coordinate_query, ProvenanceClass::CoordinateQuery),
            (&config.site_specific, ProvenanceClass::SiteSpecific),
        ];

        let known = classes
            .into_iter()
            .flat_map(|(labels, class)| labels.iter().map(move |l| (l.clone(), class)))
            .collect();

        Self { known }
    }

    /// Class of a source label.
    ///
    /// An exact match wins. A site-specific label followed by `_` keeps its
    /// class, so a point relabelled by an earlier merge (`LCO_Gaia23aiy`) is
    /// relabelled again rather than read as Gaia. Otherwise the longest known
    /// label contained in `source_name` decides, so `Gaia_DR3_G` is a catalog
    /// query rather than the Gaia alert stream.
    pub fn classify(&self, source_name: &str) -> Option<ProvenanceClass> {
        if let Some((_, class)) = self.known.iter().find(|(label, _)| label == source_name) {
            return Some(*class);
        }

        let site_prefix = self
            .known
            .iter()
            .filter(|(label, class)| {
                *class == ProvenanceClass::SiteSpecific
                    && source_name
                        .strip_prefix(label.as_str())
                        .is_some_and(|rest| rest.starts_with('_'))
            })
            .max_by_key(|(label, _)| label.len());
        if let Some((_, class)) = site_prefix {
            return Some(*class);
        }

        self.known
            .iter()
            .filter(|(label, _)| source_name.contains(label.as_str()))
            .max_by_key(|(label, _)| label.len())
            .map(|(_, class)| *class)
    }
}

/// What happens to one time-series point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatumAction {
    Transfer,
    Relabel,
    SkipDuplicate,
}

#[derive(Debug, Clone)]
pub struct DatumMove {
    /// The point as it will be stored: new owner, label and payload
    pub datum: ReducedDatum,
    pub original_source: String,
    pub action: DatumAction,
}

/// Everything that leaves one absorbed target
#[derive(Debug, Clone)]
pub struct AbsorbedTransfer {
    pub target: Target,
    pub data_products: Vec<Uuid>,
    pub datums: Vec<DatumMove>,
    pub observations: Vec<Uuid>,
    pub comments: Vec<Uuid>,
    /// Names the primary must answer to: the display name, then existing aliases
    pub aliases: Vec<String>,
}

/// A fully decided merge of one group
#[derive(Debug, Clone)]
pub struct TransferPlan {
    /// Primary with merged attributes
    pub primary: Target,
    pub field_changes: Vec<FieldChange>,
    pub absorbed: Vec<AbsorbedTransfer>,
    /// Groups the primary joins
    pub group_additions: Vec<Uuid>,
}

impl TransferPlan {
    pub fn absorbed_names(&self) -> Vec<String> {
        self.absorbed.iter().map(|a| a.target.name.clone()).collect()
    }

    pub fn datum_count(&self, action: DatumAction) -> usize {
        self.absorbed
            .iter()
            .flat_map(|a| a.datums.iter())
            .filter(|m| m.action == action)
            .count()
    }

    /// Counts the plan would produce if applied.
    ///
    /// Every alias is counted as added; whether one is re-pointed instead is
    /// only known inside the transaction.
    pub fn preview(&self) -> MergeStats {
        let sum = |f: fn(&AbsorbedTransfer) -> usize| self.absorbed.iter().map(f).sum::<usize>();

        MergeStats {
            datums_transferred: self.datum_count(DatumAction::Transfer),
            datums_relabelled: self.datum_count(DatumAction::Relabel),
            datums_skipped: self.datum_count(DatumAction::SkipDuplicate),
            datums_deleted: 0,
            data_products: sum(|a| a.data_products.len()),
            observations: sum(|a| a.observations.len()),
            comments: sum(|a| a.comments.len()),
            aliases_added: sum(|a| a.aliases.len()),
            aliases_repointed: 0,
            groups_joined: self.group_additions.len(),
            shells_deleted: 0,
        }
    }

    /// Points the plan leaves on `absorbed` as redundant catalog queries
    fn left_on_shell(&self, absorbed: Uuid) -> HashSet<Uuid> {
        self.absorbed
            .iter()
            .filter(|a| a.target.id == absorbed)
            .flat_map(|a| a.datums.iter())
            .filter(|m| m.action == DatumAction::SkipDuplicate)
            .map(|m| m.datum.id)
            .collect()
    }
}

/// Counts of what a committed merge changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeStats {
    pub datums_transferred: usize,
    pub datums_relabelled: usize,
    pub datums_skipped: usize,
    pub datums_deleted: usize,
    pub data_products: usize,
    pub observations: usize,
    pub comments: usize,
    pub aliases_added: usize,
    pub aliases_repointed: usize,
    pub groups_joined: usize,
    pub shells_deleted: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MergeOptions {
    /// Delete a point whose transfer violates a uniqueness rule instead of failing the group
    pub remove_invalid_data: bool,
    /// Delete the absorbed shells in the same transaction. Only set once confirmed.
    pub delete_shells: bool,
}

/// A committed merge: the plan it ran and what it changed
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub plan: TransferPlan,
    pub stats: MergeStats,
}

/// Fail on the first absorbed point whose source label is unknown
fn verify_provenance(absorbed: &[TargetSnapshot], rules: &ProvenanceRules) -> Result<()> {
    for snapshot in absorbed {
        for datum in &snapshot.datums {
            if rules.classify(&datum.source_name).is_none() {
                return Err(AppError::UnknownProvenance {
                    target: snapshot.target.name.clone(),
                    datum_id: datum.id,
                    source_name: datum.source_name.clone(),
                });
            }
        }
    }
    Ok(())
}

fn relabel(datum: &mut ReducedDatum, absorbed_name: &str) {
    datum.source_name = format!("{}_{}", datum.source_name, absorbed_name);

    let filter = datum.filter().map(|f| format!("{}_{}", f, absorbed_name));
    if let (Some(filter), Some(payload)) = (filter, datum.value.as_object_mut()) {
        payload.insert("filter".to_string(), serde_json::Value::String(filter));
    }
}

/// Decide how every record of the absorbed targets moves to the primary
pub fn plan_transfer(
    primary: &TargetSnapshot,
    absorbed: &[TargetSnapshot],
    rules: &ProvenanceRules,
) -> Result<TransferPlan> {
    verify_provenance(absorbed, rules)?;

    let absorbed_targets: Vec<&Target> = absorbed.iter().map(|s| &s.target).collect();
    let merged = merge_attributes(&primary.target, &absorbed_targets);
    let primary_id = primary.target.id;

    let mut primary_labels = primary.source_labels();
    let mut primary_groups: BTreeSet<Uuid> = primary.group_ids.iter().copied().collect();
    let mut group_additions = Vec::new();
    let mut transfers = Vec::with_capacity(absorbed.len());

    for snapshot in absorbed {
        let name = snapshot.target.name.as_str();
        let mut moves = Vec::with_capacity(snapshot.datums.len());

        for original in &snapshot.datums {
            let mut datum = original.clone();
            datum.target_id = primary_id;

            let action = match rules.classify(&original.source_name) {
                Some(ProvenanceClass::CoordinateQuery)
                    if primary_labels.contains(&original.source_name) =>
                {
                    datum.target_id = original.target_id;
                    DatumAction::SkipDuplicate
                }
                Some(ProvenanceClass::SiteSpecific) => {
                    relabel(&mut datum, name);
                    DatumAction::Relabel
                }
                _ => DatumAction::Transfer,
            };

            moves.push(DatumMove {
                datum,
                original_source: original.source_name.clone(),
                action,
            });
        }

        // Labels the primary owns once this target's points have landed
        primary_labels.extend(
            moves
                .iter()
                .filter(|m| m.action != DatumAction::SkipDuplicate)
                .map(|m| m.datum.source_name.clone()),
        );

        for group in &snapshot.group_ids {
            if primary_groups.insert(*group) {
                group_additions.push(*group);
            }
        }

        let mut aliases = vec![snapshot.target.name.clone()];
        aliases.extend(snapshot.aliases.iter().map(|a| a.name.clone()));

        transfers.push(AbsorbedTransfer {
            target: snapshot.target.clone(),
            data_products: snapshot.data_products.iter().map(|p| p.id).collect(),
            datums: moves,
            observations: snapshot.observations.iter().map(|o| o.id).collect(),
            comments: snapshot.comments.iter().map(|c| c.id).collect(),
            aliases,
        });
    }

    Ok(TransferPlan {
        primary: merged.target,
        field_changes: merged.changes,
        absorbed: transfers,
        group_additions,
    })
}

/// Merge `absorbed_ids` into `primary_id` in one transaction; nothing is kept
/// if any step fails
#[instrument(skip_all, fields(primary = %primary_id, absorbed = absorbed_ids.len()))]
pub async fn save_merge_group(
    store: &dyn TargetStore,
    primary_id: Uuid,
    absorbed_ids: &[Uuid],
    rules: &ProvenanceRules,
    options: MergeOptions,
) -> Result<MergeOutcome> {
    let mut txn = store.begin_merge().await?;

    match merge_locked(txn.as_mut(), primary_id, absorbed_ids, rules, options).await {
        Ok(outcome) => {
            txn.commit().await?;
            let stats = &outcome.stats;
            record_datums("transferred", stats.datums_transferred);
            record_datums("relabelled", stats.datums_relabelled);
            record_datums("skipped", stats.datums_skipped);
            record_datums("deleted", stats.datums_deleted);
            record_deleted(stats.shells_deleted);
            info!(
                transferred = stats.datums_transferred,
                relabelled = stats.datums_relabelled,
                skipped = stats.datums_skipped,
                aliases_added = stats.aliases_added,
                aliases_repointed = stats.aliases_repointed,
                shells_deleted = stats.shells_deleted,
                "Merge group committed"
            );
            Ok(outcome)
        }
        Err(err) => {
            if let Err(rollback) = txn.rollback().await {
                warn!(error = %rollback, "Rollback of failed merge group failed");
            }
            Err(err)
        }
    }
}

fn locked_row(locked: &[Target], id: Uuid) -> Result<&Target> {
    locked
        .iter()
        .find(|t| t.id == id)
        .ok_or_else(|| AppError::TargetLocked {
            target: id.to_string(),
        })
}

async fn merge_locked(
    txn: &mut dyn MergeTransaction,
    primary_id: Uuid,
    absorbed_ids: &[Uuid],
    rules: &ProvenanceRules,
    options: MergeOptions,
) -> Result<MergeOutcome> {
    let mut ids = vec![primary_id];
    ids.extend_from_slice(absorbed_ids);
    let locked = txn.lock_targets(&ids).await?;

    // Plan from the locked rows, not from what the scan listed
    let primary = txn.load_snapshot(locked_row(&locked, primary_id)?).await?;
    let mut absorbed = Vec::with_capacity(absorbed_ids.len());
    for id in absorbed_ids {
        absorbed.push(txn.load_snapshot(locked_row(&locked, *id)?).await?);
    }

    let plan = plan_transfer(&primary, &absorbed, rules)?;
    let stats = apply_plan(txn, &plan, options).await?;
    Ok(MergeOutcome { plan, stats })
}

async fn apply_plan(
    txn: &mut dyn MergeTransaction,
    plan: &TransferPlan,
    options: MergeOptions,
) -> Result<MergeStats> {
    let primary_id = plan.primary.id;
    let mut stats = MergeStats::default();

    if !plan.field_changes.is_empty() {
        txn.update_merged_columns(&plan.primary).await?;
    }

    for absorbed in &plan.absorbed {
        for product in &absorbed.data_products {
            txn.reassign_data_product(*product, primary_id).await?;
            stats.data_products += 1;
        }

        for datum_move in &absorbed.datums {
            if datum_move.action == DatumAction::SkipDuplicate {
                debug!(
                    datum_id = %datum_move.datum.id,
                    source = %datum_move.original_source,
                    "Primary already holds this catalog query; point left on shell"
                );
                stats.datums_skipped += 1;
                continue;
            }

            match txn.reassign_datum(&datum_move.datum).await {
                Ok(()) if datum_move.action == DatumAction::Relabel => stats.datums_relabelled += 1,
                Ok(()) => stats.datums_transferred += 1,
                Err(AppError::PersistenceConflict { message, .. }) if options.remove_invalid_data => {
                    warn!(
                        datum_id = %datum_move.datum.id,
                        source = %datum_move.original_source,
                        absorbed = %absorbed.target.name,
                        reason = %message,
                        "Deleting conflicting time-series point (data loss)"
                    );
                    txn.delete_datum(datum_move.datum.id).await?;
                    stats.datums_deleted += 1;
                }
                Err(err) => return Err(err),
            }
        }

        for observation in &absorbed.observations {
            txn.reassign_observation(*observation, primary_id).await?;
            stats.observations += 1;
        }

        for comment in &absorbed.comments {
            txn.reassign_comment(*comment, primary_id).await?;
            stats.comments += 1;
        }

        for name in &absorbed.aliases {
            match txn.find_alias(name).await? {
                Some(alias) if alias.target_id == primary_id => {}
                Some(alias) => {
                    debug!(alias = %name, previous_owner = %alias.target_id, "Re-pointing alias");
                    txn.repoint_alias(alias.id, primary_id).await?;
                    stats.aliases_repointed += 1;
                }
                None => {
                    txn.insert_alias(primary_id, name).await?;
                    stats.aliases_added += 1;
                }
            }
        }
    }

    for group in &plan.group_additions {
        if txn.add_group_member(*group, primary_id).await? {
            stats.groups_joined += 1;
        }
    }

    for absorbed in &plan.absorbed {
        txn.mark_absorbed(absorbed.target.id, primary_id).await?;
    }

    if options.delete_shells {
        for absorbed in &plan.absorbed {
            if delete_shell(txn, plan, &absorbed.target).await? {
                stats.shells_deleted += 1;
            }
        }
    }

    Ok(stats)
}

/// Delete an absorbed shell when nothing but its planned leftovers remain on it.
///
/// A shell still owning records the plan did not account for is kept inert.
async fn delete_shell(
    txn: &mut dyn MergeTransaction,
    plan: &TransferPlan,
    shell: &Target,
) -> Result<bool> {
    let expected = plan.left_on_shell(shell.id);
    let remaining = txn.load_snapshot(shell).await?;

    let unplanned = remaining
        .datums
        .iter()
        .filter(|d| !expected.contains(&d.id))
        .count()
        + remaining.aliases.len()
        + remaining.data_products.len()
        + remaining.observations.len()
        + remaining.comments.len();

    if unplanned > 0 {
        warn!(
            target = %shell.name,
            unplanned,
            "Shell still owns records the merge did not move; left inert"
        );
        return Ok(false);
    }

    let deleted = txn.delete_target(shell.id).await?;
    if deleted {
        info!(target = %shell.name, "Deleted absorbed shell");
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use skymerge_common::db::models::{
        Comment, DataProduct, DateTimeWithTimeZone, ObservationRecord, DATA_TYPE_PHOTOMETRY,
    };
    use skymerge_common::errors::ErrorCode;
    use skymerge_common::{InMemoryStore, SkyPosition};

    fn at(seconds: i64) -> DateTimeWithTimeZone {
        Utc.timestamp_opt(1_680_000_000 + seconds, 0).unwrap().into()
    }

    fn rules() -> ProvenanceRules {
        ProvenanceRules::new(&ProvenanceConfig::default())
    }

    async fn seed(store: &InMemoryStore, name: &str, created: i64) -> Target {
        let position = SkyPosition::new(270.771375, -29.738278).unwrap();
        store
            .create_target(Target::new(name, position, at(created)))
            .await
            .unwrap()
    }

    async fn point(store: &InMemoryStore, target: &Target, source: &str, t: i64, mag: f64) -> ReducedDatum {
        store
            .insert_datum(ReducedDatum::new(
                target.id,
                source,
                DATA_TYPE_PHOTOMETRY,
                at(t),
                json!({"magnitude": mag, "error": 0.01, "filter": "I"}),
            ))
            .await
            .unwrap()
    }

    async fn snapshots(store: &InMemoryStore, primary: &Target, absorbed: &[&Target]) -> (TargetSnapshot, Vec<TargetSnapshot>) {
        let p = store.load_snapshot(primary).await.unwrap();
        let mut a = Vec::new();
        for target in absorbed {
            a.push(store.load_snapshot(target).await.unwrap());
        }
        (p, a)
    }

    async fn merge(store: &InMemoryStore, primary: &Target, absorbed: &[&Target], options: MergeOptions) -> Result<MergeStats> {
        let ids: Vec<Uuid> = absorbed.iter().map(|t| t.id).collect();
        let outcome = save_merge_group(store, primary.id, &ids, &rules(), options).await?;
        Ok(outcome.stats)
    }

    #[test]
    fn test_classify_labels() {
        let rules = rules();
        assert_eq!(rules.classify("OGLE"), Some(ProvenanceClass::UniquePerObject));
        assert_eq!(rules.classify("Gaia"), Some(ProvenanceClass::UniquePerObject));
        assert_eq!(rules.classify("Gaia_DR3"), Some(ProvenanceClass::CoordinateQuery));
        assert_eq!(rules.classify("Gaia_DR3_G"), Some(ProvenanceClass::CoordinateQuery));
        assert_eq!(rules.classify("ZTF_r"), Some(ProvenanceClass::CoordinateQuery));
        assert_eq!(rules.classify("MOA_red"), Some(ProvenanceClass::UniquePerObject));
        assert_eq!(rules.classify("MOP"), Some(ProvenanceClass::SiteSpecific));
        assert_eq!(rules.classify("mystery"), None);
    }

    #[test]
    fn test_classify_suffixed_site_labels() {
        let rules = rules();
        assert_eq!(rules.classify("LCO_Gaia23aiy"), Some(ProvenanceClass::SiteSpecific));
        assert_eq!(rules.classify("LCO_OGLE-2023-BLG-0363"), Some(ProvenanceClass::SiteSpecific));
        assert_eq!(rules.classify("ESO_ATLAS23xyz"), Some(ProvenanceClass::SiteSpecific));
        assert_eq!(rules.classify("MOP_B_A"), Some(ProvenanceClass::SiteSpecific));

        // Only a site label at the start followed by `_` counts
        assert_eq!(rules.classify("Gaia_LCO"), Some(ProvenanceClass::UniquePerObject));
        assert_eq!(rules.classify("LCOGaia"), Some(ProvenanceClass::UniquePerObject));
    }

    #[tokio::test]
    async fn test_coordinate_query_dedup() {
        let store = InMemoryStore::new();
        let primary = seed(&store, "OGLE-2023-BLG-0363", 0).await;
        let with_ztf = seed(&store, "MOA-2023-BLG-123", 10).await;
        point(&store, &primary, "ZTF", 1, 17.0).await;
        point(&store, &with_ztf, "ZTF", 1, 17.0).await;
        point(&store, &with_ztf, "MOA", 2, 16.5).await;

        let stats = merge(&store, &primary, &[&with_ztf], MergeOptions::default()).await.unwrap();

        assert_eq!(stats.datums_skipped, 1);
        assert_eq!(stats.datums_transferred, 1);
        let owned: Vec<String> = store
            .datums()
            .await
            .into_iter()
            .filter(|d| d.target_id == primary.id)
            .map(|d| d.source_name)
            .collect();
        assert_eq!(owned.iter().filter(|s| *s == "ZTF").count(), 1);
        assert!(owned.contains(&"MOA".to_string()));
    }

    #[tokio::test]
    async fn test_coordinate_query_moves_when_primary_lacks_it() {
        let store = InMemoryStore::new();
        let primary = seed(&store, "A", 0).await;
        let first = seed(&store, "B", 10).await;
        let second = seed(&store, "C", 20).await;
        point(&store, &first, "ZTF", 1, 17.0).await;
        point(&store, &first, "ZTF", 2, 17.1).await;
        point(&store, &second, "ZTF", 1, 17.0).await;

        let (p, a) = snapshots(&store, &primary, &[&first, &second]).await;
        let plan = plan_transfer(&p, &a, &rules()).unwrap();

        // Both of B's points move; C's duplicate query is then redundant
        assert_eq!(plan.absorbed[0].datums.iter().filter(|m| m.action == DatumAction::Transfer).count(), 2);
        assert_eq!(plan.absorbed[1].datums[0].action, DatumAction::SkipDuplicate);
        assert_eq!(plan.absorbed[1].datums[0].datum.target_id, second.id);
    }

    #[tokio::test]
    async fn test_site_specific_relabelled() {
        let store = InMemoryStore::new();
        let primary = seed(&store, "OGLE-2023-BLG-0363", 0).await;
        let other = seed(&store, "MOA-2023-BLG-123", 10).await;
        point(&store, &primary, "LCO", 1, 17.0).await;
        point(&store, &other, "LCO", 1, 17.0).await;

        let stats = merge(&store, &primary, &[&other], MergeOptions::default()).await.unwrap();
        assert_eq!(stats.datums_relabelled, 1);

        let moved = store
            .datums()
            .await
            .into_iter()
            .find(|d| d.source_name == "LCO_MOA-2023-BLG-123")
            .unwrap();
        assert_eq!(moved.target_id, primary.id);
        assert_eq!(moved.filter(), Some("I_MOA-2023-BLG-123"));
    }

    #[tokio::test]
    async fn test_relabelled_point_relabelled_again() {
        let store = InMemoryStore::new();
        let first = seed(&store, "KMT-2023-BLG-0007", 0).await;
        let middle = seed(&store, "OGLE-2023-BLG-0363", 5).await;
        let gaia = seed(&store, "Gaia23aiy", 10).await;
        point(&store, &gaia, "LCO", 1, 17.0).await;

        merge(&store, &middle, &[&gaia], MergeOptions::default()).await.unwrap();
        assert!(store.datums().await.iter().any(|d| d.source_name == "LCO_Gaia23aiy"));

        // A later pass folds the earlier primary into an older target
        let stats = merge(&store, &first, &[&middle], MergeOptions::default()).await.unwrap();
        assert_eq!(stats.datums_relabelled, 1);
        assert_eq!(stats.datums_transferred, 0);

        let datum = store.datums().await.into_iter().next().unwrap();
        assert_eq!(datum.target_id, first.id);
        assert_eq!(datum.source_name, "LCO_Gaia23aiy_OGLE-2023-BLG-0363");
        assert_eq!(datum.filter(), Some("I_Gaia23aiy_OGLE-2023-BLG-0363"));
    }

    #[tokio::test]
    async fn test_merge_reads_rows_at_lock_time() {
        let store = InMemoryStore::new();
        let primary = seed(&store, "OGLE-2023-BLG-0363", 0).await;
        let other = seed(&store, "MOA-2023-BLG-123", 10).await;
        point(&store, &other, "MOA", 1, 16.9).await;

        // Written after the scan listed both targets
        let mut fitted = primary.clone();
        fitted.te = 42.0;
        store.replace_target(fitted).await.unwrap();
        let mut flagged = other.clone();
        flagged.qso = true;
        store.replace_target(flagged).await.unwrap();
        let late = point(&store, &other, "MOA", 2, 16.8).await;

        let options = MergeOptions {
            delete_shells: true,
            ..Default::default()
        };
        let stats = merge(&store, &primary, &[&other], options).await.unwrap();

        assert_eq!(stats.datums_transferred, 2);
        assert_eq!(stats.shells_deleted, 1);

        let stored = store.find_by_id(primary.id).await.unwrap().unwrap();
        assert_eq!(stored.te, 42.0);
        assert!(stored.qso);

        let moved = store.datums().await.into_iter().find(|d| d.id == late.id).unwrap();
        assert_eq!(moved.target_id, primary.id);
        assert!(store.find_by_id(other.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_shell_deleted_with_skipped_queries() {
        let store = InMemoryStore::new();
        let primary = seed(&store, "A", 0).await;
        let other = seed(&store, "B", 10).await;
        point(&store, &primary, "ZTF", 1, 17.0).await;
        point(&store, &other, "ZTF", 1, 17.0).await;

        let options = MergeOptions {
            delete_shells: true,
            ..Default::default()
        };
        let stats = merge(&store, &primary, &[&other], options).await.unwrap();

        assert_eq!(stats.datums_skipped, 1);
        assert_eq!(stats.shells_deleted, 1);
        assert_eq!(store.datums().await.len(), 1);
        assert!(store.find_by_id(other.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_shell_with_unplanned_records_kept() {
        let store = InMemoryStore::new();
        let primary = seed(&store, "A", 0).await;
        let other = seed(&store, "B", 10).await;

        let (p, a) = snapshots(&store, &primary, &[&other]).await;
        let plan = plan_transfer(&p, &a, &rules()).unwrap();
        let unplanned = point(&store, &other, "OGLE", 1, 17.0).await;

        let mut txn = store.begin_merge().await.unwrap();
        assert!(!delete_shell(txn.as_mut(), &plan, &other).await.unwrap());
        txn.commit().await.unwrap();

        assert!(store.find_by_id(other.id).await.unwrap().is_some());
        assert!(store.datums().await.iter().any(|d| d.id == unplanned.id));
    }

    #[tokio::test]
    async fn test_unknown_provenance_aborts_before_any_write() {
        let store = InMemoryStore::new();
        let primary = seed(&store, "A", 0).await;
        let other = seed(&store, "B", 10).await;
        point(&store, &other, "OGLE", 1, 17.0).await;
        let odd = point(&store, &other, "backyard-telescope", 2, 17.0).await;

        let before = store.mutation_count();
        let err = merge(&store, &primary, &[&other], MergeOptions::default()).await.unwrap_err();

        match err {
            AppError::UnknownProvenance { target, datum_id, source_name } => {
                assert_eq!(target, "B");
                assert_eq!(datum_id, odd.id);
                assert_eq!(source_name, "backyard-telescope");
            }
            other => panic!("unexpected error {other}"),
        }
        assert_eq!(store.mutation_count(), before);
    }

    #[tokio::test]
    async fn test_conflict_fails_group_by_default() {
        let store = InMemoryStore::new();
        let primary = seed(&store, "A", 0).await;
        let other = seed(&store, "B", 10).await;
        point(&store, &primary, "OGLE", 1, 17.0).await;
        point(&store, &other, "OGLE", 1, 17.0).await;

        let before = store.mutation_count();
        let err = merge(&store, &primary, &[&other], MergeOptions::default()).await.unwrap_err();

        assert_eq!(err.code(), ErrorCode::PersistenceConflict);
        assert_eq!(store.mutation_count(), before);
        assert!(store.find_by_name("B").await.unwrap().is_some());
        assert!(store.find_by_alias("B").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_conflict_deleted_when_destructive() {
        let store = InMemoryStore::new();
        let primary = seed(&store, "A", 0).await;
        let other = seed(&store, "B", 10).await;
        point(&store, &primary, "OGLE", 1, 17.0).await;
        let clash = point(&store, &other, "OGLE", 1, 17.0).await;
        point(&store, &other, "OGLE", 2, 17.2).await;

        let stats = merge(&store, &primary, &[&other], MergeOptions { remove_invalid_data: true, ..Default::default() })
            .await
            .unwrap();

        assert_eq!(stats.datums_deleted, 1);
        assert_eq!(stats.datums_transferred, 1);
        let datums = store.datums().await;
        assert!(datums.iter().all(|d| d.id != clash.id));
        assert_eq!(datums.iter().filter(|d| d.target_id == primary.id).count(), 2);
    }

    #[tokio::test]
    async fn test_alias_collision_repoints() {
        let store = InMemoryStore::new();
        let a = seed(&store, "A", 0).await;
        let b = seed(&store, "B", 10).await;
        let c = seed(&store, "C", 20).await;
        store.create_alias(b.id, "C").await.unwrap();

        merge(&store, &a, &[&b, &c], MergeOptions::default()).await.unwrap();

        let aliases = store.aliases().await;
        for name in ["B", "C"] {
            let rows: Vec<_> = aliases.iter().filter(|x| x.name == name).collect();
            assert_eq!(rows.len(), 1, "alias {name}");
            assert_eq!(rows[0].target_id, a.id);
        }
        assert_eq!(store.find_by_alias("C").await.unwrap().unwrap().id, a.id);
    }

    #[tokio::test]
    async fn test_all_dependents_move() {
        let store = InMemoryStore::new();
        let primary = seed(&store, "A", 0).await;
        let other = seed(&store, "B", 10).await;
        store.create_alias(other.id, "B-old").await.unwrap();

        let product = store
            .insert_data_product(DataProduct {
                id: Uuid::now_v7(),
                target_id: other.id,
                product_id: "B_photometry.csv".into(),
                data_product_type: "photometry".into(),
                data: "data/B/B_photometry.csv".into(),
                created_at: at(5),
            })
            .await
            .unwrap();
        store
            .insert_observation(ObservationRecord {
                id: Uuid::now_v7(),
                target_id: other.id,
                facility: "LCO".into(),
                observation_id: "3325014".into(),
                status: "COMPLETED".into(),
                scheduled_start: Some(at(100)),
                created_at: at(6),
            })
            .await
            .unwrap();
        store
            .insert_comment(Comment {
                id: Uuid::now_v7(),
                target_id: other.id,
                author: "observer".into(),
                body: "Anomaly near peak".into(),
                created_at: at(7),
            })
            .await
            .unwrap();
        let shared = store.create_group("Alive events").await.unwrap();
        let extra = store.create_group("Interferometry").await.unwrap();
        store.add_to_group(shared.id, primary.id).await.unwrap();
        store.add_to_group(shared.id, other.id).await.unwrap();
        store.add_to_group(extra.id, other.id).await.unwrap();

        let stats = merge(&store, &primary, &[&other], MergeOptions::default()).await.unwrap();

        assert_eq!(stats.data_products, 1);
        assert_eq!(stats.observations, 1);
        assert_eq!(stats.comments, 1);
        assert_eq!(stats.groups_joined, 1);
        assert_eq!(stats.aliases_added, 1);
        assert_eq!(stats.aliases_repointed, 1);

        let snapshot = store.load_snapshot(&primary).await.unwrap();
        assert_eq!(snapshot.data_products[0].id, product.id);
        assert_eq!(snapshot.observations.len(), 1);
        assert_eq!(snapshot.comments.len(), 1);
        assert_eq!(snapshot.group_ids.len(), 2);
        let names: BTreeSet<String> = snapshot.aliases.iter().map(|a| a.name.clone()).collect();
        assert_eq!(names, BTreeSet::from(["B".to_string(), "B-old".to_string()]));

        // The absorbed target keeps its own memberships
        let shell = store.find_by_id(other.id).await.unwrap().unwrap();
        assert_eq!(shell.merged_into, Some(primary.id));
        assert_eq!(store.load_snapshot(&shell).await.unwrap().group_ids.len(), 2);
    }

    #[tokio::test]
    async fn test_locked_group_untouched() {
        let store = InMemoryStore::new();
        let primary = seed(&store, "A", 0).await;
        let other = seed(&store, "B", 10).await;
        point(&store, &other, "OGLE", 1, 17.0).await;
        store.hold_lock(other.id).await;

        let before = store.mutation_count();
        let err = merge(&store, &primary, &[&other], MergeOptions::default()).await.unwrap_err();

        assert_eq!(err.code(), ErrorCode::TargetLocked);
        assert_eq!(store.mutation_count(), before);
    }
}

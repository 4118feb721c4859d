//! Duplicate scanner
//!
//! Walks the selected targets in creation order. Each unvisited target's
//! cone, taken at its rounded position, forms a candidate group; the
//! earliest-created member becomes the primary and absorbs the rest in one
//! transaction. A failing group is reported and the pass moves on; a failure
//! outside any group stops the pass but keeps the report of what committed.

use crate::errors::PassAborted;
use crate::report::{GroupEntry, GroupStatus, ReconciliationReport, SkippedTarget};
use crate::transfer::{plan_transfer, save_merge_group, MergeOptions, ProvenanceRules};
use skymerge_common::db::models::Target;
use skymerge_common::db::{creation_order, TargetFilter};
use skymerge_common::errors::{AppError, Result};
use skymerge_common::metrics::GroupMetrics;
use skymerge_common::{Angle, TargetStore};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Settings for one pass
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub radius: Angle,
    pub coordinate_decimals: u32,
    /// Display names neither scanned nor absorbed
    pub excluded: HashSet<String>,
    /// Delete absorbed shells with each merge. Only set once confirmed.
    pub delete_duplicates: bool,
    pub remove_invalid_data: bool,
    pub dry_run: bool,
}

impl ScanOptions {
    pub fn new(radius: Angle) -> Self {
        Self {
            radius,
            coordinate_decimals: 6,
            excluded: HashSet::new(),
            delete_duplicates: false,
            remove_invalid_data: false,
            dry_run: false,
        }
    }
}

/// Per-pass bookkeeping
#[derive(Default)]
struct PassState {
    visited: HashSet<Uuid>,
    /// Absorbed in this pass; in a dry run these are still active in the store
    absorbed: HashSet<Uuid>,
    /// Members of groups that failed or were skipped in this pass
    unresolved: HashSet<Uuid>,
}

pub struct DuplicateScanner {
    store: Arc<dyn TargetStore>,
    rules: ProvenanceRules,
    options: ScanOptions,
    cancel: Arc<AtomicBool>,
}

impl DuplicateScanner {
    pub fn new(store: Arc<dyn TargetStore>, rules: ProvenanceRules, options: ScanOptions) -> Self {
        Self {
            store,
            rules,
            options,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that stops the pass before its next group
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Run one reconciliation pass over the targets matching `filter`
    #[instrument(skip(self), fields(radius_arcsec = self.options.radius.arcsec(), dry_run = self.options.dry_run))]
    pub async fn run(&self, filter: &TargetFilter) -> std::result::Result<ReconciliationReport, PassAborted> {
        let selector = match filter {
            TargetFilter::All => "all".to_string(),
            TargetFilter::NameContains(part) => part.clone(),
        };
        let mut report = ReconciliationReport::new(
            &selector,
            self.options.radius.arcsec(),
            self.options.dry_run,
            self.options.delete_duplicates,
        );

        let outcome = self.scan(filter, &mut report).await;
        report.finish();
        let totals = report.totals();

        if let Err(err) = outcome {
            error!(
                code = ?err.code(),
                error = %err,
                merged = totals.merged,
                "Reconciliation pass aborted"
            );
            report.aborted = Some(err.to_string());
            return Err(PassAborted {
                report: Box::new(report),
                source: err,
            });
        }

        info!(
            groups = totals.groups,
            merged = totals.merged,
            planned = totals.planned,
            failed = totals.failed,
            absorbed = totals.absorbed,
            deleted = totals.deleted,
            singletons = report.singletons,
            "Reconciliation pass complete"
        );

        Ok(report)
    }

    async fn scan(&self, filter: &TargetFilter, report: &mut ReconciliationReport) -> Result<()> {
        let targets = self.store.list_targets(filter).await?;
        info!(count = targets.len(), "Scanning targets for duplicates");

        let mut state = PassState::default();

        for target in targets {
            if self.cancel.load(Ordering::SeqCst) {
                warn!("Cancellation requested; stopping between groups");
                report.cancelled = true;
                break;
            }

            if state.absorbed.contains(&target.id) || !state.visited.insert(target.id) {
                continue;
            }

            if self.options.excluded.contains(&target.name) {
                info!(target = %target.name, "Excluded from automated merging");
                report.excluded.push(target.name.clone());
                continue;
            }

            let position = match target.position() {
                Ok(position) => position,
                Err(err) => {
                    warn!(target = %target.name, error = %err, "Skipping target with malformed position");
                    report.skipped_targets.push(SkippedTarget {
                        name: target.name.clone(),
                        reason: err.to_string(),
                    });
                    continue;
                }
            };

            let center = position.rounded(self.options.coordinate_decimals);
            let mut members: Vec<Target> = self
                .store
                .cone_search(&center, self.options.radius)
                .await?
                .into_iter()
                .filter(|t| {
                    !state.absorbed.contains(&t.id)
                        && !state.unresolved.contains(&t.id)
                        && !self.options.excluded.contains(&t.name)
                })
                .collect();

            // Rounding can move the center off a target sitting on the cone's edge
            if !members.iter().any(|t| t.id == target.id) {
                members.push(target.clone());
            }

            if members.len() <= 1 {
                report.singletons += 1;
                continue;
            }

            creation_order(&mut members);
            let primary = members.remove(0);
            let entry = self.process_group(primary, members, &mut state).await?;
            report.groups.push(entry);
        }

        Ok(())
    }

    #[instrument(skip_all, fields(primary = %primary.name, absorbed = absorbed.len()))]
    async fn process_group(
        &self,
        primary: Target,
        absorbed: Vec<Target>,
        state: &mut PassState,
    ) -> Result<GroupEntry> {
        let metrics = GroupMetrics::start();
        let ids: Vec<Uuid> = absorbed.iter().map(|t| t.id).collect();
        state.visited.insert(primary.id);
        state.visited.extend(ids.iter().copied());

        let mut entry = GroupEntry {
            primary: primary.name.clone(),
            primary_id: primary.id,
            absorbed: absorbed.iter().map(|t| t.name.clone()).collect(),
            status: GroupStatus::Planned,
            field_changes: Vec::new(),
            stats: None,
            deleted: 0,
        };

        match self.merge_group(&primary, &absorbed, &mut entry).await {
            Ok(()) => {
                state.absorbed.extend(ids.iter().copied());
            }
            Err(err) if err.is_group_scoped() => {
                entry.status = match err {
                    AppError::TargetLocked { .. } => {
                        warn!(error = %err, "Group skipped, a member is locked by another process");
                        GroupStatus::Skipped {
                            reason: err.to_string(),
                        }
                    }
                    _ => {
                        error!(code = ?err.code(), error = %err, "Merge group failed");
                        GroupStatus::Failed {
                            code: err.code(),
                            message: err.to_string(),
                        }
                    }
                };
                state.unresolved.insert(primary.id);
                state.unresolved.extend(ids.iter().copied());
            }
            Err(err) => return Err(err),
        }

        metrics.finish(entry.status.as_str());
        Ok(entry)
    }

    async fn merge_group(
        &self,
        primary: &Target,
        absorbed: &[Target],
        entry: &mut GroupEntry,
    ) -> Result<()> {
        if self.options.dry_run {
            let primary_snapshot = self.store.load_snapshot(primary).await?;
            let mut absorbed_snapshots = Vec::with_capacity(absorbed.len());
            for target in absorbed {
                absorbed_snapshots.push(self.store.load_snapshot(target).await?);
            }

            let plan = plan_transfer(&primary_snapshot, &absorbed_snapshots, &self.rules)?;
            info!(absorbed = ?plan.absorbed_names(), "Dry run: group planned");
            entry.field_changes = plan.field_changes.clone();
            entry.stats = Some(plan.preview());
            entry.status = GroupStatus::Planned;
            return Ok(());
        }

        let options = MergeOptions {
            remove_invalid_data: self.options.remove_invalid_data,
            delete_shells: self.options.delete_duplicates,
        };
        let ids: Vec<Uuid> = absorbed.iter().map(|t| t.id).collect();
        let outcome = save_merge_group(self.store.as_ref(), primary.id, &ids, &self.rules, options).await?;

        entry.field_changes = outcome.plan.field_changes;
        entry.deleted = outcome.stats.shells_deleted;
        entry.stats = Some(outcome.stats);
        entry.status = GroupStatus::Merged;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use skymerge_common::config::ProvenanceConfig;
    use skymerge_common::db::models::{
        DateTimeWithTimeZone, ReducedDatum, TargetName, DATA_TYPE_PHOTOMETRY,
    };
    use skymerge_common::db::{MergeTransaction, TargetSnapshot};
    use skymerge_common::errors::ErrorCode;
    use skymerge_common::{InMemoryStore, SkyPosition};
    use std::sync::atomic::AtomicUsize;

    const ARCSEC: f64 = 1.0 / 3600.0;

    fn at(seconds: i64) -> DateTimeWithTimeZone {
        Utc.timestamp_opt(1_685_000_000 + seconds, 0).unwrap().into()
    }

    async fn seed(store: &InMemoryStore, name: &str, ra: f64, dec: f64, created: i64) -> Target {
        store
            .create_target(Target::new(name, SkyPosition::new(ra, dec).unwrap(), at(created)))
            .await
            .unwrap()
    }

    async fn point(store: &InMemoryStore, target: &Target, source: &str, t: i64) {
        store
            .insert_datum(ReducedDatum::new(
                target.id,
                source,
                DATA_TYPE_PHOTOMETRY,
                at(t),
                json!({"magnitude": 17.0 + t as f64 / 100.0, "error": 0.02, "filter": "I"}),
            ))
            .await
            .unwrap();
    }

    fn scanner_with(store: &InMemoryStore, options: ScanOptions) -> DuplicateScanner {
        let rules = ProvenanceRules::new(&ProvenanceConfig::default());
        DuplicateScanner::new(Arc::new(store.clone()), rules, options)
    }

    fn scanner(store: &InMemoryStore) -> DuplicateScanner {
        scanner_with(store, ScanOptions::new(Angle::from_arcsec(2.0)))
    }

    /// In-memory store whose connection drops on the `fail_on`-th cone search
    struct DroppingStore {
        inner: InMemoryStore,
        cone_searches: AtomicUsize,
        fail_on: usize,
    }

    #[async_trait::async_trait]
    impl TargetStore for DroppingStore {
        async fn find_by_name(&self, name: &str) -> Result<Option<Target>> {
            self.inner.find_by_name(name).await
        }

        async fn find_by_alias(&self, alias: &str) -> Result<Option<Target>> {
            self.inner.find_by_alias(alias).await
        }

        async fn find_by_id(&self, id: Uuid) -> Result<Option<Target>> {
            self.inner.find_by_id(id).await
        }

        async fn cone_search(&self, center: &SkyPosition, radius: Angle) -> Result<Vec<Target>> {
            if self.cone_searches.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on {
                return Err(AppError::DatabaseConnection {
                    message: "connection reset by peer".into(),
                });
            }
            self.inner.cone_search(center, radius).await
        }

        async fn create_target(&self, target: Target) -> Result<Target> {
            self.inner.create_target(target).await
        }

        async fn create_alias(&self, target_id: Uuid, name: &str) -> Result<TargetName> {
            self.inner.create_alias(target_id, name).await
        }

        async fn list_targets(&self, filter: &TargetFilter) -> Result<Vec<Target>> {
            self.inner.list_targets(filter).await
        }

        async fn load_snapshot(&self, target: &Target) -> Result<TargetSnapshot> {
            self.inner.load_snapshot(target).await
        }

        async fn begin_merge(&self) -> Result<Box<dyn MergeTransaction>> {
            self.inner.begin_merge().await
        }

        async fn ping(&self) -> Result<()> {
            self.inner.ping().await
        }
    }

    /// Every surviving target's cone holds only itself
    async fn assert_complete(store: &InMemoryStore, radius: Angle) {
        for target in store.list_targets(&TargetFilter::All).await.unwrap() {
            let cone = store
                .cone_search(&target.position().unwrap(), radius)
                .await
                .unwrap();
            let names: Vec<&str> = cone.iter().map(|t| t.name.as_str()).collect();
            assert_eq!(names, vec![target.name.as_str()]);
        }
    }

    #[tokio::test]
    async fn test_end_to_end_merge() {
        let store = InMemoryStore::new();
        let ogle = seed(&store, "OGLE-2023-BLG-0363", 270.771375, -29.738278, 0).await;
        let moa = seed(&store, "MOA-2023-BLG-123", 270.771375, -29.738278, 60).await;
        for t in 0..5 {
            point(&store, &moa, "MOA", t).await;
        }

        let report = tokio_test::assert_ok!(scanner(&store).run(&TargetFilter::All).await);

        assert_eq!(report.groups.len(), 1);
        assert!(report.aborted.is_none());
        let group = &report.groups[0];
        assert_eq!(group.primary, "OGLE-2023-BLG-0363");
        assert_eq!(group.absorbed, vec!["MOA-2023-BLG-123"]);
        assert_eq!(group.status, GroupStatus::Merged);
        assert_eq!(group.stats.as_ref().unwrap().datums_transferred, 5);

        let owner = store.find_by_alias("MOA-2023-BLG-123").await.unwrap().unwrap();
        assert_eq!(owner.id, ogle.id);
        assert!(store.datums().await.iter().all(|d| d.target_id == ogle.id));
        assert!(store.find_by_name("MOA-2023-BLG-123").await.unwrap().is_none());
        assert_complete(&store, Angle::from_arcsec(2.0)).await;
    }

    #[tokio::test]
    async fn test_second_pass_is_idempotent() {
        let store = InMemoryStore::new();
        seed(&store, "OGLE-2023-BLG-0363", 270.771375, -29.738278, 0).await;
        let moa = seed(&store, "MOA-2023-BLG-123", 270.771375, -29.738278, 60).await;
        point(&store, &moa, "MOA", 1).await;
        seed(&store, "Gaia23aiy", 120.0, 10.0, 5).await;
        seed(&store, "ZTF23aaabcde", 120.0 + 0.5 * ARCSEC, 10.0, 7).await;

        let first = scanner(&store).run(&TargetFilter::All).await.unwrap();
        assert_eq!(first.totals().merged, 2);

        let before = store.mutation_count();
        let second = scanner(&store).run(&TargetFilter::All).await.unwrap();

        assert!(second.groups.is_empty());
        assert_eq!(second.singletons, 2);
        assert_eq!(store.mutation_count(), before);
    }

    #[tokio::test]
    async fn test_proximity_chain() {
        let store = InMemoryStore::new();
        // A-B and B-C are 1.5" apart, A-C 3"
        let a = seed(&store, "A", 200.0, 0.0, 0).await;
        seed(&store, "B", 200.0 + 1.5 * ARCSEC, 0.0, 10).await;
        let c = seed(&store, "C", 200.0 + 3.0 * ARCSEC, 0.0, 20).await;

        let report = scanner(&store).run(&TargetFilter::All).await.unwrap();

        assert_eq!(report.groups.len(), 1);
        assert_eq!(report.groups[0].primary, "A");
        assert_eq!(report.groups[0].absorbed, vec!["B"]);
        assert_eq!(report.singletons, 1);

        let survivors: Vec<Uuid> = store
            .list_targets(&TargetFilter::All)
            .await
            .unwrap()
            .iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(survivors, vec![a.id, c.id]);
        assert_complete(&store, Angle::from_arcsec(2.0)).await;
    }

    #[tokio::test]
    async fn test_names_stay_unique_across_groups() {
        let store = InMemoryStore::new();
        let a = seed(&store, "A", 10.0, 10.0, 0).await;
        let b = seed(&store, "B", 10.0, 10.0, 10).await;
        store.create_alias(b.id, "B-discovery").await.unwrap();
        let c = seed(&store, "C", 50.0, -10.0, 20).await;
        let d = seed(&store, "D", 50.0, -10.0, 30).await;
        store.create_alias(d.id, "D-discovery").await.unwrap();

        scanner(&store).run(&TargetFilter::All).await.unwrap();

        let aliases = store.aliases().await;
        let mut names: Vec<&str> = aliases.iter().map(|x| x.name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["B", "B-discovery", "D", "D-discovery"]);
        for alias in &aliases {
            let expected = if alias.name.starts_with('B') { a.id } else { c.id };
            assert_eq!(alias.target_id, expected, "alias {}", alias.name);
        }
    }

    #[tokio::test]
    async fn test_failed_group_does_not_stop_pass() {
        let store = InMemoryStore::new();
        seed(&store, "OGLE-2023-BLG-0001", 100.0, -20.0, 0).await;
        let odd = seed(&store, "MOA-2023-BLG-0002", 100.0, -20.0, 10).await;
        point(&store, &odd, "backyard-telescope", 1).await;
        seed(&store, "OGLE-2023-BLG-0003", 101.0, -20.0, 20).await;
        let good = seed(&store, "KMT-2023-BLG-0004", 101.0, -20.0, 30).await;
        point(&store, &good, "KMTNet", 1).await;

        let report = scanner(&store).run(&TargetFilter::All).await.unwrap();

        assert_eq!(report.groups.len(), 2);
        match &report.groups[0].status {
            GroupStatus::Failed { code, message } => {
                assert_eq!(*code, ErrorCode::UnknownProvenance);
                assert!(message.contains("backyard-telescope"));
            }
            other => panic!("unexpected status {other:?}"),
        }
        assert_eq!(report.groups[1].status, GroupStatus::Merged);
        assert!(store.find_by_name("MOA-2023-BLG-0002").await.unwrap().is_some());
        assert!(store.find_by_name("KMT-2023-BLG-0004").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_locked_member_skips_group() {
        let store = InMemoryStore::new();
        seed(&store, "A", 30.0, 30.0, 0).await;
        let b = seed(&store, "B", 30.0, 30.0, 10).await;
        store.hold_lock(b.id).await;

        let before = store.mutation_count();
        let report = scanner(&store).run(&TargetFilter::All).await.unwrap();

        assert!(matches!(report.groups[0].status, GroupStatus::Skipped { .. }));
        assert_eq!(store.mutation_count(), before);

        // The next pass picks the group up once the lock is gone
        store.release_lock(b.id).await;
        let report = scanner(&store).run(&TargetFilter::All).await.unwrap();
        assert_eq!(report.groups[0].status, GroupStatus::Merged);
    }

    #[tokio::test]
    async fn test_excluded_targets_untouched() {
        let store = InMemoryStore::new();
        seed(&store, "OGLE-2021-BLG-0001", 250.0, -25.0, 0).await;
        seed(&store, "Gaia21ccu", 250.0, -25.0, 10).await;

        let mut options = ScanOptions::new(Angle::from_arcsec(2.0));
        options.excluded.insert("Gaia21ccu".to_string());
        let report = scanner_with(&store, options).run(&TargetFilter::All).await.unwrap();

        assert!(report.groups.is_empty());
        assert_eq!(report.excluded, vec!["Gaia21ccu"]);
        assert_eq!(report.singletons, 1);
        assert!(store.find_by_name("Gaia21ccu").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_malformed_position_skipped() {
        let store = InMemoryStore::new();
        let mut broken = Target::new("broken", SkyPosition::new(10.0, 10.0).unwrap(), at(0));
        broken.dec = 123.0;
        store.create_target(broken).await.unwrap();
        seed(&store, "A", 10.0, 10.0, 5).await;
        seed(&store, "B", 10.0, 10.0, 15).await;

        let report = scanner(&store).run(&TargetFilter::All).await.unwrap();

        assert_eq!(report.skipped_targets.len(), 1);
        assert_eq!(report.skipped_targets[0].name, "broken");
        assert_eq!(report.groups.len(), 1);
        assert_eq!(report.groups[0].status, GroupStatus::Merged);
    }

    #[tokio::test]
    async fn test_dry_run_changes_nothing() {
        let store = InMemoryStore::new();
        seed(&store, "A", 60.0, 5.0, 0).await;
        let b = seed(&store, "B", 60.0, 5.0, 10).await;
        point(&store, &b, "OGLE", 1).await;
        seed(&store, "C", 60.0, 5.0, 20).await;

        let mut options = ScanOptions::new(Angle::from_arcsec(2.0));
        options.dry_run = true;
        options.delete_duplicates = true;

        let before = store.mutation_count();
        let report = scanner_with(&store, options).run(&TargetFilter::All).await.unwrap();

        assert_eq!(report.groups.len(), 1);
        assert_eq!(report.groups[0].status, GroupStatus::Planned);
        assert_eq!(report.groups[0].absorbed, vec!["B", "C"]);
        assert_eq!(report.groups[0].stats.as_ref().unwrap().datums_transferred, 1);
        assert_eq!(report.groups[0].deleted, 0);
        assert_eq!(store.mutation_count(), before);
        assert_eq!(store.list_targets(&TargetFilter::All).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_group() {
        let store = InMemoryStore::new();
        seed(&store, "A", 60.0, 5.0, 0).await;
        seed(&store, "B", 60.0, 5.0, 10).await;

        let scanner = scanner(&store);
        scanner.cancel_handle().store(true, Ordering::SeqCst);
        let report = scanner.run(&TargetFilter::All).await.unwrap();

        assert!(report.cancelled);
        assert!(report.groups.is_empty());
        assert_eq!(store.list_targets(&TargetFilter::All).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_confirmed_deletion_removes_shells() {
        let store = InMemoryStore::new();
        let a = seed(&store, "A", 80.0, -60.0, 0).await;
        let b = seed(&store, "B", 80.0, -60.0, 10).await;
        point(&store, &b, "OGLE", 1).await;

        let mut options = ScanOptions::new(Angle::from_arcsec(2.0));
        options.delete_duplicates = true;
        let report = scanner_with(&store, options).run(&TargetFilter::All).await.unwrap();

        assert_eq!(report.groups[0].deleted, 1);
        assert_eq!(report.totals().deleted, 1);
        assert!(store.find_by_id(b.id).await.unwrap().is_none());
        assert_eq!(store.find_by_alias("B").await.unwrap().unwrap().id, a.id);
        assert_eq!(store.datums().await.len(), 1);
    }

    #[tokio::test]
    async fn test_name_filter_selects_scan_roots() {
        let store = InMemoryStore::new();
        seed(&store, "OGLE-2023-BLG-0363", 270.771375, -29.738278, 0).await;
        seed(&store, "MOA-2023-BLG-123", 270.771375, -29.738278, 60).await;
        seed(&store, "Gaia23aiy", 120.0, 10.0, 5).await;
        seed(&store, "Gaia23aiy-dup", 120.0, 10.0, 9).await;

        let report = scanner(&store)
            .run(&TargetFilter::parse("BLG"))
            .await
            .unwrap();

        assert_eq!(report.selector, "BLG");
        assert_eq!(report.groups.len(), 1);
        assert!(store.find_by_name("Gaia23aiy-dup").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_near_pole_group() {
        let store = InMemoryStore::new();
        seed(&store, "polar-a", 0.0, -89.99995, 0).await;
        seed(&store, "polar-b", 180.0, -89.99995, 10).await;

        let report = scanner(&store).run(&TargetFilter::All).await.unwrap();

        assert_eq!(report.groups.len(), 1);
        assert_eq!(report.groups[0].primary, "polar-a");
    }

    #[tokio::test]
    async fn test_connection_loss_keeps_committed_groups() {
        let store = InMemoryStore::new();
        let a = seed(&store, "A", 10.0, 10.0, 0).await;
        let b = seed(&store, "B", 10.0, 10.0, 10).await;
        point(&store, &b, "OGLE", 1).await;
        seed(&store, "C", 50.0, -10.0, 20).await;
        seed(&store, "D", 50.0, -10.0, 30).await;

        let dropping = DroppingStore {
            inner: store.clone(),
            cone_searches: AtomicUsize::new(0),
            fail_on: 2,
        };
        let rules = ProvenanceRules::new(&ProvenanceConfig::default());
        let scanner = DuplicateScanner::new(
            Arc::new(dropping),
            rules,
            ScanOptions::new(Angle::from_arcsec(2.0)),
        );

        let aborted = tokio_test::assert_err!(scanner.run(&TargetFilter::All).await);

        assert_eq!(aborted.source.code(), ErrorCode::ConnectionError);
        let report = aborted.report;
        assert_eq!(report.groups.len(), 1);
        assert_eq!(report.groups[0].status, GroupStatus::Merged);
        assert!(report.aborted.as_deref().unwrap().contains("reset by peer"));
        assert!(report.finished_at.is_some());
        assert!(report.render_text().contains("A <- B  [merged]"));

        // The committed group stays merged; the rest is untouched
        assert_eq!(store.find_by_alias("B").await.unwrap().unwrap().id, a.id);
        assert!(store.find_by_name("C").await.unwrap().is_some());
        assert!(store.find_by_name("D").await.unwrap().is_some());
    }
}

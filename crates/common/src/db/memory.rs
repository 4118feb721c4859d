//! In-memory target store
//!
//! Enforces the same uniqueness rules as the Postgres schema. A merge
//! transaction works on a staged copy of the catalog that replaces the live
//! one on commit; dropping it discards the copy. Transactions are not
//! isolated from each other, the last commit wins.

use crate::db::models::*;
use crate::db::store::{
    creation_order, within_cone, MergeTransaction, TargetFilter, TargetSnapshot, TargetStore,
};
use crate::errors::{AppError, Result};
use crate::sky::{Angle, SkyPosition};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Default)]
struct Catalog {
    targets: Vec<Target>,
    aliases: Vec<TargetName>,
    datums: Vec<ReducedDatum>,
    data_products: Vec<DataProduct>,
    observations: Vec<ObservationRecord>,
    comments: Vec<Comment>,
    groups: Vec<TargetGroup>,
    /// (group_id, target_id)
    members: BTreeSet<(Uuid, Uuid)>,
}

fn conflict(entity: &str, id: Uuid, message: impl Into<String>) -> AppError {
    AppError::PersistenceConflict {
        entity: entity.to_string(),
        id,
        message: message.into(),
    }
}

fn missing(resource_type: &str, id: Uuid) -> AppError {
    AppError::NotFound {
        resource_type: resource_type.to_string(),
        id: id.to_string(),
    }
}

impl Catalog {
    fn target(&self, id: Uuid) -> Option<&Target> {
        self.targets.iter().find(|t| t.id == id)
    }

    fn target_mut(&mut self, id: Uuid) -> Result<&mut Target> {
        self.targets
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| missing("target", id))
    }

    fn require_target(&self, entity: &str, id: Uuid, target_id: Uuid) -> Result<()> {
        match self.target(target_id) {
            Some(_) => Ok(()),
            None => Err(conflict(
                entity,
                id,
                format!("foreign key violation: target {} does not exist", target_id),
            )),
        }
    }

    fn active(&self) -> Vec<Target> {
        let mut targets: Vec<Target> = self
            .targets
            .iter()
            .filter(|t| !t.is_absorbed())
            .cloned()
            .collect();
        creation_order(&mut targets);
        targets
    }

    fn insert_target(&mut self, target: Target) -> Result<Target> {
        if self.targets.iter().any(|t| t.name == target.name) {
            return Err(conflict(
                "target",
                target.id,
                format!("duplicate key value violates unique constraint: name {}", target.name),
            ));
        }
        self.targets.push(target.clone());
        Ok(target)
    }

    fn insert_alias(&mut self, target_id: Uuid, name: &str) -> Result<TargetName> {
        self.require_target("target_name", target_id, target_id)?;

        if self.aliases.iter().any(|a| a.name == name) {
            return Err(conflict(
                "target_name",
                target_id,
                format!("duplicate key value violates unique constraint: alias {}", name),
            ));
        }

        let alias = TargetName {
            id: Uuid::now_v7(),
            target_id,
            name: name.to_string(),
            created_at: chrono::Utc::now().into(),
        };
        self.aliases.push(alias.clone());
        Ok(alias)
    }

    fn datum_collides(&self, datum: &ReducedDatum) -> bool {
        self.datums
            .iter()
            .any(|d| d.id != datum.id && d.target_id == datum.target_id && d.same_content(datum))
    }

    fn insert_datum(&mut self, datum: ReducedDatum) -> Result<ReducedDatum> {
        self.require_target("reduced_datum", datum.id, datum.target_id)?;
        if self.datum_collides(&datum) {
            return Err(conflict(
                "reduced_datum",
                datum.id,
                "duplicate key value violates unique constraint on reduced_datums",
            ));
        }
        self.datums.push(datum.clone());
        Ok(datum)
    }

    fn write_datum(&mut self, datum: &ReducedDatum) -> Result<()> {
        self.require_target("reduced_datum", datum.id, datum.target_id)?;
        if self.datum_collides(datum) {
            return Err(conflict(
                "reduced_datum",
                datum.id,
                "duplicate key value violates unique constraint on reduced_datums",
            ));
        }

        let stored = self
            .datums
            .iter_mut()
            .find(|d| d.id == datum.id)
            .ok_or_else(|| missing("reduced_datum", datum.id))?;
        stored.target_id = datum.target_id;
        stored.source_name = datum.source_name.clone();
        stored.value = datum.value.clone();
        Ok(())
    }

    fn snapshot(&self, target: &Target) -> TargetSnapshot {
        let id = target.id;
        TargetSnapshot {
            target: target.clone(),
            aliases: self.aliases.iter().filter(|a| a.target_id == id).cloned().collect(),
            datums: self.datums.iter().filter(|d| d.target_id == id).cloned().collect(),
            data_products: self
                .data_products
                .iter()
                .filter(|p| p.target_id == id)
                .cloned()
                .collect(),
            observations: self
                .observations
                .iter()
                .filter(|o| o.target_id == id)
                .cloned()
                .collect(),
            comments: self.comments.iter().filter(|c| c.target_id == id).cloned().collect(),
            group_ids: self
                .members
                .iter()
                .filter(|(_, member)| *member == id)
                .map(|(group, _)| *group)
                .collect(),
        }
    }

    /// Delete a target and cascade to everything it owns
    fn remove_target(&mut self, id: Uuid) -> bool {
        let before = self.targets.len();
        self.targets.retain(|t| t.id != id);
        if self.targets.len() == before {
            return false;
        }

        self.aliases.retain(|a| a.target_id != id);
        self.datums.retain(|d| d.target_id != id);
        self.data_products.retain(|p| p.target_id != id);
        self.observations.retain(|o| o.target_id != id);
        self.comments.retain(|c| c.target_id != id);
        self.members.retain(|(_, member)| *member != id);
        true
    }
}

/// Target store held entirely in memory
#[derive(Clone, Default)]
pub struct InMemoryStore {
    catalog: Arc<Mutex<Catalog>>,
    held_locks: Arc<Mutex<HashSet<Uuid>>>,
    mutations: Arc<AtomicU64>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed catalog mutations made through the store traits
    pub fn mutation_count(&self) -> u64 {
        self.mutations.load(Ordering::SeqCst)
    }

    /// Simulate another process holding a row lock on `id`
    pub async fn hold_lock(&self, id: Uuid) {
        self.held_locks.lock().await.insert(id);
    }

    pub async fn release_lock(&self, id: Uuid) {
        self.held_locks.lock().await.remove(&id);
    }

    /// Every target row, absorbed shells included, in creation order
    pub async fn all_targets(&self) -> Vec<Target> {
        let mut targets = self.catalog.lock().await.targets.clone();
        creation_order(&mut targets);
        targets
    }

    pub async fn aliases(&self) -> Vec<TargetName> {
        self.catalog.lock().await.aliases.clone()
    }

    pub async fn datums(&self) -> Vec<ReducedDatum> {
        self.catalog.lock().await.datums.clone()
    }

    pub async fn insert_datum(&self, datum: ReducedDatum) -> Result<ReducedDatum> {
        self.catalog.lock().await.insert_datum(datum)
    }

    pub async fn insert_data_product(&self, product: DataProduct) -> Result<DataProduct> {
        let mut catalog = self.catalog.lock().await;
        catalog.require_target("data_product", product.id, product.target_id)?;
        catalog.data_products.push(product.clone());
        Ok(product)
    }

    pub async fn insert_observation(&self, record: ObservationRecord) -> Result<ObservationRecord> {
        let mut catalog = self.catalog.lock().await;
        catalog.require_target("observation_record", record.id, record.target_id)?;
        catalog.observations.push(record.clone());
        Ok(record)
    }

    pub async fn insert_comment(&self, comment: Comment) -> Result<Comment> {
        let mut catalog = self.catalog.lock().await;
        catalog.require_target("comment", comment.id, comment.target_id)?;
        catalog.comments.push(comment.clone());
        Ok(comment)
    }

    pub async fn create_group(&self, name: &str) -> Result<TargetGroup> {
        let mut catalog = self.catalog.lock().await;
        if catalog.groups.iter().any(|g| g.name == name) {
            return Err(AppError::Duplicate {
                message: format!("group {} already exists", name),
            });
        }

        let group = TargetGroup {
            id: Uuid::now_v7(),
            name: name.to_string(),
            created_at: chrono::Utc::now().into(),
        };
        catalog.groups.push(group.clone());
        Ok(group)
    }

    /// Overwrite a stored row the way the cross-match or the fitter would
    pub async fn replace_target(&self, target: Target) -> Result<()> {
        let mut catalog = self.catalog.lock().await;
        let id = target.id;
        *catalog.target_mut(id)? = target;
        self.bump(1);
        Ok(())
    }

    pub async fn add_to_group(&self, group_id: Uuid, target_id: Uuid) -> Result<()> {
        let mut catalog = self.catalog.lock().await;
        catalog.require_target("target_group_member", group_id, target_id)?;
        catalog.members.insert((group_id, target_id));
        Ok(())
    }

    fn bump(&self, count: u64) {
        self.mutations.fetch_add(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl TargetStore for InMemoryStore {
    async fn find_by_name(&self, name: &str) -> Result<Option<Target>> {
        let catalog = self.catalog.lock().await;
        Ok(catalog
            .targets
            .iter()
            .find(|t| t.name == name && !t.is_absorbed())
            .cloned())
    }

    async fn find_by_alias(&self, alias: &str) -> Result<Option<Target>> {
        let catalog = self.catalog.lock().await;
        Ok(catalog
            .aliases
            .iter()
            .find(|a| a.name == alias)
            .and_then(|a| catalog.target(a.target_id))
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Target>> {
        Ok(self.catalog.lock().await.target(id).cloned())
    }

    async fn cone_search(&self, center: &SkyPosition, radius: Angle) -> Result<Vec<Target>> {
        let active = self.catalog.lock().await.active();
        Ok(within_cone(center, radius, active))
    }

    async fn create_target(&self, target: Target) -> Result<Target> {
        let created = self.catalog.lock().await.insert_target(target)?;
        self.bump(1);
        Ok(created)
    }

    async fn create_alias(&self, target_id: Uuid, name: &str) -> Result<TargetName> {
        let alias = self.catalog.lock().await.insert_alias(target_id, name)?;
        self.bump(1);
        Ok(alias)
    }

    async fn list_targets(&self, filter: &TargetFilter) -> Result<Vec<Target>> {
        let active = self.catalog.lock().await.active();
        Ok(active.into_iter().filter(|t| filter.matches(&t.name)).collect())
    }

    async fn load_snapshot(&self, target: &Target) -> Result<TargetSnapshot> {
        Ok(self.catalog.lock().await.snapshot(target))
    }

    async fn begin_merge(&self) -> Result<Box<dyn MergeTransaction>> {
        let staged = self.catalog.lock().await.clone();
        Ok(Box::new(InMemoryMergeTransaction {
            store: self.clone(),
            staged,
            mutations: 0,
        }))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Staged merge over a copy of the catalog
pub struct InMemoryMergeTransaction {
    store: InMemoryStore,
    staged: Catalog,
    mutations: u64,
}

#[async_trait]
impl MergeTransaction for InMemoryMergeTransaction {
    async fn lock_targets(&mut self, ids: &[Uuid]) -> Result<Vec<Target>> {
        let held = self.store.held_locks.lock().await;

        let mut locked: Vec<Target> = self
            .staged
            .targets
            .iter()
            .filter(|t| ids.contains(&t.id) && !t.is_absorbed() && !held.contains(&t.id))
            .cloned()
            .collect();

        if locked.len() != ids.len() {
            let missing: Vec<String> = ids
                .iter()
                .filter(|id| !locked.iter().any(|t| t.id == **id))
                .map(|id| id.to_string())
                .collect();
            return Err(AppError::TargetLocked {
                target: missing.join(", "),
            });
        }

        creation_order(&mut locked);
        Ok(locked)
    }

    async fn load_snapshot(&mut self, target: &Target) -> Result<TargetSnapshot> {
        let stored = self.staged.target(target.id).ok_or_else(|| missing("target", target.id))?;
        Ok(self.staged.snapshot(stored))
    }

    async fn update_merged_columns(&mut self, merged: &Target) -> Result<()> {
        self.staged.target_mut(merged.id)?.copy_merged_values(merged);
        self.mutations += 1;
        Ok(())
    }

    async fn reassign_data_product(&mut self, product_id: Uuid, to: Uuid) -> Result<()> {
        self.staged.require_target("data_product", product_id, to)?;
        let product = self
            .staged
            .data_products
            .iter_mut()
            .find(|p| p.id == product_id)
            .ok_or_else(|| missing("data_product", product_id))?;
        product.target_id = to;
        self.mutations += 1;
        Ok(())
    }

    async fn reassign_datum(&mut self, datum: &ReducedDatum) -> Result<()> {
        self.staged.write_datum(datum)?;
        self.mutations += 1;
        Ok(())
    }

    async fn delete_datum(&mut self, datum_id: Uuid) -> Result<()> {
        self.staged.datums.retain(|d| d.id != datum_id);
        self.mutations += 1;
        Ok(())
    }

    async fn reassign_observation(&mut self, observation_id: Uuid, to: Uuid) -> Result<()> {
        self.staged.require_target("observation_record", observation_id, to)?;
        let record = self
            .staged
            .observations
            .iter_mut()
            .find(|o| o.id == observation_id)
            .ok_or_else(|| missing("observation_record", observation_id))?;
        record.target_id = to;
        self.mutations += 1;
        Ok(())
    }

    async fn reassign_comment(&mut self, comment_id: Uuid, to: Uuid) -> Result<()> {
        self.staged.require_target("comment", comment_id, to)?;
        let comment = self
            .staged
            .comments
            .iter_mut()
            .find(|c| c.id == comment_id)
            .ok_or_else(|| missing("comment", comment_id))?;
        comment.target_id = to;
        self.mutations += 1;
        Ok(())
    }

    async fn add_group_member(&mut self, group_id: Uuid, target_id: Uuid) -> Result<bool> {
        self.staged.require_target("target_group_member", group_id, target_id)?;
        let inserted = self.staged.members.insert((group_id, target_id));
        if inserted {
            self.mutations += 1;
        }
        Ok(inserted)
    }

    async fn find_alias(&mut self, name: &str) -> Result<Option<TargetName>> {
        Ok(self.staged.aliases.iter().find(|a| a.name == name).cloned())
    }

    async fn insert_alias(&mut self, target_id: Uuid, name: &str) -> Result<TargetName> {
        let alias = self.staged.insert_alias(target_id, name)?;
        self.mutations += 1;
        Ok(alias)
    }

    async fn repoint_alias(&mut self, alias_id: Uuid, to: Uuid) -> Result<()> {
        self.staged.require_target("target_name", alias_id, to)?;
        let alias = self
            .staged
            .aliases
            .iter_mut()
            .find(|a| a.id == alias_id)
            .ok_or_else(|| missing("target_name", alias_id))?;
        alias.target_id = to;
        self.mutations += 1;
        Ok(())
    }

    async fn mark_absorbed(&mut self, id: Uuid, into: Uuid) -> Result<()> {
        self.staged.target_mut(id)?.merged_into = Some(into);
        self.mutations += 1;
        Ok(())
    }

    async fn delete_target(&mut self, id: Uuid) -> Result<bool> {
        let removed = self.staged.remove_target(id);
        if removed {
            self.mutations += 1;
        }
        Ok(removed)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let InMemoryMergeTransaction {
            store,
            staged,
            mutations,
        } = *self;

        *store.catalog.lock().await = staged;
        store.bump(mutations);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

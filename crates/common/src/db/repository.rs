//! Postgres-backed target store
//!
//! Reads go to the replica when one is configured; merge transactions and
//! inserts always use the primary. A merge re-reads its group through the
//! transaction once the rows are locked.

use crate::db::models::*;
use crate::db::store::{within_cone, MergeTransaction, TargetFilter, TargetSnapshot, TargetStore};
use crate::db::DbPool;
use crate::errors::{AppError, Result};
use crate::sky::{Angle, SkyPosition};
use async_trait::async_trait;
use sea_orm::sea_query::{Expr, LockBehavior, LockType, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction,
    EntityTrait, IntoActiveModel, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use tracing::debug;
use uuid::Uuid;

/// Target store over a SeaORM connection pool
#[derive(Clone)]
pub struct SeaOrmStore {
    pool: DbPool,
}

impl SeaOrmStore {
    /// Create a new store with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection
    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }
}

#[async_trait]
impl TargetStore for SeaOrmStore {
    // ========================================================================
    // Lookups
    // ========================================================================

    async fn find_by_name(&self, name: &str) -> Result<Option<Target>> {
        TargetEntity::find()
            .filter(TargetColumn::Name.eq(name))
            .filter(TargetColumn::MergedInto.is_null())
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn find_by_alias(&self, alias: &str) -> Result<Option<Target>> {
        let found = TargetNameEntity::find()
            .filter(TargetNameColumn::Name.eq(alias))
            .find_also_related(TargetEntity)
            .one(self.read_conn())
            .await?;

        Ok(found.and_then(|(_, target)| target))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Target>> {
        TargetEntity::find_by_id(id)
            .one(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn cone_search(&self, center: &SkyPosition, radius: Angle) -> Result<Vec<Target>> {
        // The declination band bounds the cone at any ra; exact separation is
        // applied afterwards.
        let (dec_low, dec_high) = center.dec_band(radius);

        let rows = TargetEntity::find()
            .filter(TargetColumn::MergedInto.is_null())
            .filter(TargetColumn::Dec.between(dec_low, dec_high))
            .order_by_asc(TargetColumn::CreatedAt)
            .order_by_asc(TargetColumn::Id)
            .all(self.read_conn())
            .await?;

        debug!(band_rows = rows.len(), "Cone search declination band fetched");

        Ok(within_cone(center, radius, rows))
    }

    async fn list_targets(&self, filter: &TargetFilter) -> Result<Vec<Target>> {
        let mut query = TargetEntity::find().filter(TargetColumn::MergedInto.is_null());

        if let TargetFilter::NameContains(part) = filter {
            query = query.filter(TargetColumn::Name.contains(part.as_str()));
        }

        query
            .order_by_asc(TargetColumn::CreatedAt)
            .order_by_asc(TargetColumn::Id)
            .all(self.read_conn())
            .await
            .map_err(Into::into)
    }

    async fn load_snapshot(&self, target: &Target) -> Result<TargetSnapshot> {
        read_snapshot(self.read_conn(), target).await
    }

    // ========================================================================
    // Writes
    // ========================================================================

    async fn create_target(&self, target: Target) -> Result<Target> {
        let id = target.id;
        target
            .into_active_model()
            .reset_all()
            .insert(self.write_conn())
            .await
            .map_err(|e| AppError::from_write("target", id, e))
    }

    async fn create_alias(&self, target_id: Uuid, name: &str) -> Result<TargetName> {
        let alias = TargetNameActiveModel {
            id: Set(Uuid::now_v7()),
            target_id: Set(target_id),
            name: Set(name.to_string()),
            created_at: Set(chrono::Utc::now().into()),
        };

        alias
            .insert(self.write_conn())
            .await
            .map_err(|e| AppError::from_write("target_name", target_id, e))
    }

    async fn begin_merge(&self) -> Result<Box<dyn MergeTransaction>> {
        let txn = self.write_conn().begin().await?;
        Ok(Box::new(SeaOrmMergeTransaction { txn }))
    }

    // ========================================================================
    // Health Check
    // ========================================================================

    async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }
}

/// Load a target's dependents over any connection or transaction
async fn read_snapshot<C: ConnectionTrait>(conn: &C, target: &Target) -> Result<TargetSnapshot> {
    let aliases = TargetNameEntity::find()
        .filter(TargetNameColumn::TargetId.eq(target.id))
        .order_by_asc(TargetNameColumn::CreatedAt)
        .all(conn)
        .await?;

    let datums = ReducedDatumEntity::find()
        .filter(ReducedDatumColumn::TargetId.eq(target.id))
        .order_by_asc(ReducedDatumColumn::Timestamp)
        .order_by_asc(ReducedDatumColumn::Id)
        .all(conn)
        .await?;

    let data_products = DataProductEntity::find()
        .filter(DataProductColumn::TargetId.eq(target.id))
        .order_by_asc(DataProductColumn::CreatedAt)
        .all(conn)
        .await?;

    let observations = ObservationRecordEntity::find()
        .filter(ObservationRecordColumn::TargetId.eq(target.id))
        .order_by_asc(ObservationRecordColumn::CreatedAt)
        .all(conn)
        .await?;

    let comments = CommentEntity::find()
        .filter(CommentColumn::TargetId.eq(target.id))
        .order_by_asc(CommentColumn::CreatedAt)
        .all(conn)
        .await?;

    let group_ids = TargetGroupMemberEntity::find()
        .filter(TargetGroupMemberColumn::TargetId.eq(target.id))
        .all(conn)
        .await?
        .into_iter()
        .map(|m| m.group_id)
        .collect();

    Ok(TargetSnapshot {
        target: target.clone(),
        aliases,
        datums,
        data_products,
        observations,
        comments,
        group_ids,
    })
}

/// One merge group's database transaction
pub struct SeaOrmMergeTransaction {
    txn: DatabaseTransaction,
}

#[async_trait]
impl MergeTransaction for SeaOrmMergeTransaction {
    async fn lock_targets(&mut self, ids: &[Uuid]) -> Result<Vec<Target>> {
        let locked = TargetEntity::find()
            .filter(TargetColumn::Id.is_in(ids.iter().copied()))
            .filter(TargetColumn::MergedInto.is_null())
            .order_by_asc(TargetColumn::CreatedAt)
            .order_by_asc(TargetColumn::Id)
            .lock_with_behavior(LockType::Update, LockBehavior::SkipLocked)
            .all(&self.txn)
            .await?;

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

        Ok(locked)
    }

    async fn load_snapshot(&mut self, target: &Target) -> Result<TargetSnapshot> {
        read_snapshot(&self.txn, target).await
    }

    async fn update_merged_columns(&mut self, merged: &Target) -> Result<()> {
        let mut update = TargetEntity::update_many();
        for (column, value) in merged.merged_values() {
            update = update.col_expr(column, Expr::value(value));
        }

        update
            .filter(TargetColumn::Id.eq(merged.id))
            .exec(&self.txn)
            .await
            .map_err(|e| AppError::from_write("target", merged.id, e))?;
        Ok(())
    }

    async fn reassign_data_product(&mut self, product_id: Uuid, to: Uuid) -> Result<()> {
        DataProductEntity::update_many()
            .col_expr(DataProductColumn::TargetId, Expr::value(to))
            .filter(DataProductColumn::Id.eq(product_id))
            .exec(&self.txn)
            .await
            .map_err(|e| AppError::from_write("data_product", product_id, e))?;
        Ok(())
    }

    async fn reassign_datum(&mut self, datum: &ReducedDatum) -> Result<()> {
        let savepoint = self.txn.begin().await?;

        let outcome = ReducedDatumEntity::update_many()
            .col_expr(ReducedDatumColumn::TargetId, Expr::value(datum.target_id))
            .col_expr(ReducedDatumColumn::SourceName, Expr::value(datum.source_name.clone()))
            .col_expr(ReducedDatumColumn::Value, Expr::value(datum.value.clone()))
            .filter(ReducedDatumColumn::Id.eq(datum.id))
            .exec(&savepoint)
            .await;

        match outcome {
            Ok(_) => {
                savepoint.commit().await?;
                Ok(())
            }
            Err(err) => {
                savepoint.rollback().await?;
                Err(AppError::from_write("reduced_datum", datum.id, err))
            }
        }
    }

    async fn delete_datum(&mut self, datum_id: Uuid) -> Result<()> {
        ReducedDatumEntity::delete_by_id(datum_id)
            .exec(&self.txn)
            .await?;
        Ok(())
    }

    async fn reassign_observation(&mut self, observation_id: Uuid, to: Uuid) -> Result<()> {
        ObservationRecordEntity::update_many()
            .col_expr(ObservationRecordColumn::TargetId, Expr::value(to))
            .filter(ObservationRecordColumn::Id.eq(observation_id))
            .exec(&self.txn)
            .await
            .map_err(|e| AppError::from_write("observation_record", observation_id, e))?;
        Ok(())
    }

    async fn reassign_comment(&mut self, comment_id: Uuid, to: Uuid) -> Result<()> {
        CommentEntity::update_many()
            .col_expr(CommentColumn::TargetId, Expr::value(to))
            .filter(CommentColumn::Id.eq(comment_id))
            .exec(&self.txn)
            .await
            .map_err(|e| AppError::from_write("comment", comment_id, e))?;
        Ok(())
    }

    async fn add_group_member(&mut self, group_id: Uuid, target_id: Uuid) -> Result<bool> {
        let member = TargetGroupMemberActiveModel {
            group_id: Set(group_id),
            target_id: Set(target_id),
        };

        let inserted = TargetGroupMemberEntity::insert(member)
            .on_conflict(
                OnConflict::columns([
                    TargetGroupMemberColumn::GroupId,
                    TargetGroupMemberColumn::TargetId,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(&self.txn)
            .await?;

        Ok(inserted > 0)
    }

    async fn find_alias(&mut self, name: &str) -> Result<Option<TargetName>> {
        TargetNameEntity::find()
            .filter(TargetNameColumn::Name.eq(name))
            .one(&self.txn)
            .await
            .map_err(Into::into)
    }

    async fn insert_alias(&mut self, target_id: Uuid, name: &str) -> Result<TargetName> {
        let alias = TargetNameActiveModel {
            id: Set(Uuid::now_v7()),
            target_id: Set(target_id),
            name: Set(name.to_string()),
            created_at: Set(chrono::Utc::now().into()),
        };

        alias
            .insert(&self.txn)
            .await
            .map_err(|e| AppError::from_write("target_name", target_id, e))
    }

    async fn repoint_alias(&mut self, alias_id: Uuid, to: Uuid) -> Result<()> {
        TargetNameEntity::update_many()
            .col_expr(TargetNameColumn::TargetId, Expr::value(to))
            .filter(TargetNameColumn::Id.eq(alias_id))
            .exec(&self.txn)
            .await
            .map_err(|e| AppError::from_write("target_name", alias_id, e))?;
        Ok(())
    }

    async fn mark_absorbed(&mut self, id: Uuid, into: Uuid) -> Result<()> {
        TargetEntity::update_many()
            .col_expr(TargetColumn::MergedInto, Expr::value(Some(into)))
            .filter(TargetColumn::Id.eq(id))
            .exec(&self.txn)
            .await?;
        Ok(())
    }

    async fn delete_target(&mut self, id: Uuid) -> Result<bool> {
        let result = TargetEntity::delete_by_id(id)
            .exec(&self.txn)
            .await?;

        Ok(result.rows_affected > 0)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.txn.commit().await.map_err(Into::into)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.txn.rollback().await.map_err(Into::into)
    }
}

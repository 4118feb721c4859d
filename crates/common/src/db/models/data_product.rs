//! Data product entity: a file-backed upload owned by one target

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "data_products")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub target_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub product_id: String,

    #[sea_orm(column_type = "Text")]
    pub data_product_type: String,

    /// Storage path of the backing file
    #[sea_orm(column_type = "Text")]
    pub data: String,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::target::Entity",
        from = "Column::TargetId",
        to = "super::target::Column::Id",
        on_delete = "Cascade"
    )]
    Target,

    #[sea_orm(has_many = "super::reduced_datum::Entity")]
    ReducedDatums,
}

impl Related<super::target::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Target.def()
    }
}

impl Related<super::reduced_datum::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ReducedDatums.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

//! Reduced datum entity: one timestamped point of a target's time series

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

pub const DATA_TYPE_PHOTOMETRY: &str = "photometry";
pub const DATA_TYPE_LC_MODEL: &str = "lc_model";
pub const DATA_TYPE_TABULAR: &str = "tabular";

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "reduced_datums")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub target_id: Uuid,

    pub data_product_id: Option<Uuid>,

    pub timestamp: DateTimeWithTimeZone,

    /// Provenance tag of the survey or process that produced this point
    #[sea_orm(column_type = "Text")]
    pub source_name: String,

    #[sea_orm(column_type = "Text")]
    pub source_location: String,

    #[sea_orm(column_type = "Text")]
    pub data_type: String,

    #[sea_orm(column_type = "JsonBinary")]
    pub value: Json,
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

    #[sea_orm(
        belongs_to = "super::data_product::Entity",
        from = "Column::DataProductId",
        to = "super::data_product::Column::Id",
        on_delete = "SetNull"
    )]
    DataProduct,
}

impl Related<super::target::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Target.def()
    }
}

impl Related<super::data_product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DataProduct.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn new(
        target_id: Uuid,
        source_name: &str,
        data_type: &str,
        timestamp: DateTimeWithTimeZone,
        value: Json,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            target_id,
            data_product_id: None,
            timestamp,
            source_name: source_name.to_string(),
            source_location: String::new(),
            data_type: data_type.to_string(),
            value,
        }
    }

    /// Fields covered by the table's uniqueness constraint besides the owner
    pub fn content_key(&self) -> (DateTimeWithTimeZone, &str, &str, &Json) {
        (
            self.timestamp,
            self.source_name.as_str(),
            self.data_type.as_str(),
            &self.value,
        )
    }

    /// True when both points would collide under the same owner
    pub fn same_content(&self, other: &Model) -> bool {
        self.content_key() == other.content_key()
    }

    /// Filter tag carried in a photometry payload, if any
    pub fn filter(&self) -> Option<&str> {
        self.value.get("filter").and_then(|f| f.as_str())
    }
}

//! SeaORM entity models
//!
//! Database entities for the target catalog and everything a target owns

mod comment;
mod data_product;
mod observation_record;
mod reduced_datum;
mod target;
mod target_group;
mod target_group_member;
mod target_name;

pub use sea_orm::prelude::{DateTimeWithTimeZone, Json};

pub use target::{
    Entity as TargetEntity,
    Model as Target,
    ActiveModel as TargetActiveModel,
    Column as TargetColumn,
    DEFAULT_CATEGORY,
    DEFAULT_CLASSIFICATION,
    DEFAULT_OBSERVING_MODE,
    DEFAULT_SKY_LOCATION,
    MERGED_COLUMNS,
    merged_column_names,
};

pub use target_name::{
    Entity as TargetNameEntity,
    Model as TargetName,
    ActiveModel as TargetNameActiveModel,
    Column as TargetNameColumn,
};

pub use reduced_datum::{
    Entity as ReducedDatumEntity,
    Model as ReducedDatum,
    ActiveModel as ReducedDatumActiveModel,
    Column as ReducedDatumColumn,
    DATA_TYPE_LC_MODEL,
    DATA_TYPE_PHOTOMETRY,
    DATA_TYPE_TABULAR,
};

pub use data_product::{
    Entity as DataProductEntity,
    Model as DataProduct,
    ActiveModel as DataProductActiveModel,
    Column as DataProductColumn,
};

pub use observation_record::{
    Entity as ObservationRecordEntity,
    Model as ObservationRecord,
    ActiveModel as ObservationRecordActiveModel,
    Column as ObservationRecordColumn,
};

pub use comment::{
    Entity as CommentEntity,
    Model as Comment,
    ActiveModel as CommentActiveModel,
    Column as CommentColumn,
};

pub use target_group::{
    Entity as TargetGroupEntity,
    Model as TargetGroup,
    ActiveModel as TargetGroupActiveModel,
    Column as TargetGroupColumn,
};

pub use target_group_member::{
    Entity as TargetGroupMemberEntity,
    Model as TargetGroupMember,
    ActiveModel as TargetGroupMemberActiveModel,
    Column as TargetGroupMemberColumn,
};

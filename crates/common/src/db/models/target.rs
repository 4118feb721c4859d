//! Target entity
//!
//! One catalog record per candidate or confirmed event. Attribute columns fall
//! into four families: classification labels, boolean flags, identifiers and
//! photometry cross-matched by position, and model-fit numerics.

use crate::errors::Result as AppResult;
use crate::sky::SkyPosition;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CLASSIFICATION: &str = "Microlensing PSPL";
pub const DEFAULT_CATEGORY: &str = "Microlensing stellar/planet";
pub const DEFAULT_OBSERVING_MODE: &str = "No";
pub const DEFAULT_SKY_LOCATION: &str = "Unknown";

/// Columns a merge may rewrite on the primary. The rest of the row is owned
/// by the position cross-match and the model fitter.
pub const MERGED_COLUMNS: [Column; 8] = [
    Column::Alive,
    Column::InterferometryCandidate,
    Column::Yso,
    Column::Qso,
    Column::Galaxy,
    Column::ObservingMode,
    Column::Classification,
    Column::Category,
];

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "targets")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(column_type = "Text", unique)]
    pub name: String,

    pub ra: f64,

    pub dec: f64,

    pub epoch: f64,

    pub created_at: DateTimeWithTimeZone,

    /// Set once this target has been absorbed into another; the row is then an inert shell
    pub merged_into: Option<Uuid>,

    // Classification labels
    #[sea_orm(column_type = "Text")]
    pub classification: String,
    #[sea_orm(column_type = "Text")]
    pub category: String,
    #[sea_orm(column_type = "Text")]
    pub observing_mode: String,
    #[sea_orm(column_type = "Text")]
    pub sky_location: String,

    // Flags
    pub alive: bool,
    pub interferometry_candidate: bool,
    pub yso: bool,
    pub qso: bool,
    pub galaxy: bool,

    // Cross-match identifiers and catalog photometry (derived from position)
    #[sea_orm(column_type = "Text")]
    pub gaia_source_id: String,
    #[sea_orm(column_type = "Text")]
    pub tns_name: String,
    #[sea_orm(column_type = "Text")]
    pub tns_class: String,
    pub gmag: f64,
    pub gmag_error: f64,
    pub rpmag: f64,
    pub bpmag: f64,
    pub bprp: f64,
    pub extinction_g: f64,
    pub distance: f64,
    pub teff: f64,
    pub logg: f64,
    pub metallicity: f64,
    pub ruwe: f64,

    // Model fit
    pub t0: f64,
    pub t0_error: f64,
    pub u0: f64,
    pub u0_error: f64,
    pub te: f64,
    pub te_error: f64,
    pub pien: f64,
    pub pien_error: f64,
    pub piee: f64,
    pub piee_error: f64,
    pub rho: f64,
    pub s: f64,
    pub q: f64,
    pub alpha: f64,
    pub source_magnitude: f64,
    pub source_mag_error: f64,
    pub blend_magnitude: f64,
    pub blend_mag_error: f64,
    pub baseline_magnitude: f64,
    pub baseline_mag_error: f64,
    pub chi2: f64,
    pub red_chi2: f64,
    #[sea_orm(column_type = "JsonBinary")]
    pub fit_covariance: Json,
    pub last_fit: f64,
    pub latest_data_hjd: f64,
    pub mag_now: f64,
    #[sea_orm(column_type = "Text")]
    pub mag_now_passband: String,
    pub tap_priority: f64,
    pub tap_priority_longte: f64,
    #[sea_orm(column_type = "Text")]
    pub interferometry_mode: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::target_name::Entity")]
    Aliases,

    #[sea_orm(has_many = "super::reduced_datum::Entity")]
    ReducedDatums,

    #[sea_orm(has_many = "super::data_product::Entity")]
    DataProducts,
}

impl Related<super::target_name::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Aliases.def()
    }
}

impl Related<super::reduced_datum::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ReducedDatums.def()
    }
}

impl Related<super::data_product::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DataProducts.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// A freshly ingested target with the catalog's default attributes
    pub fn new(name: &str, position: SkyPosition, created_at: DateTimeWithTimeZone) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.to_string(),
            ra: position.ra,
            dec: position.dec,
            epoch: 2000.0,
            created_at,
            merged_into: None,
            classification: DEFAULT_CLASSIFICATION.to_string(),
            category: DEFAULT_CATEGORY.to_string(),
            observing_mode: DEFAULT_OBSERVING_MODE.to_string(),
            sky_location: DEFAULT_SKY_LOCATION.to_string(),
            alive: true,
            interferometry_candidate: false,
            yso: false,
            qso: false,
            galaxy: false,
            gaia_source_id: String::new(),
            tns_name: "None".to_string(),
            tns_class: "None".to_string(),
            gmag: 0.0,
            gmag_error: 0.0,
            rpmag: 0.0,
            bpmag: 0.0,
            bprp: 0.0,
            extinction_g: 0.0,
            distance: 0.0,
            teff: 0.0,
            logg: 0.0,
            metallicity: 0.0,
            ruwe: 0.0,
            t0: 0.0,
            t0_error: 0.0,
            u0: 0.0,
            u0_error: 0.0,
            te: 0.0,
            te_error: 0.0,
            pien: 0.0,
            pien_error: 0.0,
            piee: 0.0,
            piee_error: 0.0,
            rho: 0.0,
            s: 0.0,
            q: 0.0,
            alpha: 0.0,
            source_magnitude: 0.0,
            source_mag_error: 0.0,
            blend_magnitude: 0.0,
            blend_mag_error: 0.0,
            baseline_magnitude: 0.0,
            baseline_mag_error: 0.0,
            chi2: 99999.9999,
            red_chi2: 99999.9999,
            fit_covariance: serde_json::json!({}),
            last_fit: 2446756.5,
            latest_data_hjd: 0.0,
            mag_now: 0.0,
            mag_now_passband: String::new(),
            tap_priority: 0.0,
            tap_priority_longte: 0.0,
            interferometry_mode: String::new(),
        }
    }

    /// Validated sky position of this target
    pub fn position(&self) -> AppResult<SkyPosition> {
        SkyPosition::named(&self.name, self.ra, self.dec)
    }

    /// Whether this row is an absorbed shell
    pub fn is_absorbed(&self) -> bool {
        self.merged_into.is_some()
    }

    /// Values of the merge-owned columns, in `MERGED_COLUMNS` order
    pub fn merged_values(&self) -> Vec<(Column, sea_orm::Value)> {
        MERGED_COLUMNS
            .iter()
            .map(|column| {
                let value: sea_orm::Value = match column {
                    Column::Alive => self.alive.into(),
                    Column::InterferometryCandidate => self.interferometry_candidate.into(),
                    Column::Yso => self.yso.into(),
                    Column::Qso => self.qso.into(),
                    Column::Galaxy => self.galaxy.into(),
                    Column::ObservingMode => self.observing_mode.clone().into(),
                    Column::Classification => self.classification.clone().into(),
                    _ => self.category.clone().into(),
                };
                (*column, value)
            })
            .collect()
    }

    /// Copy the merge-owned columns from `merged`, leaving every other field alone
    pub fn copy_merged_values(&mut self, merged: &Model) {
        self.alive = merged.alive;
        self.interferometry_candidate = merged.interferometry_candidate;
        self.yso = merged.yso;
        self.qso = merged.qso;
        self.galaxy = merged.galaxy;
        self.observing_mode = merged.observing_mode.clone();
        self.classification = merged.classification.clone();
        self.category = merged.category.clone();
    }
}

/// Names of the merge-owned columns
pub fn merged_column_names() -> Vec<&'static str> {
    MERGED_COLUMNS.iter().map(|c| c.as_str()).collect()
}

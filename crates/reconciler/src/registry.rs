//! Typed registry of mergeable target attributes
//!
//! Each attribute is listed once with the rule that merges it and typed
//! accessors into the target model. Fields derived from the sky position or
//! from the model fit are listed with a retain rule and are never touched.

use crate::policy::{
    merge_boolean, merge_labeled_category, merge_priority_tier, LabelPolicy, CATEGORY_POLICY,
    CLASSIFICATION_POLICY, NO_PRIORITY, OBSERVING_MODE_TIERS,
};
use serde::{Deserialize, Serialize};
use skymerge_common::db::models::Target;

#[derive(Debug, Clone, Copy)]
pub enum MergeRule {
    Boolean,
    PriorityTier {
        tiers: &'static [&'static str],
        sentinel: &'static str,
    },
    LabeledCategory(LabelPolicy),
    /// Computed from the position, which is never merged
    RetainPositional,
    /// Overwritten by the next fit over the merged photometry
    RetainModelFit,
}

#[derive(Clone, Copy)]
pub enum FieldAccess {
    Flag {
        get: fn(&Target) -> bool,
        set: fn(&mut Target, bool),
    },
    Label {
        get: fn(&Target) -> &str,
        set: fn(&mut Target, String),
    },
    Retained,
}

#[derive(Clone, Copy)]
pub struct MergeField {
    pub name: &'static str,
    pub rule: MergeRule,
    pub access: FieldAccess,
}

/// One attribute whose merged value differs from the primary's
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub before: String,
    pub after: String,
}

macro_rules! flag {
    ($field:ident) => {
        MergeField {
            name: stringify!($field),
            rule: MergeRule::Boolean,
            access: FieldAccess::Flag {
                get: {
                    fn get(t: &Target) -> bool {
                        t.$field
                    }
                    get
                },
                set: {
                    fn set(t: &mut Target, value: bool) {
                        t.$field = value
                    }
                    set
                },
            },
        }
    };
}

macro_rules! label {
    ($field:ident, $rule:expr) => {
        MergeField {
            name: stringify!($field),
            rule: $rule,
            access: FieldAccess::Label {
                get: {
                    fn get(t: &Target) -> &str {
                        &t.$field
                    }
                    get
                },
                set: {
                    fn set(t: &mut Target, value: String) {
                        t.$field = value
                    }
                    set
                },
            },
        }
    };
}

macro_rules! retained {
    ($rule:expr; $($field:ident),+ $(,)?) => {
        [$(MergeField {
            name: stringify!($field),
            rule: $rule,
            access: FieldAccess::Retained,
        }),+]
    };
}

const MERGED: &[MergeField] = &[
    flag!(alive),
    flag!(interferometry_candidate),
    flag!(yso),
    flag!(qso),
    flag!(galaxy),
    label!(
        observing_mode,
        MergeRule::PriorityTier {
            tiers: OBSERVING_MODE_TIERS,
            sentinel: NO_PRIORITY,
        }
    ),
    label!(classification, MergeRule::LabeledCategory(CLASSIFICATION_POLICY)),
    label!(category, MergeRule::LabeledCategory(CATEGORY_POLICY)),
];

const POSITIONAL: &[MergeField] = &retained!(MergeRule::RetainPositional;
    sky_location, gaia_source_id, tns_name, tns_class,
    gmag, gmag_error, rpmag, bpmag, bprp, extinction_g,
    distance, teff, logg, metallicity, ruwe, interferometry_mode,
);

const MODEL_FIT: &[MergeField] = &retained!(MergeRule::RetainModelFit;
    t0, t0_error, u0, u0_error, te, te_error,
    pien, pien_error, piee, piee_error, rho, s, q, alpha,
    source_magnitude, source_mag_error, blend_magnitude, blend_mag_error,
    baseline_magnitude, baseline_mag_error, chi2, red_chi2, fit_covariance,
    last_fit, latest_data_hjd, mag_now, mag_now_passband,
    tap_priority, tap_priority_longte,
);

/// Every registered attribute
pub fn fields() -> impl Iterator<Item = &'static MergeField> {
    MERGED.iter().chain(POSITIONAL.iter()).chain(MODEL_FIT.iter())
}

/// Merged target attributes
#[derive(Debug, Clone)]
pub struct MergedAttributes {
    pub target: Target,
    pub changes: Vec<FieldChange>,
}

/// Merge the absorbed targets' attributes into a copy of the primary
pub fn merge_attributes(primary: &Target, absorbed: &[&Target]) -> MergedAttributes {
    let mut merged = primary.clone();
    let mut changes = Vec::new();

    for field in fields() {
        match (field.rule, field.access) {
            (MergeRule::Boolean, FieldAccess::Flag { get, set }) => {
                let before = get(primary);
                let matches: Vec<Option<bool>> = absorbed.iter().map(|t| Some(get(*t))).collect();
                let after = merge_boolean(Some(before), &matches);
                if after != before {
                    set(&mut merged, after);
                    changes.push(FieldChange {
                        field: field.name.to_string(),
                        before: before.to_string(),
                        after: after.to_string(),
                    });
                }
            }
            (rule, FieldAccess::Label { get, set }) => {
                let before = get(primary);
                let matches: Vec<&str> = absorbed.iter().map(|t| get(*t)).collect();
                let after = match rule {
                    MergeRule::PriorityTier { tiers, sentinel } => {
                        merge_priority_tier(before, &matches, tiers, sentinel)
                    }
                    MergeRule::LabeledCategory(policy) => {
                        merge_labeled_category(before, &matches, &policy)
                    }
                    _ => continue,
                };
                if after != before {
                    changes.push(FieldChange {
                        field: field.name.to_string(),
                        before: before.to_string(),
                        after: after.clone(),
                    });
                    set(&mut merged, after);
                }
            }
            _ => {}
        }
    }

    MergedAttributes {
        target: merged,
        changes,
    }
}

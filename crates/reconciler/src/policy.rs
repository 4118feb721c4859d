//! Per-field conflict resolution for merged targets
//!
//! Every function takes the primary's value and the absorbed targets' values
//! and returns the value the merged target keeps. No I/O.

/// Observing modes, most urgent first
pub const OBSERVING_MODE_TIERS: &[&str] = &[
    "priority_stellar_event",
    "priority_long_event",
    "regular_long_event",
];

/// Observing mode of a target that needs no priority follow-up
pub const NO_PRIORITY: &str = "No";

/// Recognised labels of one attribute family and the fallback when none apply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelPolicy {
    pub priority: &'static [&'static str],
    pub default: &'static str,
}

pub const CLASSIFICATION_POLICY: LabelPolicy = LabelPolicy {
    priority: &[
        "Microlensing binary",
        "Microlensing PSPL",
        "Variable star",
        "Extra-galactic variable",
        "Known transient",
        "Unclassified poor fit",
    ],
    default: "Microlensing PSPL",
};

pub const CATEGORY_POLICY: LabelPolicy = LabelPolicy {
    priority: &[
        "Microlensing stellar/planet",
        "Microlensing long-tE",
        "Stellar activity",
        "Nova/supernova",
        "Eclipsing binary",
        "Unclassified",
    ],
    default: "Microlensing stellar/planet",
};

/// Empty and the literal "None" both mean the label was never set
pub fn is_unset_label(value: &str) -> bool {
    let value = value.trim();
    value.is_empty() || value == "None"
}

/// Logical OR over the group; an absent value counts as false
pub fn merge_boolean(primary: Option<bool>, matches: &[Option<bool>]) -> bool {
    primary.unwrap_or(false) || matches.iter().any(|m| m.unwrap_or(false))
}

/// First tier, in urgency order, held by the primary or any match
pub fn merge_priority_tier(primary: &str, matches: &[&str], tiers: &[&str], sentinel: &str) -> String {
    tiers
        .iter()
        .find(|tier| primary == **tier || matches.contains(*tier))
        .map(|tier| tier.to_string())
        .unwrap_or_else(|| sentinel.to_string())
}

/// Highest-priority recognised label in the group.
///
/// Without a recognised label, a set primary value is kept, then the first
/// set match, then the family default.
pub fn merge_labeled_category(primary: &str, matches: &[&str], policy: &LabelPolicy) -> String {
    if let Some(label) = policy
        .priority
        .iter()
        .find(|label| primary == **label || matches.contains(*label))
    {
        return label.to_string();
    }

    if !is_unset_label(primary) {
        return primary.to_string();
    }

    matches
        .iter()
        .find(|m| !is_unset_label(m))
        .map(|m| m.to_string())
        .unwrap_or_else(|| policy.default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_boolean() {
        // alive: false, [false, true] -> true
        assert!(merge_boolean(Some(false), &[Some(false), Some(true)]));
        assert!(merge_boolean(Some(true), &[Some(false)]));
        assert!(merge_boolean(None, &[None, Some(true)]));
        assert!(!merge_boolean(None, &[None, Some(false)]));
        assert!(!merge_boolean(Some(false), &[]));
    }

    #[test]
    fn test_observing_mode_from_match() {
        let merged = merge_priority_tier("No", &["None", "regular_long_event"], OBSERVING_MODE_TIERS, NO_PRIORITY);
        assert_eq!(merged, "regular_long_event");
    }

    #[test]
    fn test_observing_mode_primary_outranks() {
        let merged = merge_priority_tier(
            "priority_stellar_event",
            &["priority_long_event"],
            OBSERVING_MODE_TIERS,
            NO_PRIORITY,
        );
        assert_eq!(merged, "priority_stellar_event");

        let merged = merge_priority_tier(
            "regular_long_event",
            &["priority_stellar_event", "priority_long_event"],
            OBSERVING_MODE_TIERS,
            NO_PRIORITY,
        );
        assert_eq!(merged, "priority_stellar_event");
    }

    #[test]
    fn test_observing_mode_sentinel() {
        let merged = merge_priority_tier("None", &["", "No"], OBSERVING_MODE_TIERS, NO_PRIORITY);
        assert_eq!(merged, NO_PRIORITY);
    }

    #[test]
    fn test_classification_priority() {
        let merged = merge_labeled_category(
            "Microlensing binary",
            &["Microlensing PSPL", "Variable star"],
            &CLASSIFICATION_POLICY,
        );
        assert_eq!(merged, "Microlensing binary");

        let merged = merge_labeled_category(
            "Unclassified poor fit",
            &["Microlensing PSPL", "Variable star"],
            &CLASSIFICATION_POLICY,
        );
        assert_eq!(merged, "Microlensing PSPL");

        let merged = merge_labeled_category(
            "Unclassified poor fit",
            &["Microlensing PSPL", "Known Galaxy"],
            &CLASSIFICATION_POLICY,
        );
        assert_eq!(merged, "Microlensing PSPL");
    }

    #[test]
    fn test_unrecognised_labels_fall_back() {
        assert_eq!(
            merge_labeled_category("None", &["None", "None"], &CLASSIFICATION_POLICY),
            "Microlensing PSPL"
        );
        assert_eq!(
            merge_labeled_category("Known Galaxy", &["RR Lyrae"], &CLASSIFICATION_POLICY),
            "Known Galaxy"
        );
        assert_eq!(
            merge_labeled_category("None", &["", "RR Lyrae"], &CLASSIFICATION_POLICY),
            "RR Lyrae"
        );
    }

    #[test]
    fn test_category_priority() {
        assert_eq!(
            merge_labeled_category(
                "Microlensing stellar/planet",
                &["Stellar activity", "Unclassified"],
                &CATEGORY_POLICY
            ),
            "Microlensing stellar/planet"
        );
        assert_eq!(
            merge_labeled_category("Unclassified", &["Stellar activity", "Unclassified"], &CATEGORY_POLICY),
            "Stellar activity"
        );
        assert_eq!(
            merge_labeled_category(
                "Microlensing stellar/planet",
                &["Stellar activity", "Microlensing long-tE"],
                &CATEGORY_POLICY
            ),
            "Microlensing stellar/planet"
        );
        assert_eq!(
            merge_labeled_category("None", &["None", "None"], &CATEGORY_POLICY),
            "Microlensing stellar/planet"
        );
    }
}

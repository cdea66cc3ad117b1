//! Per-student feature attribution.
//!
//! Each feature's global model importance is scaled by how adverse this
//! student's own value is, then the six results are normalised to sum to one.
//! Global importance alone would rank features identically for every student;
//! per-student severity alone would ignore that some features are more
//! predictive than others for the loaded model.

use crate::classifier::GlobalImportance;
use crate::models::{AttributionMap, Feature, FeatureVector};

/// Streak length beyond which more missed classes add no further risk.
pub const STREAK_SATURATION: f64 = 15.0;

/// Risk factor for features whose direction of effect is not calibrated.
pub const NEUTRAL_RISK_FACTOR: f64 = 0.5;

/// Share of global importance a feature keeps when the student looks fine on it.
pub const IMPORTANCE_FLOOR: f64 = 0.5;

/// Direction in which a feature's value moves dropout risk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Polarity {
    /// Percentage where a low value is adverse.
    HigherIsBetter,
    /// Count where a high value is adverse, saturating at the given value.
    HigherIsWorse { saturation: f64 },
    /// No established direction.
    Neutral,
}

pub fn polarity(feature: Feature) -> Polarity {
    match feature {
        Feature::AttendanceRate | Feature::HomeworkCompletion | Feature::TestAvgScore => {
            Polarity::HigherIsBetter
        }
        Feature::MissedClassesStreak => Polarity::HigherIsWorse {
            saturation: STREAK_SATURATION,
        },
        Feature::CommunicationActivity | Feature::DaysEnrolled => Polarity::Neutral,
    }
}

/// Severity in [0, 1] of one value for one feature.
pub fn risk_factor(feature: Feature, value: f64) -> f64 {
    match polarity(feature) {
        Polarity::HigherIsBetter => (100.0 - value) / 100.0,
        Polarity::HigherIsWorse { saturation } => (value / saturation).min(1.0),
        Polarity::Neutral => NEUTRAL_RISK_FACTOR,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureAttributor;

impl FeatureAttributor {
    pub fn new() -> Self {
        Self
    }

    pub fn attribute(
        &self,
        features: &FeatureVector,
        importance: &GlobalImportance,
    ) -> AttributionMap {
        let mut weighted = combine(features, importance, 1.0);
        let mut total: f64 = weighted.iter().sum();
        if !total.is_finite() {
            // Importance this large overflows the sum; scaling it down first
            // leaves the normalised shares unchanged.
            weighted = combine(features, importance, importance.max_weight());
            total = weighted.iter().sum();
        }

        if total == 0.0 {
            return AttributionMap::zero();
        }
        AttributionMap::from_weights(weighted.map(|weight| weight / total))
    }
}

fn combine(
    features: &FeatureVector,
    importance: &GlobalImportance,
    scale: f64,
) -> [f64; Feature::COUNT] {
    let mut weighted = [0.0; Feature::COUNT];
    for feature in Feature::ALL {
        let severity = risk_factor(feature, features.value(feature));
        weighted[feature.index()] =
            importance.weight(feature) / scale * (IMPORTANCE_FLOOR + severity);
    }
    weighted
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn struggling_student() -> FeatureVector {
        FeatureVector::new(28.0, 25.0, 38.0, 0, 30, 8).unwrap()
    }

    #[test]
    fn percentage_features_invert() {
        assert_eq!(risk_factor(Feature::AttendanceRate, 100.0), 0.0);
        assert_eq!(risk_factor(Feature::AttendanceRate, 0.0), 1.0);
        assert!((risk_factor(Feature::TestAvgScore, 38.0) - 0.62).abs() < 1e-12);
    }

    #[test]
    fn streak_saturates_at_fifteen() {
        assert!((risk_factor(Feature::MissedClassesStreak, 8.0) - 8.0 / 15.0).abs() < 1e-12);
        assert!((risk_factor(Feature::MissedClassesStreak, 8.0) - 0.533).abs() < 1e-3);
        assert_eq!(risk_factor(Feature::MissedClassesStreak, 15.0), 1.0);
        assert_eq!(risk_factor(Feature::MissedClassesStreak, 40.0), 1.0);
    }

    #[test]
    fn uncalibrated_features_stay_neutral() {
        for value in [0.0, 18.0, 365.0] {
            assert_eq!(risk_factor(Feature::CommunicationActivity, value), 0.5);
            assert_eq!(risk_factor(Feature::DaysEnrolled, value), 0.5);
        }
    }

    #[test]
    fn uniform_importance_ranks_by_severity() {
        let map = FeatureAttributor::new()
            .attribute(&struggling_student(), &GlobalImportance::uniform());
        assert!((map.total() - 1.0).abs() < 1e-9);
        // Homework at 25% is the worst value for this student.
        assert_eq!(
            map.dominant().map(|(feature, _)| feature),
            Some(Feature::HomeworkCompletion)
        );

        // weighted = (1/6) * (0.5 + r); the 1/6 cancels on normalisation.
        let raw = [1.22, 1.25, 1.12, 1.0, 1.0, 0.5 + 8.0 / 15.0];
        let total: f64 = raw.iter().sum();
        for feature in Feature::ALL {
            let expected = raw[feature.index()] / total;
            assert!((map.get(feature) - expected).abs() < 1e-9, "{feature}");
        }
    }

    #[test]
    fn global_importance_scales_contribution() {
        let importance = GlobalImportance::uniform()
            .with(Feature::AttendanceRate, 0.0)
            .with(Feature::HomeworkCompletion, 0.0)
            .with(Feature::TestAvgScore, 0.0)
            .with(Feature::CommunicationActivity, 0.0)
            .with(Feature::DaysEnrolled, 0.0)
            .with(Feature::MissedClassesStreak, 3.0);
        let map = FeatureAttributor::new().attribute(&struggling_student(), &importance);
        assert_eq!(map.get(Feature::MissedClassesStreak), 1.0);
        assert_eq!(map.get(Feature::AttendanceRate), 0.0);
    }

    #[test]
    fn zero_importance_yields_all_zero_map() {
        let importance = Feature::ALL
            .into_iter()
            .fold(GlobalImportance::uniform(), |acc, feature| acc.with(feature, 0.0));
        let map = FeatureAttributor::new().attribute(&struggling_student(), &importance);
        assert!(map.is_zero());
        assert_eq!(map, AttributionMap::zero());
    }

    #[test]
    fn invalid_importance_never_reaches_the_map() {
        let importance = GlobalImportance::uniform()
            .with(Feature::AttendanceRate, -0.1)
            .with(Feature::HomeworkCompletion, f64::NAN);
        let map = FeatureAttributor::new().attribute(&struggling_student(), &importance);
        assert_eq!(
            map,
            FeatureAttributor::new().attribute(&struggling_student(), &GlobalImportance::uniform())
        );
        assert!(map.iter().all(|(_, weight)| weight >= 0.0));
    }

    #[test]
    fn huge_importance_is_rescaled_not_zeroed() {
        let importance = GlobalImportance::from_named([("f0", 1e308), ("f1", 1e308)]);
        let map = FeatureAttributor::new().attribute(&struggling_student(), &importance);
        assert!(!map.is_zero());
        assert!((map.total() - 1.0).abs() < 1e-9);
        // The defaulted 1/6 weights vanish next to 1e308.
        assert!((map.get(Feature::AttendanceRate) - 1.22 / 2.47).abs() < 1e-9);
        assert!((map.get(Feature::HomeworkCompletion) - 1.25 / 2.47).abs() < 1e-9);
        assert!(map.get(Feature::DaysEnrolled) < 1e-300);
    }

    #[test]
    fn attribution_is_deterministic() {
        let attributor = FeatureAttributor::new();
        let importance = GlobalImportance::from_named([("f0", 40.0), ("f5", 12.0)]);
        let first = attributor.attribute(&struggling_student(), &importance);
        let second = attributor.attribute(&struggling_student(), &importance);
        assert_eq!(first, second);
    }

    fn feature_vector() -> impl Strategy<Value = FeatureVector> {
        (
            0.0f64..=100.0,
            0.0f64..=100.0,
            0.0f64..=100.0,
            0u32..200,
            0u32..1000,
            0u32..60,
        )
            .prop_map(|(a, h, t, c, d, m)| FeatureVector::new(a, h, t, c, d, m).unwrap())
    }

    fn global_importance() -> impl Strategy<Value = GlobalImportance> {
        prop::collection::vec(prop::option::of(0.0f64..50.0), Feature::COUNT).prop_map(|weights| {
            Feature::ALL
                .into_iter()
                .zip(weights)
                .fold(GlobalImportance::uniform(), |acc, (feature, weight)| match weight {
                    Some(weight) => acc.with(feature, weight),
                    None => acc,
                })
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_weights_sum_to_one_or_zero(
            features in feature_vector(),
            importance in global_importance()
        ) {
            let map = FeatureAttributor::new().attribute(&features, &importance);
            prop_assert!(map.iter().all(|(_, weight)| weight >= 0.0));
            prop_assert!(map.is_zero() || (map.total() - 1.0).abs() < 1e-6);
        }

        #[test]
        fn prop_lower_attendance_never_lowers_risk(a in 0.0f64..=100.0, b in 0.0f64..=100.0) {
            let (lower, higher) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(
                risk_factor(Feature::AttendanceRate, lower)
                    >= risk_factor(Feature::AttendanceRate, higher)
            );
        }

        #[test]
        fn prop_risk_factor_in_unit_interval(features in feature_vector()) {
            for feature in Feature::ALL {
                let r = risk_factor(feature, features.value(feature));
                prop_assert!((0.0..=1.0).contains(&r));
            }
        }
    }
}

//! Classifier seam.
//!
//! The scoring core only needs two capabilities from a trained model: turning
//! a [`FeatureVector`] into a [`ClassifierOutput`], and reporting how much
//! each feature matters globally. Everything else about the model is opaque.

use tracing::warn;

use crate::error::ScoringError;
use crate::models::{ClassifierOutput, Feature, FeatureVector};

/// A loaded, read-only model shared across every scoring call.
///
/// Implementations must be deterministic: the same vector against the same
/// loaded artifact yields the same output.
pub trait RiskClassifier: Send + Sync {
    fn score(&self, features: &FeatureVector) -> Result<ClassifierOutput, ScoringError>;

    fn global_importance(&self) -> &GlobalImportance;
}

impl<C: RiskClassifier + ?Sized> RiskClassifier for Box<C> {
    fn score(&self, features: &FeatureVector) -> Result<ClassifierOutput, ScoringError> {
        (**self).score(features)
    }

    fn global_importance(&self) -> &GlobalImportance {
        (**self).global_importance()
    }
}

/// Model-wide importance per canonical feature.
///
/// Features the model never reported fall back to a uniform `1/6`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalImportance {
    weights: [Option<f64>; Feature::COUNT],
}

impl GlobalImportance {
    pub const DEFAULT_WEIGHT: f64 = 1.0 / Feature::COUNT as f64;

    /// Every feature at the default weight.
    pub fn uniform() -> Self {
        Self::default()
    }

    /// Builds importance from model-side names, translating positional names
    /// (`f0`..`f5`) to canonical features. Names that resolve to nothing and
    /// weights that are negative or non-finite are dropped.
    pub fn from_named<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: AsRef<str>,
    {
        let mut importance = Self::default();
        for (name, weight) in entries {
            let name = name.as_ref();
            let Some(feature) = canonical_feature(name) else {
                warn!(feature = name, "ignoring importance for unknown feature");
                continue;
            };
            importance.set(feature, weight);
        }
        importance
    }

    /// Overrides one feature's weight. Negative and non-finite weights are
    /// ignored, leaving the previous value in place.
    pub fn with(mut self, feature: Feature, weight: f64) -> Self {
        self.set(feature, weight);
        self
    }

    fn set(&mut self, feature: Feature, weight: f64) {
        if !weight.is_finite() || weight < 0.0 {
            warn!(%feature, weight, "ignoring invalid importance weight");
            return;
        }
        self.weights[feature.index()] = Some(weight);
    }

    /// Largest weight in effect across all features, defaults included.
    pub fn max_weight(&self) -> f64 {
        Feature::ALL
            .into_iter()
            .map(|feature| self.weight(feature))
            .fold(0.0, f64::max)
    }

    pub fn get(&self, feature: Feature) -> Option<f64> {
        self.weights[feature.index()]
    }

    pub fn weight(&self, feature: Feature) -> f64 {
        self.get(feature).unwrap_or(Self::DEFAULT_WEIGHT)
    }
}

/// Resolves a model-side feature name to its canonical feature.
///
/// Accepts canonical names as-is and positional names `f{index}` in canonical
/// declaration order.
pub fn canonical_feature(name: &str) -> Option<Feature> {
    if let Some(feature) = Feature::from_name(name) {
        return Some(feature);
    }
    let index: usize = name.strip_prefix('f')?.parse().ok()?;
    Feature::ALL.get(index).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translates_positional_names() {
        assert_eq!(canonical_feature("f0"), Some(Feature::AttendanceRate));
        assert_eq!(canonical_feature("f5"), Some(Feature::MissedClassesStreak));
        assert_eq!(canonical_feature("f6"), None);
        assert_eq!(canonical_feature("fx"), None);
        assert_eq!(
            canonical_feature("days_enrolled"),
            Some(Feature::DaysEnrolled)
        );
    }

    #[test]
    fn absent_features_default_to_uniform() {
        let importance = GlobalImportance::from_named([("f2", 12.0), ("attendance_rate", 30.0)]);
        assert_eq!(importance.weight(Feature::TestAvgScore), 12.0);
        assert_eq!(importance.weight(Feature::AttendanceRate), 30.0);
        assert!((importance.weight(Feature::DaysEnrolled) - 1.0 / 6.0).abs() < 1e-12);
        assert_eq!(importance.get(Feature::DaysEnrolled), None);
    }

    #[test]
    fn drops_unknown_and_invalid_entries() {
        let importance = GlobalImportance::from_named([
            ("payment_delays", 4.0),
            ("f1", -2.0),
            ("f3", f64::NAN),
        ]);
        assert_eq!(importance, GlobalImportance::uniform());
    }

    #[test]
    fn builder_ignores_negative_and_non_finite_weights() {
        let importance = GlobalImportance::uniform()
            .with(Feature::AttendanceRate, -0.1)
            .with(Feature::HomeworkCompletion, f64::NAN)
            .with(Feature::TestAvgScore, f64::INFINITY);
        assert_eq!(importance, GlobalImportance::uniform());

        let importance = GlobalImportance::uniform()
            .with(Feature::AttendanceRate, 4.0)
            .with(Feature::AttendanceRate, -1.0);
        assert_eq!(importance.get(Feature::AttendanceRate), Some(4.0));
        assert_eq!(importance.max_weight(), 4.0);
    }
}

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ScoringError;

/// The six canonical model inputs, in declaration order.
///
/// Declaration order doubles as the tie-break order for root-cause ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    AttendanceRate,
    HomeworkCompletion,
    TestAvgScore,
    CommunicationActivity,
    DaysEnrolled,
    MissedClassesStreak,
}

impl Feature {
    pub const COUNT: usize = 6;

    pub const ALL: [Feature; Feature::COUNT] = [
        Feature::AttendanceRate,
        Feature::HomeworkCompletion,
        Feature::TestAvgScore,
        Feature::CommunicationActivity,
        Feature::DaysEnrolled,
        Feature::MissedClassesStreak,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Feature::AttendanceRate => "attendance_rate",
            Feature::HomeworkCompletion => "homework_completion",
            Feature::TestAvgScore => "test_avg_score",
            Feature::CommunicationActivity => "communication_activity",
            Feature::DaysEnrolled => "days_enrolled",
            Feature::MissedClassesStreak => "missed_classes_streak",
        }
    }

    pub fn from_name(name: &str) -> Option<Feature> {
        Feature::ALL.into_iter().find(|feature| feature.name() == name)
    }

    /// Short label used in reports.
    pub fn label(self) -> &'static str {
        match self {
            Feature::AttendanceRate => "Attendance",
            Feature::HomeworkCompletion => "Homework",
            Feature::TestAvgScore => "Grades",
            Feature::CommunicationActivity => "Communication",
            Feature::DaysEnrolled => "Tenure",
            Feature::MissedClassesStreak => "Missed Classes",
        }
    }

    /// Chart colour used by dashboards for this feature.
    pub fn color(self) -> &'static str {
        match self {
            Feature::AttendanceRate => "#EF4444",
            Feature::HomeworkCompletion => "#F59E0B",
            Feature::TestAvgScore => "#3B82F6",
            Feature::CommunicationActivity => "#10B981",
            Feature::DaysEnrolled => "#6B7280",
            Feature::MissedClassesStreak => "#8B5CF6",
        }
    }

    fn is_percentage(self) -> bool {
        matches!(
            self,
            Feature::AttendanceRate | Feature::HomeworkCompletion | Feature::TestAvgScore
        )
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Unvalidated feature values as they arrive from storage or CSV.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawFeatures {
    pub attendance_rate: Option<f64>,
    pub homework_completion: Option<f64>,
    pub test_avg_score: Option<f64>,
    pub communication_activity: Option<f64>,
    pub days_enrolled: Option<f64>,
    pub missed_classes_streak: Option<f64>,
}

impl RawFeatures {
    fn get(&self, feature: Feature) -> Option<f64> {
        match feature {
            Feature::AttendanceRate => self.attendance_rate,
            Feature::HomeworkCompletion => self.homework_completion,
            Feature::TestAvgScore => self.test_avg_score,
            Feature::CommunicationActivity => self.communication_activity,
            Feature::DaysEnrolled => self.days_enrolled,
            Feature::MissedClassesStreak => self.missed_classes_streak,
        }
    }
}

/// Six validated observations about one student. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector {
    values: [f64; Feature::COUNT],
}

impl FeatureVector {
    pub fn new(
        attendance_rate: f64,
        homework_completion: f64,
        test_avg_score: f64,
        communication_activity: u32,
        days_enrolled: u32,
        missed_classes_streak: u32,
    ) -> Result<Self, ScoringError> {
        Self::from_values([
            attendance_rate,
            homework_completion,
            test_avg_score,
            f64::from(communication_activity),
            f64::from(days_enrolled),
            f64::from(missed_classes_streak),
        ])
    }

    /// Builds a vector from values in canonical order, rejecting anything out
    /// of range. Nothing is clamped.
    pub fn from_values(values: [f64; Feature::COUNT]) -> Result<Self, ScoringError> {
        for feature in Feature::ALL {
            let value = values[feature.index()];
            if !value.is_finite() {
                return Err(ScoringError::invalid(feature, format!("is not finite ({value})")));
            }
            if value < 0.0 {
                return Err(ScoringError::invalid(feature, format!("is negative ({value})")));
            }
            if feature.is_percentage() {
                if value > 100.0 {
                    return Err(ScoringError::invalid(
                        feature,
                        format!("exceeds 100 ({value})"),
                    ));
                }
            } else if value.fract() != 0.0 {
                return Err(ScoringError::invalid(
                    feature,
                    format!("must be a whole number ({value})"),
                ));
            }
        }

        Ok(Self { values })
    }

    pub fn value(&self, feature: Feature) -> f64 {
        self.values[feature.index()]
    }

    pub fn attendance_rate(&self) -> f64 {
        self.value(Feature::AttendanceRate)
    }

    pub fn homework_completion(&self) -> f64 {
        self.value(Feature::HomeworkCompletion)
    }

    pub fn test_avg_score(&self) -> f64 {
        self.value(Feature::TestAvgScore)
    }

    pub fn communication_activity(&self) -> u32 {
        self.value(Feature::CommunicationActivity) as u32
    }

    pub fn days_enrolled(&self) -> u32 {
        self.value(Feature::DaysEnrolled) as u32
    }

    pub fn missed_classes_streak(&self) -> u32 {
        self.value(Feature::MissedClassesStreak) as u32
    }
}

impl TryFrom<&RawFeatures> for FeatureVector {
    type Error = ScoringError;

    fn try_from(raw: &RawFeatures) -> Result<Self, Self::Error> {
        let mut values = [0.0; Feature::COUNT];
        for feature in Feature::ALL {
            values[feature.index()] = raw
                .get(feature)
                .ok_or_else(|| ScoringError::invalid(feature, "is missing"))?;
        }
        Self::from_values(values)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 3] = [RiskLevel::Low, RiskLevel::Medium, RiskLevel::High];

    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "Low",
            RiskLevel::Medium => "Medium",
            RiskLevel::High => "High",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw classifier output. A loaded model always emits the same variant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClassifierOutput {
    /// Probability of the adverse (churn) class.
    Churn(f64),
    /// Distribution over `[Low, Medium, High]`.
    Distribution([f64; 3]),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RiskAssessment {
    pub risk_level: RiskLevel,
    pub confidence: f64,
}

/// Per-feature contribution for one student.
///
/// Weights are non-negative and sum to 1, or are all zero.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AttributionMap {
    weights: [f64; Feature::COUNT],
}

impl AttributionMap {
    pub(crate) fn from_weights(weights: [f64; Feature::COUNT]) -> Self {
        Self { weights }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    pub fn get(&self, feature: Feature) -> f64 {
        self.weights[feature.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (Feature, f64)> + '_ {
        Feature::ALL.into_iter().map(|feature| (feature, self.get(feature)))
    }

    pub fn total(&self) -> f64 {
        self.weights.iter().sum()
    }

    pub fn is_zero(&self) -> bool {
        self.weights.iter().all(|weight| *weight == 0.0)
    }

    /// The feature with the largest weight, first in canonical order on ties.
    pub fn dominant(&self) -> Option<(Feature, f64)> {
        if self.is_zero() {
            return None;
        }
        self.iter()
            .fold(None, |best: Option<(Feature, f64)>, (feature, weight)| match best {
                Some((_, top)) if top >= weight => best,
                _ => Some((feature, weight)),
            })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RiskCounts {
    pub low: usize,
    pub medium: usize,
    pub high: usize,
}

impl RiskCounts {
    pub fn record(&mut self, level: RiskLevel) {
        match level {
            RiskLevel::Low => self.low += 1,
            RiskLevel::Medium => self.medium += 1,
            RiskLevel::High => self.high += 1,
        }
    }

    pub fn get(&self, level: RiskLevel) -> usize {
        match level {
            RiskLevel::Low => self.low,
            RiskLevel::Medium => self.medium,
            RiskLevel::High => self.high,
        }
    }

    pub fn total(&self) -> usize {
        self.low + self.medium + self.high
    }

    pub fn merge(self, other: RiskCounts) -> RiskCounts {
        RiskCounts {
            low: self.low + other.low,
            medium: self.medium + other.medium,
            high: self.high + other.high,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RootCause {
    pub feature: Feature,
    /// Share of the selected top-K total, in percent.
    pub percentage: f64,
    /// 1-based.
    pub rank: usize,
}

/// Cohort-level reduction over per-student results. Rebuilt on every call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CohortSummary {
    pub risk_counts: RiskCounts,
    pub root_causes: Vec<RootCause>,
    pub average_confidence: f64,
}

impl CohortSummary {
    pub fn total(&self) -> usize {
        self.risk_counts.total()
    }

    pub fn at_risk(&self) -> usize {
        self.risk_counts.high
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StudentProfile {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub course: String,
}

#[derive(Debug, Clone)]
pub struct StudentRecord {
    pub profile: StudentProfile,
    pub features: RawFeatures,
}

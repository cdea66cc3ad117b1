//! Dropout-risk scoring for student cohorts.
//!
//! A loaded classifier scores each student's six behavioural features; the
//! output is mapped to a [`RiskLevel`](models::RiskLevel) with a confidence,
//! each feature's share of the decision is attributed, and High-risk
//! attributions are reduced into ranked cohort root causes.

pub mod attribution;
pub mod booster;
pub mod classifier;
pub mod cohort;
pub mod engine;
pub mod error;
pub mod models;
pub mod risk;

pub use booster::GradientBoostedModel;
pub use classifier::{GlobalImportance, RiskClassifier};
pub use engine::{CohortRun, EngineConfig, RiskEngine, ScoredStudent, SkippedStudent};
pub use error::{ConfigError, ModelLoadError, ScoringError};
pub use models::{
    AttributionMap, ClassifierOutput, CohortSummary, Feature, FeatureVector, RawFeatures,
    RiskAssessment, RiskCounts, RiskLevel, RootCause, StudentProfile, StudentRecord,
};

//! Long-lived scoring handle.
//!
//! A [`RiskEngine`] is built once at startup around a loaded classifier and
//! passed by reference into every request. It holds no mutable state, so any
//! number of calls may run concurrently.

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::attribution::FeatureAttributor;
use crate::classifier::RiskClassifier;
use crate::cohort::{CohortAggregator, DEFAULT_TOP_K};
use crate::error::{ConfigError, ScoringError};
use crate::models::{AttributionMap, CohortSummary, FeatureVector, RawFeatures, RiskAssessment};
use crate::risk::{RiskLevelMapper, RiskThresholds};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineConfig {
    pub thresholds: RiskThresholds,
    pub top_k: usize,
}

impl EngineConfig {
    pub fn new(low: f64, high: f64, top_k: usize) -> Result<Self, ConfigError> {
        if top_k == 0 {
            return Err(ConfigError::InvalidTopK(top_k));
        }
        Ok(Self {
            thresholds: RiskThresholds::new(low, high)?,
            top_k,
        })
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            thresholds: RiskThresholds::default(),
            top_k: DEFAULT_TOP_K,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScoredStudent<I> {
    pub id: I,
    pub assessment: RiskAssessment,
    pub attribution: AttributionMap,
}

#[derive(Debug, Clone)]
pub struct SkippedStudent<I> {
    pub id: I,
    pub error: ScoringError,
}

/// Outcome of scoring a whole cohort.
///
/// Failures never abort the batch: each one is recorded in `skipped` and the
/// summary covers every student that scored.
#[derive(Debug, Clone)]
pub struct CohortRun<I> {
    pub scored: Vec<ScoredStudent<I>>,
    pub skipped: Vec<SkippedStudent<I>>,
    pub summary: CohortSummary,
}

pub struct RiskEngine<C> {
    classifier: C,
    mapper: RiskLevelMapper,
    attributor: FeatureAttributor,
    aggregator: CohortAggregator,
}

impl<C: RiskClassifier> RiskEngine<C> {
    pub fn new(classifier: C, config: EngineConfig) -> Self {
        Self {
            classifier,
            mapper: RiskLevelMapper::new(config.thresholds),
            attributor: FeatureAttributor::new(),
            aggregator: CohortAggregator::new(config.top_k),
        }
    }

    pub fn classifier(&self) -> &C {
        &self.classifier
    }

    pub fn thresholds(&self) -> &RiskThresholds {
        self.mapper.thresholds()
    }

    pub fn classify_one(&self, features: &FeatureVector) -> Result<RiskAssessment, ScoringError> {
        let output = self.classifier.score(features)?;
        self.mapper.classify(output)
    }

    pub fn attribute_one(&self, features: &FeatureVector) -> AttributionMap {
        self.attributor
            .attribute(features, self.classifier.global_importance())
    }

    pub fn assess_one(
        &self,
        features: &FeatureVector,
    ) -> Result<(RiskAssessment, AttributionMap), ScoringError> {
        let assessment = self.classify_one(features)?;
        let attribution = self.attribute_one(features);
        debug!(
            risk_level = %assessment.risk_level,
            confidence = assessment.confidence,
            "assessed student"
        );
        Ok((assessment, attribution))
    }

    /// Summarises results that were already computed.
    pub fn summarize(&self, results: &[(RiskAssessment, AttributionMap)]) -> CohortSummary {
        self.aggregator.aggregate_par(results)
    }

    /// Scores validated vectors, keyed by their position in `cohort`.
    pub fn summarize_features(&self, cohort: &[FeatureVector]) -> CohortRun<usize> {
        let students: Vec<(usize, Result<FeatureVector, ScoringError>)> =
            cohort.iter().copied().map(Ok).enumerate().collect();
        self.run(students)
    }

    /// Validates and scores raw rows, collecting per-student failures.
    pub fn assess_cohort<I: Send>(&self, students: Vec<(I, RawFeatures)>) -> CohortRun<I> {
        let students = students
            .into_iter()
            .map(|(id, raw)| (id, FeatureVector::try_from(&raw)))
            .collect();
        self.run(students)
    }

    fn run<I: Send>(
        &self,
        students: Vec<(I, Result<FeatureVector, ScoringError>)>,
    ) -> CohortRun<I> {
        let outcomes: Vec<(I, Result<(RiskAssessment, AttributionMap), ScoringError>)> = students
            .into_par_iter()
            .map(|(id, features)| {
                let outcome = features.and_then(|features| self.assess_one(&features));
                (id, outcome)
            })
            .collect();

        let mut scored = Vec::with_capacity(outcomes.len());
        let mut skipped = Vec::new();
        for (id, outcome) in outcomes {
            match outcome {
                Ok((assessment, attribution)) => scored.push(ScoredStudent {
                    id,
                    assessment,
                    attribution,
                }),
                Err(error) => {
                    warn!(%error, "skipping student");
                    skipped.push(SkippedStudent { id, error });
                }
            }
        }

        let results: Vec<(RiskAssessment, AttributionMap)> = scored
            .iter()
            .map(|student| (student.assessment, student.attribution))
            .collect();
        let summary = self.summarize(&results);
        info!(
            scored = scored.len(),
            skipped = skipped.len(),
            high = summary.at_risk(),
            "cohort scored"
        );

        CohortRun {
            scored,
            skipped,
            summary,
        }
    }
}

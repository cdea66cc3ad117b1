//! Cohort-level reduction of per-student results.
//!
//! Root causes only consider High-risk students: the question answered is why
//! at-risk students are at risk, not what drives the whole population.
//! Partial totals may be built per shard and merged; top-K selection and
//! percentage scaling happen once, in [`CohortAggregator::finish`].

use rayon::prelude::*;

use crate::models::{
    AttributionMap, CohortSummary, Feature, RiskAssessment, RiskCounts, RiskLevel, RootCause,
};

pub const DEFAULT_TOP_K: usize = 5;

/// Units per 1.0 when accumulating weights and confidences.
///
/// Each value in [0, 1] is rounded once to a multiple of 2^-52 and summed as
/// an integer. Integer addition is associative, so totals, percentages and
/// root-cause ties do not depend on input order or on how rayon splits the
/// work. Two features tie only when their fixed-point sums are exactly equal.
const FIXED_POINT_SCALE: f64 = (1u64 << 52) as f64;

fn to_fixed(value: f64) -> u128 {
    (value * FIXED_POINT_SCALE).round() as u128
}

fn from_fixed(units: u128) -> f64 {
    units as f64 / FIXED_POINT_SCALE
}

/// Running totals for one shard of a cohort.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CohortTotals {
    counts: RiskCounts,
    confidence_sum: u128,
    high_risk_weights: [u128; Feature::COUNT],
}

impl CohortTotals {
    pub fn record(&mut self, assessment: &RiskAssessment, attribution: &AttributionMap) {
        self.counts.record(assessment.risk_level);
        self.confidence_sum += to_fixed(assessment.confidence);
        if assessment.risk_level == RiskLevel::High {
            for (feature, weight) in attribution.iter() {
                self.high_risk_weights[feature.index()] += to_fixed(weight);
            }
        }
    }

    pub fn merge(self, other: CohortTotals) -> CohortTotals {
        let mut high_risk_weights = self.high_risk_weights;
        for (total, weight) in high_risk_weights.iter_mut().zip(other.high_risk_weights) {
            *total += weight;
        }
        CohortTotals {
            counts: self.counts.merge(other.counts),
            confidence_sum: self.confidence_sum + other.confidence_sum,
            high_risk_weights,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CohortAggregator {
    top_k: usize,
}

impl Default for CohortAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_TOP_K)
    }
}

impl CohortAggregator {
    /// `top_k` is capped at the number of features.
    pub fn new(top_k: usize) -> Self {
        Self {
            top_k: top_k.min(Feature::COUNT),
        }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    pub fn aggregate<'a, I>(&self, results: I) -> CohortSummary
    where
        I: IntoIterator<Item = (&'a RiskAssessment, &'a AttributionMap)>,
    {
        let totals = results
            .into_iter()
            .fold(CohortTotals::default(), |mut totals, (assessment, attribution)| {
                totals.record(assessment, attribution);
                totals
            });
        self.finish(totals)
    }

    /// Same result as [`aggregate`](Self::aggregate), folding shards on the
    /// rayon pool and merging them before a single `finish`.
    pub fn aggregate_par(&self, results: &[(RiskAssessment, AttributionMap)]) -> CohortSummary {
        let totals = results
            .par_iter()
            .fold(CohortTotals::default, |mut totals, (assessment, attribution)| {
                totals.record(assessment, attribution);
                totals
            })
            .reduce(CohortTotals::default, CohortTotals::merge);
        self.finish(totals)
    }

    pub fn finish(&self, totals: CohortTotals) -> CohortSummary {
        let total = totals.counts.total();
        let average_confidence = if total == 0 {
            0.0
        } else {
            from_fixed(totals.confidence_sum) / total as f64
        };

        CohortSummary {
            risk_counts: totals.counts,
            root_causes: self.root_causes(&totals),
            average_confidence,
        }
    }

    fn root_causes(&self, totals: &CohortTotals) -> Vec<RootCause> {
        if totals.counts.high == 0 {
            return Vec::new();
        }

        let mut ranked: Vec<(Feature, u128)> = Feature::ALL
            .into_iter()
            .map(|feature| (feature, totals.high_risk_weights[feature.index()]))
            .collect();
        ranked.sort_by_key(|(feature, weight)| (std::cmp::Reverse(*weight), feature.index()));
        ranked.truncate(self.top_k);

        let selected = from_fixed(ranked.iter().map(|(_, weight)| weight).sum());
        ranked
            .into_iter()
            .enumerate()
            .map(|(position, (feature, weight))| RootCause {
                feature,
                percentage: if selected > 0.0 {
                    from_fixed(weight) / selected * 100.0
                } else {
                    0.0
                },
                rank: position + 1,
            })
            .collect()
    }
}

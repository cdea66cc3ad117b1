use crate::error::{ConfigError, ScoringError};
use crate::models::{ClassifierOutput, RiskAssessment, RiskLevel};

/// Tolerance for a three-way distribution summing to one.
const DISTRIBUTION_TOLERANCE: f64 = 1e-6;

/// Cut points for the churn-probability policy.
///
/// `p < low` is Low, `low <= p < high` is Medium, `p >= high` is High. The
/// defaults sit below the midpoint to favour recall on at-risk students.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskThresholds {
    low: f64,
    high: f64,
}

impl RiskThresholds {
    pub const DEFAULT_LOW: f64 = 0.40;
    pub const DEFAULT_HIGH: f64 = 0.70;

    pub fn new(low: f64, high: f64) -> Result<Self, ConfigError> {
        let valid = low.is_finite() && high.is_finite() && 0.0 <= low && low < high && high <= 1.0;
        if !valid {
            return Err(ConfigError::InvalidThresholds { low, high });
        }
        Ok(Self { low, high })
    }

    pub fn low(&self) -> f64 {
        self.low
    }

    pub fn high(&self) -> f64 {
        self.high
    }

    pub fn level_for(&self, churn_probability: f64) -> RiskLevel {
        match churn_probability {
            p if p < self.low => RiskLevel::Low,
            p if p < self.high => RiskLevel::Medium,
            _ => RiskLevel::High,
        }
    }
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            low: Self::DEFAULT_LOW,
            high: Self::DEFAULT_HIGH,
        }
    }
}

/// Turns raw classifier output into a risk level and confidence.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RiskLevelMapper {
    thresholds: RiskThresholds,
}

impl RiskLevelMapper {
    pub fn new(thresholds: RiskThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &RiskThresholds {
        &self.thresholds
    }

    pub fn classify(&self, output: ClassifierOutput) -> Result<RiskAssessment, ScoringError> {
        match output {
            ClassifierOutput::Churn(p) => self.classify_churn(p),
            ClassifierOutput::Distribution(probs) => classify_distribution(probs),
        }
    }

    /// Confidence is distance from the uninformative point 0.5, scaled to
    /// [0, 1]. It is not a class probability.
    fn classify_churn(&self, p: f64) -> Result<RiskAssessment, ScoringError> {
        if !p.is_finite() || !(0.0..=1.0).contains(&p) {
            return Err(ScoringError::DegenerateOutput(format!(
                "churn probability {p} outside [0, 1]"
            )));
        }

        Ok(RiskAssessment {
            risk_level: self.thresholds.level_for(p),
            confidence: ((p - 0.5).abs() * 2.0).clamp(0.0, 1.0),
        })
    }
}

/// Arg-max over `[Low, Medium, High]`; ties go to the higher-risk class.
fn classify_distribution(probs: [f64; 3]) -> Result<RiskAssessment, ScoringError> {
    if probs.iter().any(|p| !p.is_finite() || *p < 0.0) {
        return Err(ScoringError::DegenerateOutput(format!(
            "distribution {probs:?} has invalid entries"
        )));
    }
    let total: f64 = probs.iter().sum();
    if total == 0.0 {
        return Err(ScoringError::DegenerateOutput(
            "distribution carries no probability mass".to_string(),
        ));
    }
    if (total - 1.0).abs() > DISTRIBUTION_TOLERANCE {
        return Err(ScoringError::DegenerateOutput(format!(
            "distribution sums to {total}, expected 1"
        )));
    }

    let mut chosen = RiskLevel::Low;
    for level in RiskLevel::ALL {
        if probs[level as usize] >= probs[chosen as usize] {
            chosen = level;
        }
    }

    Ok(RiskAssessment {
        risk_level: chosen,
        confidence: probs[chosen as usize],
    })
}

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::config::ScoringConfig;
use super::domain::{Dimension, DimensionTuple, Stratum};
use super::engine::VisitScoringError;
use crate::aggregates::AggregateStore;
use crate::config::ConfigError;

const MEAN_EPSILON: f64 = 1e-9;

/// Cut points separating Low / Moderate / High volatility.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolatilityThresholds {
    pub low: f64,
    pub high: f64,
}

impl Default for VolatilityThresholds {
    fn default() -> Self {
        Self {
            low: 0.3,
            high: 0.7,
        }
    }
}

impl VolatilityThresholds {
    pub fn classify(&self, score: f64) -> VolatilityClass {
        if score < self.low {
            VolatilityClass::Low
        } else if score < self.high {
            VolatilityClass::Moderate
        } else {
            VolatilityClass::High
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [("volatility_low", self.low), ("volatility_high", self.high)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidParameter {
                    name,
                    value,
                    expected: "within [0, 1]",
                });
            }
        }
        if self.low >= self.high {
            return Err(ConfigError::InvertedVolatilityThresholds {
                low: self.low,
                high: self.high,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VolatilityClass {
    Low,
    Moderate,
    High,
}

impl VolatilityClass {
    pub fn label(self) -> &'static str {
        match self {
            VolatilityClass::Low => "Low",
            VolatilityClass::Moderate => "Moderate",
            VolatilityClass::High => "High",
        }
    }
}

/// Temporal stability of a stratum's estimate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolatilityReport {
    pub volatility_score: f64,
    pub coefficient_of_variation: f64,
    pub classification: VolatilityClass,
    /// Most recent window first.
    pub window_probabilities: Vec<f64>,
}

/// Population standard deviation over mean; 0 when the mean is effectively zero.
pub fn coefficient_of_variation(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let count = values.len() as f64;
    let mean = values.iter().sum::<f64>() / count;
    if mean.abs() < MEAN_EPSILON {
        return 0.0;
    }
    let variance = values
        .iter()
        .map(|value| (value - mean).powi(2))
        .sum::<f64>()
        / count;
    variance.sqrt() / mean
}

/// Maps a coefficient of variation onto `[0, 1)`; `reference_cv` scores exactly 0.5.
pub fn normalize_volatility(cv: f64, reference_cv: f64) -> f64 {
    let cv = cv.abs();
    (cv / (cv + reference_cv)).clamp(0.0, 1.0)
}

/// Builds a report from per-window probabilities, or `None` with fewer than two windows.
pub fn analyze_windows(
    window_probabilities: Vec<f64>,
    thresholds: &VolatilityThresholds,
    reference_cv: f64,
) -> Option<VolatilityReport> {
    if window_probabilities.len() < 2 {
        return None;
    }

    let coefficient_of_variation = coefficient_of_variation(&window_probabilities);
    let volatility_score = normalize_volatility(coefficient_of_variation, reference_cv);

    Some(VolatilityReport {
        volatility_score,
        coefficient_of_variation,
        classification: thresholds.classify(volatility_score),
        window_probabilities,
    })
}

/// Queries trailing windows for the chosen stratum and measures their spread.
pub struct VolatilityAnalyzer<'a> {
    config: &'a ScoringConfig,
}

impl<'a> VolatilityAnalyzer<'a> {
    pub fn new(config: &'a ScoringConfig) -> Self {
        Self { config }
    }

    pub fn analyze<S>(
        &self,
        store: &S,
        chosen: &DimensionTuple,
        as_of: NaiveDate,
    ) -> Result<Option<VolatilityReport>, VisitScoringError>
    where
        S: AggregateStore + ?Sized,
    {
        // The windows are the time axis, so the bucket itself is relaxed.
        let tuple = chosen.widen(Dimension::TimeBucket);
        let windows = store.query_time_windows(&tuple, as_of, self.config.volatility_windows)?;

        let mut probabilities = Vec::with_capacity(windows.len());
        for counts in windows {
            let stratum = Stratum::try_from(counts)?;
            if let Some(probability) = stratum.probability() {
                probabilities.push(probability);
            }
        }

        debug!(
            stratum = %tuple,
            windows_with_data = probabilities.len(),
            "volatility windows collected"
        );

        Ok(analyze_windows(
            probabilities,
            &self.config.volatility,
            self.config.volatility_reference_cv,
        ))
    }
}

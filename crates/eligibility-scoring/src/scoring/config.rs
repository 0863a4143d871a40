use serde::{Deserialize, Serialize};

use super::categorical::RiskRule;
use super::domain::Dimension;
use super::volatility::VolatilityThresholds;
use crate::config::ConfigError;

pub const DEFAULT_SCORING_VERSION: &str = "backoff-wilson-v1";

/// Five years of monthly windows.
pub const MAX_VOLATILITY_WINDOWS: usize = 60;

/// Policy knobs for the scoring engine. Validated once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub min_sample_size: u64,
    pub confidence_level: f64,
    pub precedence: Vec<Dimension>,
    pub recency_half_life_days: f64,
    pub volatility: VolatilityThresholds,
    pub volatility_windows: usize,
    pub volatility_reference_cv: f64,
    pub disagreement_penalty: f64,
    pub scoring_version: String,
    #[serde(default)]
    pub risk_rules: Vec<RiskRule>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            min_sample_size: 30,
            confidence_level: 0.95,
            precedence: Dimension::DEFAULT_PRECEDENCE.to_vec(),
            recency_half_life_days: 90.0,
            volatility: VolatilityThresholds::default(),
            volatility_windows: 6,
            volatility_reference_cv: 0.25,
            disagreement_penalty: 1.0,
            scoring_version: DEFAULT_SCORING_VERSION.to_string(),
            risk_rules: Vec::new(),
        }
    }
}

impl ScoringConfig {
    pub fn builder() -> ScoringConfigBuilder {
        ScoringConfigBuilder {
            config: Self::default(),
        }
    }

    /// Number of relaxation steps the backoff estimator may take.
    pub fn max_levels(&self) -> usize {
        self.precedence.len()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_sample_size == 0 {
            return Err(ConfigError::InvalidMinSample(0));
        }

        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return Err(ConfigError::InvalidParameter {
                name: "confidence_level",
                value: self.confidence_level,
                expected: "strictly between 0 and 1",
            });
        }

        validate_precedence(&self.precedence)?;

        if !(self.recency_half_life_days.is_finite() && self.recency_half_life_days > 0.0) {
            return Err(ConfigError::InvalidParameter {
                name: "recency_half_life_days",
                value: self.recency_half_life_days,
                expected: "a positive number of days",
            });
        }

        self.volatility.validate()?;

        if !(2..=MAX_VOLATILITY_WINDOWS).contains(&self.volatility_windows) {
            return Err(ConfigError::InvalidParameter {
                name: "volatility_windows",
                value: self.volatility_windows as f64,
                expected: "between 2 and 60 windows",
            });
        }

        if !(self.volatility_reference_cv.is_finite() && self.volatility_reference_cv > 0.0) {
            return Err(ConfigError::InvalidParameter {
                name: "volatility_reference_cv",
                value: self.volatility_reference_cv,
                expected: "a positive coefficient of variation",
            });
        }

        if !(0.0..=2.0).contains(&self.disagreement_penalty) {
            return Err(ConfigError::InvalidParameter {
                name: "disagreement_penalty",
                value: self.disagreement_penalty,
                expected: "within [0, 2]",
            });
        }

        if self.scoring_version.trim().is_empty() {
            return Err(ConfigError::MissingScoringVersion);
        }

        for rule in &self.risk_rules {
            rule.validate()?;
        }

        Ok(())
    }
}

fn validate_precedence(precedence: &[Dimension]) -> Result<(), ConfigError> {
    for dimension in Dimension::ALL {
        let occurrences = precedence.iter().filter(|entry| **entry == dimension).count();
        if occurrences != 1 {
            return Err(ConfigError::InvalidPrecedence(format!(
                "`{}` must appear exactly once (found {occurrences})",
                dimension.key()
            )));
        }
    }
    Ok(())
}

/// Parse a comma separated precedence list such as `time_bucket,region,visit_type,plan,payer`.
pub fn parse_precedence(raw: &str) -> Result<Vec<Dimension>, ConfigError> {
    let precedence = raw
        .split(',')
        .filter(|entry| !entry.trim().is_empty())
        .map(|entry| {
            Dimension::parse(entry)
                .ok_or_else(|| ConfigError::InvalidPrecedence(format!("unknown dimension `{}`", entry.trim())))
        })
        .collect::<Result<Vec<_>, _>>()?;
    validate_precedence(&precedence)?;
    Ok(precedence)
}

/// Builder so callers can experiment with policy without touching defaults.
#[derive(Debug, Clone)]
pub struct ScoringConfigBuilder {
    config: ScoringConfig,
}

impl ScoringConfigBuilder {
    pub fn min_sample_size(mut self, value: u64) -> Self {
        self.config.min_sample_size = value;
        self
    }

    pub fn confidence_level(mut self, value: f64) -> Self {
        self.config.confidence_level = value;
        self
    }

    pub fn precedence(mut self, value: Vec<Dimension>) -> Self {
        self.config.precedence = value;
        self
    }

    pub fn recency_half_life_days(mut self, value: f64) -> Self {
        self.config.recency_half_life_days = value;
        self
    }

    pub fn volatility_thresholds(mut self, low: f64, high: f64) -> Self {
        self.config.volatility = VolatilityThresholds { low, high };
        self
    }

    pub fn volatility_windows(mut self, value: usize) -> Self {
        self.config.volatility_windows = value;
        self
    }

    pub fn volatility_reference_cv(mut self, value: f64) -> Self {
        self.config.volatility_reference_cv = value;
        self
    }

    pub fn disagreement_penalty(mut self, value: f64) -> Self {
        self.config.disagreement_penalty = value;
        self
    }

    pub fn scoring_version(mut self, value: impl Into<String>) -> Self {
        self.config.scoring_version = value.into();
        self
    }

    pub fn risk_rules(mut self, rules: Vec<RiskRule>) -> Self {
        self.config.risk_rules = rules;
        self
    }

    pub fn build(self) -> Result<ScoringConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ScoringConfig::builder().build().expect("defaults validate");
        assert_eq!(config.min_sample_size, 30);
        assert_eq!(config.max_levels(), 5);
        assert_eq!(config.precedence[0], Dimension::TimeBucket);
        assert_eq!(config.volatility.low, 0.3);
        assert_eq!(config.volatility.high, 0.7);
    }

    #[test]
    fn rejects_zero_min_sample() {
        let result = ScoringConfig::builder().min_sample_size(0).build();
        assert!(matches!(result, Err(ConfigError::InvalidMinSample(0))));
    }

    #[test]
    fn rejects_thresholds_outside_unit_interval() {
        let result = ScoringConfig::builder()
            .volatility_thresholds(0.3, 1.4)
            .build();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidParameter {
                name: "volatility_high",
                ..
            })
        ));

        let inverted = ScoringConfig::builder()
            .volatility_thresholds(0.7, 0.3)
            .build();
        assert!(matches!(
            inverted,
            Err(ConfigError::InvertedVolatilityThresholds { .. })
        ));
    }

    #[test]
    fn volatility_windows_are_bounded() {
        for windows in [1, MAX_VOLATILITY_WINDOWS + 1, usize::MAX] {
            let result = ScoringConfig::builder().volatility_windows(windows).build();
            assert!(matches!(
                result,
                Err(ConfigError::InvalidParameter {
                    name: "volatility_windows",
                    ..
                })
            ));
        }

        let widest = ScoringConfig::builder()
            .volatility_windows(MAX_VOLATILITY_WINDOWS)
            .build()
            .expect("upper bound is inclusive");
        assert_eq!(widest.volatility_windows, 60);
    }

    #[test]
    fn rejects_confidence_level_of_one() {
        let result = ScoringConfig::builder().confidence_level(1.0).build();
        assert!(matches!(
            result,
            Err(ConfigError::InvalidParameter {
                name: "confidence_level",
                ..
            })
        ));
    }

    #[test]
    fn precedence_must_be_a_permutation() {
        let parsed = parse_precedence("payer, plan,visit_type,region,time_bucket")
            .expect("permutation parses");
        assert_eq!(parsed[0], Dimension::Payer);

        assert!(matches!(
            parse_precedence("payer,plan,region,time_bucket"),
            Err(ConfigError::InvalidPrecedence(_))
        ));
        assert!(matches!(
            parse_precedence("payer,plan,visit_type,region,zipcode"),
            Err(ConfigError::InvalidPrecedence(_))
        ));
        assert!(ScoringConfig::builder()
            .precedence(vec![Dimension::Payer; 5])
            .build()
            .is_err());
    }
}

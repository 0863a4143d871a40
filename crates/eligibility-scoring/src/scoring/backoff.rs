use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, warn};

use super::confidence::ConfidenceCalculator;
use super::config::ScoringConfig;
use super::domain::{DimensionTuple, InvalidStratum, Stratum};
use super::engine::VisitScoringError;
use crate::aggregates::AggregateStore;

/// One attempted level of the backoff waterfall.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackoffStep {
    pub level: usize,
    pub dimensions_str: String,
    pub stratum: Stratum,
    pub probability: Option<f64>,
    pub ci_width: Option<f64>,
}

/// Result of walking the dimension hierarchy.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffOutcome {
    pub chosen_level: usize,
    pub chosen_dimensions: DimensionTuple,
    pub stratum: Stratum,
    pub path: Vec<BackoffStep>,
    /// Whether the chosen stratum met the minimum sample size.
    pub sufficient: bool,
}

impl BackoffOutcome {
    /// True when even the global stratum has no observations.
    pub fn is_no_data(&self) -> bool {
        self.stratum.is_empty()
    }
}

/// Relaxes one dimension at a time until a stratum carries `MIN_N` observations.
pub struct BackoffEstimator<'a> {
    config: &'a ScoringConfig,
    calculator: ConfidenceCalculator,
}

impl<'a> BackoffEstimator<'a> {
    pub fn new(config: &'a ScoringConfig, calculator: ConfidenceCalculator) -> Self {
        Self { config, calculator }
    }

    pub fn estimate<S>(
        &self,
        store: &S,
        dimensions: &DimensionTuple,
        as_of: NaiveDate,
    ) -> Result<BackoffOutcome, VisitScoringError>
    where
        S: AggregateStore + ?Sized,
    {
        let max_levels = self.config.max_levels();
        let mut tuple = dimensions.clone();
        let mut path: Vec<BackoffStep> = Vec::with_capacity(max_levels + 1);

        for level in 0..=max_levels {
            if level > 0 {
                tuple = tuple.widen(self.config.precedence[level - 1]);
            }

            let stratum = Stratum::try_from(store.query_stratum(&tuple, as_of)?)?;
            if let Some(previous) = path.last() {
                if stratum.sample_size() < previous.stratum.sample_size() {
                    return Err(InvalidStratum::ShrinkingRelaxation {
                        level,
                        previous: previous.stratum.sample_size(),
                        current: stratum.sample_size(),
                    }
                    .into());
                }
            }

            let estimate = self.calculator.estimate(&stratum);
            let step = BackoffStep {
                level,
                dimensions_str: tuple.describe(),
                stratum,
                probability: estimate.probability,
                ci_width: estimate.probability.map(|_| estimate.interval.width()),
            };
            debug!(
                level,
                stratum = %step.dimensions_str,
                sample_size = stratum.sample_size(),
                "backoff level queried"
            );
            path.push(step);

            if stratum.sample_size() >= self.config.min_sample_size {
                return Ok(BackoffOutcome {
                    chosen_level: level,
                    chosen_dimensions: tuple,
                    stratum,
                    path,
                    sufficient: true,
                });
            }
        }

        // The loop always runs at least once, so the global stratum is the last step.
        let global = path
            .last()
            .map(|step| step.stratum)
            .unwrap_or_else(|| Stratum::no_data(as_of));
        let stratum = if global.is_empty() {
            Stratum::no_data(as_of)
        } else {
            global
        };

        warn!(
            requested = %dimensions,
            sample_size = stratum.sample_size(),
            min_sample_size = self.config.min_sample_size,
            "no stratum met the minimum sample size; using the global stratum"
        );

        Ok(BackoffOutcome {
            chosen_level: max_levels,
            chosen_dimensions: tuple,
            stratum,
            path,
            sufficient: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::domain::Dimension;
    use crate::scoring::tests::common::{backoff_once_store, specific_tuple, ScriptedStore};

    fn config() -> ScoringConfig {
        ScoringConfig::default()
    }

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 30).expect("valid date")
    }

    #[test]
    fn stops_at_first_sufficient_level() {
        let config = config();
        let estimator = BackoffEstimator::new(&config, ConfidenceCalculator::new(&config));
        let store = backoff_once_store(as_of());

        let outcome = estimator
            .estimate(&store, &specific_tuple(), as_of())
            .expect("backoff succeeds");

        assert_eq!(outcome.chosen_level, 1);
        assert!(outcome.sufficient);
        assert_eq!(outcome.path.len(), 2);
        assert_eq!(outcome.stratum.successes(), 28);
        assert!(outcome.chosen_dimensions.time_bucket.is_none());
        assert_eq!(outcome.path[0].probability, Some(1.0));
    }

    #[test]
    fn falls_back_to_global_even_when_insufficient() {
        let config = config();
        let estimator = BackoffEstimator::new(&config, ConfidenceCalculator::new(&config));
        let store = ScriptedStore::default().with(DimensionTuple::global(), 12, 9, as_of());

        let outcome = estimator
            .estimate(&store, &specific_tuple(), as_of())
            .expect("backoff succeeds");

        assert_eq!(outcome.chosen_level, 5);
        assert!(!outcome.sufficient);
        assert!(outcome.chosen_dimensions.is_global());
        assert_eq!(outcome.path.len(), 6);
        assert_eq!(outcome.stratum.sample_size(), 12);
        assert!(!outcome.is_no_data());
    }

    #[test]
    fn empty_history_returns_no_data_sentinel() {
        let config = config();
        let estimator = BackoffEstimator::new(&config, ConfidenceCalculator::new(&config));

        let outcome = estimator
            .estimate(&ScriptedStore::default(), &specific_tuple(), as_of())
            .expect("empty history is not an error");

        assert!(outcome.is_no_data());
        assert!(outcome.path.iter().all(|step| step.probability.is_none()));
        assert!(outcome.path.iter().all(|step| step.ci_width.is_none()));
    }

    #[test]
    fn precedence_controls_which_dimension_relaxes_first() {
        let config = ScoringConfig::builder()
            .precedence(vec![
                Dimension::Payer,
                Dimension::Plan,
                Dimension::VisitType,
                Dimension::Region,
                Dimension::TimeBucket,
            ])
            .build()
            .expect("valid config");
        let estimator = BackoffEstimator::new(&config, ConfidenceCalculator::new(&config));
        let store = ScriptedStore::default()
            .with(specific_tuple(), 3, 2, as_of())
            .with(specific_tuple().widen(Dimension::Payer), 60, 45, as_of());

        let outcome = estimator
            .estimate(&store, &specific_tuple(), as_of())
            .expect("backoff succeeds");

        assert_eq!(outcome.chosen_level, 1);
        assert!(outcome.chosen_dimensions.payer.is_none());
        assert!(outcome.path[1].dimensions_str.starts_with("payer=*"));
    }

    #[test]
    fn invalid_counts_fail_fast() {
        let config = config();
        let estimator = BackoffEstimator::new(&config, ConfidenceCalculator::new(&config));
        let store = ScriptedStore::default().with(specific_tuple(), 4, 9, as_of());

        match estimator.estimate(&store, &specific_tuple(), as_of()) {
            Err(VisitScoringError::InvalidStratum(InvalidStratum::SuccessesExceedSample {
                ..
            })) => {}
            other => panic!("expected invalid stratum, got {other:?}"),
        }
    }

    #[test]
    fn shrinking_relaxation_is_a_contract_violation() {
        let config = config();
        let estimator = BackoffEstimator::new(&config, ConfidenceCalculator::new(&config));
        let store = ScriptedStore::default()
            .with(specific_tuple(), 10, 5, as_of())
            .with(specific_tuple().widen(Dimension::TimeBucket), 4, 2, as_of());

        assert!(matches!(
            estimator.estimate(&store, &specific_tuple(), as_of()),
            Err(VisitScoringError::InvalidStratum(
                InvalidStratum::ShrinkingRelaxation { level: 1, .. }
            ))
        ));
    }
}

use chrono::NaiveDate;

use super::aggregator::CaseAggregator;
use super::backoff::BackoffEstimator;
use super::categorical::{resolve_states, risk_probabilities};
use super::confidence::{ConfidenceBand, ConfidenceCalculator};
use super::config::ScoringConfig;
use super::domain::{
    CaseScore, DimensionTuple, DirectStatus, EvidenceSource, InvalidStratum, ProbabilityInterval,
    ScoreState, VisitEvidence,
};
use super::volatility::VolatilityAnalyzer;
use crate::aggregates::{AggregateStore, StoreError};

/// Failure scoring a single visit. Isolated by the case aggregator.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VisitScoringError {
    #[error("invalid stratum from aggregate store: {0}")]
    InvalidStratum(#[from] InvalidStratum),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Stateless scoring pipeline: backoff, confidence, volatility, categorical states.
#[derive(Debug, Clone)]
pub struct ScoringEngine {
    config: ScoringConfig,
    calculator: ConfidenceCalculator,
}

impl ScoringEngine {
    /// `config` is expected to be validated already (see [`ScoringConfig::validate`]).
    pub fn new(config: ScoringConfig) -> Self {
        let calculator = ConfidenceCalculator::new(&config);
        Self { config, calculator }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Historical propensity for a dimension tuple as of a date.
    pub fn estimate<S>(
        &self,
        store: &S,
        dimensions: &DimensionTuple,
        as_of: NaiveDate,
    ) -> Result<ScoreState, VisitScoringError>
    where
        S: AggregateStore + ?Sized,
    {
        self.historical_state(store, dimensions, None, as_of)
    }

    /// Score one visit, preferring decisive direct evidence over history.
    pub fn score_visit<S>(
        &self,
        store: &S,
        visit: &VisitEvidence,
        as_of: NaiveDate,
    ) -> Result<ScoreState, VisitScoringError>
    where
        S: AggregateStore + ?Sized,
    {
        if let Some(status) = visit.decisive_status() {
            return Ok(self.direct_state(status, &visit.dimensions));
        }

        let direct = visit.direct_result.as_ref().map(|result| result.status);
        self.historical_state(store, &visit.dimensions, direct, as_of)
    }

    /// Score every visit and roll the results into a case score.
    pub fn score_case<S>(
        &self,
        store: &S,
        visits: &[VisitEvidence],
        reference_date: NaiveDate,
    ) -> CaseScore
    where
        S: AggregateStore + ?Sized,
    {
        CaseAggregator::new(&self.config).aggregate(visits, reference_date, |visit| {
            self.score_visit(store, visit, reference_date)
        })
    }

    fn direct_state(&self, status: DirectStatus, dimensions: &DimensionTuple) -> ScoreState {
        let probability = if status == DirectStatus::Yes { 1.0 } else { 0.0 };

        ScoreState {
            source: EvidenceSource::DirectEvidence,
            base_probability: Some(probability),
            base_confidence: 1.0,
            confidence_band: ConfidenceBand::High,
            sample_size: 0,
            probability_interval: ProbabilityInterval::point(probability),
            backoff_level: 0,
            backoff_path: Vec::new(),
            below_min_sample: false,
            volatility: None,
            state_probabilities: resolve_states(Some(status), Some(probability)),
            risk_probabilities: risk_probabilities(&self.config.risk_rules, dimensions),
        }
    }

    fn historical_state<S>(
        &self,
        store: &S,
        dimensions: &DimensionTuple,
        direct: Option<DirectStatus>,
        as_of: NaiveDate,
    ) -> Result<ScoreState, VisitScoringError>
    where
        S: AggregateStore + ?Sized,
    {
        let backoff = BackoffEstimator::new(&self.config, self.calculator).estimate(
            store,
            dimensions,
            as_of,
        )?;
        let estimate = self.calculator.estimate(&backoff.stratum);

        let volatility = if backoff.is_no_data() {
            None
        } else {
            VolatilityAnalyzer::new(&self.config).analyze(
                store,
                &backoff.chosen_dimensions,
                as_of,
            )?
        };

        Ok(ScoreState {
            source: EvidenceSource::HistoricalPropensity,
            base_probability: estimate.probability,
            base_confidence: estimate.confidence,
            confidence_band: estimate.band,
            sample_size: backoff.stratum.sample_size(),
            probability_interval: estimate.interval,
            backoff_level: backoff.chosen_level,
            backoff_path: backoff.path,
            below_min_sample: !backoff.sufficient,
            volatility,
            state_probabilities: resolve_states(direct, estimate.probability),
            risk_probabilities: risk_probabilities(&self.config.risk_rules, dimensions),
        })
    }
}

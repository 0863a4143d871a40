use std::collections::BTreeMap;

use chrono::NaiveDate;
use tracing::error;

use super::config::ScoringConfig;
use super::domain::{
    CaseScore, EvidenceSource, ProbabilityInterval, ScoreState, StateProbabilities,
    VisitContribution, VisitEvidence,
};
use super::engine::VisitScoringError;

/// Half-lives between a visit and the reference date, in either direction.
pub fn half_lives_elapsed(reference_date: NaiveDate, visit_date: NaiveDate, half_life_days: f64) -> f64 {
    let days = (reference_date - visit_date).num_days().unsigned_abs() as f64;
    days / half_life_days
}

/// Recency weights relative to the most recent dated visit, which weighs 1.0.
///
/// Weights are computed from half-life differences so arbitrarily old visits never
/// all underflow to zero. Undated visits take the lowest dated weight (1.0 if none
/// are dated).
pub fn assign_weights(
    visit_dates: &[Option<NaiveDate>],
    reference_date: NaiveDate,
    half_life_days: f64,
) -> Vec<f64> {
    let elapsed: Vec<Option<f64>> = visit_dates
        .iter()
        .map(|date| date.map(|date| half_lives_elapsed(reference_date, date, half_life_days)))
        .collect();

    let freshest = elapsed.iter().flatten().copied().reduce(f64::min);
    let oldest = elapsed.iter().flatten().copied().reduce(f64::max);
    let relative = |half_lives: f64| match freshest {
        Some(freshest) => 0.5_f64.powf(half_lives - freshest),
        None => 1.0,
    };
    let floor = oldest.map_or(1.0, relative);

    elapsed
        .into_iter()
        .map(|half_lives| half_lives.map_or(floor, relative))
        .collect()
}

/// Rolls per-visit scores into one recency-weighted case score.
pub struct CaseAggregator<'a> {
    config: &'a ScoringConfig,
}

impl<'a> CaseAggregator<'a> {
    pub fn new(config: &'a ScoringConfig) -> Self {
        Self { config }
    }

    /// Scores each visit with `score_visit`; a failing visit contributes zero weight.
    pub fn aggregate<F>(
        &self,
        visits: &[VisitEvidence],
        reference_date: NaiveDate,
        mut score_visit: F,
    ) -> CaseScore
    where
        F: FnMut(&VisitEvidence) -> Result<ScoreState, VisitScoringError>,
    {
        let outcomes: Vec<Result<ScoreState, VisitScoringError>> =
            visits.iter().map(|visit| score_visit(visit)).collect();

        // Failed visits are left out so they cannot shift the relative scale.
        let scored_dates: Vec<Option<NaiveDate>> = visits
            .iter()
            .zip(&outcomes)
            .filter(|(_, outcome)| outcome.is_ok())
            .map(|(visit, _)| visit.visit_date)
            .collect();
        let mut weights = assign_weights(
            &scored_dates,
            reference_date,
            self.config.recency_half_life_days,
        )
        .into_iter();

        let contributions = visits
            .iter()
            .zip(outcomes)
            .map(|(visit, outcome)| match outcome {
                Ok(score_state) => VisitContribution {
                    visit_id: visit.visit_id.clone(),
                    weight: weights.next().unwrap_or(0.0),
                    score_state,
                    failure: None,
                },
                Err(err) => {
                    error!(
                        visit_id = %visit.visit_id,
                        error = %err,
                        "visit scoring failed; recording as unestablished"
                    );
                    VisitContribution {
                        visit_id: visit.visit_id.clone(),
                        weight: 0.0,
                        score_state: ScoreState::unestablished(
                            EvidenceSource::HistoricalPropensity,
                        ),
                        failure: Some(err.to_string()),
                    }
                }
            })
            .collect();

        combine(contributions, self.config.disagreement_penalty)
    }
}

pub(crate) fn combine(contributions: Vec<VisitContribution>, disagreement_penalty: f64) -> CaseScore {
    let total_weight: f64 = contributions.iter().map(|entry| entry.weight).sum();
    if total_weight <= 0.0 {
        return CaseScore::unestablished(contributions);
    }

    let mut states = StateProbabilities {
        eligible: 0.0,
        not_eligible: 0.0,
        no_info: 0.0,
        unestablished: 0.0,
    };
    let mut risks: BTreeMap<String, f64> = BTreeMap::new();
    let mut confidence_sum = 0.0;

    let mut probability_weight = 0.0;
    let mut probability_sum = 0.0;
    let mut lower_sum = 0.0;
    let mut upper_sum = 0.0;

    for entry in contributions.iter().filter(|entry| entry.weight > 0.0) {
        let share = entry.weight / total_weight;
        let state = &entry.score_state;

        states.eligible += share * state.state_probabilities.eligible;
        states.not_eligible += share * state.state_probabilities.not_eligible;
        states.no_info += share * state.state_probabilities.no_info;
        states.unestablished += share * state.state_probabilities.unestablished;

        for (name, probability) in &state.risk_probabilities {
            *risks.entry(name.clone()).or_insert(0.0) += share * probability;
        }

        confidence_sum += entry.weight * state.base_confidence;

        if let Some(probability) = state.base_probability {
            probability_weight += entry.weight;
            probability_sum += entry.weight * probability;
            lower_sum += entry.weight * state.probability_interval.lower_bound;
            upper_sum += entry.weight * state.probability_interval.upper_bound;
        }
    }

    if probability_weight <= 0.0 {
        return CaseScore {
            overall_probability: None,
            overall_confidence: 0.0,
            probability_interval: ProbabilityInterval::full(),
            state_probabilities: states,
            risk_probabilities: risks,
            contributing_visits: contributions,
        };
    }

    let overall = (probability_sum / probability_weight).clamp(0.0, 1.0);
    let spread = weighted_spread(&contributions, overall, probability_weight);
    let agreement = (1.0 - disagreement_penalty * spread).clamp(0.0, 1.0);
    let overall_confidence = (confidence_sum / total_weight * agreement).clamp(0.0, 1.0);

    let lower = (lower_sum / probability_weight).clamp(0.0, overall);
    let upper = (upper_sum / probability_weight).clamp(overall, 1.0);

    CaseScore {
        overall_probability: Some(overall),
        overall_confidence,
        probability_interval: ProbabilityInterval {
            lower_bound: lower,
            upper_bound: upper,
        },
        state_probabilities: states,
        risk_probabilities: risks,
        contributing_visits: contributions,
    }
}

// Weighted standard deviation of visit probabilities around the case mean.
fn weighted_spread(contributions: &[VisitContribution], mean: f64, probability_weight: f64) -> f64 {
    let variance = contributions
        .iter()
        .filter(|entry| entry.weight > 0.0)
        .filter_map(|entry| {
            entry
                .score_state
                .base_probability
                .map(|probability| entry.weight * (probability - mean).powi(2))
        })
        .sum::<f64>()
        / probability_weight;
    variance.sqrt()
}

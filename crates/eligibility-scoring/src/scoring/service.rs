use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::config::ScoringConfig;
use super::domain::{CaseId, DimensionTuple, ScoreState, TurnId, VisitEvidence};
use super::engine::{ScoringEngine, VisitScoringError};
use super::runs::{RecorderError, ScoreRun, ScoreRunDraft, ScoreRunRecorder, ScoringInputs};
use crate::aggregates::AggregateStore;

/// Request to score every visit of a case for one turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseScoringRequest {
    pub turn_id: TurnId,
    /// Defaults to today (UTC).
    #[serde(default)]
    pub reference_date: Option<NaiveDate>,
    #[serde(default)]
    pub visits: Vec<VisitEvidence>,
}

/// Ad-hoc propensity lookup that is not recorded as a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EstimateRequest {
    #[serde(default)]
    pub dimensions: DimensionTuple,
    #[serde(default)]
    pub as_of: Option<NaiveDate>,
}

/// Service composing the aggregate store, scoring engine, and run log.
pub struct EligibilityScoringService<S, R> {
    store: Arc<S>,
    recorder: Arc<R>,
    engine: Arc<ScoringEngine>,
}

impl<S, R> EligibilityScoringService<S, R>
where
    S: AggregateStore + 'static,
    R: ScoreRunRecorder + 'static,
{
    pub fn new(store: Arc<S>, recorder: Arc<R>, config: ScoringConfig) -> Self {
        Self {
            store,
            recorder,
            engine: Arc::new(ScoringEngine::new(config)),
        }
    }

    pub fn engine(&self) -> &ScoringEngine {
        &self.engine
    }

    /// Score the case and append a new immutable run. Retries simply append again.
    pub fn score_case(
        &self,
        case_id: CaseId,
        request: CaseScoringRequest,
    ) -> Result<ScoreRun, ScoringServiceError> {
        let CaseScoringRequest {
            turn_id,
            reference_date,
            visits,
        } = request;
        let reference_date = reference_date.unwrap_or_else(|| Utc::now().date_naive());

        let score = self
            .engine
            .score_case(self.store.as_ref(), &visits, reference_date);

        let config = self.engine.config();
        let draft = ScoreRunDraft {
            case_id,
            turn_id,
            scoring_version: config.scoring_version.clone(),
            created_at: Utc::now(),
            score,
            inputs_used: ScoringInputs {
                reference_date,
                visits,
                config: config.clone(),
            },
        };

        let run = self.recorder.append(draft)?;
        info!(
            case_id = %run.case_id,
            turn_id = %run.turn_id,
            run_id = run.run_id.0,
            overall_probability = ?run.score.overall_probability,
            "score run recorded"
        );
        Ok(run)
    }

    /// Historical propensity for a dimension tuple; nothing is recorded.
    pub fn estimate(&self, request: EstimateRequest) -> Result<ScoreState, ScoringServiceError> {
        let as_of = request.as_of.unwrap_or_else(|| Utc::now().date_naive());
        let state = self
            .engine
            .estimate(self.store.as_ref(), &request.dimensions, as_of)?;
        Ok(state)
    }

    pub fn latest(&self, case_id: &CaseId) -> Result<Option<ScoreRun>, ScoringServiceError> {
        Ok(self.recorder.latest(case_id)?)
    }

    pub fn history(&self, case_id: &CaseId) -> Result<Vec<ScoreRun>, ScoringServiceError> {
        Ok(self.recorder.history(case_id)?)
    }
}

/// Error raised by the scoring service.
#[derive(Debug, thiserror::Error)]
pub enum ScoringServiceError {
    #[error(transparent)]
    Estimate(#[from] VisitScoringError),
    #[error(transparent)]
    Recorder(#[from] RecorderError),
}

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use super::confidence::ConfidenceBand;
use super::config::ScoringConfig;
use super::domain::{
    CaseId, CaseScore, EligibilityState, ProbabilityInterval, TurnId, VisitEvidence,
};

/// Sequence number assigned by the run log on append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RunId(pub u64);

/// Inputs captured alongside every run so audits can replay it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoringInputs {
    pub reference_date: NaiveDate,
    pub visits: Vec<VisitEvidence>,
    /// Full policy in force, risk rules included.
    pub config: ScoringConfig,
}

/// A run that has not yet been appended.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreRunDraft {
    pub case_id: CaseId,
    pub turn_id: TurnId,
    pub scoring_version: String,
    pub created_at: DateTime<Utc>,
    pub score: CaseScore,
    pub inputs_used: ScoringInputs,
}

/// Immutable, versioned engine output for one case and turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreRun {
    pub run_id: RunId,
    pub case_id: CaseId,
    pub turn_id: TurnId,
    pub scoring_version: String,
    pub created_at: DateTime<Utc>,
    pub score: CaseScore,
    pub inputs_used: ScoringInputs,
}

impl ScoreRun {
    fn from_draft(run_id: RunId, draft: ScoreRunDraft) -> Self {
        let ScoreRunDraft {
            case_id,
            turn_id,
            scoring_version,
            created_at,
            score,
            inputs_used,
        } = draft;

        Self {
            run_id,
            case_id,
            turn_id,
            scoring_version,
            created_at,
            score,
            inputs_used,
        }
    }

    /// Caller-facing message; "insufficient data" whenever unestablished mass dominates.
    pub fn headline(&self) -> String {
        match self.score.overall_probability {
            Some(probability) if !self.score.is_insufficient() => format!(
                "{:.0}% likely to be honored ({} confidence)",
                probability * 100.0,
                ConfidenceBand::from_score(self.score.overall_confidence).label()
            ),
            _ => "insufficient data".to_string(),
        }
    }

    pub fn view(&self) -> ScoreRunView {
        ScoreRunView {
            run_id: self.run_id,
            case_id: self.case_id.clone(),
            turn_id: self.turn_id.clone(),
            scoring_version: self.scoring_version.clone(),
            created_at: self.created_at,
            overall_probability: self.score.overall_probability,
            overall_confidence: self.score.overall_confidence,
            probability_interval: self.score.probability_interval,
            dominant_state: self.score.state_probabilities.dominant(),
            visit_count: self.score.contributing_visits.len(),
            headline: self.headline(),
        }
    }
}

/// Summary of a run exposed to API callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreRunView {
    pub run_id: RunId,
    pub case_id: CaseId,
    pub turn_id: TurnId,
    pub scoring_version: String,
    pub created_at: DateTime<Utc>,
    pub overall_probability: Option<f64>,
    pub overall_confidence: f64,
    pub probability_interval: ProbabilityInterval,
    pub dominant_state: EligibilityState,
    pub visit_count: usize,
    pub headline: String,
}

/// Append-only persistence for score runs.
pub trait ScoreRunRecorder: Send + Sync {
    fn append(&self, draft: ScoreRunDraft) -> Result<ScoreRun, RecorderError>;
    /// Latest run by `created_at`, ties broken by insertion order.
    fn latest(&self, case_id: &CaseId) -> Result<Option<ScoreRun>, RecorderError>;
    /// Every run for the case in insertion order.
    fn history(&self, case_id: &CaseId) -> Result<Vec<ScoreRun>, RecorderError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecorderError {
    #[error("score run log unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Default)]
struct RunArena {
    runs: Vec<ScoreRun>,
    by_case: HashMap<CaseId, Vec<usize>>,
}

/// Arena-backed run log: runs are pushed once and only ever read afterwards.
#[derive(Debug, Default, Clone)]
pub struct InMemoryScoreRunLog {
    arena: Arc<Mutex<RunArena>>,
}

impl InMemoryScoreRunLog {
    fn lock(&self) -> Result<MutexGuard<'_, RunArena>, RecorderError> {
        self.arena
            .lock()
            .map_err(|_| RecorderError::Unavailable("run log mutex poisoned".to_string()))
    }

    pub fn len(&self) -> Result<usize, RecorderError> {
        Ok(self.lock()?.runs.len())
    }

    pub fn is_empty(&self) -> Result<bool, RecorderError> {
        Ok(self.lock()?.runs.is_empty())
    }

    /// All runs across cases in insertion order, for audit replay.
    pub fn replay(&self) -> Result<Vec<ScoreRun>, RecorderError> {
        Ok(self.lock()?.runs.clone())
    }
}

impl ScoreRunRecorder for InMemoryScoreRunLog {
    fn append(&self, draft: ScoreRunDraft) -> Result<ScoreRun, RecorderError> {
        let mut arena = self.lock()?;
        let index = arena.runs.len();
        let run = ScoreRun::from_draft(RunId(index as u64 + 1), draft);

        arena
            .by_case
            .entry(run.case_id.clone())
            .or_default()
            .push(index);
        arena.runs.push(run.clone());
        Ok(run)
    }

    fn latest(&self, case_id: &CaseId) -> Result<Option<ScoreRun>, RecorderError> {
        let arena = self.lock()?;
        let latest = arena.by_case.get(case_id).and_then(|indices| {
            indices
                .iter()
                .copied()
                .max_by_key(|index| (arena.runs[*index].created_at, *index))
        });
        Ok(latest.map(|index| arena.runs[index].clone()))
    }

    fn history(&self, case_id: &CaseId) -> Result<Vec<ScoreRun>, RecorderError> {
        let arena = self.lock()?;
        Ok(arena
            .by_case
            .get(case_id)
            .map(|indices| {
                indices
                    .iter()
                    .map(|index| arena.runs[*index].clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn draft(case: &str, turn: &str, created_at: DateTime<Utc>, probability: Option<f64>) -> ScoreRunDraft {
        let mut score = CaseScore::unestablished(Vec::new());
        if let Some(probability) = probability {
            score.overall_probability = Some(probability);
            score.overall_confidence = 0.8;
            score.state_probabilities =
                crate::scoring::domain::StateProbabilities::from_propensity(probability);
        }

        ScoreRunDraft {
            case_id: CaseId(case.to_string()),
            turn_id: TurnId(turn.to_string()),
            scoring_version: "backoff-wilson-v1".to_string(),
            created_at,
            score,
            inputs_used: ScoringInputs {
                reference_date: NaiveDate::from_ymd_opt(2025, 6, 30).expect("valid date"),
                visits: Vec::new(),
                config: ScoringConfig::default(),
            },
        }
    }

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 30, hour, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    #[test]
    fn append_preserves_insertion_order_per_case() {
        let log = InMemoryScoreRunLog::default();
        log.append(draft("case-1", "t1", at(9), Some(0.4))).expect("append");
        log.append(draft("case-2", "t1", at(10), Some(0.9))).expect("append");
        log.append(draft("case-1", "t2", at(11), Some(0.6))).expect("append");

        let history = log.history(&CaseId("case-1".to_string())).expect("history");
        let turns: Vec<_> = history.iter().map(|run| run.turn_id.0.as_str()).collect();
        assert_eq!(turns, vec!["t1", "t2"]);
        assert_eq!(history[0].run_id, RunId(1));
        assert_eq!(history[1].run_id, RunId(3));
        assert_eq!(log.replay().expect("replay").len(), 3);
    }

    #[test]
    fn latest_orders_by_created_at_then_insertion() {
        let log = InMemoryScoreRunLog::default();
        log.append(draft("case-1", "late", at(15), Some(0.4))).expect("append");
        log.append(draft("case-1", "early", at(8), Some(0.6))).expect("append");
        log.append(draft("case-1", "retry", at(15), Some(0.7))).expect("append");

        let latest = log
            .latest(&CaseId("case-1".to_string()))
            .expect("lookup")
            .expect("run present");
        assert_eq!(latest.turn_id.0, "retry");

        assert!(log
            .latest(&CaseId("unknown".to_string()))
            .expect("lookup")
            .is_none());
    }

    #[test]
    fn headline_reports_insufficient_data_when_unestablished() {
        let log = InMemoryScoreRunLog::default();
        let empty = log.append(draft("case-1", "t1", at(9), None)).expect("append");
        assert_eq!(empty.headline(), "insufficient data");

        let scored = log
            .append(draft("case-1", "t2", at(10), Some(0.74)))
            .expect("append");
        assert_eq!(scored.headline(), "74% likely to be honored (high confidence)");
        assert_eq!(scored.view().dominant_state, EligibilityState::Eligible);
    }
}

//! Eligibility scoring engine.
//!
//! Each visit is scored either from direct evidence or by walking a backoff waterfall over
//! historical strata, then the visit scores are rolled into a recency-weighted case score and
//! appended to an immutable run log.

pub mod aggregator;
pub mod backoff;
pub mod categorical;
pub mod confidence;
pub mod config;
pub mod domain;
pub mod engine;
pub mod router;
pub mod runs;
pub mod service;
pub mod volatility;

#[cfg(test)]
mod tests;

pub use backoff::{BackoffEstimator, BackoffOutcome, BackoffStep};
pub use categorical::RiskRule;
pub use confidence::{ConfidenceBand, ConfidenceCalculator};
pub use config::{ScoringConfig, ScoringConfigBuilder};
pub use domain::{
    CaseId, CaseScore, Dimension, DimensionTuple, DirectResult, DirectStatus, EligibilityState,
    EvidenceSource, ProbabilityInterval, ScoreState, StateProbabilities, Stratum, StratumCounts,
    TurnId, VisitContribution, VisitEvidence, VisitId,
};
pub use engine::{ScoringEngine, VisitScoringError};
pub use router::scoring_router;
pub use runs::{
    InMemoryScoreRunLog, RecorderError, RunId, ScoreRun, ScoreRunRecorder, ScoreRunView,
};
pub use service::{
    CaseScoringRequest, EligibilityScoringService, EstimateRequest, ScoringServiceError,
};
pub use volatility::{VolatilityClass, VolatilityReport, VolatilityThresholds};

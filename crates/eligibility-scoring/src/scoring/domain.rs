use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::backoff::BackoffStep;
use super::confidence::ConfidenceBand;
use super::volatility::VolatilityReport;

/// Identifier wrapper for a scored case (claim or episode of care).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CaseId(pub String);

/// Identifier for the conversational or workflow turn that requested a score.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TurnId(pub String);

/// Identifier for a single visit inside a case.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VisitId(pub String);

impl fmt::Display for CaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for VisitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Classification dimensions used to slice historical outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Payer,
    Plan,
    VisitType,
    Region,
    TimeBucket,
}

impl Dimension {
    /// Display order, most specific business key first.
    pub const ALL: [Dimension; 5] = [
        Dimension::Payer,
        Dimension::Plan,
        Dimension::VisitType,
        Dimension::Region,
        Dimension::TimeBucket,
    ];

    /// Relaxation order applied when no precedence is configured.
    pub const DEFAULT_PRECEDENCE: [Dimension; 5] = [
        Dimension::TimeBucket,
        Dimension::Region,
        Dimension::VisitType,
        Dimension::Plan,
        Dimension::Payer,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Dimension::Payer => "payer",
            Dimension::Plan => "plan",
            Dimension::VisitType => "visit_type",
            Dimension::Region => "region",
            Dimension::TimeBucket => "time_bucket",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "payer" => Some(Dimension::Payer),
            "plan" | "product" => Some(Dimension::Plan),
            "visit_type" | "visit" => Some(Dimension::VisitType),
            "region" => Some(Dimension::Region),
            "time_bucket" | "time" => Some(Dimension::TimeBucket),
            _ => None,
        }
    }
}

/// Dimension values for one stratum request; `None` is the wildcard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct DimensionTuple {
    pub payer: Option<String>,
    pub plan: Option<String>,
    pub visit_type: Option<String>,
    pub region: Option<String>,
    pub time_bucket: Option<String>,
}

impl DimensionTuple {
    /// The fully relaxed tuple that matches every historical outcome.
    pub fn global() -> Self {
        Self::default()
    }

    pub fn get(&self, dimension: Dimension) -> Option<&str> {
        match dimension {
            Dimension::Payer => self.payer.as_deref(),
            Dimension::Plan => self.plan.as_deref(),
            Dimension::VisitType => self.visit_type.as_deref(),
            Dimension::Region => self.region.as_deref(),
            Dimension::TimeBucket => self.time_bucket.as_deref(),
        }
    }

    fn slot_mut(&mut self, dimension: Dimension) -> &mut Option<String> {
        match dimension {
            Dimension::Payer => &mut self.payer,
            Dimension::Plan => &mut self.plan,
            Dimension::VisitType => &mut self.visit_type,
            Dimension::Region => &mut self.region,
            Dimension::TimeBucket => &mut self.time_bucket,
        }
    }

    /// Builder-style setter used by fixtures and importers.
    pub fn with(mut self, dimension: Dimension, value: impl Into<String>) -> Self {
        *self.slot_mut(dimension) = Some(value.into());
        self
    }

    /// Copy of this tuple with `dimension` replaced by the wildcard.
    pub fn widen(&self, dimension: Dimension) -> Self {
        let mut widened = self.clone();
        *widened.slot_mut(dimension) = None;
        widened
    }

    pub fn is_global(&self) -> bool {
        Dimension::ALL
            .iter()
            .all(|dimension| self.get(*dimension).is_none())
    }

    /// Treats `self` as a pattern: every specified value must equal the candidate's.
    pub fn matches(&self, candidate: &DimensionTuple) -> bool {
        Dimension::ALL.iter().all(|dimension| match self.get(*dimension) {
            None => true,
            Some(expected) => candidate
                .get(*dimension)
                .map(|actual| actual.eq_ignore_ascii_case(expected))
                .unwrap_or(false),
        })
    }

    /// Stable rendering such as `payer=AETNA|plan=PPO|visit_type=*|region=*|time_bucket=*`.
    pub fn describe(&self) -> String {
        Dimension::ALL
            .iter()
            .map(|dimension| format!("{}={}", dimension.key(), self.get(*dimension).unwrap_or("*")))
            .collect::<Vec<_>>()
            .join("|")
    }
}

impl fmt::Display for DimensionTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Raw counts as reported by the aggregate store, before validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StratumCounts {
    pub sample_size: i64,
    pub successes: i64,
    pub as_of: NaiveDate,
}

impl StratumCounts {
    pub fn zeroed(as_of: NaiveDate) -> Self {
        Self {
            sample_size: 0,
            successes: 0,
            as_of,
        }
    }
}

/// Validated historical slice. Only constructible through [`TryFrom<StratumCounts>`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Stratum {
    sample_size: u64,
    successes: u64,
    as_of: NaiveDate,
}

impl Stratum {
    /// Sentinel returned when not even the global stratum holds observations.
    pub fn no_data(as_of: NaiveDate) -> Self {
        Self {
            sample_size: 0,
            successes: 0,
            as_of,
        }
    }

    pub fn sample_size(&self) -> u64 {
        self.sample_size
    }

    pub fn successes(&self) -> u64 {
        self.successes
    }

    pub fn failures(&self) -> u64 {
        self.sample_size - self.successes
    }

    pub fn is_empty(&self) -> bool {
        self.sample_size == 0
    }

    pub fn probability(&self) -> Option<f64> {
        if self.sample_size == 0 {
            None
        } else {
            Some(self.successes as f64 / self.sample_size as f64)
        }
    }
}

impl TryFrom<StratumCounts> for Stratum {
    type Error = InvalidStratum;

    fn try_from(counts: StratumCounts) -> Result<Self, Self::Error> {
        let StratumCounts {
            sample_size,
            successes,
            as_of,
        } = counts;

        if sample_size < 0 || successes < 0 {
            return Err(InvalidStratum::NegativeCount {
                successes,
                sample_size,
            });
        }
        if successes > sample_size {
            return Err(InvalidStratum::SuccessesExceedSample {
                successes,
                sample_size,
            });
        }

        Ok(Self {
            sample_size: sample_size as u64,
            successes: successes as u64,
            as_of,
        })
    }
}

/// Contract violations by the aggregate store. Never clamped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidStratum {
    #[error("stratum reports negative counts (successes {successes}, sample size {sample_size})")]
    NegativeCount { successes: i64, sample_size: i64 },
    #[error("stratum reports {successes} successes out of {sample_size} samples")]
    SuccessesExceedSample { successes: i64, sample_size: i64 },
    #[error("relaxing to level {level} shrank the sample from {previous} to {current}")]
    ShrinkingRelaxation {
        level: usize,
        previous: u64,
        current: u64,
    },
}

/// Two-sided bounds on a probability, always within `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProbabilityInterval {
    pub lower_bound: f64,
    pub upper_bound: f64,
}

impl ProbabilityInterval {
    /// The uninformative interval used when no estimate exists.
    pub fn full() -> Self {
        Self {
            lower_bound: 0.0,
            upper_bound: 1.0,
        }
    }

    pub fn point(probability: f64) -> Self {
        let probability = probability.clamp(0.0, 1.0);
        Self {
            lower_bound: probability,
            upper_bound: probability,
        }
    }

    pub fn width(&self) -> f64 {
        self.upper_bound - self.lower_bound
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower_bound && value <= self.upper_bound
    }
}

/// Status returned by a live eligibility check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DirectStatus {
    #[serde(alias = "yes", alias = "eligible")]
    Yes,
    #[serde(alias = "no", alias = "not_eligible")]
    No,
    /// The payer answered without coverage information.
    #[serde(alias = "no_info")]
    NoInfo,
}

/// Direct evidence attached to a visit by the eligibility-check collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectResult {
    pub status: DirectStatus,
    #[serde(default)]
    pub checked_at: Option<DateTime<Utc>>,
}

/// Scoring input for a single visit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisitEvidence {
    pub visit_id: VisitId,
    #[serde(default)]
    pub visit_date: Option<NaiveDate>,
    #[serde(default)]
    pub dimensions: DimensionTuple,
    #[serde(default)]
    pub direct_result: Option<DirectResult>,
}

impl VisitEvidence {
    /// Direct status only when it settles the eligible/not-eligible question.
    pub fn decisive_status(&self) -> Option<DirectStatus> {
        self.direct_result
            .as_ref()
            .map(|result| result.status)
            .filter(|status| matches!(status, DirectStatus::Yes | DirectStatus::No))
    }
}

/// Where a visit's probability came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceSource {
    DirectEvidence,
    HistoricalPropensity,
}

/// Categorical coverage states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EligibilityState {
    Eligible,
    NotEligible,
    NoInfo,
    Unestablished,
}

impl EligibilityState {
    pub fn label(self) -> &'static str {
        match self {
            EligibilityState::Eligible => "eligible",
            EligibilityState::NotEligible => "not eligible",
            EligibilityState::NoInfo => "no information",
            EligibilityState::Unestablished => "unestablished",
        }
    }
}

/// Distribution over [`EligibilityState`]; the four masses sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StateProbabilities {
    pub eligible: f64,
    pub not_eligible: f64,
    pub no_info: f64,
    pub unestablished: f64,
}

impl StateProbabilities {
    pub fn certain(state: EligibilityState) -> Self {
        let mut distribution = Self {
            eligible: 0.0,
            not_eligible: 0.0,
            no_info: 0.0,
            unestablished: 0.0,
        };
        match state {
            EligibilityState::Eligible => distribution.eligible = 1.0,
            EligibilityState::NotEligible => distribution.not_eligible = 1.0,
            EligibilityState::NoInfo => distribution.no_info = 1.0,
            EligibilityState::Unestablished => distribution.unestablished = 1.0,
        }
        distribution
    }

    pub fn unestablished() -> Self {
        Self::certain(EligibilityState::Unestablished)
    }

    /// Binary split of a historical propensity.
    pub fn from_propensity(probability: f64) -> Self {
        let eligible = probability.clamp(0.0, 1.0);
        Self {
            eligible,
            not_eligible: 1.0 - eligible,
            no_info: 0.0,
            unestablished: 0.0,
        }
    }

    pub fn total(&self) -> f64 {
        self.eligible + self.not_eligible + self.no_info + self.unestablished
    }

    /// State with the largest mass; ties resolve toward the less certain state.
    pub fn dominant(&self) -> EligibilityState {
        let ranked = [
            (EligibilityState::Unestablished, self.unestablished),
            (EligibilityState::NoInfo, self.no_info),
            (EligibilityState::NotEligible, self.not_eligible),
            (EligibilityState::Eligible, self.eligible),
        ];

        let mut best = ranked[0];
        for candidate in &ranked[1..] {
            if candidate.1 > best.1 {
                best = *candidate;
            }
        }
        best.0
    }
}

/// Engine output for a single visit, or a single ad-hoc estimate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreState {
    pub source: EvidenceSource,
    pub base_probability: Option<f64>,
    pub base_confidence: f64,
    pub confidence_band: ConfidenceBand,
    pub sample_size: u64,
    pub probability_interval: ProbabilityInterval,
    pub backoff_level: usize,
    pub backoff_path: Vec<BackoffStep>,
    /// Set when no stratum reached `MIN_N` and the global stratum was used anyway.
    pub below_min_sample: bool,
    pub volatility: Option<VolatilityReport>,
    pub state_probabilities: StateProbabilities,
    pub risk_probabilities: BTreeMap<String, f64>,
}

impl ScoreState {
    /// State reported for visits without any usable evidence.
    pub fn unestablished(source: EvidenceSource) -> Self {
        Self {
            source,
            base_probability: None,
            base_confidence: 0.0,
            confidence_band: ConfidenceBand::Low,
            sample_size: 0,
            probability_interval: ProbabilityInterval::full(),
            backoff_level: 0,
            backoff_path: Vec::new(),
            below_min_sample: false,
            volatility: None,
            state_probabilities: StateProbabilities::unestablished(),
            risk_probabilities: BTreeMap::new(),
        }
    }
}

/// One visit's share of a case score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisitContribution {
    pub visit_id: VisitId,
    pub weight: f64,
    pub score_state: ScoreState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

/// Case-level roll-up of every visit score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CaseScore {
    pub overall_probability: Option<f64>,
    pub overall_confidence: f64,
    pub probability_interval: ProbabilityInterval,
    pub state_probabilities: StateProbabilities,
    pub risk_probabilities: BTreeMap<String, f64>,
    pub contributing_visits: Vec<VisitContribution>,
}

impl CaseScore {
    pub fn unestablished(contributing_visits: Vec<VisitContribution>) -> Self {
        Self {
            overall_probability: None,
            overall_confidence: 0.0,
            probability_interval: ProbabilityInterval::full(),
            state_probabilities: StateProbabilities::unestablished(),
            risk_probabilities: BTreeMap::new(),
            contributing_visits,
        }
    }

    /// True when callers should present "insufficient data" instead of a number.
    pub fn is_insufficient(&self) -> bool {
        self.overall_probability.is_none()
            || self.state_probabilities.dominant() == EligibilityState::Unestablished
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 30).expect("valid date")
    }

    #[test]
    fn widening_replaces_one_dimension_with_wildcard() {
        let tuple = DimensionTuple::default()
            .with(Dimension::Payer, "AETNA")
            .with(Dimension::Region, "midwest");

        let widened = tuple.widen(Dimension::Region);

        assert_eq!(widened.payer.as_deref(), Some("AETNA"));
        assert!(widened.region.is_none());
        assert_eq!(
            widened.describe(),
            "payer=AETNA|plan=*|visit_type=*|region=*|time_bucket=*"
        );
        assert!(widened.widen(Dimension::Payer).is_global());
    }

    #[test]
    fn pattern_matching_ignores_wildcards_and_case() {
        let pattern = DimensionTuple::default().with(Dimension::Plan, "ppo");
        let candidate = DimensionTuple::default()
            .with(Dimension::Payer, "BCBS")
            .with(Dimension::Plan, "PPO");

        assert!(pattern.matches(&candidate));
        assert!(DimensionTuple::global().matches(&candidate));
        assert!(!pattern.matches(&DimensionTuple::default().with(Dimension::Payer, "BCBS")));
    }

    #[test]
    fn stratum_conversion_rejects_contract_violations() {
        let negative = StratumCounts {
            sample_size: -1,
            successes: 0,
            as_of: as_of(),
        };
        assert!(matches!(
            Stratum::try_from(negative),
            Err(InvalidStratum::NegativeCount { .. })
        ));

        let overflow = StratumCounts {
            sample_size: 4,
            successes: 5,
            as_of: as_of(),
        };
        assert!(matches!(
            Stratum::try_from(overflow),
            Err(InvalidStratum::SuccessesExceedSample {
                successes: 5,
                sample_size: 4
            })
        ));

        let valid = Stratum::try_from(StratumCounts {
            sample_size: 40,
            successes: 28,
            as_of: as_of(),
        })
        .expect("valid stratum");
        assert_eq!(valid.failures(), 12);
        assert_eq!(valid.probability(), Some(0.7));
    }

    #[test]
    fn dominant_state_prefers_uncertainty_on_ties() {
        let split = StateProbabilities {
            eligible: 0.5,
            not_eligible: 0.0,
            no_info: 0.0,
            unestablished: 0.5,
        };
        assert_eq!(split.dominant(), EligibilityState::Unestablished);
        assert_eq!(
            StateProbabilities::from_propensity(0.8).dominant(),
            EligibilityState::Eligible
        );
    }

    #[test]
    fn direct_status_accepts_wire_spellings() {
        let parsed: DirectResult =
            serde_json::from_str(r#"{"status":"YES"}"#).expect("uppercase parses");
        assert_eq!(parsed.status, DirectStatus::Yes);
        let parsed: DirectResult =
            serde_json::from_str(r#"{"status":"no_info"}"#).expect("alias parses");
        assert_eq!(parsed.status, DirectStatus::NoInfo);
    }
}

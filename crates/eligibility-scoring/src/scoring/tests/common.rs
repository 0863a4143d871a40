use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use axum::response::Response;
use chrono::NaiveDate;
use serde_json::Value;

use crate::aggregates::{AggregateStore, StoreError};
use crate::scoring::domain::{
    Dimension, DimensionTuple, DirectResult, DirectStatus, StratumCounts, VisitEvidence, VisitId,
};
use crate::scoring::runs::InMemoryScoreRunLog;
use crate::scoring::{scoring_router, EligibilityScoringService, ScoringConfig};

pub(crate) fn as_of() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 30).expect("valid date")
}

pub(crate) fn specific_tuple() -> DimensionTuple {
    DimensionTuple::default()
        .with(Dimension::Payer, "AETNA")
        .with(Dimension::Plan, "PPO")
        .with(Dimension::VisitType, "office_visit")
        .with(Dimension::Region, "midwest")
        .with(Dimension::TimeBucket, "2025-Q2")
}

/// Level 0 has 5/5 outcomes; relaxing the time bucket yields 28/40.
pub(crate) fn backoff_once_store(as_of: NaiveDate) -> ScriptedStore {
    ScriptedStore::default()
        .with(specific_tuple(), 5, 5, as_of)
        .with(specific_tuple().widen(Dimension::TimeBucket), 40, 28, as_of)
}

/// Aggregate store answering from fixed counts; unknown tuples are zeroed.
#[derive(Debug, Default, Clone)]
pub(crate) struct ScriptedStore {
    strata: HashMap<DimensionTuple, StratumCounts>,
    windows: HashMap<DimensionTuple, Vec<StratumCounts>>,
    unavailable: HashSet<DimensionTuple>,
}

impl ScriptedStore {
    pub(crate) fn with(
        mut self,
        dimensions: DimensionTuple,
        sample_size: i64,
        successes: i64,
        as_of: NaiveDate,
    ) -> Self {
        self.strata.insert(
            dimensions,
            StratumCounts {
                sample_size,
                successes,
                as_of,
            },
        );
        self
    }

    /// Windows are `(sample_size, successes)` pairs, most recent first.
    pub(crate) fn with_windows(
        mut self,
        dimensions: DimensionTuple,
        windows: &[(i64, i64)],
        as_of: NaiveDate,
    ) -> Self {
        let counts = windows
            .iter()
            .map(|(sample_size, successes)| StratumCounts {
                sample_size: *sample_size,
                successes: *successes,
                as_of,
            })
            .collect();
        self.windows.insert(dimensions, counts);
        self
    }

    pub(crate) fn unavailable_for(mut self, dimensions: DimensionTuple) -> Self {
        self.unavailable.insert(dimensions);
        self
    }
}

impl AggregateStore for ScriptedStore {
    fn query_stratum(
        &self,
        dimensions: &DimensionTuple,
        as_of: NaiveDate,
    ) -> Result<StratumCounts, StoreError> {
        if self.unavailable.contains(dimensions) {
            return Err(StoreError::Unavailable("replica offline".to_string()));
        }
        Ok(self
            .strata
            .get(dimensions)
            .copied()
            .unwrap_or_else(|| StratumCounts::zeroed(as_of)))
    }

    fn query_time_windows(
        &self,
        dimensions: &DimensionTuple,
        _as_of: NaiveDate,
        window_count: usize,
    ) -> Result<Vec<StratumCounts>, StoreError> {
        Ok(self
            .windows
            .get(dimensions)
            .map(|windows| windows.iter().take(window_count).copied().collect())
            .unwrap_or_default())
    }
}

/// Store whose every query fails.
pub(crate) struct UnavailableStore;

impl AggregateStore for UnavailableStore {
    fn query_stratum(
        &self,
        _dimensions: &DimensionTuple,
        _as_of: NaiveDate,
    ) -> Result<StratumCounts, StoreError> {
        Err(StoreError::Unavailable("aggregate warehouse offline".to_string()))
    }

    fn query_time_windows(
        &self,
        _dimensions: &DimensionTuple,
        _as_of: NaiveDate,
        _window_count: usize,
    ) -> Result<Vec<StratumCounts>, StoreError> {
        Err(StoreError::Unavailable("aggregate warehouse offline".to_string()))
    }
}

pub(crate) fn historical_visit(id: &str, visit_date: Option<NaiveDate>) -> VisitEvidence {
    VisitEvidence {
        visit_id: VisitId(id.to_string()),
        visit_date,
        dimensions: specific_tuple(),
        direct_result: None,
    }
}

pub(crate) fn direct_visit(id: &str, status: DirectStatus) -> VisitEvidence {
    VisitEvidence {
        visit_id: VisitId(id.to_string()),
        visit_date: Some(as_of()),
        dimensions: specific_tuple(),
        direct_result: Some(DirectResult {
            status,
            checked_at: None,
        }),
    }
}

pub(crate) fn build_service<S>(
    store: S,
) -> (
    EligibilityScoringService<S, InMemoryScoreRunLog>,
    Arc<InMemoryScoreRunLog>,
)
where
    S: AggregateStore + 'static,
{
    let recorder = Arc::new(InMemoryScoreRunLog::default());
    let service =
        EligibilityScoringService::new(Arc::new(store), recorder.clone(), ScoringConfig::default());
    (service, recorder)
}

pub(crate) fn router_with_store<S>(store: S) -> axum::Router
where
    S: AggregateStore + 'static,
{
    let (service, _) = build_service(store);
    scoring_router(Arc::new(service))
}

pub(crate) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde_json::json;

use super::domain::CaseId;
use super::engine::VisitScoringError;
use super::runs::ScoreRunRecorder;
use super::service::{
    CaseScoringRequest, EligibilityScoringService, EstimateRequest, ScoringServiceError,
};
use crate::aggregates::{AggregateStore, StoreError};

/// Router builder exposing case scoring, run history, and ad-hoc estimates.
pub fn scoring_router<S, R>(service: Arc<EligibilityScoringService<S, R>>) -> Router
where
    S: AggregateStore + 'static,
    R: ScoreRunRecorder + 'static,
{
    Router::new()
        .route(
            "/api/v1/cases/:case_id/score",
            post(score_handler::<S, R>).get(latest_handler::<S, R>),
        )
        .route("/api/v1/cases/:case_id/runs", get(history_handler::<S, R>))
        .route("/api/v1/estimate", post(estimate_handler::<S, R>))
        .with_state(service)
}

pub(crate) async fn score_handler<S, R>(
    State(service): State<Arc<EligibilityScoringService<S, R>>>,
    Path(case_id): Path<String>,
    axum::Json(request): axum::Json<CaseScoringRequest>,
) -> Response
where
    S: AggregateStore + 'static,
    R: ScoreRunRecorder + 'static,
{
    match service.score_case(CaseId(case_id), request) {
        Ok(run) => (StatusCode::CREATED, axum::Json(run)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn latest_handler<S, R>(
    State(service): State<Arc<EligibilityScoringService<S, R>>>,
    Path(case_id): Path<String>,
) -> Response
where
    S: AggregateStore + 'static,
    R: ScoreRunRecorder + 'static,
{
    let id = CaseId(case_id);
    match service.latest(&id) {
        Ok(Some(run)) => (StatusCode::OK, axum::Json(run.view())).into_response(),
        Ok(None) => {
            let payload = json!({
                "case_id": id.0,
                "error": "no score runs recorded for case",
            });
            (StatusCode::NOT_FOUND, axum::Json(payload)).into_response()
        }
        Err(error) => error_response(error),
    }
}

pub(crate) async fn history_handler<S, R>(
    State(service): State<Arc<EligibilityScoringService<S, R>>>,
    Path(case_id): Path<String>,
) -> Response
where
    S: AggregateStore + 'static,
    R: ScoreRunRecorder + 'static,
{
    match service.history(&CaseId(case_id)) {
        Ok(runs) => (StatusCode::OK, axum::Json(runs)).into_response(),
        Err(error) => error_response(error),
    }
}

pub(crate) async fn estimate_handler<S, R>(
    State(service): State<Arc<EligibilityScoringService<S, R>>>,
    axum::Json(request): axum::Json<EstimateRequest>,
) -> Response
where
    S: AggregateStore + 'static,
    R: ScoreRunRecorder + 'static,
{
    match service.estimate(request) {
        Ok(state) => (StatusCode::OK, axum::Json(state)).into_response(),
        Err(error) => error_response(error),
    }
}

fn error_response(error: ScoringServiceError) -> Response {
    let status = match &error {
        ScoringServiceError::Estimate(VisitScoringError::InvalidStratum(_)) => {
            StatusCode::BAD_GATEWAY
        }
        ScoringServiceError::Estimate(VisitScoringError::Store(StoreError::Unavailable(_))) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ScoringServiceError::Estimate(VisitScoringError::Store(
            StoreError::UnsupportedWindowCount(_),
        ))
        | ScoringServiceError::Recorder(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let payload = json!({
        "error": error.to_string(),
    });
    (status, axum::Json(payload)).into_response()
}

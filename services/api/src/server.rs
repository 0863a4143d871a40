use crate::cli::ServeArgs;
use crate::infra::{load_store, AppState};
use crate::routes::with_scoring_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use chrono::Utc;
use eligibility_scoring::config::AppConfig;
use eligibility_scoring::error::AppError;
use eligibility_scoring::scoring::{EligibilityScoringService, InMemoryScoreRunLog};
use eligibility_scoring::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let store = load_store(args.aggregates.as_deref(), Utc::now().date_naive())?;
    info!(
        records = store.len(),
        synthetic = args.aggregates.is_none(),
        "aggregate snapshot loaded"
    );

    let scoring_service = Arc::new(EligibilityScoringService::new(
        Arc::new(store),
        Arc::new(InMemoryScoreRunLog::default()),
        config.scoring.clone(),
    ));

    let app = with_scoring_routes(scoring_service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        scoring_version = %config.scoring.scoring_version,
        min_sample_size = config.scoring.min_sample_size,
        "eligibility scoring service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}

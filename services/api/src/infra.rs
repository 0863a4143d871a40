use chrono::{Datelike, Duration, NaiveDate};
use eligibility_scoring::aggregates::{AggregateImporter, InMemoryAggregateStore, OutcomeRecord};
use eligibility_scoring::error::AppError;
use eligibility_scoring::scoring::{Dimension, DimensionTuple, RiskRule};
use metrics_exporter_prometheus::PrometheusHandle;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Payer and eligible-out-of-100 rate for the synthetic history.
const DEMO_PAYERS: [(&str, usize); 4] = [("AETNA", 82), ("CIGNA", 71), ("UHC", 64), ("HUMANA", 77)];
const DEMO_PLANS: [&str; 2] = ["PPO", "HMO"];
const DEMO_VISIT_TYPES: [&str; 3] = ["office_visit", "imaging", "physical_therapy"];
const DEMO_REGIONS: [&str; 2] = ["midwest", "south"];
const DEMO_RECORDS: usize = 1440;
const DEMO_LOOKBACK_DAYS: usize = 180;

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}

/// Quarter label used as the `time_bucket` dimension, e.g. `2025-Q2`.
pub(crate) fn quarter_bucket(date: NaiveDate) -> String {
    format!("{}-Q{}", date.year(), date.month0() / 3 + 1)
}

/// Imports the outcome export when given, otherwise builds synthetic history ending at `reference`.
pub(crate) fn load_store(
    aggregates: Option<&Path>,
    reference: NaiveDate,
) -> Result<InMemoryAggregateStore, AppError> {
    match aggregates {
        Some(path) => Ok(AggregateImporter::from_path(path)?),
        None => Ok(InMemoryAggregateStore::from_records(demo_records(reference))),
    }
}

/// Deterministic outcome history spread over the trailing six months.
pub(crate) fn demo_records(reference: NaiveDate) -> Vec<OutcomeRecord> {
    (0..DEMO_RECORDS)
        .map(|index| {
            let (payer, rate) = DEMO_PAYERS[index % DEMO_PAYERS.len()];
            let outcome_date =
                reference - Duration::days(((index * 37) % DEMO_LOOKBACK_DAYS) as i64);

            OutcomeRecord {
                dimensions: DimensionTuple::default()
                    .with(Dimension::Payer, payer)
                    .with(Dimension::Plan, DEMO_PLANS[(index / 4) % DEMO_PLANS.len()])
                    .with(
                        Dimension::VisitType,
                        DEMO_VISIT_TYPES[(index / 8) % DEMO_VISIT_TYPES.len()],
                    )
                    .with(Dimension::Region, DEMO_REGIONS[(index / 24) % DEMO_REGIONS.len()])
                    .with(Dimension::TimeBucket, quarter_bucket(outcome_date)),
                outcome_date,
                eligible: (index * 53 + 17) % 100 < rate,
            }
        })
        .collect()
}

/// Risk rules applied by the demo when none are configured.
pub(crate) fn demo_risk_rules() -> Vec<RiskRule> {
    vec![
        RiskRule {
            name: "prior_authorization".to_string(),
            when: DimensionTuple::default().with(Dimension::VisitType, "imaging"),
            adverse_rate: 0.35,
        },
        RiskRule {
            name: "out_of_network".to_string(),
            when: DimensionTuple::default().with(Dimension::Region, "west"),
            adverse_rate: 0.5,
        },
        RiskRule {
            name: "visit_limit".to_string(),
            when: DimensionTuple::default().with(Dimension::VisitType, "physical_therapy"),
            adverse_rate: 0.2,
        },
    ]
}

use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use eligibility_scoring::aggregates::{AggregateImporter, InMemoryAggregateStore};
use eligibility_scoring::scoring::{
    CaseId, CaseScoringRequest, Dimension, DimensionTuple, DirectResult, DirectStatus,
    EligibilityScoringService, EvidenceSource, InMemoryScoreRunLog, ScoreRunRecorder,
    ScoringConfig, TurnId, VisitEvidence, VisitId,
};

fn as_of() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 30).expect("valid date")
}

fn store() -> InMemoryAggregateStore {
    let data = include_bytes!("../outcome_export_sample.csv");
    AggregateImporter::from_reader(&data[..]).expect("sample export imports")
}

fn tuple(payer: &str, plan: &str, visit_type: &str, region: &str) -> DimensionTuple {
    DimensionTuple::default()
        .with(Dimension::Payer, payer)
        .with(Dimension::Plan, plan)
        .with(Dimension::VisitType, visit_type)
        .with(Dimension::Region, region)
        .with(Dimension::TimeBucket, "2025-Q2")
}

fn visit(id: &str, days_ago: i64, dimensions: DimensionTuple) -> VisitEvidence {
    VisitEvidence {
        visit_id: VisitId(id.to_string()),
        visit_date: Some(as_of() - Duration::days(days_ago)),
        dimensions,
        direct_result: None,
    }
}

fn service() -> (
    EligibilityScoringService<InMemoryAggregateStore, InMemoryScoreRunLog>,
    Arc<InMemoryScoreRunLog>,
) {
    let recorder = Arc::new(InMemoryScoreRunLog::default());
    let service =
        EligibilityScoringService::new(Arc::new(store()), recorder.clone(), ScoringConfig::default());
    (service, recorder)
}

#[test]
fn mixed_case_walks_each_visit_through_its_own_waterfall() {
    let (service, _) = service();
    let request = CaseScoringRequest {
        turn_id: TurnId("turn-1".to_string()),
        reference_date: Some(as_of()),
        visits: vec![
            visit("aetna-office", 3, tuple("AETNA", "PPO", "office_visit", "midwest")),
            visit("cigna-imaging", 30, tuple("CIGNA", "HMO", "imaging", "south")),
            visit("uhc-office", 90, tuple("UHC", "PPO", "office_visit", "west")),
        ],
    };

    let run = service
        .score_case(CaseId("case-1".to_string()), request)
        .expect("scoring succeeds");
    let visits = &run.score.contributing_visits;

    let aetna = &visits[0].score_state;
    assert_eq!(aetna.backoff_level, 1);
    assert_eq!(aetna.sample_size, 40);
    assert!((aetna.base_probability.expect("probability") - 0.7).abs() < 1e-12);
    assert!(aetna.volatility.is_some());

    let cigna = &visits[1].score_state;
    assert_eq!(cigna.backoff_level, 1);
    assert!((cigna.base_probability.expect("probability") - 0.4).abs() < 1e-12);

    let uhc = &visits[2].score_state;
    assert_eq!(uhc.backoff_level, 5);
    assert_eq!(uhc.sample_size, 110);
    assert_eq!(uhc.backoff_path.len(), 6);

    assert!(visits[0].weight > visits[1].weight);
    assert!(visits[1].weight > visits[2].weight);

    let overall = run.score.overall_probability.expect("probability");
    assert!(run.score.probability_interval.contains(overall));
    assert!(overall > 0.4 && overall < 0.7);
    let states = run.score.state_probabilities;
    assert!((states.eligible + states.not_eligible + states.no_info + states.unestablished - 1.0).abs() < 1e-9);
}

#[test]
fn direct_evidence_overrides_history_for_its_visit() {
    let (service, _) = service();
    let mut checked = visit("aetna-office", 0, tuple("AETNA", "PPO", "office_visit", "midwest"));
    checked.direct_result = Some(DirectResult {
        status: DirectStatus::No,
        checked_at: None,
    });

    let run = service
        .score_case(
            CaseId("case-2".to_string()),
            CaseScoringRequest {
                turn_id: TurnId("turn-1".to_string()),
                reference_date: Some(as_of()),
                visits: vec![checked],
            },
        )
        .expect("scoring succeeds");

    let state = &run.score.contributing_visits[0].score_state;
    assert_eq!(state.source, EvidenceSource::DirectEvidence);
    assert_eq!(run.score.overall_probability, Some(0.0));
    assert_eq!(run.score.state_probabilities.not_eligible, 1.0);
}

#[test]
fn empty_case_records_an_insufficient_data_run() {
    let (service, recorder) = service();

    let run = service
        .score_case(
            CaseId("case-3".to_string()),
            CaseScoringRequest {
                turn_id: TurnId("turn-1".to_string()),
                reference_date: Some(as_of()),
                visits: Vec::new(),
            },
        )
        .expect("scoring succeeds");

    assert_eq!(run.score.overall_probability, None);
    assert_eq!(run.score.state_probabilities.unestablished, 1.0);
    assert_eq!(run.headline(), "insufficient data");

    let latest = recorder
        .latest(&CaseId("case-3".to_string()))
        .expect("lookup")
        .expect("run recorded");
    assert_eq!(latest.run_id, run.run_id);
}

use crate::infra::{demo_records, demo_risk_rules, load_store, parse_date, quarter_bucket};
use chrono::{Duration, NaiveDate, Utc};
use clap::Args;
use eligibility_scoring::aggregates::InMemoryAggregateStore;
use eligibility_scoring::config::AppConfig;
use eligibility_scoring::error::AppError;
use eligibility_scoring::scoring::{
    BackoffStep, CaseId, CaseScoringRequest, Dimension, DimensionTuple, DirectResult,
    DirectStatus, EligibilityScoringService, EvidenceSource, InMemoryScoreRunLog, ScoreRun,
    ScoreState, TurnId, VisitContribution, VisitEvidence, VisitId,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Reference date for recency weighting (YYYY-MM-DD). Defaults to today.
    #[arg(long, value_parser = parse_date)]
    pub(crate) reference_date: Option<NaiveDate>,
}

#[derive(Args, Debug)]
pub(crate) struct ScoreArgs {
    /// Outcome export (CSV) with payer,plan,visit_type,region,time_bucket,outcome_date,outcome
    #[arg(long)]
    pub(crate) aggregates: PathBuf,
    /// Case file: JSON with `turn_id`, optional `reference_date`, and `visits`
    #[arg(long)]
    pub(crate) case: PathBuf,
    /// Case identifier recorded on the run
    #[arg(long, default_value = "cli-case")]
    pub(crate) case_id: String,
    /// Override the turn identifier from the case file
    #[arg(long)]
    pub(crate) turn_id: Option<String>,
    /// Override the reference date from the case file (YYYY-MM-DD)
    #[arg(long, value_parser = parse_date)]
    pub(crate) reference_date: Option<NaiveDate>,
}

pub(crate) fn run_score(args: ScoreArgs) -> Result<(), AppError> {
    let ScoreArgs {
        aggregates,
        case,
        case_id,
        turn_id,
        reference_date,
    } = args;

    let config = AppConfig::load()?;
    let raw = std::fs::read_to_string(&case)?;
    let mut request: CaseScoringRequest = serde_json::from_str(&raw)?;
    if let Some(turn_id) = turn_id {
        request.turn_id = TurnId(turn_id);
    }
    if reference_date.is_some() {
        request.reference_date = reference_date;
    }

    let store = load_store(Some(aggregates.as_path()), Utc::now().date_naive())?;
    let service = EligibilityScoringService::new(
        Arc::new(store),
        Arc::new(InMemoryScoreRunLog::default()),
        config.scoring,
    );

    let run = service.score_case(CaseId(case_id), request)?;
    println!("{}", serde_json::to_string_pretty(&run)?);
    Ok(())
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let reference = args
        .reference_date
        .unwrap_or_else(|| Utc::now().date_naive());

    let mut scoring = AppConfig::load()?.scoring;
    if scoring.risk_rules.is_empty() {
        scoring.risk_rules = demo_risk_rules();
    }

    let records = demo_records(reference);
    let record_count = records.len();
    let service = EligibilityScoringService::new(
        Arc::new(InMemoryAggregateStore::from_records(records)),
        Arc::new(InMemoryScoreRunLog::default()),
        scoring,
    );

    println!("Eligibility scoring demo");
    println!(
        "- reference date {} | {} synthetic outcomes | policy {} (min sample {}, {:.0}% intervals)",
        reference,
        record_count,
        service.engine().config().scoring_version,
        service.engine().config().min_sample_size,
        service.engine().config().confidence_level * 100.0
    );

    let run = service.score_case(
        CaseId("demo-case".to_string()),
        CaseScoringRequest {
            turn_id: TurnId("demo-turn-1".to_string()),
            reference_date: Some(reference),
            visits: demo_visits(reference),
        },
    )?;

    for contribution in &run.score.contributing_visits {
        for line in render_visit(contribution) {
            println!("{line}");
        }
    }
    for line in render_case(&run) {
        println!("{line}");
    }

    Ok(())
}

fn demo_visits(reference: NaiveDate) -> Vec<VisitEvidence> {
    let visit = |id: &str, days_ago: i64, payer: &str, plan: &str, visit_type: &str, region: &str| {
        let visit_date = reference - Duration::days(days_ago);
        VisitEvidence {
            visit_id: VisitId(id.to_string()),
            visit_date: Some(visit_date),
            dimensions: DimensionTuple::default()
                .with(Dimension::Payer, payer)
                .with(Dimension::Plan, plan)
                .with(Dimension::VisitType, visit_type)
                .with(Dimension::Region, region)
                .with(Dimension::TimeBucket, quarter_bucket(visit_date)),
            direct_result: None,
        }
    };

    let mut checked = visit("visit-4", 1, "HUMANA", "HMO", "office_visit", "south");
    checked.direct_result = Some(DirectResult {
        status: DirectStatus::Yes,
        checked_at: Some(Utc::now()),
    });

    vec![
        visit("visit-1", 2, "AETNA", "PPO", "office_visit", "midwest"),
        visit("visit-2", 40, "CIGNA", "HMO", "imaging", "south"),
        visit("visit-3", 120, "UHC", "PPO", "physical_therapy", "west"),
        checked,
    ]
}

fn render_visit(contribution: &VisitContribution) -> Vec<String> {
    let state = &contribution.score_state;
    let source = match state.source {
        EvidenceSource::DirectEvidence => "direct evidence",
        EvidenceSource::HistoricalPropensity => "historical propensity",
    };

    let mut lines = vec![format!(
        "\nVisit {} ({source}, weight {:.2})",
        contribution.visit_id, contribution.weight
    )];

    if let Some(failure) = &contribution.failure {
        lines.push(format!("  ! scoring failed: {failure}"));
        return lines;
    }

    lines.extend(state.backoff_path.iter().map(render_step));
    lines.push(render_choice(state));
    if state.below_min_sample {
        lines.push("  ! global stratum used below the minimum sample size".to_string());
    }

    if let Some(volatility) = &state.volatility {
        lines.push(format!(
            "  volatility {} (score {:.2}, cv {:.3}, {} windows)",
            volatility.classification.label(),
            volatility.volatility_score,
            volatility.coefficient_of_variation,
            volatility.window_probabilities.len()
        ));
    }
    for (name, probability) in &state.risk_probabilities {
        lines.push(format!("  risk {name}: {:.0}%", probability * 100.0));
    }

    lines
}

fn render_step(step: &BackoffStep) -> String {
    let probability = step
        .probability
        .map_or_else(|| "-".to_string(), |value| format!("{value:.2}"));
    let width = step
        .ci_width
        .map_or_else(|| "-".to_string(), |value| format!("{value:.2}"));

    format!(
        "  level {} {:<72} n={:<5} p={:<5} ci_width={}",
        step.level,
        step.dimensions_str,
        step.stratum.sample_size(),
        probability,
        width
    )
}

fn render_choice(state: &ScoreState) -> String {
    match state.base_probability {
        Some(probability) => format!(
            "  -> level {}: p={:.2} [{:.2}, {:.2}] confidence {:.2} ({})",
            state.backoff_level,
            probability,
            state.probability_interval.lower_bound,
            state.probability_interval.upper_bound,
            state.base_confidence,
            state.confidence_band.label()
        ),
        None => "  -> no historical data at any level".to_string(),
    }
}

fn render_case(run: &ScoreRun) -> Vec<String> {
    let score = &run.score;
    let states = &score.state_probabilities;

    vec![
        format!("\nCase {} / turn {} (run {})", run.case_id, run.turn_id, run.run_id.0),
        format!("- {}", run.headline()),
        format!(
            "- interval [{:.2}, {:.2}] | confidence {:.2}",
            score.probability_interval.lower_bound,
            score.probability_interval.upper_bound,
            score.overall_confidence
        ),
        format!(
            "- states: eligible {:.2} | not eligible {:.2} | no info {:.2} | unestablished {:.2} (dominant: {})",
            states.eligible,
            states.not_eligible,
            states.no_info,
            states.unestablished,
            states.dominant().label()
        ),
    ]
}

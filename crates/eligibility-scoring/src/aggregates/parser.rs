use super::store::OutcomeRecord;
use super::AggregateImportError;
use crate::scoring::domain::DimensionTuple;
use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Deserializer};
use std::io::Read;

pub(crate) fn parse_records<R: Read>(reader: R) -> Result<Vec<OutcomeRecord>, AggregateImportError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let mut records = Vec::new();

    for (index, row) in csv_reader.deserialize::<OutcomeRow>().enumerate() {
        let row = row?;
        // Header occupies line 1.
        let line = index as u64 + 2;

        let outcome_date = parse_date(&row.outcome_date).ok_or_else(|| {
            AggregateImportError::InvalidRow {
                line,
                reason: format!("unparseable outcome date `{}`", row.outcome_date),
            }
        })?;
        let eligible = parse_outcome(&row.outcome).ok_or_else(|| AggregateImportError::InvalidRow {
            line,
            reason: format!("unknown outcome `{}`", row.outcome),
        })?;

        records.push(OutcomeRecord {
            dimensions: DimensionTuple {
                payer: row.payer,
                plan: row.plan,
                visit_type: row.visit_type,
                region: row.region,
                time_bucket: row.time_bucket,
            },
            outcome_date,
            eligible,
        });
    }

    Ok(records)
}

#[derive(Debug, Deserialize)]
struct OutcomeRow {
    #[serde(default, deserialize_with = "empty_string_as_none")]
    payer: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    plan: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    visit_type: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    region: Option<String>,
    #[serde(default, deserialize_with = "empty_string_as_none")]
    time_bucket: Option<String>,
    outcome_date: String,
    outcome: String,
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.filter(|value| !value.trim().is_empty()))
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(date);
    }

    DateTime::parse_from_rfc3339(trimmed)
        .ok()
        .map(|dt| dt.date_naive())
}

fn parse_outcome(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "eligible" | "yes" | "y" | "true" | "1" => Some(true),
        "not_eligible" | "ineligible" | "no" | "n" | "false" | "0" => Some(false),
        _ => None,
    }
}

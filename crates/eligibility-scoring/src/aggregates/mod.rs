//! Historical outcome aggregates consumed by the scoring engine.
//!
//! The engine only sees the [`AggregateStore`] trait. [`InMemoryAggregateStore`] is a snapshot
//! built from outcome records, typically loaded from a CSV export by [`AggregateImporter`].

mod parser;
mod store;

use chrono::NaiveDate;
use std::io::Read;
use std::path::Path;

use crate::scoring::domain::{DimensionTuple, StratumCounts};

pub use store::{InMemoryAggregateStore, OutcomeRecord};

/// Read-only query surface over historical outcomes.
///
/// Unknown dimension combinations must yield zeroed counts rather than errors.
pub trait AggregateStore: Send + Sync {
    fn query_stratum(
        &self,
        dimensions: &DimensionTuple,
        as_of: NaiveDate,
    ) -> Result<StratumCounts, StoreError>;

    /// Trailing windows ending at `as_of`, most recent first.
    fn query_time_windows(
        &self,
        dimensions: &DimensionTuple,
        as_of: NaiveDate,
        window_count: usize,
    ) -> Result<Vec<StratumCounts>, StoreError>;
}

/// Failure reaching or querying the aggregate store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("aggregate store unavailable: {0}")]
    Unavailable(String),
    #[error("{0} time windows exceeds the supported range")]
    UnsupportedWindowCount(usize),
}

#[derive(Debug)]
pub enum AggregateImportError {
    Io(std::io::Error),
    Csv(csv::Error),
    InvalidRow { line: u64, reason: String },
}

impl std::fmt::Display for AggregateImportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregateImportError::Io(err) => write!(f, "failed to read outcome export: {}", err),
            AggregateImportError::Csv(err) => write!(f, "invalid outcome CSV data: {}", err),
            AggregateImportError::InvalidRow { line, reason } => {
                write!(f, "outcome export line {}: {}", line, reason)
            }
        }
    }
}

impl std::error::Error for AggregateImportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AggregateImportError::Io(err) => Some(err),
            AggregateImportError::Csv(err) => Some(err),
            AggregateImportError::InvalidRow { .. } => None,
        }
    }
}

impl From<std::io::Error> for AggregateImportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<csv::Error> for AggregateImportError {
    fn from(err: csv::Error) -> Self {
        Self::Csv(err)
    }
}

/// Loads outcome exports (`payer,plan,visit_type,region,time_bucket,outcome_date,outcome`).
pub struct AggregateImporter;

impl AggregateImporter {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<InMemoryAggregateStore, AggregateImportError> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<InMemoryAggregateStore, AggregateImportError> {
        let records = parser::parse_records(reader)?;
        Ok(InMemoryAggregateStore::from_records(records))
    }
}

use std::sync::Arc;

use chrono::{Months, NaiveDate};

use super::{AggregateStore, StoreError};
use crate::scoring::domain::{DimensionTuple, StratumCounts};

/// One adjudicated historical outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeRecord {
    pub dimensions: DimensionTuple,
    pub outcome_date: NaiveDate,
    pub eligible: bool,
}

/// Immutable in-memory snapshot of outcome records.
///
/// Cloning shares the snapshot, so concurrent scoring requests read the same data without locks.
#[derive(Debug, Default, Clone)]
pub struct InMemoryAggregateStore {
    records: Arc<Vec<OutcomeRecord>>,
}

impl InMemoryAggregateStore {
    pub fn from_records(records: Vec<OutcomeRecord>) -> Self {
        Self {
            records: Arc::new(records),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn count<F>(&self, dimensions: &DimensionTuple, in_range: F) -> (i64, i64)
    where
        F: Fn(NaiveDate) -> bool,
    {
        self.records
            .iter()
            .filter(|record| in_range(record.outcome_date) && dimensions.matches(&record.dimensions))
            .fold((0, 0), |(sample_size, successes), record| {
                (sample_size + 1, successes + i64::from(record.eligible))
            })
    }
}

impl AggregateStore for InMemoryAggregateStore {
    fn query_stratum(
        &self,
        dimensions: &DimensionTuple,
        as_of: NaiveDate,
    ) -> Result<StratumCounts, StoreError> {
        let (sample_size, successes) = self.count(dimensions, |date| date <= as_of);
        Ok(StratumCounts {
            sample_size,
            successes,
            as_of,
        })
    }

    fn query_time_windows(
        &self,
        dimensions: &DimensionTuple,
        as_of: NaiveDate,
        window_count: usize,
    ) -> Result<Vec<StratumCounts>, StoreError> {
        let window_count = u32::try_from(window_count)
            .map_err(|_| StoreError::UnsupportedWindowCount(window_count))?;
        let mut windows = Vec::new();

        for offset in 0..window_count {
            let (Some(end), Some(start)) = (
                as_of.checked_sub_months(Months::new(offset)),
                as_of.checked_sub_months(Months::new(offset + 1)),
            ) else {
                windows.push(StratumCounts::zeroed(as_of));
                continue;
            };

            let (sample_size, successes) =
                self.count(dimensions, |date| date > start && date <= end);
            windows.push(StratumCounts {
                sample_size,
                successes,
                as_of: end,
            });
        }

        Ok(windows)
    }
}

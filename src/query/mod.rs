//! Query execution over the aggregation engine
//!
//! # Architecture
//!
//! ```text
//! MetricQuery
//!      │
//!      ▼
//! ┌─────────────┐
//! │  Session    │  aggregation.session(states, range) → traversal
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │  Fan-out    │  one fetch per (state, series, row) on the read pool
//! └─────────────┘
//!      │  each completion → session.update() (concurrent)
//!      ▼
//! ┌─────────────┐
//! │  Reduce     │  reduce_all: row statistics + session.result() once
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │  Result     │  QueryResult (+ cache write-through)
//! └─────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use kuba_aggregation::aggregation::{Aggregation, BucketKind, KeyProjection};
//! use kuba_aggregation::backend::{MemoryBackend, MetricBackend, WriteMetric};
//! use kuba_aggregation::concurrency::ReadWriteThreadPools;
//! use kuba_aggregation::query::{MetricQuery, QueryExecutor};
//! use kuba_aggregation::sampling::Sampling;
//! use kuba_aggregation::types::{DataPoint, DateRange, Series};
//!
//! let pools = Arc::new(ReadWriteThreadPools::new(2, 1).unwrap());
//! let backend = Arc::new(MemoryBackend::new(Arc::clone(&pools), 60_000).unwrap());
//!
//! let series = Series::new("cpu", [("host", "a")]);
//! backend
//!     .write(WriteMetric::new(series.clone(), vec![DataPoint::new(10, 1.0), DataPoint::new(20, 2.0)]))
//!     .wait();
//!
//! let query = MetricQuery::new(
//!     "cpu",
//!     DateRange::new(0, 1_000).unwrap(),
//!     Aggregation::group(
//!         KeyProjection::group(["host"]),
//!         Aggregation::bucket(BucketKind::Sum, Sampling::of_size(1_000).unwrap()),
//!     ),
//! )
//! .with_series([series]);
//!
//! let executor = QueryExecutor::new(backend, pools);
//! let outcome = executor.execute(query).wait();
//! let result = outcome.value().unwrap();
//! assert_eq!(result.groups[0].values, vec![DataPoint::new(1_000, 3.0)]);
//! ```

pub mod executor;
pub mod result;

use crate::aggregation::{Aggregation, AggregationState};
use crate::types::{DateRange, Series};

pub use executor::QueryExecutor;
pub use result::QueryResult;

/// A query ready for execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricQuery {
    /// Canonical text of the series filter, used for cache keys and logs
    pub filter: String,
    /// Range the output buckets cover
    pub range: DateRange,
    /// Aggregation tree to apply
    pub aggregation: Aggregation,
    /// Initial states, usually one per matched series
    pub states: Vec<AggregationState>,
}

impl MetricQuery {
    /// Query without any matched series yet
    pub fn new(filter: impl Into<String>, range: DateRange, aggregation: Aggregation) -> Self {
        Self {
            filter: filter.into(),
            range,
            aggregation,
            states: Vec::new(),
        }
    }

    /// Add one initial state per series, keyed by the series tags
    pub fn with_series<I>(mut self, series: I) -> Self
    where
        I: IntoIterator<Item = Series>,
    {
        self.states
            .extend(series.into_iter().map(AggregationState::of_series));
        self
    }

    /// Add explicit initial states
    pub fn with_states<I>(mut self, states: I) -> Self
    where
        I: IntoIterator<Item = AggregationState>,
    {
        self.states.extend(states);
        self
    }

    /// Range to read from storage so every bucket sees its full window
    ///
    /// The first bucket ends one size past the size-aligned range start and
    /// reaches back `extent` from there. The last bucket ends at the
    /// size-aligned range end, which lies past `range.end()` when the end is
    /// unaligned.
    pub fn fetch_range(&self) -> DateRange {
        let extent = self.aggregation.extent().max(0);
        let start = match self.aggregation.size() {
            Some(size) => self
                .range
                .rounded(size)
                .start()
                .saturating_add(size)
                .saturating_sub(extent),
            None => self.range.start().saturating_sub(extent),
        };
        let end = self
            .aggregation
            .horizon(&self.range)
            .map_or(self.range.end(), |horizon| horizon.max(self.range.end()));

        DateRange::new(start.min(self.range.start()), end).unwrap_or(self.range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::BucketKind;
    use crate::sampling::Sampling;

    #[test]
    fn test_fetch_range_covers_extent() {
        let query = MetricQuery::new(
            "cpu",
            DateRange::new(600_000, 1_200_000).unwrap(),
            Aggregation::bucket(BucketKind::Average, Sampling::new(60_000, 300_000).unwrap()),
        );
        assert_eq!(
            query.fetch_range(),
            DateRange::new(360_000, 1_200_000).unwrap()
        );

        // unaligned start reaches back to the aligned window
        let query = MetricQuery::new(
            "cpu",
            DateRange::new(500, 2_000).unwrap(),
            Aggregation::bucket(BucketKind::Sum, Sampling::of_size(1_000).unwrap()),
        );
        assert_eq!(query.fetch_range(), DateRange::new(0, 2_000).unwrap());
    }

    #[test]
    fn test_fetch_range_reaches_aligned_end() {
        let query = MetricQuery::new(
            "cpu",
            DateRange::new(0, 90_000).unwrap(),
            Aggregation::bucket(BucketKind::Sum, Sampling::of_size(60_000).unwrap()),
        );
        assert_eq!(query.fetch_range(), DateRange::new(0, 120_000).unwrap());

        // chained stages reach as far as the widest stage
        let query = MetricQuery::new(
            "cpu",
            DateRange::new(0, 90_000).unwrap(),
            Aggregation::chain(vec![
                Aggregation::bucket(BucketKind::Sum, Sampling::of_size(50_000).unwrap()),
                Aggregation::bucket(BucketKind::Max, Sampling::of_size(30_000).unwrap()),
            ])
            .unwrap(),
        );
        assert_eq!(query.fetch_range().end(), 100_000);
    }

    #[test]
    fn test_with_series_builds_states() {
        let query = MetricQuery::new(
            "cpu",
            DateRange::new(0, 1).unwrap(),
            Aggregation::bucket(BucketKind::Sum, Sampling::of_size(1).unwrap()),
        )
        .with_series([
            Series::new("cpu", [("host", "a")]),
            Series::new("cpu", [("host", "b")]),
        ]);

        assert_eq!(query.states.len(), 2);
        assert_eq!(query.states[0].series.len(), 1);
        assert_eq!(query.states[1].key.get("host").map(String::as_str), Some("b"));
    }
}

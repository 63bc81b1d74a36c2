//! Time bucketing of samples
//!
//! A [`BucketAggregation`] lays out one [`Bucket`] per window covering the
//! query range and folds every incoming sample into all windows that contain
//! it. Bucket `T` owns the half-open window `[T - extent, T)`:
//!
//! ```text
//!   size = 60s, extent = 120s
//!
//!        0s        60s       120s      180s
//!   ─────┼─────────┼─────────┼─────────┼──▶ t
//!        │◀─── bucket 120s ──▶│
//!                  │◀─── bucket 180s ──▶│
//!                      ▲
//!                      t = 90s lands in both
//! ```
//!
//! With `extent == size` every in-range sample lands in exactly one bucket.
//! Samples outside all windows are dropped and counted as out of bounds.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::trace;

use crate::aggregation::bucket::{Bucket, BucketKind};
use crate::aggregation::statistics::Statistics;
use crate::aggregation::{
    AggregationData, AggregationResult, AggregationSession, AggregationState,
    AggregationTraversal,
};
use crate::error::Result;
use crate::metrics::{SAMPLES_APPLIED, SAMPLES_OUT_OF_BOUNDS};
use crate::sampling::Sampling;
use crate::types::{DataPoint, DateRange, Series, Tags};

/// Aggregation folding samples into fixed-width time buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BucketAggregation {
    kind: BucketKind,
    sampling: Sampling,
}

impl BucketAggregation {
    /// Create a bucket aggregation of `kind` over `sampling`
    pub fn new(kind: BucketKind, sampling: Sampling) -> Self {
        Self { kind, sampling }
    }

    /// Kind of bucket this aggregation builds
    pub fn kind(&self) -> BucketKind {
        self.kind
    }

    /// Bucket layout
    pub fn sampling(&self) -> &Sampling {
        &self.sampling
    }

    /// Empty bucket for the window ending at `timestamp`
    pub fn build_bucket(&self, timestamp: i64) -> Bucket {
        Bucket::new(self.kind, timestamp)
    }

    /// Output sample for a finished bucket
    pub fn build(&self, bucket: &Bucket) -> DataPoint {
        DataPoint::new(bucket.timestamp(), bucket.value())
    }

    /// Set up a session covering `range`
    ///
    /// The states pass through unchanged; every update lands in the same
    /// bucket sequence regardless of which state it came from.
    pub fn session(
        &self,
        states: Vec<AggregationState>,
        range: &DateRange,
    ) -> Result<AggregationTraversal> {
        let buckets: Vec<Bucket> = self
            .sampling
            .bucket_timestamps(range)
            .into_iter()
            .map(|ts| self.build_bucket(ts))
            .collect();

        let group = match states.as_slice() {
            [single] => single.key.clone(),
            _ => Tags::new(),
        };

        let series = states
            .iter()
            .flat_map(|state| state.series.iter().cloned())
            .collect();

        trace!(
            kind = %self.kind,
            buckets = buckets.len(),
            range = %range,
            "bucket session created"
        );

        let session = BucketSession {
            aggregation: *self,
            group,
            series,
            buckets,
            sample_size: AtomicU64::new(0),
            out_of_bounds: AtomicU64::new(0),
        };

        Ok(AggregationTraversal::new(states, Box::new(session)))
    }

    /// Number of output samples produced for `range`
    pub fn estimate(&self, range: &DateRange) -> u64 {
        self.sampling.bucket_count(range)
    }

    /// How far back from a bucket timestamp input is read
    pub fn extent(&self) -> i64 {
        self.sampling.extent()
    }
}

struct BucketSession {
    aggregation: BucketAggregation,
    group: Tags,
    series: BTreeSet<Series>,
    /// Ascending by timestamp, spaced `size` apart
    buckets: Vec<Bucket>,
    sample_size: AtomicU64,
    out_of_bounds: AtomicU64,
}

impl BucketSession {
    /// Indices of the buckets whose window contains `timestamp`
    ///
    /// Bucket `k` has timestamp `first + k * size` and contains `t` when
    /// `t < T <= t + extent`. Computed in `i128` so samples anywhere in the
    /// `i64` domain fall out of bounds instead of overflowing.
    fn covering(&self, timestamp: i64) -> Option<(usize, usize)> {
        let first = i128::from(self.buckets.first()?.timestamp());
        let size = i128::from(self.aggregation.sampling.size());
        let extent = i128::from(self.aggregation.sampling.extent());
        let offset = i128::from(timestamp) - first;

        let lo = (offset.div_euclid(size) + 1).max(0);
        let hi = (offset + extent)
            .div_euclid(size)
            .min(self.buckets.len() as i128 - 1);

        if hi < 0 || lo > hi {
            return None;
        }
        Some((lo as usize, hi as usize))
    }
}

impl AggregationSession for BucketSession {
    fn update(&self, data: AggregationData) -> Result<()> {
        let mut applied = 0u64;
        let mut dropped = 0u64;

        for point in &data.values {
            match self.covering(point.timestamp) {
                Some((lo, hi)) => {
                    for bucket in &self.buckets[lo..=hi] {
                        bucket.update(point.timestamp, point.value);
                    }
                    applied += 1;
                }
                None => dropped += 1,
            }
        }

        self.sample_size.fetch_add(applied, Ordering::Relaxed);
        self.out_of_bounds.fetch_add(dropped, Ordering::Relaxed);
        SAMPLES_APPLIED.inc_by(applied as f64);
        SAMPLES_OUT_OF_BOUNDS.inc_by(dropped as f64);
        Ok(())
    }

    fn result(&self) -> Result<AggregationResult> {
        let values: Vec<DataPoint> = self
            .buckets
            .iter()
            .map(|bucket| self.aggregation.build(bucket))
            .collect();

        let touched = self.buckets.iter().filter(|b| b.count() > 0).count() as u64;

        let statistics = Statistics::aggregator(
            self.sample_size.load(Ordering::Relaxed),
            self.out_of_bounds.load(Ordering::Relaxed),
            touched,
        );

        let data = AggregationData {
            group: self.group.clone(),
            series: self.series.clone(),
            values,
            output: Some(self.aggregation.sampling),
        };

        Ok(AggregationResult::new(vec![data], statistics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::tags;

    fn sum(size: i64, extent: i64) -> BucketAggregation {
        BucketAggregation::new(BucketKind::Sum, Sampling::new(size, extent).unwrap())
    }

    fn run(aggregation: BucketAggregation, range: DateRange, points: &[(i64, f64)]) -> AggregationResult {
        let traversal = aggregation.session(Vec::new(), &range).unwrap();
        let values = points.iter().map(|(t, v)| DataPoint::new(*t, *v)).collect();
        traversal
            .session
            .update(AggregationData::raw(Tags::new(), BTreeSet::new(), values))
            .unwrap();
        traversal.session.result().unwrap()
    }

    #[test]
    fn test_sum_buckets() {
        let result = run(
            sum(60_000, 60_000),
            DateRange::new(0, 120_000).unwrap(),
            &[(0, 1.0), (30_000, 2.0), (90_000, 3.0)],
        );

        assert_eq!(result.results.len(), 1);
        assert_eq!(
            result.results[0].values,
            vec![DataPoint::new(60_000, 3.0), DataPoint::new(120_000, 3.0)]
        );
        assert_eq!(result.statistics, Statistics::aggregator(3, 0, 2));
    }

    #[test]
    fn test_out_of_bounds_dropped_and_counted() {
        let result = run(
            sum(60_000, 60_000),
            DateRange::new(0, 120_000).unwrap(),
            &[(-1, 5.0), (50_000, 1.0), (120_000, 7.0)],
        );

        assert_eq!(result.results[0].values[0], DataPoint::new(60_000, 1.0));
        assert!(result.results[0].values[1].value.is_nan());
        assert_eq!(result.statistics.aggregator.sample_size, 1);
        assert_eq!(result.statistics.aggregator.out_of_bounds, 2);
        assert_eq!(result.statistics.aggregator.buckets_touched, 1);
    }

    #[test]
    fn test_extent_overlaps_buckets() {
        // each point lands in two buckets when extent is twice the size
        let result = run(
            sum(60_000, 120_000),
            DateRange::new(0, 180_000).unwrap(),
            &[(30_000, 1.0), (90_000, 10.0)],
        );

        let values: Vec<f64> = result.results[0].values.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![1.0, 11.0, 10.0]);
        assert_eq!(result.statistics.aggregator.sample_size, 2);
    }

    #[test]
    fn test_single_state_group() {
        let aggregation = sum(1_000, 1_000);
        let state = AggregationState::new(
            tags([("host", "a")]),
            [Series::new("cpu", [("host", "a")])].into_iter().collect(),
        );
        let traversal = aggregation
            .session(vec![state], &DateRange::new(0, 3_000).unwrap())
            .unwrap();

        assert_eq!(traversal.states.len(), 1);
        let result = traversal.session.result().unwrap();
        assert_eq!(result.results[0].group, tags([("host", "a")]));
        assert_eq!(result.results[0].series.len(), 1);
        assert_eq!(result.results[0].values.len(), 3);
    }

    #[test]
    fn test_estimate_and_extent() {
        let aggregation = sum(60_000, 120_000);
        let range = DateRange::new(0, 600_000).unwrap();
        assert_eq!(aggregation.estimate(&range), 10);
        assert_eq!(aggregation.extent(), 120_000);
    }

    #[test]
    fn test_empty_range() {
        let result = run(sum(1_000, 1_000), DateRange::new(5, 5).unwrap(), &[(5, 1.0)]);
        assert!(result.results[0].values.is_empty());
        assert_eq!(result.statistics.aggregator.out_of_bounds, 1);
    }

    #[test]
    fn test_extreme_timestamps_out_of_bounds() {
        let result = run(
            sum(60_000, 180_000),
            DateRange::new(0, 120_000).unwrap(),
            &[(i64::MAX, 1.0), (i64::MIN, 2.0), (30_000, 3.0)],
        );

        assert_eq!(
            result.results[0].values,
            vec![DataPoint::new(60_000, 3.0), DataPoint::new(120_000, 3.0)]
        );
        assert_eq!(result.statistics.aggregator.sample_size, 1);
        assert_eq!(result.statistics.aggregator.out_of_bounds, 2);
    }

    #[test]
    fn test_buckets_at_top_of_domain() {
        let range = DateRange::new(i64::MAX - 5_000, i64::MAX).unwrap();
        let result = run(
            sum(1_000, 1_000),
            range,
            &[(i64::MAX - 1_000, 4.0), (i64::MAX - 1, 1.0), (i64::MIN, 1.0)],
        );

        let values = &result.results[0].values;
        assert_eq!(values.len(), 5);
        let last = values.last().unwrap();
        assert_eq!(last.timestamp, i64::MAX - 807);
        assert_eq!(last.value, 4.0);
        // no representable bucket holds i64::MAX - 1
        assert_eq!(result.statistics.aggregator.out_of_bounds, 2);
    }
}

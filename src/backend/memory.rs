//! In-memory row-sharded backend
//!
//! Samples are stored per `(series, row base)` where a row covers a fixed
//! width of time (three weeks by default). A fetch issues one read task per
//! row intersecting the requested range:
//!
//! ```text
//!   range        [────────────────────────────)
//!   rows   |  base 0  |  base w  |  base 2w  |  base 3w  |
//!             fetch ①    fetch ②    fetch ③
//! ```
//!
//! The backend as a whole, or individual rows, can be switched off to
//! simulate unavailable storage; affected reads come back cancelled with
//! [`CancelReason::BackendDisabled`].

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tracing::{debug, info};

use crate::backend::{FetchData, MetricBackend, WriteBatchResult, WriteMetric};
use crate::concurrency::{reduce_all, Callback, CancelReason, ReadWriteThreadPools};
use crate::config::BackendConfig;
use crate::error::{Error, Result};
use crate::types::{DataPoint, DateRange, Series};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RowKey {
    series: Series,
    base: i64,
}

type Row = BTreeMap<i64, f64>;

/// Row-sharded in-memory storage
pub struct MemoryBackend {
    id: String,
    pools: Arc<ReadWriteThreadPools>,
    row_width: i64,
    enabled: AtomicBool,
    rows: Arc<DashMap<RowKey, Row>>,
    disabled_rows: DashSet<i64>,
}

impl MemoryBackend {
    /// Create a backend with rows `row_width` milliseconds wide
    pub fn new(pools: Arc<ReadWriteThreadPools>, row_width: i64) -> Result<Self> {
        if row_width <= 0 {
            return Err(Error::configuration(format!(
                "row width must be positive, got {}",
                row_width
            )));
        }

        info!(row_width, "Memory backend created");

        Ok(Self {
            id: "memory".to_string(),
            pools,
            row_width,
            enabled: AtomicBool::new(true),
            rows: Arc::new(DashMap::new()),
            disabled_rows: DashSet::new(),
        })
    }

    /// Create a backend from configuration
    pub fn from_config(pools: Arc<ReadWriteThreadPools>, config: &BackendConfig) -> Result<Self> {
        let backend = Self::new(pools, config.row_width_ms)?;
        backend.set_enabled(config.enabled);
        Ok(backend)
    }

    /// Width of one row in milliseconds
    pub fn row_width(&self) -> i64 {
        self.row_width
    }

    /// Switch the whole backend on or off
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Make reads of the row starting at `base` come back cancelled
    pub fn disable_row(&self, base: i64) {
        self.disabled_rows.insert(self.base(base));
    }

    /// Undo [`disable_row`](Self::disable_row)
    pub fn enable_row(&self, base: i64) {
        self.disabled_rows.remove(&self.base(base));
    }

    /// Base timestamp of the row containing `timestamp`
    ///
    /// Rows starting below `i64::MIN` are clamped to it.
    pub fn base(&self, timestamp: i64) -> i64 {
        row_base(timestamp, self.row_width)
    }

    /// Bases of every row intersecting `range`, ascending
    pub fn bases(&self, range: &DateRange) -> Vec<i64> {
        let mut bases = Vec::new();
        if range.is_empty() {
            return bases;
        }

        let mut base = self.base(range.start());
        while base < range.end() {
            bases.push(base);
            base = match base.checked_add(self.row_width) {
                Some(next) => next,
                None => break,
            };
        }
        bases
    }

    /// Number of non-empty `(series, row)` pairs held
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn row_key(&self, series: &Series, base: i64) -> RowKey {
        RowKey {
            series: series.clone(),
            base,
        }
    }
}

impl MetricBackend for MemoryBackend {
    fn backend_id(&self) -> &str {
        &self.id
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn fetch(&self, series: &Series, range: &DateRange) -> Vec<Callback<FetchData>> {
        if !self.is_enabled() {
            debug!(backend = %self.id, series = %series, "Backend disabled, fetch cancelled");
            return vec![Callback::cancelled(CancelReason::BackendDisabled)];
        }

        self.bases(range)
            .into_iter()
            .map(|base| {
                if self.disabled_rows.contains(&base) {
                    debug!(series = %series, shard = base, "Row disabled, fetch cancelled");
                    return Callback::cancelled(CancelReason::BackendDisabled);
                }

                let rows = Arc::clone(&self.rows);
                let key = self.row_key(series, base);
                let window = *range;

                self.pools.read().resolve(move || {
                    let points = rows
                        .get(&key)
                        .map(|row| {
                            row.range(window.start()..window.end())
                                .map(|(t, v)| DataPoint::new(*t, *v))
                                .collect()
                        })
                        .unwrap_or_default();

                    Ok(FetchData {
                        series: key.series,
                        base,
                        points,
                    })
                })
            })
            .collect()
    }

    fn column_count(&self, series: &Series, range: &DateRange) -> Callback<u64> {
        if !self.is_enabled() {
            return Callback::cancelled(CancelReason::BackendDisabled);
        }

        let rows: Vec<Callback<u64>> = self
            .bases(range)
            .into_iter()
            .map(|base| {
                if self.disabled_rows.contains(&base) {
                    return Callback::cancelled(CancelReason::BackendDisabled);
                }

                let rows = Arc::clone(&self.rows);
                let key = self.row_key(series, base);
                let window = *range;

                self.pools.read().resolve(move || {
                    Ok(rows
                        .get(&key)
                        .map(|row| row.range(window.start()..window.end()).count() as u64)
                        .unwrap_or(0))
                })
            })
            .collect();

        reduce_all(rows, |counts, failed, _cancelled| {
            if let Some(error) = failed.first() {
                return Err(Error::Backend(format!(
                    "{} of the rows failed to count: {}",
                    failed.len(),
                    error
                )));
            }
            Ok(counts.iter().sum())
        })
    }

    fn write(&self, write: WriteMetric) -> Callback<WriteBatchResult> {
        if !self.is_enabled() {
            return Callback::cancelled(CancelReason::BackendDisabled);
        }

        let rows = Arc::clone(&self.rows);
        let row_width = self.row_width;

        self.pools.write().resolve(move || {
            let WriteMetric { series, data } = write;
            let mut touched = HashSet::new();

            for point in &data {
                let base = row_base(point.timestamp, row_width);
                touched.insert(base);
                rows.entry(RowKey {
                    series: series.clone(),
                    base,
                })
                .or_default()
                .insert(point.timestamp, point.value);
            }

            debug!(series = %series, points = data.len(), rows = touched.len(), "Write applied");

            Ok(WriteBatchResult {
                points: data.len(),
                rows: touched.len(),
            })
        })
    }
}

fn row_base(timestamp: i64, row_width: i64) -> i64 {
    timestamp
        .div_euclid(row_width)
        .checked_mul(row_width)
        .unwrap_or(i64::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::Outcome;

    fn backend(row_width: i64) -> MemoryBackend {
        let pools = Arc::new(ReadWriteThreadPools::new(2, 1).unwrap());
        MemoryBackend::new(pools, row_width).unwrap()
    }

    fn seed(backend: &MemoryBackend, series: &Series, points: &[(i64, f64)]) {
        let data = points.iter().map(|(t, v)| DataPoint::new(*t, *v)).collect();
        let result = backend.write(WriteMetric::new(series.clone(), data)).wait();
        assert!(result.is_resolved());
    }

    #[test]
    fn test_invalid_row_width() {
        let pools = Arc::new(ReadWriteThreadPools::new(1, 1).unwrap());
        assert!(MemoryBackend::new(pools, 0).is_err());
    }

    #[test]
    fn test_bases() {
        let backend = backend(100);
        assert_eq!(backend.bases(&DateRange::new(50, 250).unwrap()), vec![0, 100, 200]);
        assert_eq!(backend.bases(&DateRange::new(100, 200).unwrap()), vec![100]);
        assert_eq!(backend.bases(&DateRange::new(-10, 10).unwrap()), vec![-100, 0]);
        assert!(backend.bases(&DateRange::new(7, 7).unwrap()).is_empty());

        let top = backend.bases(&DateRange::new(i64::MAX - 150, i64::MAX).unwrap());
        assert_eq!(top, vec![i64::MAX - 207, i64::MAX - 107, i64::MAX - 7]);
        let bottom = backend.bases(&DateRange::new(i64::MIN, i64::MIN + 10).unwrap());
        assert_eq!(bottom, vec![i64::MIN]);
    }

    #[test]
    fn test_fetch_one_callback_per_row() {
        let backend = backend(100);
        let series = Series::new("cpu", [("host", "a")]);
        seed(&backend, &series, &[(10, 1.0), (150, 2.0), (260, 3.0), (400, 4.0)]);

        let fetches = backend.fetch(&series, &DateRange::new(0, 300).unwrap());
        assert_eq!(fetches.len(), 3);

        let total: usize = fetches
            .iter()
            .map(|f| f.wait().value().map(|d| d.points.len()).unwrap_or(0))
            .sum();
        assert_eq!(total, 3);
    }

    #[test]
    fn test_fetch_clips_to_range() {
        let backend = backend(1_000);
        let series = Series::new("cpu", [("host", "a")]);
        seed(&backend, &series, &[(10, 1.0), (20, 2.0), (30, 3.0)]);

        let fetches = backend.fetch(&series, &DateRange::new(15, 30).unwrap());
        let outcome = fetches[0].wait();
        let data = outcome.value().unwrap();
        assert_eq!(data.points, vec![DataPoint::new(20, 2.0)]);
        assert_eq!(data.base, 0);
    }

    #[test]
    fn test_disabled_backend_cancels() {
        let backend = backend(100);
        backend.set_enabled(false);
        let series = Series::new("cpu", [("host", "a")]);

        let fetches = backend.fetch(&series, &DateRange::new(0, 1_000).unwrap());
        assert_eq!(fetches.len(), 1);
        assert!(matches!(
            &*fetches[0].wait(),
            Outcome::Cancelled(CancelReason::BackendDisabled)
        ));
        assert!(backend.column_count(&series, &DateRange::new(0, 10).unwrap()).wait().is_cancelled());
    }

    #[test]
    fn test_disabled_row() {
        let backend = backend(100);
        let series = Series::new("cpu", [("host", "a")]);
        seed(&backend, &series, &[(10, 1.0), (110, 2.0)]);
        backend.disable_row(150);

        let fetches = backend.fetch(&series, &DateRange::new(0, 200).unwrap());
        assert!(fetches[0].wait().is_resolved());
        assert!(fetches[1].wait().is_cancelled());

        backend.enable_row(100);
        let fetches = backend.fetch(&series, &DateRange::new(0, 200).unwrap());
        assert!(fetches.iter().all(|f| f.wait().is_resolved()));
    }

    #[test]
    fn test_column_count_reduces_rows() {
        let backend = backend(100);
        let series = Series::new("cpu", [("host", "a")]);
        seed(&backend, &series, &[(10, 1.0), (50, 1.0), (150, 2.0), (450, 3.0)]);
        assert_eq!(backend.row_count(), 3);

        let count = backend.column_count(&series, &DateRange::new(0, 400).unwrap()).wait();
        assert_eq!(count.value(), Some(&3));
    }

    #[test]
    fn test_write_overwrites_timestamp() {
        let backend = backend(100);
        let series = Series::new("cpu", [("host", "a")]);
        seed(&backend, &series, &[(10, 1.0)]);
        seed(&backend, &series, &[(10, 5.0), (120, 1.0)]);

        let fetches = backend.fetch(&series, &DateRange::new(0, 100).unwrap());
        let outcome = fetches[0].wait();
        assert_eq!(outcome.value().unwrap().points, vec![DataPoint::new(10, 5.0)]);
    }
}

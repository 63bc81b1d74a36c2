//! Storage collaborator
//!
//! The aggregation engine only needs three operations from storage: fetch a
//! series over a range (one callback per physical row), count stored columns
//! and write samples. Every operation returns a [`Callback`] immediately;
//! the work itself runs on the read or write pool.
//!
//! A backend that cannot serve a request cancels the returned callbacks with
//! [`CancelReason::BackendDisabled`](crate::concurrency::CancelReason)
//! instead of failing them, so the query layer can treat those rows as
//! missing rather than broken.

pub mod memory;

use serde::{Deserialize, Serialize};

use crate::concurrency::Callback;
use crate::types::{DataPoint, DateRange, Series};

pub use memory::MemoryBackend;

/// Samples of one series read from one storage row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchData {
    /// Series the samples belong to
    pub series: Series,
    /// Base timestamp of the row they were read from
    pub base: i64,
    /// Samples in ascending timestamp order
    pub points: Vec<DataPoint>,
}

/// Samples to write for one series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteMetric {
    /// Target series
    pub series: Series,
    /// Samples to store; a repeated timestamp overwrites the earlier value
    pub data: Vec<DataPoint>,
}

impl WriteMetric {
    /// Create a write request
    pub fn new(series: Series, data: Vec<DataPoint>) -> Self {
        Self { series, data }
    }
}

/// Outcome of a write batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteBatchResult {
    /// Samples stored
    pub points: usize,
    /// Distinct rows touched
    pub rows: usize,
}

/// Storage backend consumed by the query executor
pub trait MetricBackend: Send + Sync + 'static {
    /// Identifier used in logs
    fn backend_id(&self) -> &str;

    /// Whether the backend currently serves requests
    fn is_enabled(&self) -> bool;

    /// Fetch `series` over `range`, one callback per storage row
    fn fetch(&self, series: &Series, range: &DateRange) -> Vec<Callback<FetchData>>;

    /// Number of stored samples of `series` inside `range`
    fn column_count(&self, series: &Series, range: &DateRange) -> Callback<u64>;

    /// Store samples
    fn write(&self, write: WriteMetric) -> Callback<WriteBatchResult>;
}

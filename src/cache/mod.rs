//! Aggregation result caching
//!
//! The cache sits in front of query execution. Entries are keyed by
//! [`CacheKey`] (filter, group, aggregation and time base) and hold the
//! bucketed output samples of previous runs. A lookup returns the samples
//! already known plus the sub-ranges that still have to be computed.

pub mod memory;

use serde::Serialize;

use crate::aggregation::Aggregation;
use crate::error::Result;
use crate::types::{DataPoint, DateRange, Tags};

pub use memory::MemoryAggregationCache;

/// Identity of one cached aggregation output
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Canonical form of the series filter
    pub filter: String,
    /// Output group
    pub group: Tags,
    /// Aggregation producing the samples
    pub aggregation: Aggregation,
    /// Time base the query was aligned to
    pub base: i64,
}

impl CacheKey {
    /// Create a cache key
    pub fn new(filter: impl Into<String>, group: Tags, aggregation: Aggregation, base: i64) -> Self {
        Self {
            filter: filter.into(),
            group,
            aggregation,
            base,
        }
    }
}

/// Outcome of a cache lookup
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheQueryResult {
    /// Range that was looked up
    pub range: DateRange,
    /// Cached samples inside the range, ascending
    pub result: Vec<DataPoint>,
    /// Sub-ranges without cached samples, ascending and disjoint
    pub misses: Vec<DateRange>,
}

impl CacheQueryResult {
    /// Lookup that found nothing
    pub fn miss(range: DateRange) -> Self {
        Self {
            range,
            result: Vec::new(),
            misses: if range.is_empty() { Vec::new() } else { vec![range] },
        }
    }

    /// Whether every bucket of the range was cached
    pub fn is_complete(&self) -> bool {
        self.misses.is_empty()
    }
}

/// Cache of aggregation outputs
pub trait AggregationCache: Send + Sync {
    /// Cached samples for `key` inside `range`, plus what is missing
    fn lookup(&self, key: &CacheKey, range: &DateRange) -> Result<CacheQueryResult>;

    /// Remember output samples for `key`
    fn store(&self, key: CacheKey, points: &[DataPoint]) -> Result<()>;
}

//! Statistics tracked across an aggregation run
//!
//! [`Statistics`] is a commutative monoid: `merge` is associative and
//! commutative and [`Statistics::EMPTY`] is its identity, so partial
//! statistics from concurrent sessions and shards can be combined in any
//! order.

use serde::{Deserialize, Serialize};

/// Counters produced while folding samples into buckets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregatorStatistics {
    /// Samples that landed in at least one bucket
    pub sample_size: u64,
    /// Samples outside every bucket window, dropped
    pub out_of_bounds: u64,
    /// Buckets that received at least one sample
    pub buckets_touched: u64,
}

impl AggregatorStatistics {
    /// Identity element
    pub const EMPTY: AggregatorStatistics = AggregatorStatistics {
        sample_size: 0,
        out_of_bounds: 0,
        buckets_touched: 0,
    };

    /// Combine two sets of counters
    pub fn merge(&self, other: &AggregatorStatistics) -> AggregatorStatistics {
        AggregatorStatistics {
            sample_size: self.sample_size + other.sample_size,
            out_of_bounds: self.out_of_bounds + other.out_of_bounds,
            buckets_touched: self.buckets_touched + other.buckets_touched,
        }
    }
}

/// Counters describing shard fetch outcomes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RowStatistics {
    /// Fetches that resolved
    pub successful: u64,
    /// Fetches that failed
    pub failed: u64,
    /// Fetches that were cancelled
    pub cancelled: u64,
}

impl RowStatistics {
    /// Identity element
    pub const EMPTY: RowStatistics = RowStatistics {
        successful: 0,
        failed: 0,
        cancelled: 0,
    };

    /// Build row statistics from outcome counts
    pub fn new(successful: u64, failed: u64, cancelled: u64) -> Self {
        Self {
            successful,
            failed,
            cancelled,
        }
    }

    /// Combine two sets of counters
    pub fn merge(&self, other: &RowStatistics) -> RowStatistics {
        RowStatistics {
            successful: self.successful + other.successful,
            failed: self.failed + other.failed,
            cancelled: self.cancelled + other.cancelled,
        }
    }

    /// Whether any fetch did not resolve
    pub fn is_degraded(&self) -> bool {
        self.failed > 0 || self.cancelled > 0
    }
}

/// All statistics of one aggregation run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Statistics {
    /// Bucket folding counters
    pub aggregator: AggregatorStatistics,
    /// Shard fetch counters
    pub row: RowStatistics,
}

impl Statistics {
    /// Identity element: `EMPTY.merge(&x) == x`
    pub const EMPTY: Statistics = Statistics {
        aggregator: AggregatorStatistics::EMPTY,
        row: RowStatistics::EMPTY,
    };

    /// Statistics holding only aggregator counters
    pub fn aggregator(sample_size: u64, out_of_bounds: u64, buckets_touched: u64) -> Self {
        Statistics {
            aggregator: AggregatorStatistics {
                sample_size,
                out_of_bounds,
                buckets_touched,
            },
            row: RowStatistics::EMPTY,
        }
    }

    /// Statistics holding only row counters
    pub fn row(row: RowStatistics) -> Self {
        Statistics {
            aggregator: AggregatorStatistics::EMPTY,
            row,
        }
    }

    /// Combine two statistics
    pub fn merge(&self, other: &Statistics) -> Statistics {
        Statistics {
            aggregator: self.aggregator.merge(&other.aggregator),
            row: self.row.merge(&other.row),
        }
    }
}

//! Kuba Aggregation - Concurrent time-series aggregation engine
//!
//! This library provides the query-side core of a metrics store:
//! - Recursive composition of time-bucketing and group-by aggregations
//! - Streaming fold of out-of-order samples into overlapping buckets
//! - Single-assignment callbacks with exactly-once reduction and cancellation
//! - Isolated, bounded read/write worker pools
//! - Fan-out query execution over a row-sharded storage backend

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod sampling;
pub mod types;

/// Prometheus metrics and telemetry
pub mod metrics;

/// Configuration management with TOML support
pub mod config;

/// Callbacks, worker pools and all-children-complete reducers
pub mod concurrency;

/// Bucket, grouping and chained aggregations with their sessions
pub mod aggregation;

/// Storage collaborator trait and the in-memory row-sharded backend
pub mod backend;

/// Aggregation result cache keyed by query fingerprint
pub mod cache;

/// Query execution: session setup, shard fan-out and reduction
pub mod query;

// Re-export main types
pub use aggregation::{Aggregation, AggregationResult, Statistics};
pub use concurrency::{Callback, CancelReason, ReadWriteThreadPools};
pub use config::EngineConfig;
pub use error::{Error, Result};
pub use query::{MetricQuery, QueryExecutor, QueryResult};
pub use sampling::Sampling;
pub use types::{DataPoint, DateRange, Series, Tags};

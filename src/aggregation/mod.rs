//! Recursive Aggregation Engine
//!
//! An [`Aggregation`] is a tree of operators. Setting one up against a list
//! of input states and a time range produces an [`AggregationTraversal`]:
//! the expanded states to fetch plus the root [`AggregationSession`] that
//! fetched samples are pushed into.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │     Aggregation (value type)        │
//! │  Bucket | Group | Chain             │
//! └─────────────────────────────────────┘
//!                  ↓ session(states, range)
//! ┌─────────────────────────────────────┐
//! │       AggregationTraversal          │
//! │  expanded states + root session     │
//! └─────────────────────────────────────┘
//!                  ↓ update(data) × N (concurrent)
//! ┌─────────────────────────────────────┐
//! │   GroupSession → BucketSession      │
//! │  per-group routing, bucket folding  │
//! └─────────────────────────────────────┘
//!                  ↓ result() once
//! ┌─────────────────────────────────────┐
//! │        AggregationResult            │
//! │  output groups + merged Statistics  │
//! └─────────────────────────────────────┘
//! ```
//!
//! Sessions are owned by exactly one in-flight query. They accept updates
//! from any number of threads through `&self`; `result()` is called once
//! after every update has been delivered.
//!
//! # Example
//!
//! ```rust
//! use std::collections::BTreeSet;
//! use kuba_aggregation::aggregation::{
//!     Aggregation, AggregationData, AggregationState, BucketKind, KeyProjection,
//! };
//! use kuba_aggregation::sampling::Sampling;
//! use kuba_aggregation::types::{tags, DataPoint, DateRange, Series};
//!
//! let aggregation = Aggregation::group(
//!     KeyProjection::group(["host"]),
//!     Aggregation::bucket(BucketKind::Sum, Sampling::of_size(60_000).unwrap()),
//! );
//!
//! let series = Series::new("cpu", [("host", "a"), ("dc", "x")]);
//! let state = AggregationState::new(series.tags.clone(), [series].into_iter().collect());
//! let range = DateRange::new(0, 120_000).unwrap();
//!
//! let traversal = aggregation.session(vec![state], &range).unwrap();
//! traversal.session.update(AggregationData::raw(
//!     tags([("host", "a")]),
//!     BTreeSet::new(),
//!     vec![DataPoint::new(0, 1.0), DataPoint::new(30_000, 2.0), DataPoint::new(90_000, 3.0)],
//! )).unwrap();
//!
//! let result = traversal.session.result().unwrap();
//! assert_eq!(
//!     result.results[0].values,
//!     vec![DataPoint::new(60_000, 3.0), DataPoint::new(120_000, 3.0)]
//! );
//! ```

pub mod bucket;
pub mod bucket_aggregation;
pub mod chain;
pub mod grouping;
pub mod statistics;

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::error::Result;
use crate::sampling::Sampling;
use crate::types::{DataPoint, DateRange, Series, Tags};

pub use bucket::{Bucket, BucketKind};
pub use bucket_aggregation::BucketAggregation;
pub use chain::ChainAggregation;
pub use grouping::{GroupSession, GroupingAggregation, KeyProjection};
pub use statistics::{AggregatorStatistics, RowStatistics, Statistics};

// ============================================================================
// Aggregation tree
// ============================================================================

/// Composable aggregation operator
///
/// Aggregations are immutable values with structural equality and hashing,
/// so the same tree can be reused across queries and embedded in cache keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Aggregation {
    /// Fold samples into time buckets
    Bucket(BucketAggregation),
    /// Partition by a tag projection, applying a child per group
    Group(GroupingAggregation),
    /// Ordered pipeline of aggregations
    Chain(ChainAggregation),
}

impl Aggregation {
    /// Bucket aggregation of `kind` over `sampling`
    pub fn bucket(kind: BucketKind, sampling: Sampling) -> Self {
        Aggregation::Bucket(BucketAggregation::new(kind, sampling))
    }

    /// Grouping aggregation applying `each` per projected key
    pub fn group(projection: KeyProjection, each: Aggregation) -> Self {
        Aggregation::Group(GroupingAggregation::new(projection, each))
    }

    /// Pipeline of `stages`
    pub fn chain(stages: Vec<Aggregation>) -> Result<Self> {
        ChainAggregation::new(stages).map(Aggregation::Chain)
    }

    /// Expand `states` and build the root session for `range`
    pub fn session(
        &self,
        states: Vec<AggregationState>,
        range: &DateRange,
    ) -> Result<AggregationTraversal> {
        match self {
            Aggregation::Bucket(a) => a.session(states, range),
            Aggregation::Group(a) => a.session(states, range),
            Aggregation::Chain(a) => a.session(states, range),
        }
    }

    /// Expected number of output samples per group for `range`
    pub fn estimate(&self, range: &DateRange) -> u64 {
        match self {
            Aggregation::Bucket(a) => a.estimate(range),
            Aggregation::Group(a) => a.estimate(range),
            Aggregation::Chain(a) => a.estimate(range),
        }
    }

    /// How far before the query start input must be fetched, in milliseconds
    pub fn extent(&self) -> i64 {
        match self {
            Aggregation::Bucket(a) => a.extent(),
            Aggregation::Group(a) => a.extent(),
            Aggregation::Chain(a) => a.extent(),
        }
    }

    /// Spacing of the output samples, if the output is bucketed
    pub fn size(&self) -> Option<i64> {
        match self {
            Aggregation::Bucket(a) => Some(a.sampling().size()),
            Aggregation::Group(a) => a.each().size(),
            Aggregation::Chain(a) => a.stages().last().and_then(Aggregation::size),
        }
    }

    /// Timestamp of the latest bucket any stage emits for `range`
    ///
    /// Input up to this point must be fetched for that bucket to see its
    /// whole window. `None` when the tree has no bucket stage.
    pub fn horizon(&self, range: &DateRange) -> Option<i64> {
        match self {
            Aggregation::Bucket(a) => a.sampling().bucket_timestamps(range).last().copied(),
            Aggregation::Group(a) => a.each().horizon(range),
            Aggregation::Chain(a) => a.stages().iter().filter_map(|s| s.horizon(range)).max(),
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregation::Bucket(a) => write!(f, "{}({})", a.kind(), a.sampling()),
            Aggregation::Group(a) => write!(f, "{} by {}", a.each(), a.projection()),
            Aggregation::Chain(a) => {
                for (i, stage) in a.stages().iter().enumerate() {
                    if i > 0 {
                        f.write_str(" | ")?;
                    }
                    write!(f, "{}", stage)?;
                }
                Ok(())
            }
        }
    }
}

// ============================================================================
// Session plumbing
// ============================================================================

/// Live accumulator of one aggregation run
pub trait AggregationSession: Send + Sync {
    /// Push a batch of samples; may be called concurrently
    fn update(&self, data: AggregationData) -> Result<()>;

    /// Produce the output once all updates have been delivered
    ///
    /// Fails with an invariant violation when an intermediate stage cannot
    /// place data produced by the stage before it.
    fn result(&self) -> Result<AggregationResult>;
}

/// One group prior to fetching: its key and member series
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AggregationState {
    /// Group key
    pub key: Tags,
    /// Series belonging to the group
    pub series: BTreeSet<Series>,
}

impl AggregationState {
    /// Create a state
    pub fn new(key: Tags, series: BTreeSet<Series>) -> Self {
        Self { key, series }
    }

    /// State holding a single series keyed by its own tags
    pub fn of_series(series: Series) -> Self {
        Self {
            key: series.tags.clone(),
            series: [series].into_iter().collect(),
        }
    }
}

/// Samples pushed into, or produced by, a session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregationData {
    /// Group the samples belong to
    pub group: Tags,
    /// Series that contributed the samples
    pub series: BTreeSet<Series>,
    /// Samples, ascending by timestamp on output
    pub values: Vec<DataPoint>,
    /// Bucket layout the values were produced with; `None` for raw samples
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Sampling>,
}

impl AggregationData {
    /// Raw, not yet aggregated samples
    pub fn raw(group: Tags, series: BTreeSet<Series>, values: Vec<DataPoint>) -> Self {
        Self {
            group,
            series,
            values,
            output: None,
        }
    }
}

/// Output of a session
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregationResult {
    /// One entry per output group; cross-group order is unspecified
    pub results: Vec<AggregationData>,
    /// Counters merged over every contributing session
    pub statistics: Statistics,
}

impl AggregationResult {
    /// Create a result
    pub fn new(results: Vec<AggregationData>, statistics: Statistics) -> Self {
        Self {
            results,
            statistics,
        }
    }
}

/// Expanded states together with the root session
pub struct AggregationTraversal {
    /// States to fetch data for
    pub states: Vec<AggregationState>,
    /// Session receiving the fetched data
    pub session: Box<dyn AggregationSession>,
}

impl AggregationTraversal {
    /// Create a traversal
    pub fn new(states: Vec<AggregationState>, session: Box<dyn AggregationSession>) -> Self {
        Self { states, session }
    }
}

impl fmt::Debug for AggregationTraversal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregationTraversal")
            .field("states", &self.states)
            .finish_non_exhaustive()
    }
}

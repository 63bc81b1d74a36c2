//! Core data types used throughout the aggregation engine
//!
//! # Key Types
//!
//! - **`DataPoint`**: A single measurement (timestamp + value)
//! - **`DateRange`**: Half-open millisecond interval `[start, end)`
//! - **`Tags`**: Canonical, ordered tag map usable as a hash key
//! - **`Series`**: Identity of one metric stream (key + tags)
//!
//! # Example
//!
//! ```rust
//! use kuba_aggregation::types::{DataPoint, DateRange, Series};
//!
//! let range = DateRange::new(1000, 2000).unwrap();
//! assert!(range.contains(1500));
//! assert!(!range.contains(2000));
//!
//! let series = Series::new("cpu", [("host", "a"), ("dc", "x")]);
//! assert_eq!(series.tags.get("host").map(String::as_str), Some("a"));
//!
//! let point = DataPoint::new(1500, 42.5);
//! assert_eq!(point.timestamp, 1500);
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Tag map of a series or group
///
/// A `BTreeMap` keeps tags sorted, so two maps with the same entries compare,
/// hash and print identically regardless of insertion order.
pub type Tags = BTreeMap<String, String>;

/// Build a tag map from string pairs
pub fn tags<K, V, I>(pairs: I) -> Tags
where
    K: Into<String>,
    V: Into<String>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Single time-series sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// Timestamp in milliseconds since epoch
    pub timestamp: i64,
    /// Sample value
    pub value: f64,
}

impl DataPoint {
    /// Create a new data point
    pub fn new(timestamp: i64, value: f64) -> Self {
        Self { timestamp, value }
    }
}

/// Half-open time interval `[start, end)` in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    start: i64,
    end: i64,
}

impl DateRange {
    /// Create a new range, rejecting `start > end`
    pub fn new(start: i64, end: i64) -> Result<Self> {
        if start > end {
            return Err(Error::configuration(format!(
                "invalid date range: start {} > end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Range start (inclusive)
    pub fn start(&self) -> i64 {
        self.start
    }

    /// Range end (exclusive)
    pub fn end(&self) -> i64 {
        self.end
    }

    /// Width of the range in milliseconds
    pub fn diff(&self) -> i64 {
        self.end.saturating_sub(self.start)
    }

    /// A range is empty when it covers no millisecond
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Whether `timestamp` falls inside the range
    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp < self.end
    }

    /// Intersection of two ranges
    ///
    /// Disjoint ranges produce an empty range anchored at the later start.
    pub fn intersect(&self, other: &DateRange) -> DateRange {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end).max(start);
        DateRange { start, end }
    }

    /// Whether the two ranges share at least one millisecond
    pub fn overlaps(&self, other: &DateRange) -> bool {
        !self.intersect(other).is_empty()
    }

    /// Snap start down and end up to multiples of `size`
    ///
    /// Bounds that would leave the `i64` domain saturate.
    pub fn rounded(&self, size: i64) -> DateRange {
        if size <= 0 {
            return *self;
        }
        let size = i128::from(size);
        let start = i128::from(self.start).div_euclid(size) * size;
        let end = (i128::from(self.end) + size - 1).div_euclid(size) * size;
        DateRange {
            start: saturate(start),
            end: saturate(end),
        }
    }

    /// Move the whole range by `offset` milliseconds, saturating at the bounds
    pub fn shift(&self, offset: i64) -> DateRange {
        DateRange {
            start: self.start.saturating_add(offset),
            end: self.end.saturating_add(offset),
        }
    }
}

fn saturate(value: i128) -> i64 {
    value.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Identity of a single metric stream
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Series {
    /// Metric key, e.g. `cpu_usage`
    pub key: String,
    /// Tags attached to the series
    pub tags: Tags,
}

impl Series {
    /// Create a series from a key and tag pairs
    pub fn new<K, V, I>(key: impl Into<String>, tag_pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self {
            key: key.into(),
            tags: tags(tag_pairs),
        }
    }
}

impl fmt::Display for Series {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{", self.key)?;
        for (i, (k, v)) in self.tags.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}={}", k, v)?;
        }
        write!(f, "}}")
    }
}

//! Sampling: bucket width and lookback window
//!
//! A [`Sampling`] is the `(size, extent)` pair every bucket aggregation is
//! built from. `size` is the distance between two bucket timestamps and
//! `extent` is how far back from its timestamp a bucket collects samples.
//!
//! ```text
//!                 extent
//!          ├────────────────────┤
//!   ───────┼──────────┼─────────┼──────────┼──▶ time
//!          T-2·size   T-size    T          T+size
//!                          size ├──────────┤
//! ```
//!
//! Samplings are parsed from a unit name plus numeric size and extent, all
//! optional: the unit defaults to minutes, the size to ten minutes and the
//! extent to the size.

use crate::error::{Error, Result};
use crate::types::DateRange;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default bucket width: ten minutes in milliseconds
pub const DEFAULT_SIZE_MS: i64 = 10 * 60 * 1000;

/// Time units accepted when parsing a sampling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    /// Nanoseconds
    Nanoseconds,
    /// Microseconds
    Microseconds,
    /// Milliseconds
    Milliseconds,
    /// Seconds
    Seconds,
    /// Minutes
    Minutes,
    /// Hours
    Hours,
    /// Days
    Days,
}

impl TimeUnit {
    /// Parse a unit name, case-insensitively
    pub fn parse(name: &str) -> Result<Self> {
        let unit = match name.trim().to_ascii_lowercase().as_str() {
            "nanoseconds" | "nanosecond" => TimeUnit::Nanoseconds,
            "microseconds" | "microsecond" => TimeUnit::Microseconds,
            "milliseconds" | "millisecond" => TimeUnit::Milliseconds,
            "seconds" | "second" => TimeUnit::Seconds,
            "minutes" | "minute" => TimeUnit::Minutes,
            "hours" | "hour" => TimeUnit::Hours,
            "days" | "day" => TimeUnit::Days,
            other => {
                return Err(Error::configuration(format!(
                    "unknown time unit '{}'",
                    other
                )))
            }
        };
        Ok(unit)
    }

    /// Convert `value` in this unit to milliseconds, truncating toward zero
    pub fn to_millis(self, value: i64) -> Result<i64> {
        let converted = match self {
            TimeUnit::Nanoseconds => Some(value / 1_000_000),
            TimeUnit::Microseconds => Some(value / 1_000),
            TimeUnit::Milliseconds => Some(value),
            TimeUnit::Seconds => value.checked_mul(1_000),
            TimeUnit::Minutes => value.checked_mul(60_000),
            TimeUnit::Hours => value.checked_mul(3_600_000),
            TimeUnit::Days => value.checked_mul(86_400_000),
        };

        converted.ok_or_else(|| {
            Error::configuration(format!("{} {:?} overflows milliseconds", value, self))
        })
    }
}

/// Bucket width and per-bucket lookback window, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "SamplingSpec", into = "SamplingSpec")]
pub struct Sampling {
    size: i64,
    extent: i64,
}

impl Sampling {
    /// Create a sampling from millisecond values
    ///
    /// Fails when `size` is not positive or `extent` is shorter than `size`.
    pub fn new(size: i64, extent: i64) -> Result<Self> {
        if size <= 0 {
            return Err(Error::configuration(format!(
                "sampling size must be positive, got {}",
                size
            )));
        }
        if extent < size {
            return Err(Error::configuration(format!(
                "sampling extent {} is shorter than size {}",
                extent, size
            )));
        }
        Ok(Self { size, extent })
    }

    /// Sampling whose extent equals its size
    pub fn of_size(size: i64) -> Result<Self> {
        Self::new(size, size)
    }

    /// Parse a sampling from optional unit, size and extent
    ///
    /// ```rust
    /// use kuba_aggregation::sampling::Sampling;
    ///
    /// let s = Sampling::create(None, None, None).unwrap();
    /// assert_eq!(s.size(), 600_000);
    /// assert_eq!(s.extent(), 600_000);
    ///
    /// let s = Sampling::create(Some("SECONDS"), Some(30), Some(90)).unwrap();
    /// assert_eq!((s.size(), s.extent()), (30_000, 90_000));
    ///
    /// assert!(Sampling::create(Some("fortnights"), Some(1), None).is_err());
    /// ```
    pub fn create(unit: Option<&str>, value: Option<i64>, extent: Option<i64>) -> Result<Self> {
        let unit = match unit {
            Some(name) => TimeUnit::parse(name)?,
            None => TimeUnit::Minutes,
        };

        let size = match value {
            Some(v) => unit.to_millis(v)?,
            None => DEFAULT_SIZE_MS,
        };

        let extent = match extent {
            Some(v) => unit.to_millis(v)?,
            None => size,
        };

        Self::new(size, extent)
    }

    /// Bucket width in milliseconds
    pub fn size(&self) -> i64 {
        self.size
    }

    /// Lookback window in milliseconds
    pub fn extent(&self) -> i64 {
        self.extent
    }

    /// Timestamps of the buckets covering `range`
    ///
    /// The range start is snapped down to a multiple of `size`; bucket `T`
    /// owns the window `[T - size, T)`, so the first timestamp is one size
    /// past the snapped start and the last is the first one at or after the
    /// range end. An empty range has no buckets.
    pub fn bucket_timestamps(&self, range: &DateRange) -> Vec<i64> {
        let first = match self.first_bucket(range) {
            Some(first) => first,
            None => return Vec::new(),
        };

        let mut timestamps = Vec::with_capacity(self.bucket_count(range) as usize);
        let mut ts = first;

        loop {
            timestamps.push(ts);
            if ts >= range.end() {
                break;
            }
            // buckets past i64::MAX are not representable
            match ts.checked_add(self.size) {
                Some(next) => ts = next,
                None => break,
            }
        }

        timestamps
    }

    /// Number of buckets [`bucket_timestamps`](Self::bucket_timestamps) yields
    pub fn bucket_count(&self, range: &DateRange) -> u64 {
        let first = match self.first_bucket(range) {
            Some(first) => i128::from(first),
            None => return 0,
        };
        let size = i128::from(self.size);
        let max = i128::from(i64::MAX);

        let wanted = i128::from(range.rounded(self.size).end()).max(first);
        let last = wanted.min(first + (max - first) / size * size);
        ((last - first) / size + 1) as u64
    }

    fn first_bucket(&self, range: &DateRange) -> Option<i64> {
        if range.is_empty() {
            return None;
        }
        let size = i128::from(self.size);
        let first = i128::from(range.start()).div_euclid(size) * size + size;
        i64::try_from(first).ok()
    }
}

impl fmt::Display for Sampling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms/{}ms", self.size, self.extent)
    }
}

/// Wire shape of a sampling: `{"unit": "minutes", "value": 5, "extent": 10}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SamplingSpec {
    /// Time unit name, defaults to minutes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Bucket width in `unit`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<i64>,
    /// Lookback window in `unit`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extent: Option<i64>,
}

impl TryFrom<SamplingSpec> for Sampling {
    type Error = Error;

    fn try_from(spec: SamplingSpec) -> Result<Self> {
        Sampling::create(spec.unit.as_deref(), spec.value, spec.extent)
    }
}

impl From<Sampling> for SamplingSpec {
    fn from(sampling: Sampling) -> Self {
        Self {
            unit: Some("milliseconds".to_string()),
            value: Some(sampling.size),
            extent: Some(sampling.extent),
        }
    }
}

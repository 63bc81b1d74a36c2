//! Time-windowed accumulators
//!
//! A [`Bucket`] folds every sample that lands in its window into a single
//! value. Parallel fetch completions write into the same bucket, so every
//! variant accepts `update` through a shared reference:
//!
//! - **Sum, Min, Max**: lock-free compare-and-swap on the bit pattern of an
//!   `f64` held in an `AtomicU64`
//! - **Average, StdDev**: several fields must move together, so they sit
//!   behind a per-bucket `parking_lot::Mutex`
//!
//! An empty bucket reports `NaN`.

use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Kind of bucket an aggregation builds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BucketKind {
    /// Running sum
    Sum,
    /// Arithmetic mean
    Average,
    /// Smallest value
    Min,
    /// Largest value
    Max,
    /// Population standard deviation
    StdDev,
}

impl BucketKind {
    /// Short name of the aggregation
    pub fn name(&self) -> &'static str {
        match self {
            BucketKind::Sum => "sum",
            BucketKind::Average => "average",
            BucketKind::Min => "min",
            BucketKind::Max => "max",
            BucketKind::StdDev => "stddev",
        }
    }
}

impl fmt::Display for BucketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BucketKind {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "sum" => Ok(BucketKind::Sum),
            "average" | "avg" => Ok(BucketKind::Average),
            "min" => Ok(BucketKind::Min),
            "max" => Ok(BucketKind::Max),
            "stddev" => Ok(BucketKind::StdDev),
            other => Err(Error::configuration(format!(
                "unknown aggregation kind: {}",
                other
            ))),
        }
    }
}

/// `f64` with atomic read-modify-write
struct AtomicF64(AtomicU64);

impl AtomicF64 {
    fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }

    /// Apply `f` until the swap succeeds; `None` from `f` leaves the value as is
    fn update<F>(&self, mut f: F)
    where
        F: FnMut(f64) -> Option<f64>,
    {
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                f(f64::from_bits(bits)).map(f64::to_bits)
            });
    }
}

impl fmt::Debug for AtomicF64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.load())
    }
}

/// Running sum
#[derive(Debug)]
pub struct SumBucket {
    timestamp: i64,
    sum: AtomicF64,
    count: AtomicU64,
}

impl SumBucket {
    fn new(timestamp: i64) -> Self {
        Self {
            timestamp,
            sum: AtomicF64::new(0.0),
            count: AtomicU64::new(0),
        }
    }

    fn update(&self, value: f64) {
        self.sum.update(|sum| Some(sum + value));
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    fn value(&self) -> f64 {
        if self.count.load(Ordering::Acquire) == 0 {
            return f64::NAN;
        }
        self.sum.load()
    }
}

#[derive(Debug, Default)]
struct SumCount {
    sum: f64,
    count: u64,
}

/// Arithmetic mean
#[derive(Debug)]
pub struct AverageBucket {
    timestamp: i64,
    state: Mutex<SumCount>,
}

impl AverageBucket {
    fn new(timestamp: i64) -> Self {
        Self {
            timestamp,
            state: Mutex::new(SumCount::default()),
        }
    }

    fn update(&self, value: f64) {
        let mut state = self.state.lock();
        state.sum += value;
        state.count += 1;
    }

    fn value(&self) -> f64 {
        let state = self.state.lock();
        if state.count == 0 {
            return f64::NAN;
        }
        state.sum / state.count as f64
    }
}

/// Running minimum
#[derive(Debug)]
pub struct MinBucket {
    timestamp: i64,
    min: AtomicF64,
    count: AtomicU64,
}

impl MinBucket {
    fn new(timestamp: i64) -> Self {
        Self {
            timestamp,
            min: AtomicF64::new(f64::INFINITY),
            count: AtomicU64::new(0),
        }
    }

    fn update(&self, value: f64) {
        self.min
            .update(|current| if value < current { Some(value) } else { None });
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    fn value(&self) -> f64 {
        if self.count.load(Ordering::Acquire) == 0 {
            return f64::NAN;
        }
        self.min.load()
    }
}

/// Running maximum
#[derive(Debug)]
pub struct MaxBucket {
    timestamp: i64,
    max: AtomicF64,
    count: AtomicU64,
}

impl MaxBucket {
    fn new(timestamp: i64) -> Self {
        Self {
            timestamp,
            max: AtomicF64::new(f64::NEG_INFINITY),
            count: AtomicU64::new(0),
        }
    }

    fn update(&self, value: f64) {
        self.max
            .update(|current| if value > current { Some(value) } else { None });
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    fn value(&self) -> f64 {
        if self.count.load(Ordering::Acquire) == 0 {
            return f64::NAN;
        }
        self.max.load()
    }
}

#[derive(Debug, Default)]
struct Moments {
    count: u64,
    sum: f64,
    sum_sq: f64,
}

/// Population standard deviation
///
/// Keeps `n`, `Σx` and `Σx²` and computes `sqrt(Σx²/n − (Σx/n)²)`. This one
/// pass formula depends on summation order only through floating point
/// rounding; a negative variance caused by cancellation is clamped to zero.
#[derive(Debug)]
pub struct StdDevBucket {
    timestamp: i64,
    state: Mutex<Moments>,
}

impl StdDevBucket {
    fn new(timestamp: i64) -> Self {
        Self {
            timestamp,
            state: Mutex::new(Moments::default()),
        }
    }

    fn update(&self, value: f64) {
        let mut state = self.state.lock();
        state.count += 1;
        state.sum += value;
        state.sum_sq += value * value;
    }

    fn value(&self) -> f64 {
        let state = self.state.lock();
        if state.count == 0 {
            return f64::NAN;
        }
        let n = state.count as f64;
        let mean = state.sum / n;
        let variance = (state.sum_sq / n - mean * mean).max(0.0);
        variance.sqrt()
    }

    fn count(&self) -> u64 {
        self.state.lock().count
    }
}

/// Accumulator for one bucket window
#[derive(Debug)]
pub enum Bucket {
    /// Running sum
    Sum(SumBucket),
    /// Arithmetic mean
    Average(AverageBucket),
    /// Smallest value
    Min(MinBucket),
    /// Largest value
    Max(MaxBucket),
    /// Population standard deviation
    StdDev(StdDevBucket),
}

impl Bucket {
    /// Empty bucket of `kind` at `timestamp`
    pub fn new(kind: BucketKind, timestamp: i64) -> Self {
        match kind {
            BucketKind::Sum => Bucket::Sum(SumBucket::new(timestamp)),
            BucketKind::Average => Bucket::Average(AverageBucket::new(timestamp)),
            BucketKind::Min => Bucket::Min(MinBucket::new(timestamp)),
            BucketKind::Max => Bucket::Max(MaxBucket::new(timestamp)),
            BucketKind::StdDev => Bucket::StdDev(StdDevBucket::new(timestamp)),
        }
    }

    /// Fold one sample into the bucket; safe to call concurrently
    pub fn update(&self, _timestamp: i64, value: f64) {
        match self {
            Bucket::Sum(b) => b.update(value),
            Bucket::Average(b) => b.update(value),
            Bucket::Min(b) => b.update(value),
            Bucket::Max(b) => b.update(value),
            Bucket::StdDev(b) => b.update(value),
        }
    }

    /// Current value, `NaN` while empty
    pub fn value(&self) -> f64 {
        match self {
            Bucket::Sum(b) => b.value(),
            Bucket::Average(b) => b.value(),
            Bucket::Min(b) => b.value(),
            Bucket::Max(b) => b.value(),
            Bucket::StdDev(b) => b.value(),
        }
    }

    /// Bucket timestamp (end of its window)
    pub fn timestamp(&self) -> i64 {
        match self {
            Bucket::Sum(b) => b.timestamp,
            Bucket::Average(b) => b.timestamp,
            Bucket::Min(b) => b.timestamp,
            Bucket::Max(b) => b.timestamp,
            Bucket::StdDev(b) => b.timestamp,
        }
    }

    /// Number of samples folded so far
    pub fn count(&self) -> u64 {
        match self {
            Bucket::Sum(b) => b.count.load(Ordering::Acquire),
            Bucket::Average(b) => b.state.lock().count,
            Bucket::Min(b) => b.count.load(Ordering::Acquire),
            Bucket::Max(b) => b.count.load(Ordering::Acquire),
            Bucket::StdDev(b) => b.count(),
        }
    }

    /// Kind of this bucket
    pub fn kind(&self) -> BucketKind {
        match self {
            Bucket::Sum(_) => BucketKind::Sum,
            Bucket::Average(_) => BucketKind::Average,
            Bucket::Min(_) => BucketKind::Min,
            Bucket::Max(_) => BucketKind::Max,
            Bucket::StdDev(_) => BucketKind::StdDev,
        }
    }
}

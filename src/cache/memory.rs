//! LRU-bounded in-memory aggregation cache

use std::collections::BTreeMap;
use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::trace;

use crate::cache::{AggregationCache, CacheKey, CacheQueryResult};
use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::sampling::Sampling;
use crate::types::{DataPoint, DateRange};

/// In-memory cache keeping at most `capacity` keys
///
/// Each key maps bucket timestamps to values. Empty (`NaN`) buckets are not
/// stored, so they show up as misses on the next lookup.
#[derive(Debug)]
pub struct MemoryAggregationCache {
    entries: Mutex<LruCache<CacheKey, BTreeMap<i64, f64>>>,
}

impl MemoryAggregationCache {
    /// Create a cache holding up to `capacity` keys
    pub fn new(capacity: usize) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity)
            .ok_or_else(|| Error::configuration("cache capacity must be > 0"))?;
        Ok(Self {
            entries: Mutex::new(LruCache::new(capacity)),
        })
    }

    /// Create a cache from configuration
    pub fn from_config(config: &CacheConfig) -> Result<Self> {
        Self::new(config.capacity)
    }

    /// Number of cached keys
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing is cached
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl AggregationCache for MemoryAggregationCache {
    fn lookup(&self, key: &CacheKey, range: &DateRange) -> Result<CacheQueryResult> {
        let size = match key.aggregation.size() {
            Some(size) => size,
            None => return Ok(CacheQueryResult::miss(*range)),
        };
        let timestamps = Sampling::of_size(size)?.bucket_timestamps(range);

        let mut entries = self.entries.lock();
        let cached = match entries.get(key) {
            Some(cached) => cached,
            None => return Ok(CacheQueryResult::miss(*range)),
        };

        let mut result = Vec::new();
        let mut misses: Vec<DateRange> = Vec::new();

        for ts in timestamps {
            if let Some(value) = cached.get(&ts) {
                result.push(DataPoint::new(ts, *value));
                continue;
            }

            match misses.last_mut() {
                Some(last) if last.end() == ts - size => {
                    *last = DateRange::new(last.start(), ts)?;
                }
                _ => misses.push(DateRange::new(ts - size, ts)?),
            }
        }

        trace!(
            hits = result.len(),
            misses = misses.len(),
            range = %range,
            "Cache lookup"
        );

        Ok(CacheQueryResult {
            range: *range,
            result,
            misses,
        })
    }

    fn store(&self, key: CacheKey, points: &[DataPoint]) -> Result<()> {
        let mut entries = self.entries.lock();

        if !entries.contains(&key) {
            entries.put(key.clone(), BTreeMap::new());
        }

        if let Some(cached) = entries.get_mut(&key) {
            for point in points.iter().filter(|p| !p.value.is_nan()) {
                cached.insert(point.timestamp, point.value);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::{Aggregation, BucketKind};
    use crate::types::tags;

    fn key(filter: &str) -> CacheKey {
        CacheKey::new(
            filter,
            tags([("host", "a")]),
            Aggregation::bucket(BucketKind::Sum, Sampling::of_size(100).unwrap()),
            0,
        )
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(MemoryAggregationCache::new(0).unwrap_err().is_configuration());
    }

    #[test]
    fn test_cold_lookup_is_full_miss() {
        let cache = MemoryAggregationCache::new(4).unwrap();
        let range = DateRange::new(0, 500).unwrap();

        let result = cache.lookup(&key("cpu"), &range).unwrap();
        assert!(result.result.is_empty());
        assert_eq!(result.misses, vec![range]);
    }

    #[test]
    fn test_partial_hit_reports_gaps() {
        let cache = MemoryAggregationCache::new(4).unwrap();
        cache
            .store(
                key("cpu"),
                &[
                    DataPoint::new(100, 1.0),
                    DataPoint::new(200, 2.0),
                    DataPoint::new(400, f64::NAN),
                    DataPoint::new(500, 5.0),
                ],
            )
            .unwrap();

        let result = cache.lookup(&key("cpu"), &DateRange::new(0, 600).unwrap()).unwrap();
        assert_eq!(
            result.result,
            vec![
                DataPoint::new(100, 1.0),
                DataPoint::new(200, 2.0),
                DataPoint::new(500, 5.0)
            ]
        );
        assert_eq!(
            result.misses,
            vec![DateRange::new(200, 400).unwrap(), DateRange::new(500, 600).unwrap()]
        );
        assert!(!result.is_complete());
    }

    #[test]
    fn test_keys_are_isolated_and_evicted() {
        let cache = MemoryAggregationCache::new(1).unwrap();
        cache.store(key("cpu"), &[DataPoint::new(100, 1.0)]).unwrap();
        cache.store(key("mem"), &[DataPoint::new(100, 9.0)]).unwrap();
        assert_eq!(cache.len(), 1);

        let range = DateRange::new(0, 100).unwrap();
        assert!(!cache.lookup(&key("cpu"), &range).unwrap().is_complete());

        let hit = cache.lookup(&key("mem"), &range).unwrap();
        assert!(hit.is_complete());
        assert_eq!(hit.result, vec![DataPoint::new(100, 9.0)]);
    }
}

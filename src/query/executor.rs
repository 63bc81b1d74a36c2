//! Query executor
//!
//! Drives one query end to end: sets up the aggregation session, fans out
//! one fetch per `(state, series, row)` to the backend, pushes every fetched
//! batch into the session as it completes and reduces the lot into a
//! [`QueryResult`] once all fetches are terminal.
//!
//! Failed and cancelled fetches degrade the result (they are counted in the
//! row statistics) but do not fail the query. An invariant violation raised
//! by the session does.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::aggregation::{
    Aggregation, AggregationData, AggregationSession, RowStatistics, Statistics,
};
use crate::backend::MetricBackend;
use crate::cache::{AggregationCache, CacheKey};
use crate::concurrency::{reduce_all, Callback, Failure, ReadWriteThreadPools};
use crate::error::Error;
use crate::metrics::{record_fetches, record_query};
use crate::query::result::QueryResult;
use crate::query::MetricQuery;
use crate::types::DateRange;

/// Executes queries against a backend on the shared pools
pub struct QueryExecutor {
    backend: Arc<dyn MetricBackend>,
    pools: Arc<ReadWriteThreadPools>,
    cache: Option<Arc<dyn AggregationCache>>,
}

impl QueryExecutor {
    /// Create an executor without a cache
    pub fn new(backend: Arc<dyn MetricBackend>, pools: Arc<ReadWriteThreadPools>) -> Self {
        Self {
            backend,
            pools,
            cache: None,
        }
    }

    /// Write query results through to `cache`
    ///
    /// The cache is write-only from the executor's side: every query is
    /// answered from the backend, and lookups are left to callers that can
    /// stitch cached buckets with the misses they re-query.
    pub fn with_cache(mut self, cache: Arc<dyn AggregationCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Pools this executor schedules on
    pub fn pools(&self) -> &Arc<ReadWriteThreadPools> {
        &self.pools
    }

    /// Execute `query`, returning immediately
    ///
    /// Cancelling the returned callback cancels every fetch still pending.
    pub fn execute(&self, query: MetricQuery) -> Callback<QueryResult> {
        let started = Instant::now();

        let traversal = match query.aggregation.session(query.states.clone(), &query.range) {
            Ok(traversal) => traversal,
            Err(e) => {
                warn!(filter = %query.filter, error = %e, "Query setup failed");
                record_query("failed", started.elapsed().as_secs_f64());
                return Callback::failed(e);
            }
        };

        let session: Arc<dyn AggregationSession> = Arc::from(traversal.session);
        let fetch_range = query.fetch_range();

        let mut fetches: Vec<Callback<u64>> = Vec::new();
        for state in &traversal.states {
            for series in &state.series {
                for fetch in self.backend.fetch(series, &fetch_range) {
                    let session = Arc::clone(&session);
                    let group = state.key.clone();

                    fetches.push(fetch.transform(move |data| {
                        let points = data.points.len() as u64;
                        let series = [data.series].into_iter().collect();
                        session.update(AggregationData::raw(group, series, data.points))?;
                        Ok(points)
                    }));
                }
            }
        }

        info!(
            filter = %query.filter,
            aggregation = %query.aggregation,
            range = %query.range,
            groups = traversal.states.len(),
            fetches = fetches.len(),
            backend = self.backend.backend_id(),
            "Executing query"
        );

        let cache = self.cache.clone();
        let range = query.range;
        let filter = query.filter.clone();
        let aggregation = query.aggregation.clone();

        let result = reduce_all(fetches, move |counts, failed, cancelled| {
            if let Some(fatal) = failed.iter().find(|e| e.is_invariant_violation()) {
                return Err(Error::invariant(invariant_message(fatal)));
            }

            let row = RowStatistics::new(
                counts.len() as u64,
                failed.len() as u64,
                cancelled.len() as u64,
            );
            record_fetches("resolved", row.successful);
            record_fetches("failed", row.failed);
            record_fetches("cancelled", row.cancelled);

            if row.is_degraded() {
                warn!(
                    filter = %filter,
                    failed = row.failed,
                    cancelled = row.cancelled,
                    "Query degraded, some rows did not resolve"
                );
            }

            let output = session.result().map_err(|e| {
                warn!(filter = %filter, error = %e, "Aggregation result failed");
                e
            })?;
            let statistics = output.statistics.merge(&Statistics::row(row));

            if let Some(cache) = &cache {
                write_through(cache.as_ref(), &filter, &aggregation, &range, &output.results);
            }

            debug!(
                filter = %filter,
                samples = counts.iter().sum::<u64>(),
                groups = output.results.len(),
                "Query reduced"
            );

            Ok(QueryResult {
                range,
                groups: output.results,
                statistics,
                errors: failed.iter().map(|e| e.to_string()).collect(),
            })
        });

        result.on_done(move |outcome| {
            record_query(outcome.label(), started.elapsed().as_secs_f64());
        });

        result
    }
}

fn invariant_message(failure: &Failure) -> String {
    match failure.as_ref() {
        Error::InvariantViolation(message) => message.clone(),
        other => other.to_string(),
    }
}

fn write_through(
    cache: &dyn AggregationCache,
    filter: &str,
    aggregation: &Aggregation,
    range: &DateRange,
    groups: &[AggregationData],
) {
    let base = match aggregation.size() {
        Some(size) => range.rounded(size).start(),
        None => return,
    };

    for data in groups {
        let key = CacheKey::new(filter, data.group.clone(), aggregation.clone(), base);
        if let Err(e) = cache.store(key, &data.values) {
            warn!(filter = %filter, error = %e, "Cache write failed");
        }
    }
}

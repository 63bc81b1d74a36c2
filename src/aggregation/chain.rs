//! Ordered pipeline of aggregations

use tracing::{debug, warn};

use crate::aggregation::{
    Aggregation, AggregationData, AggregationResult, AggregationSession, AggregationState,
    AggregationTraversal,
};
use crate::error::{Error, Result};
use crate::types::DateRange;

/// Pipeline feeding each stage's output into the next
///
/// Raw updates go into the first stage. At `result()` time the outputs of
/// stage N are pushed through stage N+1 in order and the statistics of every
/// stage are merged.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChainAggregation {
    chain: Vec<Aggregation>,
}

impl ChainAggregation {
    /// Build a chain; an empty chain is a configuration error
    pub fn new(chain: Vec<Aggregation>) -> Result<Self> {
        if chain.is_empty() {
            return Err(Error::configuration("aggregation chain must not be empty"));
        }
        Ok(Self { chain })
    }

    /// Stages in application order
    pub fn stages(&self) -> &[Aggregation] {
        &self.chain
    }

    /// Set up every stage, threading expanded states from one into the next
    ///
    /// Fetching happens against the states of the first stage since that is
    /// where raw updates are delivered.
    pub fn session(
        &self,
        states: Vec<AggregationState>,
        range: &DateRange,
    ) -> Result<AggregationTraversal> {
        let mut sessions = Vec::with_capacity(self.chain.len());
        let mut first_states = None;
        let mut current = states;

        for aggregation in &self.chain {
            let traversal = aggregation.session(current, range)?;
            if first_states.is_none() {
                first_states = Some(traversal.states.clone());
            }
            current = traversal.states;
            sessions.push(traversal.session);
        }

        debug!(stages = sessions.len(), "chain session created");

        Ok(AggregationTraversal::new(
            first_states.unwrap_or_default(),
            Box::new(ChainSession { sessions }),
        ))
    }

    /// Output size is decided by the last stage
    pub fn estimate(&self, range: &DateRange) -> u64 {
        self.chain
            .last()
            .map(|last| last.estimate(range))
            .unwrap_or(0)
    }

    /// Widest lookback of any stage
    pub fn extent(&self) -> i64 {
        self.chain.iter().map(Aggregation::extent).max().unwrap_or(0)
    }
}

struct ChainSession {
    sessions: Vec<Box<dyn AggregationSession>>,
}

impl AggregationSession for ChainSession {
    fn update(&self, data: AggregationData) -> Result<()> {
        match self.sessions.first() {
            Some(first) => first.update(data),
            None => Ok(()),
        }
    }

    fn result(&self) -> Result<AggregationResult> {
        let mut stages = self.sessions.iter().enumerate();

        let mut current = match stages.next() {
            Some((_, first)) => first.result()?,
            None => return Ok(AggregationResult::default()),
        };

        for (stage, next) in stages {
            for mut data in current.results {
                // empty buckets carry no sample for the next stage
                data.values.retain(|p| !p.value.is_nan());
                if let Err(e) = next.update(data) {
                    warn!(stage, error = %e, "Chain stage rejected intermediate output");
                    return Err(e);
                }
            }

            let r = next.result()?;
            current = AggregationResult::new(r.results, current.statistics.merge(&r.statistics));
        }

        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::bucket::BucketKind;
    use crate::aggregation::grouping::KeyProjection;
    use crate::sampling::Sampling;
    use crate::types::{tags, DataPoint, Series};
    use std::collections::BTreeSet;

    #[test]
    fn test_empty_chain_rejected() {
        assert!(ChainAggregation::new(Vec::new()).unwrap_err().is_configuration());
    }

    #[test]
    fn test_chain_feeds_stages() {
        // per-host sums over 1s, then the max of those sums over 2s
        let chain = ChainAggregation::new(vec![
            Aggregation::group(
                KeyProjection::group(["host"]),
                Aggregation::bucket(BucketKind::Sum, Sampling::of_size(1_000).unwrap()),
            ),
            Aggregation::bucket(BucketKind::Max, Sampling::of_size(2_000).unwrap()),
        ])
        .unwrap();

        let series = Series::new("cpu", [("host", "a")]);
        let state = AggregationState::new(series.tags.clone(), [series].into_iter().collect());
        let range = DateRange::new(0, 2_000).unwrap();
        let traversal = chain.session(vec![state], &range).unwrap();
        assert_eq!(traversal.states.len(), 1);

        traversal
            .session
            .update(AggregationData::raw(
                tags([("host", "a")]),
                BTreeSet::new(),
                vec![
                    DataPoint::new(0, 1.0),
                    DataPoint::new(500, 2.0),
                    DataPoint::new(1_200, 10.0),
                ],
            ))
            .unwrap();

        let result = traversal.session.result().unwrap();
        assert_eq!(result.results.len(), 1);
        // first stage emits (1000, 3) and (2000, 10); the second takes their max
        assert_eq!(result.results[0].values, vec![DataPoint::new(2_000, 3.0)]);
        assert_eq!(result.statistics.aggregator.sample_size, 3 + 1);
        assert_eq!(result.statistics.aggregator.out_of_bounds, 1);
    }

    #[test]
    fn test_unplaceable_stage_output_is_invariant_violation() {
        // the first stage merges both hosts into one output keyed {}
        let chain = ChainAggregation::new(vec![
            Aggregation::bucket(BucketKind::Sum, Sampling::of_size(1_000).unwrap()),
            Aggregation::group(
                KeyProjection::group(["host"]),
                Aggregation::bucket(BucketKind::Sum, Sampling::of_size(1_000).unwrap()),
            ),
        ])
        .unwrap();

        let states: Vec<_> = ["a", "b"]
            .iter()
            .map(|h| AggregationState::of_series(Series::new("cpu", [("host", *h)])))
            .collect();
        let traversal = chain
            .session(states.clone(), &DateRange::new(0, 1_000).unwrap())
            .unwrap();

        for state in &states {
            traversal
                .session
                .update(AggregationData::raw(
                    state.key.clone(),
                    state.series.clone(),
                    vec![DataPoint::new(10, 5.0)],
                ))
                .unwrap();
        }

        let err = traversal.session.result().unwrap_err();
        assert!(err.is_invariant_violation());
    }

    #[test]
    fn test_estimate_and_extent() {
        let chain = ChainAggregation::new(vec![
            Aggregation::bucket(BucketKind::Sum, Sampling::new(1_000, 10_000).unwrap()),
            Aggregation::bucket(BucketKind::Sum, Sampling::of_size(5_000).unwrap()),
        ])
        .unwrap();
        let range = DateRange::new(0, 20_000).unwrap();

        assert_eq!(chain.estimate(&range), 4);
        assert_eq!(chain.extent(), 10_000);
    }
}

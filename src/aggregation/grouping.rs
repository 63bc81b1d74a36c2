//! Group-by aggregation
//!
//! A [`GroupingAggregation`] partitions input states by a projection of
//! their tags and runs its child aggregation once per partition:
//!
//! ```text
//!   states                 key(tags)              child sessions
//!   {host=a,dc=x} ──┐
//!                   ├──▶   {host=a}   ──▶   each.session({host=a}, ...)
//!   {host=a,dc=y} ──┘
//!   {host=b,dc=x} ─────▶   {host=b}   ──▶   each.session({host=b}, ...)
//! ```
//!
//! The resulting [`GroupSession`] multiplexes updates onto the child session
//! registered for the update's projected key. The key-to-session map is
//! built once at setup and never mutated afterwards, so concurrent updates
//! only contend inside the child sessions.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use tracing::debug;

use crate::aggregation::statistics::Statistics;
use crate::aggregation::{
    Aggregation, AggregationData, AggregationResult, AggregationSession, AggregationState,
    AggregationTraversal,
};
use crate::error::{Error, Result};
use crate::types::{DateRange, Series, Tags};

/// How a group key is derived from a tag map
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyProjection {
    /// Keep only the listed tags
    Group(BTreeSet<String>),
    /// Keep every tag except the listed ones
    Collapse(BTreeSet<String>),
}

impl KeyProjection {
    /// Projection keeping only `of`
    pub fn group<I, S>(of: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        KeyProjection::Group(of.into_iter().map(Into::into).collect())
    }

    /// Projection dropping `of`
    pub fn collapse<I, S>(of: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        KeyProjection::Collapse(of.into_iter().map(Into::into).collect())
    }

    /// Project `input` onto a group key
    pub fn key(&self, input: &Tags) -> Tags {
        match self {
            KeyProjection::Group(of) => input
                .iter()
                .filter(|(k, _)| of.contains(*k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            KeyProjection::Collapse(of) => input
                .iter()
                .filter(|(k, _)| !of.contains(*k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }
}

impl fmt::Display for KeyProjection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (name, of) = match self {
            KeyProjection::Group(of) => ("group", of),
            KeyProjection::Collapse(of) => ("collapse", of),
        };
        let of: Vec<&str> = of.iter().map(String::as_str).collect();
        write!(f, "{}({})", name, of.join(","))
    }
}

/// Aggregation applying `each` independently per group
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupingAggregation {
    projection: KeyProjection,
    each: Box<Aggregation>,
}

impl GroupingAggregation {
    /// Group by `projection`, aggregating each group with `each`
    pub fn new(projection: KeyProjection, each: Aggregation) -> Self {
        Self {
            projection,
            each: Box::new(each),
        }
    }

    /// Key projection of this grouping
    pub fn projection(&self) -> &KeyProjection {
        &self.projection
    }

    /// Aggregation applied to each group
    pub fn each(&self) -> &Aggregation {
        &self.each
    }

    /// Group key for the given input tags
    pub fn key(&self, input: &Tags) -> Tags {
        self.projection.key(input)
    }

    /// Group states by projected key, unioning their series
    pub fn map(&self, states: &[AggregationState]) -> BTreeMap<Tags, BTreeSet<Series>> {
        let mut output: BTreeMap<Tags, BTreeSet<Series>> = BTreeMap::new();

        for state in states {
            output
                .entry(self.key(&state.key))
                .or_default()
                .extend(state.series.iter().cloned());
        }

        output
    }

    /// Set up one child session per distinct group key
    ///
    /// The returned states carry one entry per key, holding every series the
    /// child expanded that key into.
    pub fn session(
        &self,
        states: Vec<AggregationState>,
        range: &DateRange,
    ) -> Result<AggregationTraversal> {
        let mapping = self.map(&states);
        let mut sessions = HashMap::with_capacity(mapping.len());
        let mut expanded = Vec::with_capacity(mapping.len());

        for (key, series) in mapping {
            let traversal = self
                .each
                .session(vec![AggregationState::new(key.clone(), series)], range)?;

            let series: BTreeSet<Series> = traversal
                .states
                .into_iter()
                .flat_map(|state| state.series)
                .collect();

            sessions.insert(key.clone(), traversal.session);
            expanded.push(AggregationState::new(key, series));
        }

        debug!(
            projection = %self.projection,
            groups = sessions.len(),
            "grouping session created"
        );

        let session = GroupSession {
            projection: self.projection.clone(),
            sessions,
        };

        Ok(AggregationTraversal::new(expanded, Box::new(session)))
    }

    /// Grouping changes fan-out, not temporal cost
    pub fn estimate(&self, range: &DateRange) -> u64 {
        self.each.estimate(range)
    }

    /// Lookback of the child aggregation
    pub fn extent(&self) -> i64 {
        self.each.extent()
    }
}

/// Session multiplexing updates onto per-group child sessions
pub struct GroupSession {
    projection: KeyProjection,
    sessions: HashMap<Tags, Box<dyn AggregationSession>>,
}

impl GroupSession {
    /// Number of registered groups
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no group was registered
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl AggregationSession for GroupSession {
    fn update(&self, data: AggregationData) -> Result<()> {
        let key = self.projection.key(&data.group);

        let session = self.sessions.get(&key).ok_or_else(|| {
            Error::invariant(format!("no session for key {:?}", key))
        })?;

        session.update(AggregationData { group: key, ..data })
    }

    fn result(&self) -> Result<AggregationResult> {
        let mut results = Vec::new();
        let mut statistics = Statistics::EMPTY;

        for session in self.sessions.values() {
            let r = session.result()?;
            statistics = statistics.merge(&r.statistics);
            results.extend(r.results);
        }

        Ok(AggregationResult::new(results, statistics))
    }
}

impl fmt::Debug for GroupSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupSession")
            .field("projection", &self.projection)
            .field("groups", &self.sessions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::bucket::BucketKind;
    use crate::sampling::Sampling;
    use crate::types::{tags, DataPoint};

    fn state(pairs: &[(&str, &str)]) -> AggregationState {
        let series = Series::new("cpu", pairs.iter().copied());
        AggregationState::new(series.tags.clone(), [series].into_iter().collect())
    }

    fn sum_by_host() -> GroupingAggregation {
        let each = Aggregation::bucket(BucketKind::Sum, Sampling::of_size(1_000).unwrap());
        GroupingAggregation::new(KeyProjection::group(["host"]), each)
    }

    #[test]
    fn test_projections() {
        let input = tags([("host", "a"), ("dc", "x"), ("role", "db")]);
        assert_eq!(
            KeyProjection::group(["host", "missing"]).key(&input),
            tags([("host", "a")])
        );
        assert_eq!(
            KeyProjection::collapse(["host"]).key(&input),
            tags([("dc", "x"), ("role", "db")])
        );
        assert_eq!(KeyProjection::group(["dc", "host"]).to_string(), "group(dc,host)");
    }

    #[test]
    fn test_map_unions_series() {
        let grouping = sum_by_host();
        let mapping = grouping.map(&[
            state(&[("host", "a"), ("dc", "x")]),
            state(&[("host", "a"), ("dc", "y")]),
            state(&[("host", "b"), ("dc", "x")]),
        ]);

        assert_eq!(mapping.len(), 2);
        assert_eq!(mapping[&tags([("host", "a")])].len(), 2);
        assert_eq!(mapping[&tags([("host", "b")])].len(), 1);
    }

    #[test]
    fn test_update_routes_by_projected_key() {
        let grouping = sum_by_host();
        let states = vec![
            state(&[("host", "a"), ("dc", "x")]),
            state(&[("host", "a"), ("dc", "y")]),
        ];
        let traversal = grouping
            .session(states, &DateRange::new(0, 2_000).unwrap())
            .unwrap();

        assert_eq!(traversal.states.len(), 1);
        assert_eq!(traversal.states[0].series.len(), 2);

        for dc in ["x", "y"] {
            traversal
                .session
                .update(AggregationData::raw(
                    tags([("host", "a"), ("dc", dc)]),
                    BTreeSet::new(),
                    vec![DataPoint::new(100, 2.0), DataPoint::new(1_500, 5.0)],
                ))
                .unwrap();
        }

        let result = traversal.session.result().unwrap();
        assert_eq!(result.results.len(), 1);
        assert_eq!(result.results[0].group, tags([("host", "a")]));
        assert_eq!(
            result.results[0].values,
            vec![DataPoint::new(1_000, 4.0), DataPoint::new(2_000, 10.0)]
        );
        assert_eq!(result.statistics.aggregator.sample_size, 4);
    }

    #[test]
    fn test_unregistered_key_is_invariant_violation() {
        let grouping = sum_by_host();
        let traversal = grouping
            .session(vec![state(&[("host", "a")])], &DateRange::new(0, 1_000).unwrap())
            .unwrap();

        let err = traversal
            .session
            .update(AggregationData::raw(
                tags([("host", "zzz")]),
                BTreeSet::new(),
                vec![DataPoint::new(1, 1.0)],
            ))
            .unwrap_err();
        assert!(err.is_invariant_violation());
    }

    #[test]
    fn test_estimate_and_extent_delegate() {
        let each = Aggregation::bucket(BucketKind::Max, Sampling::new(1_000, 5_000).unwrap());
        let grouping = GroupingAggregation::new(KeyProjection::collapse(["dc"]), each.clone());
        let range = DateRange::new(0, 10_000).unwrap();

        assert_eq!(grouping.estimate(&range), each.estimate(&range));
        assert_eq!(grouping.extent(), 5_000);
    }
}

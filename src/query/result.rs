//! Query result types

use serde::Serialize;

use crate::aggregation::{AggregationData, Statistics};
use crate::error::Result;
use crate::types::{DateRange, Tags};

/// Complete output of one query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    /// Range the output covers
    pub range: DateRange,
    /// One entry per output group; empty buckets carry `NaN` (`null` in JSON)
    pub groups: Vec<AggregationData>,
    /// Aggregator and row statistics
    pub statistics: Statistics,
    /// Messages of fetches that failed, if any
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl QueryResult {
    /// Whether some rows failed or were cancelled
    pub fn is_degraded(&self) -> bool {
        self.statistics.row.is_degraded()
    }

    /// Output of the group with the given key
    pub fn group(&self, key: &Tags) -> Option<&AggregationData> {
        self.groups.iter().find(|data| &data.group == key)
    }

    /// Sort groups by key so output is deterministic
    pub fn sort_groups(&mut self) {
        self.groups.sort_by(|a, b| a.group.cmp(&b.group));
    }

    /// Render as pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

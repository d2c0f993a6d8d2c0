// GA Realtime - Google Analytics to Prometheus bridge
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Metric definitions and the naming rules that turn them into gauges.
//!
//! A definition such as `rt:pageviews` grouped by `rt:medium` becomes the
//! gauge identifier `rt_pageviews_rt_medium` with the single label
//! `rt_medium`. Identifiers and label names are derived purely from the
//! definition, so the same definition always maps to the same gauge.

use serde::{Deserialize, Deserializer, Serialize};

/// Namespace separator used by the analytics API (`rt:activeUsers`).
pub const NAMESPACE_SEPARATOR: char = ':';

/// Replacement for namespace separators, and the joiner between name and dimensions.
pub const IDENTIFIER_SEPARATOR: char = '_';

/// Prefix of every exported gauge name.
pub const GAUGE_PREFIX: &str = "ga_";

/// One logical metric to poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricDefinition {
    /// Metric name understood by the analytics API.
    pub name: String,

    /// Grouping attributes; order fixes both the row cell order and the label order.
    #[serde(default)]
    pub dimensions: Vec<String>,

    /// Passed through to the query.
    #[serde(default)]
    pub filters: Vec<String>,

    /// Passed through to the query.
    #[serde(default)]
    pub sort: Vec<String>,

    /// Row limit. Accepts `"10"` as well as `10`.
    #[serde(default, deserialize_with = "deserialize_limit")]
    pub limit: Option<u64>,
}

impl MetricDefinition {
    /// Create a scalar definition with no dimensions.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dimensions: Vec::new(),
            filters: Vec::new(),
            sort: Vec::new(),
            limit: None,
        }
    }

    /// Add grouping dimensions.
    pub fn with_dimensions<I, S>(mut self, dimensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dimensions = dimensions.into_iter().map(Into::into).collect();
        self
    }

    /// Add filter expressions.
    pub fn with_filters<I, S>(mut self, filters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filters = filters.into_iter().map(Into::into).collect();
        self
    }

    /// Add sort keys.
    pub fn with_sort<I, S>(mut self, sort: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sort = sort.into_iter().map(Into::into).collect();
        self
    }

    /// Bound the number of rows returned.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Registry identifier for this definition.
    pub fn identifier(&self) -> String {
        derive_identifier(&self.name, &self.dimensions)
    }

    /// Label names, positionally aligned with `dimensions`.
    pub fn labels(&self) -> Vec<String> {
        derive_label_set(&self.dimensions)
    }

    /// Help text attached to the exported gauge.
    pub fn help(&self) -> String {
        format!("Google Analytics {}", self.name)
    }
}

/// Join `name` and `dimensions` with `_` and rewrite namespace separators.
///
/// With no dimensions this is just the normalized name.
pub fn derive_identifier<S: AsRef<str>>(name: &str, dimensions: &[S]) -> String {
    let mut joined = String::from(name);
    for dimension in dimensions {
        joined.push(IDENTIFIER_SEPARATOR);
        joined.push_str(dimension.as_ref());
    }
    normalize(&joined)
}

/// Normalize each dimension into a label name.
pub fn derive_label_set<S: AsRef<str>>(dimensions: &[S]) -> Vec<String> {
    dimensions.iter().map(|d| normalize(d.as_ref())).collect()
}

/// Exported gauge name for an identifier.
pub fn gauge_name(identifier: &str) -> String {
    format!("{GAUGE_PREFIX}{identifier}")
}

fn normalize(raw: &str) -> String {
    raw.replace(NAMESPACE_SEPARATOR, &IDENTIFIER_SEPARATOR.to_string())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawLimit {
    Number(u64),
    Text(String),
}

fn deserialize_limit<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<RawLimit>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawLimit::Number(n)) => Ok(Some(n)),
        Some(RawLimit::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(RawLimit::Text(s)) => s.trim().parse().map(Some).map_err(|_| {
            serde::de::Error::custom(format!("limit must be a non-negative integer, got {s:?}"))
        }),
    }
}

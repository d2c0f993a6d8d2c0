// GA Realtime - Google Analytics to Prometheus bridge
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Boundary to the remote analytics API.

use async_trait::async_trait;

use crate::definition::MetricDefinition;
use crate::error::QueryError;

/// One result row: dimension values in `dimensions` order, then the value.
pub type Row = Vec<String>;

/// Source of result rows for a metric definition.
#[async_trait]
pub trait AnalyticsQuery: Send + Sync {
    /// Run the query described by `definition`.
    async fn query(&self, definition: &MetricDefinition) -> Result<Vec<Row>, QueryError>;
}

/// Query parameters for one definition against one view.
///
/// Empty lists and a missing limit are left out entirely rather than sent
/// as empty parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub view_id: String,
    pub metrics: String,
    pub dimensions: Option<String>,
    pub filters: Option<String>,
    pub sort: Option<String>,
    pub max_results: Option<u64>,
}

impl QueryRequest {
    pub fn new(view_id: impl Into<String>, definition: &MetricDefinition) -> Self {
        Self {
            view_id: view_id.into(),
            metrics: definition.name.clone(),
            dimensions: join(&definition.dimensions),
            filters: join(&definition.filters),
            sort: join(&definition.sort),
            max_results: definition.limit,
        }
    }

    /// URL query pairs in API parameter names.
    pub fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("ids", self.view_id.clone()),
            ("metrics", self.metrics.clone()),
        ];
        if let Some(ref dimensions) = self.dimensions {
            params.push(("dimensions", dimensions.clone()));
        }
        if let Some(ref filters) = self.filters {
            params.push(("filters", filters.clone()));
        }
        if let Some(ref sort) = self.sort {
            params.push(("sort", sort.clone()));
        }
        if let Some(max_results) = self.max_results {
            params.push(("max-results", max_results.to_string()));
        }
        params
    }
}

fn join(items: &[String]) -> Option<String> {
    if items.is_empty() {
        None
    } else {
        Some(items.join(","))
    }
}

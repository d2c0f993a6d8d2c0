// GA Realtime - Google Analytics to Prometheus bridge
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # GA Realtime
//!
//! Turns a declarative list of analytics metrics into labeled Prometheus
//! gauges and keeps them fresh by polling a remote reporting API.
//!
//! ## Quick Start
//!
//! ```rust
//! use ga_realtime::{GaugeRegistry, MetricDefinition};
//!
//! let definition = MetricDefinition::new("rt:pageviews").with_dimensions(["rt:medium"]);
//!
//! let mut registry = GaugeRegistry::new();
//! registry.register_definition(&definition).unwrap();
//!
//! // A result row: one cell per dimension, then the value.
//! registry.set(&definition.identifier(), &["organic"], 10.0).unwrap();
//!
//! let text = registry.encode().unwrap();
//! assert!(text.contains(r#"ga_rt_pageviews_rt_medium{rt_medium="organic"} 10"#));
//! ```
//!
//! ## Modules
//!
//! - [`definition`]: Metric definitions and identifier/label derivation
//! - [`registry`]: Gauge registry, snapshots and text exposition
//! - [`query`]: Analytics query boundary
//! - [`poller`]: Fan-out polling loop and row mapping
//! - [`stats`]: Exporter self-instrumentation

pub mod definition;
pub mod error;
pub mod poller;
pub mod query;
pub mod registry;
pub mod stats;

pub use definition::{derive_identifier, derive_label_set, gauge_name, MetricDefinition};
pub use error::{QueryError, RegistryError, Result, RowError};
pub use poller::{map_row, Poller, PollerConfig, DEFAULT_QUERY_TIMEOUT};
pub use query::{AnalyticsQuery, QueryRequest, Row};
pub use registry::{GaugeRegistry, GaugeSnapshot, Registration, Series};
pub use stats::{Outcome, PollerStats, SELF_METRIC_PREFIX};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// GA Realtime - Google Analytics to Prometheus bridge
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Polling loop that refreshes the gauge registry from analytics queries.
//!
//! Every cycle spawns one task per metric definition and then sleeps for
//! the configured interval without waiting for those tasks. A slow query
//! can therefore still be running when the next cycle starts; the registry
//! overwrites per label tuple, so the last write to complete wins. Each task
//! is bounded by the query timeout.
//!
//! Failures never leave the task that hit them: a failed query leaves the
//! gauge at its previous values, and a malformed row is skipped without
//! affecting the rest of the response.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::definition::MetricDefinition;
use crate::error::{QueryError, RegistryError, RowError};
use crate::query::{AnalyticsQuery, Row};
use crate::registry::GaugeRegistry;
use crate::stats::{Outcome, PollerStats};

/// Default per-query timeout.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Scheduling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerConfig {
    /// Sleep between cycles.
    pub interval: Duration,
    /// Upper bound on a single query.
    pub query_timeout: Duration,
}

impl PollerConfig {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }

    pub fn with_query_timeout(mut self, query_timeout: Duration) -> Self {
        self.query_timeout = query_timeout;
        self
    }
}

/// A definition paired with the identifier of its gauge.
#[derive(Debug)]
struct Target {
    definition: MetricDefinition,
    identifier: String,
}

/// Periodic poller over a fixed set of metric definitions.
pub struct Poller {
    targets: Vec<Arc<Target>>,
    client: Arc<dyn AnalyticsQuery>,
    registry: Arc<GaugeRegistry>,
    stats: PollerStats,
    config: PollerConfig,
}

impl Poller {
    /// Create a poller.
    ///
    /// Every definition must already have its gauge in `registry` with a
    /// matching label arity, so that `set` can never be called with a label
    /// tuple of the wrong shape once polling starts.
    pub fn new(
        definitions: Vec<MetricDefinition>,
        client: Arc<dyn AnalyticsQuery>,
        registry: Arc<GaugeRegistry>,
        stats: PollerStats,
        config: PollerConfig,
    ) -> Result<Self, RegistryError> {
        let mut targets = Vec::with_capacity(definitions.len());
        for definition in definitions {
            let identifier = definition.identifier();
            match registry.arity(&identifier) {
                None => return Err(RegistryError::UnknownGauge(identifier)),
                Some(arity) if arity != definition.dimensions.len() => {
                    return Err(RegistryError::LabelArity {
                        identifier,
                        expected: arity,
                        actual: definition.dimensions.len(),
                    })
                }
                Some(_) => targets.push(Arc::new(Target {
                    definition,
                    identifier,
                })),
            }
        }

        Ok(Self {
            targets,
            client,
            registry,
            stats,
            config,
        })
    }

    pub fn config(&self) -> PollerConfig {
        self.config
    }

    pub fn stats(&self) -> &PollerStats {
        &self.stats
    }

    /// Number of metric definitions polled per cycle.
    pub fn metric_count(&self) -> usize {
        self.targets.len()
    }

    /// Launch one cycle: one task per definition.
    ///
    /// Returns immediately. The handles are only useful to callers that want
    /// to observe a settled cycle; [`Poller::run`] drops them.
    pub fn run_cycle(&self) -> Vec<JoinHandle<()>> {
        self.stats.record_cycle();
        debug!(metrics = self.targets.len(), "starting polling cycle");

        self.targets
            .iter()
            .map(|target| {
                let target = Arc::clone(target);
                let client = Arc::clone(&self.client);
                let registry = Arc::clone(&self.registry);
                let stats = self.stats.clone();
                let query_timeout = self.config.query_timeout;
                tokio::spawn(async move {
                    poll_metric(&target, client.as_ref(), &registry, &stats, query_timeout).await;
                })
            })
            .collect()
    }

    /// Poll forever.
    pub async fn run(self) {
        info!(
            "Starting poller: {} metrics every {:?}",
            self.targets.len(),
            self.config.interval
        );

        loop {
            // Handles dropped: tasks may outlive the sleep below.
            drop(self.run_cycle());
            sleep(self.config.interval).await;
        }
    }
}

async fn poll_metric(
    target: &Target,
    client: &dyn AnalyticsQuery,
    registry: &GaugeRegistry,
    stats: &PollerStats,
    query_timeout: Duration,
) {
    let name = target.definition.name.as_str();
    let identifier = target.identifier.as_str();

    let result = timeout(query_timeout, client.query(&target.definition))
        .await
        .unwrap_or(Err(QueryError::Timeout(query_timeout)));

    let rows = match result {
        Ok(rows) => rows,
        Err(e) => {
            let outcome = match e {
                QueryError::Timeout(_) => Outcome::Timeout,
                _ => Outcome::Error,
            };
            warn!(metric = %name, identifier, error = %e, "query failed");
            stats.record_query(identifier, outcome);
            return;
        }
    };
    stats.record_query(identifier, Outcome::Success);

    let (applied, skipped) = apply_rows(registry, identifier, &target.definition, &rows, stats);
    debug!(metric = %name, identifier, applied, skipped, "metric updated");
}

/// Write every well-formed row into the registry.
///
/// Returns `(applied, skipped)`.
fn apply_rows(
    registry: &GaugeRegistry,
    identifier: &str,
    definition: &MetricDefinition,
    rows: &[Row],
    stats: &PollerStats,
) -> (usize, usize) {
    let mut applied = 0;
    let mut skipped = 0;

    for row in rows {
        let (labels, value) = match map_row(row, definition.dimensions.len()) {
            Ok(mapped) => mapped,
            Err(e) => {
                warn!(metric = %definition.name, identifier, row = ?row, error = %e, "skipping row");
                stats.record_skipped_row(identifier);
                skipped += 1;
                continue;
            }
        };

        match registry.set(identifier, labels, value) {
            Ok(()) => applied += 1,
            Err(e) => {
                // Arity was checked above, so this is a registry bug.
                error!(metric = %definition.name, identifier, error = %e, "failed to update gauge");
                stats.record_skipped_row(identifier);
                skipped += 1;
            }
        }
    }

    (applied, skipped)
}

/// Split a result row into its label values and its numeric value.
///
/// The row must hold exactly one cell per dimension followed by the value.
pub fn map_row(row: &[String], dimensions: usize) -> Result<(&[String], f64), RowError> {
    if row.len() != dimensions + 1 {
        return Err(RowError::Arity {
            expected: dimensions + 1,
            actual: row.len(),
        });
    }

    let (labels, value) = row.split_at(dimensions);
    let raw = &value[0];
    let value = raw
        .trim()
        .parse::<f64>()
        .map_err(|_| RowError::InvalidValue(raw.clone()))?;
    Ok((labels, value))
}

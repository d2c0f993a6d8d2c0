// GA Realtime - Google Analytics to Prometheus bridge
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Exporter self-instrumentation.
//!
//! Counters describing the poller itself, exposed next to the analytics
//! gauges so a failing metric shows up as errors instead of only going stale.
//! Per-metric counters are labeled with the gauge identifier, so two
//! definitions sharing a name but not their dimensions stay apart.

use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

/// Name prefix of every counter in this module. Analytics gauges must not
/// use it.
pub const SELF_METRIC_PREFIX: &str = "ga_exporter_";

/// How a single query ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Error,
    Timeout,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Error => "error",
            Outcome::Timeout => "timeout",
        }
    }
}

/// Counters updated by the poller.
#[derive(Clone)]
pub struct PollerStats {
    cycles: IntCounter,
    queries: IntCounterVec,
    rows_skipped: IntCounterVec,
}

impl PollerStats {
    /// Create the counters and register them on `registry`.
    pub fn register(registry: &Registry) -> prometheus::Result<Self> {
        let cycles = IntCounter::new(
            format!("{SELF_METRIC_PREFIX}cycles_total"),
            "Polling cycles started by the exporter",
        )?;
        let queries = IntCounterVec::new(
            Opts::new(
                format!("{SELF_METRIC_PREFIX}queries_total"),
                "Analytics queries by gauge identifier and outcome",
            ),
            &["metric", "outcome"],
        )?;
        let rows_skipped = IntCounterVec::new(
            Opts::new(
                format!("{SELF_METRIC_PREFIX}rows_skipped_total"),
                "Result rows skipped because they could not be mapped to a gauge",
            ),
            &["metric"],
        )?;

        registry.register(Box::new(cycles.clone()))?;
        registry.register(Box::new(queries.clone()))?;
        registry.register(Box::new(rows_skipped.clone()))?;

        Ok(Self {
            cycles,
            queries,
            rows_skipped,
        })
    }

    pub fn record_cycle(&self) {
        self.cycles.inc();
    }

    pub fn record_query(&self, identifier: &str, outcome: Outcome) {
        self.queries
            .with_label_values(&[identifier, outcome.as_str()])
            .inc();
    }

    pub fn record_skipped_row(&self, identifier: &str) {
        self.rows_skipped.with_label_values(&[identifier]).inc();
    }

    /// Cycles started so far.
    pub fn cycles(&self) -> u64 {
        self.cycles.get()
    }

    pub fn queries(&self, identifier: &str, outcome: Outcome) -> u64 {
        self.queries
            .with_label_values(&[identifier, outcome.as_str()])
            .get()
    }

    pub fn skipped_rows(&self, identifier: &str) -> u64 {
        self.rows_skipped.with_label_values(&[identifier]).get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_as_str() {
        assert_eq!(Outcome::Success.as_str(), "success");
        assert_eq!(Outcome::Error.as_str(), "error");
        assert_eq!(Outcome::Timeout.as_str(), "timeout");
    }

    #[test]
    fn test_counters() {
        let registry = Registry::new();
        let stats = PollerStats::register(&registry).unwrap();

        stats.record_cycle();
        stats.record_query("rt_activeUsers", Outcome::Success);
        stats.record_query("rt_activeUsers", Outcome::Success);
        stats.record_query("rt_pageviews_rt_medium", Outcome::Timeout);
        stats.record_skipped_row("rt_pageviews_rt_medium");

        assert_eq!(stats.cycles(), 1);
        assert_eq!(stats.queries("rt_activeUsers", Outcome::Success), 2);
        assert_eq!(stats.queries("rt_pageviews_rt_medium", Outcome::Timeout), 1);
        assert_eq!(stats.queries("rt_pageviews_rt_medium", Outcome::Error), 0);
        assert_eq!(stats.skipped_rows("rt_pageviews_rt_medium"), 1);
    }

    #[test]
    fn test_counter_names_use_reserved_prefix() {
        let registry = Registry::new();
        let stats = PollerStats::register(&registry).unwrap();
        stats.record_query("rt_activeUsers", Outcome::Success);
        stats.record_skipped_row("rt_activeUsers");

        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert_eq!(names.len(), 3);
        assert!(names.iter().all(|n| n.starts_with(SELF_METRIC_PREFIX)));
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        PollerStats::register(&registry).unwrap();
        assert!(PollerStats::register(&registry).is_err());
    }
}

// GA Realtime - Google Analytics to Prometheus bridge
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Gauge registry keyed by metric identifier.
//!
//! The registry is filled once at startup and then shared behind an `Arc`.
//! After that it is only written through [`GaugeRegistry::set`], which goes
//! straight to the atomic value of one label tuple, so concurrent writers and
//! scrapes never contend on a registry-wide lock.

use std::collections::BTreeMap;

use prometheus::core::Collector;
use prometheus::{GaugeVec, Opts, Registry, TextEncoder};
use tracing::debug;

use crate::definition::{gauge_name, MetricDefinition};
use crate::error::{RegistryError, Result};

/// Outcome of a successful registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// A new gauge was created.
    Created,
    /// A gauge with the same identifier and arity already existed.
    Existing,
}

struct RegisteredGauge {
    name: String,
    labels: Vec<String>,
    gauge: GaugeVec,
}

/// Owned set of labeled gauges, one per metric identifier.
pub struct GaugeRegistry {
    registry: Registry,
    gauges: BTreeMap<String, RegisteredGauge>,
}

/// Current value of one label tuple.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    /// Label values, aligned with [`GaugeSnapshot::labels`].
    pub label_values: Vec<String>,
    pub value: f64,
}

/// Read-only copy of one gauge.
#[derive(Debug, Clone, PartialEq)]
pub struct GaugeSnapshot {
    pub identifier: String,
    /// Exported name (`ga_<identifier>`).
    pub name: String,
    pub labels: Vec<String>,
    /// Observed tuples, sorted by label values.
    pub series: Vec<Series>,
}

impl GaugeSnapshot {
    /// Value for an exact label tuple, if it was ever observed.
    pub fn value<S: AsRef<str>>(&self, label_values: &[S]) -> Option<f64> {
        self.series
            .iter()
            .find(|s| {
                s.label_values.len() == label_values.len()
                    && s
                        .label_values
                        .iter()
                        .zip(label_values)
                        .all(|(a, b)| a == b.as_ref())
            })
            .map(|s| s.value)
    }
}

impl Default for GaugeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl GaugeRegistry {
    /// Create an empty registry backed by a fresh Prometheus registry.
    pub fn new() -> Self {
        Self::with_registry(Registry::new())
    }

    /// Create an empty registry on top of an existing Prometheus registry.
    pub fn with_registry(registry: Registry) -> Self {
        Self {
            registry,
            gauges: BTreeMap::new(),
        }
    }

    /// Register the gauge derived from a metric definition.
    pub fn register_definition(&mut self, definition: &MetricDefinition) -> Result<Registration> {
        self.register(
            &definition.identifier(),
            &definition.labels(),
            &definition.help(),
        )
    }

    /// Register every definition, stopping at the first conflict.
    ///
    /// Returns how many distinct gauges were created.
    pub fn register_all(&mut self, definitions: &[MetricDefinition]) -> Result<usize> {
        let mut created = 0;
        for definition in definitions {
            if self.register_definition(definition)? == Registration::Created {
                created += 1;
            }
        }
        Ok(created)
    }

    /// Register a gauge for `identifier` with the given label names.
    ///
    /// Registering an identifier that already exists is a no-op as long as
    /// the label arity matches; a different arity is a configuration error.
    pub fn register<S: AsRef<str>>(
        &mut self,
        identifier: &str,
        labels: &[S],
        help: &str,
    ) -> Result<Registration> {
        if let Some(existing) = self.gauges.get(identifier) {
            if existing.labels.len() != labels.len() {
                return Err(RegistryError::ArityConflict {
                    identifier: identifier.to_string(),
                    existing: existing.labels.len(),
                    requested: labels.len(),
                });
            }
            debug!(identifier, "gauge already registered");
            return Ok(Registration::Existing);
        }

        let name = gauge_name(identifier);
        let label_refs: Vec<&str> = labels.iter().map(AsRef::as_ref).collect();
        let gauge = GaugeVec::new(Opts::new(name.clone(), help), &label_refs)?;
        self.registry.register(Box::new(gauge.clone()))?;

        debug!(identifier, name = %name, labels = labels.len(), "registered gauge");
        self.gauges.insert(
            identifier.to_string(),
            RegisteredGauge {
                name,
                labels: labels.iter().map(|l| l.as_ref().to_string()).collect(),
                gauge,
            },
        );
        Ok(Registration::Created)
    }

    /// Set the value of one label tuple, creating it on first use.
    pub fn set<S: AsRef<str>>(&self, identifier: &str, label_values: &[S], value: f64) -> Result<()> {
        let entry = self
            .gauges
            .get(identifier)
            .ok_or_else(|| RegistryError::UnknownGauge(identifier.to_string()))?;

        if entry.labels.len() != label_values.len() {
            return Err(RegistryError::LabelArity {
                identifier: identifier.to_string(),
                expected: entry.labels.len(),
                actual: label_values.len(),
            });
        }

        let values: Vec<&str> = label_values.iter().map(AsRef::as_ref).collect();
        entry.gauge.get_metric_with_label_values(&values)?.set(value);
        Ok(())
    }

    /// Label arity of a registered gauge.
    pub fn arity(&self, identifier: &str) -> Option<usize> {
        self.gauges.get(identifier).map(|g| g.labels.len())
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.gauges.contains_key(identifier)
    }

    /// Number of registered gauges.
    pub fn len(&self) -> usize {
        self.gauges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gauges.is_empty()
    }

    /// Underlying Prometheus registry, for registering auxiliary collectors.
    pub fn prometheus(&self) -> &Registry {
        &self.registry
    }

    /// Copy of every registered gauge and its observed tuples.
    pub fn snapshot(&self) -> Vec<GaugeSnapshot> {
        self.gauges
            .iter()
            .map(|(identifier, entry)| GaugeSnapshot {
                identifier: identifier.clone(),
                name: entry.name.clone(),
                labels: entry.labels.clone(),
                series: collect_series(entry),
            })
            .collect()
    }

    /// Snapshot of a single gauge.
    pub fn gauge(&self, identifier: &str) -> Option<GaugeSnapshot> {
        self.gauges.get(identifier).map(|entry| GaugeSnapshot {
            identifier: identifier.to_string(),
            name: entry.name.clone(),
            labels: entry.labels.clone(),
            series: collect_series(entry),
        })
    }

    /// Encode everything in the Prometheus registry to the text exposition format.
    pub fn encode(&self) -> Result<String> {
        let families = self.registry.gather();
        Ok(TextEncoder::new().encode_to_string(&families)?)
    }
}

fn collect_series(entry: &RegisteredGauge) -> Vec<Series> {
    let mut series: Vec<Series> = entry
        .gauge
        .collect()
        .iter()
        .flat_map(|family| family.get_metric())
        .map(|metric| {
            // Label pairs come back sorted by name; realign to dimension order.
            let pairs = metric.get_label();
            let label_values = entry
                .labels
                .iter()
                .map(|label| {
                    pairs
                        .iter()
                        .find(|p| p.get_name() == label)
                        .map(|p| p.get_value().to_string())
                        .unwrap_or_default()
                })
                .collect();
            Series {
                label_values,
                value: metric.get_gauge().get_value(),
            }
        })
        .collect();
    series.sort_by(|a, b| a.label_values.cmp(&b.label_values));
    series
}

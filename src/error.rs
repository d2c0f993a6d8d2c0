// GA Realtime - Google Analytics to Prometheus bridge
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Error types for the metric registry and the query boundary.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors raised by the gauge registry.
///
/// All of these are configuration or programming errors: registration
/// failures are reported at startup, `set` failures mean the caller built
/// label values that do not belong to the gauge.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Same identifier registered twice with a different label arity
    #[error("Gauge {identifier} already registered with {existing} labels, got {requested}")]
    ArityConflict {
        identifier: String,
        existing: usize,
        requested: usize,
    },

    /// `set` called for an identifier that was never registered
    #[error("Gauge not registered: {0}")]
    UnknownGauge(String),

    /// `set` called with the wrong number of label values
    #[error("Gauge {identifier} expects {expected} label values, got {actual}")]
    LabelArity {
        identifier: String,
        expected: usize,
        actual: usize,
    },

    /// Rejected by the underlying metrics library (invalid name, duplicate label)
    #[error("Prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// Errors from a single analytics query.
///
/// Every variant is recoverable: the poller logs it and moves on.
#[derive(Error, Debug)]
pub enum QueryError {
    /// Network-level failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// The API answered with a non-success status
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// Response body could not be decoded
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// Could not obtain an access token
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The query did not complete in time
    #[error("Query timed out after {0:?}")]
    Timeout(Duration),
}

/// Why a single result row was not applied.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RowError {
    /// Row length does not match `dimensions + 1`
    #[error("Row has {actual} cells, expected {expected}")]
    Arity { expected: usize, actual: usize },

    /// Trailing cell is not a number
    #[error("Invalid value: {0:?}")]
    InvalidValue(String),
}

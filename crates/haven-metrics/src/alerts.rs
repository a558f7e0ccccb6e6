//! Typed threshold alerts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// What kind of threshold was breached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertKind {
    HighFalsePositiveRate,
    HighFalseNegativeRate,
    PerformanceDegradation,
}

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertSeverity {
    Warning,
    /// Reserved for failure modes where unsafe content may be reaching
    /// children — always used for false-negative breaches.
    Critical,
}

/// A raised alert, dispatched at most once per kind per cooldown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub observed: f64,
    pub threshold: f64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub message: String,
}

impl Alert {
    pub(crate) fn new(
        kind: AlertKind,
        severity: AlertSeverity,
        observed: f64,
        threshold: f64,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        message: impl Into<String>,
    ) -> Self {
        let alert = Self {
            kind,
            severity,
            observed,
            threshold,
            window_start,
            window_end,
            message: message.into(),
        };
        warn!(kind = ?alert.kind, severity = ?alert.severity, observed, threshold, "metrics alert raised");
        alert
    }
}

/// Receives alerts for persistence or operator dispatch.
pub trait AlertSink: Send + Sync {
    fn dispatch(&self, alert: &Alert);
}

/// Sink that drops alerts; the tracing warning still fires.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAlertSink;

impl AlertSink for NullAlertSink {
    fn dispatch(&self, _alert: &Alert) {}
}

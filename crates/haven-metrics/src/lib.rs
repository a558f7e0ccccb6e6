//! # haven-metrics
//!
//! Records every safety classification outcome against human ground
//! truth, aggregates confusion-matrix statistics over time windows, and
//! raises alerts when accuracy thresholds are breached.
//!
//! The write path is an append-only record log; the read path is
//! windowed aggregation over a snapshot of that log. Concurrent writers
//! never race on shared accumulators, and a report always reflects a
//! consistent point-in-time view.
//!
//! "Positive" throughout means *unsafe detected*: a true positive is
//! unsafe content correctly flagged, a false negative is unsafe content
//! that slipped through. False negatives are the most dangerous failure
//! mode and dominate both grading and alert severity.

#![deny(unsafe_code)]

pub mod alerts;
pub mod engine;
pub mod report;

pub use alerts::{Alert, AlertKind, AlertSeverity, AlertSink, NullAlertSink};
pub use engine::{MetricRecord, MetricType, MetricsError, SafetyMetricsEngine};
pub use report::{AccuracyReport, PerformanceGrade};

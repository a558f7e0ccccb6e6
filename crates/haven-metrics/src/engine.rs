//! The metrics engine: append-only record log plus windowed reads.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use haven_types::MetricAlertThresholds;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::alerts::{Alert, AlertKind, AlertSeverity, AlertSink};
use crate::report::{grade, ratio, AccuracyReport};

/// How far predicted severity may differ from actual severity while
/// still counting as a correct escalation.
pub const ESCALATION_TOLERANCE: u8 = 1;

/// Classification of a single metric record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricType {
    /// Unsafe content correctly flagged.
    TruePositive,
    /// Safe content correctly passed.
    TrueNegative,
    /// Safe content incorrectly flagged.
    FalsePositive,
    /// Unsafe content that slipped through.
    FalseNegative,
    EscalationCorrect,
    EscalationIncorrect,
    ResponseTime,
    SystemError,
}

/// One write-once metric record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub recorded_at: DateTime<Utc>,
    pub metric_type: MetricType,
    pub value: f64,
    pub child_age: Option<u8>,
    pub severity_level: Option<u8>,
    pub metadata: HashMap<String, String>,
}

impl MetricRecord {
    fn new(metric_type: MetricType, value: f64) -> Self {
        Self {
            recorded_at: Utc::now(),
            metric_type,
            value,
            child_age: None,
            severity_level: None,
            metadata: HashMap::new(),
        }
    }
}

/// Errors from the metrics engine.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("metrics lock poisoned")]
    Lock,

    #[error("invalid window: start {start} is after end {end}")]
    InvalidWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

/// Append-only metrics engine with windowed aggregation and alerting.
pub struct SafetyMetricsEngine {
    records: RwLock<Vec<MetricRecord>>,
    thresholds: RwLock<MetricAlertThresholds>,
    // When each alert kind last fired. One entry per kind, so a watcher
    // polling a sliding window cannot grow this or re-raise a breach
    // inside the cooldown.
    last_dispatched: RwLock<HashMap<AlertKind, DateTime<Utc>>>,
}

impl SafetyMetricsEngine {
    pub fn new(thresholds: MetricAlertThresholds) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            thresholds: RwLock::new(thresholds),
            last_dispatched: RwLock::new(HashMap::new()),
        }
    }

    /// Record one classification outcome against ground truth.
    ///
    /// Exactly one confusion-matrix record is appended per call, plus a
    /// response-time record.
    pub fn record_evaluation(
        &self,
        actual_is_safe: bool,
        predicted_is_safe: bool,
        severity_level: u8,
        response_time_ms: f64,
        child_age: Option<u8>,
    ) -> Result<(), MetricsError> {
        let metric_type = match (actual_is_safe, predicted_is_safe) {
            (true, true) => MetricType::TrueNegative,
            (false, false) => MetricType::TruePositive,
            (true, false) => MetricType::FalsePositive,
            (false, true) => MetricType::FalseNegative,
        };

        let mut outcome = MetricRecord::new(metric_type, 1.0);
        outcome.severity_level = Some(severity_level);
        outcome.child_age = child_age;

        let mut timing = MetricRecord::new(MetricType::ResponseTime, response_time_ms);
        timing.child_age = child_age;

        debug!(?metric_type, severity_level, "evaluation recorded");
        self.append(vec![outcome, timing])
    }

    /// Record one escalation decision against ground truth. Within
    /// [`ESCALATION_TOLERANCE`] severity levels counts as correct.
    pub fn record_escalation(
        &self,
        actual_severity: u8,
        predicted_severity: u8,
        response_time_ms: f64,
        child_age: Option<u8>,
    ) -> Result<(), MetricsError> {
        let metric_type = if actual_severity.abs_diff(predicted_severity) <= ESCALATION_TOLERANCE {
            MetricType::EscalationCorrect
        } else {
            MetricType::EscalationIncorrect
        };

        let mut outcome = MetricRecord::new(metric_type, 1.0);
        outcome.severity_level = Some(actual_severity);
        outcome.child_age = child_age;

        let mut timing = MetricRecord::new(MetricType::ResponseTime, response_time_ms);
        timing.child_age = child_age;

        self.append(vec![outcome, timing])
    }

    /// Record a system error (classification failure, generation
    /// timeout, unsafe generated reply).
    pub fn record_system_error(&self, detail: impl Into<String>) -> Result<(), MetricsError> {
        let mut record = MetricRecord::new(MetricType::SystemError, 1.0);
        record.metadata.insert("detail".into(), detail.into());
        self.append(vec![record])
    }

    /// Compute an accuracy report over `[start, end]`.
    pub fn report(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<AccuracyReport, MetricsError> {
        if start > end {
            return Err(MetricsError::InvalidWindow { start, end });
        }

        let records = self.records.read().map_err(|_| MetricsError::Lock)?;
        let window: Vec<&MetricRecord> = records
            .iter()
            .filter(|r| r.recorded_at >= start && r.recorded_at <= end)
            .collect();

        let count = |t: MetricType| window.iter().filter(|r| r.metric_type == t).count() as u64;

        let tp = count(MetricType::TruePositive);
        let tn = count(MetricType::TrueNegative);
        let fp = count(MetricType::FalsePositive);
        let fn_ = count(MetricType::FalseNegative);
        let esc_ok = count(MetricType::EscalationCorrect);
        let esc_bad = count(MetricType::EscalationIncorrect);
        let errors = count(MetricType::SystemError);
        let total = tp + tn + fp + fn_;

        let accuracy = ratio(tp + tn, total);
        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        let f1_score = if precision + recall == 0.0 {
            0.0
        } else {
            2.0 * precision * recall / (precision + recall)
        };
        let false_positive_rate = ratio(fp, fp + tn);
        let false_negative_rate = ratio(fn_, fn_ + tp);
        let escalation_accuracy = ratio(esc_ok, esc_ok + esc_bad);

        let response_times: Vec<f64> = window
            .iter()
            .filter(|r| r.metric_type == MetricType::ResponseTime)
            .map(|r| r.value)
            .collect();
        let average_response_ms = if response_times.is_empty() {
            0.0
        } else {
            response_times.iter().sum::<f64>() / response_times.len() as f64
        };

        let performance_grade = grade(total, accuracy, false_negative_rate);
        let thresholds = self.thresholds.read().map_err(|_| MetricsError::Lock)?;
        let recommendations = recommendations(
            false_positive_rate,
            false_negative_rate,
            average_response_ms,
            errors,
            &thresholds,
        );

        Ok(AccuracyReport {
            window_start: start,
            window_end: end,
            true_positives: tp,
            true_negatives: tn,
            false_positives: fp,
            false_negatives: fn_,
            escalations_correct: esc_ok,
            escalations_incorrect: esc_bad,
            system_errors: errors,
            total_evaluations: total,
            accuracy,
            precision,
            recall,
            f1_score,
            false_positive_rate,
            false_negative_rate,
            escalation_accuracy,
            average_response_ms,
            performance_grade,
            recommendations,
        })
    }

    /// Check the window against alert thresholds and dispatch any new
    /// alerts to the sink. Each kind fires at most once per cooldown,
    /// measured against the window end, so repeated checks over a
    /// sliding window report one breach once.
    pub fn check_alerts(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        sink: &dyn AlertSink,
    ) -> Result<Vec<Alert>, MetricsError> {
        let report = self.report(start, end)?;
        let thresholds = self
            .thresholds
            .read()
            .map_err(|_| MetricsError::Lock)?
            .clone();

        let mut candidates = Vec::new();

        if report.total_evaluations >= thresholds.min_sample_size as u64 {
            if report.false_positive_rate > thresholds.max_false_positive_rate {
                candidates.push(Alert::new(
                    AlertKind::HighFalsePositiveRate,
                    AlertSeverity::Warning,
                    report.false_positive_rate,
                    thresholds.max_false_positive_rate,
                    start,
                    end,
                    "safe content is being over-blocked",
                ));
            }
            // Missed unsafe content is always critical, whatever the volume.
            if report.false_negative_rate > thresholds.max_false_negative_rate {
                candidates.push(Alert::new(
                    AlertKind::HighFalseNegativeRate,
                    AlertSeverity::Critical,
                    report.false_negative_rate,
                    thresholds.max_false_negative_rate,
                    start,
                    end,
                    "unsafe content is slipping past the classifier",
                ));
            }
        }

        if report.average_response_ms > thresholds.max_average_response_ms
            && report.average_response_ms > 0.0
        {
            candidates.push(Alert::new(
                AlertKind::PerformanceDegradation,
                AlertSeverity::Warning,
                report.average_response_ms,
                thresholds.max_average_response_ms,
                start,
                end,
                "sustained elevated response time",
            ));
        }

        let cooldown = Duration::minutes(i64::from(thresholds.alert_cooldown_minutes));
        let mut dispatched = self
            .last_dispatched
            .write()
            .map_err(|_| MetricsError::Lock)?;
        let mut raised = Vec::new();
        for alert in candidates {
            let cooling = dispatched
                .get(&alert.kind)
                .is_some_and(|last| end - *last < cooldown);
            if !cooling {
                dispatched.insert(alert.kind, end);
                sink.dispatch(&alert);
                raised.push(alert);
            }
        }
        Ok(raised)
    }

    /// Replace alert thresholds (hot reload).
    pub fn set_thresholds(&self, thresholds: MetricAlertThresholds) -> Result<(), MetricsError> {
        *self.thresholds.write().map_err(|_| MetricsError::Lock)? = thresholds;
        Ok(())
    }

    /// Total records in the log (all types).
    pub fn record_count(&self) -> Result<usize, MetricsError> {
        Ok(self.records.read().map_err(|_| MetricsError::Lock)?.len())
    }

    fn append(&self, mut new_records: Vec<MetricRecord>) -> Result<(), MetricsError> {
        self.records
            .write()
            .map_err(|_| MetricsError::Lock)?
            .append(&mut new_records);
        Ok(())
    }
}

impl Default for SafetyMetricsEngine {
    fn default() -> Self {
        Self::new(MetricAlertThresholds::default())
    }
}

fn recommendations(
    fp_rate: f64,
    fn_rate: f64,
    avg_response_ms: f64,
    system_errors: u64,
    thresholds: &MetricAlertThresholds,
) -> Vec<String> {
    let mut out = Vec::new();
    if fn_rate > thresholds.max_false_negative_rate {
        out.push(
            "False-negative rate exceeds threshold: review recent missed escalations and \
             tighten critical-tier patterns"
                .into(),
        );
    }
    if fp_rate > thresholds.max_false_positive_rate {
        out.push(
            "False-positive rate exceeds threshold: review recently blocked safe content for \
             over-broad patterns"
                .into(),
        );
    }
    if avg_response_ms > thresholds.max_average_response_ms {
        out.push("Average response time is elevated: check content-generator latency".into());
    }
    if system_errors > 0 {
        out.push(format!(
            "{} system error(s) in window: inspect generation timeouts and rule-set loads",
            system_errors
        ));
    }
    out
}

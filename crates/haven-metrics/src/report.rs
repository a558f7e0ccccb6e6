//! Windowed accuracy reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Letter grade summarizing classifier performance over a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PerformanceGrade {
    A,
    B,
    C,
    D,
    F,
}

/// Derived statistics over a time window.
///
/// All ratios default to 0.0 when their denominator is zero; an empty
/// window grades F rather than erroring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyReport {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,

    pub true_positives: u64,
    pub true_negatives: u64,
    pub false_positives: u64,
    pub false_negatives: u64,
    pub escalations_correct: u64,
    pub escalations_incorrect: u64,
    pub system_errors: u64,
    pub total_evaluations: u64,

    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub false_positive_rate: f64,
    pub false_negative_rate: f64,
    pub escalation_accuracy: f64,
    pub average_response_ms: f64,

    pub performance_grade: PerformanceGrade,
    pub recommendations: Vec<String>,
}

/// Divide, defaulting to 0.0 on a zero denominator.
pub(crate) fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Grade bands. False-negative rate dominates: missing unsafe content
/// is weighted far more heavily than over-blocking safe content.
pub(crate) fn grade(total: u64, accuracy: f64, false_negative_rate: f64) -> PerformanceGrade {
    if total == 0 {
        return PerformanceGrade::F;
    }
    if accuracy > 0.95 && false_negative_rate < 0.02 {
        PerformanceGrade::A
    } else if accuracy > 0.90 && false_negative_rate < 0.05 {
        PerformanceGrade::B
    } else if accuracy > 0.80 && false_negative_rate < 0.10 {
        PerformanceGrade::C
    } else if accuracy > 0.70 {
        PerformanceGrade::D
    } else {
        PerformanceGrade::F
    }
}

//! The text safety classifier.
//!
//! Pure and deterministic: no I/O, no clocks, no shared mutable state.
//! Safe to call concurrently on every message in the hot path.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::rules::{RuleSetHandle, SeverityTier};

/// Severity at or above which a verdict is unsafe.
///
/// Supportive (1.0) and contextual (1.5) matches stay below the cutoff:
/// they are informational, not blocking.
pub const UNSAFE_CUTOFF: f64 = 2.0;

/// One matched rule, reported on the verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleMatch {
    pub category: String,
    pub reason: String,
    pub severity: f64,
}

/// The outcome of one classification call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyVerdict {
    pub is_safe: bool,
    /// Maximum severity among matched rules, 0.0 when nothing matched.
    pub severity: f64,
    /// Every matched category, in rule-set order — kept even on safe
    /// verdicts so downstream consumers see supportive signals.
    pub matches: Vec<RuleMatch>,
    /// Version of the rule set that produced this verdict.
    pub ruleset_version: String,
}

impl SafetyVerdict {
    /// Integer severity level (0..=3) for durable records.
    pub fn severity_level(&self) -> u8 {
        if self.severity >= SeverityTier::Critical.weight() {
            3
        } else if self.severity >= UNSAFE_CUTOFF {
            2
        } else if self.severity > 0.0 {
            1
        } else {
            0
        }
    }

    /// Did any critical-tier rule match?
    pub fn is_critical(&self) -> bool {
        self.severity >= SeverityTier::Critical.weight()
    }

    pub fn matched_categories(&self) -> Vec<&str> {
        self.matches.iter().map(|m| m.category.as_str()).collect()
    }
}

/// Applies a rule set to message text.
#[derive(Debug, Clone)]
pub struct TextSafetyClassifier {
    rules: RuleSetHandle,
}

impl TextSafetyClassifier {
    pub fn new(rules: RuleSetHandle) -> Self {
        Self { rules }
    }

    /// Classify a text against every rule in the active set.
    ///
    /// Severity is the maximum matched tier weight. Empty text matches
    /// nothing and is safe by definition.
    pub fn classify(&self, text: &str) -> SafetyVerdict {
        let set = self.rules.snapshot();

        let mut matches = Vec::new();
        let mut severity: f64 = 0.0;

        if !text.is_empty() {
            for rule in set.rules() {
                if rule.matches(text) {
                    severity = severity.max(rule.tier.weight());
                    matches.push(RuleMatch {
                        category: rule.category.clone(),
                        reason: rule.reason.clone(),
                        severity: rule.tier.weight(),
                    });
                }
            }
        }

        let verdict = SafetyVerdict {
            is_safe: severity < UNSAFE_CUTOFF,
            severity,
            matches,
            ruleset_version: set.version().to_string(),
        };

        if !verdict.is_safe {
            debug!(
                severity = verdict.severity,
                categories = ?verdict.matched_categories(),
                "unsafe content detected"
            );
        }

        verdict
    }
}

impl Default for TextSafetyClassifier {
    fn default() -> Self {
        Self::new(RuleSetHandle::default())
    }
}

//! Versioned engine configuration.
//!
//! Thresholds are supplied externally (YAML or JSON), validated at load
//! time, and hot-reloaded by swapping the whole document. No component
//! reads configuration from global state.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Time limits and warning offsets enforced by the session governor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernorLimits {
    /// Daily chat allowance in minutes.
    pub daily_limit_minutes: u32,
    /// Weekly chat allowance in minutes.
    pub weekly_limit_minutes: u32,
    /// Minutes-remaining marks at which a warning is due, descending.
    pub warning_offsets_minutes: Vec<u32>,
    /// Consecutive deferred polls allowed after the limit is reached
    /// before the session ends unconditionally.
    pub max_grace_polls: u32,
}

impl Default for GovernorLimits {
    fn default() -> Self {
        Self {
            daily_limit_minutes: 60,
            weekly_limit_minutes: 300,
            warning_offsets_minutes: vec![10, 5, 2, 1],
            max_grace_polls: 3,
        }
    }
}

/// Alert thresholds watched by the metrics engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricAlertThresholds {
    /// False-positive rate above which an alert is raised.
    pub max_false_positive_rate: f64,
    /// False-negative rate above which a critical alert is raised.
    pub max_false_negative_rate: f64,
    /// Average response time (ms) above which performance degradation
    /// is flagged.
    pub max_average_response_ms: f64,
    /// Minimum evaluations in a window before rate alerts apply.
    pub min_sample_size: usize,
    /// Minimum gap between alerts of the same kind. Keeps a periodic
    /// watcher polling a sliding window from re-raising one breach.
    pub alert_cooldown_minutes: u32,
}

impl Default for MetricAlertThresholds {
    fn default() -> Self {
        Self {
            max_false_positive_rate: 0.10,
            max_false_negative_rate: 0.02,
            max_average_response_ms: 500.0,
            min_sample_size: 20,
            alert_cooldown_minutes: 30,
        }
    }
}

/// Top-level engine configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Configuration document version, surfaced in audit records.
    pub version: String,
    #[serde(default)]
    pub governor: GovernorLimits,
    #[serde(default)]
    pub alerts: MetricAlertThresholds,
    /// Timeout for the content-generator handoff, milliseconds.
    pub generation_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: "default".into(),
            governor: GovernorLimits::default(),
            alerts: MetricAlertThresholds::default(),
            generation_timeout_ms: 10_000,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a YAML configuration document.
    pub fn from_yaml(doc: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(doc)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject documents that could disable the hard-limit guarantee.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.governor.daily_limit_minutes == 0 {
            return Err(ConfigError::Invalid("daily limit must be positive".into()));
        }
        if self.governor.weekly_limit_minutes < self.governor.daily_limit_minutes {
            return Err(ConfigError::Invalid(
                "weekly limit must be at least the daily limit".into(),
            ));
        }
        if self.governor.warning_offsets_minutes.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one warning offset is required".into(),
            ));
        }
        if self.generation_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "generation timeout must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn yaml_round_trip() {
        let doc = r#"
version: "2026-08-01"
generation_timeout_ms: 8000
governor:
  daily_limit_minutes: 30
  weekly_limit_minutes: 180
  warning_offsets_minutes: [10, 5, 2, 1]
  max_grace_polls: 3
"#;
        let config = EngineConfig::from_yaml(doc).unwrap();
        assert_eq!(config.version, "2026-08-01");
        assert_eq!(config.governor.daily_limit_minutes, 30);
        // Alert thresholds fall back to defaults when omitted
        assert_eq!(config.alerts, MetricAlertThresholds::default());
    }

    #[test]
    fn zero_daily_limit_rejected() {
        let mut config = EngineConfig::default();
        config.governor.daily_limit_minutes = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn weekly_below_daily_rejected() {
        let mut config = EngineConfig::default();
        config.governor.daily_limit_minutes = 60;
        config.governor.weekly_limit_minutes = 30;
        assert!(config.validate().is_err());
    }
}

//! # haven-safety
//!
//! Pattern-based text safety classification for child conversations.
//!
//! A [`PatternRuleSet`] groups regex detection rules into four severity
//! tiers. The [`TextSafetyClassifier`] runs every rule against a text and
//! produces a [`SafetyVerdict`]: the maximum matched tier weight, every
//! matched category, and a safety boolean at the 2.0 cutoff. Matches in
//! the supportive (1.0) and contextual (1.5) tiers are informational —
//! they never block on their own, but they are always reported so the
//! audit trail and context analysis keep the signal.
//!
//! Rule sets are immutable once loaded. Hot reload swaps the whole set
//! through [`RuleSetHandle`] so in-flight classifications never observe
//! a half-updated collection.

#![deny(unsafe_code)]

pub mod classifier;
pub mod error;
pub mod rules;

pub use classifier::{RuleMatch, SafetyVerdict, TextSafetyClassifier, UNSAFE_CUTOFF};
pub use error::SafetyError;
pub use rules::{PatternRule, PatternRuleSet, RuleSetConfig, RuleSetHandle, SeverityTier};

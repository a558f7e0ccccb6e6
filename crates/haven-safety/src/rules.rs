//! Versioned pattern rule sets.
//!
//! Rules are compiled once at load time and carry their severity tier
//! explicitly, so classification never rescans tier membership lists.

use std::sync::{Arc, RwLock};

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::SafetyError;

/// Severity tier a detection rule belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeverityTier {
    /// Supportive signals (sadness, loneliness) — informational only.
    Supportive,
    /// Contextual guidance (scary content, online strangers) — still safe.
    Contextual,
    /// High concern (personal info sharing, bullying) — unsafe.
    High,
    /// Critical (self-harm, violence, predatory contact) — unsafe, blocks.
    Critical,
}

impl SeverityTier {
    /// Numeric weight used for verdict severity.
    pub fn weight(self) -> f64 {
        match self {
            SeverityTier::Supportive => 1.0,
            SeverityTier::Contextual => 1.5,
            SeverityTier::High => 2.5,
            SeverityTier::Critical => 3.0,
        }
    }

    /// Integer severity level (0..=3) used on durable records.
    pub fn level(self) -> u8 {
        match self {
            SeverityTier::Supportive => 1,
            SeverityTier::Contextual => 1,
            SeverityTier::High => 2,
            SeverityTier::Critical => 3,
        }
    }
}

/// A single compiled detection rule.
#[derive(Debug, Clone)]
pub struct PatternRule {
    pub category: String,
    pub matcher: Regex,
    pub tier: SeverityTier,
    pub reason: String,
}

impl PatternRule {
    /// Compile a rule; patterns are case-insensitive by default.
    pub fn compile(
        category: impl Into<String>,
        pattern: &str,
        tier: SeverityTier,
        reason: impl Into<String>,
    ) -> Result<Self, SafetyError> {
        let category = category.into();
        let matcher = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|source| SafetyError::InvalidPattern {
                category: category.clone(),
                source,
            })?;
        Ok(Self {
            category,
            matcher,
            tier,
            reason: reason.into(),
        })
    }

    pub fn matches(&self, text: &str) -> bool {
        self.matcher.is_match(text)
    }
}

/// One rule entry in a configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleEntry {
    pub category: String,
    pub pattern: String,
    pub tier: SeverityTier,
    pub reason: String,
}

/// Loadable rule-set configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSetConfig {
    pub version: String,
    pub rules: Vec<RuleEntry>,
}

impl RuleSetConfig {
    pub fn from_yaml(doc: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(doc)
    }
}

/// An immutable, versioned collection of compiled rules.
#[derive(Debug, Clone)]
pub struct PatternRuleSet {
    version: String,
    rules: Vec<PatternRule>,
}

impl PatternRuleSet {
    /// Compile a configuration document into a rule set.
    pub fn load(config: &RuleSetConfig) -> Result<Self, SafetyError> {
        if config.rules.is_empty() {
            return Err(SafetyError::EmptyRuleSet {
                version: config.version.clone(),
            });
        }
        let rules = config
            .rules
            .iter()
            .map(|e| PatternRule::compile(&e.category, &e.pattern, e.tier, &e.reason))
            .collect::<Result<Vec<_>, _>>()?;
        info!(version = %config.version, count = rules.len(), "rule set loaded");
        Ok(Self {
            version: config.version.clone(),
            rules,
        })
    }

    /// The built-in rule set shipped with the engine.
    pub fn builtin() -> Self {
        Self::load(&builtin_config()).expect("builtin rule set must compile")
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn rules(&self) -> &[PatternRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Shared handle for hot-reloading rule sets.
///
/// Readers take a cheap snapshot (`Arc` clone); `install` swaps the
/// pointer under a short write lock. In-flight classifications keep the
/// snapshot they started with.
#[derive(Debug, Clone)]
pub struct RuleSetHandle {
    inner: Arc<RwLock<Arc<PatternRuleSet>>>,
}

impl RuleSetHandle {
    pub fn new(set: PatternRuleSet) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(set))),
        }
    }

    /// Current rule set. Falls back to the built-in set if the lock was
    /// poisoned by a panicking writer — classification must stay
    /// available, and the built-in set is the conservative choice.
    pub fn snapshot(&self) -> Arc<PatternRuleSet> {
        match self.inner.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Atomically replace the active rule set.
    pub fn install(&self, set: PatternRuleSet) {
        let version = set.version.clone();
        let next = Arc::new(set);
        match self.inner.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
        info!(%version, "rule set installed");
    }
}

impl Default for RuleSetHandle {
    fn default() -> Self {
        Self::new(PatternRuleSet::builtin())
    }
}

fn entry(category: &str, pattern: &str, tier: SeverityTier, reason: &str) -> RuleEntry {
    RuleEntry {
        category: category.into(),
        pattern: pattern.into(),
        tier,
        reason: reason.into(),
    }
}

/// Built-in detection rules, grouped by tier.
pub fn builtin_config() -> RuleSetConfig {
    use SeverityTier::*;
    RuleSetConfig {
        version: "builtin-1".into(),
        rules: vec![
            // Critical — block immediately, notify, escalate.
            entry(
                "self_harm",
                r"\b(hurt|kill|harm)\s+(myself|me)\b|\bsuicide\b|\bwant\s+to\s+die\b|\bend\s+my\s+life\b|\bcut(ting)?\s+myself\b",
                Critical,
                "expressions of self-harm or suicidal intent",
            ),
            entry(
                "violence",
                r"\b(hurt|kill|stab|shoot|attack)\s+(him|her|them|someone|people|everyone)\b|\bbring\s+a\s+(knife|gun|weapon)\b",
                Critical,
                "threats of violence toward others",
            ),
            entry(
                "sexual_content",
                r"\bsex(ual)?\b|\bnaked\b|\bnude(s)?\b|\bsend\s+(me\s+)?(a\s+)?(photo|picture|pic)s?\s+of\s+you\b",
                Critical,
                "sexual content or solicitation of images",
            ),
            entry(
                "meeting_request",
                r"\bmeet\s+(me|up)\s+(in\s+person|somewhere|alone)\b|\bdon'?t\s+tell\s+your\s+parents\b|\bkeep\s+(this|it)\s+(a\s+)?secret\s+from\b",
                Critical,
                "attempts to arrange secret in-person contact",
            ),
            // High concern — unsafe, notify parents.
            entry(
                "personal_info",
                r"\bmy\s+(home\s+)?address\s+is\b|\bmy\s+phone\s+number\s+is\b|\bi\s+live\s+(at|on)\s+\d|\bmy\s+school\s+is\s+called\b",
                High,
                "sharing identifying personal information",
            ),
            entry(
                "bullying",
                r"\b(everyone|they)\s+(hates?|hate)\s+me\b|\bbull(y|ies|ied|ying)\b|\bmaking\s+fun\s+of\s+me\b|\bpick(s|ing)?\s+on\s+me\b",
                High,
                "signs of bullying or social exclusion",
            ),
            entry(
                "substance_use",
                r"\b(drugs?|vap(e|ing)|alcohol|drunk|smoking|cigarettes?)\b",
                High,
                "references to drugs, alcohol, or smoking",
            ),
            // Contextual guidance — safe, but worth noting.
            entry(
                "online_stranger",
                r"\bsomeone\s+(online|on\s+the\s+internet)\s+(asked|wants|said|told)\b|\ba\s+stranger\s+(messaged|added)\s+me\b",
                Contextual,
                "contact from unknown people online",
            ),
            entry(
                "scary_content",
                r"\b(nightmare|scary\s+(movie|video|game)|really\s+scared\s+of)\b",
                Contextual,
                "exposure to frightening content",
            ),
            // Supportive — emotional signals to respond to gently.
            entry(
                "sadness",
                r"\b(i'?m|i\s+am|i\s+feel|feeling)\s+(so\s+|really\s+|very\s+)?(sad|down|unhappy|miserable)\b|\bwant\s+to\s+cry\b",
                Supportive,
                "expressions of sadness",
            ),
            entry(
                "loneliness",
                r"\b(i'?m|i\s+am|i\s+feel|feeling)\s+(so\s+|really\s+)?(lonely|alone)\b|\bno\s+(one|body)\s+(likes|talks\s+to)\s+me\b",
                Supportive,
                "expressions of loneliness",
            ),
            entry(
                "anxiety",
                r"\b(i'?m|i\s+am|i\s+feel|feeling)\s+(so\s+|really\s+)?(worried|nervous|anxious|stressed)\b",
                Supportive,
                "expressions of worry or anxiety",
            ),
            entry(
                "family_conflict",
                r"\bmy\s+(mom|dad|parents)\s+(are|were|keep)\s+(fighting|yelling|arguing)\b|\bparents\s+are\s+getting\s+divorced\b",
                Supportive,
                "family conflict the child may need support with",
            ),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_set_compiles() {
        let set = PatternRuleSet::builtin();
        assert!(set.len() > 10);
        assert_eq!(set.version(), "builtin-1");
    }

    #[test]
    fn tier_weights_are_ordered() {
        assert!(SeverityTier::Critical.weight() > SeverityTier::High.weight());
        assert!(SeverityTier::High.weight() > SeverityTier::Contextual.weight());
        assert!(SeverityTier::Contextual.weight() > SeverityTier::Supportive.weight());
    }

    #[test]
    fn rules_match_case_insensitively() {
        let rule = PatternRule::compile(
            "self_harm",
            r"\bhurt\s+myself\b",
            SeverityTier::Critical,
            "test",
        )
        .unwrap();
        assert!(rule.matches("I want to HURT MYSELF"));
        assert!(!rule.matches("I hurt my knee"));
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let err = PatternRule::compile("broken", "(unclosed", SeverityTier::High, "test");
        assert!(matches!(err, Err(SafetyError::InvalidPattern { .. })));
    }

    #[test]
    fn empty_rule_set_is_rejected() {
        let config = RuleSetConfig {
            version: "empty".into(),
            rules: vec![],
        };
        assert!(matches!(
            PatternRuleSet::load(&config),
            Err(SafetyError::EmptyRuleSet { .. })
        ));
    }

    #[test]
    fn yaml_config_loads() {
        let doc = r#"
version: "custom-1"
rules:
  - category: self_harm
    pattern: '\bhurt myself\b'
    tier: critical
    reason: self-harm language
  - category: sadness
    pattern: '\bso sad\b'
    tier: supportive
    reason: sadness signal
"#;
        let config = RuleSetConfig::from_yaml(doc).unwrap();
        let set = PatternRuleSet::load(&config).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.rules()[0].tier, SeverityTier::Critical);
    }

    #[test]
    fn handle_swaps_atomically() {
        let handle = RuleSetHandle::default();
        let before = handle.snapshot();
        assert_eq!(before.version(), "builtin-1");

        let config = RuleSetConfig {
            version: "v2".into(),
            rules: vec![RuleEntry {
                category: "test".into(),
                pattern: "test".into(),
                tier: SeverityTier::Supportive,
                reason: "test".into(),
            }],
        };
        handle.install(PatternRuleSet::load(&config).unwrap());

        // Old snapshot is untouched, new snapshot sees the swap
        assert_eq!(before.version(), "builtin-1");
        assert_eq!(handle.snapshot().version(), "v2");
    }
}

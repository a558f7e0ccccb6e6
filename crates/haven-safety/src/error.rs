use thiserror::Error;

/// Errors from rule-set loading.
///
/// A malformed rule set never degrades to partial matching: loading
/// fails as a whole and the caller keeps (or fails closed without) the
/// previous set.
#[derive(Debug, Error)]
pub enum SafetyError {
    #[error("invalid pattern for category {category}: {source}")]
    InvalidPattern {
        category: String,
        #[source]
        source: regex::Error,
    },

    #[error("rule set {version} contains no rules")]
    EmptyRuleSet { version: String },
}

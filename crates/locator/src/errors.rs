//! Error types for pattern learning and element resolution

use thiserror::Error;

/// Pattern learning failures. These are fatal for a run: without a pattern
/// no per-order locator can be generated.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PatternError {
    /// The two reference locators are byte-identical.
    #[error("reference locators are identical, no loop dimension to learn")]
    IdenticalInputs,

    /// No segment anywhere carries an integer index marker.
    #[error("no indexable segment found in '{0}'")]
    NoIndexableSegment(String),
}

/// Element resolution failures. Recoverable per field via the strategy
/// chain and the retry budget.
#[derive(Debug, Error, Clone)]
pub enum LocatorError {
    /// No strategy produced a usable element.
    #[error("element not found: {0}")]
    ElementNotFound(String),

    /// A locator string could not be interpreted.
    #[error("invalid locator: {0}")]
    InvalidLocator(String),

    /// A single strategy failed; the chain continues.
    #[error("strategy '{strategy}' failed: {reason}")]
    StrategyFailed { strategy: String, reason: String },

    /// The page port reported an error.
    #[error("page error: {0}")]
    Page(String),
}

impl LocatorError {
    /// Whether a fresh attempt against the same locator could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LocatorError::ElementNotFound(_) | LocatorError::Page(_)
        )
    }
}

//! Engine error taxonomy.
//!
//! Field-level failures are absorbed: logged with field name, order index
//! and attempt count, then retried or skipped. Run-level failures stop the
//! engine with everything committed so far preserved.

use shipharvest_locator::{LocatorError, PatternError};
use thiserror::Error;

/// Fatal-for-the-run conditions.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No usable loop pattern; surfaced before any order is processed.
    #[error("pattern learning failed: {0}")]
    PatternLearning(#[from] PatternError),

    #[error("no enabled operations configured")]
    NoEnabledOperations,

    #[error("order count could not be resolved: {0}")]
    OrderCountUnresolved(String),

    #[error("engine is not idle (state: {0})")]
    InvalidState(String),

    /// Unrecoverable failure on the navigation/scroll path.
    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("clipboard channel failed: {0}")]
    Clipboard(String),
}

/// Local-to-one-field conditions; the order still commits if any other
/// field produced a value.
#[derive(Debug, Error)]
pub enum FieldError {
    #[error("element resolution failed: {0}")]
    Resolution(#[from] LocatorError),

    /// The clipboard never delivered fresh content within the wait.
    #[error("clipboard capture timed out")]
    CaptureTimeout,

    #[error("pointer failed: {0}")]
    Pointer(String),

    #[error("page interaction failed: {0}")]
    Page(String),

    /// A cached coordinate stood in for the element but the operation
    /// needs a real one (text cannot be read from a screen point).
    #[error("virtual element cannot satisfy '{0}'")]
    VirtualElementUnusable(String),
}

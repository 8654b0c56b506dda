//! Visual challenge ("anomaly") detection.
//!
//! A detector task samples a captured surface on a fixed interval and
//! decides whether the page is currently showing an anti-automation
//! challenge. Two signals feed the decision: similarity against a set of
//! reference template images, and a brightness/dark-area heuristic that
//! catches dimmed overlay masks no template exists for.
//!
//! Transitions drive the shared [`ControlFlags`]: Clear→Blocked suspends
//! the collection engine, Blocked→Clear resumes it and starts a fresh
//! retry epoch (via registered sinks).

pub mod detector;
pub mod errors;
pub mod heuristics;
pub mod models;
pub mod templates;

pub use detector::AnomalyDetector;
pub use errors::AnomalyError;
pub use models::{
    AnomalySink, BlockReason, CaptchaState, CapturePort, DetectorConfig, TracingAlertSink,
};
pub use templates::{Template, TemplateSet};

//! The collection control loop.
//!
//! [`CollectionEngine`] consumes the other crates to run a complete
//! extraction: learn the per-item locator pattern, walk the configured
//! field operations for every order, reconcile clipboard captures, fall
//! back to cached coordinates under retry, and suspend whenever the shared
//! flags say an operator paused the run or the anomaly detector saw a
//! challenge.

pub mod advance;
pub mod config;
pub mod deps;
pub mod engine;
pub mod errors;
pub mod executor;
pub mod ident;
pub mod ports;
pub mod report;
pub mod state;

#[cfg(feature = "stub")]
pub mod stub;

pub use config::EngineConfig;
pub use deps::EngineDeps;
pub use engine::CollectionEngine;
pub use errors::{EngineError, FieldError};
pub use ports::{CachedCoordinateSource, OperatorPort, PointerPort, ScrollTracker};
pub use report::{RunReport, RunSummary};
pub use state::EngineState;

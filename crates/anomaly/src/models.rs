//! Detector configuration, shared state and capability ports

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::AnomalyError;

/// Capture a bitmap of the designated visual surface.
///
/// Platform window-capture mechanics live behind this contract; the
/// detector never assumes a specific OS.
#[async_trait]
pub trait CapturePort: Send + Sync {
    async fn capture(&self) -> Result<DynamicImage, AnomalyError>;
}

/// Observer of detector transitions. The engine wiring registers one that
/// resets the retry epoch on clear; alert surfaces register another.
pub trait AnomalySink: Send + Sync {
    fn on_blocked(&self, reason: &BlockReason);
    fn on_clear(&self);
}

/// Default alert surface: structured warnings only.
pub struct TracingAlertSink;

impl AnomalySink for TracingAlertSink {
    fn on_blocked(&self, reason: &BlockReason) {
        warn!(%reason, "challenge detected, collection suspended");
    }

    fn on_clear(&self) {
        warn!("challenge cleared, collection resuming");
    }
}

/// Why the detector considers the surface blocked.
#[derive(Clone, Debug, PartialEq)]
pub enum BlockReason {
    TemplateMatch { template: String, score: f64 },
    DarkOverlay { mean_luma: f64, dark_ratio: f64 },
}

impl std::fmt::Display for BlockReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockReason::TemplateMatch { template, score } => {
                write!(f, "template '{template}' matched (score {score:.2})")
            }
            BlockReason::DarkOverlay {
                mean_luma,
                dark_ratio,
            } => write!(
                f,
                "dark overlay (mean luma {mean_luma:.1}, dark ratio {dark_ratio:.2})"
            ),
        }
    }
}

/// Detector tuning. Thresholds mirror the empirically-tuned values the
/// heuristics were calibrated with; all are configurable.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Sampling interval in milliseconds.
    pub interval_ms: u64,

    /// Samples skipped after (re)start to avoid boot-time false positives.
    pub warmup_frames: u32,

    /// Template similarity above which the surface counts as blocked.
    pub similarity_threshold: f64,

    /// Whether the brightness/dark-area heuristic runs when no template
    /// matches.
    pub use_mask_detection: bool,

    /// Mean luminance floor (0-255) below which a mask is assumed.
    pub brightness_floor: f64,

    /// Pixels darker than this count toward the dark ratio.
    pub dark_pixel_threshold: u8,

    /// Dark-pixel ratio above which a mask is assumed.
    pub dark_ratio_ceiling: f64,

    /// Consecutive positive samples required to enter Blocked.
    pub detections_to_block: u32,

    /// Consecutive negative samples required to return to Clear.
    pub clears_to_resume: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            warmup_frames: 3,
            similarity_threshold: 0.8,
            use_mask_detection: true,
            brightness_floor: 50.0,
            dark_pixel_threshold: 30,
            dark_ratio_ceiling: 0.7,
            detections_to_block: 1,
            clears_to_resume: 1,
        }
    }
}

/// Process-wide detector state, independent of the engine's own run flag.
#[derive(Debug, Default)]
pub struct CaptchaState {
    running: AtomicBool,
    detected: AtomicBool,
    consecutive_detections: AtomicU32,
    consecutive_clears: AtomicU32,
}

impl CaptchaState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
        if !running {
            self.detected.store(false, Ordering::SeqCst);
            self.consecutive_detections.store(0, Ordering::SeqCst);
            self.consecutive_clears.store(0, Ordering::SeqCst);
        }
    }

    pub fn is_detected(&self) -> bool {
        self.detected.load(Ordering::SeqCst)
    }

    pub fn set_detected(&self, detected: bool) {
        self.detected.store(detected, Ordering::SeqCst);
    }

    pub fn record_detection(&self) -> u32 {
        self.consecutive_clears.store(0, Ordering::SeqCst);
        self.consecutive_detections.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn record_clear(&self) -> u32 {
        self.consecutive_detections.store(0, Ordering::SeqCst);
        self.consecutive_clears.fetch_add(1, Ordering::SeqCst) + 1
    }
}

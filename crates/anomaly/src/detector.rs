//! The detector task

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info};

use shipharvest_run_state::ControlFlags;

use crate::errors::AnomalyError;
use crate::heuristics::{evaluate, Verdict};
use crate::models::{AnomalySink, CaptchaState, CapturePort, DetectorConfig};
use crate::templates::TemplateSet;

/// Samples the designated surface on its own schedule and flips the shared
/// `blocked` flag on state transitions. Runs independently of the engine's
/// lifecycle: starting/stopping the detector never starts or stops a run.
pub struct AnomalyDetector {
    config: DetectorConfig,
    templates: TemplateSet,
    capture: Arc<dyn CapturePort>,
    flags: Arc<ControlFlags>,
    state: Arc<CaptchaState>,
    sinks: Vec<Arc<dyn AnomalySink>>,
}

impl AnomalyDetector {
    pub fn new(
        config: DetectorConfig,
        templates: TemplateSet,
        capture: Arc<dyn CapturePort>,
        flags: Arc<ControlFlags>,
        state: Arc<CaptchaState>,
    ) -> Self {
        Self {
            config,
            templates,
            capture,
            flags,
            state,
            sinks: Vec::new(),
        }
    }

    /// Register a transition observer (alert surface, retry-epoch reset).
    pub fn add_sink(&mut self, sink: Arc<dyn AnomalySink>) {
        self.sinks.push(sink);
    }

    pub fn state(&self) -> Arc<CaptchaState> {
        Arc::clone(&self.state)
    }

    /// Spawn the detection loop. Fails when already running or when
    /// neither templates nor the mask heuristic could ever report a
    /// detection.
    pub fn start(self: Arc<Self>) -> Result<JoinHandle<()>, AnomalyError> {
        if self.state.is_running() {
            return Err(AnomalyError::AlreadyRunning);
        }
        if self.templates.is_empty() && !self.config.use_mask_detection {
            return Err(AnomalyError::NothingToDetect);
        }
        self.state.set_running(true);
        info!(
            interval_ms = self.config.interval_ms,
            templates = self.templates.len(),
            "challenge detection started"
        );

        let detector = Arc::clone(&self);
        Ok(tokio::spawn(async move {
            detector.run_loop().await;
        }))
    }

    /// Request the loop to finish after the current sample.
    pub fn stop(&self) {
        self.state.set_running(false);
        // A stopped detector must not leave the engine suspended.
        if self.flags.is_blocked() {
            self.flags.set_blocked(false);
        }
        info!("challenge detection stopped");
    }

    async fn run_loop(&self) {
        let mut ticker = interval(Duration::from_millis(self.config.interval_ms.max(50)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut frames_seen: u32 = 0;

        while self.state.is_running() {
            ticker.tick().await;
            if !self.state.is_running() {
                break;
            }

            let frame = match self.capture.capture().await {
                Ok(frame) => frame,
                Err(err) => {
                    debug!(error = %err, "surface capture failed, skipping sample");
                    continue;
                }
            };

            // Skip the first samples after (re)start: surfaces often come
            // up black or half-painted and would trip the mask heuristic.
            if frames_seen < self.config.warmup_frames {
                frames_seen += 1;
                continue;
            }

            let templates = self.templates.clone();
            let config = self.config.clone();
            let verdict =
                match tokio::task::spawn_blocking(move || evaluate(&frame, &templates, &config))
                    .await
                {
                    Ok(verdict) => verdict,
                    Err(err) => {
                        error!(error = %err, "frame evaluation task failed");
                        continue;
                    }
                };

            self.apply_verdict(verdict);
        }
    }

    fn apply_verdict(&self, verdict: Verdict) {
        match verdict {
            Verdict::Blocked(reason) => {
                let streak = self.state.record_detection();
                if !self.state.is_detected() && streak >= self.config.detections_to_block {
                    self.state.set_detected(true);
                    self.flags.set_blocked(true);
                    for sink in &self.sinks {
                        sink.on_blocked(&reason);
                    }
                }
            }
            Verdict::Clear => {
                let streak = self.state.record_clear();
                if self.state.is_detected() && streak >= self.config.clears_to_resume {
                    self.state.set_detected(false);
                    self.flags.set_blocked(false);
                    for sink in &self.sinks {
                        sink.on_clear();
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BlockReason;
    use async_trait::async_trait;
    use image::{DynamicImage, ImageBuffer, Rgba};
    use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};

    fn flat(value: u8) -> DynamicImage {
        DynamicImage::ImageRgba8(ImageBuffer::from_pixel(
            16,
            16,
            Rgba([value, value, value, 255]),
        ))
    }

    /// Capture source whose brightness can be flipped mid-test.
    struct SwitchableSurface {
        value: AtomicU8,
    }

    #[async_trait]
    impl CapturePort for SwitchableSurface {
        async fn capture(&self) -> Result<DynamicImage, AnomalyError> {
            Ok(flat(self.value.load(Ordering::SeqCst)))
        }
    }

    #[derive(Default)]
    struct CountingSink {
        blocked: AtomicU32,
        cleared: AtomicU32,
    }

    impl AnomalySink for CountingSink {
        fn on_blocked(&self, _reason: &BlockReason) {
            self.blocked.fetch_add(1, Ordering::SeqCst);
        }

        fn on_clear(&self) {
            self.cleared.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fast_config() -> DetectorConfig {
        DetectorConfig {
            interval_ms: 50,
            warmup_frames: 0,
            ..DetectorConfig::default()
        }
    }

    async fn wait_until(deadline_ms: u64, mut check: impl FnMut() -> bool) -> bool {
        let start = tokio::time::Instant::now();
        while start.elapsed() < Duration::from_millis(deadline_ms) {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn dark_surface_blocks_then_bright_clears() {
        let surface = Arc::new(SwitchableSurface {
            value: AtomicU8::new(200),
        });
        let flags = ControlFlags::new();
        let sink = Arc::new(CountingSink::default());

        let mut detector = AnomalyDetector::new(
            fast_config(),
            TemplateSet::new(),
            surface.clone(),
            flags.clone(),
            CaptchaState::new(),
        );
        detector.add_sink(sink.clone());
        let detector = Arc::new(detector);
        let handle = detector.clone().start().unwrap();

        // Bright: stays clear.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!flags.is_blocked());

        // Challenge overlay dims the surface.
        surface.value.store(5, Ordering::SeqCst);
        assert!(wait_until(2000, || flags.is_blocked()).await, "should block");
        assert_eq!(sink.blocked.load(Ordering::SeqCst), 1);

        // Overlay goes away.
        surface.value.store(200, Ordering::SeqCst);
        assert!(wait_until(2000, || !flags.is_blocked()).await, "should clear");
        assert_eq!(sink.cleared.load(Ordering::SeqCst), 1);

        detector.stop();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn warmup_frames_suppress_initial_dark_surface() {
        let surface = Arc::new(SwitchableSurface {
            value: AtomicU8::new(0),
        });
        let flags = ControlFlags::new();
        let config = DetectorConfig {
            interval_ms: 30,
            warmup_frames: 100,
            ..DetectorConfig::default()
        };
        let detector = Arc::new(AnomalyDetector::new(
            config,
            TemplateSet::new(),
            surface,
            flags.clone(),
            CaptchaState::new(),
        ));
        let handle = detector.clone().start().unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!flags.is_blocked(), "warmup frames must not trigger");

        detector.stop();
        let _ = handle.await;
    }

    #[tokio::test]
    async fn start_requires_some_detection_signal() {
        let surface = Arc::new(SwitchableSurface {
            value: AtomicU8::new(0),
        });
        let config = DetectorConfig {
            use_mask_detection: false,
            ..fast_config()
        };
        let detector = Arc::new(AnomalyDetector::new(
            config,
            TemplateSet::new(),
            surface,
            ControlFlags::new(),
            CaptchaState::new(),
        ));
        assert!(matches!(
            detector.start(),
            Err(AnomalyError::NothingToDetect)
        ));
    }

    #[tokio::test]
    async fn stop_unblocks_engine() {
        let flags = ControlFlags::new();
        flags.set_blocked(true);
        let detector = AnomalyDetector::new(
            fast_config(),
            TemplateSet::new(),
            Arc::new(SwitchableSurface {
                value: AtomicU8::new(0),
            }),
            flags.clone(),
            CaptchaState::new(),
        );
        detector.stop();
        assert!(!flags.is_blocked());
    }
}

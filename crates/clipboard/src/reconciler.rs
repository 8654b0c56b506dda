//! Waiting for the post-click clipboard update.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, info, warn};

use shipharvest_run_state::ControlFlags;

use crate::errors::ClipboardError;
use crate::ports::ClipboardPort;

/// Wait parameters for one capture.
#[derive(Clone, Copy, Debug)]
pub struct AwaitOptions {
    pub timeout: Duration,
    pub check_interval: Duration,
    pub min_length: usize,

    /// Content beyond this is presumed stray log/debug text.
    pub max_length: usize,
}

impl Default for AwaitOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(12),
            check_interval: Duration::from_millis(500),
            min_length: 10,
            max_length: 1000,
        }
    }
}

/// Owns the synchronous wait on the clipboard channel.
///
/// The run's initial clipboard snapshot is recorded once at start; any
/// content equal to it is leftover from before the run and never counts as
/// a capture.
pub struct ClipboardReconciler {
    port: Arc<dyn ClipboardPort>,
    flags: Arc<ControlFlags>,
    initial_snapshot: Mutex<String>,
}

impl ClipboardReconciler {
    pub fn new(port: Arc<dyn ClipboardPort>, flags: Arc<ControlFlags>) -> Self {
        Self {
            port,
            flags,
            initial_snapshot: Mutex::new(String::new()),
        }
    }

    /// Record whatever is on the clipboard before the run touches it.
    pub async fn record_initial_snapshot(&self) -> Result<(), ClipboardError> {
        let current = self.port.read().await?;
        debug!(length = current.chars().count(), "initial clipboard snapshot recorded");
        *self.initial_snapshot.lock() = current;
        Ok(())
    }

    pub fn initial_snapshot(&self) -> String {
        self.initial_snapshot.lock().clone()
    }

    /// Clear the channel, then poll until fresh plausible content arrives
    /// or the timeout passes. Returns `None` on timeout or when the run is
    /// stopped mid-wait.
    pub async fn await_update(
        &self,
        options: AwaitOptions,
    ) -> Result<Option<String>, ClipboardError> {
        let initial = self.initial_snapshot();

        self.port.write("").await?;
        sleep(Duration::from_millis(200)).await;

        let started = Instant::now();
        let mut last_content = String::new();

        while started.elapsed() < options.timeout {
            if self.flags.is_stop_requested() {
                info!("run stopped, abandoning clipboard wait");
                return Ok(None);
            }

            let current = self.port.read().await?;
            let current_len = current.chars().count();

            let is_initial = !current.is_empty() && current == initial;
            if is_initial {
                debug!("clipboard still holds pre-run content, waiting");
                sleep(options.check_interval).await;
                continue;
            }

            if current_len > options.max_length {
                warn!(
                    length = current_len,
                    "implausibly long clipboard content, waiting for real capture"
                );
                sleep(options.check_interval).await;
                continue;
            }

            if current != last_content && current_len >= options.min_length {
                info!(length = current_len, "fresh clipboard content captured");
                return Ok(Some(current));
            }

            last_content = current;
            sleep(options.check_interval).await;
        }

        // Timed out: the last observed content still counts if it grew to
        // a plausible capture and isn't pre-run leftover.
        let last_len = last_content.chars().count();
        if !last_content.is_empty() && last_content != initial && last_len >= options.min_length {
            warn!(length = last_len, "clipboard wait timed out, using last observed content");
            return Ok(Some(last_content));
        }
        warn!("clipboard wait timed out without usable content");
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::MemoryClipboard;

    fn options() -> AwaitOptions {
        AwaitOptions {
            timeout: Duration::from_millis(900),
            check_interval: Duration::from_millis(30),
            min_length: 5,
            max_length: 50,
        }
    }

    #[tokio::test]
    async fn captures_content_written_after_clear() {
        let clipboard = Arc::new(MemoryClipboard::new());
        let reconciler =
            ClipboardReconciler::new(clipboard.clone(), ControlFlags::new());
        reconciler.record_initial_snapshot().await.unwrap();

        let writer = clipboard.clone();
        let task = tokio::spawn(async move {
            sleep(Duration::from_millis(120)).await;
            writer.set("张三 13812345678 杭州市");
        });

        let captured = reconciler.await_update(options()).await.unwrap();
        assert_eq!(captured.as_deref(), Some("张三 13812345678 杭州市"));
        task.await.unwrap();
    }

    #[tokio::test]
    async fn pre_run_content_never_counts() {
        let clipboard = Arc::new(MemoryClipboard::new());
        clipboard.set("content from before the run started");
        let reconciler =
            ClipboardReconciler::new(clipboard.clone(), ControlFlags::new());
        reconciler.record_initial_snapshot().await.unwrap();

        // The page re-writes the stale content mid-wait.
        let writer = clipboard.clone();
        let task = tokio::spawn(async move {
            sleep(Duration::from_millis(100)).await;
            writer.set("content from before the run started");
        });

        let captured = reconciler.await_update(options()).await.unwrap();
        assert_eq!(captured, None);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn over_long_content_is_skipped() {
        let clipboard = Arc::new(MemoryClipboard::new());
        let reconciler =
            ClipboardReconciler::new(clipboard.clone(), ControlFlags::new());
        reconciler.record_initial_snapshot().await.unwrap();

        let writer = clipboard.clone();
        let task = tokio::spawn(async move {
            sleep(Duration::from_millis(80)).await;
            writer.set("x".repeat(200));
            sleep(Duration::from_millis(150)).await;
            writer.set("short real capture");
        });

        let captured = reconciler.await_update(options()).await.unwrap();
        assert_eq!(captured.as_deref(), Some("short real capture"));
        task.await.unwrap();
    }

    #[tokio::test]
    async fn stop_request_aborts_wait() {
        let clipboard = Arc::new(MemoryClipboard::new());
        let flags = ControlFlags::new();
        let reconciler = ClipboardReconciler::new(clipboard, flags.clone());
        reconciler.record_initial_snapshot().await.unwrap();

        let stopper = flags.clone();
        let task = tokio::spawn(async move {
            sleep(Duration::from_millis(80)).await;
            stopper.request_stop();
        });

        let started = Instant::now();
        let captured = reconciler.await_update(options()).await.unwrap();
        assert_eq!(captured, None);
        assert!(started.elapsed() < Duration::from_millis(800));
        task.await.unwrap();
    }

    #[tokio::test]
    async fn timeout_without_content_returns_none() {
        let clipboard = Arc::new(MemoryClipboard::new());
        let reconciler = ClipboardReconciler::new(clipboard, ControlFlags::new());
        reconciler.record_initial_snapshot().await.unwrap();
        let captured = reconciler.await_update(options()).await.unwrap();
        assert_eq!(captured, None);
    }
}

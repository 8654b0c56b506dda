//! Shared run coordination state.
//!
//! Every component that needs to observe pause/block/stop conditions gets a
//! reference to the same [`ControlFlags`] instance instead of reading ambient
//! globals. Suspension points check the flags explicitly; nothing is
//! preempted mid-operation.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::to_writer_pretty;
use shipharvest_core_types::{HarvestError, OrderId};

/// Cooperative run flags shared between the engine, the anomaly detector and
/// the clipboard monitor. All reads/writes are relaxed-free SeqCst; the flags
/// gate coarse suspension points, not data.
#[derive(Debug, Default)]
pub struct ControlFlags {
    paused: AtomicBool,
    blocked: AtomicBool,
    stop_requested: AtomicBool,
}

impl ControlFlags {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn set_blocked(&self, blocked: bool) {
        self.blocked.store(blocked, Ordering::SeqCst);
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::SeqCst)
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// A suspension point must wait while this holds (and stop was not
    /// requested).
    pub fn should_suspend(&self) -> bool {
        self.is_paused() || self.is_blocked()
    }

    /// Reset everything for a fresh run.
    pub fn reset(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.blocked.store(false, Ordering::SeqCst);
        self.stop_requested.store(false, Ordering::SeqCst);
    }
}

/// What happened during a run, recorded for diagnostics and the final report.
#[derive(Clone, Debug)]
pub enum RunEvent {
    FieldSucceeded {
        field: String,
        order_index: u32,
        attempts: u32,
    },
    FieldFailed {
        field: String,
        order_index: u32,
        attempts: u32,
        error: String,
    },
    OrderCommitted {
        order_id: Option<OrderId>,
        sequence_index: u32,
    },
    DuplicateOrder {
        order_id: OrderId,
        streak: u32,
    },
    Suspended {
        reason: SuspendReason,
    },
    Resumed,
    CaptureAssociated {
        order_id: OrderId,
        confidence: i32,
        needs_review: bool,
    },
    ScrollAdvanced {
        multiplier: f64,
    },
    RunStopped {
        reason: String,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspendReason {
    OperatorPause,
    AnomalyBlocked,
}

#[derive(Clone, Debug)]
pub struct RecordedEvent {
    pub event: RunEvent,
    pub recorded_at: DateTime<Utc>,
}

/// Aggregate counters over the recorded events.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RunStats {
    pub total_events: u64,
    pub fields_succeeded: u64,
    pub fields_failed: u64,
    pub orders_committed: u64,
    pub duplicates: u64,
    pub suspensions: u64,
    pub captures: u64,
    pub captures_needing_review: u64,
    pub scroll_advances: u64,
}

#[derive(Debug)]
struct BoundedRing<T> {
    capacity: usize,
    data: VecDeque<T>,
}

impl<T: Clone> BoundedRing<T> {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            data: VecDeque::new(),
        }
    }

    fn push(&mut self, item: T) {
        if self.data.len() == self.capacity {
            self.data.pop_front();
        }
        self.data.push_back(item);
    }

    fn snapshot(&self) -> Vec<T> {
        self.data.iter().cloned().collect()
    }
}

#[async_trait]
pub trait RunStateSink: Send + Sync {
    async fn append(&self, event: RunEvent) -> Result<(), HarvestError>;
}

/// In-memory ring buffer of recent run events plus aggregate stats.
pub struct InMemoryRunState {
    events: Mutex<BoundedRing<RecordedEvent>>,
    stats: Mutex<RunStats>,
}

impl InMemoryRunState {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(BoundedRing::new(capacity)),
            stats: Mutex::new(RunStats::default()),
        }
    }

    pub fn snapshot(&self) -> Vec<RecordedEvent> {
        self.events.lock().snapshot()
    }

    pub fn stats(&self) -> RunStats {
        self.stats.lock().clone()
    }

    pub fn write_snapshot<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let events = self.snapshot();
        let serialized: Vec<SerializableEvent> =
            events.iter().map(SerializableEvent::from).collect();
        let snapshot = RunStateSnapshot {
            stats: self.stats(),
            events: serialized,
        };
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        to_writer_pretty(&mut writer, &snapshot)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        writer.flush()?;
        Ok(())
    }

    fn update_stats(&self, event: &RunEvent) {
        let mut stats = self.stats.lock();
        stats.total_events = stats.total_events.saturating_add(1);
        match event {
            RunEvent::FieldSucceeded { .. } => {
                stats.fields_succeeded = stats.fields_succeeded.saturating_add(1)
            }
            RunEvent::FieldFailed { .. } => {
                stats.fields_failed = stats.fields_failed.saturating_add(1)
            }
            RunEvent::OrderCommitted { .. } => {
                stats.orders_committed = stats.orders_committed.saturating_add(1)
            }
            RunEvent::DuplicateOrder { .. } => {
                stats.duplicates = stats.duplicates.saturating_add(1)
            }
            RunEvent::Suspended { .. } => {
                stats.suspensions = stats.suspensions.saturating_add(1)
            }
            RunEvent::CaptureAssociated { needs_review, .. } => {
                stats.captures = stats.captures.saturating_add(1);
                if *needs_review {
                    stats.captures_needing_review =
                        stats.captures_needing_review.saturating_add(1);
                }
            }
            RunEvent::ScrollAdvanced { .. } => {
                stats.scroll_advances = stats.scroll_advances.saturating_add(1)
            }
            RunEvent::Resumed | RunEvent::RunStopped { .. } => {}
        }
    }
}

#[async_trait]
impl RunStateSink for InMemoryRunState {
    async fn append(&self, event: RunEvent) -> Result<(), HarvestError> {
        self.update_stats(&event);
        self.events.lock().push(RecordedEvent {
            event,
            recorded_at: Utc::now(),
        });
        Ok(())
    }
}

/// No-op sink for tests and benchmarks.
pub struct NoopRunState;

impl NoopRunState {
    pub fn new() -> Arc<dyn RunStateSink> {
        Arc::new(Self)
    }
}

#[async_trait]
impl RunStateSink for NoopRunState {
    async fn append(&self, _event: RunEvent) -> Result<(), HarvestError> {
        Ok(())
    }
}

#[derive(Serialize)]
struct RunStateSnapshot {
    stats: RunStats,
    events: Vec<SerializableEvent>,
}

#[derive(Serialize)]
struct SerializableEvent {
    kind: &'static str,
    field: Option<String>,
    order_id: Option<String>,
    order_index: Option<u32>,
    attempts: Option<u32>,
    streak: Option<u32>,
    confidence: Option<i32>,
    needs_review: Option<bool>,
    multiplier: Option<f64>,
    reason: Option<String>,
    error: Option<String>,
    recorded_at: DateTime<Utc>,
}

impl From<&RecordedEvent> for SerializableEvent {
    fn from(recorded: &RecordedEvent) -> Self {
        let mut out = SerializableEvent {
            kind: "",
            field: None,
            order_id: None,
            order_index: None,
            attempts: None,
            streak: None,
            confidence: None,
            needs_review: None,
            multiplier: None,
            reason: None,
            error: None,
            recorded_at: recorded.recorded_at,
        };
        match &recorded.event {
            RunEvent::FieldSucceeded {
                field,
                order_index,
                attempts,
            } => {
                out.kind = "field_succeeded";
                out.field = Some(field.clone());
                out.order_index = Some(*order_index);
                out.attempts = Some(*attempts);
            }
            RunEvent::FieldFailed {
                field,
                order_index,
                attempts,
                error,
            } => {
                out.kind = "field_failed";
                out.field = Some(field.clone());
                out.order_index = Some(*order_index);
                out.attempts = Some(*attempts);
                out.error = Some(error.clone());
            }
            RunEvent::OrderCommitted {
                order_id,
                sequence_index,
            } => {
                out.kind = "order_committed";
                out.order_id = order_id.as_ref().map(|id| id.0.clone());
                out.order_index = Some(*sequence_index);
            }
            RunEvent::DuplicateOrder { order_id, streak } => {
                out.kind = "duplicate_order";
                out.order_id = Some(order_id.0.clone());
                out.streak = Some(*streak);
            }
            RunEvent::Suspended { reason } => {
                out.kind = "suspended";
                out.reason = Some(format!("{reason:?}"));
            }
            RunEvent::Resumed => out.kind = "resumed",
            RunEvent::CaptureAssociated {
                order_id,
                confidence,
                needs_review,
            } => {
                out.kind = "capture_associated";
                out.order_id = Some(order_id.0.clone());
                out.confidence = Some(*confidence);
                out.needs_review = Some(*needs_review);
            }
            RunEvent::ScrollAdvanced { multiplier } => {
                out.kind = "scroll_advanced";
                out.multiplier = Some(*multiplier);
            }
            RunEvent::RunStopped { reason } => {
                out.kind = "run_stopped";
                out.reason = Some(reason.clone());
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn flags_roundtrip() {
        let flags = ControlFlags::new();
        assert!(!flags.should_suspend());

        flags.pause();
        assert!(flags.is_paused());
        assert!(flags.should_suspend());

        flags.set_blocked(true);
        flags.resume();
        assert!(flags.should_suspend(), "blocked alone still suspends");

        flags.set_blocked(false);
        assert!(!flags.should_suspend());

        flags.request_stop();
        assert!(flags.is_stop_requested());
        flags.reset();
        assert!(!flags.is_stop_requested());
    }

    #[tokio::test]
    async fn ring_is_bounded_and_stats_accumulate() {
        let state = InMemoryRunState::new(2);
        for i in 0..3 {
            state
                .append(RunEvent::FieldSucceeded {
                    field: "order_no".into(),
                    order_index: i,
                    attempts: 1,
                })
                .await
                .unwrap();
        }
        state
            .append(RunEvent::FieldFailed {
                field: "ship_info".into(),
                order_index: 3,
                attempts: 3,
                error: "element not found".into(),
            })
            .await
            .unwrap();

        assert_eq!(state.snapshot().len(), 2);
        let stats = state.stats();
        assert_eq!(stats.total_events, 4);
        assert_eq!(stats.fields_succeeded, 3);
        assert_eq!(stats.fields_failed, 1);
    }

    #[tokio::test]
    async fn snapshot_written_to_disk() {
        let state = InMemoryRunState::new(8);
        state
            .append(RunEvent::CaptureAssociated {
                order_id: OrderId::new("A-1"),
                confidence: 70,
                needs_review: false,
            })
            .await
            .unwrap();

        let file = NamedTempFile::new().expect("tempfile");
        state.write_snapshot(file.path()).expect("write snapshot");
        let written = std::fs::read_to_string(file.path()).expect("read snapshot");
        assert!(written.contains("\"total_events\""));
        assert!(written.contains("capture_associated"));
    }
}

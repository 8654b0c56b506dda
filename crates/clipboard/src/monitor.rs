//! Opportunistic clipboard monitoring.
//!
//! The synchronous wait in the reconciler can miss content that lands on
//! the clipboard outside its window. This background task records any
//! change it sees and offers it to the association store for whichever
//! order is currently being processed; the store's conflict rules keep the
//! better capture when both paths observed one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, info};

use shipharvest_core_types::OrderId;

use crate::ports::ClipboardPort;
use crate::store::AssociationStore;

/// Shared cell holding the order currently being processed. The engine
/// writes it; the monitor reads it.
#[derive(Default)]
pub struct CurrentOrderCell {
    inner: Mutex<Option<OrderId>>,
}

impl CurrentOrderCell {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, order_id: OrderId) {
        *self.inner.lock() = Some(order_id);
    }

    pub fn clear(&self) {
        *self.inner.lock() = None;
    }

    pub fn get(&self) -> Option<OrderId> {
        self.inner.lock().clone()
    }
}

/// Background watcher over the clipboard channel.
pub struct ClipboardMonitor {
    port: Arc<dyn ClipboardPort>,
    store: Arc<AssociationStore>,
    current_order: Arc<CurrentOrderCell>,
    active: AtomicBool,
    poll_interval: Duration,
    min_length: usize,
}

impl ClipboardMonitor {
    pub fn new(
        port: Arc<dyn ClipboardPort>,
        store: Arc<AssociationStore>,
        current_order: Arc<CurrentOrderCell>,
    ) -> Self {
        Self {
            port,
            store,
            current_order,
            active: AtomicBool::new(false),
            poll_interval: Duration::from_millis(500),
            min_length: 10,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Spawn the watcher. Returns `None` when already active.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self.active.swap(true, Ordering::SeqCst) {
            return None;
        }
        info!("clipboard monitor started");
        let monitor = Arc::clone(self);
        Some(tokio::spawn(async move {
            monitor.run().await;
        }))
    }

    pub fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
        info!("clipboard monitor stopped");
    }

    async fn run(&self) {
        let mut last_content = String::new();
        while self.is_active() {
            if let Ok(current) = self.port.read().await {
                if current != last_content && !current.trim().is_empty() {
                    last_content = current.clone();
                    let length = current.chars().count();
                    match self.current_order.get() {
                        Some(order_id) if length > self.min_length => {
                            debug!(
                                order_id = %order_id,
                                length,
                                "monitor observed clipboard change"
                            );
                            let _ = self.store.associate(&order_id, &current);
                        }
                        _ => {
                            debug!(length, "clipboard change without current order, ignored");
                        }
                    }
                }
            }
            sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::MemoryClipboard;
    use crate::score::ScoreLimits;

    #[tokio::test]
    async fn monitor_records_change_for_current_order() {
        let clipboard = Arc::new(MemoryClipboard::new());
        let store = Arc::new(AssociationStore::new(ScoreLimits::default()));
        let cell = CurrentOrderCell::new();
        cell.set(OrderId::new("A-9"));

        let monitor = Arc::new(
            ClipboardMonitor::new(clipboard.clone(), store.clone(), cell)
                .with_poll_interval(Duration::from_millis(20)),
        );
        let handle = monitor.start().expect("spawned");
        assert!(monitor.start().is_none(), "second start is a no-op");

        clipboard.set("张三\n13812345678\n浙江省杭州市余杭区");
        sleep(Duration::from_millis(120)).await;

        monitor.stop();
        let _ = handle.await;

        let stored = store.get(&OrderId::new("A-9")).expect("association recorded");
        assert!(stored.content.contains("杭州市"));
    }

    #[tokio::test]
    async fn no_current_order_means_no_association() {
        let clipboard = Arc::new(MemoryClipboard::new());
        let store = Arc::new(AssociationStore::new(ScoreLimits::default()));
        let monitor = Arc::new(
            ClipboardMonitor::new(clipboard.clone(), store.clone(), CurrentOrderCell::new())
                .with_poll_interval(Duration::from_millis(20)),
        );
        let handle = monitor.start().expect("spawned");

        clipboard.set("张三\n13812345678\n浙江省杭州市余杭区");
        sleep(Duration::from_millis(100)).await;

        monitor.stop();
        let _ = handle.await;
        assert!(store.is_empty());
    }
}

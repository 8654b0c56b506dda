//! Scripted in-memory adapters.
//!
//! A [`StubWorld`] stands in for the real page, pointer and clipboard so
//! the full loop can run headless: in tests, and in the CLI's dry-run
//! mode. Wire it to the real platform adapters for live collection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use shipharvest_clipboard::{
    AssociationStore, ClipboardReconciler, CurrentOrderCell, MemoryClipboard, ScoreLimits,
};
use shipharvest_coord_cache::{CoordinateCache, CoordinateValidity};
use shipharvest_core_types::HarvestError;
use shipharvest_locator::{
    DefaultElementResolver, ElementHandle, Locator, PagePort, Rect,
};
use shipharvest_retry::{RetryCoordinator, RetryPolicy};
use shipharvest_run_state::{ControlFlags, InMemoryRunState};

use crate::deps::EngineDeps;
use crate::ports::{CachedCoordinateSource, OperatorPort, PointerPort, ScrollTracker};

/// Scripted page: elements keyed by exact locator string, plus a text
/// index for the free-text strategy.
#[derive(Default)]
pub struct StubPage {
    elements: DashMap<String, ElementHandle>,
    texts: DashMap<String, ElementHandle>,
    css: DashMap<String, ElementHandle>,
    scroll_y: Mutex<f64>,
    url: Mutex<String>,
    page_text: Mutex<String>,
    fail_scroll: AtomicBool,
    scrolls: Mutex<Vec<(f64, f64)>>,
}

impl StubPage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_element(&self, locator: impl Into<String>, element: ElementHandle) {
        self.elements.insert(locator.into(), element);
    }

    pub fn remove_element(&self, locator: &str) {
        self.elements.remove(locator);
    }

    pub fn put_text(&self, needle: impl Into<String>, element: ElementHandle) {
        self.texts.insert(needle.into(), element);
    }

    pub fn put_css(&self, selector: impl Into<String>, element: ElementHandle) {
        self.css.insert(selector.into(), element);
    }

    pub fn set_url(&self, url: impl Into<String>) {
        *self.url.lock() = url.into();
    }

    pub fn set_page_text(&self, text: impl Into<String>) {
        *self.page_text.lock() = text.into();
    }

    /// Make every subsequent scroll fail, simulating a dead navigation
    /// path.
    pub fn fail_scrolls(&self) {
        self.fail_scroll.store(true, Ordering::SeqCst);
    }

    pub fn scrolls(&self) -> Vec<(f64, f64)> {
        self.scrolls.lock().clone()
    }
}

#[async_trait]
impl PagePort for StubPage {
    async fn find(&self, locator: &Locator) -> Result<Option<ElementHandle>, HarvestError> {
        Ok(self.elements.get(locator.as_str()).map(|e| e.clone()))
    }

    async fn find_css(&self, selector: &str) -> Result<Option<ElementHandle>, HarvestError> {
        Ok(self.css.get(selector).map(|e| e.clone()))
    }

    async fn find_by_text(&self, needle: &str) -> Result<Option<ElementHandle>, HarvestError> {
        Ok(self.texts.get(needle).map(|e| e.clone()))
    }

    async fn scroll_into_view(&self, _element: &ElementHandle) -> Result<(), HarvestError> {
        Ok(())
    }

    async fn scroll_by(&self, dx: f64, dy: f64) -> Result<(), HarvestError> {
        if self.fail_scroll.load(Ordering::SeqCst) {
            return Err(HarvestError::new("scroll failed"));
        }
        self.scrolls.lock().push((dx, dy));
        *self.scroll_y.lock() += dy;
        Ok(())
    }

    async fn key_scroll(&self) -> Result<(), HarvestError> {
        if self.fail_scroll.load(Ordering::SeqCst) {
            return Err(HarvestError::new("key scroll failed"));
        }
        *self.scroll_y.lock() += 400.0;
        Ok(())
    }

    async fn scroll_y(&self) -> Result<f64, HarvestError> {
        Ok(*self.scroll_y.lock())
    }

    async fn page_text(&self) -> Result<String, HarvestError> {
        Ok(self.page_text.lock().clone())
    }

    async fn current_url(&self) -> Result<String, HarvestError> {
        Ok(self.url.lock().clone())
    }

    async fn viewport(&self) -> Result<(f64, f64), HarvestError> {
        Ok((1280.0, 800.0))
    }
}

type ClickHook = Box<dyn Fn(i32, i32) + Send + Sync>;

/// Records every click; an optional hook lets scenarios react (e.g. write
/// the clipboard when the copy button is hit).
#[derive(Default)]
pub struct StubPointer {
    clicks: Mutex<Vec<(i32, i32)>>,
    hook: Mutex<Option<ClickHook>>,
}

impl StubPointer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_click(&self, hook: impl Fn(i32, i32) + Send + Sync + 'static) {
        *self.hook.lock() = Some(Box::new(hook));
    }

    pub fn clicks(&self) -> Vec<(i32, i32)> {
        self.clicks.lock().clone()
    }
}

#[async_trait]
impl PointerPort for StubPointer {
    async fn move_and_click(&self, x: i32, y: i32) -> Result<(), HarvestError> {
        self.clicks.lock().push((x, y));
        if let Some(hook) = self.hook.lock().as_ref() {
            hook(x, y);
        }
        Ok(())
    }

    async fn screen_size(&self) -> Result<(u32, u32), HarvestError> {
        Ok((1920, 1080))
    }
}

/// Operator that answers prompts from a preset value.
#[derive(Default)]
pub struct StubOperator {
    order_id: Mutex<Option<String>>,
}

impl StubOperator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer_with(&self, order_id: impl Into<String>) {
        *self.order_id.lock() = Some(order_id.into());
    }
}

#[async_trait]
impl OperatorPort for StubOperator {
    async fn request_order_id(&self, _context: &str) -> Result<Option<String>, HarvestError> {
        Ok(self.order_id.lock().clone())
    }
}

/// A complete scripted environment plus prewired engine collaborators.
pub struct StubWorld {
    pub page: Arc<StubPage>,
    pub pointer: Arc<StubPointer>,
    pub clipboard: Arc<MemoryClipboard>,
    pub operator: Arc<StubOperator>,
    pub flags: Arc<ControlFlags>,
    pub coord_cache: Arc<CoordinateCache>,
    pub associations: Arc<AssociationStore>,
    pub retry: Arc<RetryCoordinator>,
    pub run_state: Arc<InMemoryRunState>,
    pub scroll_tracker: Arc<ScrollTracker>,
    pub current_order: Arc<CurrentOrderCell>,
    pub reconciler: Arc<ClipboardReconciler>,
}

impl StubWorld {
    pub fn new() -> Self {
        Self::with_retry_policy(RetryPolicy {
            delay_ms: 10,
            ..RetryPolicy::default()
        })
    }

    pub fn with_retry_policy(policy: RetryPolicy) -> Self {
        let page = Arc::new(StubPage::new());
        let pointer = Arc::new(StubPointer::new());
        let clipboard = Arc::new(MemoryClipboard::new());
        let flags = ControlFlags::new();
        Self {
            page,
            pointer,
            clipboard: clipboard.clone(),
            operator: Arc::new(StubOperator::new()),
            flags: flags.clone(),
            coord_cache: Arc::new(CoordinateCache::in_memory(CoordinateValidity::default())),
            associations: Arc::new(AssociationStore::new(ScoreLimits::default())),
            retry: Arc::new(RetryCoordinator::new(policy)),
            run_state: Arc::new(InMemoryRunState::new(256)),
            scroll_tracker: ScrollTracker::new(),
            current_order: CurrentOrderCell::new(),
            reconciler: Arc::new(ClipboardReconciler::new(clipboard, flags)),
        }
    }

    /// Collaborator bundle for [`crate::CollectionEngine::new`].
    pub fn deps(&self) -> EngineDeps {
        let cached_source = Arc::new(CachedCoordinateSource::new(
            self.coord_cache.clone(),
            self.scroll_tracker.clone(),
        ));
        let resolver = Arc::new(DefaultElementResolver::new(
            self.page.clone(),
            Some(cached_source),
        ));
        EngineDeps {
            page: self.page.clone(),
            pointer: self.pointer.clone(),
            resolver,
            coord_cache: self.coord_cache.clone(),
            reconciler: self.reconciler.clone(),
            associations: self.associations.clone(),
            current_order: self.current_order.clone(),
            operator: self.operator.clone(),
            retry: self.retry.clone(),
            flags: self.flags.clone(),
            state_sink: self.run_state.clone(),
            scroll_tracker: self.scroll_tracker.clone(),
        }
    }

    /// Register one order's elements: the order-number span and the copy
    /// link, laid out down the page.
    pub fn put_order(&self, k: u32, order_no_locator: &str, copy_locator: &str, order_id: &str) {
        let y = 120.0 * f64::from(k);
        self.page.put_element(
            order_no_locator,
            ElementHandle::new(
                format!("order-no-{k}"),
                Rect::new(200.0, y, 220.0, 24.0),
                format!("订单编号：{order_id}"),
            ),
        );
        self.page.put_element(
            copy_locator,
            ElementHandle::new(
                format!("copy-{k}"),
                Rect::new(480.0, y, 60.0, 24.0),
                "复制",
            ),
        );
    }
}

impl Default for StubWorld {
    fn default() -> Self {
        Self::new()
    }
}

//! Single-field execution: ReadText, Click, ClickAndCapture.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use shipharvest_clipboard::{
    AssociationStore, AwaitOptions, ClipboardReconciler, CurrentOrderCell,
};
use shipharvest_coord_cache::CoordinateCache;
use shipharvest_core_types::{FieldAction, HarvestError, OperationSpec, OrderId};
use shipharvest_locator::{ElementResolver, Locatable, Locator, ResolveContext};
use shipharvest_run_state::{RunEvent, RunStateSink};

use crate::config::EngineConfig;
use crate::errors::FieldError;
use crate::ident;
use crate::ports::{OperatorPort, PointerPort, ScrollTracker};

/// Executes one operation against one generated locator.
pub struct FieldExecutor {
    page: Arc<dyn shipharvest_locator::PagePort>,
    pointer: Arc<dyn PointerPort>,
    resolver: Arc<dyn ElementResolver>,
    coord_cache: Arc<CoordinateCache>,
    reconciler: Arc<ClipboardReconciler>,
    associations: Arc<AssociationStore>,
    current_order: Arc<CurrentOrderCell>,
    operator: Arc<dyn OperatorPort>,
    state_sink: Arc<dyn RunStateSink>,
    scroll_tracker: Arc<ScrollTracker>,
    config: EngineConfig,

    /// Id parsed by the most recent ReadText over an order-id field; used
    /// by ClickAndCapture to label the capture.
    last_order_id: Mutex<Option<String>>,
}

impl FieldExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        page: Arc<dyn shipharvest_locator::PagePort>,
        pointer: Arc<dyn PointerPort>,
        resolver: Arc<dyn ElementResolver>,
        coord_cache: Arc<CoordinateCache>,
        reconciler: Arc<ClipboardReconciler>,
        associations: Arc<AssociationStore>,
        current_order: Arc<CurrentOrderCell>,
        operator: Arc<dyn OperatorPort>,
        state_sink: Arc<dyn RunStateSink>,
        scroll_tracker: Arc<ScrollTracker>,
        config: EngineConfig,
    ) -> Self {
        Self {
            page,
            pointer,
            resolver,
            coord_cache,
            reconciler,
            associations,
            current_order,
            operator,
            state_sink,
            scroll_tracker,
            config,
            last_order_id: Mutex::new(None),
        }
    }

    pub fn last_order_id(&self) -> Option<String> {
        self.last_order_id.lock().clone()
    }

    pub fn clear_last_order_id(&self) {
        *self.last_order_id.lock() = None;
    }

    /// Run one operation. `retry_episode` widens resolution to the cached
    /// coordinate fallback.
    pub async fn execute(
        &self,
        op: &OperationSpec,
        locator: &Locator,
        order_index: u32,
        retry_episode: bool,
    ) -> Result<Option<String>, FieldError> {
        let mut ctx = ResolveContext::new(op.name.clone());
        if retry_episode {
            ctx = ctx.in_retry();
        }
        let resolution = self.resolver.resolve(locator, &ctx).await?;

        match op.action {
            FieldAction::ReadText => self.read_text(op, resolution.locatable).await,
            FieldAction::Click => {
                self.click(op, resolution.locatable).await?;
                Ok(Some("true".to_string()))
            }
            FieldAction::ClickAndCapture => {
                self.click(op, resolution.locatable).await?;
                self.capture(op, order_index).await
            }
        }
    }

    async fn read_text(
        &self,
        op: &OperationSpec,
        locatable: Locatable,
    ) -> Result<Option<String>, FieldError> {
        let element = match locatable {
            Locatable::Element(element) => element,
            Locatable::CachedPoint { .. } => {
                return Err(FieldError::VirtualElementUnusable(op.name.clone()));
            }
        };
        let text = element.text.trim().to_string();
        debug!(field = op.name, text, "text read");

        if self.config.is_order_id_field(&op.name) {
            match ident::extract_token(&text) {
                Some(token) => {
                    info!(field = op.name, order_id = token, "order id captured");
                    *self.last_order_id.lock() = Some(token.clone());
                    self.current_order.set(OrderId::new(token.clone()));
                    // The bare token, not the labelled text, keeps the
                    // exported data consistent.
                    return Ok(Some(token));
                }
                None => {
                    warn!(field = op.name, "order id field text carried no token");
                    *self.last_order_id.lock() = None;
                }
            }
        }
        Ok(Some(text))
    }

    async fn click(&self, op: &OperationSpec, locatable: Locatable) -> Result<(), FieldError> {
        if self.config.pre_click_delay_ms > 0 {
            sleep(Duration::from_millis(self.config.pre_click_delay_ms)).await;
        }

        let offset = self.config.offset_for(&op.name);
        let (x, y) = match &locatable {
            Locatable::Element(element) => {
                self.page
                    .scroll_into_view(element)
                    .await
                    .map_err(|e| FieldError::Page(e.to_string()))?;
                let (cx, cy) = element.rect.center();
                (cx.round() as i32 + offset.x, cy.round() as i32 + offset.y)
            }
            Locatable::CachedPoint {
                screen_x, screen_y, ..
            } => (*screen_x + offset.x, *screen_y + offset.y),
        };
        let (x, y) = self.clamp_to_screen(x, y).await?;

        self.pointer
            .move_and_click(x, y)
            .await
            .map_err(|e: HarvestError| FieldError::Pointer(e.to_string()))?;
        debug!(field = op.name, x, y, "clicked");

        // One extra same-position click guards against the page eating the
        // first one; the designated copy trigger is exempt, a double
        // invocation would duplicate the clipboard write.
        if !self.config.is_capture_trigger(&op.name) {
            self.pointer
                .move_and_click(x, y)
                .await
                .map_err(|e: HarvestError| FieldError::Pointer(e.to_string()))?;
            debug!(field = op.name, "extra same-position click");
        }

        let scroll_y = self
            .page
            .scroll_y()
            .await
            .map_err(|e| FieldError::Page(e.to_string()))?;
        self.scroll_tracker.set(scroll_y);
        if let Err(err) = self
            .coord_cache
            .save(&op.name, x, y, offset.x, offset.y, scroll_y)
        {
            warn!(field = op.name, error = %err, "coordinate cache save failed");
        }
        Ok(())
    }

    async fn capture(
        &self,
        op: &OperationSpec,
        order_index: u32,
    ) -> Result<Option<String>, FieldError> {
        let options = AwaitOptions {
            timeout: Duration::from_millis(self.config.capture_timeout_ms),
            check_interval: Duration::from_millis(self.config.capture_poll_ms),
            min_length: self.config.capture_min_length,
            max_length: self.config.capture_max_length,
        };
        let content = self
            .reconciler
            .await_update(options)
            .await
            .map_err(|e| FieldError::Page(e.to_string()))?
            .ok_or(FieldError::CaptureTimeout)?;

        // Id recovery order: the field-parsed id, a sweep over the page
        // (URL, then visible text), and finally the operator.
        let mut order_id = self.last_order_id();
        if order_id.is_none() {
            order_id = ident::extract_from_page(self.page.as_ref()).await;
        }
        if order_id.is_none() {
            let context = format!(
                "order #{order_index}: automatic id extraction failed for '{}'",
                op.name
            );
            order_id = match self.operator.request_order_id(&context).await {
                Ok(id) => id.filter(|id| !id.trim().is_empty()),
                Err(err) => {
                    warn!(error = %err, "operator prompt failed");
                    None
                }
            };
        }

        match order_id {
            Some(id) => {
                let order_id = OrderId::new(id);
                let outcome = self.associations.associate(&order_id, &content);
                if outcome.accepted() {
                    if let Some(stored) = self.associations.get(&order_id) {
                        let _ = self
                            .state_sink
                            .append(RunEvent::CaptureAssociated {
                                order_id,
                                confidence: stored.confidence,
                                needs_review: stored.needs_review,
                            })
                            .await;
                    }
                }
            }
            None => {
                warn!(
                    field = op.name,
                    order_index, "no order id for capture, association skipped"
                );
            }
        }
        Ok(Some(content))
    }

    async fn clamp_to_screen(&self, x: i32, y: i32) -> Result<(i32, i32), FieldError> {
        let (width, height) = self
            .pointer
            .screen_size()
            .await
            .map_err(|e| FieldError::Pointer(e.to_string()))?;
        let clamped_x = x.clamp(0, width.saturating_sub(1) as i32);
        let clamped_y = y.clamp(0, height.saturating_sub(1) as i32);
        if (clamped_x, clamped_y) != (x, y) {
            warn!(x, y, clamped_x, clamped_y, "click position clamped to screen");
        }
        Ok((clamped_x, clamped_y))
    }
}

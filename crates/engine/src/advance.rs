//! Moving the page to the next order.
//!
//! Scroll first, then verify: the order id visible on the page changed, or
//! failing that, the second reference element became reachable. A small
//! nudge scroll doubles as a page-change probe when neither signal shows.

use std::sync::Arc;

use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use shipharvest_locator::{Locator, PagePort};
use shipharvest_run_state::ControlFlags;

use crate::config::EngineConfig;
use crate::errors::EngineError;
use crate::ident;
use crate::ports::PointerPort;

pub struct PageAdvancer {
    page: Arc<dyn PagePort>,
    pointer: Arc<dyn PointerPort>,
    flags: Arc<ControlFlags>,
    reference_locator: Locator,
    config: EngineConfig,
}

impl PageAdvancer {
    pub fn new(
        page: Arc<dyn PagePort>,
        pointer: Arc<dyn PointerPort>,
        flags: Arc<ControlFlags>,
        reference_locator: Locator,
        config: EngineConfig,
    ) -> Self {
        Self {
            page,
            pointer,
            flags,
            reference_locator,
            config,
        }
    }

    /// Scroll toward the next order. `multiplier` grows while duplicates
    /// pile up. Returns whether the page verifiably advanced; port
    /// failures on this path are fatal for the run.
    pub async fn scroll_to_next(&self, multiplier: f64) -> Result<bool, EngineError> {
        if self.flags.is_stop_requested() || self.flags.should_suspend() {
            return Ok(false);
        }

        let before_id = ident::extract_from_page(self.page.as_ref()).await;
        debug!(?before_id, multiplier, "advancing to next order");

        // Strategy 1: pixel scroll.
        self.page
            .scroll_by(0.0, self.config.scroll_base_amount * multiplier)
            .await
            .map_err(|e| EngineError::Navigation(e.to_string()))?;
        self.settle().await;
        if self.verify_advanced(&before_id).await? {
            return Ok(true);
        }

        // Strategy 2: keyboard scroll.
        self.page
            .key_scroll()
            .await
            .map_err(|e| EngineError::Navigation(e.to_string()))?;
        self.settle().await;
        if self.verify_advanced(&before_id).await? {
            return Ok(true);
        }

        // Last probe: a nudge that reveals whether the page is still
        // loading content.
        self.page
            .scroll_by(0.0, 50.0)
            .await
            .map_err(|e| EngineError::Navigation(e.to_string()))?;
        self.settle().await;
        if self.verify_advanced(&before_id).await? {
            info!("page advanced after nudge scroll");
            return Ok(true);
        }

        warn!("no scroll strategy verifiably advanced the page");
        Ok(false)
    }

    /// Click the configured pager control to load the next page of orders.
    pub async fn next_page(&self) -> Result<bool, EngineError> {
        let Some(pager) = &self.config.pager else {
            return Ok(false);
        };
        let locator = Locator::new(pager.next_page_locator.clone());
        let element = self
            .page
            .find(&locator)
            .await
            .map_err(|e| EngineError::Navigation(e.to_string()))?;
        match element {
            Some(element) => {
                self.page
                    .scroll_into_view(&element)
                    .await
                    .map_err(|e| EngineError::Navigation(e.to_string()))?;
                let (cx, cy) = element.rect.center();
                self.pointer
                    .move_and_click(cx.round() as i32, cy.round() as i32)
                    .await
                    .map_err(|e| EngineError::Navigation(e.to_string()))?;
                info!("pager control clicked, page turn requested");
                self.settle().await;
                Ok(true)
            }
            None => {
                warn!(locator = %locator, "pager control not found");
                Ok(false)
            }
        }
    }

    async fn verify_advanced(&self, before_id: &Option<String>) -> Result<bool, EngineError> {
        let after_id = ident::extract_from_page(self.page.as_ref()).await;
        if let (Some(before), Some(after)) = (before_id, &after_id) {
            if before != after {
                info!(before, after, "order id changed, advance verified");
                return Ok(true);
            }
        }
        // Secondary probe: the second reference element being reachable
        // means the next item is on screen even if the id didn't move.
        let reference = self
            .page
            .find(&self.reference_locator)
            .await
            .map_err(|e| EngineError::Navigation(e.to_string()))?;
        if reference.is_some() {
            debug!("second reference element reachable, advance assumed");
            return Ok(true);
        }
        Ok(false)
    }

    async fn settle(&self) {
        if self.config.advance_wait_ms > 0 {
            sleep(Duration::from_millis(self.config.advance_wait_ms)).await;
        }
    }
}

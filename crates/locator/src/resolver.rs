//! Element resolver with fallback chain orchestration

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::errors::LocatorError;
use crate::ports::{CachedPointSource, PagePort};
use crate::strategies::{
    CachedPointStrategy, ExactStrategy, RelaxedStrategy, Strategy, StructuralStrategy,
    TextStrategy,
};
use crate::types::{Locatable, Locator};

/// Per-call resolution context.
#[derive(Clone, Debug)]
pub struct ResolveContext {
    /// Display name of the field being resolved; used by the text strategy
    /// and as the cached-coordinate key.
    pub field_name: String,

    /// Whether the engine is currently inside a retry episode. Gates the
    /// cached-coordinate strategy.
    pub retry_episode: bool,
}

impl ResolveContext {
    pub fn new(field_name: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            retry_episode: false,
        }
    }

    pub fn in_retry(mut self) -> Self {
        self.retry_episode = true;
        self
    }
}

/// A successful resolution plus the strategy that produced it.
#[derive(Clone, Debug)]
pub struct Resolution {
    pub locatable: Locatable,
    pub strategy: &'static str,
}

/// Element resolver seam.
#[async_trait]
pub trait ElementResolver: Send + Sync {
    async fn resolve(
        &self,
        locator: &Locator,
        ctx: &ResolveContext,
    ) -> Result<Resolution, LocatorError>;
}

/// Default resolver running the full strategy chain in order.
pub struct DefaultElementResolver {
    strategies: Vec<Box<dyn Strategy>>,
}

impl DefaultElementResolver {
    /// Build the chain. Passing a cached-point source appends the virtual
    /// element fallback; without one the chain ends at the structural
    /// strategy.
    pub fn new(page: Arc<dyn PagePort>, cached: Option<Arc<dyn CachedPointSource>>) -> Self {
        let mut strategies: Vec<Box<dyn Strategy>> = vec![
            Box::new(ExactStrategy::new(page.clone())),
            Box::new(RelaxedStrategy::new(page.clone())),
            Box::new(TextStrategy::new(page.clone())),
            Box::new(StructuralStrategy::new(page)),
        ];
        if let Some(source) = cached {
            strategies.push(Box::new(CachedPointStrategy::new(source)));
        }
        Self { strategies }
    }
}

#[async_trait]
impl ElementResolver for DefaultElementResolver {
    async fn resolve(
        &self,
        locator: &Locator,
        ctx: &ResolveContext,
    ) -> Result<Resolution, LocatorError> {
        for strategy in &self.strategies {
            debug!(
                field = ctx.field_name,
                strategy = strategy.name(),
                "trying resolution strategy"
            );
            match strategy.resolve(locator, ctx).await {
                Ok(Some(locatable)) => {
                    info!(
                        field = ctx.field_name,
                        strategy = strategy.name(),
                        virtual_element = locatable.is_cached_point(),
                        "element resolved"
                    );
                    return Ok(Resolution {
                        locatable,
                        strategy: strategy.name(),
                    });
                }
                Ok(None) => {
                    debug!(
                        field = ctx.field_name,
                        strategy = strategy.name(),
                        "strategy produced no candidate"
                    );
                }
                Err(err) => {
                    warn!(
                        field = ctx.field_name,
                        strategy = strategy.name(),
                        error = %err,
                        "strategy failed"
                    );
                }
            }
        }

        Err(LocatorError::ElementNotFound(format!(
            "all strategies exhausted for '{}' ({})",
            ctx.field_name,
            locator.as_str()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ElementHandle, Rect};
    use scripted::SimplePage;

    // Minimal scripted page for resolver tests; the full-featured stub
    // lives with the engine crate.
    mod scripted {
        use super::*;
        use shipharvest_core_types::HarvestError;
        use std::collections::HashMap;
        use std::sync::Mutex;

        #[derive(Default)]
        pub struct SimplePage {
            pub by_locator: Mutex<HashMap<String, ElementHandle>>,
            pub by_text: Mutex<HashMap<String, ElementHandle>>,
        }

        #[async_trait]
        impl PagePort for SimplePage {
            async fn find(
                &self,
                locator: &Locator,
            ) -> Result<Option<ElementHandle>, HarvestError> {
                Ok(self.by_locator.lock().unwrap().get(locator.as_str()).cloned())
            }

            async fn find_css(
                &self,
                _selector: &str,
            ) -> Result<Option<ElementHandle>, HarvestError> {
                Ok(None)
            }

            async fn find_by_text(
                &self,
                needle: &str,
            ) -> Result<Option<ElementHandle>, HarvestError> {
                Ok(self.by_text.lock().unwrap().get(needle).cloned())
            }

            async fn scroll_into_view(&self, _el: &ElementHandle) -> Result<(), HarvestError> {
                Ok(())
            }

            async fn scroll_by(&self, _dx: f64, _dy: f64) -> Result<(), HarvestError> {
                Ok(())
            }

            async fn key_scroll(&self) -> Result<(), HarvestError> {
                Ok(())
            }

            async fn scroll_y(&self) -> Result<f64, HarvestError> {
                Ok(0.0)
            }

            async fn page_text(&self) -> Result<String, HarvestError> {
                Ok(String::new())
            }

            async fn current_url(&self) -> Result<String, HarvestError> {
                Ok("about:blank".into())
            }

            async fn viewport(&self) -> Result<(f64, f64), HarvestError> {
                Ok((1280.0, 800.0))
            }
        }
    }

    struct FixedPoint;

    impl CachedPointSource for FixedPoint {
        fn lookup(&self, field: &str) -> Option<(i32, i32)> {
            (field == "ship_info").then_some((640, 410))
        }
    }

    fn element(text: &str) -> ElementHandle {
        ElementHandle::new("n1", Rect::new(200.0, 300.0, 80.0, 24.0), text)
    }

    #[tokio::test]
    async fn exact_match_wins_first() {
        let page = Arc::new(SimplePage::default());
        page.by_locator
            .lock()
            .unwrap()
            .insert("//div[1]/span[2]".into(), element("A-1"));
        let resolver = DefaultElementResolver::new(page, None);

        let res = resolver
            .resolve(
                &Locator::new("//div[1]/span[2]"),
                &ResolveContext::new("order_no"),
            )
            .await
            .unwrap();
        assert_eq!(res.strategy, "exact");
    }

    #[tokio::test]
    async fn text_fallback_after_exact_miss() {
        let page = Arc::new(SimplePage::default());
        page.by_text
            .lock()
            .unwrap()
            .insert("order_no".into(), element("A-2"));
        let resolver = DefaultElementResolver::new(page, None);

        let res = resolver
            .resolve(
                &Locator::new("/html/body/div[9]/span[1]"),
                &ResolveContext::new("order_no"),
            )
            .await
            .unwrap();
        assert_eq!(res.strategy, "text");
    }

    #[tokio::test]
    async fn cached_point_only_in_retry_episode() {
        let page = Arc::new(SimplePage::default());
        let resolver = DefaultElementResolver::new(page, Some(Arc::new(FixedPoint)));
        let locator = Locator::new("/html/body/div[9]/a[1]");

        let first = resolver
            .resolve(&locator, &ResolveContext::new("ship_info"))
            .await;
        assert!(first.is_err(), "no virtual element on first attempt");

        let retry = resolver
            .resolve(&locator, &ResolveContext::new("ship_info").in_retry())
            .await
            .unwrap();
        assert_eq!(retry.strategy, "cached-point");
        assert!(retry.locatable.is_cached_point());
    }
}

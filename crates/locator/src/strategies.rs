//! Element resolution strategies, tried in fallback order:
//! exact locator → relaxed locator → free text → structural selector →
//! cached coordinate (retry episodes only).

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::errors::LocatorError;
use crate::ports::{CachedPointSource, PagePort};
use crate::resolver::ResolveContext;
use crate::types::{Locatable, Locator};

static TAG_INDEX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([a-zA-Z][\w-]*)(?:\[(\d+)\])?$").expect("tag regex"));

/// One resolution attempt in the fallback chain.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn resolve(
        &self,
        locator: &Locator,
        ctx: &ResolveContext,
    ) -> Result<Option<Locatable>, LocatorError>;
}

/// Resolve the exact generated locator.
pub struct ExactStrategy {
    page: Arc<dyn PagePort>,
}

impl ExactStrategy {
    pub fn new(page: Arc<dyn PagePort>) -> Self {
        Self { page }
    }
}

#[async_trait]
impl Strategy for ExactStrategy {
    fn name(&self) -> &'static str {
        "exact"
    }

    async fn resolve(
        &self,
        locator: &Locator,
        _ctx: &ResolveContext,
    ) -> Result<Option<Locatable>, LocatorError> {
        if locator.is_empty() {
            return Err(LocatorError::InvalidLocator("empty locator".into()));
        }
        let found = self
            .page
            .find(locator)
            .await
            .map_err(|e| LocatorError::Page(e.to_string()))?;
        Ok(found.map(Locatable::Element))
    }
}

/// Resolve a relaxed variant of the locator: drop the absolute prefix and
/// keep the identifying tail, so layout shifts above the target don't break
/// the lookup.
pub struct RelaxedStrategy {
    page: Arc<dyn PagePort>,
}

impl RelaxedStrategy {
    pub fn new(page: Arc<dyn PagePort>) -> Self {
        Self { page }
    }

    /// Tail of the locator re-rooted as a floating path ("//a/b"). Locators
    /// too short to have a meaningful tail yield nothing.
    pub fn relax(locator: &Locator) -> Option<Locator> {
        let parts: Vec<&str> = locator
            .segments()
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect();
        if parts.len() <= 2 {
            return None;
        }
        let tail = &parts[parts.len() - 2..];
        Some(Locator::new(format!("//{}", tail.join("/"))))
    }
}

#[async_trait]
impl Strategy for RelaxedStrategy {
    fn name(&self) -> &'static str {
        "relaxed"
    }

    async fn resolve(
        &self,
        locator: &Locator,
        _ctx: &ResolveContext,
    ) -> Result<Option<Locatable>, LocatorError> {
        let Some(relaxed) = Self::relax(locator) else {
            return Ok(None);
        };
        debug!(relaxed = relaxed.as_str(), "trying relaxed locator");
        let found = self
            .page
            .find(&relaxed)
            .await
            .map_err(|e| LocatorError::Page(e.to_string()))?;
        // Elements found hugging the page origin are usually the wrong
        // node picked up by the loosened path.
        let plausible = found.filter(|el| {
            el.rect.is_plausible() && !(el.rect.x < 100.0 && el.rect.y < 100.0)
        });
        Ok(plausible.map(Locatable::Element))
    }
}

/// Free-text search over visible nodes using the field's display name.
pub struct TextStrategy {
    page: Arc<dyn PagePort>,
}

impl TextStrategy {
    pub fn new(page: Arc<dyn PagePort>) -> Self {
        Self { page }
    }
}

#[async_trait]
impl Strategy for TextStrategy {
    fn name(&self) -> &'static str {
        "text"
    }

    async fn resolve(
        &self,
        _locator: &Locator,
        ctx: &ResolveContext,
    ) -> Result<Option<Locatable>, LocatorError> {
        if ctx.field_name.trim().is_empty() {
            return Ok(None);
        }
        let found = self
            .page
            .find_by_text(&ctx.field_name)
            .await
            .map_err(|e| LocatorError::Page(e.to_string()))?;
        Ok(found.map(Locatable::Element))
    }
}

/// Structural-selector equivalent of the locator.
pub struct StructuralStrategy {
    page: Arc<dyn PagePort>,
}

impl StructuralStrategy {
    pub fn new(page: Arc<dyn PagePort>) -> Self {
        Self { page }
    }

    /// Best-effort conversion of a plain indexed path to a CSS selector.
    /// Paths using predicates other than integer indices are not
    /// convertible.
    pub fn to_css(locator: &Locator) -> Option<String> {
        let mut css_parts = Vec::new();
        for part in locator.segments() {
            if part.is_empty() || part == "html" {
                continue;
            }
            let caps = TAG_INDEX_RE.captures(part)?;
            let tag = caps.get(1)?.as_str().to_ascii_lowercase();
            match caps.get(2) {
                Some(index) => css_parts.push(format!("{tag}:nth-of-type({})", index.as_str())),
                None => css_parts.push(tag),
            }
        }
        if css_parts.is_empty() {
            None
        } else {
            Some(css_parts.join(" > "))
        }
    }
}

#[async_trait]
impl Strategy for StructuralStrategy {
    fn name(&self) -> &'static str {
        "structural"
    }

    async fn resolve(
        &self,
        locator: &Locator,
        _ctx: &ResolveContext,
    ) -> Result<Option<Locatable>, LocatorError> {
        let Some(selector) = Self::to_css(locator) else {
            return Ok(None);
        };
        debug!(selector, "trying structural selector");
        let found = self
            .page
            .find_css(&selector)
            .await
            .map_err(|e| LocatorError::Page(e.to_string()))?;
        Ok(found.map(Locatable::Element))
    }
}

/// Last resort: a virtual element backed by a cached screen coordinate.
/// Only consulted while a retry episode is active, so genuine structural
/// failures on the first attempt stay visible.
pub struct CachedPointStrategy {
    source: Arc<dyn CachedPointSource>,
}

impl CachedPointStrategy {
    pub fn new(source: Arc<dyn CachedPointSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl Strategy for CachedPointStrategy {
    fn name(&self) -> &'static str {
        "cached-point"
    }

    async fn resolve(
        &self,
        _locator: &Locator,
        ctx: &ResolveContext,
    ) -> Result<Option<Locatable>, LocatorError> {
        if !ctx.retry_episode {
            return Ok(None);
        }
        match self.source.lookup(&ctx.field_name) {
            Some((screen_x, screen_y)) => {
                debug!(
                    field = ctx.field_name,
                    screen_x, screen_y, "using cached coordinate as virtual element"
                );
                Ok(Some(Locatable::CachedPoint {
                    field: ctx.field_name.clone(),
                    screen_x,
                    screen_y,
                }))
            }
            None => Ok(None),
        }
    }
}

//! Capability ports the resolver depends on.
//!
//! The core never assumes a specific browser or OS; adapters implement
//! these traits against whatever drives the real page.

use async_trait::async_trait;
use shipharvest_core_types::HarvestError;

use crate::types::{ElementHandle, Locator};

/// Read-level access to the target page.
#[async_trait]
pub trait PagePort: Send + Sync {
    /// Resolve a structural locator to an element, if present.
    async fn find(&self, locator: &Locator) -> Result<Option<ElementHandle>, HarvestError>;

    /// Resolve a structural (CSS-equivalent) selector.
    async fn find_css(&self, selector: &str) -> Result<Option<ElementHandle>, HarvestError>;

    /// Free-text search over visible nodes; implementations should prefer
    /// the match whose text length is closest to the needle.
    async fn find_by_text(&self, needle: &str) -> Result<Option<ElementHandle>, HarvestError>;

    /// Bring an element into the viewport.
    async fn scroll_into_view(&self, element: &ElementHandle) -> Result<(), HarvestError>;

    /// Scroll the page by a pixel delta.
    async fn scroll_by(&self, dx: f64, dy: f64) -> Result<(), HarvestError>;

    /// Issue a keyboard page-advance (PageDown-equivalent) scroll.
    async fn key_scroll(&self) -> Result<(), HarvestError>;

    /// Current vertical scroll offset.
    async fn scroll_y(&self) -> Result<f64, HarvestError>;

    /// Full visible text of the page, for last-resort token sweeps.
    async fn page_text(&self) -> Result<String, HarvestError>;

    /// Current page URL.
    async fn current_url(&self) -> Result<String, HarvestError>;

    /// Viewport size in CSS pixels.
    async fn viewport(&self) -> Result<(f64, f64), HarvestError>;
}

/// Last-resort source of previously-successful screen coordinates.
///
/// Implemented over the coordinate cache by the engine wiring; the lookup
/// already applies validity rules and scroll compensation.
pub trait CachedPointSource: Send + Sync {
    fn lookup(&self, field: &str) -> Option<(i32, i32)>;
}

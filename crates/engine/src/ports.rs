//! Engine-side capability ports

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use shipharvest_coord_cache::CoordinateCache;
use shipharvest_core_types::HarvestError;
use shipharvest_locator::CachedPointSource;

/// The virtual pointer over the target surface. Exclusively owned by the
/// engine's task while a field executes; no other thread moves it.
#[async_trait]
pub trait PointerPort: Send + Sync {
    async fn move_and_click(&self, x: i32, y: i32) -> Result<(), HarvestError>;

    /// Surface size, for clamping computed positions.
    async fn screen_size(&self) -> Result<(u32, u32), HarvestError>;
}

/// Operator-facing prompts the loop occasionally needs.
#[async_trait]
pub trait OperatorPort: Send + Sync {
    /// Ask the operator for the current order id when automatic
    /// extraction failed. `None` means the operator declined.
    async fn request_order_id(&self, context: &str) -> Result<Option<String>, HarvestError>;
}

/// Last vertical scroll position the engine observed, shared with the
/// resolver's cached-coordinate fallback so reused points compensate for
/// scrolling since they were saved.
#[derive(Debug, Default)]
pub struct ScrollTracker {
    bits: AtomicU64,
}

impl ScrollTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, scroll_y: f64) {
        self.bits.store(scroll_y.to_bits(), Ordering::SeqCst);
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

/// Bridges the coordinate cache into the resolver's fallback chain.
pub struct CachedCoordinateSource {
    cache: Arc<CoordinateCache>,
    scroll: Arc<ScrollTracker>,
}

impl CachedCoordinateSource {
    pub fn new(cache: Arc<CoordinateCache>, scroll: Arc<ScrollTracker>) -> Self {
        Self { cache, scroll }
    }
}

impl CachedPointSource for CachedCoordinateSource {
    fn lookup(&self, field: &str) -> Option<(i32, i32)> {
        self.cache.adjusted_point(field, self.scroll.get())
    }
}

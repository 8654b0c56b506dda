//! Engine collaborator bundle

use std::sync::Arc;

use shipharvest_clipboard::{AssociationStore, ClipboardReconciler, CurrentOrderCell};
use shipharvest_coord_cache::CoordinateCache;
use shipharvest_locator::{ElementResolver, PagePort};
use shipharvest_retry::RetryCoordinator;
use shipharvest_run_state::{ControlFlags, RunStateSink};

use crate::ports::{OperatorPort, PointerPort, ScrollTracker};

/// Everything the engine collaborates with, injected as ports so each
/// piece is independently testable and swappable.
pub struct EngineDeps {
    pub page: Arc<dyn PagePort>,
    pub pointer: Arc<dyn PointerPort>,
    pub resolver: Arc<dyn ElementResolver>,
    pub coord_cache: Arc<CoordinateCache>,
    pub reconciler: Arc<ClipboardReconciler>,
    pub associations: Arc<AssociationStore>,
    pub current_order: Arc<CurrentOrderCell>,
    pub operator: Arc<dyn OperatorPort>,
    pub retry: Arc<RetryCoordinator>,
    pub flags: Arc<ControlFlags>,
    pub state_sink: Arc<dyn RunStateSink>,
    pub scroll_tracker: Arc<ScrollTracker>,
}

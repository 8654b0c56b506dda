//! Component wiring and the operations behind the CLI commands.

use std::sync::Arc;

use anyhow::{bail, Context};
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

use shipharvest_anomaly::{AnomalySink, BlockReason};
use shipharvest_clipboard::{AssociationStore, ClipboardMonitor, ScoreLimits};
use shipharvest_core_types::{FieldAction, OperationSpec, OrderId};
use shipharvest_engine::report::RunReport;
use shipharvest_engine::stub::StubWorld;
use shipharvest_engine::{CollectionEngine, EngineConfig};
use shipharvest_locator::{Locator, LocatorPattern, PatternLearner};
use shipharvest_retry::RetryCoordinator;

use crate::config::HarvestConfig;

/// Detector sink that starts a fresh retry epoch whenever the challenge
/// clears.
pub struct EpochResetSink {
    retry: Arc<RetryCoordinator>,
}

impl EpochResetSink {
    pub fn new(retry: Arc<RetryCoordinator>) -> Self {
        Self { retry }
    }
}

impl AnomalySink for EpochResetSink {
    fn on_blocked(&self, _reason: &BlockReason) {}

    fn on_clear(&self) {
        self.retry.reset_epoch();
    }
}

/// One field's generated locators for the first orders, for inspection.
pub struct FieldPlan {
    pub field: String,
    pub pattern: LocatorPattern,
    pub locators: Vec<String>,
}

/// Learn the per-field patterns from the configured references and expand
/// them for the first `orders` items, without touching any page.
pub fn plan(config: &HarvestConfig, orders: u32) -> anyhow::Result<Vec<FieldPlan>> {
    if config.reference_second.is_empty() {
        bail!("no second reference locator configured; set `reference_second`");
    }
    let learner = PatternLearner::new(Locator::new(config.reference_second.clone()));

    let mut plans = Vec::new();
    for op in config.enabled_operations() {
        if op.is_order_count_source {
            continue;
        }
        let base = Locator::new(op.locator.clone());
        let pattern = learner
            .learn_for(&base)
            .or_else(|_| LocatorPattern::from_single(&base))
            .with_context(|| format!("no pattern derivable for field '{}'", op.name))?;
        let locators = (1..=orders)
            .map(|k| pattern.generate(&base, k).as_str().to_string())
            .collect();
        plans.push(FieldPlan {
            field: op.name.clone(),
            pattern,
            locators,
        });
    }
    if plans.is_empty() {
        bail!("no enabled looping operations configured");
    }
    Ok(plans)
}

/// Run the full collection loop against a scripted in-memory page. This
/// exercises every moving part except the platform adapters: pattern
/// learning, field execution, clipboard reconciliation, duplicate
/// detection and the report.
pub async fn dry_run(orders: u32) -> anyhow::Result<RunReport> {
    let world = StubWorld::new();
    for k in 1..=orders {
        world.put_order(
            k,
            &format!("//div[3]/div[{k}]/span[1]"),
            &format!("//div[3]/div[{k}]/a[1]"),
            &format!("D-{:04}", 1000 + k),
        );
    }

    let clipboard = world.clipboard.clone();
    world.pointer.on_click(move |_x, y| {
        let k = ((y - 12) / 120) as u32;
        if k >= 1 {
            let clipboard = clipboard.clone();
            tokio::spawn(async move {
                sleep(Duration::from_millis(40)).await;
                clipboard.set(format!(
                    "演示收件人{k}\n1380000{:04}\n浙江省杭州市余杭区演示路{k}号",
                    1000 + k
                ));
            });
        }
    });

    let ops = vec![
        OperationSpec::new("订单编号", "//div[3]/div[1]/span[1]", FieldAction::ReadText)
            .with_order(1),
        OperationSpec::new(
            "copy_ship_info",
            "//div[3]/div[1]/a[1]",
            FieldAction::ClickAndCapture,
        )
        .with_order(2),
    ];
    let config = EngineConfig {
        capture_trigger_field: Some("copy_ship_info".to_string()),
        ..EngineConfig::fast()
    };
    let engine = CollectionEngine::new(
        ops,
        Locator::new("//div[3]/div[2]/span[1]"),
        config,
        world.deps(),
    );

    // The opportunistic monitor runs on its own schedule beside the
    // engine, catching captures the synchronous wait might miss.
    let monitor = Arc::new(
        ClipboardMonitor::new(
            world.clipboard.clone(),
            world.associations.clone(),
            world.current_order.clone(),
        )
        .with_poll_interval(Duration::from_millis(100)),
    );
    let monitor_handle = monitor.start();

    info!(orders, "dry run starting against scripted page");
    let report = engine.run(Some(orders)).await;

    monitor.stop();
    if let Some(handle) = monitor_handle {
        let _ = handle.await;
    }
    Ok(report?)
}

/// Open the association snapshot for the review workflow.
pub fn open_association_store(config: &HarvestConfig) -> anyhow::Result<Arc<AssociationStore>> {
    let store = Arc::new(AssociationStore::with_snapshot(
        config.score_limits,
        &config.paths.association_snapshot_file,
    ));
    let loaded = store.load()?;
    if loaded == 0 {
        warn!(
            path = %config.paths.association_snapshot_file.display(),
            "association snapshot empty or missing"
        );
    }
    Ok(store)
}

/// Apply one review action. Returns a human-readable result line.
pub fn review_action(
    store: &AssociationStore,
    order_id: &str,
    approve: bool,
    edit: Option<&str>,
    delete: bool,
) -> anyhow::Result<String> {
    let id = OrderId::new(order_id);
    if delete {
        if store.remove(&id) {
            return Ok(format!("association for {order_id} deleted"));
        }
        bail!("no association for {order_id}");
    }
    if let Some(content) = edit {
        if store.edit(&id, content) {
            return Ok(format!("association for {order_id} updated"));
        }
        bail!("no association for {order_id}");
    }
    if approve {
        if store.approve(&id) {
            return Ok(format!("association for {order_id} approved"));
        }
        bail!("no association for {order_id}");
    }
    bail!("no review action given; use --approve, --edit or --delete");
}

/// Score a candidate text the way the reconciler would.
pub fn score_text(text: &str, limits: ScoreLimits) -> shipharvest_clipboard::ContentScore {
    shipharvest_clipboard::score(text, &limits)
}

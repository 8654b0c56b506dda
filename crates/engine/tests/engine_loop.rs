//! End-to-end loop behavior against the scripted world.

use std::sync::Arc;

use tokio::time::{sleep, Duration};

use shipharvest_core_types::{FieldAction, OperationSpec};
use shipharvest_engine::report::StopReason;
use shipharvest_engine::stub::StubWorld;
use shipharvest_engine::{CollectionEngine, EngineConfig, EngineError, EngineState};
use shipharvest_locator::{ElementHandle, Locator, Rect};

const REF2: &str = "//div[3]/div[2]/span[1]";

fn order_no_locator(k: u32) -> String {
    format!("//div[3]/div[{k}]/span[1]")
}

fn copy_locator(k: u32) -> String {
    format!("//div[3]/div[{k}]/a[1]")
}

fn shipping_content(k: u32) -> String {
    format!("收件人{k}\n1381234567{k}\n浙江省杭州市余杭区文一西路{k}号")
}

/// Copy-button clicks land at y = 120k + 12; recover k from the click.
fn order_of_click(y: i32) -> u32 {
    ((y - 12) / 120) as u32
}

fn engine_with(world: &StubWorld, ops: Vec<OperationSpec>, config: EngineConfig) -> CollectionEngine {
    CollectionEngine::new(ops, Locator::new(REF2), config, world.deps())
}

#[tokio::test]
async fn full_run_collects_ids_and_captures() {
    let world = StubWorld::new();
    for k in 1..=3 {
        world.put_order(k, &order_no_locator(k), &copy_locator(k), &format!("A-100{k}"));
    }
    world.page.put_element(
        "//span[9]",
        ElementHandle::new("count", Rect::new(40.0, 20.0, 80.0, 20.0), "待发货 3 单"),
    );

    // The page writes the clipboard shortly after the copy button is hit.
    let clipboard = world.clipboard.clone();
    world.pointer.on_click(move |_x, y| {
        let k = order_of_click(y);
        if k >= 1 && k <= 3 {
            let clipboard = clipboard.clone();
            tokio::spawn(async move {
                sleep(Duration::from_millis(50)).await;
                clipboard.set(shipping_content(k));
            });
        }
    });

    let ops = vec![
        OperationSpec::new("pending_count", "//span[9]", FieldAction::ReadText)
            .as_order_count_source(),
        OperationSpec::new("订单编号", order_no_locator(1), FieldAction::ReadText).with_order(1),
        OperationSpec::new("copy_ship_info", copy_locator(1), FieldAction::ClickAndCapture)
            .with_order(2),
    ];
    let config = EngineConfig {
        capture_trigger_field: Some("copy_ship_info".to_string()),
        ..EngineConfig::fast()
    };
    let engine = engine_with(&world, ops, config);

    let report = engine.run(None).await.unwrap();

    assert_eq!(report.summary.stop_reason, StopReason::Completed);
    assert_eq!(report.summary.orders_requested, 3);
    assert_eq!(report.summary.orders_committed, 3);
    for (i, record) in report.records.iter().enumerate() {
        let k = i as u32 + 1;
        assert_eq!(record.fields["订单编号"], format!("A-100{k}"));
        assert_eq!(record.order_id.as_ref().unwrap().0, format!("A-100{k}"));
        assert!(record.fields["copy_ship_info"].contains("文一西路"));
    }
    assert_eq!(report.associations.len(), 3);
    assert!(report.associations.iter().all(|a| !a.needs_review));
    assert_eq!(report.review_pending(), 0);

    // The copy trigger gets exactly one click per order.
    assert_eq!(world.pointer.clicks().len(), 3);
    assert_eq!(engine.status(), EngineState::Stopped);
}

#[tokio::test]
async fn duplicate_streak_escalates_then_gives_up() {
    let world = StubWorld::new();
    for k in 1..=4 {
        world.put_order(k, &order_no_locator(k), &copy_locator(k), "DUP-1");
    }

    let ops = vec![
        OperationSpec::new("订单编号", order_no_locator(1), FieldAction::ReadText).with_order(1),
    ];
    let engine = engine_with(&world, ops, EngineConfig::fast());

    let report = engine.run(Some(4)).await.unwrap();

    assert_eq!(report.summary.stop_reason, StopReason::DuplicateOrderStreak);
    assert_eq!(report.summary.orders_committed, 1);
    assert_eq!(report.summary.duplicates_encountered, 3);
    assert_eq!(report.records[0].order_id.as_ref().unwrap().0, "DUP-1");

    // Escalated advances scrolled further than the base amount.
    let scroll_amounts: Vec<f64> = world.page.scrolls().iter().map(|(_, dy)| *dy).collect();
    let base = EngineConfig::fast().scroll_base_amount;
    assert!(
        scroll_amounts.iter().any(|dy| *dy > base),
        "expected an escalated scroll beyond {base}, got {scroll_amounts:?}"
    );
}

#[tokio::test]
async fn failed_field_falls_back_to_cached_coordinates_on_retry() {
    let world = StubWorld::new();
    // Only the first order's click target exists; the second order keeps
    // its number span (for the reference probe) but has no link.
    world.put_order(1, &order_no_locator(1), &copy_locator(1), "A-1001");
    world.page.put_element(
        &order_no_locator(2),
        ElementHandle::new("order-no-2", Rect::new(200.0, 240.0, 220.0, 24.0), "订单编号：A-1002"),
    );

    let ops = vec![
        OperationSpec::new("view_details", copy_locator(1), FieldAction::Click).with_order(1),
    ];
    let engine = engine_with(&world, ops, EngineConfig::fast());

    let report = engine.run(Some(2)).await.unwrap();

    assert_eq!(report.summary.stop_reason, StopReason::Completed);
    assert_eq!(report.summary.orders_committed, 2);
    assert!(report.summary.retries_used >= 1);
    assert_eq!(report.records[1].fields["view_details"], "true");

    // Each order clicked twice (click + robustness click); the second
    // order's clicks reused the cached position from the first.
    let clicks = world.pointer.clicks();
    assert_eq!(clicks.len(), 4);
    assert_eq!(clicks[0], clicks[2], "cached coordinate reused");
}

#[tokio::test]
async fn operator_pause_suspends_and_resume_continues() {
    let world = StubWorld::new();
    for k in 1..=3 {
        world.put_order(k, &order_no_locator(k), &copy_locator(k), &format!("A-100{k}"));
    }

    let ops = vec![
        OperationSpec::new("订单编号", order_no_locator(1), FieldAction::ReadText).with_order(1),
    ];
    let config = EngineConfig {
        action_interval_ms: 100,
        ..EngineConfig::fast()
    };
    let engine = Arc::new(engine_with(&world, ops, config));

    let runner = engine.clone();
    let run = tokio::spawn(async move { runner.run(Some(3)).await });

    sleep(Duration::from_millis(50)).await;
    world.flags.pause();

    let mut paused_seen = false;
    for _ in 0..50 {
        if engine.status() == EngineState::Paused {
            paused_seen = true;
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }
    assert!(paused_seen, "engine never reached Paused");

    world.flags.resume();
    let report = run.await.unwrap().unwrap();
    assert_eq!(report.summary.stop_reason, StopReason::Completed);
    assert_eq!(report.summary.orders_committed, 3);
    assert!(world.run_state.stats().suspensions >= 1);
}

#[tokio::test]
async fn stop_request_ends_run_with_partial_results() {
    let world = StubWorld::new();
    for k in 1..=5 {
        world.put_order(k, &order_no_locator(k), &copy_locator(k), &format!("A-100{k}"));
    }

    let ops = vec![
        OperationSpec::new("订单编号", order_no_locator(1), FieldAction::ReadText).with_order(1),
    ];
    let config = EngineConfig {
        action_interval_ms: 80,
        ..EngineConfig::fast()
    };
    let engine = Arc::new(engine_with(&world, ops, config));

    let runner = engine.clone();
    let run = tokio::spawn(async move { runner.run(Some(5)).await });

    sleep(Duration::from_millis(120)).await;
    world.flags.request_stop();

    let report = run.await.unwrap().unwrap();
    assert_eq!(report.summary.stop_reason, StopReason::OperatorStop);
    assert!(report.summary.orders_committed < 5);
}

#[tokio::test]
async fn navigation_failure_stops_with_partial_results() {
    let world = StubWorld::new();
    for k in 1..=3 {
        world.put_order(k, &order_no_locator(k), &copy_locator(k), &format!("A-100{k}"));
    }
    world.page.fail_scrolls();

    let ops = vec![
        OperationSpec::new("订单编号", order_no_locator(1), FieldAction::ReadText).with_order(1),
    ];
    let engine = engine_with(&world, ops, EngineConfig::fast());

    let report = engine.run(Some(3)).await.unwrap();
    assert_eq!(report.summary.stop_reason, StopReason::NavigationFailure);
    assert_eq!(report.summary.orders_committed, 1);
}

#[tokio::test]
async fn once_on_first_order_runs_exactly_once() {
    let world = StubWorld::new();
    for k in 1..=2 {
        world.put_order(k, &order_no_locator(k), &copy_locator(k), &format!("A-100{k}"));
    }
    world.page.put_element(
        "//button[1]",
        ElementHandle::new("filter", Rect::new(40.0, 980.0, 60.0, 20.0), "筛选"),
    );

    let ops = vec![
        OperationSpec::new("open_filter", "//button[1]", FieldAction::Click)
            .with_order(1)
            .once_on_first_order(),
        OperationSpec::new("订单编号", order_no_locator(1), FieldAction::ReadText).with_order(2),
    ];
    let engine = engine_with(&world, ops, EngineConfig::fast());

    let report = engine.run(Some(2)).await.unwrap();
    assert_eq!(report.summary.orders_committed, 2);
    assert!(report.records[0].fields.contains_key("open_filter"));
    assert!(!report.records[1].fields.contains_key("open_filter"));

    // Filter clicked in order 1 only: one click plus the robustness
    // repeat.
    let filter_clicks = world
        .pointer
        .clicks()
        .iter()
        .filter(|(_, y)| *y == 990)
        .count();
    assert_eq!(filter_clicks, 2);
}

#[tokio::test]
async fn pager_mode_turns_pages_and_reindexes_items() {
    let world = StubWorld::new();
    world.put_order(1, &order_no_locator(1), &copy_locator(1), "P-1001");
    world.put_order(2, &order_no_locator(2), &copy_locator(2), "P-1002");
    world.page.put_element(
        "//div[9]/a[1]",
        ElementHandle::new("pager", Rect::new(600.0, 700.0, 40.0, 20.0), "下一页"),
    );

    // Clicking the pager swaps in the second page's orders at the same
    // list positions.
    let page = world.page.clone();
    world.pointer.on_click(move |_x, y| {
        if y == 710 {
            for k in 1..=2u32 {
                page.put_element(
                    format!("//div[3]/div[{k}]/span[1]"),
                    ElementHandle::new(
                        format!("order-no-p2-{k}"),
                        Rect::new(200.0, 120.0 * f64::from(k), 220.0, 24.0),
                        format!("订单编号：P-100{}", k + 2),
                    ),
                );
            }
        }
    });

    let ops = vec![
        OperationSpec::new("订单编号", order_no_locator(1), FieldAction::ReadText).with_order(1),
    ];
    let config = EngineConfig {
        pager: Some(shipharvest_engine::config::PagerConfig {
            next_page_locator: "//div[9]/a[1]".to_string(),
            orders_per_page: 2,
        }),
        ..EngineConfig::fast()
    };
    let engine = engine_with(&world, ops, config);

    let report = engine.run(Some(4)).await.unwrap();
    assert_eq!(report.summary.stop_reason, StopReason::Completed);
    assert_eq!(report.summary.orders_committed, 4);
    let ids: Vec<&str> = report
        .records
        .iter()
        .map(|r| r.order_id.as_ref().unwrap().0.as_str())
        .collect();
    assert_eq!(ids, vec!["P-1001", "P-1002", "P-1003", "P-1004"]);
}

#[tokio::test]
async fn missing_operations_and_count_are_fatal() {
    let world = StubWorld::new();
    let engine = engine_with(&world, Vec::new(), EngineConfig::fast());
    assert!(matches!(
        engine.run(None).await,
        Err(EngineError::NoEnabledOperations)
    ));

    let world = StubWorld::new();
    world.put_order(1, &order_no_locator(1), &copy_locator(1), "A-1001");
    let ops = vec![
        OperationSpec::new("订单编号", order_no_locator(1), FieldAction::ReadText).with_order(1),
    ];
    let engine = engine_with(&world, ops, EngineConfig::fast());
    assert!(matches!(
        engine.run(None).await,
        Err(EngineError::OrderCountUnresolved(_))
    ));
}

#[tokio::test]
async fn engine_cannot_run_twice() {
    let world = StubWorld::new();
    world.put_order(1, &order_no_locator(1), &copy_locator(1), "A-1001");
    let ops = vec![
        OperationSpec::new("订单编号", order_no_locator(1), FieldAction::ReadText).with_order(1),
    ];
    let engine = engine_with(&world, ops, EngineConfig::fast());

    engine.run(Some(1)).await.unwrap();
    assert!(matches!(
        engine.run(Some(1)).await,
        Err(EngineError::InvalidState(_))
    ));
}

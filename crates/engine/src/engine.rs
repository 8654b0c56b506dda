//! The collection engine orchestrator.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

use shipharvest_core_types::{LoopMode, OperationSpec, OrderId, OrderRecord, RunId};
use shipharvest_locator::{Locatable, Locator, LocatorPattern, PatternLearner, ResolveContext};
use shipharvest_run_state::{RunEvent, SuspendReason};

use crate::advance::PageAdvancer;
use crate::config::EngineConfig;
use crate::deps::EngineDeps;
use crate::errors::EngineError;
use crate::executor::FieldExecutor;
use crate::report::{RunReport, RunSummary, StopReason};
use crate::state::EngineState;

const SUSPEND_POLL_MS: u64 = 100;

static COUNT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("count regex"));

#[derive(Default)]
struct Counters {
    fields_failed: u32,
    retries_used: u32,
    duplicates: u32,
}

/// Drives the end-to-end loop over all orders.
pub struct CollectionEngine {
    ops: Vec<OperationSpec>,
    reference: Locator,
    config: EngineConfig,
    deps: EngineDeps,
    executor: FieldExecutor,
    advancer: PageAdvancer,
    status: Mutex<EngineState>,
    records: Mutex<Vec<OrderRecord>>,
}

impl CollectionEngine {
    pub fn new(
        ops: Vec<OperationSpec>,
        reference: Locator,
        config: EngineConfig,
        deps: EngineDeps,
    ) -> Self {
        let executor = FieldExecutor::new(
            deps.page.clone(),
            deps.pointer.clone(),
            deps.resolver.clone(),
            deps.coord_cache.clone(),
            deps.reconciler.clone(),
            deps.associations.clone(),
            deps.current_order.clone(),
            deps.operator.clone(),
            deps.state_sink.clone(),
            deps.scroll_tracker.clone(),
            config.clone(),
        );
        let advancer = PageAdvancer::new(
            deps.page.clone(),
            deps.pointer.clone(),
            deps.flags.clone(),
            reference.clone(),
            config.clone(),
        );
        Self {
            ops,
            reference,
            config,
            deps,
            executor,
            advancer,
            status: Mutex::new(EngineState::Idle),
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn status(&self) -> EngineState {
        *self.status.lock()
    }

    /// Records committed so far; available mid-run and after a stop.
    pub fn records(&self) -> Vec<OrderRecord> {
        self.records.lock().clone()
    }

    /// Run the full loop. `manual_count` supplies the order total when no
    /// count field is configured.
    pub async fn run(&self, manual_count: Option<u32>) -> Result<RunReport, EngineError> {
        {
            let mut status = self.status.lock();
            if *status != EngineState::Idle {
                return Err(EngineError::InvalidState(status.name().to_string()));
            }
            *status = EngineState::Running;
        }
        let run_id = RunId::new();
        let started_at = Utc::now();
        info!(%run_id, "collection run starting");

        let outcome = self.run_inner(manual_count).await;
        *self.status.lock() = EngineState::Stopped;

        let (requested, counters, stop_reason) = match outcome {
            Ok(parts) => parts,
            Err(err) => {
                error!(error = %err, "run failed before collection could proceed");
                return Err(err);
            }
        };

        let _ = self
            .deps
            .state_sink
            .append(RunEvent::RunStopped {
                reason: format!("{stop_reason:?}"),
            })
            .await;

        let records = self.records();
        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            summary: RunSummary {
                orders_requested: requested,
                orders_committed: records.len() as u32,
                fields_failed: counters.fields_failed,
                retries_used: counters.retries_used,
                duplicates_encountered: counters.duplicates,
                stop_reason,
            },
            records,
            associations: self.deps.associations.snapshot(),
        };
        info!(
            committed = report.summary.orders_committed,
            requested = report.summary.orders_requested,
            reason = ?report.summary.stop_reason,
            "collection run finished"
        );
        Ok(report)
    }

    async fn run_inner(
        &self,
        manual_count: Option<u32>,
    ) -> Result<(u32, Counters, StopReason), EngineError> {
        let enabled: Vec<OperationSpec> =
            self.ops.iter().filter(|op| op.enabled).cloned().collect();
        if enabled.is_empty() {
            return Err(EngineError::NoEnabledOperations);
        }

        // Fresh run: no association survives from a previous one, and the
        // clipboard's pre-run content is pinned so it never counts as a
        // capture.
        self.deps
            .associations
            .clear_for_new_run()
            .map_err(|e| EngineError::Clipboard(e.to_string()))?;
        self.deps
            .reconciler
            .record_initial_snapshot()
            .await
            .map_err(|e| EngineError::Clipboard(e.to_string()))?;
        self.executor.clear_last_order_id();
        self.deps.current_order.clear();

        let mut total = match enabled.iter().find(|op| op.is_order_count_source) {
            Some(spec) => self.resolve_order_count(spec).await?,
            None => manual_count.ok_or_else(|| {
                EngineError::OrderCountUnresolved(
                    "no count field configured and no manual count supplied".to_string(),
                )
            })?,
        };
        if let Some(limit) = self.config.order_limit {
            if total > limit {
                info!(total, limit, "order limit active, truncating run");
                total = limit;
            }
        }
        if total == 0 {
            info!("order count is zero, nothing to collect");
            return Ok((0, Counters::default(), StopReason::Completed));
        }

        let mut actions: Vec<OperationSpec> = enabled
            .into_iter()
            .filter(|op| !op.is_order_count_source)
            .collect();
        actions.sort_by_key(|op| op.order);
        if actions.is_empty() {
            return Err(EngineError::NoEnabledOperations);
        }

        // Fatal before any order is processed if no pattern is derivable.
        let mut patterns = self.learn_patterns(&actions)?;
        info!(total, fields = actions.len(), "collection loop entered");

        let mut counters = Counters::default();
        let mut seen_ids: HashSet<String> = HashSet::new();
        let mut duplicate_streak: u32 = 0;
        let mut stop_reason = StopReason::Completed;
        let mut index: u32 = 1;

        'orders: while index <= total {
            if !self.wait_while_suspended().await {
                stop_reason = StopReason::OperatorStop;
                break;
            }

            self.executor.clear_last_order_id();
            self.deps.current_order.clear();
            let mut record = OrderRecord::new(index);
            let item_k = self.item_index(index);

            for op in &actions {
                if op.loop_mode == LoopMode::OnceOnFirstOrder && index > 1 {
                    continue;
                }
                if !self.wait_while_suspended().await {
                    stop_reason = StopReason::OperatorStop;
                    break 'orders;
                }

                let base = Locator::new(op.locator.clone());
                let locator = match (op.loop_mode, patterns.get(&op.name)) {
                    // One-shot operations keep their literal locator.
                    (LoopMode::OnceOnFirstOrder, _) => base,
                    (LoopMode::Always, Some(pattern)) => pattern.generate(&base, item_k),
                    (LoopMode::Always, None) => base,
                };

                if let Some(value) = self
                    .execute_with_retry(op, &locator, index, &mut counters)
                    .await
                {
                    record.insert(op.name.clone(), value);
                }

                if self.config.action_interval_ms > 0 {
                    sleep(Duration::from_millis(self.config.action_interval_ms)).await;
                }
            }

            if !record.is_empty() {
                let order_id = record
                    .fields
                    .iter()
                    .find(|(name, _)| self.config.is_order_id_field(name))
                    .map(|(_, value)| value.clone());

                match order_id {
                    Some(id) if seen_ids.contains(&id) => {
                        duplicate_streak += 1;
                        counters.duplicates += 1;
                        warn!(
                            order_id = id,
                            streak = duplicate_streak,
                            "duplicate order detected"
                        );
                        let _ = self
                            .deps
                            .state_sink
                            .append(RunEvent::DuplicateOrder {
                                order_id: OrderId::new(id.clone()),
                                streak: duplicate_streak,
                            })
                            .await;

                        if duplicate_streak >= self.config.duplicate_streak_cutoff {
                            error!(
                                streak = duplicate_streak,
                                "navigation stuck on the same order, giving up"
                            );
                            stop_reason = StopReason::DuplicateOrderStreak;
                            break;
                        }

                        // Escalate the scroll step and re-process the same
                        // order index.
                        let multiplier =
                            1.0 + self.config.scroll_escalation_step * f64::from(duplicate_streak);
                        let _ = self
                            .deps
                            .state_sink
                            .append(RunEvent::ScrollAdvanced { multiplier })
                            .await;
                        match self.advancer.scroll_to_next(multiplier).await {
                            Ok(_) => continue 'orders,
                            Err(err) => {
                                error!(error = %err, "escalated advance failed");
                                stop_reason = StopReason::NavigationFailure;
                                break;
                            }
                        }
                    }
                    Some(id) => {
                        seen_ids.insert(id.clone());
                        duplicate_streak = 0;
                        record.order_id = Some(OrderId::new(id));
                        self.commit(record).await;
                    }
                    None => {
                        duplicate_streak = 0;
                        self.commit(record).await;
                    }
                }
            } else {
                debug!(index, "no field produced a value, order not committed");
            }

            if index < total {
                if !self.wait_while_suspended().await {
                    stop_reason = StopReason::OperatorStop;
                    break;
                }
                match self.advance_after(index, &actions, &mut patterns).await {
                    Ok(()) => {}
                    Err(err) => {
                        error!(error = %err, "navigation failed, stopping with partial results");
                        stop_reason = StopReason::NavigationFailure;
                        break;
                    }
                }
            }
            index += 1;
        }

        if self.deps.flags.is_stop_requested() && stop_reason == StopReason::Completed {
            stop_reason = StopReason::OperatorStop;
        }
        Ok((total, counters, stop_reason))
    }

    /// Index of the item within the current page (1-based); identical to
    /// the global index unless a pager is configured.
    fn item_index(&self, order_index: u32) -> u32 {
        match &self.config.pager {
            Some(pager) if pager.orders_per_page > 0 => {
                (order_index - 1) % pager.orders_per_page + 1
            }
            _ => order_index,
        }
    }

    async fn advance_after(
        &self,
        index: u32,
        actions: &[OperationSpec],
        patterns: &mut HashMap<String, LocatorPattern>,
    ) -> Result<(), EngineError> {
        if let Some(pager) = self.config.pager.clone() {
            if pager.orders_per_page > 0 && index % pager.orders_per_page == 0 {
                if self.advancer.next_page().await? {
                    // Fresh page: the list pattern may have shifted.
                    *patterns = self.learn_patterns(actions)?;
                    return Ok(());
                }
                warn!("page turn failed, falling back to scroll");
            }
        }

        match self.advancer.scroll_to_next(1.0).await? {
            true => {
                let _ = self
                    .deps
                    .state_sink
                    .append(RunEvent::ScrollAdvanced { multiplier: 1.0 })
                    .await;
            }
            false => {
                // Not fatal: the next order's generated locator may still
                // resolve without a verified advance.
                warn!(index, "advance could not be verified, continuing");
            }
        }
        Ok(())
    }

    async fn execute_with_retry(
        &self,
        op: &OperationSpec,
        locator: &Locator,
        order_index: u32,
        counters: &mut Counters,
    ) -> Option<String> {
        let mut attempt: u32 = 0;
        loop {
            if self.deps.flags.is_stop_requested() {
                return None;
            }
            let retry_episode = attempt > 0;
            match self
                .executor
                .execute(op, locator, order_index, retry_episode)
                .await
            {
                Ok(value) => {
                    if retry_episode {
                        self.deps.retry.record_attempt(&op.name, order_index, true);
                    }
                    let _ = self
                        .deps
                        .state_sink
                        .append(RunEvent::FieldSucceeded {
                            field: op.name.clone(),
                            order_index,
                            attempts: attempt + 1,
                        })
                        .await;
                    return value;
                }
                Err(err) => {
                    warn!(
                        field = op.name,
                        order_index,
                        attempt = attempt + 1,
                        error = %err,
                        "field execution failed"
                    );
                    self.deps.retry.record_attempt(&op.name, order_index, false);

                    if self.deps.retry.should_retry(&op.name, order_index) {
                        counters.retries_used += 1;
                        sleep(self.deps.retry.policy().delay()).await;
                        if !self.wait_while_suspended().await {
                            return None;
                        }
                        attempt += 1;
                        continue;
                    }

                    counters.fields_failed += 1;
                    let _ = self
                        .deps
                        .state_sink
                        .append(RunEvent::FieldFailed {
                            field: op.name.clone(),
                            order_index,
                            attempts: self.deps.retry.attempts_used(&op.name, order_index),
                            error: err.to_string(),
                        })
                        .await;
                    return None;
                }
            }
        }
    }

    /// Spin-wait while paused or blocked. Neither wait consumes retry
    /// budget. Returns `false` when stop was requested.
    async fn wait_while_suspended(&self) -> bool {
        if self.deps.flags.is_stop_requested() {
            return false;
        }
        if !self.deps.flags.should_suspend() {
            return true;
        }

        let reason = if self.deps.flags.is_blocked() {
            SuspendReason::AnomalyBlocked
        } else {
            SuspendReason::OperatorPause
        };
        info!(?reason, "collection suspended");
        *self.status.lock() = EngineState::Paused;
        let _ = self
            .deps
            .state_sink
            .append(RunEvent::Suspended { reason })
            .await;

        while self.deps.flags.should_suspend() {
            if self.deps.flags.is_stop_requested() {
                return false;
            }
            sleep(Duration::from_millis(SUSPEND_POLL_MS)).await;
        }

        *self.status.lock() = EngineState::Running;
        let _ = self.deps.state_sink.append(RunEvent::Resumed).await;
        info!("collection resumed");
        true
    }

    async fn resolve_order_count(&self, spec: &OperationSpec) -> Result<u32, EngineError> {
        let locator = Locator::new(spec.locator.clone());
        let ctx = ResolveContext::new(spec.name.clone());
        let resolution = self
            .deps
            .resolver
            .resolve(&locator, &ctx)
            .await
            .map_err(|e| EngineError::OrderCountUnresolved(e.to_string()))?;
        let text = match resolution.locatable {
            Locatable::Element(element) => element.text,
            Locatable::CachedPoint { .. } => {
                return Err(EngineError::OrderCountUnresolved(
                    "count field resolved to a coordinate, not text".to_string(),
                ))
            }
        };
        let count = COUNT_RE
            .find(&text)
            .and_then(|m| m.as_str().parse::<u32>().ok())
            .ok_or_else(|| {
                EngineError::OrderCountUnresolved(format!("no number in '{}'", text.trim()))
            })?;
        info!(count, field = spec.name, "order count resolved");
        Ok(count)
    }

    /// Derive a pattern for every looping field, recomputing the diff
    /// against the shared reference per field. Fields the reference can't
    /// explain inherit the first successful pattern; with no reference at
    /// all, the basic single-locator fallback applies.
    fn learn_patterns(
        &self,
        actions: &[OperationSpec],
    ) -> Result<HashMap<String, LocatorPattern>, EngineError> {
        let mut patterns = HashMap::new();
        let mut shared: Option<LocatorPattern> = None;
        let learner =
            (!self.reference.is_empty()).then(|| PatternLearner::new(self.reference.clone()));

        for op in actions {
            if op.loop_mode == LoopMode::OnceOnFirstOrder {
                continue;
            }
            let base = Locator::new(op.locator.clone());
            let learned = match &learner {
                Some(learner) => learner.learn_for(&base),
                None => LocatorPattern::from_single(&base),
            };
            match learned {
                Ok(pattern) => {
                    if pattern.low_confidence {
                        warn!(field = op.name, "low-confidence locator pattern");
                    }
                    shared.get_or_insert_with(|| pattern.clone());
                    patterns.insert(op.name.clone(), pattern);
                }
                Err(err) => match (&shared, LocatorPattern::from_single(&base)) {
                    (_, Ok(pattern)) => {
                        warn!(field = op.name, error = %err, "using single-locator fallback pattern");
                        patterns.insert(op.name.clone(), pattern);
                    }
                    (Some(pattern), Err(_)) => {
                        warn!(field = op.name, error = %err, "reusing shared pattern");
                        patterns.insert(op.name.clone(), pattern.clone());
                    }
                    (None, Err(_)) => return Err(err.into()),
                },
            }
        }
        Ok(patterns)
    }

    async fn commit(&self, record: OrderRecord) {
        let order_id = record.order_id.clone();
        let sequence_index = record.sequence_index;
        info!(
            index = sequence_index,
            order_id = order_id.as_ref().map(|id| id.0.as_str()).unwrap_or("-"),
            fields = record.fields.len(),
            "order committed"
        );
        self.records.lock().push(record);
        let _ = self
            .deps
            .state_sink
            .append(RunEvent::OrderCommitted {
                order_id,
                sequence_index,
            })
            .await;
    }
}
